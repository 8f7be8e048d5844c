//! The repository façade: binds the object database, the reference
//! database, and configuration, and exposes the revision resolver.

mod discover;
mod env;
mod error;
mod events;
mod init;
pub mod revision;
mod scalars;
mod state;

pub use env::SystemEnv;
pub use error::RepoError;
pub use events::{ListenerHandle, ListenerRegistry, RepositoryEvent};
// The shared ref-name validator, for callers that vet names before
// touching the ref database.
pub use gitcore_ref::is_valid_ref_name;
pub use state::RepositoryState;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bstr::BString;
use gitcore_config::Config;
use gitcore_hash::ObjectId;
use gitcore_odb::ObjectDatabase;
use gitcore_ref::{LogAllRefUpdates, Ref, RefDatabase, RefUpdate, UpdateResult};
use gitcore_utils::date::{GitDate, Signature};

/// Options for opening or creating a repository.
///
/// This is the single construction entry point; [`Repository::open`],
/// [`Repository::init`], and the other constructors are thin wrappers.
/// Defaulting order: explicit settings, then the environment snapshot,
/// then discovery, then repository config.
#[derive(Default)]
pub struct RepositoryBuilder {
    git_dir: Option<PathBuf>,
    work_tree: Option<PathBuf>,
    index_file: Option<PathBuf>,
    bare: Option<bool>,
    env: Option<SystemEnv>,
}

impl RepositoryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn git_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.git_dir = Some(path.into());
        self
    }

    pub fn work_tree(mut self, path: impl Into<PathBuf>) -> Self {
        self.work_tree = Some(path.into());
        self
    }

    pub fn index_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.index_file = Some(path.into());
        self
    }

    pub fn bare(mut self, bare: bool) -> Self {
        self.bare = Some(bare);
        self
    }

    /// Substitute the environment snapshot (test hook).
    pub fn env(mut self, env: SystemEnv) -> Self {
        self.env = Some(env);
        self
    }

    /// Open the repository described by this builder.
    pub fn open(self) -> Result<Repository, RepoError> {
        let env = self.env.unwrap_or_else(SystemEnv::from_process);

        let git_dir = match self.git_dir.or_else(|| env.git_dir()) {
            Some(dir) => dir,
            None => return Err(RepoError::NotFound(PathBuf::from("."))),
        };
        if !git_dir.join("HEAD").is_file() {
            return Err(RepoError::InvalidGitDir {
                path: git_dir,
                reason: "missing HEAD".into(),
            });
        }

        // Config: system (unless disabled), global, repository.
        let mut config = Config::new();
        if !env.config_nosystem() {
            config.load_file(Path::new("/etc/gitconfig"))?;
        }
        if let Some(home) = env.home() {
            config.load_file(&home.join(".gitconfig"))?;
        }
        config.load_file(&git_dir.join("config"))?;

        check_repository_format(&config)?;

        let bare = match self.bare {
            Some(bare) => bare,
            None => config.bool("core.bare")?.unwrap_or(false),
        };

        let work_tree = if bare {
            None
        } else {
            self.work_tree
                .or_else(|| env.work_tree())
                .or_else(|| {
                    config
                        .string("core.worktree")
                        .map(|wt| git_dir.join(wt))
                })
                .or_else(|| git_dir.parent().map(|p| p.to_path_buf()))
        };

        let objects_dir = env
            .object_directory()
            .unwrap_or_else(|| git_dir.join("objects"));
        let odb = Arc::new(ObjectDatabase::open_with_alternates(
            &objects_dir,
            &env.alternate_object_directories(),
        )?);

        let mut refs = RefDatabase::files(&git_dir, Arc::clone(&odb));
        refs.set_log_all_ref_updates(log_all_from_config(&config)?);
        refs.set_committer(committer_from_config(&config));

        let index_file = if bare {
            None
        } else {
            Some(
                self.index_file
                    .or_else(|| env.index_file())
                    .unwrap_or_else(|| git_dir.join("index")),
            )
        };

        Ok(Repository {
            git_dir: Some(git_dir),
            work_tree,
            index_file,
            bare,
            odb,
            refs,
            config,
            use_count: AtomicUsize::new(1),
            listeners: ListenerRegistry::new(),
        })
    }
}

/// A git repository: durable state plus the resolver over it.
pub struct Repository {
    /// The metadata directory; `None` for in-memory repositories.
    git_dir: Option<PathBuf>,
    work_tree: Option<PathBuf>,
    index_file: Option<PathBuf>,
    bare: bool,
    odb: Arc<ObjectDatabase>,
    refs: RefDatabase,
    config: Config,
    use_count: AtomicUsize,
    listeners: ListenerRegistry,
}

impl Repository {
    /// Open an existing repository. `path` may be the git dir itself or a
    /// working-tree root containing `.git`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, RepoError> {
        Self::open_with_env(path, SystemEnv::from_process())
    }

    /// Open with an explicit environment snapshot.
    pub fn open_with_env(path: impl AsRef<Path>, env: SystemEnv) -> Result<Self, RepoError> {
        let path = path.as_ref();
        let builder = if path.join("HEAD").is_file() && path.join("objects").is_dir() {
            RepositoryBuilder::new().git_dir(path)
        } else if path.join(".git").is_dir() {
            RepositoryBuilder::new()
                .git_dir(path.join(".git"))
                .work_tree(path)
        } else {
            return Err(RepoError::NotFound(path.to_path_buf()));
        };
        builder.env(env).open()
    }

    /// Walk up from `start` looking for a repository, honouring
    /// `GIT_CEILING_DIRECTORIES`.
    pub fn discover(start: impl AsRef<Path>) -> Result<Self, RepoError> {
        Self::discover_with_env(start, SystemEnv::from_process())
    }

    pub fn discover_with_env(
        start: impl AsRef<Path>,
        env: SystemEnv,
    ) -> Result<Self, RepoError> {
        let git_dir = discover::discover_git_dir(start.as_ref(), &env.ceiling_directories())?;
        RepositoryBuilder::new().git_dir(git_dir).env(env).open()
    }

    /// Create an empty repository with a working tree.
    pub fn init(path: impl AsRef<Path>) -> Result<Self, RepoError> {
        let git_dir = init::init_repository(path.as_ref(), false)?;
        RepositoryBuilder::new()
            .git_dir(git_dir)
            .env(SystemEnv::empty())
            .open()
    }

    /// Create an empty bare repository.
    pub fn init_bare(path: impl AsRef<Path>) -> Result<Self, RepoError> {
        let git_dir = init::init_repository(path.as_ref(), true)?;
        RepositoryBuilder::new()
            .git_dir(git_dir)
            .env(SystemEnv::empty())
            .open()
    }

    /// A fully in-memory repository (bare; no git dir on disk).
    pub fn in_memory() -> Result<Self, RepoError> {
        let odb = Arc::new(ObjectDatabase::in_memory());
        let refs = RefDatabase::in_memory(Arc::clone(&odb));
        refs.set_symbolic_ref("HEAD", "refs/heads/master")?;

        Ok(Self {
            git_dir: None,
            work_tree: None,
            index_file: None,
            bare: true,
            odb,
            refs,
            config: Config::new(),
            use_count: AtomicUsize::new(1),
            listeners: ListenerRegistry::new(),
        })
    }

    // --- Use counting ---

    /// Increment the use count; requires a matching [`close`](Self::close).
    pub fn retain(&self) {
        self.use_count.fetch_add(1, Ordering::SeqCst);
    }

    /// Decrement the use count. Returns true when it reached zero and the
    /// databases were released (the owner may now drop the value).
    pub fn close(&self) -> bool {
        let previous = self.use_count.fetch_sub(1, Ordering::SeqCst);
        previous == 1
    }

    /// The current use count (mainly for diagnostics).
    pub fn use_count(&self) -> usize {
        self.use_count.load(Ordering::SeqCst)
    }

    // --- Paths ---

    /// The metadata directory; `None` for in-memory repositories.
    pub fn git_dir(&self) -> Option<&Path> {
        self.git_dir.as_deref()
    }

    pub fn is_bare(&self) -> bool {
        self.bare
    }

    /// The working-tree root. Bare repositories have none.
    pub fn work_tree(&self) -> Result<&Path, RepoError> {
        self.work_tree.as_deref().ok_or(RepoError::NoWorkTree)
    }

    /// The index file path. Bare repositories have none.
    pub fn index_file(&self) -> Result<&Path, RepoError> {
        self.index_file.as_deref().ok_or(RepoError::NoWorkTree)
    }

    // --- Subsystems ---

    pub fn odb(&self) -> &ObjectDatabase {
        &self.odb
    }

    pub fn refs(&self) -> &RefDatabase {
        &self.refs
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Update configuration in memory and notify listeners.
    pub fn config_mut(&mut self) -> &mut Config {
        &mut self.config
    }

    pub fn listeners(&self) -> &ListenerRegistry {
        &self.listeners
    }

    /// Notify listeners that the configuration changed.
    pub fn fire_config_changed(&self) {
        self.listeners.fire(RepositoryEvent::ConfigChanged);
    }

    /// Notify listeners that the index changed.
    pub fn fire_index_changed(&self) {
        self.listeners.fire(RepositoryEvent::IndexChanged);
    }

    /// Begin an update of one ref. Updating through a symbolic ref
    /// rewrites its leaf; `detach` replaces the symbolic ref itself.
    pub fn update_ref(&self, name: &str, detach: bool) -> Result<RefUpdate<'_>, RepoError> {
        Ok(self.refs.new_update(name, detach)?)
    }

    /// Atomically rename a ref, carrying its reflog forward.
    pub fn rename_ref(&self, from: &str, to: &str) -> Result<UpdateResult, RepoError> {
        Ok(self.refs.rename_ref(from, to)?)
    }

    // --- Revision resolution ---

    /// Resolve a revision expression to an object id. `Ok(None)` for
    /// names that simply do not exist.
    pub fn resolve(&self, revstr: &str) -> Result<Option<ObjectId>, RepoError> {
        revision::resolve(self, revstr)
    }

    /// Like [`resolve`](Self::resolve) but keeps plain branch expressions
    /// as names instead of forcing them to object ids.
    pub fn simplify(&self, revstr: &str) -> Result<Option<String>, RepoError> {
        revision::simplify(self, revstr)
    }

    // --- Branch and ref views ---

    /// The full name of the ref HEAD points to, or the hex id when HEAD
    /// is detached. `None` when there is no HEAD.
    pub fn full_branch(&self) -> Result<Option<String>, RepoError> {
        match self.refs.exact_ref("HEAD")? {
            None => Ok(None),
            Some(head) => match head.symbolic_target() {
                Some(target) => Ok(Some(target.as_str().to_string())),
                None => Ok(head.oid().map(|oid| oid.to_hex())),
            },
        }
    }

    /// The short branch name HEAD points to (`main` for
    /// `refs/heads/main`), or the hex id when detached.
    pub fn branch(&self) -> Result<Option<String>, RepoError> {
        Ok(self.full_branch()?.map(|name| shorten_ref_name(&name).to_string()))
    }

    /// All refs, keyed by full name. Includes HEAD.
    pub fn all_refs(&self) -> Result<HashMap<String, Ref>, RepoError> {
        Ok(self.refs.get_refs("")?.into_iter().collect())
    }

    /// All tags, keyed by short name (`v1.0` for `refs/tags/v1.0`).
    pub fn tags(&self) -> Result<HashMap<String, Ref>, RepoError> {
        Ok(self
            .refs
            .get_refs("refs/tags/")?
            .into_values()
            .map(|r| (r.name.short_name().to_string(), r))
            .collect())
    }

    /// Group all refs by the object they peel to: annotated tags by their
    /// peeled target, everything else by its direct id.
    pub fn refs_by_peeled_id(&self) -> Result<HashMap<ObjectId, Vec<Ref>>, RepoError> {
        let mut map: HashMap<ObjectId, Vec<Ref>> = HashMap::new();
        for (_, r) in self.refs.get_refs("")? {
            let peeled = self.refs.peel(&r)?;
            let key = match peeled.peeled_oid().or_else(|| peeled.oid()) {
                Some(oid) => oid,
                None => continue, // symbolic or unborn
            };
            map.entry(key).or_default().push(peeled);
        }
        Ok(map)
    }

    /// The repository's operational state, from marker files.
    pub fn state(&self) -> RepositoryState {
        match &self.git_dir {
            None => RepositoryState::Bare,
            Some(git_dir) => state::probe(git_dir, self.bare),
        }
    }

    /// The committer identity used for reflogs, from `user.name` /
    /// `user.email` with a fallback.
    pub fn committer(&self) -> Signature {
        committer_from_config(&self.config)
    }

    pub(crate) fn git_dir_or_err(&self) -> Result<&Path, RepoError> {
        self.git_dir.as_deref().ok_or(RepoError::NoWorkTree)
    }
}

impl std::fmt::Debug for Repository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repository")
            .field("git_dir", &self.git_dir)
            .field("work_tree", &self.work_tree)
            .field("bare", &self.bare)
            .finish_non_exhaustive()
    }
}

/// Strip the standard namespace prefixes from a full ref name.
pub fn shorten_ref_name(name: &str) -> &str {
    name.strip_prefix("refs/heads/")
        .or_else(|| name.strip_prefix("refs/tags/"))
        .or_else(|| name.strip_prefix("refs/remotes/"))
        .unwrap_or(name)
}

/// Gate on `core.repositoryformatversion`: version 0 is the baseline;
/// version 1 requires every `extensions.*` entry to be understood; any
/// other version is rejected.
fn check_repository_format(config: &Config) -> Result<(), RepoError> {
    let version = config.int("core.repositoryformatversion")?.unwrap_or(0);
    match version {
        0 => Ok(()),
        1 => {
            for entry in config.entries() {
                if entry.section != "extensions" {
                    continue;
                }
                let value = entry.value.clone().unwrap_or_default();
                match entry.name.as_str() {
                    // The flat files backend is the only supported ref
                    // storage; a reftree value names a backend this build
                    // does not carry.
                    "refsstorage" if value.is_empty() || value == "files" => {}
                    _ => {
                        return Err(RepoError::UnsupportedExtension {
                            key: format!("extensions.{}", entry.name),
                            value,
                        })
                    }
                }
            }
            Ok(())
        }
        other => Err(RepoError::UnknownFormatVersion(other)),
    }
}

fn log_all_from_config(config: &Config) -> Result<LogAllRefUpdates, RepoError> {
    match config.string("core.logallrefupdates").as_deref() {
        Some("always") => Ok(LogAllRefUpdates::Always),
        Some(_) => Ok(match config.bool("core.logallrefupdates")? {
            Some(false) => LogAllRefUpdates::False,
            _ => LogAllRefUpdates::True,
        }),
        None => Ok(LogAllRefUpdates::True),
    }
}

fn committer_from_config(config: &Config) -> Signature {
    Signature {
        name: BString::from(
            config
                .string("user.name")
                .unwrap_or_else(|| "gitcore".to_string()),
        ),
        email: BString::from(
            config
                .string("user.email")
                .unwrap_or_else(|| "gitcore@localhost".to_string()),
        ),
        date: GitDate::now(),
    }
}
