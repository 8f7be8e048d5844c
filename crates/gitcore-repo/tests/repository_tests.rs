//! Repository construction, environment handling, and scalar files.

mod common;

use common::*;
use gitcore_hash::ObjectId;
use gitcore_repo::{RepoError, Repository, RepositoryBuilder, RepositoryState, SystemEnv};

#[test]
fn open_from_work_tree_and_git_dir() {
    let dir = tempfile::tempdir().unwrap();
    Repository::init(dir.path()).unwrap();

    let from_worktree = Repository::open(dir.path()).unwrap();
    assert_eq!(from_worktree.git_dir().unwrap(), dir.path().join(".git"));
    assert_eq!(from_worktree.work_tree().unwrap(), dir.path());

    let from_git_dir = Repository::open(dir.path().join(".git")).unwrap();
    assert_eq!(from_git_dir.git_dir().unwrap(), dir.path().join(".git"));
}

#[test]
fn open_missing_repository_fails() {
    let dir = tempfile::tempdir().unwrap();
    assert!(matches!(
        Repository::open(dir.path()),
        Err(RepoError::NotFound(_))
    ));
}

#[test]
fn bare_repository_has_no_work_tree_or_index() {
    let dir = tempfile::tempdir().unwrap();
    let repo = Repository::init_bare(dir.path().join("store.git")).unwrap();

    assert!(repo.is_bare());
    assert!(matches!(repo.work_tree(), Err(RepoError::NoWorkTree)));
    assert!(matches!(repo.index_file(), Err(RepoError::NoWorkTree)));
    assert_eq!(repo.state(), RepositoryState::Bare);
    assert!(matches!(
        repo.read_merge_heads(),
        Err(RepoError::NoWorkTree)
    ));
}

#[test]
fn environment_overrides_are_honoured() {
    let dir = tempfile::tempdir().unwrap();
    Repository::init(dir.path()).unwrap();

    let index_override = dir.path().join("custom-index");
    let mut env = SystemEnv::empty();
    env.set("GIT_INDEX_FILE", index_override.display().to_string());

    let repo = Repository::open_with_env(dir.path(), env).unwrap();
    assert_eq!(repo.index_file().unwrap(), index_override);
}

#[test]
fn alternate_dirs_from_environment() {
    let shared_dir = tempfile::tempdir().unwrap();
    let shared = Repository::init_bare(shared_dir.path().join("shared.git")).unwrap();
    let c1 = commit(&shared, &[], "shared commit");

    let dir = tempfile::tempdir().unwrap();
    Repository::init(dir.path()).unwrap();

    let mut env = SystemEnv::empty();
    env.set(
        "GIT_ALTERNATE_OBJECT_DIRECTORIES",
        shared_dir
            .path()
            .join("shared.git/objects")
            .display()
            .to_string(),
    );
    let repo = Repository::open_with_env(dir.path(), env).unwrap();
    assert!(repo.odb().has(&c1));
}

#[test]
fn unknown_format_version_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    Repository::init(dir.path()).unwrap();
    std::fs::write(
        dir.path().join(".git/config"),
        "[core]\n\trepositoryformatversion = 7\n",
    )
    .unwrap();

    assert!(matches!(
        Repository::open(dir.path()),
        Err(RepoError::UnknownFormatVersion(7))
    ));
}

#[test]
fn reftree_extension_is_unsupported() {
    let dir = tempfile::tempdir().unwrap();
    Repository::init(dir.path()).unwrap();
    std::fs::write(
        dir.path().join(".git/config"),
        "[core]\n\trepositoryformatversion = 1\n[extensions]\n\trefsStorage = reftree\n",
    )
    .unwrap();

    assert!(matches!(
        Repository::open(dir.path()),
        Err(RepoError::UnsupportedExtension { .. })
    ));
}

#[test]
fn version_one_without_unknown_extensions_opens() {
    let dir = tempfile::tempdir().unwrap();
    Repository::init(dir.path()).unwrap();
    std::fs::write(
        dir.path().join(".git/config"),
        "[core]\n\trepositoryformatversion = 1\n",
    )
    .unwrap();
    assert!(Repository::open(dir.path()).is_ok());
}

#[test]
fn use_count_retain_close() {
    let dir = tempfile::tempdir().unwrap();
    let repo = Repository::init(dir.path()).unwrap();

    assert_eq!(repo.use_count(), 1);
    repo.retain();
    assert_eq!(repo.use_count(), 2);
    assert!(!repo.close());
    assert!(repo.close());
    assert_eq!(repo.use_count(), 0);
}

#[test]
fn scalar_head_files_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let repo = Repository::init(dir.path()).unwrap();
    let a = ObjectId::from_hex("aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa").unwrap();
    let b = ObjectId::from_hex("bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb").unwrap();

    assert_eq!(repo.read_merge_heads().unwrap(), None);
    repo.write_merge_heads(Some(&[a, b])).unwrap();
    assert_eq!(repo.read_merge_heads().unwrap(), Some(vec![a, b]));
    assert_eq!(repo.state(), RepositoryState::Merging);
    repo.write_merge_heads(None).unwrap();
    assert_eq!(repo.read_merge_heads().unwrap(), None);
    assert_eq!(repo.state(), RepositoryState::Safe);

    repo.write_orig_head(Some(a)).unwrap();
    assert_eq!(repo.read_orig_head().unwrap(), Some(a));

    repo.write_cherry_pick_head(Some(a)).unwrap();
    assert_eq!(repo.read_cherry_pick_head().unwrap(), Some(a));
    assert_eq!(repo.state(), RepositoryState::CherryPicking);
    repo.write_cherry_pick_head(None).unwrap();

    repo.write_revert_head(Some(b)).unwrap();
    assert_eq!(repo.read_revert_head().unwrap(), Some(b));
    assert_eq!(repo.state(), RepositoryState::Reverting);
    repo.write_revert_head(None).unwrap();
}

#[test]
fn scalar_message_files_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let repo = Repository::init(dir.path()).unwrap();

    assert_eq!(repo.read_merge_msg().unwrap(), None);
    repo.write_merge_msg(Some("Merge branch 'dev'\n")).unwrap();
    assert_eq!(
        repo.read_merge_msg().unwrap().as_deref(),
        Some("Merge branch 'dev'\n")
    );
    repo.write_merge_msg(None).unwrap();
    assert_eq!(repo.read_merge_msg().unwrap(), None);

    repo.write_squash_msg(Some("Squashed commit\n")).unwrap();
    assert_eq!(
        repo.read_squash_msg().unwrap().as_deref(),
        Some("Squashed commit\n")
    );

    repo.write_commit_edit_msg(Some("wip\n")).unwrap();
    assert_eq!(repo.read_commit_edit_msg().unwrap().as_deref(), Some("wip\n"));
}

#[test]
fn merge_head_resolves_as_a_revision() {
    let dir = tempfile::tempdir().unwrap();
    let repo = Repository::init(dir.path()).unwrap();
    let c1 = commit(&repo, &[], "merged");

    repo.write_merge_heads(Some(&[c1])).unwrap();
    assert_eq!(repo.resolve("MERGE_HEAD").unwrap(), Some(c1));

    repo.write_orig_head(Some(c1)).unwrap();
    assert_eq!(repo.resolve("ORIG_HEAD").unwrap(), Some(c1));
}

#[test]
fn builder_is_the_single_entry_point() {
    let dir = tempfile::tempdir().unwrap();
    Repository::init(dir.path()).unwrap();

    // Explicit settings beat config: force bare on a non-bare layout.
    let repo = RepositoryBuilder::new()
        .git_dir(dir.path().join(".git"))
        .bare(true)
        .env(SystemEnv::empty())
        .open()
        .unwrap();
    assert!(repo.is_bare());
    assert!(matches!(repo.work_tree(), Err(RepoError::NoWorkTree)));
}

#[test]
fn config_values_are_visible() {
    let dir = tempfile::tempdir().unwrap();
    let repo = Repository::init(dir.path()).unwrap();
    assert_eq!(repo.config().bool("core.bare").unwrap(), Some(false));
    assert_eq!(
        repo.config().int("core.repositoryformatversion").unwrap(),
        Some(0)
    );
}
