//! The process environment as the repository sees it.
//!
//! All `GIT_*` variables are read once into a [`SystemEnv`] snapshot and
//! injected into repository construction. Tests substitute a synthetic
//! snapshot instead of mutating the process environment.

use std::collections::HashMap;
use std::path::PathBuf;

/// Snapshot of the git-relevant environment.
#[derive(Debug, Clone, Default)]
pub struct SystemEnv {
    vars: HashMap<String, String>,
}

const KNOWN_VARS: &[&str] = &[
    "GIT_DIR",
    "GIT_OBJECT_DIRECTORY",
    "GIT_ALTERNATE_OBJECT_DIRECTORIES",
    "GIT_INDEX_FILE",
    "GIT_WORK_TREE",
    "GIT_CEILING_DIRECTORIES",
    "GIT_CONFIG_NOSYSTEM",
    "HOME",
];

impl SystemEnv {
    /// Snapshot the live process environment.
    pub fn from_process() -> Self {
        let mut vars = HashMap::new();
        for &key in KNOWN_VARS {
            if let Ok(value) = std::env::var(key) {
                vars.insert(key.to_string(), value);
            }
        }
        Self { vars }
    }

    /// An empty environment (nothing overridden). The test hook: build one
    /// of these and [`set`](SystemEnv::set) what the test needs.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.vars.insert(key.into(), value.into());
        self
    }

    fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(|s| s.as_str())
    }

    pub fn git_dir(&self) -> Option<PathBuf> {
        self.get("GIT_DIR").map(PathBuf::from)
    }

    pub fn object_directory(&self) -> Option<PathBuf> {
        self.get("GIT_OBJECT_DIRECTORY").map(PathBuf::from)
    }

    /// `GIT_ALTERNATE_OBJECT_DIRECTORIES`, split on the platform path
    /// separator.
    pub fn alternate_object_directories(&self) -> Vec<PathBuf> {
        self.path_list("GIT_ALTERNATE_OBJECT_DIRECTORIES")
    }

    pub fn index_file(&self) -> Option<PathBuf> {
        self.get("GIT_INDEX_FILE").map(PathBuf::from)
    }

    pub fn work_tree(&self) -> Option<PathBuf> {
        self.get("GIT_WORK_TREE").map(PathBuf::from)
    }

    /// Directories discovery must not walk above.
    pub fn ceiling_directories(&self) -> Vec<PathBuf> {
        self.path_list("GIT_CEILING_DIRECTORIES")
    }

    /// Is the system-wide config file disabled?
    pub fn config_nosystem(&self) -> bool {
        self.get("GIT_CONFIG_NOSYSTEM")
            .is_some_and(|v| !v.is_empty() && v != "0")
    }

    pub fn home(&self) -> Option<PathBuf> {
        self.get("HOME").map(PathBuf::from)
    }

    fn path_list(&self, key: &str) -> Vec<PathBuf> {
        let sep = if cfg!(windows) { ';' } else { ':' };
        match self.get(key) {
            Some(value) => value
                .split(sep)
                .filter(|p| !p.is_empty())
                .map(PathBuf::from)
                .collect(),
            None => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_env_has_no_overrides() {
        let env = SystemEnv::empty();
        assert!(env.git_dir().is_none());
        assert!(env.alternate_object_directories().is_empty());
        assert!(!env.config_nosystem());
    }

    #[test]
    fn set_and_read_back() {
        let mut env = SystemEnv::empty();
        env.set("GIT_DIR", "/tmp/repo/.git");
        assert_eq!(env.git_dir(), Some(PathBuf::from("/tmp/repo/.git")));
    }

    #[test]
    fn path_lists_split_on_separator() {
        let mut env = SystemEnv::empty();
        let sep = if cfg!(windows) { ';' } else { ':' };
        env.set(
            "GIT_ALTERNATE_OBJECT_DIRECTORIES",
            format!("/a/objects{sep}/b/objects{sep}"),
        );
        assert_eq!(
            env.alternate_object_directories(),
            vec![PathBuf::from("/a/objects"), PathBuf::from("/b/objects")]
        );
    }

    #[test]
    fn nosystem_values() {
        let mut env = SystemEnv::empty();
        assert!(!env.config_nosystem());
        env.set("GIT_CONFIG_NOSYSTEM", "0");
        assert!(!env.config_nosystem());
        env.set("GIT_CONFIG_NOSYSTEM", "1");
        assert!(env.config_nosystem());
    }
}
