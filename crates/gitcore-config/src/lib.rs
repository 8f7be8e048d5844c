//! git-config reading for gitcore.
//!
//! Parses git's INI-like format and exposes a merged view across scopes
//! (system, global, repository), later scopes overriding earlier ones.
//! The core only needs to read configuration (plus write the handful of
//! lines repository init produces), so entries are stored directly rather
//! than as a formatting-preserving event stream.

pub mod parse;

use std::path::{Path, PathBuf};

/// Errors from config operations.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config parse error in {file} line {line}: {reason}")]
    Parse {
        file: String,
        line: usize,
        reason: String,
    },

    #[error("invalid config key: {0}")]
    InvalidKey(String),

    #[error("invalid {kind} value for {key}: '{value}'")]
    InvalidValue {
        key: String,
        kind: &'static str,
        value: String,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// One configuration variable occurrence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    /// Lowercased section name.
    pub section: String,
    /// Case-preserved subsection, if any.
    pub subsection: Option<String>,
    /// Lowercased variable name.
    pub name: String,
    /// `None` for valueless boolean shorthand (`[core]\nbare`).
    pub value: Option<String>,
}

/// A merged configuration: entries from all loaded files in scope order.
///
/// Lookups take keys in the `section.name` or `section.subsection.name`
/// form. For single-value getters the last occurrence wins, matching
/// git's scope precedence.
#[derive(Debug, Default, Clone)]
pub struct Config {
    entries: Vec<Entry>,
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a config file and append its entries (later files override).
    pub fn load_file(&mut self, path: &Path) -> Result<(), ConfigError> {
        let content = match std::fs::read(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(ConfigError::Io(e)),
        };
        let mut entries = parse::parse(&content, &path.display().to_string())?;
        self.entries.append(&mut entries);
        Ok(())
    }

    /// Parse config text and append its entries.
    pub fn load_str(&mut self, content: &str) -> Result<(), ConfigError> {
        let mut entries = parse::parse(content.as_bytes(), "<memory>")?;
        self.entries.append(&mut entries);
        Ok(())
    }

    /// The last value for a key, or `None` if unset.
    pub fn string(&self, key: &str) -> Option<String> {
        let (section, subsection, name) = split_key(key)?;
        self.entries
            .iter()
            .rev()
            .find(|e| matches(e, &section, subsection.as_deref(), &name))
            .map(|e| e.value.clone().unwrap_or_default())
    }

    /// Every value for a multi-valued key, in file order.
    pub fn multi(&self, key: &str) -> Vec<String> {
        let Some((section, subsection, name)) = split_key(key) else {
            return Vec::new();
        };
        self.entries
            .iter()
            .filter(|e| matches(e, &section, subsection.as_deref(), &name))
            .map(|e| e.value.clone().unwrap_or_default())
            .collect()
    }

    /// A boolean value with git semantics: missing value means true;
    /// `yes`/`on`/`true`/`1` are true, `no`/`off`/`false`/`0`/empty false.
    pub fn bool(&self, key: &str) -> Result<Option<bool>, ConfigError> {
        let (section, subsection, name) = match split_key(key) {
            Some(parts) => parts,
            None => return Ok(None),
        };
        let Some(entry) = self
            .entries
            .iter()
            .rev()
            .find(|e| matches(e, &section, subsection.as_deref(), &name))
        else {
            return Ok(None);
        };

        match &entry.value {
            None => Ok(Some(true)),
            Some(v) => match v.to_ascii_lowercase().as_str() {
                "yes" | "on" | "true" | "1" => Ok(Some(true)),
                "no" | "off" | "false" | "0" | "" => Ok(Some(false)),
                other => Err(ConfigError::InvalidValue {
                    key: key.to_string(),
                    kind: "boolean",
                    value: other.to_string(),
                }),
            },
        }
    }

    /// An integer value, honouring the `k`/`m`/`g` suffixes.
    pub fn int(&self, key: &str) -> Result<Option<i64>, ConfigError> {
        let Some(raw) = self.string(key) else {
            return Ok(None);
        };
        let raw = raw.trim();
        let (digits, multiplier) = match raw.to_ascii_lowercase().chars().last() {
            Some('k') => (&raw[..raw.len() - 1], 1024i64),
            Some('m') => (&raw[..raw.len() - 1], 1024 * 1024),
            Some('g') => (&raw[..raw.len() - 1], 1024 * 1024 * 1024),
            _ => (raw, 1),
        };
        let value: i64 = digits.trim().parse().map_err(|_| ConfigError::InvalidValue {
            key: key.to_string(),
            kind: "integer",
            value: raw.to_string(),
        })?;
        Ok(Some(value * multiplier))
    }

    /// Set a value in memory (appended, so it overrides earlier entries).
    pub fn set(&mut self, key: &str, value: impl Into<String>) -> Result<(), ConfigError> {
        let (section, subsection, name) =
            split_key(key).ok_or_else(|| ConfigError::InvalidKey(key.to_string()))?;
        self.entries.push(Entry {
            section,
            subsection,
            name,
            value: Some(value.into()),
        });
        Ok(())
    }

    /// All subsection names of a section (e.g. every `[remote "..."]`).
    pub fn subsections(&self, section: &str) -> Vec<String> {
        let section = section.to_ascii_lowercase();
        let mut names: Vec<String> = self
            .entries
            .iter()
            .filter(|e| e.section == section)
            .filter_map(|e| e.subsection.clone())
            .collect();
        names.sort();
        names.dedup();
        names
    }

    /// All entries, in load order.
    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }
}

/// Split `section.name` / `section.subsection.name` (subsection may itself
/// contain dots: first segment is the section, last is the name).
fn split_key(key: &str) -> Option<(String, Option<String>, String)> {
    let first_dot = key.find('.')?;
    let section = key[..first_dot].to_ascii_lowercase();
    let rest = &key[first_dot + 1..];
    if rest.is_empty() {
        return None;
    }
    match rest.rfind('.') {
        Some(last_dot) => {
            let subsection = rest[..last_dot].to_string();
            let name = rest[last_dot + 1..].to_ascii_lowercase();
            if name.is_empty() {
                return None;
            }
            Some((section, Some(subsection), name))
        }
        None => Some((section, None, rest.to_ascii_lowercase())),
    }
}

fn matches(entry: &Entry, section: &str, subsection: Option<&str>, name: &str) -> bool {
    entry.section == section
        && entry.subsection.as_deref() == subsection
        && entry.name == name
}

/// Serialize key/value pairs into config-file text (used by init).
pub fn render(entries: &[(&str, &str)]) -> String {
    let mut out = String::new();
    let mut current_section: Option<String> = None;
    for (key, value) in entries {
        if let Some((section, subsection, name)) = split_key(key) {
            let header = match &subsection {
                Some(sub) => format!("[{} \"{}\"]", section, sub),
                None => format!("[{}]", section),
            };
            if current_section.as_deref() != Some(header.as_str()) {
                out.push_str(&header);
                out.push('\n');
                current_section = Some(header);
            }
            out.push_str(&format!("\t{} = {}\n", name, value));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_from(text: &str) -> Config {
        let mut config = Config::new();
        config.load_str(text).unwrap();
        config
    }

    #[test]
    fn string_lookup() {
        let config = config_from("[core]\nbare = false\n");
        assert_eq!(config.string("core.bare").as_deref(), Some("false"));
        assert_eq!(config.string("core.missing"), None);
    }

    #[test]
    fn subsection_lookup() {
        let config = config_from("[branch \"main\"]\nremote = origin\nmerge = refs/heads/main\n");
        assert_eq!(config.string("branch.main.remote").as_deref(), Some("origin"));
        assert_eq!(
            config.string("branch.main.merge").as_deref(),
            Some("refs/heads/main")
        );
    }

    #[test]
    fn later_entries_override() {
        let mut config = config_from("[core]\nbare = false\n");
        config.load_str("[core]\nbare = true\n").unwrap();
        assert_eq!(config.bool("core.bare").unwrap(), Some(true));
    }

    #[test]
    fn multi_values_preserved() {
        let config = config_from(
            "[remote \"origin\"]\nfetch = +refs/heads/*:refs/remotes/origin/*\nfetch = +refs/tags/*:refs/tags/*\n",
        );
        assert_eq!(config.multi("remote.origin.fetch").len(), 2);
    }

    #[test]
    fn bool_semantics() {
        let config = config_from("[a]\nx = yes\ny = off\nz\n");
        assert_eq!(config.bool("a.x").unwrap(), Some(true));
        assert_eq!(config.bool("a.y").unwrap(), Some(false));
        assert_eq!(config.bool("a.z").unwrap(), Some(true));
        assert_eq!(config.bool("a.missing").unwrap(), None);
        assert!(config_from("[a]\nx = maybe\n").bool("a.x").is_err());
    }

    #[test]
    fn int_with_suffix() {
        let config = config_from("[pack]\nwindow = 10\nlimit = 2k\n");
        assert_eq!(config.int("pack.window").unwrap(), Some(10));
        assert_eq!(config.int("pack.limit").unwrap(), Some(2048));
        assert!(config_from("[a]\nx = ten\n").int("a.x").is_err());
    }

    #[test]
    fn set_overrides() {
        let mut config = config_from("[core]\nbare = false\n");
        config.set("core.bare", "true").unwrap();
        assert_eq!(config.bool("core.bare").unwrap(), Some(true));
    }

    #[test]
    fn subsections_enumerated() {
        let config =
            config_from("[remote \"origin\"]\nurl = a\n[remote \"backup\"]\nurl = b\n");
        assert_eq!(config.subsections("remote"), vec!["backup", "origin"]);
    }

    #[test]
    fn render_round_trips() {
        let text = render(&[
            ("core.repositoryformatversion", "0"),
            ("core.bare", "false"),
            ("branch.main.remote", "origin"),
        ]);
        let config = config_from(&text);
        assert_eq!(config.string("core.bare").as_deref(), Some("false"));
        assert_eq!(config.string("branch.main.remote").as_deref(), Some("origin"));
    }

    #[test]
    fn load_missing_file_is_ok() {
        let mut config = Config::new();
        config
            .load_file(Path::new("/nonexistent/config"))
            .unwrap();
        assert!(config.entries().is_empty());
    }
}
