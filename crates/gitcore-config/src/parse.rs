//! Parser for git's INI-like config format.

use crate::{ConfigError, Entry};

/// Parse config bytes into entries.
///
/// Handles `[section]` and `[section "subsection"]` headers, `key = value`
/// lines, valueless boolean keys, `#`/`;` comments, double-quoted value
/// segments with `\\`, `\"`, `\n`, `\t` escapes, and backslash line
/// continuations.
pub fn parse(input: &[u8], filename: &str) -> Result<Vec<Entry>, ConfigError> {
    let text = String::from_utf8_lossy(input);
    let mut entries = Vec::new();

    let mut section: Option<String> = None;
    let mut subsection: Option<String> = None;

    let mut lines = text.lines().enumerate().peekable();
    while let Some((line_no, raw_line)) = lines.next() {
        let line_no = line_no + 1;
        let line = raw_line.trim();

        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }

        if let Some(rest) = line.strip_prefix('[') {
            let end = rest.find(']').ok_or_else(|| ConfigError::Parse {
                file: filename.to_string(),
                line: line_no,
                reason: "unterminated section header".into(),
            })?;
            let header = &rest[..end];

            if let Some(quote_start) = header.find('"') {
                let name = header[..quote_start].trim();
                let quoted = &header[quote_start + 1..];
                let quote_end = quoted.rfind('"').ok_or_else(|| ConfigError::Parse {
                    file: filename.to_string(),
                    line: line_no,
                    reason: "unterminated subsection quote".into(),
                })?;
                section = Some(name.to_ascii_lowercase());
                subsection = Some(unescape_subsection(&quoted[..quote_end]));
            } else {
                // Dotted shorthand: [branch.main] means [branch "main"].
                match header.split_once('.') {
                    Some((name, sub)) => {
                        section = Some(name.trim().to_ascii_lowercase());
                        subsection = Some(sub.trim().to_string());
                    }
                    None => {
                        section = Some(header.trim().to_ascii_lowercase());
                        subsection = None;
                    }
                }
            }
            continue;
        }

        let Some(ref current_section) = section else {
            return Err(ConfigError::Parse {
                file: filename.to_string(),
                line: line_no,
                reason: "variable outside of a section".into(),
            });
        };

        // Gather continuation lines.
        let mut logical = raw_line.to_string();
        while ends_with_continuation(&logical) {
            logical.pop();
            match lines.next() {
                Some((_, next)) => logical.push_str(next),
                None => break,
            }
        }

        let (key, value) = match logical.find('=') {
            Some(eq) => {
                let key = logical[..eq].trim();
                let value = parse_value(logical[eq + 1..].trim(), filename, line_no)?;
                (key.to_string(), Some(value))
            }
            None => (logical.trim().to_string(), None),
        };

        if key.is_empty() || !key.chars().next().is_some_and(|c| c.is_ascii_alphabetic()) {
            return Err(ConfigError::Parse {
                file: filename.to_string(),
                line: line_no,
                reason: format!("invalid variable name: '{key}'"),
            });
        }

        entries.push(Entry {
            section: current_section.clone(),
            subsection: subsection.clone(),
            name: key.to_ascii_lowercase(),
            value,
        });
    }

    Ok(entries)
}

/// A trailing backslash that is not itself escaped continues the line.
fn ends_with_continuation(line: &str) -> bool {
    let trailing = line.chars().rev().take_while(|&c| c == '\\').count();
    trailing % 2 == 1
}

/// Strip comments and process quotes/escapes in a value.
fn parse_value(raw: &str, filename: &str, line_no: usize) -> Result<String, ConfigError> {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    let mut in_quotes = false;

    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some('n') => out.push('\n'),
                Some('t') => out.push('\t'),
                Some('b') => out.push('\u{8}'),
                Some('\\') => out.push('\\'),
                Some('"') => out.push('"'),
                Some(other) => {
                    return Err(ConfigError::Parse {
                        file: filename.to_string(),
                        line: line_no,
                        reason: format!("invalid escape '\\{other}'"),
                    })
                }
                None => {}
            },
            '"' => in_quotes = !in_quotes,
            '#' | ';' if !in_quotes => break,
            other => out.push(other),
        }
    }

    if in_quotes {
        return Err(ConfigError::Parse {
            file: filename.to_string(),
            line: line_no,
            reason: "unterminated quote in value".into(),
        });
    }

    // Unquoted trailing whitespace is insignificant.
    Ok(out.trim_end().to_string())
}

fn unescape_subsection(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(next) = chars.next() {
                out.push(next);
            }
        } else {
            out.push(c);
        }
    }
    out
}
