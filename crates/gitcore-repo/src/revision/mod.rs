//! The revision resolver: evaluates expressions like `HEAD~3^{tree}:src`
//! against the ref and object databases.
//!
//! Unresolved names evaluate to `None`; only malformed expressions,
//! type-assertion failures, and ambiguous abbreviations are errors.

pub mod lexer;

use bstr::ByteSlice;
use gitcore_hash::{AbbreviatedId, ObjectId};
use gitcore_object::{Object, ObjectType};
use gitcore_ref::is_valid_ref_name;

use crate::{shorten_ref_name, RepoError, Repository};

use self::lexer::Token;

/// Maximum tag-chain depth while peeling.
const MAX_PEEL_DEPTH: usize = 5;

/// What an expression evaluates to before the final forcing step: either
/// a concrete object id, or a ref name that the caller may want to keep
/// symbolic (`simplify`) or force to an id (`resolve`).
enum Value {
    Id(ObjectId),
    Name(String),
}

/// Resolve an expression to an object id.
pub fn resolve(repo: &Repository, revstr: &str) -> Result<Option<ObjectId>, RepoError> {
    match eval(repo, revstr)? {
        None => Ok(None),
        Some(Value::Id(id)) => Ok(Some(id)),
        Some(Value::Name(name)) => match repo.refs().find_ref(&name)? {
            Some(r) => Ok(repo.refs().resolve(&r)?),
            None => Ok(None),
        },
    }
}

/// Resolve an expression, but keep branch-name results as names.
pub fn simplify(repo: &Repository, revstr: &str) -> Result<Option<String>, RepoError> {
    match eval(repo, revstr)? {
        None => Ok(None),
        Some(Value::Id(id)) => Ok(Some(id.to_hex())),
        Some(Value::Name(name)) => Ok(Some(name)),
    }
}

fn eval(repo: &Repository, revstr: &str) -> Result<Option<Value>, RepoError> {
    let mut tokens = lexer::lex(revstr)?.into_iter();
    let base = match tokens.next() {
        Some(Token::Base(base)) => base,
        _ => return Err(RepoError::RevisionSyntax(revstr.to_string())),
    };
    let suffixes: Vec<Token> = tokens.collect();

    // A bare name: syntax-check it, prefer a ref, then literal forms.
    if suffixes.is_empty() {
        check_name_syntax(&base, revstr)?;
        if repo.refs().find_ref(&base)?.is_some() {
            return Ok(Some(Value::Name(base)));
        }
        return Ok(resolve_simple(repo, &base)?.map(Value::Id));
    }

    let mut name: Option<String> = Some(base);
    let mut rev: Option<ObjectId> = None;
    let mut navigated = false;

    for token in suffixes {
        match token {
            Token::Caret(n) => {
                let Some(id) = take_rev(repo, &mut rev, &mut name, &mut navigated, false)? else {
                    return Ok(None);
                };
                let (commit_id, commit) = parse_commit(repo, id)?;
                if n == 0 {
                    rev = Some(commit_id);
                } else if n > commit.parents.len() {
                    return Ok(None);
                } else {
                    rev = Some(commit.parents[n - 1]);
                }
            }
            Token::Tilde(n) => {
                let Some(id) = take_rev(repo, &mut rev, &mut name, &mut navigated, false)? else {
                    return Ok(None);
                };
                let (mut current_id, mut commit) = parse_commit(repo, id)?;
                for _ in 0..n {
                    let Some(parent) = commit.first_parent() else {
                        return Ok(None);
                    };
                    match repo.odb().read_cached(&parent) {
                        Ok(Object::Commit(c)) => {
                            current_id = parent;
                            commit = c;
                        }
                        Err(gitcore_odb::OdbError::Missing(_)) => return Ok(None),
                        Ok(obj) => {
                            return Err(RepoError::IncorrectType {
                                oid: parent,
                                expected: ObjectType::Commit,
                                actual: obj.object_type(),
                            })
                        }
                        Err(e) => return Err(e.into()),
                    }
                }
                rev = Some(current_id);
            }
            Token::CaretType(kind) => {
                let Some(id) = take_rev(repo, &mut rev, &mut name, &mut navigated, false)? else {
                    return Ok(None);
                };
                rev = Some(apply_type_assertion(repo, id, &kind, revstr)?);
            }
            Token::AtReflog(n) => {
                if navigated || rev.is_some() {
                    return Err(RepoError::RevisionSyntax(revstr.to_string()));
                }
                let target = name_or_head(&mut name);
                check_name_syntax(&target, revstr)?;
                let Some(r) = repo.refs().find_ref(&target)? else {
                    return Ok(None);
                };
                let leaf = match r.symbolic_target() {
                    // @{n} on a symbolic ref means the branch's own log.
                    Some(leaf) => leaf.as_str().to_string(),
                    None => r.name.as_str().to_string(),
                };
                let Some(entry) = repo.refs().reflog_entry(&leaf, n)? else {
                    return Err(RepoError::RevisionSyntax(format!(
                        "reflog for {leaf} has no entry {n}"
                    )));
                };
                rev = Some(parse_commit(repo, entry.new_oid)?.0);
                navigated = true;
            }
            Token::AtUpstream => {
                if navigated || rev.is_some() {
                    return Err(RepoError::RevisionSyntax(revstr.to_string()));
                }
                let target = name_or_head(&mut name);
                check_name_syntax(&target, revstr)?;
                let Some(r) = repo.refs().find_ref(&target)? else {
                    return Ok(None);
                };
                let leaf = match r.symbolic_target() {
                    Some(leaf) => leaf.as_str().to_string(),
                    None => r.name.as_str().to_string(),
                };
                name = Some(upstream_of(repo, &leaf, revstr)?);
                navigated = true;
            }
            Token::AtPrevCheckout(n) => {
                if navigated
                    || rev.is_some()
                    || name.as_deref().is_some_and(|n| !n.is_empty())
                {
                    return Err(RepoError::RevisionSyntax(revstr.to_string()));
                }
                name = None;
                let Some(from) = previous_checkout(repo, n)? else {
                    return Ok(None);
                };
                if from.len() == 40 && ObjectId::from_hex(&from).is_ok() {
                    rev = ObjectId::from_hex(&from).ok();
                } else {
                    name = Some(from);
                }
                navigated = true;
            }
            Token::Path(path) => {
                let Some(id) = take_rev(repo, &mut rev, &mut name, &mut navigated, true)? else {
                    return Ok(None);
                };
                let tree_id = peel_to_tree(repo, id)?;
                if path.is_empty() {
                    return Ok(Some(Value::Id(tree_id)));
                }
                return Ok(lookup_path(repo, tree_id, &path)?.map(Value::Id));
            }
            Token::Base(_) => {
                return Err(RepoError::RevisionSyntax(revstr.to_string()));
            }
        }
    }

    if let Some(id) = rev {
        return Ok(Some(Value::Id(id)));
    }
    Ok(name.map(Value::Name))
}

/// Force the pending name (if any) into an object id for navigation.
/// An empty name means HEAD only where the grammar says so (`:path`,
/// `@{...}`); a bare `^` or `~` resolves nothing.
fn take_rev(
    repo: &Repository,
    rev: &mut Option<ObjectId>,
    name: &mut Option<String>,
    navigated: &mut bool,
    empty_means_head: bool,
) -> Result<Option<ObjectId>, RepoError> {
    *navigated = true;
    if rev.is_some() {
        return Ok(*rev);
    }
    let Some(pending) = name.take() else {
        return Ok(None);
    };
    let pending = if pending.is_empty() {
        if !empty_means_head {
            return Ok(None);
        }
        "HEAD".to_string()
    } else {
        pending
    };
    let resolved = resolve_with_refs(repo, &pending)?;
    *rev = resolved;
    Ok(resolved)
}

/// Base-name resolution for navigation: ref expansion first, then the
/// literal forms. Unknown names are `None`, never errors.
fn resolve_with_refs(repo: &Repository, name: &str) -> Result<Option<ObjectId>, RepoError> {
    if is_valid_ref_name(&format!("x/{name}")) {
        if let Some(r) = repo.refs().find_ref(name)? {
            return Ok(repo.refs().resolve(&r)?);
        }
    }
    resolve_simple(repo, name)
}

/// The literal base forms: full hex, abbreviated hex, and the
/// `-g<abbrev>` describe suffix. Ref lookup is the caller's business.
fn resolve_simple(repo: &Repository, name: &str) -> Result<Option<ObjectId>, RepoError> {
    if name.len() == 40 {
        if let Ok(oid) = ObjectId::from_hex(name) {
            return Ok(Some(oid));
        }
    }

    if name.len() >= 2 && name.len() < 40 && name.bytes().all(|b| b.is_ascii_hexdigit()) {
        return expand_abbreviation(repo, name);
    }

    // Possibly `git describe` output: `tag-12-gdeadbeef`.
    if let Some(dashg) = name.find("-g") {
        let candidate = &name[dashg + 2..];
        if candidate.len() >= 2
            && candidate.len() < 40
            && candidate.bytes().all(|b| b.is_ascii_hexdigit())
        {
            return expand_abbreviation(repo, candidate);
        }
    }

    Ok(None)
}

fn expand_abbreviation(repo: &Repository, prefix: &str) -> Result<Option<ObjectId>, RepoError> {
    let abbrev = AbbreviatedId::from_hex_prefix(prefix)
        .map_err(|_| RepoError::RevisionSyntax(prefix.to_string()))?;
    Ok(repo.odb().expand_abbrev(&abbrev)?)
}

/// Peel tags until a commit; anything else violates the type expectation.
fn parse_commit(
    repo: &Repository,
    id: ObjectId,
) -> Result<(ObjectId, gitcore_object::Commit), RepoError> {
    let mut current = id;
    for _ in 0..=MAX_PEEL_DEPTH {
        match repo.odb().read_cached(&current)? {
            Object::Commit(commit) => return Ok((current, commit)),
            Object::Tag(tag) => current = tag.target,
            other => {
                return Err(RepoError::IncorrectType {
                    oid: current,
                    expected: ObjectType::Commit,
                    actual: other.object_type(),
                })
            }
        }
    }
    Err(RepoError::RevisionSyntax(format!(
        "tag chain deeper than {MAX_PEEL_DEPTH} at {id}"
    )))
}

fn peel_to_nontag(repo: &Repository, id: ObjectId) -> Result<ObjectId, RepoError> {
    let mut current = id;
    for _ in 0..=MAX_PEEL_DEPTH {
        match repo.odb().read_cached(&current)? {
            Object::Tag(tag) => current = tag.target,
            _ => return Ok(current),
        }
    }
    Err(RepoError::RevisionSyntax(format!(
        "tag chain deeper than {MAX_PEEL_DEPTH} at {id}"
    )))
}

fn peel_to_tree(repo: &Repository, id: ObjectId) -> Result<ObjectId, RepoError> {
    let peeled = peel_to_nontag(repo, id)?;
    match repo.odb().read_cached(&peeled)? {
        Object::Tree(_) => Ok(peeled),
        Object::Commit(commit) => Ok(commit.tree),
        other => Err(RepoError::IncorrectType {
            oid: peeled,
            expected: ObjectType::Tree,
            actual: other.object_type(),
        }),
    }
}

fn apply_type_assertion(
    repo: &Repository,
    id: ObjectId,
    kind: &str,
    revstr: &str,
) -> Result<ObjectId, RepoError> {
    match kind {
        "commit" => Ok(parse_commit(repo, id)?.0),
        "tree" => peel_to_tree(repo, id),
        "blob" => {
            let peeled = peel_to_nontag(repo, id)?;
            match repo.odb().read_cached(&peeled)? {
                Object::Blob(_) => Ok(peeled),
                other => Err(RepoError::IncorrectType {
                    oid: peeled,
                    expected: ObjectType::Blob,
                    actual: other.object_type(),
                }),
            }
        }
        "tag" => match repo.odb().read_cached(&id)? {
            Object::Tag(_) => Ok(id),
            other => Err(RepoError::IncorrectType {
                oid: id,
                expected: ObjectType::Tag,
                actual: other.object_type(),
            }),
        },
        "" => peel_to_nontag(repo, id),
        _ => Err(RepoError::RevisionSyntax(revstr.to_string())),
    }
}

/// Walk a slash-separated path down from a tree. Missing components
/// resolve to `None`.
fn lookup_path(
    repo: &Repository,
    tree_id: ObjectId,
    path: &str,
) -> Result<Option<ObjectId>, RepoError> {
    let mut current = tree_id;
    let mut components = path.split('/').filter(|c| !c.is_empty()).peekable();

    while let Some(component) = components.next() {
        let tree = match repo.odb().read_cached(&current)? {
            Object::Tree(tree) => tree,
            _ => return Ok(None),
        };
        let Some(entry) = tree.entry(component.as_bytes().as_bstr()) else {
            return Ok(None);
        };
        if components.peek().is_none() {
            return Ok(Some(entry.oid));
        }
        current = entry.oid;
    }

    // The path was only slashes; treat as the tree itself.
    Ok(Some(current))
}

fn name_or_head(name: &mut Option<String>) -> String {
    match name.take() {
        Some(n) if !n.is_empty() => n,
        _ => "HEAD".to_string(),
    }
}

/// Syntax-check a name the way the resolver's grammar demands: it must be
/// valid as the final component of a ref path.
fn check_name_syntax(name: &str, revstr: &str) -> Result<(), RepoError> {
    if !is_valid_ref_name(&format!("x/{name}")) {
        return Err(RepoError::RevisionSyntax(revstr.to_string()));
    }
    Ok(())
}

/// Map a branch to its upstream via `branch.<name>.merge` and the
/// remote's fetch refspecs.
fn upstream_of(repo: &Repository, leaf: &str, revstr: &str) -> Result<String, RepoError> {
    let short = shorten_ref_name(leaf);
    let Some(merge) = repo.config().string(&format!("branch.{short}.merge")) else {
        return Err(RepoError::RevisionSyntax(revstr.to_string()));
    };
    let remote = repo
        .config()
        .string(&format!("branch.{short}.remote"))
        .unwrap_or_else(|| "origin".to_string());

    // A local upstream ("." remote) is the merge ref itself.
    if remote == "." {
        return Ok(merge);
    }

    for spec in repo.config().multi(&format!("remote.{remote}.fetch")) {
        if let Some(dest) = map_through_refspec(&spec, &merge) {
            return Ok(dest);
        }
    }
    Err(RepoError::RevisionSyntax(revstr.to_string()))
}

/// Expand `source` through a fetch refspec like
/// `+refs/heads/*:refs/remotes/origin/*`.
fn map_through_refspec(spec: &str, source: &str) -> Option<String> {
    let spec = spec.strip_prefix('+').unwrap_or(spec);
    let (src, dst) = spec.split_once(':')?;

    match src.find('*') {
        Some(star) => {
            let (prefix, suffix) = (&src[..star], &src[star + 1..]);
            if source.len() < prefix.len() + suffix.len()
                || !source.starts_with(prefix)
                || !source.ends_with(suffix)
            {
                return None;
            }
            let middle = &source[prefix.len()..source.len() - suffix.len()];
            let dst_star = dst.find('*')?;
            Some(format!(
                "{}{}{}",
                &dst[..dst_star],
                middle,
                &dst[dst_star + 1..]
            ))
        }
        None => (src == source).then(|| dst.to_string()),
    }
}

/// The branch left behind by the N-th most recent checkout, from the
/// HEAD reflog.
fn previous_checkout(repo: &Repository, n: usize) -> Result<Option<String>, RepoError> {
    if n == 0 {
        return Ok(None);
    }
    let mut remaining = n;
    for entry in repo.refs().reflog_reverse("HEAD")? {
        if let Some(checkout) = entry.parse_checkout() {
            remaining -= 1;
            if remaining == 0 {
                return Ok(Some(checkout.from_branch));
            }
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refspec_wildcard_expansion() {
        assert_eq!(
            map_through_refspec(
                "+refs/heads/*:refs/remotes/origin/*",
                "refs/heads/main"
            ),
            Some("refs/remotes/origin/main".to_string())
        );
        assert_eq!(
            map_through_refspec("+refs/heads/*:refs/remotes/origin/*", "refs/tags/v1"),
            None
        );
    }

    #[test]
    fn refspec_exact_match() {
        assert_eq!(
            map_through_refspec("refs/heads/main:refs/remotes/up/main", "refs/heads/main"),
            Some("refs/remotes/up/main".to_string())
        );
        assert_eq!(
            map_through_refspec("refs/heads/main:refs/remotes/up/main", "refs/heads/dev"),
            None
        );
    }
}
