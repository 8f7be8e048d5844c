//! Repository state, derived from marker files in the git dir.

use std::path::Path;

/// What operation the repository is currently in the middle of.
///
/// The `_RESOLVED` refinements depend on the working-tree index, which is
/// outside this core; the probe reports the unresolved state and leaves
/// the refinement to index-aware callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepositoryState {
    /// Bare repository: most working-tree operations are impossible.
    Bare,
    /// No operation in progress.
    Safe,
    /// `git am` in progress.
    Apply,
    Rebasing,
    RebasingRebasing,
    RebasingInteractive,
    RebasingMerge,
    Merging,
    MergingResolved,
    Bisecting,
    CherryPicking,
    CherryPickingResolved,
    Reverting,
    RevertingResolved,
}

impl RepositoryState {
    /// Can a new commit be created in this state?
    pub fn can_commit(&self) -> bool {
        matches!(
            self,
            Self::Safe
                | Self::MergingResolved
                | Self::CherryPickingResolved
                | Self::RevertingResolved
                | Self::Bisecting
        )
    }
}

/// Derive the state from the marker files the various porcelain
/// operations leave behind.
pub(crate) fn probe(git_dir: &Path, bare: bool) -> RepositoryState {
    if bare {
        return RepositoryState::Bare;
    }

    if git_dir.join("rebase-apply/rebasing").exists() {
        return RepositoryState::RebasingRebasing;
    }
    if git_dir.join("rebase-apply/applying").exists() {
        return RepositoryState::Apply;
    }
    if git_dir.join("rebase-apply").exists() {
        return RepositoryState::Rebasing;
    }

    if git_dir.join("rebase-merge/interactive").exists() {
        return RepositoryState::RebasingInteractive;
    }
    if git_dir.join("rebase-merge").exists() {
        return RepositoryState::RebasingMerge;
    }

    if git_dir.join("MERGE_HEAD").exists() {
        return RepositoryState::Merging;
    }
    if git_dir.join("BISECT_LOG").exists() {
        return RepositoryState::Bisecting;
    }
    if git_dir.join("CHERRY_PICK_HEAD").exists() {
        return RepositoryState::CherryPicking;
    }
    if git_dir.join("REVERT_HEAD").exists() {
        return RepositoryState::Reverting;
    }

    RepositoryState::Safe
}
