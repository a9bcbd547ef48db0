//! Git working-tree operations for the PR remediator.
//!
//! The ingested working tree is a scoped resource owned by one invocation.
//! The original HEAD is captured before any branch creation and restored on
//! every exit path, so the tree is clean for the next rule that shares the
//! ingest cache.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use git2::build::CheckoutBuilder;
use git2::{Cred, Oid, PushOptions, RemoteCallbacks, Repository, Signature};
use tracing::{debug, warn};

use provider::GitCredentials;

/// Identity used for remediation commits.
#[derive(Debug, Clone)]
pub struct CommitAuthor {
    pub name: String,
    pub email: String,
}

/// Restores the original HEAD when dropped.
struct HeadGuard<'repo> {
    repo: &'repo Repository,
    /// Full refname, or a commit id when HEAD was detached.
    original: String,
}

impl Drop for HeadGuard<'_> {
    fn drop(&mut self) {
        if let Err(err) = restore_head(self.repo, &self.original) {
            warn!(%err, original = %self.original, "failed to restore original HEAD");
        }
    }
}

fn restore_head(repo: &Repository, original: &str) -> Result<(), git2::Error> {
    if original.starts_with("refs/") {
        repo.set_head(original)?;
    } else {
        repo.set_head_detached(Oid::from_str(original)?)?;
    }
    let mut checkout = CheckoutBuilder::new();
    checkout.force();
    repo.checkout_head(Some(&mut checkout))
}

fn head_name(repo: &Repository) -> Result<String> {
    let head = repo.head().context("resolving HEAD")?;
    match head.name() {
        Some(name) if name != "HEAD" => Ok(name.to_string()),
        _ => Ok(head.peel_to_commit().context("peeling detached HEAD")?.id().to_string()),
    }
}

/// `origin` if configured, otherwise the first remote.
fn preferred_remote(repo: &Repository) -> Result<String> {
    let remotes = repo.remotes().context("listing remotes")?;
    if remotes.iter().flatten().any(|name| name == "origin") {
        return Ok("origin".to_string());
    }
    remotes
        .get(0)
        .map(ToString::to_string)
        .context("repository has no remotes")
}

fn push_branch(repo: &Repository, branch: &str, credentials: &GitCredentials) -> Result<()> {
    let remote_name = preferred_remote(repo)?;
    let mut remote = repo
        .find_remote(&remote_name)
        .with_context(|| format!("finding remote {remote_name}"))?;

    let credentials = credentials.clone();
    let mut callbacks = RemoteCallbacks::new();
    callbacks.credentials(move |_url, _username, _allowed| {
        Cred::userpass_plaintext(&credentials.username, &credentials.password)
    });
    let mut options = PushOptions::new();
    options.remote_callbacks(callbacks);

    let refspec = format!("+refs/heads/{branch}:refs/heads/{branch}");
    debug!(remote = %remote_name, refspec = %refspec, "force-pushing remediation branch");
    remote
        .push(&[&refspec], Some(&mut options))
        .with_context(|| format!("pushing {refspec} to {remote_name}"))
}

/// Check out `branch` (created or reset at the current HEAD), apply
/// `modify`, stage the paths it returns, commit as `author`, and force-push.
///
/// The original HEAD is restored before returning, on success and on every
/// error path.
pub fn commit_and_push(
    root: &Path,
    branch: &str,
    author: &CommitAuthor,
    message: &str,
    credentials: &GitCredentials,
    modify: impl FnOnce(&Path) -> Result<Vec<PathBuf>>,
) -> Result<()> {
    let repo = Repository::open(root)
        .with_context(|| format!("opening working tree {}", root.display()))?;

    // Capture before any branch creation; the guard restores it on every
    // exit path from here on.
    let original = head_name(&repo)?;
    let _guard = HeadGuard {
        repo: &repo,
        original,
    };

    let head_commit = repo
        .head()
        .and_then(|head| head.peel_to_commit())
        .context("resolving HEAD commit")?;

    // The branch may exist from an earlier run with different contents.
    repo.branch(branch, &head_commit, true)
        .with_context(|| format!("creating branch {branch}"))?;
    repo.set_head(&format!("refs/heads/{branch}"))
        .with_context(|| format!("switching to {branch}"))?;
    let mut checkout = CheckoutBuilder::new();
    checkout.force();
    repo.checkout_head(Some(&mut checkout))
        .context("checking out remediation branch")?;

    let staged = modify(root)?;
    if staged.is_empty() {
        bail!("modification produced no paths to stage");
    }

    let mut index = repo.index().context("opening index")?;
    for path in &staged {
        index
            .add_path(path)
            .with_context(|| format!("staging {}", path.display()))?;
    }
    index.write().context("writing index")?;
    let tree_id = index.write_tree().context("writing tree")?;
    let tree = repo.find_tree(tree_id).context("finding tree")?;

    let signature =
        Signature::now(&author.name, &author.email).context("building commit signature")?;
    let parent = repo
        .head()
        .and_then(|head| head.peel_to_commit())
        .context("resolving branch head")?;
    repo.commit(Some("HEAD"), &signature, &signature, message, &tree, &[&parent])
        .context("committing remediation")?;

    push_branch(&repo, branch, credentials)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn credentials() -> GitCredentials {
        GitCredentials {
            username: "x-access-token".to_string(),
            password: "unused-for-local-remotes".to_string(),
        }
    }

    fn author() -> CommitAuthor {
        CommitAuthor {
            name: "warden[bot]".to_string(),
            email: "warden@users.noreply.github.com".to_string(),
        }
    }

    /// Working tree with one commit on `main` and a local bare `origin`.
    fn init_repos() -> (tempfile::TempDir, tempfile::TempDir) {
        let work = tempfile::tempdir().unwrap();
        let bare = tempfile::tempdir().unwrap();
        Repository::init_bare(bare.path()).unwrap();

        let repo = Repository::init(work.path()).unwrap();
        repo.set_head("refs/heads/main").unwrap();
        fs::write(work.path().join("README.md"), "# fixture\n").unwrap();
        let mut index = repo.index().unwrap();
        index.add_path(Path::new("README.md")).unwrap();
        index.write().unwrap();
        let tree = repo.find_tree(index.write_tree().unwrap()).unwrap();
        let sig = Signature::now("fixture", "fixture@example.com").unwrap();
        repo.commit(Some("HEAD"), &sig, &sig, "initial", &tree, &[]).unwrap();
        repo.remote("origin", bare.path().to_str().unwrap()).unwrap();

        (work, bare)
    }

    #[test]
    fn commits_pushes_and_restores_head() {
        let (work, bare) = init_repos();

        commit_and_push(
            work.path(),
            "minder_add_dependabot_configuration_for_gomod",
            &author(),
            "Add Dependabot configuration for gomod",
            &credentials(),
            |root| {
                fs::write(root.join("dependabot.yml"), "version: 2\n").unwrap();
                Ok(vec![PathBuf::from("dependabot.yml")])
            },
        )
        .unwrap();

        // Branch arrived on the remote.
        let remote = Repository::open_bare(bare.path()).unwrap();
        let pushed = remote
            .find_reference("refs/heads/minder_add_dependabot_configuration_for_gomod")
            .unwrap();
        let commit = pushed.peel_to_commit().unwrap();
        assert_eq!(commit.message(), Some("Add Dependabot configuration for gomod"));
        assert_eq!(commit.author().name(), Some("warden[bot]"));

        // HEAD is back on main and the tree matches it.
        let repo = Repository::open(work.path()).unwrap();
        assert_eq!(repo.head().unwrap().shorthand(), Some("main"));
        assert!(!work.path().join("dependabot.yml").exists());
    }

    #[test]
    fn force_push_replaces_existing_remote_branch() {
        let (work, bare) = init_repos();
        let branch = "minder_add_dependabot_configuration_for_gomod";

        for content in ["version: 2\n", "version: 2\nupdates: []\n"] {
            commit_and_push(work.path(), branch, &author(), "retry", &credentials(), |root| {
                fs::write(root.join("dependabot.yml"), content).unwrap();
                Ok(vec![PathBuf::from("dependabot.yml")])
            })
            .unwrap();
        }

        let remote = Repository::open_bare(bare.path()).unwrap();
        let commit = remote
            .find_reference(&format!("refs/heads/{branch}"))
            .unwrap()
            .peel_to_commit()
            .unwrap();
        let tree = commit.tree().unwrap();
        let entry = tree.get_name("dependabot.yml").unwrap();
        let blob = remote.find_blob(entry.id()).unwrap();
        assert_eq!(blob.content(), b"version: 2\nupdates: []\n");
    }

    #[test]
    fn head_is_restored_when_modification_fails() {
        let (work, _bare) = init_repos();

        let err = commit_and_push(
            work.path(),
            "minder_broken",
            &author(),
            "broken",
            &credentials(),
            |_| bail!("modifier exploded"),
        )
        .unwrap_err();
        assert!(err.to_string().contains("modifier exploded"));

        let repo = Repository::open(work.path()).unwrap();
        assert_eq!(repo.head().unwrap().shorthand(), Some("main"));
    }
}
