//! Shared fixtures: a recording GitHub fake and local git repositories with
//! an observable bare `origin`.

// Each integration binary uses a different slice of these fixtures.
#![allow(dead_code)]

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use git2::{Repository, Signature};
use provider::github::GitRef;
use provider::{
    BranchProtection, BranchProtectionUpdate, GitCredentials, GitHub, Provider, ProviderError,
    PullRequest, User,
};

/// Arguments of one recorded `create_pull_request` call.
#[derive(Debug, Clone)]
pub struct CreatedPr {
    pub title: String,
    pub body: String,
    pub head: String,
    pub base: String,
}

/// GitHub fake that records every mutating call.
#[derive(Default)]
pub struct RecordingGitHub {
    pub open_prs: Mutex<Vec<PullRequest>>,
    pub created: Mutex<Vec<CreatedPr>>,
    pub closed: Mutex<Vec<u64>>,
    pub protection: Mutex<Option<BranchProtection>>,
    pub protection_updates: Mutex<Vec<(String, BranchProtectionUpdate)>>,
    next_number: AtomicU64,
}

impl RecordingGitHub {
    pub fn new() -> Self {
        Self {
            next_number: AtomicU64::new(1),
            ..Default::default()
        }
    }

    pub fn seed_open_pr(&self, number: u64, head: &str, body: &str) {
        self.open_prs.lock().unwrap().push(PullRequest {
            number,
            title: format!("seeded #{number}"),
            body: Some(body.to_string()),
            state: "open".to_string(),
            head: GitRef {
                ref_name: head.to_string(),
                sha: None,
            },
            base: GitRef {
                ref_name: "main".to_string(),
                sha: None,
            },
            html_url: None,
        });
    }
}

impl Provider for RecordingGitHub {
    fn name(&self) -> &str {
        "github"
    }

    fn as_github(&self) -> Option<&dyn GitHub> {
        Some(self)
    }
}

#[async_trait]
impl GitHub for RecordingGitHub {
    fn api_url(&self) -> &str {
        "https://api.github.invalid"
    }

    fn git_credentials(&self) -> GitCredentials {
        GitCredentials {
            username: "x-access-token".to_string(),
            password: "unused-for-local-remotes".to_string(),
        }
    }

    async fn authenticated_user(&self) -> Result<User, ProviderError> {
        Ok(User {
            login: "warden[bot]".to_string(),
            name: None,
            email: None,
        })
    }

    async fn list_open_pull_requests(
        &self,
        _owner: &str,
        _repo: &str,
    ) -> Result<Vec<PullRequest>, ProviderError> {
        Ok(self.open_prs.lock().unwrap().clone())
    }

    async fn list_pull_requests_by_head(
        &self,
        _owner: &str,
        _repo: &str,
        branch: &str,
    ) -> Result<Vec<PullRequest>, ProviderError> {
        Ok(self
            .open_prs
            .lock()
            .unwrap()
            .iter()
            .filter(|pr| pr.head.ref_name == branch)
            .cloned()
            .collect())
    }

    async fn create_pull_request(
        &self,
        _owner: &str,
        _repo: &str,
        title: &str,
        body: &str,
        head: &str,
        base: &str,
    ) -> Result<PullRequest, ProviderError> {
        let number = self.next_number.fetch_add(1, Ordering::SeqCst);
        self.created.lock().unwrap().push(CreatedPr {
            title: title.to_string(),
            body: body.to_string(),
            head: head.to_string(),
            base: base.to_string(),
        });
        let pr = PullRequest {
            number,
            title: title.to_string(),
            body: Some(body.to_string()),
            state: "open".to_string(),
            head: GitRef {
                ref_name: head.to_string(),
                sha: None,
            },
            base: GitRef {
                ref_name: base.to_string(),
                sha: None,
            },
            html_url: None,
        };
        self.open_prs.lock().unwrap().push(pr.clone());
        Ok(pr)
    }

    async fn close_pull_request(
        &self,
        _owner: &str,
        _repo: &str,
        number: u64,
    ) -> Result<(), ProviderError> {
        let mut open = self.open_prs.lock().unwrap();
        let before = open.len();
        open.retain(|pr| pr.number != number);
        if open.len() == before && !self.closed.lock().unwrap().contains(&number) {
            return Err(ProviderError::NotFound(format!("pull {number}")));
        }
        self.closed.lock().unwrap().push(number);
        Ok(())
    }

    async fn branch_protection(
        &self,
        _owner: &str,
        _repo: &str,
        _branch: &str,
    ) -> Result<Option<BranchProtection>, ProviderError> {
        Ok(self.protection.lock().unwrap().clone())
    }

    async fn update_branch_protection(
        &self,
        _owner: &str,
        _repo: &str,
        branch: &str,
        update: &BranchProtectionUpdate,
    ) -> Result<(), ProviderError> {
        self.protection_updates
            .lock()
            .unwrap()
            .push((branch.to_string(), update.clone()));
        Ok(())
    }

    async fn resolve_action_ref(
        &self,
        _owner: &str,
        _repo: &str,
        git_ref: &str,
    ) -> Result<String, ProviderError> {
        Err(ProviderError::NotFound(git_ref.to_string()))
    }

    async fn create_security_advisory(
        &self,
        _owner: &str,
        _repo: &str,
        _summary: &str,
        _description: &str,
    ) -> Result<String, ProviderError> {
        Ok("GHSA-test-0001".to_string())
    }

    async fn close_security_advisory(
        &self,
        _owner: &str,
        _repo: &str,
        ghsa_id: &str,
    ) -> Result<(), ProviderError> {
        if ghsa_id == "GHSA-gone" {
            return Err(ProviderError::NotFound(ghsa_id.to_string()));
        }
        Ok(())
    }

    async fn create_issue_comment(
        &self,
        _owner: &str,
        _repo: &str,
        _number: u64,
        _body: &str,
    ) -> Result<u64, ProviderError> {
        Ok(9001)
    }

    async fn delete_issue_comment(
        &self,
        _owner: &str,
        _repo: &str,
        _comment_id: u64,
    ) -> Result<(), ProviderError> {
        Ok(())
    }

    async fn create_review(
        &self,
        _owner: &str,
        _repo: &str,
        _number: u64,
        _body: &str,
    ) -> Result<u64, ProviderError> {
        Ok(7001)
    }

    async fn dismiss_review(
        &self,
        _owner: &str,
        _repo: &str,
        _number: u64,
        _review_id: u64,
        _message: &str,
    ) -> Result<(), ProviderError> {
        Ok(())
    }
}

/// Working tree with one commit on `main` and a local bare `origin`.
pub fn init_repos() -> (tempfile::TempDir, tempfile::TempDir) {
    let work = tempfile::tempdir().unwrap();
    let bare = tempfile::tempdir().unwrap();
    Repository::init_bare(bare.path()).unwrap();

    let repo = Repository::init(work.path()).unwrap();
    repo.set_head("refs/heads/main").unwrap();
    std::fs::write(work.path().join("README.md"), "# fixture\n").unwrap();
    let mut index = repo.index().unwrap();
    index.add_path(Path::new("README.md")).unwrap();
    index.write().unwrap();
    let tree = repo.find_tree(index.write_tree().unwrap()).unwrap();
    let sig = Signature::now("fixture", "fixture@example.com").unwrap();
    repo.commit(Some("HEAD"), &sig, &sig, "initial", &tree, &[])
        .unwrap();
    repo.remote("origin", bare.path().to_str().unwrap()).unwrap();

    (work, bare)
}

/// Whether `refs/heads/<branch>` exists in the bare remote.
pub fn remote_has_branch(bare: &Path, branch: &str) -> bool {
    let repo = Repository::open_bare(bare).unwrap();
    let found = repo.find_reference(&format!("refs/heads/{branch}")).is_ok();
    found
}
