//! Octocrab client wrapper.
//!
//! One client is shared by every GitHub-backed watch; each call names the
//! repository it targets.

use octocrab::Octocrab;
use octocrab::models::IssueState;
use octocrab::models::pulls::PullRequest;
use tracing::{trace, warn};

use super::error::GitHubApiError;
use crate::source::{ItemListing, RemoteItem};
use crate::types::ItemId;

/// PRs per page (GitHub's maximum).
const PER_PAGE: u8 = 100;

#[derive(Clone)]
pub struct GitHubClient {
    client: Octocrab,
}

impl GitHubClient {
    pub fn new(client: Octocrab) -> Self {
        Self { client }
    }

    /// Creates a client authenticated with a personal access token.
    pub fn from_token(token: impl Into<String>) -> Result<Self, octocrab::Error> {
        let client = Octocrab::builder().personal_token(token.into()).build()?;
        Ok(Self::new(client))
    }

    /// Creates an unauthenticated client (public repositories, low rate limit).
    pub fn anonymous() -> Result<Self, octocrab::Error> {
        Ok(Self::new(Octocrab::builder().build()?))
    }

    pub fn inner(&self) -> &Octocrab {
        &self.client
    }

    /// Lists pull requests in every state, newest first, as remote items.
    ///
    /// `base` narrows the query server-side. Stops after `max_pages` pages
    /// and marks the listing truncated if more remain.
    pub async fn list_pulls(
        &self,
        owner: &str,
        repo: &str,
        base: Option<&str>,
        max_pages: u32,
    ) -> Result<ItemListing, GitHubApiError> {
        let mut page = 1u32;
        let mut items = Vec::new();

        loop {
            let pulls = self.client.pulls(owner, repo);
            let mut request = pulls
                .list()
                .state(octocrab::params::State::All)
                .per_page(PER_PAGE)
                .page(page);
            if let Some(base) = base {
                request = request.base(base);
            }

            let page_result = request
                .send()
                .await
                .map_err(GitHubApiError::from_octocrab)?;
            let batch = page_result.items;
            let is_last_page = batch.len() < usize::from(PER_PAGE);
            trace!(owner, repo, page, count = batch.len(), "Fetched pull request page");

            items.extend(batch.into_iter().map(|pull| pull_to_item(repo, pull)));

            if is_last_page {
                return Ok(ItemListing::complete(items));
            }
            if page >= max_pages {
                warn!(
                    owner,
                    repo,
                    pages = page,
                    items = items.len(),
                    "Hit pagination limit listing pull requests; older PRs keep their last status"
                );
                return Ok(ItemListing::truncated(items));
            }
            page += 1;
        }
    }
}

impl std::fmt::Debug for GitHubClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitHubClient").finish_non_exhaustive()
    }
}

/// Raw status for a pull: merged wins over closed.
fn raw_status(merged: bool, closed: bool) -> &'static str {
    if merged {
        "merged"
    } else if closed {
        "closed"
    } else {
        "open"
    }
}

fn pull_to_item(repo: &str, pull: PullRequest) -> RemoteItem {
    let status = raw_status(
        pull.merged_at.is_some(),
        pull.state == Some(IssueState::Closed),
    );
    let payload = serde_json::to_value(&pull).unwrap_or_else(|e| {
        warn!(pr = pull.number, error = %e, "Could not serialize pull request payload");
        serde_json::json!({ "number": pull.number })
    });

    RemoteItem {
        id: ItemId::from(pull.number),
        is_draft: pull.draft.unwrap_or(false),
        raw_status: status.to_string(),
        repository: Some(repo.to_string()),
        source_ref: Some(pull.head.ref_field.clone()),
        target_ref: Some(pull.base.ref_field.clone()),
        payload,
    }
}
