//! GitHub pull requests as a remote source.
//!
//! `project_name` is the repository owner and `repository` the repository
//! name. Every PR is reported with raw status `open`, `closed` or `merged`
//! plus its draft flag, so the default status conversion applies unchanged.
//!
//! Key features:
//! - Exponential backoff retry for transient failures
//! - Distinguishes transient vs permanent errors
//! - Target-branch filter pushed to the API, everything else filtered locally

mod client;
mod error;
mod retry;

pub use client::GitHubClient;
pub use error::{GitHubApiError, GitHubErrorKind};
pub use retry::{RetryConfig, RetryPolicy, retry_with_backoff};

use tracing::debug;

use super::{FilterCriteria, ItemListing, RemoteSource, SourceError};

/// Default cap on pages fetched per round (100 PRs each).
pub const DEFAULT_MAX_PAGES: u32 = 10;

#[derive(Debug, Clone)]
pub struct GitHubPullSource {
    client: GitHubClient,
    retry_config: RetryConfig,
    retry_policy: RetryPolicy,
    max_pages: u32,
}

impl GitHubPullSource {
    pub fn new(client: GitHubClient) -> Self {
        GitHubPullSource {
            client,
            retry_config: RetryConfig::DEFAULT,
            retry_policy: RetryPolicy::RetryTransient,
            max_pages: DEFAULT_MAX_PAGES,
        }
    }

    pub fn with_retry(mut self, config: RetryConfig, policy: RetryPolicy) -> Self {
        self.retry_config = config;
        self.retry_policy = policy;
        self
    }

    pub fn with_max_pages(mut self, max_pages: u32) -> Self {
        self.max_pages = max_pages.max(1);
        self
    }
}

impl RemoteSource for GitHubPullSource {
    async fn fetch_items(&self, criteria: &FilterCriteria) -> Result<ItemListing, SourceError> {
        let owner = criteria.project_name.as_str();
        let repo = criteria.repository.as_deref().ok_or_else(|| {
            SourceError::permanent("GitHub watches require a repository name")
        })?;
        let base = criteria
            .target_ref
            .as_deref()
            .map(|r| r.strip_prefix("refs/heads/").unwrap_or(r));

        let listing = retry_with_backoff(self.retry_config, self.retry_policy, || {
            self.client.list_pulls(owner, repo, base, self.max_pages)
        })
        .await?;

        debug!(
            owner,
            repo,
            count = listing.items.len(),
            truncated = listing.truncated,
            "Listed pull requests"
        );
        Ok(listing)
    }
}
