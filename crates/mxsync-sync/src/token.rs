//! Persistence of the resume token.

use async_trait::async_trait;

use mxsync_core::ResumeToken;
use mxsync_store::{Repository, Result, Transaction};

/// Where the loop reads and writes its resume token.
///
/// Both calls run inside the caller's transaction so the token commits
/// atomically with the writes of the cycle that produced it.
#[async_trait]
pub trait ResumeTokenStore: Send + Sync {
    async fn load(&self, tx: &Transaction) -> Result<Option<ResumeToken>>;

    async fn save(&self, tx: &Transaction, token: &ResumeToken) -> Result<()>;
}

/// Stores the token as a single record of a repository.
#[derive(Debug, Clone)]
pub struct RepositoryTokenStore {
    repo: Repository<String, ResumeToken>,
    key: String,
}

impl RepositoryTokenStore {
    pub const TABLE: &'static str = "sync_batch";

    pub fn new() -> Self {
        Self::with_key("batch_token")
    }

    /// Use a distinct record, e.g. one per account sharing a backend.
    pub fn with_key(key: impl Into<String>) -> Self {
        Self {
            repo: Repository::new(Self::TABLE),
            key: key.into(),
        }
    }
}

impl Default for RepositoryTokenStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ResumeTokenStore for RepositoryTokenStore {
    async fn load(&self, tx: &Transaction) -> Result<Option<ResumeToken>> {
        self.repo.get(tx, &self.key).await
    }

    async fn save(&self, tx: &Transaction, token: &ResumeToken) -> Result<()> {
        self.repo.save(tx, &self.key, token).await
    }
}
