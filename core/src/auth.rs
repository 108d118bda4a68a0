//! Credential access for harnesses.
//!
//! How tokens get onto disk (login flows, refresh-token exchange, credential
//! file layouts) is outside the engine; a harness only needs a snapshot of
//! the current bearer and a refresh hook to invoke once on a 401. Sources
//! hand out cloned snapshots under a read lock so a refresh never blocks
//! in-flight requests.

use std::sync::RwLock;

use async_trait::async_trait;

use crate::error::Result;

#[async_trait]
pub trait CredentialSource: Send + Sync {
    /// Current bearer token, if any.
    fn bearer(&self) -> Option<String>;

    /// Try to obtain a fresh token. Returns the new bearer when the refresh
    /// produced one; `Ok(None)` when the source cannot refresh.
    async fn refresh(&self) -> Result<Option<String>>;

    /// Provider account the token is scoped to, when the upstream wants it
    /// as a separate header.
    fn account_id(&self) -> Option<String> {
        None
    }
}

/// A fixed token handed in at construction (typically from the environment).
/// `refresh` is a no-op; a 401 with this source is terminal.
pub struct StaticToken {
    token: RwLock<Option<String>>,
    account_id: Option<String>,
}

impl StaticToken {
    pub fn new(token: Option<String>, account_id: Option<String>) -> Self {
        Self {
            token: RwLock::new(token),
            account_id,
        }
    }

    /// Replace the cached token, e.g. after an out-of-band rotation.
    pub fn set(&self, token: Option<String>) {
        if let Ok(mut guard) = self.token.write() {
            *guard = token;
        }
    }
}

#[async_trait]
impl CredentialSource for StaticToken {
    fn bearer(&self) -> Option<String> {
        self.token.read().ok().and_then(|t| t.clone())
    }

    async fn refresh(&self) -> Result<Option<String>> {
        Ok(None)
    }

    fn account_id(&self) -> Option<String> {
        self.account_id.clone()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;

    #[tokio::test]
    async fn static_token_snapshots_and_never_refreshes() {
        let source = StaticToken::new(Some("tok_1".into()), Some("acct_9".into()));
        assert_eq!(source.bearer().unwrap(), "tok_1");
        assert_eq!(source.account_id().unwrap(), "acct_9");
        assert!(source.refresh().await.unwrap().is_none());
        source.set(Some("tok_2".into()));
        assert_eq!(source.bearer().unwrap(), "tok_2");
    }
}
