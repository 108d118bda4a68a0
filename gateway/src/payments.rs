//! Interface consumed from the payment layer.
//!
//! The L402 plumbing itself (invoices, macaroons, redemption) lives outside
//! the gateway core; admission only needs a redemption verdict and a
//! challenge header value.

use async_trait::async_trait;
use openclaw_core::KeyRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChallengeKind {
    /// No credentials were presented at all.
    Auth,
    /// The key exists but its token quota is exhausted.
    Topup,
}

pub struct PaymentVerdict {
    pub accepted: bool,
    /// Key identity to run the request under when the redemption succeeds.
    pub key: Option<KeyRecord>,
    pub message: String,
}

#[async_trait]
pub trait PaymentGate: Send + Sync {
    /// Redeem an `Authorization: L402 ...` header value.
    async fn redeem(&self, authorization: &str) -> PaymentVerdict;

    /// `WWW-Authenticate` value for a challenge of the given kind.
    fn challenge(&self, kind: ChallengeKind) -> String;
}
