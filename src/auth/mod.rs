pub mod signer;
pub mod token_manager;

use std::time::Duration;
use tokio::time::Instant;

pub use signer::{Credential, CredentialError, CredentialSigner, SignedAssertion, TokenType};
pub use token_manager::{AuthError, ScopedToken, TokenManager};

/// Cache state of one token tier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenState {
    Absent,
    Valid,
    Expiring,
}

/// Issue and expiry instants of a token, on the monotonic clock.
#[derive(Debug, Clone, Copy)]
pub struct Lifetime {
    issued_at: Instant,
    expires_at: Instant,
}

impl Lifetime {
    pub fn starting_now(validity: Duration) -> Self {
        let issued_at = Instant::now();
        Self {
            issued_at,
            expires_at: issued_at + validity,
        }
    }

    pub fn remaining(&self) -> Duration {
        self.expires_at.saturating_duration_since(Instant::now())
    }

    /// Refresh once remaining validity drops to the margin, capped at a tenth
    /// of the total lifetime so short-lived tokens are still used.
    pub fn needs_refresh(&self, margin: Duration) -> bool {
        let total = self.expires_at.duration_since(self.issued_at);
        self.remaining() <= margin.min(total / 10)
    }

    pub fn state(&self, margin: Duration) -> TokenState {
        if self.needs_refresh(margin) {
            TokenState::Expiring
        } else {
            TokenState::Valid
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hour_token_uses_full_margin() {
        let lifetime = Lifetime::starting_now(Duration::from_secs(3600));
        assert!(!lifetime.needs_refresh(Duration::from_secs(300)));
        assert_eq!(lifetime.state(Duration::from_secs(300)), TokenState::Valid);
    }

    #[test]
    fn test_zero_lifetime_is_expiring() {
        let lifetime = Lifetime::starting_now(Duration::ZERO);
        assert!(lifetime.needs_refresh(Duration::from_secs(300)));
    }

    #[test]
    fn test_margin_capped_for_short_tokens() {
        // 60s token: margin shrinks to 6s instead of 300s
        let lifetime = Lifetime::starting_now(Duration::from_secs(60));
        assert!(!lifetime.needs_refresh(Duration::from_secs(300)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_expiry_follows_clock() {
        let lifetime = Lifetime::starting_now(Duration::from_secs(100));
        tokio::time::advance(Duration::from_secs(89)).await;
        assert!(!lifetime.needs_refresh(Duration::from_secs(300)));
        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(lifetime.needs_refresh(Duration::from_secs(300)));
    }
}
