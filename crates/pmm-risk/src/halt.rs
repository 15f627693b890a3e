//! Per-token quoting halt.
//!
//! Once a token is halted it stays halted for the life of the process. The
//! only activity allowed on a halted token is forced liquidation.

use std::collections::HashMap;

use parking_lot::RwLock;
use pmm_core::TokenId;
use rust_decimal::Decimal;
use tracing::{error, warn};

/// Reason a token was halted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HaltReason {
    /// Ledger position exceeded the configured cap.
    CapBreach { size: Decimal, cap: Decimal },
}

impl std::fmt::Display for HaltReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CapBreach { size, cap } => write!(f, "cap breach: |{}| > {}", size, cap),
        }
    }
}

#[derive(Debug, Clone)]
struct HaltRecord {
    reason: HaltReason,
    at_ms: u64,
}

/// Halt latch keyed by token.
///
/// Thread-safe: can be shared across market loops via `Arc<TokenHaltLatch>`.
#[derive(Debug, Default)]
pub struct TokenHaltLatch {
    halted: RwLock<HashMap<TokenId, HaltRecord>>,
}

impl TokenHaltLatch {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Halt a token. If already halted, keeps the original reason.
    ///
    /// Returns true if this call set the halt.
    pub fn halt(&self, token: &TokenId, reason: HaltReason, now_ms: u64) -> bool {
        let mut halted = self.halted.write();
        if let Some(existing) = halted.get(token) {
            warn!(
                token = %token.short(),
                existing = %existing.reason,
                new_reason = %reason,
                "Token already halted, ignoring new trigger"
            );
            return false;
        }
        error!(token = %token.short(), reason = %reason, "TOKEN HALTED");
        halted.insert(token.clone(), HaltRecord { reason, at_ms: now_ms });
        true
    }

    #[must_use]
    pub fn is_halted(&self, token: &TokenId) -> bool {
        self.halted.read().contains_key(token)
    }

    /// Reason and time of the halt, if halted.
    #[must_use]
    pub fn reason(&self, token: &TokenId) -> Option<(HaltReason, u64)> {
        self.halted
            .read()
            .get(token)
            .map(|r| (r.reason.clone(), r.at_ms))
    }

    /// Number of halted tokens.
    #[must_use]
    pub fn count(&self) -> usize {
        self.halted.read().len()
    }
}
