//! Error taxonomy for tangle operations.
//!
//! Variants are tagged so the reconciliation loop can tell transient
//! failures (worth a retry) from terminal ones.

use thiserror::Error;

/// Errors surfaced by the tangle client.
#[derive(Debug, Error)]
pub enum TangleError {
    /// The node could not be reached or answered with garbage.
    #[error("failed to reach tangle node: {0}")]
    Connection(String),

    /// The node accepted the connection but rejected the block.
    #[error("block submission rejected: {0}")]
    Rejected(String),

    /// The block was not referenced within the confirmation window.
    #[error("block confirmation timed out after {0}s")]
    ConfirmationTimeout(u64),

    /// The ledger reports the block as conflicting; it will never confirm.
    #[error("block {0} has a conflicting ledger state")]
    Conflicting(String),

    /// Anchoring is disabled by configuration.
    #[error("tangle anchoring is disabled by configuration")]
    Unavailable,
}

impl TangleError {
    /// Whether a retry of the same operation can reasonably succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            TangleError::Connection(_)
                | TangleError::Rejected(_)
                | TangleError::ConfirmationTimeout(_)
        )
    }
}
