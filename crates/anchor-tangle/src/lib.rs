//! Client for an IOTA-style tangle node speaking the tagged-data protocol.
//!
//! The crate covers exactly the surface the anchoring pipeline needs: a
//! health check, submission of a tagged data block carrying an anchor
//! message, and metadata lookups that report the block's ledger inclusion
//! state. Submission retries transient failures with capped exponential
//! backoff; confirmation waiting polls metadata on a fixed interval.

pub mod backend;
pub mod client;
pub mod config;
pub mod error;
pub mod message;

pub use backend::{TangleBackend, TangleStub};
pub use client::TangleClient;
pub use config::TangleConfig;
pub use error::TangleError;
pub use message::{AnchorMessage, BlockMetadata, InclusionState, NodeInfo};
