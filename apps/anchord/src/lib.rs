//! Anchoring service for indexed blockchain events.
//!
//! Windows of events are reduced to a Merkle root, the root is committed to
//! an external tangle as a tagged data block, and per-event inclusion proofs
//! are persisted so inclusion can later be proven without trusting the
//! service. A reconciliation loop drives stuck anchors to a terminal state.

pub mod config;
pub mod consumer;
pub mod http;
pub mod model;
pub mod reconcile;
pub mod scheduler;
pub mod store;
pub mod workflow;

pub use config::Settings;
pub use http::{build_router, AppState};
pub use model::{AnchorOutcome, AnchorRecord, AnchorResult, AnchorStatus, ReconciliationReport};
pub use reconcile::{ReconcileConfig, Reconciliation, NEEDS_REVIEW_MESSAGE};
pub use store::AnchorRepository;
pub use workflow::{AnchorWorkflow, ClaimSet};
