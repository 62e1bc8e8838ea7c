//! Content-fingerprint reconciliation between a local tree and a remote
//! object store.
//!
//! This crate holds the **decision logic** for a sync run. It has no
//! transport of its own: remote stores plug in through the
//! [`RemoteMetadataGateway`] and [`TransferExecutor`] traits.
//!
//! # Pipeline
//!
//! 1. **Scan**: walk the local tree ([`scan_tree`])
//! 2. **Map**: local path to remote key and back ([`PathMapper`])
//! 3. **Reconcile**: stored hash, then multipart fingerprint ([`ReconciliationEngine`])
//! 4. **Transfer**: bounded concurrent upload or download ([`SyncOrchestrator`])

pub mod config;
pub mod error;
pub mod gateway;
pub mod memory;
pub mod orchestrator;
pub mod path_map;
pub mod reconcile;
pub mod scanner;
pub mod types;

// Re-export primary types for convenience.
pub use config::SyncConfig;
pub use error::SyncError;
pub use gateway::{BoxFuture, RemoteMetadataGateway, TransferExecutor, partial_path};
pub use memory::{InjectedFailure, MemoryRemote};
pub use orchestrator::SyncOrchestrator;
pub use path_map::PathMapper;
pub use reconcile::{Evaluation, ReconciliationEngine};
pub use scanner::scan_tree;
pub use types::{
    Direction, FileOutcome, FileRef, FileResult, HeadResult, Reconciliation, RemoteObjectMetadata,
    RunSummary, SkipReason, SyncEvent, TransferReason, UnverifiableReason, UploadMetadata,
};
