//! S3 remote store.
//!
//! Implements [`RemoteMetadataGateway`](stowage_sync::RemoteMetadataGateway)
//! and [`TransferExecutor`](stowage_sync::TransferExecutor) on top of the
//! AWS SDK. Works against any S3-compatible endpoint (MinIO, LocalStack).

mod config;
mod remote;

pub use config::S3Config;
pub use remote::S3Remote;
