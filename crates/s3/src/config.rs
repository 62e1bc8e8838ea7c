use serde::{Deserialize, Serialize};

/// Connection settings for an S3 bucket.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct S3Config {
    /// Bucket name.
    pub bucket: String,

    /// Region override. Falls back to the AWS environment/profile chain.
    #[serde(default)]
    pub region: Option<String>,

    /// Endpoint override (e.g. MinIO or LocalStack).
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Use path-style addressing (`endpoint/bucket/key`).
    #[serde(default)]
    pub force_path_style: bool,
}

impl S3Config {
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            ..Self::default()
        }
    }
}
