//! Storage event notification documents.
//!
//! Only the fields needed to find the affected bucket are modelled; everything else in a
//! notification is ignored.
use serde::Deserialize;

/// `eventSource` of records emitted by the object store
pub const STORAGE_EVENT_SOURCE: &str = "aws:s3";

/// The body of one queue message
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StorageEventBatch {
    #[serde(rename = "Records")]
    pub records: Vec<StorageEventRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StorageEventRecord {
    #[serde(rename = "eventSource", default)]
    pub event_source: Option<String>,
    #[serde(default)]
    pub s3: Option<StorageEntity>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StorageEntity {
    #[serde(default)]
    pub bucket: Option<BucketEntity>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BucketEntity {
    pub name: String,
}

impl StorageEventBatch {
    /// Parse a message body, failing on invalid JSON or a missing `Records` list
    pub fn parse(body: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(body)
    }

    /// Names of the buckets referenced by storage event records, in record order
    pub fn buckets(&self) -> impl Iterator<Item = &str> {
        self.records.iter().filter_map(StorageEventRecord::bucket)
    }
}

impl StorageEventRecord {
    /// The bucket name, if this record originates from the object store
    pub fn bucket(&self) -> Option<&str> {
        if self.event_source.as_deref() != Some(STORAGE_EVENT_SOURCE) {
            return None;
        }
        self.s3
            .as_ref()
            .and_then(|s3| s3.bucket.as_ref())
            .map(|b| b.name.as_str())
    }
}
