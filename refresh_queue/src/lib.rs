//! Consumption of storage event notifications from a message queue.
//!
//! A [`MessageSource`] receives a batch of raw messages through a [`QueueService`], reduces
//! them to the [`BucketSet`](refresh_types::BucketSet) of buckets that received new objects,
//! remembers which messages contributed, and deletes exactly those once the caller has acted
//! on them. Messages that cannot be parsed are left on the queue.
#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]
#![warn(
    missing_debug_implementations,
    clippy::explicit_iter_loop,
    clippy::use_self,
    clippy::clone_on_ref_ptr
)]

use std::fmt::Debug;

use async_trait::async_trait;
use refresh_types::ServiceError;

pub mod mock;
pub mod notification;
pub mod source;
#[cfg(feature = "aws")]
pub mod sqs;

pub use notification::StorageEventBatch;
pub use source::{MAX_BATCH_SIZE, MessageSource};

/// A message as delivered by the queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMessage {
    /// Identifier assigned by the queue, unique per message
    pub message_id: String,
    /// JSON text of the notification
    pub body: String,
    /// Handle required to delete this delivery of the message
    pub receipt_handle: String,
}

impl RawMessage {
    pub fn new(
        message_id: impl Into<String>,
        body: impl Into<String>,
        receipt_handle: impl Into<String>,
    ) -> Self {
        Self {
            message_id: message_id.into(),
            body: body.into(),
            receipt_handle: receipt_handle.into(),
        }
    }
}

/// The message queue operations the refresh service relies on
#[async_trait]
pub trait QueueService: Debug + Send + Sync + 'static {
    /// Receive up to `max_messages` messages from the queue at `queue_url`
    ///
    /// An empty queue yields an empty vector.
    async fn receive_messages(
        &self,
        queue_url: &str,
        max_messages: usize,
    ) -> Result<Vec<RawMessage>, ServiceError>;

    /// Delete the messages identified by `receipt_handles` in a single batch
    ///
    /// Returns the receipt handles the queue failed to delete.
    async fn delete_messages(
        &self,
        queue_url: &str,
        receipt_handles: &[String],
    ) -> Result<Vec<String>, ServiceError>;
}
