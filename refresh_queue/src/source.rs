//! Receiving, deduplicating and deleting queue messages.
use std::{collections::HashSet, sync::Arc};

use indexmap::IndexMap;
use refresh_backoff::BackoffPolicy;
use refresh_types::{BucketSet, ServiceError};
use tracing::{debug, error, info};

use crate::{QueueService, RawMessage, StorageEventBatch};

/// Largest number of messages the queue hands out, or deletes, per call
pub const MAX_BATCH_SIZE: usize = 10;

/// Reads storage event notifications from one queue
///
/// Messages that yielded at least one bucket are remembered as processed until
/// [`MessageSource::delete_processed`] removes them from the queue.
#[derive(Debug)]
pub struct MessageSource {
    service: Arc<dyn QueueService>,
    queue_url: String,
    max_messages: usize,
    backoff: BackoffPolicy,
    processed: IndexMap<String, RawMessage>,
}

impl MessageSource {
    pub fn new(
        service: Arc<dyn QueueService>,
        queue_url: impl Into<String>,
        backoff: BackoffPolicy,
    ) -> Self {
        Self {
            service,
            queue_url: queue_url.into(),
            max_messages: MAX_BATCH_SIZE,
            backoff,
            processed: IndexMap::new(),
        }
    }

    /// Receive at most `max_messages` per call, clamped to `1..=MAX_BATCH_SIZE`
    pub fn with_max_messages(self, max_messages: usize) -> Self {
        Self {
            max_messages: max_messages.clamp(1, MAX_BATCH_SIZE),
            ..self
        }
    }

    pub fn queue_url(&self) -> &str {
        &self.queue_url
    }

    /// Receive one batch of messages
    ///
    /// Throttled and transient failures are retried under the backoff policy. An empty
    /// vector means the queue had nothing to deliver.
    pub async fn receive(&self) -> Result<Vec<RawMessage>, ServiceError> {
        let service = &self.service;
        let queue_url = self.queue_url.as_str();
        let max_messages = self.max_messages;

        let messages = self
            .backoff
            .retry_if("receive_messages", ServiceError::is_retryable, move || {
                service.receive_messages(queue_url, max_messages)
            })
            .await?;

        info!(
            count = messages.len(),
            queue_url, "received messages from queue"
        );
        Ok(messages)
    }

    /// Collect the unique buckets referenced by `messages`
    ///
    /// Every message that names at least one bucket is recorded as processed. Messages that
    /// fail to parse, or hold no storage event records, are logged and skipped; they stay on
    /// the queue.
    pub fn unique_buckets(&mut self, messages: &[RawMessage]) -> BucketSet {
        let mut buckets = BucketSet::new();
        if messages.is_empty() {
            error!("No messages to filter, received nothing from the queue");
            return buckets;
        }

        for message in messages {
            let batch = match StorageEventBatch::parse(&message.body) {
                Ok(batch) => batch,
                Err(e) => {
                    error!(
                        message_id = %message.message_id,
                        error = %e,
                        "failed to parse storage event notification, skipping message"
                    );
                    continue;
                }
            };

            let before = buckets.len();
            let mut found = false;
            for bucket in batch.buckets() {
                buckets.insert(bucket);
                found = true;
            }

            if !found {
                info!(
                    message_id = %message.message_id,
                    "no storage event records in message, skipping"
                );
                debug!(body = %message.body, "skipped message");
                continue;
            }

            debug!(
                message_id = %message.message_id,
                new_buckets = buckets.len() - before,
                "processed message"
            );
            // a redelivery carries a new receipt handle, only the latest one deletes
            self.processed
                .insert(message.message_id.clone(), message.clone());
        }

        info!(
            buckets = %buckets,
            processed = self.processed.len(),
            "found unique buckets"
        );
        buckets
    }

    /// Messages recorded as processed and not yet deleted, in processing order
    pub fn processed(&self) -> impl Iterator<Item = &RawMessage> {
        self.processed.values()
    }

    pub fn processed_len(&self) -> usize {
        self.processed.len()
    }

    /// Delete every processed message from the queue
    ///
    /// Deletes are issued in batches of at most [`MAX_BATCH_SIZE`]. Entries the queue
    /// reports as failed are logged and stay recorded as processed. Returns the number of
    /// messages deleted.
    pub async fn delete_processed(&mut self) -> Result<usize, ServiceError> {
        if self.processed.is_empty() {
            error!("No processed messages to delete");
            return Ok(0);
        }

        let handles: Vec<String> = self
            .processed
            .values()
            .map(|m| m.receipt_handle.clone())
            .collect();

        let mut deleted = 0;
        for chunk in handles.chunks(MAX_BATCH_SIZE) {
            let service = &self.service;
            let queue_url = self.queue_url.as_str();

            let failed = self
                .backoff
                .retry_if("delete_messages", ServiceError::is_retryable, move || {
                    service.delete_messages(queue_url, chunk)
                })
                .await?;

            let failed: HashSet<_> = failed.into_iter().collect();
            for receipt_handle in &failed {
                error!(%receipt_handle, "failed to delete message from queue");
            }

            self.processed.retain(|_, m| {
                !chunk.contains(&m.receipt_handle) || failed.contains(&m.receipt_handle)
            });
            deleted += chunk.len() - failed.len().min(chunk.len());
        }

        info!(count = deleted, "Successfully deleted messages from the queue");
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockQueueService;
    use pretty_assertions::assert_eq;
    use refresh_backoff::{BackoffConfig, Jitter};
    use refresh_test_helpers::{assert_contains, assert_not_contains, tracing::TracingCapture};
    use std::{num::NonZeroUsize, time::Duration};
    use tracing::Level;

    fn storage_event(bucket: &str) -> String {
        format!(
            r#"{{"Records": [{{"eventSource": "aws:s3", "s3": {{"bucket": {{"name": "{bucket}"}}, "object": {{"key": "dt=2017-08-26/file.json"}}}}}}]}}"#
        )
    }

    fn policy() -> BackoffPolicy {
        BackoffPolicy::new(BackoffConfig {
            init_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(4),
            base: 2.,
            max_attempts: NonZeroUsize::new(3).unwrap(),
            jitter: Jitter::None,
        })
    }

    fn source(queue: &Arc<MockQueueService>) -> MessageSource {
        MessageSource::new(
            Arc::clone(queue) as Arc<dyn QueueService>,
            "https://queue.test/notifications",
            policy(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn single_record() {
        let queue = Arc::new(MockQueueService::new());
        queue.send(storage_event("b1"));
        let mut source = source(&queue);

        let messages = source.receive().await.unwrap();
        let buckets = source.unique_buckets(&messages);

        assert_eq!(buckets, BucketSet::from_iter(["b1"]));
        assert_eq!(source.processed_len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn duplicates_collapse() {
        let queue = Arc::new(MockQueueService::new());
        for _ in 0..7 {
            queue.send(storage_event("unit-testing.alerts"));
        }
        let mut source = source(&queue);

        let messages = source.receive().await.unwrap();
        assert_eq!(messages.len(), 7);

        let buckets = source.unique_buckets(&messages);
        assert_eq!(buckets.len(), 1);
        assert_eq!(source.processed_len(), 7);
    }

    #[tokio::test(start_paused = true)]
    async fn receive_is_capped_at_batch_size() {
        let queue = Arc::new(MockQueueService::new());
        for i in 0..15 {
            queue.send(storage_event(&format!("bucket{i}")));
        }
        let source = source(&queue).with_max_messages(50);

        assert_eq!(source.receive().await.unwrap().len(), MAX_BATCH_SIZE);
        assert_eq!(queue.visible_len(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn receive_empty_queue() {
        let queue = Arc::new(MockQueueService::new());
        let source = source(&queue);

        assert!(source.receive().await.unwrap().is_empty());
        assert_eq!(queue.receive_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn receive_retries_throttling() {
        let queue = Arc::new(MockQueueService::new());
        queue.send(storage_event("b1"));
        queue.fail_next_receive(ServiceError::throttled("receive_messages", "slow down"));
        queue.fail_next_receive(ServiceError::transient("receive_messages", "timeout"));
        let source = source(&queue);

        assert_eq!(source.receive().await.unwrap().len(), 1);
        assert_eq!(queue.receive_calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn receive_fatal_is_not_retried() {
        let queue = Arc::new(MockQueueService::new());
        queue.fail_next_receive(ServiceError::fatal("receive_messages", "access denied"));
        let source = source(&queue);

        let err = source.receive().await.unwrap_err();
        assert!(!err.is_retryable());
        assert_eq!(queue.receive_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn receive_gives_up() {
        let queue = Arc::new(MockQueueService::new());
        for _ in 0..3 {
            queue.fail_next_receive(ServiceError::throttled("receive_messages", "slow down"));
        }
        let source = source(&queue);

        let err = source.receive().await.unwrap_err();
        assert!(matches!(err, ServiceError::Throttled { .. }));
        assert_eq!(queue.receive_calls(), 3);
    }

    #[test]
    fn unique_buckets_without_messages() {
        let capture = TracingCapture::new();
        let queue = Arc::new(MockQueueService::new());
        let mut source = source(&queue);

        let buckets = source.unique_buckets(&[]);

        assert!(buckets.is_empty());
        assert_eq!(source.processed_len(), 0);
        assert!(capture.contains_at(Level::ERROR, "No messages to filter"));
    }

    #[test]
    fn malformed_messages_are_skipped() {
        let capture = TracingCapture::new();
        let queue = Arc::new(MockQueueService::new());
        let mut source = source(&queue);

        let messages = vec![
            RawMessage::new("m1", "'wrong-format-test'", "r1"),
            RawMessage::new("m2", r#"{"Event": "s3:TestEvent"}"#, "r2"),
        ];
        let buckets = source.unique_buckets(&messages);

        assert!(buckets.is_empty());
        assert_eq!(source.processed_len(), 0);
        assert_eq!(capture.lines_at(Level::ERROR).len(), 2);
        assert!(capture.contains_at(Level::ERROR, "m1"));
    }

    #[test]
    fn messages_without_storage_records_are_skipped() {
        let capture = TracingCapture::new();
        let queue = Arc::new(MockQueueService::new());
        let mut source = source(&queue);

        let body = r#"{"Records": [{"eventSource": "aws:kinesis"}]}"#;
        let buckets = source.unique_buckets(&[RawMessage::new("m1", body, "r1")]);

        assert!(buckets.is_empty());
        assert_eq!(source.processed_len(), 0);
        assert!(capture.contains_at(Level::INFO, "no storage event records"));
        assert!(capture.contains_at(Level::DEBUG, "aws:kinesis"));
    }

    #[test_log::test]
    fn processed_messages_are_recorded_once() {
        let queue = Arc::new(MockQueueService::new());
        let mut source = source(&queue);
        let message = RawMessage::new("m1", storage_event("b1"), "r1");

        source.unique_buckets(&[message.clone()]);
        source.unique_buckets(&[message.clone()]);

        assert_eq!(source.processed().collect::<Vec<_>>(), vec![&message]);
    }

    #[test_log::test(tokio::test(start_paused = true))]
    async fn redelivered_message_is_deleted_with_latest_receipt() {
        let queue = Arc::new(MockQueueService::new());
        let mut source = source(&queue);
        let first = RawMessage::new("m1", storage_event("b1"), "receipt-old");
        let other = RawMessage::new("m2", storage_event("b2"), "receipt-other");
        let redelivered = RawMessage::new("m1", storage_event("b1"), "receipt-new");

        source.unique_buckets(&[first, other.clone()]);
        source.unique_buckets(&[redelivered.clone()]);

        assert_eq!(
            source.processed().collect::<Vec<_>>(),
            vec![&redelivered, &other]
        );
        assert_eq!(source.delete_processed().await.unwrap(), 2);
        assert_eq!(
            queue.delete_calls(),
            vec![vec!["receipt-new".to_string(), "receipt-other".to_string()]]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn delete_without_processed_messages() {
        let capture = TracingCapture::new();
        let queue = Arc::new(MockQueueService::new());
        let mut source = source(&queue);

        assert_eq!(source.delete_processed().await.unwrap(), 0);
        assert!(queue.delete_calls().is_empty());
        assert!(capture.contains_at(Level::ERROR, "No processed messages to delete"));
    }

    #[tokio::test(start_paused = true)]
    async fn only_processed_messages_are_deleted() {
        let capture = TracingCapture::new();
        let queue = Arc::new(MockQueueService::new());
        let good = queue.send(storage_event("b1"));
        let bad = queue.send("'wrong-format-test'");
        let mut source = source(&queue);

        let messages = source.receive().await.unwrap();
        source.unique_buckets(&messages);

        assert_eq!(source.delete_processed().await.unwrap(), 1);
        assert_eq!(queue.deleted(), vec![good.receipt_handle]);
        assert_eq!(queue.in_flight(), vec![bad]);
        assert_eq!(source.processed_len(), 0);

        let logs = capture.to_string();
        assert_contains!(&logs, "Successfully deleted messages from the queue");
        assert_contains!(&logs, "count = 1");
    }

    #[tokio::test(start_paused = true)]
    async fn deletes_are_batched() {
        let queue = Arc::new(MockQueueService::new());
        let mut source = source(&queue);

        for _ in 0..3 {
            for i in 0..8 {
                queue.send(storage_event(&format!("bucket{i}")));
            }
            let messages = source.receive().await.unwrap();
            source.unique_buckets(&messages);
        }
        assert_eq!(source.processed_len(), 24);

        assert_eq!(source.delete_processed().await.unwrap(), 24);
        let sizes: Vec<_> = queue.delete_calls().iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![10, 10, 4]);
        assert!(queue.in_flight().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_deletes_stay_processed() {
        let capture = TracingCapture::new();
        let queue = Arc::new(MockQueueService::new());
        queue.send(storage_event("b1"));
        let stuck = queue.send(storage_event("b2"));
        queue.reject_delete(stuck.receipt_handle.clone());
        let mut source = source(&queue);

        let messages = source.receive().await.unwrap();
        source.unique_buckets(&messages);

        assert_eq!(source.delete_processed().await.unwrap(), 1);
        assert_eq!(source.processed().collect::<Vec<_>>(), vec![&stuck]);
        assert!(capture.contains_at(Level::ERROR, "receipt-2"));

        let logs = capture.to_string();
        assert_not_contains!(&logs, "receipt-1");
    }

    #[tokio::test(start_paused = true)]
    async fn delete_retries_transient_failures() {
        let queue = Arc::new(MockQueueService::new());
        queue.send(storage_event("b1"));
        queue.fail_next_delete(ServiceError::transient("delete_messages", "timeout"));
        let mut source = source(&queue);

        let messages = source.receive().await.unwrap();
        source.unique_buckets(&messages);

        assert_eq!(source.delete_processed().await.unwrap(), 1);
        assert_eq!(queue.delete_calls().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn delete_fatal_failure_propagates() {
        let queue = Arc::new(MockQueueService::new());
        queue.send(storage_event("b1"));
        queue.fail_next_delete(ServiceError::fatal("delete_messages", "access denied"));
        let mut source = source(&queue);

        let messages = source.receive().await.unwrap();
        source.unique_buckets(&messages);

        assert!(source.delete_processed().await.is_err());
        assert_eq!(source.processed_len(), 1);
    }
}
