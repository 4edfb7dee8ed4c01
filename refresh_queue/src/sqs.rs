//! [`QueueService`] backed by Amazon SQS
use std::time::Duration;

use async_trait::async_trait;
use aws_sdk_sqs::{Client, types::DeleteMessageBatchRequestEntry};
use refresh_types::{
    ServiceError,
    aws::{classify_code, classify_sdk_error},
};
use tracing::warn;

use crate::{QueueService, RawMessage};

/// Longest long-poll wait SQS accepts
pub const MAX_WAIT_TIME: Duration = Duration::from_secs(20);

/// Longest visibility timeout SQS accepts
pub const MAX_VISIBILITY_TIMEOUT: Duration = Duration::from_secs(12 * 60 * 60);

#[derive(Debug, Clone)]
pub struct SqsQueueService {
    client: Client,
    wait_time: Option<Duration>,
    visibility_timeout: Option<Duration>,
}

impl SqsQueueService {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            wait_time: None,
            visibility_timeout: None,
        }
    }

    /// Long-poll for up to `wait_time` when the queue is empty, at most [`MAX_WAIT_TIME`]
    pub fn with_wait_time(self, wait_time: Duration) -> Self {
        Self {
            wait_time: Some(clamp("wait_time", wait_time, MAX_WAIT_TIME)),
            ..self
        }
    }

    /// Hide received messages from other consumers for `visibility_timeout`, at most
    /// [`MAX_VISIBILITY_TIMEOUT`]
    pub fn with_visibility_timeout(self, visibility_timeout: Duration) -> Self {
        Self {
            visibility_timeout: Some(clamp(
                "visibility_timeout",
                visibility_timeout,
                MAX_VISIBILITY_TIMEOUT,
            )),
            ..self
        }
    }

    /// Resolve the URL of the queue called `queue_name`
    pub async fn queue_url(&self, queue_name: &str) -> Result<String, ServiceError> {
        let output = self
            .client
            .get_queue_url()
            .queue_name(queue_name)
            .send()
            .await
            .map_err(|e| classify_sdk_error("get_queue_url", e))?;

        output.queue_url().map(ToString::to_string).ok_or_else(|| {
            ServiceError::fatal("get_queue_url", format!("no URL returned for {queue_name}"))
        })
    }
}

#[async_trait]
impl QueueService for SqsQueueService {
    async fn receive_messages(
        &self,
        queue_url: &str,
        max_messages: usize,
    ) -> Result<Vec<RawMessage>, ServiceError> {
        let mut request = self
            .client
            .receive_message()
            .queue_url(queue_url)
            .max_number_of_messages(max_messages as i32);
        if let Some(wait_time) = self.wait_time {
            request = request.wait_time_seconds(whole_seconds(wait_time));
        }
        if let Some(timeout) = self.visibility_timeout {
            request = request.visibility_timeout(whole_seconds(timeout));
        }

        let output = request
            .send()
            .await
            .map_err(|e| classify_sdk_error("receive_messages", e))?;

        let messages = output
            .messages()
            .iter()
            .filter_map(|m| match (m.message_id(), m.body(), m.receipt_handle()) {
                (Some(id), Some(body), Some(receipt_handle)) => {
                    Some(RawMessage::new(id, body, receipt_handle))
                }
                _ => {
                    warn!(
                        message_id = m.message_id().unwrap_or_default(),
                        "ignoring message without body or receipt handle"
                    );
                    None
                }
            })
            .collect();
        Ok(messages)
    }

    async fn delete_messages(
        &self,
        queue_url: &str,
        receipt_handles: &[String],
    ) -> Result<Vec<String>, ServiceError> {
        let entries = receipt_handles
            .iter()
            .enumerate()
            .map(|(i, receipt_handle)| {
                DeleteMessageBatchRequestEntry::builder()
                    .id(i.to_string())
                    .receipt_handle(receipt_handle)
                    .build()
                    .map_err(|e| ServiceError::fatal("delete_messages", e.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let output = self
            .client
            .delete_message_batch()
            .queue_url(queue_url)
            .set_entries(Some(entries))
            .send()
            .await
            .map_err(|e| classify_sdk_error("delete_messages", e))?;

        let failed = output
            .failed()
            .iter()
            .filter_map(|entry| {
                let reason = classify_code(
                    "delete_messages",
                    entry.code(),
                    entry.message().unwrap_or_default(),
                );
                warn!(
                    entry = entry.id(),
                    sender_fault = entry.sender_fault(),
                    %reason,
                    "queue rejected delete entry"
                );
                entry
                    .id()
                    .parse::<usize>()
                    .ok()
                    .and_then(|i| receipt_handles.get(i).cloned())
            })
            .collect();
        Ok(failed)
    }
}

fn clamp(setting: &'static str, value: Duration, max: Duration) -> Duration {
    if value > max {
        warn!(
            setting,
            requested = %humantime::format_duration(value),
            max = %humantime::format_duration(max),
            "value exceeds the queue limit, using the limit"
        );
        max
    } else {
        value
    }
}

// both limits fit an i32 once clamped
fn whole_seconds(value: Duration) -> i32 {
    i32::try_from(value.as_secs()).unwrap_or(i32::MAX)
}
