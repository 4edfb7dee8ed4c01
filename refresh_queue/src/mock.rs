//! In-memory [`QueueService`] for tests
use std::collections::{HashSet, VecDeque};

use async_trait::async_trait;
use parking_lot::Mutex;
use refresh_types::ServiceError;

use crate::{QueueService, RawMessage};

/// A queue held in memory
///
/// Received messages move to an in-flight list until they are deleted. Failures can be
/// scripted per call, and every delete batch is recorded for inspection.
#[derive(Debug, Default)]
pub struct MockQueueService {
    state: Mutex<MockState>,
}

#[derive(Debug, Default)]
struct MockState {
    next_id: usize,
    visible: VecDeque<RawMessage>,
    in_flight: Vec<RawMessage>,
    receive_failures: VecDeque<ServiceError>,
    delete_failures: VecDeque<ServiceError>,
    rejected: HashSet<String>,
    receive_calls: usize,
    delete_calls: Vec<Vec<String>>,
    deleted: Vec<String>,
}

impl MockQueueService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue a message with the given body, returning it as it will be delivered
    pub fn send(&self, body: impl Into<String>) -> RawMessage {
        let mut state = self.state.lock();
        state.next_id += 1;
        let n = state.next_id;
        let message = RawMessage::new(format!("message-{n}"), body, format!("receipt-{n}"));
        state.visible.push_back(message.clone());
        message
    }

    /// Fail the next receive call with `error`
    pub fn fail_next_receive(&self, error: ServiceError) {
        self.state.lock().receive_failures.push_back(error);
    }

    /// Fail the next delete call with `error`
    pub fn fail_next_delete(&self, error: ServiceError) {
        self.state.lock().delete_failures.push_back(error);
    }

    /// Report `receipt_handle` as failed whenever it is part of a delete batch
    pub fn reject_delete(&self, receipt_handle: impl Into<String>) {
        self.state.lock().rejected.insert(receipt_handle.into());
    }

    pub fn receive_calls(&self) -> usize {
        self.state.lock().receive_calls
    }

    /// Receipt handles of every delete batch, in call order
    pub fn delete_calls(&self) -> Vec<Vec<String>> {
        self.state.lock().delete_calls.clone()
    }

    /// Receipt handles successfully deleted so far
    pub fn deleted(&self) -> Vec<String> {
        self.state.lock().deleted.clone()
    }

    /// Messages received but not yet deleted
    pub fn in_flight(&self) -> Vec<RawMessage> {
        self.state.lock().in_flight.clone()
    }

    /// Messages not yet received
    pub fn visible_len(&self) -> usize {
        self.state.lock().visible.len()
    }
}

#[async_trait]
impl QueueService for MockQueueService {
    async fn receive_messages(
        &self,
        _queue_url: &str,
        max_messages: usize,
    ) -> Result<Vec<RawMessage>, ServiceError> {
        let mut state = self.state.lock();
        state.receive_calls += 1;
        if let Some(e) = state.receive_failures.pop_front() {
            return Err(e);
        }

        let n = max_messages.min(state.visible.len());
        let received: Vec<_> = state.visible.drain(..n).collect();
        state.in_flight.extend(received.iter().cloned());
        Ok(received)
    }

    async fn delete_messages(
        &self,
        _queue_url: &str,
        receipt_handles: &[String],
    ) -> Result<Vec<String>, ServiceError> {
        let mut state = self.state.lock();
        state.delete_calls.push(receipt_handles.to_vec());
        if let Some(e) = state.delete_failures.pop_front() {
            return Err(e);
        }

        let mut failed = vec![];
        for handle in receipt_handles {
            if state.rejected.contains(handle) {
                failed.push(handle.clone());
                continue;
            }
            state.in_flight.retain(|m| &m.receipt_handle != handle);
            state.deleted.push(handle.clone());
        }
        Ok(failed)
    }
}
