use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::time::Instant;

use tracecast_runtime::{PublishError, Publisher};
use tracecast_types::{Destination, MessageHandle};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    Send,
    Edit,
}

/// One recorded API call, including failed attempts.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub kind: CallKind,
    pub destination: Destination,
    pub handle: Option<MessageHandle>,
    pub text: String,
    pub at: Instant,
}

/// In-memory publisher that records every attempt and can be scripted to
/// fail. Handles are `msg-0`, `msg-1`, ... in send order.
#[derive(Debug, Default)]
pub struct MockPublisher {
    calls: Mutex<Vec<RecordedCall>>,
    next_handle: AtomicU64,
    send_failures: Mutex<VecDeque<bool>>,
    edit_failures: Mutex<VecDeque<bool>>,
}

impl MockPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the next `count` sends to fail (`transient` selects the
    /// error class).
    pub fn fail_next_sends(&self, count: usize, transient: bool) {
        let mut failures = self.send_failures.lock().unwrap();
        for _ in 0..count {
            failures.push_back(transient);
        }
    }

    pub fn fail_next_edits(&self, count: usize, transient: bool) {
        let mut failures = self.edit_failures.lock().unwrap();
        for _ in 0..count {
            failures.push_back(transient);
        }
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// Texts of successful sends, in order.
    pub fn sent_texts(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|call| call.kind == CallKind::Send && call.handle.is_some())
            .map(|call| call.text.clone())
            .collect()
    }

    /// Texts of edits, in order.
    pub fn edited_texts(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|call| call.kind == CallKind::Edit)
            .map(|call| call.text.clone())
            .collect()
    }

    /// Last text published for a handle (send or edit).
    pub fn last_text_for(&self, handle: &MessageHandle) -> Option<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|call| call.handle.as_ref() == Some(handle))
            .map(|call| call.text.clone())
    }

    fn scripted_failure(queue: &Mutex<VecDeque<bool>>) -> Option<PublishError> {
        queue.lock().unwrap().pop_front().map(|transient| {
            if transient {
                PublishError::Transient("scripted transient failure".to_string())
            } else {
                PublishError::Permanent("scripted permanent failure".to_string())
            }
        })
    }

    fn record(
        &self,
        kind: CallKind,
        destination: &Destination,
        handle: Option<MessageHandle>,
        text: &str,
    ) {
        self.calls.lock().unwrap().push(RecordedCall {
            kind,
            destination: destination.clone(),
            handle,
            text: text.to_string(),
            at: Instant::now(),
        });
    }
}

#[async_trait]
impl Publisher for MockPublisher {
    async fn send(
        &self,
        destination: &Destination,
        text: &str,
    ) -> Result<MessageHandle, PublishError> {
        if let Some(err) = Self::scripted_failure(&self.send_failures) {
            self.record(CallKind::Send, destination, None, text);
            return Err(err);
        }

        let handle = MessageHandle::new(format!(
            "msg-{}",
            self.next_handle.fetch_add(1, Ordering::SeqCst)
        ));
        self.record(CallKind::Send, destination, Some(handle.clone()), text);
        Ok(handle)
    }

    async fn edit(
        &self,
        destination: &Destination,
        handle: &MessageHandle,
        text: &str,
    ) -> Result<(), PublishError> {
        self.record(CallKind::Edit, destination, Some(handle.clone()), text);
        if let Some(err) = Self::scripted_failure(&self.edit_failures) {
            return Err(err);
        }
        Ok(())
    }
}
