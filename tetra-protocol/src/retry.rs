use std::collections::HashMap;
use std::time::Duration;

use log::{debug, info, warn};
use tokio::sync::mpsc;
use tokio::task::AbortHandle;

use crate::DeviceId;

/// Bound and spacing of automatic position re-requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Re-requests after the initial one.
    pub max_retries: u8,
    /// Delay before a re-request goes out.
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            delay: Duration::from_secs(1),
        }
    }
}

/// A position request the retry controller wants sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PositionRequest {
    pub device: DeviceId,
    pub issi: String,
    /// 1-based attempt number within the current request cycle.
    pub attempt: u8,
    /// Schedule this request belongs to. A request whose generation no
    /// longer matches its entry was superseded while queued.
    pub generation: u32,
}

/// Where a terminal stands in its request cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryState {
    Idle,
    Requested,
    PartialReceived,
    Exhausted,
}

/// Result of reporting a partial position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryOutcome {
    /// A re-request is scheduled as the given 1-based attempt.
    Scheduled { attempt: u8 },
    /// The bound is reached; nothing more will be sent automatically.
    Exhausted,
}

#[derive(Debug)]
struct RetryEntry {
    state: RetryState,
    retries: u8,
    generation: u32,
    pending: Option<AbortHandle>,
}

impl RetryEntry {
    fn new() -> Self {
        Self {
            state: RetryState::Idle,
            retries: 0,
            generation: 0,
            pending: None,
        }
    }

    /// Abort the timer and invalidate anything it already queued.
    fn cancel_pending(&mut self) -> bool {
        self.generation = self.generation.wrapping_add(1);
        match self.pending.take() {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }
}

/// Bounded, delayed re-requests of positions for one device.
///
/// Each re-request is a spawned timer task; its abort handle is kept on the
/// terminal's entry so a newer request can cancel it. Scheduling needs a
/// running Tokio runtime.
#[derive(Debug)]
pub struct RetryController {
    device: DeviceId,
    policy: RetryPolicy,
    requests: mpsc::UnboundedSender<PositionRequest>,
    entries: HashMap<String, RetryEntry>,
}

impl RetryController {
    pub fn new(
        device: DeviceId,
        policy: RetryPolicy,
        requests: mpsc::UnboundedSender<PositionRequest>,
    ) -> Self {
        Self {
            device,
            policy,
            requests,
            entries: HashMap::new(),
        }
    }

    /// A user asked for a fresh position. Cancels any scheduled re-request
    /// and starts a new cycle.
    pub fn begin_request(&mut self, issi: &str) {
        let entry = self.entry(issi);
        if entry.cancel_pending() {
            debug!("cancelled scheduled position retry for {issi}");
        }
        entry.retries = 0;
        entry.state = RetryState::Requested;
    }

    /// A position with both coordinates arrived.
    pub fn complete(&mut self, issi: &str) {
        if let Some(entry) = self.entries.get_mut(issi) {
            entry.cancel_pending();
            entry.retries = 0;
            entry.state = RetryState::Idle;
        }
    }

    /// A position arrived without longitude (or could not be decoded).
    pub fn partial(&mut self, issi: &str) -> RetryOutcome {
        let device = self.device;
        let policy = self.policy;
        let requests = self.requests.clone();
        let entry = self.entry(issi);

        if entry.state == RetryState::Exhausted || entry.retries >= policy.max_retries {
            entry.cancel_pending();
            entry.state = RetryState::Exhausted;
            warn!(
                "no complete position from {issi} after {} attempts",
                entry.retries.saturating_add(1)
            );
            return RetryOutcome::Exhausted;
        }

        entry.retries = entry.retries.saturating_add(1);
        entry.state = RetryState::PartialReceived;
        let attempt = entry.retries.saturating_add(1);
        info!(
            "incomplete position from {issi}, retrying (attempt {attempt}/{})",
            policy.max_retries.saturating_add(1)
        );

        entry.cancel_pending();
        let request = PositionRequest {
            device,
            issi: issi.to_string(),
            attempt,
            generation: entry.generation,
        };
        entry.pending = schedule(requests, request, policy.delay);
        RetryOutcome::Scheduled { attempt }
    }

    /// Whether a queued re-request is still the current one for its terminal.
    ///
    /// A request is stale once a user request, a complete fix, a newer
    /// partial or a cancel touched the entry after it was scheduled. Accepting
    /// a request clears the entry's timer handle.
    pub fn accept(&mut self, request: &PositionRequest) -> bool {
        let Some(entry) = self.entries.get_mut(&request.issi) else {
            return false;
        };
        if entry.state != RetryState::PartialReceived || entry.generation != request.generation {
            debug!(
                "dropping stale position retry for {} (attempt {})",
                request.issi, request.attempt
            );
            return false;
        }
        entry.pending = None;
        true
    }

    /// Cancel any scheduled re-request and forget the terminal.
    pub fn cancel(&mut self, issi: &str) {
        if let Some(mut entry) = self.entries.remove(issi) {
            entry.cancel_pending();
        }
    }

    pub fn state(&self, issi: &str) -> RetryState {
        self.entries
            .get(issi)
            .map_or(RetryState::Idle, |entry| entry.state)
    }

    /// Re-requests issued in the current cycle.
    pub fn retries(&self, issi: &str) -> u8 {
        self.entries.get(issi).map_or(0, |entry| entry.retries)
    }

    fn entry(&mut self, issi: &str) -> &mut RetryEntry {
        self.entries
            .entry(issi.to_string())
            .or_insert_with(RetryEntry::new)
    }
}

impl Drop for RetryController {
    fn drop(&mut self) {
        for entry in self.entries.values_mut() {
            entry.cancel_pending();
        }
    }
}

fn schedule(
    requests: mpsc::UnboundedSender<PositionRequest>,
    request: PositionRequest,
    delay: Duration,
) -> Option<AbortHandle> {
    match tokio::runtime::Handle::try_current() {
        Ok(runtime) => {
            let task = runtime.spawn(async move {
                tokio::time::sleep(delay).await;
                let _ = requests.send(request);
            });
            Some(task.abort_handle())
        }
        Err(_) => {
            warn!("no async runtime, sending position retry without delay");
            let _ = requests.send(request);
            None
        }
    }
}
