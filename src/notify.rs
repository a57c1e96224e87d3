//! Fire-and-forget notifications sent after a transition commits.
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaveEvent {
    Submitted,
    Resubmitted,
    Forwarded,
    Approved,
    Rejected,
    Returned,
    Cancelled,
    CancellationRequested,
    CancellationDenied,
    Extended,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub request_id: String,
    pub event: LeaveEvent,
    pub actor_id: String,
    pub recipient_id: String,
}

pub trait Notifier: Send + Sync {
    fn notify(&self, notification: &Notification) -> anyhow::Result<()>;
}

/// Default notifier: records the event in the log stream only.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, notification: &Notification) -> anyhow::Result<()> {
        tracing::info!(
            request_id = %notification.request_id,
            event = ?notification.event,
            recipient = %notification.recipient_id,
            "leave notification"
        );
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<Notification> {
        self.sent
            .lock()
            .map(|sent| sent.clone())
            .unwrap_or_default()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, notification: &Notification) -> anyhow::Result<()> {
        self.sent
            .lock()
            .map_err(|_| anyhow::anyhow!("notification buffer poisoned"))?
            .push(notification.clone());
        Ok(())
    }
}
