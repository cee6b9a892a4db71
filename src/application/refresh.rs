use tokio::sync::mpsc;

use crate::domain::SessionId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshReason {
    CaptureFailed,
    InputFailed,
}

impl RefreshReason {
    pub const fn label(self) -> &'static str {
        match self {
            Self::CaptureFailed => "capture_failed",
            Self::InputFailed => "input_failed",
        }
    }
}

/// Raised by the capture scheduler and input router when a session stops answering. Only
/// the orchestrator acts on it, by re-running discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshRequest {
    pub session_id: SessionId,
    pub reason: RefreshReason,
}

pub type RefreshSender = mpsc::UnboundedSender<RefreshRequest>;
pub type RefreshReceiver = mpsc::UnboundedReceiver<RefreshRequest>;

pub fn refresh_channel() -> (RefreshSender, RefreshReceiver) {
    mpsc::unbounded_channel()
}
