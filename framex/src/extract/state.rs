use std::fmt;
use std::time::Duration;

use log::info;
use tokio_util::sync::CancellationToken;

use super::process::ProcessGroup;

/// Why an extraction stopped producing frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    EndOfStream,
    FrameCap,
    Disconnected,
    Cancelled,
    Failed,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StopReason::EndOfStream => "end of stream",
            StopReason::FrameCap => "frame cap reached",
            StopReason::Disconnected => "client disconnected",
            StopReason::Cancelled => "cancelled",
            StopReason::Failed => "failed",
        };
        f.write_str(s)
    }
}

/**
    Per-request lifecycle: how many frames went out, whether the pipeline
    was stopped and why, and the processes to tear down.

    The first call to `stop` wins. It fires the cancellation token and kills
    every tracked process; later calls keep the original reason.
*/
pub struct PipelineState {
    id: String,
    max_frames: u32,
    emitted: u32,
    cancel: CancellationToken,
    stop_reason: Option<StopReason>,
    processes: ProcessGroup,
}

impl PipelineState {
    pub fn new(id: impl Into<String>, max_frames: u32, cancel: CancellationToken) -> Self {
        let id = id.into();
        Self {
            processes: ProcessGroup::new(id.clone()),
            id,
            max_frames,
            emitted: 0,
            cancel,
            stop_reason: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn max_frames(&self) -> u32 {
        self.max_frames
    }

    /// Count one emitted frame. Returns true once the cap is reached.
    pub fn record_frame(&mut self) -> bool {
        self.emitted = self.emitted.saturating_add(1);
        self.emitted >= self.max_frames
    }

    pub fn emitted(&self) -> u32 {
        self.emitted
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn stop(&mut self, reason: StopReason) {
        if self.stop_reason.is_some() {
            return;
        }
        info!("[pipeline:{}] stopping: {}", self.id, reason);
        self.stop_reason = Some(reason);
        self.cancel.cancel();
        self.processes.terminate();
    }

    pub fn is_stopped(&self) -> bool {
        self.stop_reason.is_some()
    }

    pub fn stop_reason(&self) -> Option<StopReason> {
        self.stop_reason
    }

    pub fn processes(&mut self) -> &mut ProcessGroup {
        &mut self.processes
    }

    /// Kill and reap everything that is still running.
    pub async fn teardown(&mut self, grace: Duration) {
        self.processes.shutdown(grace).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_frame_reports_cap() {
        let mut state = PipelineState::new("t", 2, CancellationToken::new());
        assert!(!state.record_frame());
        assert!(state.record_frame());
        assert_eq!(state.emitted(), 2);
    }

    #[test]
    fn test_first_stop_reason_wins() {
        let cancel = CancellationToken::new();
        let mut state = PipelineState::new("t", 10, cancel.clone());
        assert!(!state.is_stopped());

        state.stop(StopReason::Disconnected);
        state.stop(StopReason::EndOfStream);

        assert_eq!(state.stop_reason(), Some(StopReason::Disconnected));
        assert!(cancel.is_cancelled());
        assert!(state.processes().is_terminated());
    }

    #[test]
    fn test_parent_cancellation_reaches_child_token() {
        let root = CancellationToken::new();
        let state = PipelineState::new("t", 10, root.child_token());
        root.cancel();
        assert!(state.cancel_token().is_cancelled());
    }
}
