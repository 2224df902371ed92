use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::gateway::GatewayContext;
use crate::lifecycle::LifecycleState;

/// Options forwarded from the page to the native save dialog.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveDialogOptions {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub directory: Option<String>,
    #[serde(default)]
    pub default_path: Option<String>,
    #[serde(default)]
    pub wildcard: Option<String>,
}

/// Work the gateway hands to the thread that owns native UI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NativeBridgeEvent {
    /// Show a save dialog, then answer with
    /// [`BridgeHandle::enqueue_dialog_result`] for `connection_id`.
    SaveDialog {
        connection_id: u64,
        options: SaveDialogOptions,
    },
    /// The page posted `terminate`; the shell should close its window.
    ClientTerminated,
}

/// The UI shell's side of the gateway.
pub struct BridgeHandle {
    context: Arc<GatewayContext>,
    events: mpsc::UnboundedReceiver<NativeBridgeEvent>,
}

impl BridgeHandle {
    pub(crate) fn new(
        context: Arc<GatewayContext>,
        events: mpsc::UnboundedReceiver<NativeBridgeEvent>,
    ) -> Self {
        Self { context, events }
    }

    /// Queues a dialog outcome (a path, or an empty string on cancel) for
    /// delivery on connection `connection_id`.
    ///
    /// An event-stream `data:` line cannot carry CR or LF, so a path
    /// containing either is delivered as a cancel.
    pub fn enqueue_dialog_result(&self, connection_id: u64, payload: impl Into<String>) {
        let mut payload = payload.into();
        if payload.contains(['\r', '\n']) {
            warn!(connection_id, "save path contains a line break; reporting cancel");
            payload.clear();
        }
        self.context.results.push(connection_id, payload);
    }

    pub fn lifecycle_state(&self) -> LifecycleState {
        self.context.lifecycle.current()
    }

    /// Starts shutdown from the UI side. An embedded view has no browser tab
    /// to notify, so it skips straight to `Stopping`; otherwise the gateway
    /// first tells the tab to close itself.
    pub fn request_shutdown(&self, use_embedded_view: bool) {
        let target = if use_embedded_view {
            LifecycleState::Stopping
        } else {
            LifecycleState::StopFromServer
        };
        let previous = self.context.lifecycle.advance(target);
        info!(from = ?previous, requested = ?target, "shutdown requested by ui shell");
        self.context.results.wake();
    }

    pub fn try_next_event(&mut self) -> Option<NativeBridgeEvent> {
        self.events.try_recv().ok()
    }

    pub async fn next_event(&mut self) -> Option<NativeBridgeEvent> {
        self.events.recv().await
    }

    /// Blocks the calling thread. Must not be called from inside an async
    /// runtime.
    pub fn blocking_next_event(&mut self) -> Option<NativeBridgeEvent> {
        self.events.blocking_recv()
    }

    /// Hands every event queued so far to `handler`; meant to be called once
    /// per UI tick. Returns how many were handled.
    pub fn drain_events(&mut self, mut handler: impl FnMut(&Self, NativeBridgeEvent)) -> usize {
        let mut handled = 0;
        while let Ok(event) = self.events.try_recv() {
            handler(self, event);
            handled += 1;
        }
        handled
    }
}
