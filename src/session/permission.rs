//! Microphone permission tracking
//!
//! Queries the host once at construction and then follows its change
//! notifications. A host that cannot be queried leaves the state at
//! `Unknown` for good; that is not an error.

use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::events::SessionEvent;
use crate::host::{PermissionQuery, PermissionState};

pub struct PermissionGate {
    state: PermissionState,
    event_tx: broadcast::Sender<SessionEvent>,
}

impl PermissionGate {
    /// Build the gate and return the change feed, if the host has one
    pub fn new(
        query: Option<&dyn PermissionQuery>,
        event_tx: broadcast::Sender<SessionEvent>,
    ) -> (Self, Option<watch::Receiver<PermissionState>>) {
        let changes = query.and_then(|q| q.microphone());
        let state = match &changes {
            Some(rx) => *rx.borrow(),
            None => {
                info!("permission query unavailable, microphone permission unknown");
                PermissionState::Unknown
            }
        };

        debug!(%state, "initial microphone permission");
        (Self { state, event_tx }, changes)
    }

    pub fn current(&self) -> PermissionState {
        self.state
    }

    /// Record a new state; returns whether it changed
    pub fn update(&mut self, state: PermissionState) -> bool {
        if state == self.state {
            return false;
        }

        info!(from = %self.state, to = %state, "microphone permission changed");
        self.state = state;
        let _ = self
            .event_tx
            .send(SessionEvent::PermissionChanged { permission: state });
        true
    }
}

/// Forward host permission changes to `on_change` until the host drops its
/// sender or `on_change` returns `false`
pub fn forward_changes<F>(mut changes: watch::Receiver<PermissionState>, on_change: F) -> JoinHandle<()>
where
    F: Fn(PermissionState) -> bool + Send + 'static,
{
    tokio::spawn(async move {
        while changes.changed().await.is_ok() {
            let state = *changes.borrow_and_update();
            if !on_change(state) {
                break;
            }
        }
        debug!("permission watcher stopped");
    })
}
