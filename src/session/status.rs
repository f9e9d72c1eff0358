//! Session status surface for the UI layer
//!
//! Publishes the connection state through a watch channel and keeps a
//! bounded rolling log of human-readable events, most recent first.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use tokio::sync::watch;

use super::transport::ConnectionState;

/// Rolling event log capacity
const EVENT_LOG_CAPACITY: usize = 8;

/// A point-in-time view of session status
#[derive(Debug, Clone)]
pub struct StatusSnapshot {
    /// Current connection state
    pub state: ConnectionState,
    /// Recent events, most recent first
    pub events: Vec<String>,
    /// Last error message, if the session has faulted
    pub last_error: Option<String>,
}

/// Observable session status
pub struct StatusFeed {
    state_tx: watch::Sender<ConnectionState>,
    inner: Arc<Mutex<StatusInner>>,
}

struct StatusInner {
    events: VecDeque<String>,
    last_error: Option<String>,
}

impl StatusFeed {
    pub(crate) fn new() -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            state_tx,
            inner: Arc::new(Mutex::new(StatusInner {
                events: VecDeque::with_capacity(EVENT_LOG_CAPACITY),
                last_error: None,
            })),
        }
    }

    /// Subscribe to connection-state changes
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// Current connection state
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    /// Point-in-time snapshot of state, events, and last error
    #[must_use]
    pub fn snapshot(&self) -> StatusSnapshot {
        let inner = self.inner.lock().expect("status lock poisoned");
        StatusSnapshot {
            state: self.state(),
            events: inner.events.iter().cloned().collect(),
            last_error: inner.last_error.clone(),
        }
    }

    pub(crate) fn set_state(&self, state: ConnectionState) {
        // send_replace never fails even with no subscribers
        let previous = self.state_tx.send_replace(state);
        if previous != state {
            tracing::debug!(from = %previous, to = %state, "connection state");
        }
    }

    pub(crate) fn log(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::info!("{message}");

        let mut inner = self.inner.lock().expect("status lock poisoned");
        if inner.events.len() == EVENT_LOG_CAPACITY {
            inner.events.pop_back();
        }
        inner.events.push_front(message);
    }

    pub(crate) fn set_error(&self, message: impl Into<String>) {
        let message = message.into();
        self.log(format!("error: {message}"));
        self.inner.lock().expect("status lock poisoned").last_error = Some(message);
        self.set_state(ConnectionState::Error);
    }

    pub(crate) fn clear_error(&self) {
        self.inner.lock().expect("status lock poisoned").last_error = None;
    }
}
