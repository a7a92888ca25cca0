// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2026 nervosys

//! Upstream connection lifecycle signals
//!
//! Clients emit [`LifecycleEvent`]s through a [`Lifecycle`]; the last event
//! also drives a [`ConnectionState`] that the health route reports.
//! [`LifecycleLogger`] is the only built-in subscriber.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

/// Capacity of the event channel; slow subscribers see `Lagged`
const EVENT_CAPACITY: usize = 64;

/// Connection lifecycle signal
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "detail", rename_all = "snake_case")]
pub enum LifecycleEvent {
    Connecting,
    Connected,
    Reconnecting,
    Offline,
    Closed,
    Errored(String),
}

/// Last known state of the upstream connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Idle,
    Connecting,
    Connected,
    Offline,
    Closed,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Offline => write!(f, "offline"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

impl LifecycleEvent {
    /// State this event moves the connection into, if any.
    /// `Errored` keeps the current state; a following `Offline` carries the change.
    fn next_state(&self) -> Option<ConnectionState> {
        match self {
            Self::Connecting | Self::Reconnecting => Some(ConnectionState::Connecting),
            Self::Connected => Some(ConnectionState::Connected),
            Self::Offline => Some(ConnectionState::Offline),
            Self::Closed => Some(ConnectionState::Closed),
            Self::Errored(_) => None,
        }
    }
}

/// Signal source shared by a client and its observers. Cloning shares the channels.
#[derive(Debug, Clone)]
pub struct Lifecycle {
    events: broadcast::Sender<LifecycleEvent>,
    state: watch::Sender<ConnectionState>,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (state, _) = watch::channel(ConnectionState::Idle);
        Self { events, state }
    }

    /// Publish an event and update the connection state
    pub fn emit(&self, event: LifecycleEvent) {
        if let Some(next) = event.next_state() {
            self.state.send_replace(next);
        }
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.events.subscribe()
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Wait until the connection reaches `target`, up to `timeout`.
    ///
    /// Returns `false` on timeout. Nothing in the request path calls this.
    pub async fn wait_for(&self, target: ConnectionState, timeout: Duration) -> bool {
        let mut rx = self.watch_state();
        let wait = async {
            loop {
                if *rx.borrow_and_update() == target {
                    return true;
                }
                if rx.changed().await.is_err() {
                    return false;
                }
            }
        };
        tokio::time::timeout(timeout, wait).await.unwrap_or(false)
    }
}

/// Records lifecycle signals through the `log` facade
pub struct LifecycleLogger;

impl LifecycleLogger {
    /// Subscribe to `lifecycle` and log every event on a background task.
    ///
    /// Must be called before the gateway starts serving so that no signal
    /// emitted by the first requests is missed.
    pub fn attach(lifecycle: &Lifecycle) -> JoinHandle<()> {
        let mut rx = lifecycle.subscribe();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => Self::log_event(&event),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        log::warn!("lifecycle logger lagged, {} events dropped", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    pub fn log_event(event: &LifecycleEvent) {
        match event {
            LifecycleEvent::Connecting => log::debug!("upstream connecting"),
            LifecycleEvent::Connected => log::info!("upstream connection connected"),
            LifecycleEvent::Reconnecting => log::warn!("upstream trying to reconnect"),
            LifecycleEvent::Offline => log::warn!("upstream connection offline"),
            LifecycleEvent::Closed => log::warn!("upstream connection closed"),
            LifecycleEvent::Errored(detail) => log::error!("upstream connection error: {}", detail),
        }
    }
}
