//! Registry of live script hosts and the per-frame fan-out.
//!
//! The registry owns two ordered lists: every registered host, and the
//! subset currently subscribed to frame events. The emulation thread calls
//! [`HostRegistry::dispatch_frame_finished`] at the end of every frame and
//! blocks until each subscribed host's callback has returned, so no frame
//! N+1 begins while a script is still reacting to frame N. The external
//! [`FrameEventSource`] is connected lazily when the first host subscribes
//! and torn down when the last one leaves.
//!
//! Lock discipline: the emulation lock is always taken before the registry
//! mutex, and the registry mutex is never held across a call into a host.

use crate::bridge::EmulatorBridge;
use crate::host::ScriptHost;
use crate::lock::EmulationLock;
use crate::types::{FrameEventSource, HostId, LogSink, ScriptError};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

struct RegistryState {
    hosts: Vec<Arc<ScriptHost>>,
    frame_subscribed: Vec<Arc<ScriptHost>>,
}

/// Application-owned collection of live script hosts.
///
/// Construct one per emulator instance and keep it alive for the
/// application's lifetime; hosts hold a weak reference back to it for
/// subscription bookkeeping.
pub struct HostRegistry {
    lock: EmulationLock,
    bridge: Arc<EmulatorBridge>,
    frame_source: Arc<dyn FrameEventSource>,
    state: Mutex<RegistryState>,
    next_host_id: AtomicU64,
    dispatch_count: AtomicU64,
}

impl HostRegistry {
    pub fn new(
        bridge: Arc<EmulatorBridge>,
        lock: EmulationLock,
        frame_source: Arc<dyn FrameEventSource>,
    ) -> Arc<Self> {
        Arc::new(Self {
            lock,
            bridge,
            frame_source,
            state: Mutex::new(RegistryState {
                hosts: Vec::new(),
                frame_subscribed: Vec::new(),
            }),
            next_host_id: AtomicU64::new(1),
            dispatch_count: AtomicU64::new(0),
        })
    }

    /// The shared emulation lock. Collaborators making direct bridge calls
    /// outside the dispatch and invoke paths must hold it.
    pub fn emulation_lock(&self) -> EmulationLock {
        self.lock.clone()
    }

    pub fn bridge(&self) -> Arc<EmulatorBridge> {
        self.bridge.clone()
    }

    /// Build a host with a fresh runtime and register it.
    pub fn create_host(
        self: &Arc<Self>,
        log: Arc<dyn LogSink>,
    ) -> Result<Arc<ScriptHost>, ScriptError> {
        let id = self.next_host_id.fetch_add(1, Ordering::Relaxed);
        let host = Arc::new(ScriptHost::new(
            id,
            self.bridge.clone(),
            self.lock.clone(),
            Arc::downgrade(self),
            log,
        )?);
        self.register(&host);
        tracing::debug!(host = id, "script host created");
        Ok(host)
    }

    /// Append a host to the live list. No subscription side effect.
    pub fn register(&self, host: &Arc<ScriptHost>) {
        let _emu = self.lock.acquire();
        let mut state = self.state();
        if state.hosts.iter().any(|h| h.id() == host.id()) {
            return;
        }
        state.hosts.push(host.clone());
    }

    /// Remove a host from the live list and from the frame fan-out,
    /// applying the lazy-disconnect rule.
    pub fn unregister(&self, id: HostId) {
        let _emu = self.lock.acquire();
        let emptied = {
            let mut state = self.state();
            state.hosts.retain(|h| h.id() != id);
            let before = state.frame_subscribed.len();
            state.frame_subscribed.retain(|h| h.id() != id);
            state.frame_subscribed.len() != before && state.frame_subscribed.is_empty()
        };
        if emptied {
            self.frame_source.disconnect();
        }
        tracing::debug!(host = id, "script host unregistered");
    }

    /// Add a registered host to the frame fan-out. The first subscriber
    /// connects the external frame source.
    pub(crate) fn subscribe(&self, id: HostId) {
        let _emu = self.lock.acquire();
        let connected = {
            let mut state = self.state();
            let Some(host) = state.hosts.iter().find(|h| h.id() == id).cloned() else {
                tracing::debug!(host = id, "subscribe for unregistered host ignored");
                return;
            };
            if state.frame_subscribed.iter().any(|h| h.id() == id) {
                return;
            }
            let was_empty = state.frame_subscribed.is_empty();
            state.frame_subscribed.push(host);
            was_empty
        };
        if connected {
            self.frame_source.connect();
        }
    }

    /// Remove a host from the frame fan-out. The last subscriber tears the
    /// external frame source down.
    pub(crate) fn unsubscribe(&self, id: HostId) {
        let _emu = self.lock.acquire();
        let emptied = {
            let mut state = self.state();
            let before = state.frame_subscribed.len();
            state.frame_subscribed.retain(|h| h.id() != id);
            state.frame_subscribed.len() != before && state.frame_subscribed.is_empty()
        };
        if emptied {
            self.frame_source.disconnect();
        }
    }

    /// End-of-frame entry point, called synchronously by the emulation
    /// thread. Acquires the emulation lock exactly once, then invokes each
    /// subscribed host's frame callback in subscription order. Returns only
    /// when every callback has returned.
    pub fn dispatch_frame_finished(&self) {
        let _emu = self.lock.acquire();
        self.dispatch_count.fetch_add(1, Ordering::Relaxed);
        let subscribed = self.state().frame_subscribed.clone();
        tracing::trace!(subscribers = subscribed.len(), "frame dispatch pass");
        for host in &subscribed {
            host.on_frame_finish();
        }
    }

    /// Stop every running host (stop callbacks fire) and clear the
    /// registry. For application shutdown.
    pub fn shutdown(&self) {
        let _emu = self.lock.acquire();
        let hosts = self.state().hosts.clone();
        for host in &hosts {
            host.stop();
        }
        let emptied = {
            let mut state = self.state();
            state.hosts.clear();
            let had_subscribers = !state.frame_subscribed.is_empty();
            state.frame_subscribed.clear();
            had_subscribers
        };
        if emptied {
            self.frame_source.disconnect();
        }
    }

    pub fn host_count(&self) -> usize {
        self.state().hosts.len()
    }

    pub fn frame_subscriber_count(&self) -> usize {
        self.state().frame_subscribed.len()
    }

    pub fn is_subscribed(&self, id: HostId) -> bool {
        self.state().frame_subscribed.iter().any(|h| h.id() == id)
    }

    /// Number of completed dispatch passes since construction.
    pub fn dispatch_count(&self) -> u64 {
        self.dispatch_count.load(Ordering::Relaxed)
    }

    fn state(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
