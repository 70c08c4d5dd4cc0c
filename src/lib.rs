//! Script automation host for the Ferricom NES emulator.
//!
//! User-authored Lua scripts observe and drive emulation (pause, reset,
//! speed control, frame-by-frame hooks) while the emulator's frame loop
//! keeps running on its own thread. This crate owns the script-host
//! lifecycle, the registry of live hosts, the frame-event subscription and
//! dispatch protocol, and the capability surface exposed to scripts; the
//! emulation core itself stays behind the [`EmulatorCore`] seam.
//!
//! At the end of every frame the emulation thread calls
//! [`HostRegistry::dispatch_frame_finished`] and blocks until every
//! subscribed script's `onFrameFinish` has returned: scripts observe frames
//! in increasing order with no skips and no overlap, at the cost of the
//! frame loop stalling while they run. All script execution, from either
//! thread, is serialized through the recursive process-wide
//! [`EmulationLock`].

mod bridge;
mod dispatcher;
mod host;
mod lock;
mod types;

pub use bridge::{EmulationSpeed, EmulatorBridge, EmulatorCore};
pub use dispatcher::HostRegistry;
pub use host::ScriptHost;
pub use lock::{EmulationLock, EmulationLockGuard};
pub use types::{
    ConfigStore, FrameEventSource, HostId, LogSink, NullFrameEventSource, ScriptArg, ScriptError,
    config_keys,
};
