//! Shared types for the scripting subsystem: host ids, script argument
//! values, the error taxonomy, and the collaborator traits the core talks to.

use mlua::{Lua, Value};
use thiserror::Error;

/// Opaque id for registered script hosts.
pub type HostId = u64;

/// Configuration keys read and written around script load operations.
pub mod config_keys {
    /// Path of the most recently loaded script file.
    pub const LAST_SCRIPT_PATH: &str = "scripting.last_script_path";
    /// Whether the surrounding UI should offer the native file dialog.
    pub const USE_NATIVE_FILE_DIALOG: &str = "scripting.use_native_file_dialog";
}

/// Error taxonomy for script hosting.
///
/// Every variant is recovered locally within the host or dispatcher and
/// surfaced through the [`LogSink`]; none of them propagate as a crash of
/// the emulation thread or of sibling hosts.
#[derive(Debug, Error)]
pub enum ScriptError {
    /// The script failed to parse or evaluate at load time. The host stays
    /// not-running and nothing is subscribed.
    #[error("script evaluation failed: {0}")]
    Eval(String),
    /// An invoked entry point does not exist in the script's global scope.
    #[error("no function exists: {0}")]
    NotFound(String),
    /// The script raised an error during an invoked call. Host state is
    /// unchanged.
    #[error("script call failed: {0}")]
    Runtime(String),
    /// The script misused a bridge capability. The host has been forced
    /// not-running and in-flight execution interrupted.
    #[error("script fault: {0}")]
    Fault(String),
    /// A lifecycle callback raised an error. The host keeps running and the
    /// dispatch pass continues for other hosts.
    #[error("script callback failed: {0}")]
    Callback(String),
    /// The script file could not be read.
    #[error("failed to read script {path}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    /// The embedded runtime could not be built or driven.
    #[error("script engine error: {0}")]
    Engine(String),
}

/// Positional argument passed to a script entry point via
/// [`ScriptHost::invoke`](crate::ScriptHost::invoke).
#[derive(Clone, Debug, PartialEq)]
pub enum ScriptArg {
    Nil,
    Bool(bool),
    Int(i64),
    Number(f64),
    Str(String),
}

impl ScriptArg {
    pub(crate) fn to_lua<'lua>(&self, lua: &'lua Lua) -> mlua::Result<Value<'lua>> {
        Ok(match self {
            Self::Nil => Value::Nil,
            Self::Bool(value) => Value::Boolean(*value),
            Self::Int(value) => Value::Integer(*value),
            Self::Number(value) => Value::Number(*value),
            Self::Str(value) => Value::String(lua.create_string(value)?),
        })
    }
}

impl From<bool> for ScriptArg {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for ScriptArg {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<f64> for ScriptArg {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<&str> for ScriptArg {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

impl From<String> for ScriptArg {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

/// One-way sink for script-visible output: evaluation and runtime error
/// text, plus explicit `print` calls. Fire-and-forget, no acknowledgment.
pub trait LogSink: Send + Sync + 'static {
    fn emit(&self, text: &str);
}

/// Key-value store for the persisted settings touched around load
/// operations. See [`config_keys`].
pub trait ConfigStore: Send + Sync + 'static {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str);
}

/// The emulation thread's end-of-frame producer.
///
/// The registry calls `connect` when the first host subscribes to frame
/// events and `disconnect` when the last one leaves, so the producer can
/// skip the cross-thread call entirely while no script cares. Once
/// connected, the producer is expected to call
/// [`HostRegistry::dispatch_frame_finished`](crate::HostRegistry::dispatch_frame_finished)
/// at the end of every frame and block until it returns. Implementations
/// must not re-enter the registry from `connect` or `disconnect`.
pub trait FrameEventSource: Send + Sync + 'static {
    fn connect(&self);
    fn disconnect(&self);
}

/// Frame source for setups with no frame producer (tests, headless tools).
#[derive(Clone, Copy, Debug, Default)]
pub struct NullFrameEventSource;

impl FrameEventSource for NullFrameEventSource {
    fn connect(&self) {}

    fn disconnect(&self) {}
}
