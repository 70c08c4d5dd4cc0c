//! One isolated script execution context.
//!
//! A host owns one embedded Lua runtime, the source it evaluated, and the
//! two optional lifecycle callbacks (`onFrameFinish`, `onScriptStop`). The
//! runtime is single-threaded and not re-entrant, so every path that enters
//! it runs under the emulation lock. Callbacks are resolved once at load and
//! held as registry keys rather than looked up on the per-frame path.

use crate::bridge::{BindingContext, EmulatorBridge, register_api};
use crate::dispatcher::HostRegistry;
use crate::lock::EmulationLock;
use crate::types::{ConfigStore, HostId, LogSink, ScriptArg, ScriptError, config_keys};
use mlua::{Function, Lua, RegistryKey, Value};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

/// Host flags shared with the Lua bindings.
///
/// Kept outside the runtime mutex so a binding executing inside the Lua VM
/// can flip them without re-entering the host.
pub(crate) struct HostShared {
    running: AtomicBool,
    interrupted: AtomicBool,
    log: Arc<dyn LogSink>,
}

impl HostShared {
    fn new(log: Arc<dyn LogSink>) -> Self {
        Self {
            running: AtomicBool::new(false),
            interrupted: AtomicBool::new(false),
            log,
        }
    }

    pub(crate) fn emit(&self, text: &str) {
        self.log.emit(text);
    }

    pub(crate) fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub(crate) fn interrupted(&self) -> bool {
        self.interrupted.load(Ordering::SeqCst)
    }

    /// Halt the host: not-running, interruption requested, message logged.
    pub(crate) fn raise(&self, message: &str) {
        self.running.store(false, Ordering::SeqCst);
        self.interrupted.store(true, Ordering::SeqCst);
        self.log.emit(message);
    }
}

struct HostState {
    lua: Lua,
    origin: Option<String>,
    on_frame_finish: Option<RegistryKey>,
    on_script_stop: Option<RegistryKey>,
}

/// One isolated script host. Created through
/// [`HostRegistry::create_host`]; each host's globals and bindings are
/// independent of every other host's.
pub struct ScriptHost {
    id: HostId,
    shared: Arc<HostShared>,
    state: Mutex<HostState>,
    bridge: Arc<EmulatorBridge>,
    lock: EmulationLock,
    registry: Weak<HostRegistry>,
}

impl ScriptHost {
    pub(crate) fn new(
        id: HostId,
        bridge: Arc<EmulatorBridge>,
        lock: EmulationLock,
        registry: Weak<HostRegistry>,
        log: Arc<dyn LogSink>,
    ) -> Result<Self, ScriptError> {
        let shared = Arc::new(HostShared::new(log));
        let lua = build_runtime(&bridge, &shared, &registry, id)?;
        Ok(Self {
            id,
            shared,
            state: Mutex::new(HostState {
                lua,
                origin: None,
                on_frame_finish: None,
                on_script_stop: None,
            }),
            bridge,
            lock,
            registry,
        })
    }

    pub fn id(&self) -> HostId {
        self.id
    }

    /// Whether the most recent load is still live. Collaborators poll this
    /// for hang detection; the core never times a script out on its own.
    pub fn is_running(&self) -> bool {
        self.shared.is_running()
    }

    /// Label the current script was loaded under, if any.
    pub fn origin(&self) -> Option<String> {
        self.state().origin.clone()
    }

    /// Parse and evaluate a script in this host's runtime.
    ///
    /// On success the host is running, the lifecycle callbacks are retained
    /// if callable, and a callable `onFrameFinish` subscribes the host to
    /// frame events. On failure the host stays not-running, nothing is
    /// subscribed, and the error text goes to the log sink.
    pub fn load(&self, source: &str, origin: &str) -> Result<(), ScriptError> {
        let _emu = self.lock.acquire();
        if let Some(registry) = self.registry.upgrade() {
            registry.unsubscribe(self.id);
        }
        self.shared.running.store(false, Ordering::SeqCst);
        self.shared.interrupted.store(false, Ordering::SeqCst);

        let mut state = self.state();
        if let Err(err) = state.lua.load(source).set_name(origin).exec() {
            let text = err.to_string();
            self.shared.emit(&text);
            tracing::debug!(host = self.id, origin, "script evaluation failed");
            return Err(ScriptError::Eval(text));
        }
        state.origin = Some(origin.to_string());
        self.shared.running.store(true, Ordering::SeqCst);

        state.on_frame_finish = retain_callable(&state.lua, "onFrameFinish")?;
        state.on_script_stop = retain_callable(&state.lua, "onScriptStop")?;
        let wants_frames = state.on_frame_finish.is_some();
        drop(state);

        if wants_frames {
            if let Some(registry) = self.registry.upgrade() {
                registry.subscribe(self.id);
            }
        }
        Ok(())
    }

    /// Load a script from disk, recording the path in the persisted config.
    pub fn load_file(&self, path: &Path, config: &dyn ConfigStore) -> Result<(), ScriptError> {
        let origin = path.display().to_string();
        let source = std::fs::read_to_string(path).map_err(|err| ScriptError::Io {
            path: origin.clone(),
            source: err,
        })?;
        config.set(config_keys::LAST_SCRIPT_PATH, &origin);
        self.load(&source, &origin)
    }

    /// Call a user-defined entry point by name with positional arguments.
    ///
    /// A missing function is logged and reported as `NotFound` without
    /// aborting the host. The call itself runs inside the emulation lock; a
    /// Lua error during the call is logged and reported as `Runtime` (or
    /// `Fault`, if the script tripped a bridge fault mid-call) and does not
    /// unset the running flag by itself.
    pub fn invoke(&self, name: &str, args: &[ScriptArg]) -> Result<(), ScriptError> {
        let _emu = self.lock.acquire();
        let state = self.state();

        let func = match state.lua.globals().get::<_, Value>(name) {
            Ok(Value::Function(func)) => func,
            Ok(_) => {
                self.shared.emit(&format!("No function exists: {name}"));
                return Err(ScriptError::NotFound(name.to_string()));
            }
            Err(err) => return Err(ScriptError::Engine(err.to_string())),
        };

        let mut lua_args = Vec::with_capacity(args.len());
        for arg in args {
            let value = arg
                .to_lua(&state.lua)
                .map_err(|err| ScriptError::Engine(err.to_string()))?;
            lua_args.push(value);
        }

        if let Err(err) = func.call::<_, ()>(mlua::MultiValue::from_vec(lua_args)) {
            let text = err.to_string();
            self.shared.emit(&text);
            if self.shared.interrupted() && !self.shared.is_running() {
                return Err(ScriptError::Fault(text));
            }
            return Err(ScriptError::Runtime(text));
        }
        Ok(())
    }

    /// Stop the host: invoke `onScriptStop` if callable, then clear the
    /// running flag and leave the frame fan-out. Idempotent.
    pub fn stop(&self) {
        let _emu = self.lock.acquire();
        if !self.shared.is_running() {
            return;
        }

        let state = self.state();
        if let Some(key) = state.on_script_stop.as_ref() {
            match state.lua.registry_value::<Function>(key) {
                Ok(callback) => {
                    if let Err(err) = callback.call::<_, ()>(()) {
                        self.shared.emit(&err.to_string());
                        tracing::debug!(host = self.id, "onScriptStop callback failed");
                    }
                }
                Err(err) => {
                    tracing::warn!(host = self.id, error = %err, "stale onScriptStop reference");
                }
            }
        }
        drop(state);

        self.shared.running.store(false, Ordering::SeqCst);
        if let Some(registry) = self.registry.upgrade() {
            registry.unsubscribe(self.id);
        }
    }

    /// Discard the runtime and build a fresh isolated one in place.
    ///
    /// Clears both callback references and all script globals; the next load
    /// sees none of the previous script's bindings.
    pub fn reset(&self) -> Result<(), ScriptError> {
        let _emu = self.lock.acquire();
        self.shared.running.store(false, Ordering::SeqCst);
        self.shared.interrupted.store(false, Ordering::SeqCst);
        if let Some(registry) = self.registry.upgrade() {
            registry.unsubscribe(self.id);
        }

        let mut state = self.state();
        state.on_frame_finish = None;
        state.on_script_stop = None;
        state.origin = None;
        state.lua = build_runtime(&self.bridge, &self.shared, &self.registry, self.id)?;
        Ok(())
    }

    /// Halt the host from outside the runtime: forces not-running, logs the
    /// message, and requests cooperative interruption of any in-flight
    /// execution at its next bridge checkpoint.
    pub fn raise_script_error(&self, message: &str) {
        self.shared.raise(message);
        if let Some(registry) = self.registry.upgrade() {
            registry.unsubscribe(self.id);
        }
    }

    /// Frame fan-out entry. Invoked only by the dispatcher, with the
    /// emulation lock already held. Callback failures are logged and never
    /// propagate; a host that is not running is skipped silently.
    pub(crate) fn on_frame_finish(&self) {
        if !self.shared.is_running() {
            return;
        }
        let state = self.state();
        let Some(key) = state.on_frame_finish.as_ref() else {
            return;
        };
        match state.lua.registry_value::<Function>(key) {
            Ok(callback) => {
                if let Err(err) = callback.call::<_, ()>(()) {
                    self.shared.emit(&err.to_string());
                    tracing::debug!(host = self.id, "onFrameFinish callback failed");
                }
            }
            Err(err) => {
                tracing::warn!(host = self.id, error = %err, "stale onFrameFinish reference");
            }
        }
    }

    fn state(&self) -> MutexGuard<'_, HostState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Look up a global by name and retain it iff it is callable.
fn retain_callable(lua: &Lua, name: &str) -> Result<Option<RegistryKey>, ScriptError> {
    match lua.globals().get::<_, Value>(name) {
        Ok(Value::Function(func)) => {
            let key = lua
                .create_registry_value(func)
                .map_err(|err| ScriptError::Engine(err.to_string()))?;
            Ok(Some(key))
        }
        Ok(_) => Ok(None),
        Err(err) => Err(ScriptError::Engine(err.to_string())),
    }
}

fn build_runtime(
    bridge: &Arc<EmulatorBridge>,
    shared: &Arc<HostShared>,
    registry: &Weak<HostRegistry>,
    id: HostId,
) -> Result<Lua, ScriptError> {
    let lua = Lua::new();
    let ctx = BindingContext {
        bridge: bridge.clone(),
        shared: shared.clone(),
        registry: registry.clone(),
        host: id,
    };
    register_api(&lua, &ctx).map_err(|err| ScriptError::Engine(err.to_string()))?;
    Ok(lua)
}
