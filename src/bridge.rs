//! The fixed capability surface scripts may use to affect the emulator.
//!
//! [`EmulatorCore`] is the narrow seam to the emulation core, which is not
//! specified here. [`EmulatorBridge`] is a stateless facade over it that
//! validates input before delegating. `register_api` publishes the bridge
//! into a Lua runtime under the `emu` namespace; that fixed table is the
//! only way a script can reach emulator state.

use crate::dispatcher::HostRegistry;
use crate::host::HostShared;
use crate::types::{HostId, ScriptError};
use mlua::{Lua, Value, Variadic};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Arc, Weak};

/// Emulation speed selected by `emu.speedMode`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EmulationSpeed {
    Normal,
    /// Frame throttling disabled (`"nothrottle"` or `"turbo"`).
    Turbo,
    Maximum,
}

impl FromStr for EmulationSpeed {
    type Err = ScriptError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mode = s.trim();
        if mode.eq_ignore_ascii_case("normal") {
            Ok(Self::Normal)
        } else if mode.eq_ignore_ascii_case("nothrottle") || mode.eq_ignore_ascii_case("turbo") {
            Ok(Self::Turbo)
        } else if mode.eq_ignore_ascii_case("maximum") {
            Ok(Self::Maximum)
        } else {
            Err(ScriptError::Fault(format!(
                "invalid mode argument \"{s}\" to emu.speedMode"
            )))
        }
    }
}

/// Interface to the emulation core.
///
/// Implementations live with the emulator itself; the scripting subsystem
/// only ever calls through this trait, and only while the emulation lock is
/// held.
pub trait EmulatorCore: Send + Sync + 'static {
    /// Power-cycle the console (hard reset).
    fn power_on(&self);
    fn soft_reset(&self);
    fn set_paused(&self, paused: bool);
    fn paused(&self) -> bool;
    fn frame_count(&self) -> u32;
    fn lag_count(&self) -> u32;
    fn lagged(&self) -> bool;
    fn set_lag_flag(&self, lagged: bool);
    /// Whether a ROM is loaded and emulation is live.
    fn emulating(&self) -> bool;
    /// Show a transient message in the emulator's video output.
    fn display_message(&self, message: &str);
    fn set_speed(&self, speed: EmulationSpeed);
    /// Returns false if the ROM could not be loaded.
    fn load_rom(&self, path: &Path) -> bool;
    fn install_directory(&self) -> PathBuf;
}

/// Stateless facade translating the named script capabilities into calls on
/// the emulation core.
///
/// The dispatcher and `ScriptHost::invoke` already run under the emulation
/// lock; any other caller must hold it before touching the bridge.
pub struct EmulatorBridge {
    core: Arc<dyn EmulatorCore>,
}

impl EmulatorBridge {
    pub fn new(core: Arc<dyn EmulatorCore>) -> Self {
        Self { core }
    }

    pub fn power_on(&self) {
        self.core.power_on();
    }

    pub fn soft_reset(&self) {
        self.core.soft_reset();
    }

    pub fn pause(&self) {
        self.core.set_paused(true);
    }

    pub fn unpause(&self) {
        self.core.set_paused(false);
    }

    pub fn paused(&self) -> bool {
        self.core.paused()
    }

    pub fn frame_count(&self) -> u32 {
        self.core.frame_count()
    }

    pub fn lag_count(&self) -> u32 {
        self.core.lag_count()
    }

    pub fn lagged(&self) -> bool {
        self.core.lagged()
    }

    pub fn set_lag_flag(&self, lagged: bool) {
        self.core.set_lag_flag(lagged);
    }

    pub fn emulating(&self) -> bool {
        self.core.emulating()
    }

    pub fn display_message(&self, message: &str) {
        self.core.display_message(message);
    }

    pub fn set_speed(&self, speed: EmulationSpeed) {
        self.core.set_speed(speed);
    }

    /// Parse and apply a speed-mode string. Unknown modes are a typed fault,
    /// never silently ignored.
    pub fn set_speed_mode(&self, mode: &str) -> Result<(), ScriptError> {
        let speed = mode.parse::<EmulationSpeed>()?;
        self.core.set_speed(speed);
        Ok(())
    }

    pub fn load_rom(&self, path: &Path) -> bool {
        self.core.load_rom(path)
    }

    pub fn install_directory(&self) -> PathBuf {
        self.core.install_directory()
    }
}

/// Everything a Lua binding needs: the bridge to delegate to, the host
/// flags for faults and interrupts, and the registry for subscription
/// bookkeeping when a fault halts the host.
#[derive(Clone)]
pub(crate) struct BindingContext {
    pub(crate) bridge: Arc<EmulatorBridge>,
    pub(crate) shared: Arc<HostShared>,
    pub(crate) registry: Weak<HostRegistry>,
    pub(crate) host: HostId,
}

impl BindingContext {
    /// Cooperative interruption checkpoint. Every binding passes through
    /// here, so a raised script error unwinds in-flight execution at the
    /// next bridge call.
    fn checkpoint(&self) -> mlua::Result<()> {
        if self.shared.interrupted() {
            Err(mlua::Error::RuntimeError(
                "script execution interrupted".to_string(),
            ))
        } else {
            Ok(())
        }
    }

    /// Script-triggered fault: force the host not-running, log the message,
    /// request interruption, and unwind the current call.
    fn fault(&self, message: &str) -> mlua::Error {
        self.shared.raise(message);
        if let Some(registry) = self.registry.upgrade() {
            registry.unsubscribe(self.host);
        }
        mlua::Error::RuntimeError(message.to_string())
    }
}

/// Install the `emu` capability table into a runtime and redirect the global
/// `print` to the host's log sink.
pub(crate) fn register_api(lua: &Lua, ctx: &BindingContext) -> mlua::Result<()> {
    let globals = lua.globals();
    let emu = lua.create_table()?;

    let c = ctx.clone();
    let print_fn = lua.create_function(move |_, args: Variadic<Value>| {
        c.checkpoint()?;
        let line = args
            .iter()
            .map(describe_value)
            .collect::<Vec<_>>()
            .join("\t");
        c.shared.emit(&line);
        Ok(())
    })?;
    emu.set("print", print_fn.clone())?;
    globals.set("print", print_fn)?;

    let c = ctx.clone();
    emu.set(
        "powerOn",
        lua.create_function(move |_, ()| {
            c.checkpoint()?;
            c.bridge.power_on();
            Ok(())
        })?,
    )?;

    let c = ctx.clone();
    emu.set(
        "softReset",
        lua.create_function(move |_, ()| {
            c.checkpoint()?;
            c.bridge.soft_reset();
            Ok(())
        })?,
    )?;

    let c = ctx.clone();
    emu.set(
        "pause",
        lua.create_function(move |_, ()| {
            c.checkpoint()?;
            c.bridge.pause();
            Ok(())
        })?,
    )?;

    let c = ctx.clone();
    emu.set(
        "unpause",
        lua.create_function(move |_, ()| {
            c.checkpoint()?;
            c.bridge.unpause();
            Ok(())
        })?,
    )?;

    let c = ctx.clone();
    emu.set(
        "paused",
        lua.create_function(move |_, ()| {
            c.checkpoint()?;
            Ok(c.bridge.paused())
        })?,
    )?;

    let c = ctx.clone();
    emu.set(
        "framecount",
        lua.create_function(move |_, ()| {
            c.checkpoint()?;
            Ok(c.bridge.frame_count())
        })?,
    )?;

    let c = ctx.clone();
    emu.set(
        "lagcount",
        lua.create_function(move |_, ()| {
            c.checkpoint()?;
            Ok(c.bridge.lag_count())
        })?,
    )?;

    let c = ctx.clone();
    emu.set(
        "lagged",
        lua.create_function(move |_, ()| {
            c.checkpoint()?;
            Ok(c.bridge.lagged())
        })?,
    )?;

    let c = ctx.clone();
    emu.set(
        "setlagflag",
        lua.create_function(move |_, lagged: bool| {
            c.checkpoint()?;
            c.bridge.set_lag_flag(lagged);
            Ok(())
        })?,
    )?;

    let c = ctx.clone();
    emu.set(
        "emulating",
        lua.create_function(move |_, ()| {
            c.checkpoint()?;
            Ok(c.bridge.emulating())
        })?,
    )?;

    let c = ctx.clone();
    emu.set(
        "message",
        lua.create_function(move |_, message: String| {
            c.checkpoint()?;
            c.bridge.display_message(&message);
            Ok(())
        })?,
    )?;

    let c = ctx.clone();
    emu.set(
        "speedMode",
        lua.create_function(move |_, mode: String| {
            c.checkpoint()?;
            match c.bridge.set_speed_mode(&mode) {
                Ok(()) => Ok(()),
                Err(err) => Err(c.fault(&err.to_string())),
            }
        })?,
    )?;

    let c = ctx.clone();
    emu.set(
        "loadRom",
        lua.create_function(move |_, path: String| {
            c.checkpoint()?;
            Ok(c.bridge.load_rom(Path::new(&path)))
        })?,
    )?;

    let c = ctx.clone();
    emu.set(
        "getDir",
        lua.create_function(move |_, ()| {
            c.checkpoint()?;
            Ok(c.bridge.install_directory().to_string_lossy().into_owned())
        })?,
    )?;

    globals.set("emu", emu)?;
    Ok(())
}

fn describe_value(value: &Value) -> String {
    match value {
        Value::Nil => "nil".to_string(),
        Value::Boolean(b) => b.to_string(),
        Value::Integer(i) => i.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(text) => text.to_string_lossy().into_owned(),
        other => format!("<{}>", other.type_name()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};

    #[derive(Default)]
    struct MockCore {
        power_ons: AtomicUsize,
        soft_resets: AtomicUsize,
        paused: AtomicBool,
        frame: AtomicU32,
        lag: AtomicU32,
        lag_flag: AtomicBool,
        speed: Mutex<Option<EmulationSpeed>>,
        messages: Mutex<Vec<String>>,
    }

    impl EmulatorCore for MockCore {
        fn power_on(&self) {
            self.power_ons.fetch_add(1, Ordering::SeqCst);
        }

        fn soft_reset(&self) {
            self.soft_resets.fetch_add(1, Ordering::SeqCst);
        }

        fn set_paused(&self, paused: bool) {
            self.paused.store(paused, Ordering::SeqCst);
        }

        fn paused(&self) -> bool {
            self.paused.load(Ordering::SeqCst)
        }

        fn frame_count(&self) -> u32 {
            self.frame.load(Ordering::SeqCst)
        }

        fn lag_count(&self) -> u32 {
            self.lag.load(Ordering::SeqCst)
        }

        fn lagged(&self) -> bool {
            self.lag_flag.load(Ordering::SeqCst)
        }

        fn set_lag_flag(&self, lagged: bool) {
            self.lag_flag.store(lagged, Ordering::SeqCst);
        }

        fn emulating(&self) -> bool {
            true
        }

        fn display_message(&self, message: &str) {
            self.messages.lock().unwrap().push(message.to_string());
        }

        fn set_speed(&self, speed: EmulationSpeed) {
            *self.speed.lock().unwrap() = Some(speed);
        }

        fn load_rom(&self, path: &Path) -> bool {
            path.extension().is_some_and(|ext| ext == "nes")
        }

        fn install_directory(&self) -> PathBuf {
            PathBuf::from("/opt/ferricom")
        }
    }

    #[test]
    fn speed_mode_strings_parse_case_insensitively() {
        assert_eq!("normal".parse::<EmulationSpeed>().unwrap(), EmulationSpeed::Normal);
        assert_eq!("Normal".parse::<EmulationSpeed>().unwrap(), EmulationSpeed::Normal);
        assert_eq!("turbo".parse::<EmulationSpeed>().unwrap(), EmulationSpeed::Turbo);
        assert_eq!("NoThrottle".parse::<EmulationSpeed>().unwrap(), EmulationSpeed::Turbo);
        assert_eq!("MAXIMUM".parse::<EmulationSpeed>().unwrap(), EmulationSpeed::Maximum);
    }

    #[test]
    fn unknown_speed_mode_is_a_fault() {
        let err = "bogus".parse::<EmulationSpeed>().unwrap_err();
        assert!(matches!(err, ScriptError::Fault(_)));
        assert!(err.to_string().contains("bogus"));
    }

    #[test]
    fn bridge_delegates_to_the_core() {
        let core = Arc::new(MockCore::default());
        let bridge = EmulatorBridge::new(core.clone());

        bridge.power_on();
        bridge.soft_reset();
        bridge.pause();
        assert!(bridge.paused());
        bridge.unpause();
        assert!(!bridge.paused());
        bridge.set_lag_flag(true);
        assert!(bridge.lagged());
        bridge.display_message("hello");

        assert_eq!(core.power_ons.load(Ordering::SeqCst), 1);
        assert_eq!(core.soft_resets.load(Ordering::SeqCst), 1);
        assert_eq!(core.messages.lock().unwrap().as_slice(), ["hello"]);
    }

    #[test]
    fn set_speed_mode_validates_before_delegating() {
        let core = Arc::new(MockCore::default());
        let bridge = EmulatorBridge::new(core.clone());

        bridge.set_speed_mode("maximum").unwrap();
        assert_eq!(*core.speed.lock().unwrap(), Some(EmulationSpeed::Maximum));

        let err = bridge.set_speed_mode("warp9").unwrap_err();
        assert!(matches!(err, ScriptError::Fault(_)));
        // The rejected mode must not have touched the core.
        assert_eq!(*core.speed.lock().unwrap(), Some(EmulationSpeed::Maximum));
    }

    #[test]
    fn load_rom_reports_core_success() {
        let bridge = EmulatorBridge::new(Arc::new(MockCore::default()));
        assert!(bridge.load_rom(Path::new("games/smb.nes")));
        assert!(!bridge.load_rom(Path::new("games/smb.zip")));
    }
}
