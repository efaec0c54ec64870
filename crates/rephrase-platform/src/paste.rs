use std::time::Duration;

use crate::process::{call_with_timeout, run_tool};
use crate::PlatformError;

pub const PASTE_TIMEOUT: Duration = Duration::from_secs(5);

/// Sends a synthetic paste (Ctrl+V) to the focused window.
///
/// Success means the keystroke was issued, not that the target accepted it.
pub trait PasteSimulator: Send + Sync {
    fn simulate_paste(&self) -> Result<(), PlatformError>;
}

/// Ctrl+V through `enigo`.
pub struct NativePaste {
    timeout: Duration,
}

impl Default for NativePaste {
    fn default() -> Self {
        Self::new()
    }
}

impl NativePaste {
    pub fn new() -> Self {
        Self {
            timeout: PASTE_TIMEOUT,
        }
    }
}

fn enigo_ctrl_v() -> Result<(), String> {
    use enigo::{Direction, Enigo, Key, Keyboard, Settings};

    let mut enigo =
        Enigo::new(&Settings::default()).map_err(|e| format!("enigo init failed: {e}"))?;
    enigo
        .key(Key::Control, Direction::Press)
        .map_err(|e| format!("ctrl press failed: {e}"))?;
    let click = enigo
        .key(Key::Unicode('v'), Direction::Click)
        .map_err(|e| format!("v click failed: {e}"));
    // Release ctrl even when the click failed so the modifier never sticks.
    let release = enigo
        .key(Key::Control, Direction::Release)
        .map_err(|e| format!("ctrl release failed: {e}"));
    click.and(release)
}

impl PasteSimulator for NativePaste {
    fn simulate_paste(&self) -> Result<(), PlatformError> {
        match call_with_timeout("paste", self.timeout, enigo_ctrl_v)? {
            Ok(()) => Ok(()),
            Err(e) => Err(PlatformError::new("E_PASTE_FAILED", e)),
        }
    }
}

/// Ctrl+V through the `xdotool` command-line tool (X11).
pub struct XdotoolPaste {
    program: String,
    timeout: Duration,
}

impl Default for XdotoolPaste {
    fn default() -> Self {
        Self::new()
    }
}

impl XdotoolPaste {
    pub fn new() -> Self {
        Self::with_program("xdotool")
    }

    pub fn with_program(program: &str) -> Self {
        Self {
            program: program.to_string(),
            timeout: PASTE_TIMEOUT,
        }
    }
}

impl PasteSimulator for XdotoolPaste {
    fn simulate_paste(&self) -> Result<(), PlatformError> {
        let out = run_tool(&self.program, &["key", "ctrl+v"], None, false, self.timeout)?;
        if !out.status.success() {
            return Err(PlatformError::new(
                "E_PASTE_FAILED",
                format!("xdotool exited with {}", out.status),
            ));
        }
        Ok(())
    }
}
