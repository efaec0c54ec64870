use std::{sync::Mutex, time::Duration};

use crate::process::{call_with_timeout, run_tool};
use crate::PlatformError;

pub const READ_TIMEOUT: Duration = Duration::from_secs(2);

/// Access to the OS clipboard and primary selection.
///
/// Reads return `None` when nothing is there or the mechanism failed; callers
/// treat both as "no input". Failures are logged where they happen.
pub trait ClipboardBridge: Send + Sync {
    /// Currently highlighted text, trimmed.
    fn read_primary_selection(&self) -> Option<String>;

    /// Clipboard content exactly as stored, for snapshot and restore.
    fn read_clipboard_raw(&self) -> Option<String>;

    fn write_clipboard(&self, text: &str) -> Result<(), PlatformError>;

    /// Clipboard content trimmed for use as model input.
    fn read_clipboard(&self) -> Option<String> {
        trimmed_non_empty(self.read_clipboard_raw())
    }
}

pub fn trimmed_non_empty(raw: Option<String>) -> Option<String> {
    raw.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

/// Writes `new_text`, runs `action`, then puts the previous clipboard back.
///
/// A failed write aborts before `action` runs. Restoring is best-effort: an
/// empty snapshot is not restored, and a failed restore is only logged.
pub fn with_clipboard_preserved<T>(
    bridge: &dyn ClipboardBridge,
    new_text: &str,
    action: impl FnOnce() -> T,
) -> Result<T, PlatformError> {
    let snapshot = bridge.read_clipboard_raw().filter(|s| !s.is_empty());
    tracing::debug!(
        saved_chars = snapshot.as_deref().map(|s| s.chars().count()).unwrap_or(0),
        "saved current clipboard"
    );

    bridge.write_clipboard(new_text)?;
    let out = action();

    match snapshot {
        Some(previous) => match bridge.write_clipboard(&previous) {
            Ok(()) => tracing::debug!("original clipboard restored"),
            Err(e) => tracing::warn!("could not restore original clipboard: {e}"),
        },
        None => tracing::debug!("clipboard was empty before, nothing to restore"),
    }
    Ok(out)
}

/// In-process clipboard through `arboard`.
///
/// One `arboard::Clipboard` is kept for writes: on X11 the written text is
/// served by this process and disappears once the last handle is dropped.
pub struct NativeClipboard {
    owner: Mutex<Option<arboard::Clipboard>>,
    timeout: Duration,
}

impl Default for NativeClipboard {
    fn default() -> Self {
        Self::new()
    }
}

impl NativeClipboard {
    pub fn new() -> Self {
        Self {
            owner: Mutex::new(None),
            timeout: READ_TIMEOUT,
        }
    }

    fn read_with<F>(&self, name: &str, f: F) -> Option<String>
    where
        F: FnOnce() -> Result<String, String> + Send + 'static,
    {
        match call_with_timeout(name, self.timeout, f) {
            Ok(Ok(text)) => Some(text),
            Ok(Err(e)) => {
                tracing::debug!("{name}: {e}");
                None
            }
            Err(e) => {
                tracing::warn!("{name}: {e}");
                None
            }
        }
    }
}

#[cfg(all(unix, not(any(target_os = "macos", target_os = "android", target_os = "emscripten"))))]
fn native_primary_text() -> Result<String, String> {
    use arboard::{GetExtLinux, LinuxClipboardKind};
    let mut cb = arboard::Clipboard::new().map_err(|e| format!("clipboard init failed: {e}"))?;
    cb.get()
        .clipboard(LinuxClipboardKind::Primary)
        .text()
        .map_err(|e| format!("primary selection read failed: {e}"))
}

#[cfg(not(all(unix, not(any(target_os = "macos", target_os = "android", target_os = "emscripten")))))]
fn native_primary_text() -> Result<String, String> {
    Err("primary selection is only available on Linux/BSD".to_string())
}

impl ClipboardBridge for NativeClipboard {
    fn read_primary_selection(&self) -> Option<String> {
        trimmed_non_empty(self.read_with("primary-read", native_primary_text))
    }

    fn read_clipboard_raw(&self) -> Option<String> {
        self.read_with("clipboard-read", || {
            let mut cb =
                arboard::Clipboard::new().map_err(|e| format!("clipboard init failed: {e}"))?;
            cb.get_text()
                .map_err(|e| format!("clipboard read failed: {e}"))
        })
    }

    fn write_clipboard(&self, text: &str) -> Result<(), PlatformError> {
        let mut owner = self.owner.lock().unwrap_or_else(|e| e.into_inner());
        if owner.is_none() {
            let cb = arboard::Clipboard::new().map_err(|e| {
                PlatformError::new(
                    "E_CLIPBOARD_UNAVAILABLE",
                    format!("clipboard init failed: {e}"),
                )
            })?;
            *owner = Some(cb);
        }
        let cb = owner.as_mut().ok_or_else(|| {
            PlatformError::new("E_CLIPBOARD_UNAVAILABLE", "clipboard handle missing")
        })?;
        cb.set_text(text.to_string()).map_err(|e| {
            PlatformError::new(
                "E_CLIPBOARD_WRITE_FAILED",
                format!("clipboard write failed: {e}"),
            )
        })
    }
}

/// Clipboard through the `xclip` command-line tool (X11).
pub struct XclipClipboard {
    program: String,
    timeout: Duration,
}

impl Default for XclipClipboard {
    fn default() -> Self {
        Self::new()
    }
}

impl XclipClipboard {
    pub fn new() -> Self {
        Self::with_program("xclip")
    }

    pub fn with_program(program: &str) -> Self {
        Self {
            program: program.to_string(),
            timeout: READ_TIMEOUT,
        }
    }

    fn read_selection(&self, selection: &str) -> Option<String> {
        match run_tool(
            &self.program,
            &["-selection", selection, "-o"],
            None,
            true,
            self.timeout,
        ) {
            Ok(out) if out.status.success() => Some(out.stdout),
            Ok(out) => {
                // xclip exits non-zero when the selection is empty or unowned.
                tracing::debug!("xclip {selection} read exited with {}", out.status);
                None
            }
            Err(e) => {
                tracing::warn!("xclip {selection} read failed: {e}");
                None
            }
        }
    }
}

impl ClipboardBridge for XclipClipboard {
    fn read_primary_selection(&self) -> Option<String> {
        trimmed_non_empty(self.read_selection("primary"))
    }

    fn read_clipboard_raw(&self) -> Option<String> {
        self.read_selection("clipboard")
    }

    fn write_clipboard(&self, text: &str) -> Result<(), PlatformError> {
        let out = run_tool(
            &self.program,
            &["-selection", "clipboard"],
            Some(text),
            false,
            self.timeout,
        )?;
        if !out.status.success() {
            return Err(PlatformError::new(
                "E_CLIPBOARD_WRITE_FAILED",
                format!("xclip write exited with {}", out.status),
            ));
        }
        Ok(())
    }
}
