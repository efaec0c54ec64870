pub mod clipboard;
pub mod error;
pub mod hotkey;
pub mod paste;
pub mod process;

use std::sync::Arc;

use rephrase_core::InputBackend;

pub use clipboard::{with_clipboard_preserved, ClipboardBridge, NativeClipboard, XclipClipboard};
pub use error::PlatformError;
pub use hotkey::{HotkeyListener, ListenerHandle};
pub use paste::{NativePaste, PasteSimulator, XdotoolPaste};

/// Clipboard bridge and paste simulator for the configured backend.
pub fn input_backend(backend: InputBackend) -> (Arc<dyn ClipboardBridge>, Arc<dyn PasteSimulator>) {
    match backend {
        InputBackend::Native => (
            Arc::new(NativeClipboard::new()),
            Arc::new(NativePaste::new()),
        ),
        InputBackend::Xtools => (
            Arc::new(XclipClipboard::new()),
            Arc::new(XdotoolPaste::new()),
        ),
    }
}
