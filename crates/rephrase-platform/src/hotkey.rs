use std::panic::{catch_unwind, AssertUnwindSafe};

use anyhow::{anyhow, Result};
use rdev::{EventType, Key};
use rephrase_core::{ChordDetector, InputKey, Trigger};
use rephrase_observability::Tracer;
use tokio::sync::{mpsc, oneshot};

pub fn map_key(key: Key) -> InputKey {
    match key {
        Key::ControlLeft => InputKey::ControlLeft,
        Key::ControlRight => InputKey::ControlRight,
        Key::Alt => InputKey::AltLeft,
        Key::AltGr => InputKey::AltRight,
        Key::Num0 | Key::Kp0 => InputKey::Char('0'),
        Key::Num1 | Key::Kp1 => InputKey::Char('1'),
        Key::Num2 | Key::Kp2 => InputKey::Char('2'),
        Key::Num3 | Key::Kp3 => InputKey::Char('3'),
        Key::Num4 | Key::Kp4 => InputKey::Char('4'),
        Key::Num5 | Key::Kp5 => InputKey::Char('5'),
        Key::Num6 | Key::Kp6 => InputKey::Char('6'),
        Key::Num7 | Key::Kp7 => InputKey::Char('7'),
        Key::Num8 | Key::Kp8 => InputKey::Char('8'),
        Key::Num9 | Key::Kp9 => InputKey::Char('9'),
        other => InputKey::Other(format!("{other:?}")),
    }
}

/// Feeds OS key events into the chord detector and forwards triggers.
///
/// Lives on the listener thread; the pressed-key state never leaves it.
pub struct KeyEventHandler {
    detector: ChordDetector,
    triggers: mpsc::UnboundedSender<Trigger>,
    tracer: Tracer,
}

impl KeyEventHandler {
    pub fn new(digit: char, triggers: mpsc::UnboundedSender<Trigger>, tracer: Tracer) -> Self {
        Self {
            detector: ChordDetector::new(digit),
            triggers,
            tracer,
        }
    }

    pub fn handle(&mut self, event: &EventType) {
        match event {
            EventType::KeyPress(key) => self.on_press(*key),
            EventType::KeyRelease(key) => self.detector.release(&map_key(*key)),
            _ => {}
        }
    }

    fn on_press(&mut self, key: Key) {
        let input = map_key(key);
        tracing::debug!(key = ?key, "key pressed");
        let trigger = self.detector.press(input);
        tracing::debug!(held = ?self.detector.held_summary(), "currently pressed keys");

        if self.detector.ctrl_held() && self.detector.alt_held() && trigger.is_none() {
            tracing::debug!(
                key = ?key,
                target = %self.detector.digit(),
                "ctrl+alt held, key is not the trigger digit"
            );
        }

        let Some(trigger) = trigger else {
            return;
        };
        tracing::info!("shortcut triggered: Ctrl+Alt+{}", trigger.digit);
        self.tracer.event(
            None,
            "Hotkey",
            "HK.trigger",
            "ok",
            Some(serde_json::json!({"digit": trigger.digit.to_string()})),
        );
        if self.triggers.send(trigger).is_err() {
            tracing::warn!("trigger dropped: dispatcher is gone");
        }
    }

    /// Like `handle`, but a panic is logged instead of unwinding into the OS hook.
    pub fn handle_guarded(&mut self, event: &EventType) {
        self.guarded(event, Self::handle);
    }

    fn guarded<F>(&mut self, event: &EventType, f: F)
    where
        F: FnOnce(&mut Self, &EventType),
    {
        if catch_unwind(AssertUnwindSafe(|| f(self, event))).is_err() {
            tracing::error!("panic while handling key event {event:?}; listener keeps running");
            self.tracer.event(
                None,
                "Hotkey",
                "HK.handle",
                "err",
                Some(serde_json::json!({"code": "E_HK_HANDLER_PANIC"})),
            );
        }
    }
}

/// Reports why the OS listener stopped. It only ever stops on failure.
pub struct ListenerHandle {
    pub failed: oneshot::Receiver<String>,
}

pub struct HotkeyListener;

impl HotkeyListener {
    /// Starts the global key hook on its own thread.
    ///
    /// The hook thread cannot be joined or stopped; it ends with the process.
    pub fn spawn(
        digit: char,
        triggers: mpsc::UnboundedSender<Trigger>,
        tracer: Tracer,
    ) -> Result<ListenerHandle> {
        let (failed_tx, failed_rx) = oneshot::channel();
        let mut handler = KeyEventHandler::new(digit, triggers, tracer.clone());

        std::thread::Builder::new()
            .name("rephrase-hotkey".to_string())
            .spawn(move || {
                let res = rdev::listen(move |event| handler.handle_guarded(&event.event_type));
                let reason = match res {
                    Ok(()) => "key listener returned unexpectedly".to_string(),
                    Err(e) => format!("{e:?}"),
                };
                tracer.event(
                    None,
                    "Hotkey",
                    "HK.listen",
                    "err",
                    Some(serde_json::json!({"code": "E_HK_LISTEN", "error": reason})),
                );
                let _ = failed_tx.send(reason);
            })
            .map_err(|e| anyhow!("E_HK_THREAD_SPAWN: {e}"))?;

        Ok(ListenerHandle { failed: failed_rx })
    }
}
