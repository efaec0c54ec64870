//! Ctrl+Alt+<digit> chord detection over a set of held keys.
//!
//! The detector is level-triggered: every key-down re-evaluates the chord, so
//! auto-repeat of the digit while the modifiers stay held fires again.

use std::collections::HashSet;

/// Keyboard keys as seen by the chord detector, independent of the OS hook.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum InputKey {
    ControlLeft,
    ControlRight,
    AltLeft,
    AltRight,
    /// A key with a printable character form (digits, letters).
    Char(char),
    /// Anything else, named for debug logs.
    Other(String),
}

impl InputKey {
    pub fn is_ctrl(&self) -> bool {
        matches!(self, Self::ControlLeft | Self::ControlRight)
    }

    pub fn is_alt(&self) -> bool {
        matches!(self, Self::AltLeft | Self::AltRight)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Trigger {
    pub digit: char,
}

#[derive(Debug)]
pub struct ChordDetector {
    digit: char,
    held: HashSet<InputKey>,
}

impl ChordDetector {
    pub fn new(digit: char) -> Self {
        Self {
            digit,
            held: HashSet::new(),
        }
    }

    pub fn digit(&self) -> char {
        self.digit
    }

    pub fn press(&mut self, key: InputKey) -> Option<Trigger> {
        let fire = self.modifiers_held() && key == InputKey::Char(self.digit);
        self.held.insert(key);
        fire.then_some(Trigger { digit: self.digit })
    }

    pub fn release(&mut self, key: &InputKey) {
        self.held.remove(key);
    }

    pub fn is_held(&self, key: &InputKey) -> bool {
        self.held.contains(key)
    }

    pub fn held_count(&self) -> usize {
        self.held.len()
    }

    pub fn ctrl_held(&self) -> bool {
        self.held.iter().any(InputKey::is_ctrl)
    }

    pub fn alt_held(&self) -> bool {
        self.held.iter().any(InputKey::is_alt)
    }

    fn modifiers_held(&self) -> bool {
        self.ctrl_held() && self.alt_held()
    }

    /// Sorted debug names of the held keys; the set itself is never handed out.
    pub fn held_summary(&self) -> Vec<String> {
        let mut v: Vec<String> = self.held.iter().map(|k| format!("{k:?}")).collect();
        v.sort();
        v
    }
}
