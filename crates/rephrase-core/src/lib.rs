pub mod chord;
pub mod config;
pub mod prompt;

pub use chord::{ChordDetector, InputKey, Trigger};
pub use config::{Config, InputBackend, SkillKind};
pub use prompt::{ModelReply, PromptPair, NO_CHANGE_SENTINEL};
