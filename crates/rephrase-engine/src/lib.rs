pub mod dispatcher;
pub mod runner;
pub mod skill;
pub mod startup;

pub use dispatcher::Dispatcher;
pub use runner::{ReplaceTiming, TriggerOutcome, TriggerRunner};
pub use skill::{skill_for, ApplyPolicy, InputSource, Skill};
pub use startup::{ensure_server_ready, StartupOptions};
