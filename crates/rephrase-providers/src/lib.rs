pub mod error;
pub mod ollama;

pub use error::ModelError;
pub use ollama::{HealthProbe, ModelTimeouts, OllamaClient, TextGenerator};
