#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelError {
    pub code: String,
    pub message: String,
}

impl ModelError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn is_timeout(&self) -> bool {
        self.code == "E_MODEL_TIMEOUT"
    }
}

impl std::fmt::Display for ModelError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for ModelError {}
