/// Reply a model sends when the text needs no change.
pub const NO_CHANGE_SENTINEL: &str = "<null>";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptPair {
    pub system_prompt: String,
    pub user_input: String,
}

impl PromptPair {
    pub fn new(system_prompt: impl Into<String>, user_input: impl Into<String>) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            user_input: user_input.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelReply {
    Text(String),
    NoChange,
}

impl ModelReply {
    pub fn from_text(raw: &str) -> Self {
        let t = raw.trim();
        if t == NO_CHANGE_SENTINEL {
            return Self::NoChange;
        }
        Self::Text(t.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentinel_is_recognized_after_trimming() {
        assert_eq!(ModelReply::from_text("<null>"), ModelReply::NoChange);
        assert_eq!(ModelReply::from_text("  <null>\n"), ModelReply::NoChange);
    }

    #[test]
    fn sentinel_inside_text_is_plain_text() {
        assert_eq!(
            ModelReply::from_text("returns <null> when empty"),
            ModelReply::Text("returns <null> when empty".to_string())
        );
        assert_eq!(
            ModelReply::from_text("<NULL>"),
            ModelReply::Text("<NULL>".to_string())
        );
    }
}
