use rephrase_core::SkillKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputSource {
    PrimarySelection,
    Clipboard,
}

/// What happens with a model reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyPolicy {
    /// Paste over the current selection, keeping the user's clipboard.
    ReplaceSelection,
    LogOnly,
}

/// One text transformation bound to the hotkey.
pub trait Skill: Send + Sync {
    fn name(&self) -> &'static str;
    fn system_prompt(&self) -> &'static str;
    fn input_source(&self) -> InputSource;
    fn apply_policy(&self) -> ApplyPolicy;

    fn format_user_input(&self, text: &str) -> String {
        text.to_string()
    }
}

const REPHRASE_PROMPT: &str = "Please correct any grammatical errors and make improvements to the writing while keeping the original tone and meaning. If you cannot rephrase it, or change is not needed, return <null>. Return only the improved text without any explanations or additional commentary.";

const SUMMARIZE_PROMPT: &str = "Please provide a concise summary of the following text. Keep it brief and capture the main points. Return only the summary without any explanations.";

pub struct Rephrase;

impl Skill for Rephrase {
    fn name(&self) -> &'static str {
        "rephrase"
    }

    fn system_prompt(&self) -> &'static str {
        REPHRASE_PROMPT
    }

    fn input_source(&self) -> InputSource {
        InputSource::PrimarySelection
    }

    fn apply_policy(&self) -> ApplyPolicy {
        ApplyPolicy::ReplaceSelection
    }

    fn format_user_input(&self, text: &str) -> String {
        format!("text to rephrase: {text}")
    }
}

pub struct Summarize;

impl Skill for Summarize {
    fn name(&self) -> &'static str {
        "summarize"
    }

    fn system_prompt(&self) -> &'static str {
        SUMMARIZE_PROMPT
    }

    fn input_source(&self) -> InputSource {
        InputSource::Clipboard
    }

    fn apply_policy(&self) -> ApplyPolicy {
        ApplyPolicy::LogOnly
    }
}

pub fn skill_for(kind: SkillKind) -> Box<dyn Skill> {
    match kind {
        SkillKind::Rephrase => Box::new(Rephrase),
        SkillKind::Summarize => Box::new(Summarize),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rephrase_core::NO_CHANGE_SENTINEL;

    #[test]
    fn rephrase_reads_selection_and_replaces_it() {
        let s = skill_for(SkillKind::Rephrase);
        assert_eq!(s.name(), "rephrase");
        assert_eq!(s.input_source(), InputSource::PrimarySelection);
        assert_eq!(s.apply_policy(), ApplyPolicy::ReplaceSelection);
        assert_eq!(s.format_user_input("helo wrold"), "text to rephrase: helo wrold");
        assert!(s.system_prompt().contains(NO_CHANGE_SENTINEL));
    }

    #[test]
    fn summarize_reads_clipboard_and_only_logs() {
        let s = skill_for(SkillKind::Summarize);
        assert_eq!(s.name(), "summarize");
        assert_eq!(s.input_source(), InputSource::Clipboard);
        assert_eq!(s.apply_policy(), ApplyPolicy::LogOnly);
        assert_eq!(s.format_user_input("a long text"), "a long text");
        assert!(s.system_prompt().starts_with("Please provide a concise summary"));
    }
}
