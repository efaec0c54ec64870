use std::{
    path::PathBuf,
    sync::Arc,
    time::{Duration, Instant},
};

use rephrase_core::{ModelReply, Trigger};
use rephrase_observability::{fingerprint, metrics, preview, Tracer};
use rephrase_platform::{with_clipboard_preserved, ClipboardBridge, PasteSimulator, PlatformError};
use rephrase_providers::TextGenerator;
use serde_json::json;
use uuid::Uuid;

use crate::skill::{ApplyPolicy, InputSource, Skill};

const LOG_PREVIEW_CHARS: usize = 80;

/// Pauses around the paste so the clipboard owner and the target window settle.
#[derive(Debug, Clone, Copy)]
pub struct ReplaceTiming {
    pub after_write: Duration,
    pub before_paste: Duration,
    pub after_paste: Duration,
}

impl Default for ReplaceTiming {
    fn default() -> Self {
        Self {
            after_write: Duration::from_millis(100),
            before_paste: Duration::from_millis(200),
            after_paste: Duration::from_millis(200),
        }
    }
}

impl ReplaceTiming {
    pub fn immediate() -> Self {
        Self {
            after_write: Duration::ZERO,
            before_paste: Duration::ZERO,
            after_paste: Duration::ZERO,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerOutcome {
    NoInput,
    ModelFailed,
    NoChange,
    Replaced,
    PasteFailed,
    Logged,
}

impl TriggerOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoInput => "no_input",
            Self::ModelFailed => "model_failed",
            Self::NoChange => "no_change",
            Self::Replaced => "replaced",
            Self::PasteFailed => "paste_failed",
            Self::Logged => "logged",
        }
    }
}

#[derive(Debug, Default)]
struct RunStats {
    input_chars: usize,
    output_chars: usize,
    model_ms: Option<u64>,
    error: Option<(String, String)>,
}

/// Runs one skill invocation per trigger: read input, ask the model, apply.
pub struct TriggerRunner {
    skill: Box<dyn Skill>,
    clipboard: Arc<dyn ClipboardBridge>,
    paste: Arc<dyn PasteSimulator>,
    generator: Arc<dyn TextGenerator>,
    tracer: Tracer,
    timing: ReplaceTiming,
    metrics_dir: Option<PathBuf>,
}

impl TriggerRunner {
    pub fn new(
        skill: Box<dyn Skill>,
        clipboard: Arc<dyn ClipboardBridge>,
        paste: Arc<dyn PasteSimulator>,
        generator: Arc<dyn TextGenerator>,
        tracer: Tracer,
    ) -> Self {
        Self {
            skill,
            clipboard,
            paste,
            generator,
            tracer,
            timing: ReplaceTiming::default(),
            metrics_dir: None,
        }
    }

    pub fn with_timing(mut self, timing: ReplaceTiming) -> Self {
        self.timing = timing;
        self
    }

    pub fn with_metrics_dir(mut self, dir: PathBuf) -> Self {
        self.metrics_dir = Some(dir);
        self
    }

    pub async fn on_trigger(&self, trigger: Trigger) -> TriggerOutcome {
        let task_id = Uuid::new_v4().to_string();
        let span = self.tracer.span(
            Some(&task_id),
            "Trigger",
            "TRIGGER.run",
            Some(json!({"skill": self.skill.name(), "digit": trigger.digit.to_string()})),
        );

        let mut stats = RunStats::default();
        let outcome = self.run(&task_id, &mut stats).await;

        let ctx = json!({
            "outcome": outcome.as_str(),
            "input_chars": stats.input_chars,
            "output_chars": stats.output_chars,
        });
        match &stats.error {
            Some((code, message)) => span.err("trigger", code, message, Some(ctx)),
            None if outcome == TriggerOutcome::NoInput => span.skipped("no input text", Some(ctx)),
            None => span.ok(Some(ctx)),
        }

        if let Some(dir) = &self.metrics_dir {
            if let Err(e) = metrics::append_jsonl(
                dir,
                &json!({
                    "type": "trigger",
                    "task_id": task_id,
                    "skill": self.skill.name(),
                    "outcome": outcome.as_str(),
                    "input_chars": stats.input_chars,
                    "output_chars": stats.output_chars,
                    "model_ms": stats.model_ms,
                }),
            ) {
                tracing::warn!("metrics append failed: {e:#}");
            }
        }
        outcome
    }

    async fn run(&self, task_id: &str, stats: &mut RunStats) -> TriggerOutcome {
        let source = self.skill.input_source();
        let Some(input) = self.acquire_input(task_id, source).await else {
            match source {
                InputSource::PrimarySelection => tracing::info!("no text selected"),
                InputSource::Clipboard => tracing::info!("no text in clipboard"),
            }
            return TriggerOutcome::NoInput;
        };
        stats.input_chars = input.chars().count();
        tracing::info!(
            "{}: processing {} characters",
            self.skill.name(),
            stats.input_chars
        );
        tracing::debug!("input: {}", preview(&input, LOG_PREVIEW_CHARS));

        let user_input = self.skill.format_user_input(&input);
        let t0 = Instant::now();
        let generated = self
            .generator
            .generate(self.skill.system_prompt(), &user_input)
            .await;
        stats.model_ms = Some(t0.elapsed().as_millis().min(u64::MAX as u128) as u64);

        let raw = match generated {
            Ok(v) => v,
            Err(e) => {
                tracing::error!("{}: model call failed: {e}", self.skill.name());
                stats.error = Some((e.code.clone(), e.message.clone()));
                return TriggerOutcome::ModelFailed;
            }
        };

        let text = match ModelReply::from_text(&raw) {
            ModelReply::NoChange => {
                tracing::info!("model reported no change needed");
                return TriggerOutcome::NoChange;
            }
            ModelReply::Text(t) => t,
        };
        stats.output_chars = text.chars().count();

        match self.skill.apply_policy() {
            ApplyPolicy::LogOnly => {
                tracing::info!("{} result: {text}", self.skill.name());
                TriggerOutcome::Logged
            }
            ApplyPolicy::ReplaceSelection => match self.replace(task_id, text).await {
                Ok(()) => {
                    tracing::info!("text replaced successfully");
                    TriggerOutcome::Replaced
                }
                Err(e) => {
                    tracing::error!("failed to replace text: {e}");
                    stats.error = Some((e.code, e.message));
                    TriggerOutcome::PasteFailed
                }
            },
        }
    }

    async fn acquire_input(&self, task_id: &str, source: InputSource) -> Option<String> {
        let span = self.tracer.span(
            Some(task_id),
            "Input",
            "IN.read",
            Some(json!({"source": format!("{source:?}")})),
        );
        let cb = self.clipboard.clone();
        let res = tokio::task::spawn_blocking(move || match source {
            InputSource::PrimarySelection => cb.read_primary_selection(),
            InputSource::Clipboard => cb.read_clipboard(),
        })
        .await;
        match res {
            Ok(Some(text)) => {
                span.ok(Some(json!({
                    "chars": text.chars().count(),
                    "fp": fingerprint(&text),
                })));
                Some(text)
            }
            Ok(None) => {
                span.skipped("empty", None);
                None
            }
            Err(e) => {
                tracing::error!("input read task failed: {e}");
                span.err("task", "E_INPUT_JOIN", &e.to_string(), None);
                None
            }
        }
    }

    async fn replace(&self, task_id: &str, text: String) -> Result<(), PlatformError> {
        let span = self.tracer.span(
            Some(task_id),
            "Apply",
            "OUT.replace",
            Some(json!({"chars": text.chars().count(), "fp": fingerprint(&text)})),
        );
        let cb = self.clipboard.clone();
        let paste = self.paste.clone();
        let timing = self.timing;
        let res = tokio::task::spawn_blocking(move || {
            replace_selection(cb.as_ref(), paste.as_ref(), &text, timing)
        })
        .await
        .map_err(|e| PlatformError::new("E_APPLY_JOIN", e.to_string()))
        .and_then(|r| r);
        match &res {
            Ok(()) => span.ok(None),
            Err(e) => span.err("platform", &e.code, &e.message, None),
        }
        res
    }
}

/// Puts `text` on the clipboard, pastes it, and restores the previous clipboard.
pub fn replace_selection(
    cb: &dyn ClipboardBridge,
    paste: &dyn PasteSimulator,
    text: &str,
    timing: ReplaceTiming,
) -> Result<(), PlatformError> {
    with_clipboard_preserved(cb, text, || {
        std::thread::sleep(timing.after_write);
        if cb.read_clipboard_raw().as_deref() == Some(text) {
            tracing::debug!("clipboard holds the new text");
        } else {
            tracing::warn!("clipboard does not hold the new text yet, pasting anyway");
        }
        std::thread::sleep(timing.before_paste);
        let res = paste.simulate_paste();
        std::thread::sleep(timing.after_paste);
        res
    })
    .and_then(|r| r)
}

#[cfg(test)]
pub(crate) mod fakes {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use rephrase_platform::{ClipboardBridge, PasteSimulator, PlatformError};
    use rephrase_providers::{ModelError, TextGenerator};
    use tokio::sync::Notify;

    #[derive(Default)]
    pub struct FakeClipboard {
        pub selection: Mutex<Option<String>>,
        pub content: Mutex<Option<String>>,
        pub writes: Mutex<Vec<String>>,
        pub fail_writes: bool,
    }

    impl FakeClipboard {
        pub fn with(selection: Option<&str>, clipboard: Option<&str>) -> Self {
            Self {
                selection: Mutex::new(selection.map(str::to_string)),
                content: Mutex::new(clipboard.map(str::to_string)),
                ..Default::default()
            }
        }

        pub fn writes(&self) -> Vec<String> {
            self.writes.lock().unwrap().clone()
        }
    }

    impl ClipboardBridge for FakeClipboard {
        fn read_primary_selection(&self) -> Option<String> {
            rephrase_platform::clipboard::trimmed_non_empty(self.selection.lock().unwrap().clone())
        }

        fn read_clipboard_raw(&self) -> Option<String> {
            self.content.lock().unwrap().clone()
        }

        fn write_clipboard(&self, text: &str) -> Result<(), PlatformError> {
            if self.fail_writes {
                return Err(PlatformError::new("E_CLIPBOARD_WRITE_FAILED", "denied"));
            }
            self.writes.lock().unwrap().push(text.to_string());
            *self.content.lock().unwrap() = Some(text.to_string());
            Ok(())
        }
    }

    /// Records what the clipboard held at each paste.
    pub struct FakePaste {
        pub clipboard: std::sync::Arc<FakeClipboard>,
        pub seen: Mutex<Vec<Option<String>>>,
        pub fail: bool,
    }

    impl FakePaste {
        pub fn new(clipboard: std::sync::Arc<FakeClipboard>) -> Self {
            Self {
                clipboard,
                seen: Mutex::new(Vec::new()),
                fail: false,
            }
        }

        pub fn pastes(&self) -> Vec<Option<String>> {
            self.seen.lock().unwrap().clone()
        }
    }

    impl PasteSimulator for FakePaste {
        fn simulate_paste(&self) -> Result<(), PlatformError> {
            self.seen
                .lock()
                .unwrap()
                .push(self.clipboard.read_clipboard_raw());
            if self.fail {
                return Err(PlatformError::new("E_PASTE_FAILED", "no display"));
            }
            Ok(())
        }
    }

    pub struct FakeGenerator {
        pub reply: Result<String, ModelError>,
        pub calls: Mutex<Vec<(String, String)>>,
        pub gate: Option<std::sync::Arc<Notify>>,
    }

    impl FakeGenerator {
        pub fn replying(reply: Result<String, ModelError>) -> Self {
            Self {
                reply,
                calls: Mutex::new(Vec::new()),
                gate: None,
            }
        }

        pub fn calls(&self) -> Vec<(String, String)> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl TextGenerator for FakeGenerator {
        fn model(&self) -> &str {
            "fake"
        }

        async fn generate(
            &self,
            system_prompt: &str,
            user_input: &str,
        ) -> Result<String, ModelError> {
            self.calls
                .lock()
                .unwrap()
                .push((system_prompt.to_string(), user_input.to_string()));
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            self.reply.clone()
        }
    }
}
