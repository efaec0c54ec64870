use std::{
    fs::OpenOptions,
    io::Write,
    path::{Path, PathBuf},
    sync::{Arc, Mutex, OnceLock},
    time::Instant,
};

use anyhow::Error as AnyhowError;
use serde::Serialize;
use serde_json::Value;

use crate::{env_bool_default_true, env_u64, env_usize, now_ms};

const DEFAULT_TRACE_MAX_BYTES: u64 = 5_000_000;
const DEFAULT_TRACE_MAX_FILES: usize = 3;
const BACKTRACE_MAX_CHARS: usize = 8_000;

#[derive(Debug, Clone)]
pub struct TraceOptions {
    pub enabled: bool,
    pub backtrace: bool,
    pub max_bytes: u64,
    pub max_files: usize,
}

impl TraceOptions {
    pub fn from_env() -> Self {
        Self {
            enabled: env_bool_default_true("REPHRASE_TRACE_ENABLED"),
            backtrace: env_bool_default_true("REPHRASE_TRACE_BACKTRACE"),
            max_bytes: env_u64("REPHRASE_TRACE_MAX_BYTES", DEFAULT_TRACE_MAX_BYTES),
            max_files: env_usize("REPHRASE_TRACE_MAX_FILES", DEFAULT_TRACE_MAX_FILES),
        }
    }

    pub fn disabled() -> Self {
        Self {
            enabled: false,
            backtrace: false,
            max_bytes: DEFAULT_TRACE_MAX_BYTES,
            max_files: DEFAULT_TRACE_MAX_FILES,
        }
    }
}

impl Default for TraceOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            backtrace: false,
            max_bytes: DEFAULT_TRACE_MAX_BYTES,
            max_files: DEFAULT_TRACE_MAX_FILES,
        }
    }
}

/// Appends JSONL trace events under a data directory. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Tracer {
    inner: Arc<TracerInner>,
}

#[derive(Debug)]
struct TracerInner {
    data_dir: PathBuf,
    opts: TraceOptions,
}

pub fn trace_path(data_dir: &Path) -> PathBuf {
    data_dir.join("trace.jsonl")
}

// Shared across tracers so two handles on one dir never interleave partial lines.
fn trace_write_lock() -> &'static Mutex<()> {
    static TRACE_WRITE_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    TRACE_WRITE_LOCK.get_or_init(|| Mutex::new(()))
}

impl Tracer {
    pub fn new(data_dir: &Path, opts: TraceOptions) -> Self {
        Self {
            inner: Arc::new(TracerInner {
                data_dir: data_dir.to_path_buf(),
                opts,
            }),
        }
    }

    pub fn disabled() -> Self {
        Self::new(Path::new("."), TraceOptions::disabled())
    }

    pub fn data_dir(&self) -> &Path {
        &self.inner.data_dir
    }

    pub fn enabled(&self) -> bool {
        self.inner.opts.enabled
    }

    pub fn path(&self) -> PathBuf {
        trace_path(&self.inner.data_dir)
    }

    fn rotate_if_needed(&self) {
        let dir = &self.inner.data_dir;
        let max_f = self.inner.opts.max_files;
        if max_f == 0 {
            return;
        }
        let p = self.path();
        let len = match std::fs::metadata(&p) {
            Ok(m) => m.len(),
            Err(_) => return,
        };
        if len <= self.inner.opts.max_bytes {
            return;
        }

        let oldest = dir.join(format!("trace.jsonl.{max_f}"));
        if oldest.exists() {
            let _ = std::fs::remove_file(&oldest);
        }
        for i in (1..max_f).rev() {
            let src = dir.join(format!("trace.jsonl.{i}"));
            if src.exists() {
                let _ = std::fs::rename(&src, dir.join(format!("trace.jsonl.{}", i + 1)));
            }
        }
        let _ = std::fs::rename(&p, dir.join("trace.jsonl.1"));
    }

    pub fn emit(&self, ev: &TraceEvent) {
        if !self.enabled() {
            return;
        }
        let _guard = trace_write_lock().lock().unwrap_or_else(|e| e.into_inner());
        let _ = std::fs::create_dir_all(&self.inner.data_dir);
        self.rotate_if_needed();

        let p = self.path();
        let mut line = match serde_json::to_string(ev) {
            Ok(s) => s,
            Err(e) => {
                crate::safe_eprintln!("trace: serialize failed: {e}");
                return;
            }
        };
        line.push('\n');
        let mut f = match OpenOptions::new().create(true).append(true).open(&p) {
            Ok(f) => f,
            Err(e) => {
                crate::safe_eprintln!("trace: open failed: {}: {e}", p.display());
                return;
            }
        };
        if let Err(e) = f.write_all(line.as_bytes()) {
            crate::safe_eprintln!("trace: write failed: {e}");
        }
    }

    pub fn event(
        &self,
        task_id: Option<&str>,
        stage: &str,
        step_id: &str,
        status: &str,
        ctx: Option<Value>,
    ) {
        self.emit(&TraceEvent {
            ts_ms: now_ms(),
            task_id: task_id.map(str::to_string),
            stage: stage.to_string(),
            step_id: step_id.to_string(),
            op: "event".to_string(),
            status: status.to_string(),
            duration_ms: None,
            error: None,
            ctx,
        });
    }

    pub fn span(
        &self,
        task_id: Option<&str>,
        stage: &str,
        step_id: &str,
        ctx: Option<Value>,
    ) -> Span {
        Span::start(self, task_id, stage, step_id, ctx)
    }

    fn backtrace_ctx(&self, extra: Option<Value>) -> Option<Value> {
        if !self.inner.opts.backtrace {
            return extra;
        }
        let bt = std::backtrace::Backtrace::force_capture();
        let s = clamp_chars(&redact_user_paths(&format!("{bt:?}")), BACKTRACE_MAX_CHARS);
        let mut m = serde_json::Map::new();
        m.insert("backtrace".to_string(), Value::String(s));
        Some(merge_ctx(m, extra))
    }
}

fn clamp_chars(s: &str, max_chars: usize) -> String {
    s.chars().filter(|c| *c != '\0').take(max_chars).collect()
}

fn redact_user_paths(s: &str) -> String {
    fn scrub_after(hay: &str, marker: &str, sep: char) -> String {
        let mut out = String::with_capacity(hay.len());
        let mut rest = hay;
        while let Some(pos) = rest.find(marker) {
            out.push_str(&rest[..pos + marker.len()]);
            out.push_str("<redacted>");
            let after = &rest[pos + marker.len()..];
            let end = after.find(sep).unwrap_or(after.len());
            rest = &after[end..];
        }
        out.push_str(rest);
        out
    }

    let t = scrub_after(s, "/home/", '/');
    let t = scrub_after(&t, "/Users/", '/');
    scrub_after(&t, "\\Users\\", '\\')
}

fn merge_ctx(base: serde_json::Map<String, Value>, extra: Option<Value>) -> Value {
    let mut out = base;
    match extra {
        None => {}
        Some(Value::Object(m)) => out.extend(m),
        Some(v) => {
            out.insert("extra".to_string(), v);
        }
    }
    Value::Object(out)
}

#[derive(Debug, Clone, Serialize)]
pub struct TraceError {
    pub kind: String,    // http|io|process|config|logic
    pub code: String,    // E_* | HTTP_500
    pub message: String, // short
}

#[derive(Debug, Clone, Serialize)]
pub struct TraceEvent {
    pub ts_ms: i64,
    pub task_id: Option<String>,
    pub stage: String,
    pub step_id: String,
    pub op: String,     // start|end|event
    pub status: String, // ok|err|skipped|aborted
    pub duration_ms: Option<u128>,
    pub error: Option<TraceError>,
    pub ctx: Option<Value>,
}

/// A start/end pair in the trace. Dropping without `ok`/`err`/`skipped` records `aborted`.
pub struct Span {
    tracer: Tracer,
    task_id: Option<String>,
    stage: String,
    step_id: String,
    t0: Instant,
    finished: bool,
}

impl Span {
    pub fn start(
        tracer: &Tracer,
        task_id: Option<&str>,
        stage: &str,
        step_id: &str,
        ctx: Option<Value>,
    ) -> Self {
        let span = Self {
            tracer: tracer.clone(),
            task_id: task_id.map(str::to_string),
            stage: stage.to_string(),
            step_id: step_id.to_string(),
            t0: Instant::now(),
            finished: false,
        };
        span.emit_op("start", "ok", None, None, ctx);
        span
    }

    pub fn elapsed_ms(&self) -> u128 {
        self.t0.elapsed().as_millis()
    }

    fn emit_op(
        &self,
        op: &str,
        status: &str,
        duration_ms: Option<u128>,
        error: Option<TraceError>,
        ctx: Option<Value>,
    ) {
        self.tracer.emit(&TraceEvent {
            ts_ms: now_ms(),
            task_id: self.task_id.clone(),
            stage: self.stage.clone(),
            step_id: self.step_id.clone(),
            op: op.to_string(),
            status: status.to_string(),
            duration_ms,
            error,
            ctx,
        });
    }

    fn finish(&mut self, status: &str, error: Option<TraceError>, ctx: Option<Value>) {
        self.finished = true;
        let ms = self.elapsed_ms();
        self.emit_op("end", status, Some(ms), error, ctx);
    }

    pub fn ok(mut self, ctx: Option<Value>) {
        self.finish("ok", None, ctx);
    }

    pub fn skipped(mut self, reason: &str, ctx: Option<Value>) {
        let error = TraceError {
            kind: "logic".to_string(),
            code: "SKIPPED".to_string(),
            message: reason.to_string(),
        };
        self.finish("skipped", Some(error), ctx);
    }

    pub fn err(mut self, kind: &str, code: &str, message: &str, ctx: Option<Value>) {
        let error = TraceError {
            kind: kind.to_string(),
            code: code.to_string(),
            message: message.to_string(),
        };
        let ctx = self.tracer.backtrace_ctx(ctx);
        self.finish("err", Some(error), ctx);
    }

    pub fn err_anyhow(mut self, kind: &str, code: &str, err: &AnyhowError, ctx: Option<Value>) {
        let error = TraceError {
            kind: kind.to_string(),
            code: code.to_string(),
            message: err.to_string(),
        };
        let mut m = serde_json::Map::new();
        let chain: Vec<String> = err.chain().map(|e| e.to_string()).collect();
        m.insert("err_chain".to_string(), serde_json::json!(chain));
        let ctx = self.tracer.backtrace_ctx(Some(merge_ctx(m, ctx)));
        self.finish("err", Some(error), ctx);
    }
}

impl Drop for Span {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        let error = TraceError {
            kind: "logic".to_string(),
            code: "ABORTED".to_string(),
            message: "span dropped without explicit ok/err".to_string(),
        };
        self.finish("aborted", Some(error), None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{fs, thread};

    fn read_lines(dir: &Path) -> Vec<Value> {
        let raw = fs::read_to_string(trace_path(dir)).expect("read trace");
        raw.lines()
            .map(|l| serde_json::from_str(l).expect("valid json line"))
            .collect()
    }

    #[test]
    fn concurrent_emit_keeps_jsonl_lines_parseable() {
        let td = tempfile::tempdir().expect("tempdir");
        let tracer = Tracer::new(td.path(), TraceOptions::default());
        let threads = 6;
        let per_thread = 50;

        let joins: Vec<_> = (0..threads)
            .map(|i| {
                let t = tracer.clone();
                thread::spawn(move || {
                    for j in 0..per_thread {
                        t.event(
                            Some("task-concurrent"),
                            "TraceTest",
                            "TRACE.concurrent_emit",
                            "ok",
                            Some(serde_json::json!({"i": i, "j": j})),
                        );
                    }
                })
            })
            .collect();
        for j in joins {
            j.join().expect("join");
        }

        let lines = read_lines(td.path());
        assert_eq!(lines.len(), threads * per_thread);
        assert!(lines.iter().all(|v| v.get("step_id").is_some()));
    }

    #[test]
    fn span_records_start_and_end_with_status() {
        let td = tempfile::tempdir().expect("tempdir");
        let tracer = Tracer::new(td.path(), TraceOptions::default());
        tracer.span(None, "Model", "MODEL.generate", None).ok(None);
        tracer
            .span(Some("t1"), "Model", "MODEL.generate", None)
            .err("http", "E_MODEL_HTTP_STATUS_500", "boom", None);
        {
            let _dropped = tracer.span(None, "Model", "MODEL.pull", None);
        }

        let lines = read_lines(td.path());
        let ends: Vec<&str> = lines
            .iter()
            .filter(|v| v["op"] == "end")
            .map(|v| v["status"].as_str().unwrap_or_default())
            .collect();
        assert_eq!(ends, vec!["ok", "err", "aborted"]);
        let err_line = lines
            .iter()
            .find(|v| v["status"] == "err")
            .expect("err line");
        assert_eq!(err_line["error"]["code"], "E_MODEL_HTTP_STATUS_500");
        assert_eq!(err_line["task_id"], "t1");
    }

    #[test]
    fn disabled_tracer_writes_nothing() {
        let td = tempfile::tempdir().expect("tempdir");
        let tracer = Tracer::new(td.path(), TraceOptions::disabled());
        tracer.event(None, "S", "X", "ok", None);
        assert!(!trace_path(td.path()).exists());
    }

    #[test]
    fn rotation_shifts_old_files() {
        let td = tempfile::tempdir().expect("tempdir");
        let opts = TraceOptions {
            max_bytes: 200,
            max_files: 2,
            ..TraceOptions::default()
        };
        let tracer = Tracer::new(td.path(), opts);
        for i in 0..40 {
            tracer.event(None, "S", "ROTATE", "ok", Some(serde_json::json!({"i": i})));
        }
        assert!(td.path().join("trace.jsonl.1").exists());
        assert!(td.path().join("trace.jsonl.2").exists());
        assert!(!td.path().join("trace.jsonl.3").exists());
    }

    #[test]
    fn redact_user_paths_scrubs_home_segment() {
        assert_eq!(
            redact_user_paths("at /home/alice/src/main.rs:1"),
            "at /home/<redacted>/src/main.rs:1"
        );
        assert_eq!(
            redact_user_paths("C:\\Users\\bob\\x.rs"),
            "C:\\Users\\<redacted>\\x.rs"
        );
    }
}
