use std::fmt;

use anyhow::{anyhow, Result};
use serde::Serialize;

pub const ENV_MODEL: &str = "OLLAMA_MODEL";
pub const ENV_URL: &str = "OLLAMA_URL";
pub const ENV_KEYNUM: &str = "REPHRASE_KEYNUM";
pub const ENV_DEBUG: &str = "DEBUG";
pub const ENV_SKILL: &str = "REPHRASE_SKILL";
pub const ENV_BACKEND: &str = "REPHRASE_INPUT_BACKEND";
pub const ENV_AUTOSTART: &str = "REPHRASE_AUTOSTART";

pub const DEFAULT_MODEL: &str = "gemma3";
pub const DEFAULT_URL: &str = "http://localhost:11434";
pub const DEFAULT_DIGIT: char = '0';

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SkillKind {
    Rephrase,
    Summarize,
}

impl SkillKind {
    pub fn parse(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "" | "rephrase" => Ok(Self::Rephrase),
            "summarize" | "summary" => Ok(Self::Summarize),
            other => Err(anyhow!("E_CONFIG_SKILL_UNKNOWN: unknown skill {other:?}")),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Rephrase => "rephrase",
            Self::Summarize => "summarize",
        }
    }
}

impl fmt::Display for SkillKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which mechanism backs clipboard access and paste simulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InputBackend {
    /// In-process: arboard for the clipboard, enigo for synthetic keys.
    Native,
    /// External X11 tools: xclip and xdotool.
    Xtools,
}

impl InputBackend {
    pub fn parse(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "" | "native" => Ok(Self::Native),
            "xtools" | "x11" | "xclip" => Ok(Self::Xtools),
            other => Err(anyhow!(
                "E_CONFIG_BACKEND_UNKNOWN: unknown input backend {other:?}"
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Config {
    pub model: String,
    pub base_url: String,
    pub trigger_digit: char,
    pub debug: bool,
    pub skill: SkillKind,
    pub backend: InputBackend,
    pub autostart_server: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            base_url: DEFAULT_URL.to_string(),
            trigger_digit: DEFAULT_DIGIT,
            debug: false,
            skill: SkillKind::Rephrase,
            backend: InputBackend::Native,
            autostart_server: true,
        }
    }
}

fn is_off(v: &str) -> bool {
    let t = v.trim().to_ascii_lowercase();
    t == "0" || t == "false" || t == "no" || t == "off"
}

pub fn normalize_base_url(s: &str) -> String {
    let mut t = s.trim().trim_end_matches('/').to_string();
    if t.is_empty() {
        return DEFAULT_URL.to_string();
    }

    // Accept a pasted endpoint URL as well as the bare server address.
    for suffix in ["/api/chat", "/api/generate", "/api"] {
        if let Some(stripped) = t.strip_suffix(suffix) {
            t = stripped.to_string();
            break;
        }
    }
    t.trim_end_matches('/').to_string()
}

pub fn parse_trigger_digit(raw: &str) -> Result<char> {
    let t = raw.trim();
    let mut chars = t.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) if c.is_ascii_digit() => Ok(c),
        _ => Err(anyhow!(
            "E_CONFIG_KEYNUM_INVALID: trigger digit must be a single digit 0-9, got {t:?}"
        )),
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    /// Builds the configuration from a key lookup; unset or blank values fall back to defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |k: &str| lookup(k).filter(|v| !v.trim().is_empty());

        let model = get(ENV_MODEL)
            .map(|v| v.trim().to_string())
            .unwrap_or_else(|| DEFAULT_MODEL.to_string());
        let base_url = normalize_base_url(&get(ENV_URL).unwrap_or_default());
        let trigger_digit = match get(ENV_KEYNUM) {
            Some(v) => parse_trigger_digit(&v)?,
            None => DEFAULT_DIGIT,
        };
        // Any non-empty value turns debug on, `DEBUG=0` included.
        let debug = get(ENV_DEBUG).is_some();
        let skill = SkillKind::parse(&get(ENV_SKILL).unwrap_or_default())?;
        let backend = InputBackend::parse(&get(ENV_BACKEND).unwrap_or_default())?;
        let autostart_server = get(ENV_AUTOSTART).map(|v| !is_off(&v)).unwrap_or(true);

        let cfg = Self {
            model,
            base_url,
            trigger_digit,
            debug,
            skill,
            backend,
            autostart_server,
        };
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.model.trim().is_empty() {
            return Err(anyhow!("E_CONFIG_MODEL_MISSING: model name is empty"));
        }
        if !self.trigger_digit.is_ascii_digit() {
            return Err(anyhow!(
                "E_CONFIG_KEYNUM_INVALID: trigger digit must be 0-9, got {:?}",
                self.trigger_digit
            ));
        }
        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            return Err(anyhow!(
                "E_CONFIG_URL_INVALID: model server url must be http(s), got {:?}",
                self.base_url
            ));
        }
        Ok(())
    }

    pub fn shortcut_label(&self) -> String {
        format!("Ctrl+Alt+{}", self.trigger_digit)
    }
}
