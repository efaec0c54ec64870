use anyhow::Result;
use clap::Parser;
use rephrase_core::{
    config::{normalize_base_url, parse_trigger_digit},
    Config, InputBackend, SkillKind,
};

/// Rewrites the selected text with a local language model on Ctrl+Alt+<digit>.
///
/// Flags override the matching environment variables.
#[derive(Debug, Parser)]
#[command(name = "rephrase", version, about)]
pub struct Cli {
    /// `rephrase` replaces the selection, `summarize` logs a clipboard summary
    #[arg(long)]
    pub skill: Option<String>,

    /// Model name on the server (OLLAMA_MODEL)
    #[arg(long)]
    pub model: Option<String>,

    /// Model server base URL (OLLAMA_URL)
    #[arg(long)]
    pub url: Option<String>,

    /// Digit completing the Ctrl+Alt chord (REPHRASE_KEYNUM)
    #[arg(long)]
    pub digit: Option<String>,

    /// Verbose key-event logging (DEBUG)
    #[arg(long)]
    pub debug: bool,

    /// `native` or `xtools` (xclip + xdotool)
    #[arg(long)]
    pub backend: Option<String>,

    /// Do not try to start the model server when it is unreachable
    #[arg(long)]
    pub no_autostart: bool,

    /// Run the startup checks and exit
    #[arg(long)]
    pub check: bool,
}

impl Cli {
    pub fn apply(&self, mut cfg: Config) -> Result<Config> {
        if let Some(v) = &self.skill {
            cfg.skill = SkillKind::parse(v)?;
        }
        if let Some(v) = &self.model {
            cfg.model = v.trim().to_string();
        }
        if let Some(v) = &self.url {
            cfg.base_url = normalize_base_url(v);
        }
        if let Some(v) = &self.digit {
            cfg.trigger_digit = parse_trigger_digit(v)?;
        }
        if let Some(v) = &self.backend {
            cfg.backend = InputBackend::parse(v)?;
        }
        cfg.debug |= self.debug;
        if self.no_autostart {
            cfg.autostart_server = false;
        }
        cfg.validate()?;
        Ok(cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("rephrase").chain(args.iter().copied()))
            .expect("parse")
    }

    #[test]
    fn no_flags_keep_environment_config() {
        let base = Config {
            model: "llama3".to_string(),
            ..Config::default()
        };
        let cfg = parse(&[]).apply(base.clone()).expect("apply");
        assert_eq!(cfg, base);
    }

    #[test]
    fn flags_override_config() {
        let cfg = parse(&[
            "--skill",
            "summarize",
            "--model",
            "phi",
            "--url",
            "http://gpu-box:11434/api/chat",
            "--digit",
            "7",
            "--backend",
            "xtools",
            "--no-autostart",
            "--debug",
        ])
        .apply(Config::default())
        .expect("apply");
        assert_eq!(cfg.skill, SkillKind::Summarize);
        assert_eq!(cfg.model, "phi");
        assert_eq!(cfg.base_url, "http://gpu-box:11434");
        assert_eq!(cfg.trigger_digit, '7');
        assert_eq!(cfg.backend, InputBackend::Xtools);
        assert!(!cfg.autostart_server);
        assert!(cfg.debug);
        assert_eq!(cfg.shortcut_label(), "Ctrl+Alt+7");
    }

    #[test]
    fn invalid_flag_values_are_rejected() {
        assert!(parse(&["--digit", "12"]).apply(Config::default()).is_err());
        assert!(parse(&["--skill", "translate"]).apply(Config::default()).is_err());
        assert!(parse(&["--model", " "]).apply(Config::default()).is_err());
    }
}
