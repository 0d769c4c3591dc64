use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use jsonschema::{Draft, JSONSchema};
use num_format::Locale;
use once_cell::sync::OnceCell;
use serde::Deserialize;
use serde_json::Value;

use crate::pricing::CostMode;

static CONFIG_SCHEMA: OnceCell<JSONSchema> = OnceCell::new();
static CONFIG_SCHEMA_JSON: OnceCell<Value> = OnceCell::new();

/// Settings accepted both under `defaults` and under each command.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct Settings {
    pub timezone: Option<String>,
    pub locale: Option<String>,
    pub json: Option<bool>,
    pub log_file: Option<PathBuf>,
    pub data_dirs: Option<Vec<PathBuf>>,
    pub refresh_seconds: Option<u64>,
    pub limit: Option<usize>,
    pub session_length_hours: Option<u32>,
    pub cost_mode: Option<CostMode>,
    pub offline: Option<bool>,
    pub focus_minutes: Option<u32>,
    pub break_minutes: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CommandSettings {
    pub clock: Option<Settings>,
    pub usage: Option<Settings>,
}

#[derive(Debug, Default, Deserialize)]
pub struct FileConfig {
    pub defaults: Option<Settings>,
    pub commands: Option<CommandSettings>,
}

/// A command's view of the config file: its own section over `defaults`.
#[derive(Debug, Default, Clone)]
pub struct Layers {
    command: Settings,
    defaults: Settings,
}

impl FileConfig {
    pub fn layers(&self, command: &str) -> Layers {
        let section = self.commands.as_ref().and_then(|c| match command {
            "clock" => c.clock.as_ref(),
            "usage" => c.usage.as_ref(),
            _ => None,
        });
        Layers {
            command: section.cloned().unwrap_or_default(),
            defaults: self.defaults.clone().unwrap_or_default(),
        }
    }
}

impl Layers {
    /// Command-line value, then the command section, then `defaults`.
    pub fn pick<T: Clone>(&self, cli: Option<T>, field: impl Fn(&Settings) -> Option<T>) -> Option<T> {
        cli.or_else(|| field(&self.command))
            .or_else(|| field(&self.defaults))
    }
}

/// Explicit path, else `./deskdash.json`, else `~/.config/deskdash/config.json`.
pub fn load_config(path: Option<&PathBuf>) -> Result<FileConfig> {
    let candidate = match path {
        Some(p) => Some(p.clone()),
        None => default_config_candidates().into_iter().find(|p| p.exists()),
    };

    let Some(path) = candidate else {
        return Ok(FileConfig::default());
    };
    log::debug!("loading config from {}", path.display());
    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    parse_config(&content).with_context(|| format!("Invalid config file {}", path.display()))
}

fn default_config_candidates() -> Vec<PathBuf> {
    let mut candidates = vec![PathBuf::from("deskdash.json")];
    if let Some(home) = home_dir() {
        candidates.push(home.join(".config/deskdash/config.json"));
    }
    candidates
}

pub fn parse_config(content: &str) -> Result<FileConfig> {
    let value: Value = serde_json::from_str(content).context("parsing JSON")?;
    validate_config(&value)?;
    serde_json::from_value(value).context("reading settings")
}

fn validate_config(value: &Value) -> Result<()> {
    let schema_value = CONFIG_SCHEMA_JSON.get_or_try_init(|| {
        let schema_str = include_str!("../config-schema.json");
        serde_json::from_str(schema_str).context("parsing config schema")
    })?;
    let schema = CONFIG_SCHEMA.get_or_try_init(|| {
        JSONSchema::options()
            .with_draft(Draft::Draft7)
            .compile(schema_value)
            .map_err(|e| anyhow::anyhow!("compiling config schema: {e}"))
    })?;

    if let Err(errors) = schema.validate(value) {
        let mut msg = String::from("Config validation failed:\n");
        for err in errors {
            msg.push_str(&format!(" - {} at {}\n", err, err.instance_path));
        }
        anyhow::bail!(msg.trim_end().to_string());
    }
    Ok(())
}

pub fn resolve_locale(raw: Option<&str>) -> Locale {
    match raw {
        Some("en") | Some("en-US") | Some("en-GB") | None => Locale::en,
        Some("fr") | Some("fr-FR") => Locale::fr,
        Some("de") | Some("de-DE") => Locale::de,
        Some("es") | Some("es-ES") => Locale::es,
        Some("it") | Some("it-IT") => Locale::it,
        Some("ja") | Some("ja-JP") => Locale::ja,
        Some(other) => {
            log::warn!("unsupported locale '{other}', using en");
            Locale::en
        }
    }
}

/// Explicit dirs, else `CLAUDE_CONFIG_DIR` (comma separated), else the two
/// standard Claude Code locations.
pub fn resolve_data_dirs(explicit: &[PathBuf]) -> Result<Vec<PathBuf>> {
    if !explicit.is_empty() {
        return Ok(explicit.iter().map(|d| expand_tilde(d)).collect());
    }

    let mut dirs = Vec::new();
    if let Ok(env_paths) = std::env::var("CLAUDE_CONFIG_DIR") {
        for p in env_paths.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            dirs.push(expand_tilde(Path::new(p)));
        }
    }

    if dirs.is_empty() {
        let Some(home) = home_dir() else {
            anyhow::bail!(
                "Could not determine home directory. Set --data-dir or CLAUDE_CONFIG_DIR."
            );
        };
        dirs.push(home.join(".config/claude"));
        dirs.push(home.join(".claude"));
    }
    Ok(dirs)
}

fn expand_tilde(path: &Path) -> PathBuf {
    if let Some(rest) = path.to_str().and_then(|s| s.strip_prefix("~/")) {
        if let Some(home) = home_dir() {
            return home.join(rest);
        }
    }
    path.to_path_buf()
}

fn home_dir() -> Option<PathBuf> {
    std::env::var_os("HOME").map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_section_overrides_defaults() {
        let cfg = parse_config(
            r#"{
                "defaults": { "timezone": "UTC", "refresh_seconds": 10 },
                "commands": { "usage": { "timezone": "Europe/Paris" } }
            }"#,
        )
        .unwrap();
        let usage = cfg.layers("usage");
        assert_eq!(
            usage.pick(None, |s| s.timezone.clone()).as_deref(),
            Some("Europe/Paris")
        );
        assert_eq!(usage.pick(None, |s| s.refresh_seconds), Some(10));
        assert_eq!(usage.pick(Some(3), |s| s.refresh_seconds), Some(3));

        let clock = cfg.layers("clock");
        assert_eq!(clock.pick(None, |s| s.timezone.clone()).as_deref(), Some("UTC"));
        assert_eq!(clock.pick(None, |s| s.limit), None);
    }

    #[test]
    fn cost_mode_and_lengths_deserialize() {
        let cfg = parse_config(
            r#"{ "defaults": { "cost_mode": "calculate", "focus_minutes": 50, "break_minutes": 10 } }"#,
        )
        .unwrap();
        let defaults = cfg.defaults.unwrap();
        assert_eq!(defaults.cost_mode, Some(CostMode::Calculate));
        assert_eq!(defaults.focus_minutes, Some(50));
    }

    #[test]
    fn schema_rejects_unknown_keys_and_bad_values() {
        let err = parse_config(r#"{ "defaults": { "colour": "red" } }"#).unwrap_err();
        assert!(format!("{err:#}").contains("Config validation failed"));

        let err = parse_config(r#"{ "defaults": { "focus_minutes": 0 } }"#).unwrap_err();
        assert!(format!("{err:#}").contains("Config validation failed"));

        assert!(parse_config(r#"{ "commands": { "weather": {} } }"#).is_err());

        let err = parse_config(r#"{ "defaults": { "focus_minutes": 100000000 } }"#).unwrap_err();
        assert!(format!("{err:#}").contains("Config validation failed"));
        assert!(parse_config(r#"{ "defaults": { "break_minutes": 1440, "limit": 100 } }"#).is_ok());
    }

    #[test]
    fn empty_config_is_fine() {
        let cfg = parse_config("{}").unwrap();
        assert!(cfg.defaults.is_none());
        assert!(cfg.layers("clock").pick(None, |s| s.json).is_none());
    }

    #[test]
    fn explicit_data_dirs_win() {
        let dirs = resolve_data_dirs(&[PathBuf::from("/tmp/claude-a")]).unwrap();
        assert_eq!(dirs, vec![PathBuf::from("/tmp/claude-a")]);
    }

    #[test]
    fn locales() {
        assert_eq!(resolve_locale(Some("de-DE")), Locale::de);
        assert_eq!(resolve_locale(Some("xx")), Locale::en);
        assert_eq!(resolve_locale(None), Locale::en);
    }
}
