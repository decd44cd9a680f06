#![forbid(unsafe_code)]

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context as _;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::coord::phase::DisplayPeriods;
use crate::error::SaverError;

/// File name of the display settings. Looked for first as a per-user
/// override in the platform config dir, then in the client data dir.
pub const SS_CONFIG_FILE: &str = "ss_config.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub display: DisplayConfig,
    pub saver: SaverConfig,
    pub helper: HelperConfig,
}

/// How long each phase of the display cycle runs, in seconds. Zero disables
/// the corresponding behaviour.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DisplayConfig {
    pub default_ss_first: bool,
    pub default_gfx_duration: f64,
    pub science_gfx_duration: f64,
    pub science_gfx_change_interval: f64,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            default_ss_first: false,
            default_gfx_duration: 3600.0,
            science_gfx_duration: 600.0,
            science_gfx_change_interval: 600.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SaverConfig {
    /// Where the default saver executable lives.
    pub install_dir: String,
    /// Working directory for the default saver.
    pub data_dir: String,
}

impl Default for SaverConfig {
    fn default() -> Self {
        Self {
            install_dir: default_install_dir(),
            data_dir: default_data_dir(),
        }
    }
}

/// The privileged launcher helper, for hosts where the saver process may not
/// spawn graphics apps itself.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct HelperConfig {
    pub enabled: bool,
    pub path: String,
    /// Directory holding the per-user pid channel file.
    pub channel_dir: String,
    /// Route launch/stop through the client over RPC instead of invoking
    /// the helper directly.
    pub via_client: bool,
    /// User name passed along with graphics RPCs; empty means the current
    /// user.
    pub user: String,
}

impl Default for HelperConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            path: "gfx_helper".to_owned(),
            channel_dir: std::env::temp_dir().to_string_lossy().to_string(),
            via_client: false,
            user: String::new(),
        }
    }
}

fn default_install_dir() -> String {
    if cfg!(windows) {
        r"%ProgramFiles%\GridSaver".to_owned()
    } else if cfg!(target_os = "macos") {
        "/Library/Application Support/GridSaver".to_owned()
    } else {
        "/usr/lib/gridsaver".to_owned()
    }
}

#[must_use]
pub fn default_data_dir() -> String {
    if cfg!(windows) {
        r"%ProgramData%\GridSaver".to_owned()
    } else if cfg!(target_os = "macos") {
        "/Library/Application Support/GridSaver Data".to_owned()
    } else {
        "/var/lib/gridsaver".to_owned()
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), SaverError> {
        for (key, value) in [
            ("display.default_gfx_duration", self.display.default_gfx_duration),
            ("display.science_gfx_duration", self.display.science_gfx_duration),
            (
                "display.science_gfx_change_interval",
                self.display.science_gfx_change_interval,
            ),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(SaverError::Config(format!(
                    "{key} must be a non-negative number of seconds"
                )));
            }
        }
        if self.helper.enabled && self.helper.path.trim().is_empty() {
            return Err(SaverError::Config(
                "helper.path must not be empty when helper.enabled".to_owned(),
            ));
        }
        Ok(())
    }

    #[must_use]
    pub fn periods(&self) -> DisplayPeriods {
        DisplayPeriods {
            default_first: self.display.default_ss_first,
            default_period: Duration::from_secs_f64(self.display.default_gfx_duration),
            science_period: Duration::from_secs_f64(self.display.science_gfx_duration),
            change_period: Duration::from_secs_f64(self.display.science_gfx_change_interval),
        }
    }
}

/// The per-user override file. `config set` writes here so a user can tune
/// display periods without touching the shared data dir.
#[must_use]
pub fn user_config_file() -> Option<PathBuf> {
    ProjectDirs::from("", "", "gridsaver").map(|p| p.config_dir().join(SS_CONFIG_FILE))
}

/// Candidate config files, highest precedence first.
#[must_use]
pub fn candidate_files(data_dir: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();
    if let Some(user) = user_config_file() {
        files.push(user);
    }
    files.push(data_dir.join(SS_CONFIG_FILE));
    files
}

/// Load display settings: the first candidate file that exists wins, and a
/// host with no config file at all runs on the built-in defaults.
pub fn load(data_dir: &Path) -> anyhow::Result<(Config, PathBuf)> {
    load_first(&candidate_files(data_dir))
}

fn load_first(candidates: &[PathBuf]) -> anyhow::Result<(Config, PathBuf)> {
    for path in candidates {
        if path.exists() {
            let cfg = read_config(path)?;
            cfg.validate()?;
            return Ok((cfg, path.clone()));
        }
    }
    let fallback = candidates.last().cloned().unwrap_or_default();
    Ok((Config::default(), fallback))
}

fn read_config(path: &Path) -> anyhow::Result<Config> {
    if !path.exists() {
        return Ok(Config::default());
    }
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    // Unknown keys are ignored by design; old savers and new configs mix.
    toml::from_str(&raw).with_context(|| format!("failed to deserialize {}", path.display()))
}

fn read_document(path: &Path) -> anyhow::Result<toml_edit::DocumentMut> {
    if !path.exists() {
        return Ok(toml_edit::DocumentMut::new());
    }
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    raw.parse()
        .with_context(|| format!("failed to parse TOML in {}", path.display()))
}

pub fn list_resolved_toml() -> anyhow::Result<String> {
    let (cfg, _path) = load(&resolve_dir(&default_data_dir()))?;
    Ok(toml::to_string_pretty(&cfg)?)
}

pub fn get_value_string(key: &str) -> anyhow::Result<Option<String>> {
    let Some(path) = user_config_file() else {
        anyhow::bail!("failed to determine platform config directory");
    };
    get_value_string_at_path(&path, key)
}

pub fn set_value_string(key: &str, value: &str) -> anyhow::Result<()> {
    let Some(path) = user_config_file() else {
        anyhow::bail!("failed to determine platform config directory");
    };
    set_value_string_at_path(&path, key, value)
}

/// What a key's value looks like. The schema is exactly two levels deep
/// (`<table>.<option>`) and stays that way.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KeyKind {
    Bool,
    Seconds,
    Text,
}

fn key_kind(key: &str) -> Option<KeyKind> {
    Some(match key {
        "display.default_ss_first" | "helper.enabled" | "helper.via_client" => KeyKind::Bool,

        "display.default_gfx_duration"
        | "display.science_gfx_duration"
        | "display.science_gfx_change_interval" => KeyKind::Seconds,

        "saver.install_dir" | "saver.data_dir" | "helper.path" | "helper.channel_dir"
        | "helper.user" => KeyKind::Text,

        _ => return None,
    })
}

fn display_value(cfg: &Config, key: &str) -> Option<String> {
    Some(match key {
        "display.default_ss_first" => cfg.display.default_ss_first.to_string(),
        "display.default_gfx_duration" => cfg.display.default_gfx_duration.to_string(),
        "display.science_gfx_duration" => cfg.display.science_gfx_duration.to_string(),
        "display.science_gfx_change_interval" => {
            cfg.display.science_gfx_change_interval.to_string()
        }
        "saver.install_dir" => cfg.saver.install_dir.clone(),
        "saver.data_dir" => cfg.saver.data_dir.clone(),
        "helper.enabled" => cfg.helper.enabled.to_string(),
        "helper.path" => cfg.helper.path.clone(),
        "helper.channel_dir" => cfg.helper.channel_dir.clone(),
        "helper.via_client" => cfg.helper.via_client.to_string(),
        "helper.user" => cfg.helper.user.clone(),
        _ => return None,
    })
}

pub fn get_value_string_at_path(path: &Path, key: &str) -> anyhow::Result<Option<String>> {
    let cfg = read_config(path)?;
    cfg.validate()?;
    Ok(display_value(&cfg, key))
}

pub fn set_value_string_at_path(path: &Path, key: &str, value: &str) -> anyhow::Result<()> {
    let kind = key_kind(key).ok_or_else(|| SaverError::InvalidConfigKey(key.to_owned()))?;
    let Some((table, option)) = key.split_once('.') else {
        return Err(SaverError::InvalidConfigKey(key.to_owned()).into());
    };

    let item = match kind {
        KeyKind::Bool => {
            toml_edit::value(parse_bool(value).map_err(|msg| SaverError::InvalidConfigValue {
                key: key.to_owned(),
                msg,
            })?)
        }
        KeyKind::Seconds => {
            toml_edit::value(parse_seconds(value).map_err(|msg| {
                SaverError::InvalidConfigValue {
                    key: key.to_owned(),
                    msg,
                }
            })?)
        }
        KeyKind::Text => toml_edit::value(value),
    };

    let mut doc = read_document(path)?;
    let entry = doc.entry(table).or_insert(toml_edit::table());
    let target = entry
        .as_table_mut()
        .ok_or_else(|| SaverError::Config(format!("cannot set {key}: '{table}' is not a table")))?;
    target.insert(option, item);

    // Round-trip through the typed config so a bad write never lands.
    let new_raw = doc.to_string();
    let new_cfg: Config = toml::from_str(&new_raw)
        .with_context(|| format!("config update produced invalid TOML for {}", path.display()))?;
    new_cfg.validate()?;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    std::fs::write(path, new_raw.as_bytes())
        .with_context(|| format!("failed to write {}", path.display()))?;

    Ok(())
}

fn parse_bool(s: &str) -> Result<bool, String> {
    // The old XML config took 0/1; accept both spellings.
    match s.trim() {
        "true" | "1" => Ok(true),
        "false" | "0" => Ok(false),
        other => Err(format!("expected true|false|1|0, got '{other}'")),
    }
}

fn parse_seconds(s: &str) -> Result<f64, String> {
    let n: f64 = s
        .trim()
        .parse()
        .map_err(|e| format!("expected seconds, got '{s}': {e}"))?;
    if !n.is_finite() || n < 0.0 {
        return Err(format!("expected non-negative seconds, got '{s}'"));
    }
    Ok(n)
}

/// Expand `~` and environment references in a configured directory. Both
/// `${VAR}` and Windows-style `%VAR%` are understood, so install dirs like
/// `%ProgramFiles%\GridSaver` work as written; unset variables expand to
/// nothing. Relative results stay relative for the spawned process to
/// resolve.
#[must_use]
pub fn resolve_dir(input: &str) -> PathBuf {
    let expanded = expand_vars(input.trim());
    if let Some(rest) = expanded.strip_prefix('~')
        && (rest.is_empty() || rest.starts_with(['/', '\\']))
        && let Some(home) = home_dir()
    {
        return home.join(rest.trim_start_matches(['/', '\\']));
    }
    PathBuf::from(expanded)
}

fn expand_vars(input: &str) -> String {
    let re = match regex::Regex::new(r"\$\{([^}]+)\}|%([A-Za-z_][A-Za-z0-9_]*)%") {
        Ok(re) => re,
        Err(_) => return input.to_owned(),
    };
    re.replace_all(input, |caps: &regex::Captures<'_>| {
        let name = caps.get(1).or_else(|| caps.get(2)).map_or("", |m| m.as_str());
        std::env::var(name).unwrap_or_default()
    })
    .to_string()
}

fn home_dir() -> Option<PathBuf> {
    std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn negative_durations_are_rejected() {
        let mut cfg = Config::default();
        cfg.display.science_gfx_duration = -1.0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn helper_needs_a_path_when_enabled() {
        let mut cfg = Config::default();
        cfg.helper.enabled = true;
        cfg.helper.path = "  ".to_owned();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn missing_file_gives_defaults_and_unknown_keys_are_ignored() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join(SS_CONFIG_FILE);

        let cfg = read_config(&path).unwrap();
        assert_eq!(cfg, Config::default());

        std::fs::write(
            &path,
            "[display]\nscience_gfx_duration = 120.0\nsome_future_option = 3\n\n[unknown_table]\nx = 1\n",
        )
        .unwrap();
        let cfg = read_config(&path).unwrap();
        assert!((cfg.display.science_gfx_duration - 120.0).abs() < f64::EPSILON);
        assert_eq!(
            cfg.display.default_gfx_duration,
            DisplayConfig::default().default_gfx_duration
        );
    }

    #[test]
    fn first_existing_candidate_wins() {
        let dir = tempfile::tempdir().expect("tempdir");
        let user = dir.path().join("user").join(SS_CONFIG_FILE);
        let shared = dir.path().join("data").join(SS_CONFIG_FILE);
        std::fs::create_dir_all(user.parent().unwrap()).unwrap();
        std::fs::create_dir_all(shared.parent().unwrap()).unwrap();

        std::fs::write(&shared, "[display]\nscience_gfx_duration = 120.0\n").unwrap();
        let (cfg, path) = load_first(&[user.clone(), shared.clone()]).unwrap();
        assert_eq!(path, shared);
        assert!((cfg.display.science_gfx_duration - 120.0).abs() < f64::EPSILON);

        std::fs::write(&user, "[display]\nscience_gfx_duration = 45.0\n").unwrap();
        let (cfg, path) = load_first(&[user.clone(), shared]).unwrap();
        assert_eq!(path, user);
        assert!((cfg.display.science_gfx_duration - 45.0).abs() < f64::EPSILON);

        let (cfg, _path) = load_first(&[dir.path().join("nowhere.toml")]).unwrap();
        assert_eq!(cfg, Config::default());
    }

    #[test]
    fn config_set_and_get_known_keys() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join(SS_CONFIG_FILE);

        set_value_string_at_path(&path, "display.default_ss_first", "1").unwrap();
        assert_eq!(
            get_value_string_at_path(&path, "display.default_ss_first")
                .unwrap()
                .as_deref(),
            Some("true")
        );

        set_value_string_at_path(&path, "display.science_gfx_change_interval", "30").unwrap();
        assert_eq!(
            get_value_string_at_path(&path, "display.science_gfx_change_interval")
                .unwrap()
                .as_deref(),
            Some("30")
        );

        set_value_string_at_path(&path, "saver.install_dir", "~/saver").unwrap();
        assert_eq!(
            get_value_string_at_path(&path, "saver.install_dir")
                .unwrap()
                .as_deref(),
            Some("~/saver")
        );

        assert!(set_value_string_at_path(&path, "display.not_a_key", "1").is_err());
        assert!(set_value_string_at_path(&path, "no_dot", "1").is_err());
        assert!(set_value_string_at_path(&path, "display.science_gfx_duration", "-5").is_err());

        let cfg = read_config(&path).unwrap();
        cfg.validate().unwrap();
        assert!(cfg.display.default_ss_first);

        // Unknown keys read back as absent, not as an error.
        assert_eq!(get_value_string_at_path(&path, "display.not_a_key").unwrap(), None);
    }

    #[test]
    fn bool_values_accept_numeric_spellings() {
        assert_eq!(parse_bool("1"), Ok(true));
        assert_eq!(parse_bool("0"), Ok(false));
        assert_eq!(parse_bool(" true "), Ok(true));
        assert!(parse_bool("yes").is_err());
    }

    #[test]
    fn periods_convert_to_durations() {
        let mut cfg = Config::default();
        cfg.display.default_gfx_duration = 60.0;
        cfg.display.science_gfx_duration = 0.0;

        let periods = cfg.periods();
        assert_eq!(periods.default_period, Duration::from_secs(60));
        assert!(periods.science_period.is_zero());
    }

    #[test]
    fn resolve_dir_expands_tilde_and_variables() {
        assert_eq!(resolve_dir("/plain/dir"), PathBuf::from("/plain/dir"));
        assert_eq!(resolve_dir("gfx_helper"), PathBuf::from("gfx_helper"));

        if let Ok(home) = std::env::var("HOME") {
            assert_eq!(resolve_dir("~/saver"), PathBuf::from(format!("{home}/saver")));
            assert_eq!(resolve_dir("~"), PathBuf::from(home.clone()));
            assert_eq!(
                resolve_dir("${HOME}/saver"),
                PathBuf::from(format!("{home}/saver"))
            );
            assert_eq!(
                resolve_dir("%HOME%/saver"),
                PathBuf::from(format!("{home}/saver"))
            );
        }

        // Unset variables expand to nothing rather than leaking the token.
        assert_eq!(
            resolve_dir("${GRIDSAVER_NO_SUCH_VAR}/x"),
            PathBuf::from("/x")
        );
        // A home-relative name like "~backup" is a plain directory name.
        assert_eq!(resolve_dir("~backup"), PathBuf::from("~backup"));
    }
}
