use anyhow::{bail, Context, Result};
use rollcall_core::identifier::DEFAULT_ACCEPTANCE_THRESHOLD;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

const DEFAULT_SESSION_IDLE_SECS: u64 = 300;

/// Which message bus the daemon claims its name on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Bus {
    Session,
    System,
}

impl FromStr for Bus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "session" => Ok(Bus::Session),
            "system" => Ok(Bus::System),
            other => bail!("unknown bus {other:?} (expected \"session\" or \"system\")"),
        }
    }
}

/// Optional settings from `rollcalld.toml`. Unset keys fall back to defaults.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub data_dir: Option<PathBuf>,
    pub db_path: Option<PathBuf>,
    pub faces_dir: Option<PathBuf>,
    pub model_dir: Option<PathBuf>,
    pub acceptance_threshold: Option<f32>,
    pub reject_faceless: Option<bool>,
    pub bus: Option<Bus>,
    pub session_queue: Option<usize>,
    pub session_idle_secs: Option<u64>,
}

/// Daemon configuration: config file, then `ROLLCALL_*` environment overrides.
#[derive(Debug, Clone)]
pub struct Config {
    /// Root for the database and face samples.
    pub data_dir: PathBuf,
    /// SQLite database holding identities and attendance.
    pub db_path: PathBuf,
    /// One reference image per identity.
    pub faces_dir: PathBuf,
    /// Directory containing the ONNX model files.
    pub model_dir: PathBuf,
    /// Matches scoring at or above this distance are treated as unknown.
    pub acceptance_threshold: f32,
    /// Refuse registrations whose image has no detectable face.
    pub reject_faceless: bool,
    pub bus: Bus,
    /// Frames buffered per stream session before callers wait.
    pub session_queue: usize,
    /// Sessions that receive no frame for this long are closed.
    pub session_idle: Duration,
}

impl Config {
    /// Load from `ROLLCALL_CONFIG` (or the XDG default path) and the environment.
    pub fn load() -> Result<Self> {
        let path = std::env::var("ROLLCALL_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| default_config_path());
        let file = read_file_config(&path)?;
        Self::resolve(file, |key| std::env::var(key).ok())
    }

    /// Merge file settings with environment lookups from `env`.
    pub fn resolve(file: FileConfig, env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let data_dir = env("ROLLCALL_DATA_DIR")
            .map(PathBuf::from)
            .or(file.data_dir)
            .unwrap_or_else(default_data_dir);
        let db_path = env("ROLLCALL_DB_PATH")
            .map(PathBuf::from)
            .or(file.db_path)
            .unwrap_or_else(|| data_dir.join("rollcall.db"));
        let faces_dir = env("ROLLCALL_FACES_DIR")
            .map(PathBuf::from)
            .or(file.faces_dir)
            .unwrap_or_else(|| data_dir.join("faces"));
        let model_dir = env("ROLLCALL_MODEL_DIR")
            .map(PathBuf::from)
            .or(file.model_dir)
            .unwrap_or_else(rollcall_vision::default_model_dir);

        let acceptance_threshold = parse_env(&env, "ROLLCALL_ACCEPTANCE_THRESHOLD")?
            .or(file.acceptance_threshold)
            .unwrap_or(DEFAULT_ACCEPTANCE_THRESHOLD);
        if !(acceptance_threshold.is_finite() && acceptance_threshold > 0.0) {
            bail!("acceptance_threshold must be a positive number, got {acceptance_threshold}");
        }

        let reject_faceless = match env("ROLLCALL_REJECT_FACELESS") {
            Some(v) => v != "0" && !v.eq_ignore_ascii_case("false"),
            None => file.reject_faceless.unwrap_or(false),
        };
        let bus = parse_env(&env, "ROLLCALL_BUS")?
            .or(file.bus)
            .unwrap_or(Bus::Session);
        let session_queue = parse_env(&env, "ROLLCALL_SESSION_QUEUE")?
            .or(file.session_queue)
            .unwrap_or(4)
            .max(1);
        let session_idle_secs = parse_env(&env, "ROLLCALL_SESSION_IDLE_SECS")?
            .or(file.session_idle_secs)
            .unwrap_or(DEFAULT_SESSION_IDLE_SECS)
            .max(1);

        Ok(Self {
            data_dir,
            db_path,
            faces_dir,
            model_dir,
            acceptance_threshold,
            reject_faceless,
            bus,
            session_queue,
            session_idle: Duration::from_secs(session_idle_secs),
        })
    }

    /// Create the data directories if they don't exist yet.
    pub fn ensure_dirs(&self) -> Result<()> {
        for dir in [Some(self.data_dir.as_path()), self.db_path.parent(), Some(self.faces_dir.as_path())]
            .into_iter()
            .flatten()
        {
            std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
        }
        Ok(())
    }

    pub fn detector_model_path(&self) -> PathBuf {
        self.model_dir.join(rollcall_vision::DETECTOR_MODEL)
    }

    pub fn recognizer_model_path(&self) -> PathBuf {
        self.model_dir.join(rollcall_vision::RECOGNIZER_MODEL)
    }
}

fn parse_env<T>(env: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    env(key)
        .map(|v| v.parse::<T>().map_err(|e| anyhow::anyhow!("{key}={v:?}: {e}")))
        .transpose()
}

fn read_file_config(path: &Path) -> Result<FileConfig> {
    match std::fs::read_to_string(path) {
        Ok(text) => toml::from_str(&text).with_context(|| format!("parsing {}", path.display())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(FileConfig::default()),
        Err(e) => Err(e).with_context(|| format!("reading {}", path.display())),
    }
}

fn xdg_dir(var: &str, fallback: &str) -> PathBuf {
    std::env::var(var).map(PathBuf::from).unwrap_or_else(|_| {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
        PathBuf::from(home).join(fallback)
    })
}

fn default_config_path() -> PathBuf {
    xdg_dir("XDG_CONFIG_HOME", ".config").join("rollcall/rollcalld.toml")
}

fn default_data_dir() -> PathBuf {
    xdg_dir("XDG_DATA_HOME", ".local/share").join("rollcall")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_derive_from_data_dir() {
        let cfg = Config::resolve(FileConfig::default(), env_of(&[("ROLLCALL_DATA_DIR", "/srv/rc")])).unwrap();
        assert_eq!(cfg.db_path, PathBuf::from("/srv/rc/rollcall.db"));
        assert_eq!(cfg.faces_dir, PathBuf::from("/srv/rc/faces"));
        assert_eq!(cfg.acceptance_threshold, 80.0);
        assert!(!cfg.reject_faceless);
        assert_eq!(cfg.bus, Bus::Session);
        assert_eq!(cfg.session_queue, 4);
        assert_eq!(cfg.session_idle, Duration::from_secs(300));
    }

    #[test]
    fn test_file_values_used() {
        let file: FileConfig = toml::from_str(
            r#"
            data_dir = "/var/lib/rollcall"
            acceptance_threshold = 55.5
            reject_faceless = true
            bus = "system"
            "#,
        )
        .unwrap();
        let cfg = Config::resolve(file, env_of(&[])).unwrap();
        assert_eq!(cfg.faces_dir, PathBuf::from("/var/lib/rollcall/faces"));
        assert_eq!(cfg.acceptance_threshold, 55.5);
        assert!(cfg.reject_faceless);
        assert_eq!(cfg.bus, Bus::System);
    }

    #[test]
    fn test_env_overrides_file() {
        let file = FileConfig {
            acceptance_threshold: Some(55.0),
            bus: Some(Bus::System),
            reject_faceless: Some(true),
            ..Default::default()
        };
        let cfg = Config::resolve(
            file,
            env_of(&[
                ("ROLLCALL_DATA_DIR", "/d"),
                ("ROLLCALL_ACCEPTANCE_THRESHOLD", "70"),
                ("ROLLCALL_BUS", "session"),
                ("ROLLCALL_REJECT_FACELESS", "0"),
            ]),
        )
        .unwrap();
        assert_eq!(cfg.acceptance_threshold, 70.0);
        assert_eq!(cfg.bus, Bus::Session);
        assert!(!cfg.reject_faceless);
    }

    #[test]
    fn test_session_idle_timeout() {
        let file: FileConfig = toml::from_str("data_dir = \"/d\"\nsession_idle_secs = 45").unwrap();
        let cfg = Config::resolve(file, env_of(&[])).unwrap();
        assert_eq!(cfg.session_idle, Duration::from_secs(45));

        let cfg = Config::resolve(
            FileConfig::default(),
            env_of(&[("ROLLCALL_DATA_DIR", "/d"), ("ROLLCALL_SESSION_IDLE_SECS", "0")]),
        )
        .unwrap();
        assert_eq!(cfg.session_idle, Duration::from_secs(1));
    }

    #[test]
    fn test_bad_env_value_is_an_error() {
        let err = Config::resolve(
            FileConfig::default(),
            env_of(&[("ROLLCALL_DATA_DIR", "/d"), ("ROLLCALL_ACCEPTANCE_THRESHOLD", "eighty")]),
        )
        .unwrap_err();
        assert!(err.to_string().contains("ROLLCALL_ACCEPTANCE_THRESHOLD"));
    }

    #[test]
    fn test_non_positive_threshold_rejected() {
        let file = FileConfig {
            data_dir: Some("/d".into()),
            acceptance_threshold: Some(0.0),
            ..Default::default()
        };
        assert!(Config::resolve(file, env_of(&[])).is_err());
    }

    #[test]
    fn test_unknown_file_key_rejected() {
        assert!(toml::from_str::<FileConfig>("threshold = 3").is_err());
    }

    #[test]
    fn test_missing_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let file = read_file_config(&dir.path().join("absent.toml")).unwrap();
        assert!(file.data_dir.is_none());
    }
}
