//! Collector configuration.
//!
//! Loaded from YAML, then overridden from `SYMPTOM_*` environment variables.
//! Every field has a default so an absent file is a valid configuration.
//! The resulting value is handed to components at construction time; nothing
//! reads configuration from global state.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::domain::error::ConfigError;

/// Environment variable prefix for overrides.
pub const ENV_PREFIX: &str = "SYMPTOM_";

/// Keywords matched against watched log lines when none are configured.
pub const DEFAULT_ERROR_KEYWORDS: &[&str] = &[
    "error",
    "ERROR",
    "fatal",
    "FATAL",
    "exception",
    "EXCEPTION",
    "panic",
    "PANIC",
];

/// Configuration log, core-dump store, trace error stream, proxy log, dump log.
pub const DEFAULT_LOG_PATHS: &[&str] = &[
    "/cmconfig.log",
    "/logstore/TspCore",
    "/RTPTraceError",
    "/Envoy",
    "/dumplog",
];

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectorConfig {
    pub kubernetes: KubernetesConfig,
    pub logging: LoggingConfig,
    pub symptom: SymptomConfig,
    pub paths: PathsConfig,
    pub sources: SourcesConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KubernetesConfig {
    /// Namespace used when none is given on the command line.
    pub namespace: String,
    /// `kubectl` binary to invoke. Also substituted for `{kubectl}` in
    /// source command templates.
    pub kubectl: String,
    /// Deadline for a single cluster query.
    #[serde(with = "duration_format")]
    pub timeout: Duration,
}

impl Default for KubernetesConfig {
    fn default() -> Self {
        Self {
            namespace: "default".to_string(),
            kubectl: "kubectl".to_string(),
            timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
        }
    }
}

impl LoggingConfig {
    /// Parsed level, falling back to INFO for unknown strings.
    pub fn tracing_level(&self) -> tracing::Level {
        self.level.parse().unwrap_or(tracing::Level::INFO)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SymptomConfig {
    /// Case-sensitive substrings; any hit marks a line as an error.
    pub error_keywords: Vec<String>,
    /// Log watcher poll interval.
    #[serde(with = "duration_format")]
    pub check_interval: Duration,
    /// Ceiling on the exercising phase.
    #[serde(with = "duration_format")]
    pub collection_timeout: Duration,
    /// Capacity of the error event channel. Producers block when it is full.
    pub channel_capacity: usize,
    /// Root directory for session artifacts.
    pub output_dir: PathBuf,
}

impl Default for SymptomConfig {
    fn default() -> Self {
        Self {
            error_keywords: DEFAULT_ERROR_KEYWORDS.iter().map(|s| s.to_string()).collect(),
            check_interval: Duration::from_secs(1),
            collection_timeout: Duration::from_secs(10 * 60),
            channel_capacity: 1024,
            output_dir: PathBuf::from("./symptom-collection"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Paths watched for the duration of a session.
    pub log_paths: Vec<PathBuf>,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            log_paths: DEFAULT_LOG_PATHS.iter().map(PathBuf::from).collect(),
        }
    }
}

/// Command templates for the evidence sources.
///
/// Templates are argv vectors; `{namespace}`, `{deployment}`, `{fragment}`
/// and `{session}` are substituted before execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourcesConfig {
    pub trace: InstrumentConfig,
    pub capture: InstrumentConfig,
    pub exerciser: ExerciserConfig,
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            trace: InstrumentConfig::with_extension("trace"),
            capture: InstrumentConfig::with_extension("pcap"),
            exerciser: ExerciserConfig::default(),
        }
    }
}

/// Per-deployment toggle commands for tracing or packet capture.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstrumentConfig {
    pub enable: Vec<String>,
    pub disable: Vec<String>,
    /// Optional command whose stdout is stored as the artifact.
    pub collect: Vec<String>,
    pub artifact_extension: String,
}

impl InstrumentConfig {
    fn with_extension(ext: &str) -> Self {
        Self {
            artifact_extension: ext.to_string(),
            ..Self::default()
        }
    }

    pub fn is_configured(&self) -> bool {
        !self.enable.is_empty()
    }
}

/// The workload-exercising test run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExerciserConfig {
    pub command: Vec<String>,
    /// Optional command whose stdout is stored as the test log.
    pub collect: Vec<String>,
    pub artifact_name: String,
}

impl Default for ExerciserConfig {
    fn default() -> Self {
        let argv = |parts: &[&str]| parts.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        Self {
            command: argv(&[
                "{kubectl}",
                "exec",
                "-n",
                "{namespace}",
                "testclient",
                "--",
                "pybot",
                "--outputdir",
                "/tmp/symptom-{session}",
                "/opt/tests",
            ]),
            collect: argv(&[
                "{kubectl}",
                "exec",
                "-n",
                "{namespace}",
                "testclient",
                "--",
                "cat",
                "/tmp/symptom-{session}/log.html",
            ]),
            artifact_name: "log.html".to_string(),
        }
    }
}

impl CollectorConfig {
    /// Candidate config files searched when no explicit path is given.
    pub fn search_paths() -> Vec<PathBuf> {
        let mut paths = vec![
            PathBuf::from("config.yaml"),
            PathBuf::from("configs/config.yaml"),
        ];
        if let Ok(home) = std::env::var("HOME") {
            paths.push(Path::new(&home).join(".symptom-collection/config.yaml"));
        }
        paths.push(PathBuf::from("/etc/symptom-collection/config.yaml"));
        paths
    }

    /// Load configuration from `path` (or the search paths), apply
    /// environment overrides and validate.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(p) => {
                if !p.exists() {
                    return Err(ConfigError::NotFound(p.to_path_buf()));
                }
                Self::from_file(p)?
            }
            None => match Self::search_paths().into_iter().find(|p| p.is_file()) {
                Some(found) => Self::from_file(&found)?,
                None => {
                    debug!("no config file found, using defaults");
                    Self::default()
                }
            },
        };

        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a YAML file. Missing sections fall back to defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        info!(path = %path.display(), "loading config");
        Self::from_yaml(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_yaml(content: &str) -> Result<Self, serde_yaml::Error> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(content)
    }

    /// Apply `SYMPTOM_*` overrides using `lookup` to read variables.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(&format!("{}{}", ENV_PREFIX, name));

        if let Some(ns) = var("NAMESPACE") {
            self.kubernetes.namespace = ns;
        }
        if let Some(kubectl) = var("KUBECTL") {
            self.kubernetes.kubectl = kubectl;
        }
        if let Some(level) = var("LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(format) = var("LOG_FORMAT") {
            self.logging.format = match format.to_lowercase().as_str() {
                "json" => LogFormat::Json,
                "text" => LogFormat::Text,
                other => {
                    return Err(ConfigError::Invalid {
                        field: "logging.format".to_string(),
                        reason: format!("unknown format '{}'", other),
                    })
                }
            };
        }
        if let Some(interval) = var("CHECK_INTERVAL") {
            self.symptom.check_interval = parse_duration(&interval)?;
        }
        if let Some(timeout) = var("COLLECTION_TIMEOUT") {
            self.symptom.collection_timeout = parse_duration(&timeout)?;
        }
        if let Some(dir) = var("OUTPUT_DIR") {
            self.symptom.output_dir = PathBuf::from(dir);
        }
        Ok(())
    }

    /// Reject settings the collector cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |field: &str, reason: &str| ConfigError::Invalid {
            field: field.to_string(),
            reason: reason.to_string(),
        };

        if self.symptom.error_keywords.is_empty() {
            return Err(invalid("symptom.error_keywords", "must not be empty"));
        }
        if self.symptom.error_keywords.iter().any(|k| k.is_empty()) {
            return Err(invalid("symptom.error_keywords", "keywords must not be blank"));
        }
        if self.symptom.check_interval.is_zero() {
            return Err(invalid("symptom.check_interval", "must be greater than zero"));
        }
        if self.symptom.collection_timeout.is_zero() {
            return Err(invalid("symptom.collection_timeout", "must be greater than zero"));
        }
        if self.symptom.channel_capacity == 0 {
            return Err(invalid("symptom.channel_capacity", "must be greater than zero"));
        }
        Ok(())
    }
}

/// Parse `500ms`, `1s`, `10m`, `2h` or a bare number of seconds.
pub fn parse_duration(raw: &str) -> Result<Duration, ConfigError> {
    let s = raw.trim();
    let invalid = || ConfigError::InvalidDuration(raw.to_string());

    let split = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    let (digits, unit) = s.split_at(split);
    if digits.is_empty() {
        return Err(invalid());
    }
    let value: u64 = digits.parse().map_err(|_| invalid())?;

    let secs = |factor: u64| value.checked_mul(factor).map(Duration::from_secs);
    match unit.trim() {
        "ms" => Ok(Duration::from_millis(value)),
        "" | "s" => Ok(Duration::from_secs(value)),
        "m" => secs(60).ok_or_else(invalid),
        "h" => secs(3600).ok_or_else(invalid),
        _ => Err(invalid()),
    }
}

/// Render a duration in the largest unit that represents it exactly.
pub fn format_duration_compact(d: Duration) -> String {
    let ms = d.as_millis();
    if ms % 1000 != 0 {
        return format!("{}ms", ms);
    }
    let secs = d.as_secs();
    if secs != 0 && secs % 3600 == 0 {
        format!("{}h", secs / 3600)
    } else if secs != 0 && secs % 60 == 0 {
        format!("{}m", secs / 60)
    } else {
        format!("{}s", secs)
    }
}

/// Serde adapter: durations as `"10m"`-style strings or integer seconds.
mod duration_format {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawDuration {
        Seconds(u64),
        Text(String),
    }

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&super::format_duration_compact(*d))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        match RawDuration::deserialize(d)? {
            RawDuration::Seconds(secs) => Ok(Duration::from_secs(secs)),
            RawDuration::Text(text) => {
                super::parse_duration(&text).map_err(serde::de::Error::custom)
            }
        }
    }
}
