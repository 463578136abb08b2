use serde::Deserialize;
use std::fs;
use std::path::Path;

use crate::services::query_analyzer::{DetectorEngineConfig, Severity};

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub logging: LoggingConfig,
    pub analysis: AnalysisConfig,
    pub output: OutputConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub file: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Least severe finding to report (default: info)
    #[serde(deserialize_with = "deserialize_severity")]
    pub min_severity: Severity,
    /// Cap on reported findings after ranking (default: unlimited)
    pub max_findings: Option<usize>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Pretty-print the JSON result (default: true)
    pub pretty: bool,
}

impl Config {
    /// Load configuration with environment variable override support
    ///
    /// Loading order:
    /// 1. Load from `explicit_path`, or the first querylens/config TOML found
    /// 2. Override with environment variables (prefixed with QUERYLENS_)
    /// 3. Validate the final configuration
    pub fn load(explicit_path: Option<&Path>) -> Result<Self, anyhow::Error> {
        // 1. Load from config file
        let mut config = match explicit_path {
            Some(path) if !path.exists() => {
                anyhow::bail!("Configuration file {} does not exist", path.display())
            },
            Some(path) => Self::from_toml(path)?,
            None => match Self::find_config_file() {
                Some(path) => Self::from_toml(Path::new(&path))?,
                None => {
                    tracing::debug!("Configuration file not found, using defaults");
                    Config::default()
                },
            },
        };

        // 2. Override with environment variables
        config.apply_env_overrides();

        // 3. Validate configuration
        config.validate()?;

        Ok(config)
    }

    /// Detector engine settings derived from the `[analysis]` section
    pub fn engine_config(&self) -> DetectorEngineConfig {
        DetectorEngineConfig {
            min_severity: self.analysis.min_severity,
            max_findings: self.analysis.max_findings,
        }
    }

    /// Apply environment variable overrides
    ///
    /// Supported environment variables:
    /// - QUERYLENS_LOG_LEVEL: Logging level (e.g., "warn,querylens=debug")
    /// - QUERYLENS_LOG_FILE: Log file path; rolled daily
    /// - QUERYLENS_MIN_SEVERITY: critical, warning or info
    /// - QUERYLENS_MAX_FINDINGS: Maximum number of findings to report
    /// - QUERYLENS_OUTPUT_PRETTY: Pretty-print JSON output (true/false)
    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(level) = lookup("QUERYLENS_LOG_LEVEL") {
            self.logging.level = level;
            tracing::info!("Override logging.level from env: {}", self.logging.level);
        }

        if let Some(file) = lookup("QUERYLENS_LOG_FILE") {
            self.logging.file = if file.trim().is_empty() { None } else { Some(file) };
            tracing::info!("Override logging.file from env: {:?}", self.logging.file);
        }

        if let Some(severity) = lookup("QUERYLENS_MIN_SEVERITY") {
            match severity.parse::<Severity>() {
                Ok(val) => {
                    self.analysis.min_severity = val;
                    tracing::info!(
                        "Override analysis.min_severity from env: {}",
                        self.analysis.min_severity
                    );
                },
                Err(e) => tracing::warn!(
                    "Invalid QUERYLENS_MIN_SEVERITY '{}': {} (keep {})",
                    severity,
                    e,
                    self.analysis.min_severity
                ),
            }
        }

        if let Some(max) = lookup("QUERYLENS_MAX_FINDINGS") {
            match max.trim().parse::<usize>() {
                Ok(val) => {
                    self.analysis.max_findings = Some(val);
                    tracing::info!("Override analysis.max_findings from env: {}", val);
                },
                Err(e) => tracing::warn!(
                    "Invalid QUERYLENS_MAX_FINDINGS '{}': {} (keep {:?})",
                    max,
                    e,
                    self.analysis.max_findings
                ),
            }
        }

        if let Some(pretty) = lookup("QUERYLENS_OUTPUT_PRETTY")
            && let Ok(val) = pretty.trim().parse()
        {
            self.output.pretty = val;
            tracing::info!("Override output.pretty from env: {}", self.output.pretty);
        }
    }

    /// Validate configuration
    fn validate(&self) -> Result<(), anyhow::Error> {
        if self.logging.level.trim().is_empty() {
            anyhow::bail!("logging.level cannot be empty");
        }

        if self.analysis.max_findings == Some(0) {
            anyhow::bail!("analysis.max_findings must be > 0");
        }

        Ok(())
    }

    fn find_config_file() -> Option<String> {
        let possible_paths =
            ["conf/querylens.toml", "querylens.toml", "conf/config.toml", "config.toml"];

        for path in &possible_paths {
            if Path::new(path).exists() {
                return Some(path.to_string());
            }
        }
        None
    }

    fn from_toml(path: &Path) -> Result<Self, anyhow::Error> {
        let content = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        tracing::debug!("Configuration loaded from {}", path.display());
        Ok(config)
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "warn,querylens=info".to_string(), file: None }
    }
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self { min_severity: Severity::Info, max_findings: None }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self { pretty: true }
    }
}

// Accepts any casing ("warning", "WARNING", "Warn") for the severity threshold
fn deserialize_severity<'de, D>(deserializer: D) -> Result<Severity, D::Error>
where
    D: serde::Deserializer<'de>,
{
    struct Visitor;
    impl<'de> serde::de::Visitor<'de> for Visitor {
        type Value = Severity;
        fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
            write!(f, "one of 'critical', 'warning' or 'info'")
        }
        fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            v.parse().map_err(E::custom)
        }
        fn visit_string<E>(self, v: String) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            v.parse().map_err(E::custom)
        }
    }
    deserializer.deserialize_str(Visitor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn overrides(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> =
            pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.analysis.min_severity, Severity::Info);
        assert!(config.analysis.max_findings.is_none());
        assert!(config.output.pretty);
        assert!(config.logging.file.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_toml_sections() {
        let config: Config = toml::from_str(
            r#"
            [logging]
            level = "debug"
            file = "logs/querylens.log"

            [analysis]
            min_severity = "Warning"
            max_findings = 10

            [output]
            pretty = false
            "#,
        )
        .unwrap();
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.file.as_deref(), Some("logs/querylens.log"));
        assert_eq!(config.analysis.min_severity, Severity::Warning);
        assert_eq!(config.analysis.max_findings, Some(10));
        assert!(!config.output.pretty);

        let engine = config.engine_config();
        assert_eq!(engine.min_severity, Severity::Warning);
        assert_eq!(engine.max_findings, Some(10));
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: Config = toml::from_str("[analysis]\nmin_severity = \"critical\"\n").unwrap();
        assert_eq!(config.analysis.min_severity, Severity::Critical);
        assert!(config.output.pretty);
        assert_eq!(config.logging.level, LoggingConfig::default().level);
    }

    #[test]
    fn test_invalid_severity_is_rejected() {
        let err = toml::from_str::<Config>("[analysis]\nmin_severity = \"urgent\"\n").unwrap_err();
        assert!(err.to_string().contains("urgent"));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config.apply_overrides(overrides(&[
            ("QUERYLENS_LOG_LEVEL", "trace"),
            ("QUERYLENS_MIN_SEVERITY", "warn"),
            ("QUERYLENS_MAX_FINDINGS", "5"),
            ("QUERYLENS_OUTPUT_PRETTY", "false"),
            ("QUERYLENS_LOG_FILE", "/tmp/ql.log"),
        ]));
        assert_eq!(config.logging.level, "trace");
        assert_eq!(config.analysis.min_severity, Severity::Warning);
        assert_eq!(config.analysis.max_findings, Some(5));
        assert!(!config.output.pretty);
        assert_eq!(config.logging.file.as_deref(), Some("/tmp/ql.log"));
    }

    #[test]
    fn test_invalid_env_values_are_ignored() {
        let mut config = Config::default();
        config.apply_overrides(overrides(&[
            ("QUERYLENS_MIN_SEVERITY", "urgent"),
            ("QUERYLENS_MAX_FINDINGS", "many"),
            ("QUERYLENS_OUTPUT_PRETTY", "sometimes"),
        ]));
        assert_eq!(config.analysis.min_severity, Severity::Info);
        assert!(config.analysis.max_findings.is_none());
        assert!(config.output.pretty);
    }

    #[test]
    fn test_validate() {
        let mut config = Config::default();
        config.analysis.max_findings = Some(0);
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.logging.level = "  ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_explicit_file_fails() {
        assert!(Config::load(Some(Path::new("/nonexistent/querylens.toml"))).is_err());
    }
}
