//! Run configuration: compiled-in constants with optional settings-file overrides.
//!
//! Every timeout, device path and the log marker has a default here. The remote
//! endpoint is the one value with no default; it must come from the settings file
//! or the `DEVICE_STAGER_ENDPOINT` environment variable.

pub mod loader;

use crate::error::ConfigError;
use crate::models::StagingPlan;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

pub use loader::{
    apply_env_overrides, get_global_settings_path, load_config_from_file, load_run_config,
    save_config_to_file,
};

/// Environment variable overriding `RunConfig::payload_endpoint`
pub const ENDPOINT_ENV: &str = "DEVICE_STAGER_ENDPOINT";

/// Environment variable overriding `RunConfig::tool_path`
pub const TOOL_ENV: &str = "DEVICE_STAGER_TOOL";

/// Default device-management executable name.
pub fn default_tool_path() -> PathBuf {
    if cfg!(windows) {
        PathBuf::from("ios.exe")
    } else {
        PathBuf::from("ios")
    }
}

/// Serialise `Duration` as fractional seconds.
mod secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        if !secs.is_finite() || secs < 0.0 {
            return Err(serde::de::Error::custom(format!(
                "duration must be a non-negative number of seconds, got {}",
                secs
            )));
        }
        Ok(Duration::from_secs_f64(secs))
    }
}

/// Every wait bound and cadence used by the sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Timings {
    /// Initial device discovery before the sequence starts
    #[serde(with = "secs")]
    pub initial_discovery: Duration,

    /// Cadence between device-listing attempts
    #[serde(with = "secs")]
    pub discovery_interval: Duration,

    /// Sleep after a reboot before discovery starts again
    #[serde(with = "secs")]
    pub reconnect_grace: Duration,

    /// Reconnect bound after the phase 1 reset
    #[serde(with = "secs")]
    pub reset_reconnect: Duration,

    /// Reconnect bound after the phase 7 and phase 9 reboots
    #[serde(with = "secs")]
    pub reboot_reconnect: Duration,

    /// Bound on the log scan for the identity token
    #[serde(with = "secs")]
    pub identity_scan: Duration,

    /// Cadence of remote existence checks
    #[serde(with = "secs")]
    pub file_poll_interval: Duration,

    /// Bound on the metadata marker appearing (phase 8)
    #[serde(with = "secs")]
    pub metadata_appearance: Duration,

    /// Bound on the trigger marker appearing (phase 9)
    #[serde(with = "secs")]
    pub trigger_appearance: Duration,

    /// Bound on the metadata marker vanishing after the trigger
    #[serde(with = "secs")]
    pub metadata_disappearance: Duration,

    /// Settle delay after spawning the tunnel daemon
    #[serde(with = "secs")]
    pub tunnel_settle: Duration,

    /// Per-request HTTP timeout
    #[serde(with = "secs")]
    pub http_timeout: Duration,

    /// Bound on each one-shot device tool command
    #[serde(with = "secs")]
    pub command_timeout: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        Timings {
            initial_discovery: Duration::from_secs(30),
            discovery_interval: Duration::from_secs(2),
            reconnect_grace: Duration::from_secs(10),
            reset_reconnect: Duration::from_secs(120),
            reboot_reconnect: Duration::from_secs(300),
            identity_scan: Duration::from_secs(60),
            file_poll_interval: Duration::from_secs(2),
            metadata_appearance: Duration::from_secs(30),
            trigger_appearance: Duration::from_secs(300),
            metadata_disappearance: Duration::from_secs(300),
            tunnel_settle: Duration::from_secs(3),
            http_timeout: Duration::from_secs(120),
            command_timeout: Duration::from_secs(120),
        }
    }
}

impl Timings {
    fn named(&self) -> [(&'static str, Duration); 13] {
        [
            ("initial_discovery", self.initial_discovery),
            ("discovery_interval", self.discovery_interval),
            ("reconnect_grace", self.reconnect_grace),
            ("reset_reconnect", self.reset_reconnect),
            ("reboot_reconnect", self.reboot_reconnect),
            ("identity_scan", self.identity_scan),
            ("file_poll_interval", self.file_poll_interval),
            ("metadata_appearance", self.metadata_appearance),
            ("trigger_appearance", self.trigger_appearance),
            ("metadata_disappearance", self.metadata_disappearance),
            ("tunnel_settle", self.tunnel_settle),
            ("http_timeout", self.http_timeout),
            ("command_timeout", self.command_timeout),
        ]
    }
}

/// Log line marker that carries the identity token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogMarkerConfig {
    /// Literal substring a candidate line must contain
    pub needle: String,

    /// Regex applied to candidate lines; capture group 1 is the token
    pub pattern: String,
}

impl Default for LogMarkerConfig {
    fn default() -> Self {
        LogMarkerConfig {
            needle: "BLDatabaseManager.sqlite".to_string(),
            pattern: r"SystemGroup/([A-F0-9\-]{36})".to_string(),
        }
    }
}

/// Complete configuration of one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Device-management executable (bare name searched on PATH, or a path)
    pub tool_path: PathBuf,

    /// Token exchange endpoint; no compiled-in default
    pub payload_endpoint: Option<String>,

    /// Directory for the ephemeral payload file (system temp dir when unset)
    pub staging_dir: Option<PathBuf>,

    /// Device-side paths
    pub plan: StagingPlan,

    /// Identity marker searched in the device log
    pub marker: LogMarkerConfig,

    /// Wait bounds and cadences
    pub timings: Timings,
}

impl Default for RunConfig {
    fn default() -> Self {
        RunConfig {
            tool_path: default_tool_path(),
            payload_endpoint: None,
            staging_dir: None,
            plan: StagingPlan::default(),
            marker: LogMarkerConfig::default(),
            timings: Timings::default(),
        }
    }
}

impl RunConfig {
    /// Check everything the sequence relies on before touching the device.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tool_path.as_os_str().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "tool_path cannot be empty".to_string(),
            ));
        }

        let endpoint = self.payload_endpoint.as_deref().map(str::trim).unwrap_or("");
        if endpoint.is_empty() {
            return Err(ConfigError::ValidationFailed(format!(
                "payload_endpoint is not set (settings file or {})",
                ENDPOINT_ENV
            )));
        }
        match reqwest::Url::parse(endpoint) {
            Ok(url) if url.scheme() == "http" || url.scheme() == "https" => {}
            Ok(url) => {
                return Err(ConfigError::ValidationFailed(format!(
                    "payload_endpoint must be http(s), got scheme '{}'",
                    url.scheme()
                )))
            }
            Err(e) => {
                return Err(ConfigError::ValidationFailed(format!(
                    "payload_endpoint is not a valid URL: {}",
                    e
                )))
            }
        }

        let plan = &self.plan;
        let device_paths = plan
            .artifact_paths()
            .chain([plan.metadata_marker.as_str(), plan.trigger_marker.as_str()]);
        for path in device_paths {
            if !path.starts_with('/') {
                return Err(ConfigError::ValidationFailed(format!(
                    "device path must be absolute: '{}'",
                    path
                )));
            }
        }

        for (name, value) in self.timings.named() {
            if value.is_zero() {
                return Err(ConfigError::ValidationFailed(format!(
                    "timing '{}' must be greater than zero",
                    name
                )));
            }
        }

        if self.marker.needle.is_empty() {
            return Err(ConfigError::ValidationFailed(
                "marker.needle cannot be empty".to_string(),
            ));
        }
        regex::Regex::new(&self.marker.pattern).map_err(|e| {
            ConfigError::ValidationFailed(format!("marker.pattern does not compile: {}", e))
        })?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> RunConfig {
        RunConfig {
            payload_endpoint: Some("https://payload.example.test/get".to_string()),
            ..RunConfig::default()
        }
    }

    #[test]
    fn test_defaults_match_fixed_constants() {
        let t = Timings::default();
        assert_eq!(t.reset_reconnect, Duration::from_secs(120));
        assert_eq!(t.reboot_reconnect, Duration::from_secs(300));
        assert_eq!(t.identity_scan, Duration::from_secs(60));
        assert_eq!(t.metadata_appearance, Duration::from_secs(30));
        assert_eq!(t.trigger_appearance, Duration::from_secs(300));
        assert_eq!(t.file_poll_interval, Duration::from_secs(2));
        assert_eq!(t.reconnect_grace, Duration::from_secs(10));
    }

    #[test]
    fn test_default_has_no_endpoint() {
        let err = RunConfig::default().validate().unwrap_err();
        assert!(err.to_string().contains("payload_endpoint"));
    }

    #[test]
    fn test_valid_config_passes() {
        assert!(valid().validate().is_ok());
    }

    #[test]
    fn test_rejects_non_http_endpoint() {
        let mut cfg = valid();
        cfg.payload_endpoint = Some("ftp://payload.example.test/".to_string());
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_rejects_relative_device_path() {
        let mut cfg = valid();
        cfg.plan.trigger_marker = "Books/asset.epub".to_string();
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("absolute"));
    }

    #[test]
    fn test_rejects_zero_timing() {
        let mut cfg = valid();
        cfg.timings.file_poll_interval = Duration::ZERO;
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("file_poll_interval"));
    }

    #[test]
    fn test_rejects_bad_pattern() {
        let mut cfg = valid();
        cfg.marker.pattern = "SystemGroup/([A-F".to_string();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_timings_serialise_as_seconds() {
        let json = serde_json::to_value(Timings::default()).unwrap();
        assert_eq!(json["identity_scan"], serde_json::json!(60.0));

        let parsed: Timings =
            serde_json::from_str(r#"{"trigger_appearance": 0.5}"#).unwrap();
        assert_eq!(parsed.trigger_appearance, Duration::from_millis(500));
        assert_eq!(parsed.reboot_reconnect, Duration::from_secs(300));
    }

    #[test]
    fn test_negative_duration_rejected() {
        let parsed: Result<Timings, _> = serde_json::from_str(r#"{"tunnel_settle": -1}"#);
        assert!(parsed.is_err());
    }
}
