//! TOML configuration loader with validation.
//!
//! Every numeric bound is checked after parse, before anything is built
//! from the config: a malformed value is rejected at this boundary and
//! never reaches a controller or the endpoint.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::control::pid::PidSettings;
use tanklab_endpoint::{EndpointConfig, TANK_COUNT};

// ─── Error Type ─────────────────────────────────────────────────────

/// Configuration loading/validation error.
#[derive(Debug)]
pub enum ConfigError {
    /// File I/O error.
    IoError(String),
    /// TOML parse error.
    ParseError(String),
    /// Parameter validation error.
    ValidationError(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::IoError(e) => write!(f, "config I/O error: {e}"),
            Self::ParseError(e) => write!(f, "config parse error: {e}"),
            Self::ValidationError(e) => write!(f, "config validation: {e}"),
        }
    }
}

impl std::error::Error for ConfigError {}

// ─── Sections ───────────────────────────────────────────────────────

/// `[endpoint]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EndpointSection {
    /// Remote server URL.
    pub url: String,
    /// Upper bound for a single blocking remote call [ms].
    pub io_timeout_ms: u64,
    /// Change-subscription sampling period [ms].
    pub subscription_period_ms: u64,
}

impl Default for EndpointSection {
    fn default() -> Self {
        Self {
            url: "opc.tcp://192.168.1.115:4840/freeopcua/server/".to_string(),
            io_timeout_ms: 500,
            subscription_period_ms: 100,
        }
    }
}

/// `[scheduler]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SchedulerSection {
    /// Control loop tick period [ms].
    pub poll_period_ms: u64,
}

impl Default for SchedulerSection {
    fn default() -> Self {
        Self {
            poll_period_ms: 1000,
        }
    }
}

/// `[pid]` section, shared by both level loops.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PidSection {
    pub kp: f64,
    pub ki: f64,
    pub kd: f64,
    /// Level setpoint for tank 1 [cm].
    pub setpoint_h1: f64,
    /// Level setpoint for tank 2 [cm].
    pub setpoint_h2: f64,
    pub anti_windup_gain: f64,
    /// Sample period of the loops [s].
    pub dt: f64,
    /// Actuator output bounds [V].
    pub output_min: f64,
    pub output_max: f64,
}

impl Default for PidSection {
    fn default() -> Self {
        Self {
            kp: 0.3,
            ki: 0.0,
            kd: 0.0,
            setpoint_h1: 0.0,
            setpoint_h2: 0.0,
            anti_windup_gain: 0.0,
            dt: 1.0,
            output_min: 0.0,
            output_max: 10.0,
        }
    }
}

/// `[alarms]` section: optional low-level threshold per tank [cm].
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AlarmSection {
    pub tank1: Option<f64>,
    pub tank2: Option<f64>,
    pub tank3: Option<f64>,
    pub tank4: Option<f64>,
}

// ─── Config Bundle ──────────────────────────────────────────────────

/// Complete validated supervisor configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    pub endpoint: EndpointSection,
    pub scheduler: SchedulerSection,
    pub pid: PidSection,
    pub alarms: AlarmSection,
}

impl SupervisorConfig {
    /// Validate all parameter bounds.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.endpoint.url.is_empty() {
            return Err(ConfigError::ValidationError(
                "endpoint.url must not be empty".into(),
            ));
        }
        if self.endpoint.io_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "endpoint.io_timeout_ms must be > 0".into(),
            ));
        }
        if self.endpoint.subscription_period_ms == 0 {
            return Err(ConfigError::ValidationError(
                "endpoint.subscription_period_ms must be > 0".into(),
            ));
        }
        if self.scheduler.poll_period_ms == 0 {
            return Err(ConfigError::ValidationError(
                "scheduler.poll_period_ms must be > 0".into(),
            ));
        }

        let p = &self.pid;
        for (name, value) in [
            ("kp", p.kp),
            ("ki", p.ki),
            ("kd", p.kd),
            ("setpoint_h1", p.setpoint_h1),
            ("setpoint_h2", p.setpoint_h2),
            ("anti_windup_gain", p.anti_windup_gain),
            ("dt", p.dt),
            ("output_min", p.output_min),
            ("output_max", p.output_max),
        ] {
            if !value.is_finite() {
                return Err(ConfigError::ValidationError(format!(
                    "pid.{name} must be finite, got {value}"
                )));
            }
        }
        if p.dt <= 0.0 {
            return Err(ConfigError::ValidationError(format!(
                "pid.dt must be > 0, got {}",
                p.dt
            )));
        }
        if p.output_min > p.output_max {
            return Err(ConfigError::ValidationError(format!(
                "pid output limits inverted: {} > {}",
                p.output_min, p.output_max
            )));
        }
        if p.anti_windup_gain < 0.0 {
            return Err(ConfigError::ValidationError(format!(
                "pid.anti_windup_gain must be >= 0, got {}",
                p.anti_windup_gain
            )));
        }

        for (name, threshold) in [
            ("tank1", self.alarms.tank1),
            ("tank2", self.alarms.tank2),
            ("tank3", self.alarms.tank3),
            ("tank4", self.alarms.tank4),
        ] {
            if let Some(t) = threshold
                && !t.is_finite()
            {
                return Err(ConfigError::ValidationError(format!(
                    "alarms.{name} must be finite, got {t}"
                )));
            }
        }

        Ok(())
    }

    /// Endpoint configuration derived from the `[endpoint]` section.
    pub fn endpoint_config(&self) -> EndpointConfig {
        EndpointConfig {
            url: self.endpoint.url.clone(),
            io_timeout: Duration::from_millis(self.endpoint.io_timeout_ms),
            subscription_period: Duration::from_millis(self.endpoint.subscription_period_ms),
        }
    }

    /// Scheduler tick period.
    pub fn poll_period(&self) -> Duration {
        Duration::from_millis(self.scheduler.poll_period_ms)
    }

    /// PID settings for one loop with the given setpoint.
    pub fn pid_settings(&self, setpoint: f64) -> PidSettings {
        PidSettings {
            kp: self.pid.kp,
            ki: self.pid.ki,
            kd: self.pid.kd,
            setpoint,
            dt: self.pid.dt,
            anti_windup_gain: self.pid.anti_windup_gain,
            output_limits: (self.pid.output_min, self.pid.output_max),
        }
    }

    /// Alarm thresholds in tank order.
    pub fn thresholds(&self) -> [Option<f64>; TANK_COUNT] {
        [
            self.alarms.tank1,
            self.alarms.tank2,
            self.alarms.tank3,
            self.alarms.tank4,
        ]
    }
}

// ─── Loading Functions ──────────────────────────────────────────────

/// Load and validate the supervisor configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<SupervisorConfig, ConfigError> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::IoError(format!("failed to read {}: {e}", path.display())))?;
    load_config_from_str(&raw)
}

/// Parse and validate config from a TOML string (test seam).
pub fn load_config_from_str(raw: &str) -> Result<SupervisorConfig, ConfigError> {
    let config: SupervisorConfig =
        toml::from_str(raw).map_err(|e| ConfigError::ParseError(e.to_string()))?;
    config.validate()?;
    Ok(config)
}

// ─── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn empty_config_uses_defaults() {
        let config = load_config_from_str("").unwrap();
        assert_eq!(config.scheduler.poll_period_ms, 1000);
        assert_eq!(config.endpoint.subscription_period_ms, 100);
        assert_eq!(config.pid.kp, 0.3);
        assert_eq!(config.thresholds(), [None; 4]);
    }

    #[test]
    fn full_config_parses() {
        let raw = r#"
            [endpoint]
            url = "opc.tcp://10.0.0.5:4840/"
            io_timeout_ms = 250
            subscription_period_ms = 50

            [scheduler]
            poll_period_ms = 500

            [pid]
            kp = 1.5
            ki = 0.2
            kd = 0.05
            setpoint_h1 = 12.0
            setpoint_h2 = 12.5
            anti_windup_gain = 0.8
            dt = 0.5
            output_min = 0.0
            output_max = 10.0

            [alarms]
            tank1 = 10.0
            tank3 = 4.0
        "#;
        let config = load_config_from_str(raw).unwrap();
        assert_eq!(config.endpoint.url, "opc.tcp://10.0.0.5:4840/");
        assert_eq!(config.poll_period(), Duration::from_millis(500));
        let s = config.pid_settings(config.pid.setpoint_h1);
        assert_eq!(s.setpoint, 12.0);
        assert_eq!(s.output_limits, (0.0, 10.0));
        assert_eq!(config.thresholds(), [Some(10.0), None, Some(4.0), None]);
    }

    #[test]
    fn rejects_non_positive_dt() {
        let err = load_config_from_str("[pid]\ndt = 0.0\n").unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));
    }

    #[test]
    fn rejects_inverted_output_limits() {
        let raw = "[pid]\noutput_min = 5.0\noutput_max = 1.0\n";
        let err = load_config_from_str(raw).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));
    }

    #[test]
    fn rejects_zero_poll_period() {
        let err = load_config_from_str("[scheduler]\npoll_period_ms = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));
    }

    #[test]
    fn rejects_negative_anti_windup() {
        let err = load_config_from_str("[pid]\nanti_windup_gain = -0.1\n").unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));
    }

    #[test]
    fn rejects_malformed_toml() {
        let err = load_config_from_str("not toml at all [").unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(_)));
    }

    #[test]
    fn load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[scheduler]\npoll_period_ms = 200").unwrap();
        let config = load_config(file.path()).unwrap();
        assert_eq!(config.scheduler.poll_period_ms, 200);
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = load_config(Path::new("/nonexistent/supervisor.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::IoError(_)));
    }
}
