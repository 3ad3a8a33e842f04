//! Bridge configuration loaded from TOML.
//!
//! ## Loading Order
//!
//! 1. `IMU_BRIDGE_CONFIG` environment variable (path to TOML file)
//! 2. `imu_bridge.toml` in the current working directory
//! 3. Built-in defaults (matching the original deployment values)
//!
//! Every field is optional in the TOML file; absent sections fall back to
//! the constants in [`defaults`].

pub mod defaults;

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::imu::Covariances;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {0}: {1}")]
    Io(PathBuf, #[source] std::io::Error),

    #[error("Failed to parse config file {0}: {1}")]
    Parse(PathBuf, #[source] toml::de::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

// ============================================================================
// Top-Level Config
// ============================================================================

/// Root configuration for a bridge deployment.
///
/// Load with [`BridgeConfig::load`], which searches:
/// 1. `$IMU_BRIDGE_CONFIG` env var
/// 2. `./imu_bridge.toml`
/// 3. Built-in defaults
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// WebSocket server binding
    #[serde(default)]
    pub server: ServerConfig,

    /// Published record parameters
    #[serde(default)]
    pub imu: ImuConfig,
}

/// `[server]` section: where the phone connects.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address (default "0.0.0.0")
    #[serde(default = "default_bind_addr")]
    pub addr: String,

    /// Listening port (default 5000)
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: default_bind_addr(),
            port: default_port(),
        }
    }
}

/// `[imu]` section: record labelling and fixed covariances.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImuConfig {
    /// Coordinate frame label on published records (default "imu")
    #[serde(default = "default_frame_id")]
    pub frame_id: String,

    /// Row-major 3×3 linear-acceleration covariance
    #[serde(default = "default_accel_cov")]
    pub accel_cov: [f64; 9],

    /// Row-major 3×3 angular-velocity covariance
    #[serde(default = "default_gyro_cov")]
    pub gyro_cov: [f64; 9],

    /// Row-major 3×3 orientation covariance
    #[serde(default = "default_orient_cov")]
    pub orient_cov: [f64; 9],
}

impl Default for ImuConfig {
    fn default() -> Self {
        Self {
            frame_id: default_frame_id(),
            accel_cov: default_accel_cov(),
            gyro_cov: default_gyro_cov(),
            orient_cov: default_orient_cov(),
        }
    }
}

impl ImuConfig {
    /// Bundle the configured covariance matrices for `MotionState`.
    pub fn covariances(&self) -> Covariances {
        Covariances {
            linear_acceleration: self.accel_cov,
            angular_velocity: self.gyro_cov,
            orientation: self.orient_cov,
        }
    }
}

impl BridgeConfig {
    /// Load configuration using the standard search order:
    /// 1. `$IMU_BRIDGE_CONFIG` environment variable
    /// 2. `./imu_bridge.toml` in the current working directory
    /// 3. Built-in defaults
    pub fn load() -> Self {
        if let Ok(path) = std::env::var("IMU_BRIDGE_CONFIG") {
            let p = PathBuf::from(&path);
            if p.exists() {
                match Self::load_from_file(&p) {
                    Ok(config) => {
                        info!(path = %p.display(), "Loaded config from IMU_BRIDGE_CONFIG");
                        return config;
                    }
                    Err(e) => {
                        warn!(path = %p.display(), error = %e, "Failed to load config from IMU_BRIDGE_CONFIG, falling back");
                    }
                }
            } else {
                warn!(path = %path, "IMU_BRIDGE_CONFIG points to non-existent file, falling back");
            }
        }

        let local = PathBuf::from("imu_bridge.toml");
        if local.exists() {
            match Self::load_from_file(&local) {
                Ok(config) => {
                    info!("Loaded config from ./imu_bridge.toml");
                    return config;
                }
                Err(e) => {
                    warn!(error = %e, "Failed to load ./imu_bridge.toml, using defaults");
                }
            }
        }

        info!("No imu_bridge.toml found — using built-in defaults");
        Self::default()
    }

    /// Load from a specific TOML file path.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        let config: Self =
            toml::from_str(&contents).map_err(|e| ConfigError::Parse(path.to_path_buf(), e))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations that cannot produce a usable record stream.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.imu.frame_id.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "imu.frame_id must not be empty".to_string(),
            ));
        }
        if self.server.addr.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "server.addr must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Socket address string for the listener.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.addr, self.server.port)
    }
}

fn default_bind_addr() -> String {
    defaults::DEFAULT_BIND_ADDR.to_string()
}

fn default_port() -> u16 {
    defaults::DEFAULT_PORT
}

fn default_frame_id() -> String {
    defaults::DEFAULT_FRAME_ID.to_string()
}

fn default_accel_cov() -> [f64; 9] {
    diag(defaults::DEFAULT_ACCEL_VARIANCE)
}

fn default_gyro_cov() -> [f64; 9] {
    diag(defaults::DEFAULT_GYRO_VARIANCE)
}

fn default_orient_cov() -> [f64; 9] {
    diag(defaults::DEFAULT_ORIENT_VARIANCE)
}

fn diag(variance: f64) -> [f64; 9] {
    let mut m = [0.0; 9];
    m[0] = variance;
    m[4] = variance;
    m[8] = variance;
    m
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_match_reference_deployment() {
        let config = BridgeConfig::default();
        assert_eq!(config.server.port, 5000);
        assert_eq!(config.bind_addr(), "0.0.0.0:5000");
        assert_eq!(config.imu.frame_id, "imu");
        assert_eq!(config.imu.accel_cov[0], 0.01);
        assert_eq!(config.imu.accel_cov[1], 0.0);
        assert_eq!(config.imu.gyro_cov[4], 0.0025);
        assert_eq!(config.imu.orient_cov[8], 0.001);
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config: BridgeConfig = toml::from_str(
            r#"
            [server]
            port = 9000
            "#,
        )
        .unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.addr, "0.0.0.0");
        assert_eq!(config.imu.frame_id, "imu");
    }

    #[test]
    fn test_full_toml_overrides() {
        let config: BridgeConfig = toml::from_str(
            r#"
            [server]
            addr = "127.0.0.1"
            port = 6000

            [imu]
            frame_id = "phone_imu"
            accel_cov = [0.1, 0, 0, 0, 0.1, 0, 0, 0, 0.1]
            "#,
        )
        .unwrap();
        assert_eq!(config.bind_addr(), "127.0.0.1:6000");
        assert_eq!(config.imu.frame_id, "phone_imu");
        assert_eq!(config.imu.accel_cov[4], 0.1);
        // Unspecified matrices keep their defaults
        assert_eq!(config.imu.gyro_cov[0], 0.0025);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[server]\nport = 7777").unwrap();

        let config = BridgeConfig::load_from_file(file.path()).unwrap();
        assert_eq!(config.server.port, 7777);
    }

    #[test]
    fn test_invalid_toml_is_a_parse_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[server\nport = oops").unwrap();

        let err = BridgeConfig::load_from_file(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_, _)));
    }

    #[test]
    fn test_empty_frame_id_rejected() {
        let config: BridgeConfig = toml::from_str(
            r#"
            [imu]
            frame_id = ""
            "#,
        )
        .unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_covariances_bundle() {
        let config = BridgeConfig::default();
        let cov = config.imu.covariances();
        assert_eq!(cov.linear_acceleration[0], 0.01);
        assert_eq!(cov.angular_velocity[4], 0.0025);
        assert_eq!(cov.orientation[8], 0.001);
    }
}
