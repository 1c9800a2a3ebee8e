// src/config.rs
use serde::Deserialize;
use std::{fs, path::Path, time::Duration};

/// Engine-wide replay options (spec.md §6, "Engine configuration
/// options"), loaded from a TOML file the way the teacher's `AppConfig`
/// is loaded.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Bytes/second used to compute buffer-drain waits.
    pub data_rate: u64,
    /// Absolute simulation time at which all endpoints close.
    #[serde(with = "duration_secs")]
    pub stop_time: Duration,
    /// Added to every connection's captured start time.
    #[serde(with = "duration_secs", default)]
    pub start_time_offset: Duration,
    /// Base port; the k-th connection on a client uses `start_port + k`.
    pub start_port: u16,
    /// Seed for the per-flow [0, 1]s uniform jitter applied to start times.
    pub jitter_seed: u64,
}

impl EngineConfig {
    pub fn from_file(p: &Path) -> anyhow::Result<Self> {
        let s = fs::read_to_string(p)?;
        let cfg: EngineConfig = toml::from_str(&s)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.data_rate == 0 {
            anyhow::bail!("data_rate must be > 0");
        }
        if self.stop_time.is_zero() {
            anyhow::bail!("stop_time must be > 0");
        }
        if self.start_port == 0 {
            anyhow::bail!("start_port must be nonzero");
        }
        Ok(())
    }
}

/// (De)serializes a `Duration` as a fractional-seconds TOML float, matching
/// the trace file format's own `<time_sec>` convention (spec.md §6).
mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        Ok(Duration::from_secs_f64(secs.max(0.0)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_zero_stop_time() {
        let cfg = EngineConfig {
            data_rate: 1_000_000,
            stop_time: Duration::ZERO,
            start_time_offset: Duration::ZERO,
            start_port: 50000,
            jitter_seed: 1,
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn accepts_well_formed_config() {
        let cfg = EngineConfig {
            data_rate: 1_000_000,
            stop_time: Duration::from_secs(60),
            start_time_offset: Duration::ZERO,
            start_port: 50000,
            jitter_seed: 42,
        };
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn parses_from_toml() {
        let toml = r#"
            data_rate = 1000000
            stop_time = 60.0
            start_port = 50000
            jitter_seed = 7
        "#;
        let cfg: EngineConfig = toml::from_str(toml).unwrap();
        assert_eq!(cfg.stop_time, Duration::from_secs(60));
        assert_eq!(cfg.start_time_offset, Duration::ZERO);
    }
}
