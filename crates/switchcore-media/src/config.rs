//! Media-plane tunables: port range, reaper cadence, DTMF timing, and
//! recording/tone defaults. Signalling constructs one of these at startup
//! and shares it across the session registry, conference manager, and DTMF
//! manager.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level configuration for the media plane.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaConfig {
    /// Lowest RTP port handed out by the port pool; must be even.
    pub port_min: u16,
    /// Highest port in the pool's range.
    pub port_max: u16,
    /// A session idle this long is reaped even without an explicit release.
    #[serde(with = "duration_secs")]
    pub idle_session_timeout: Duration,
    /// How often the reaper scans for idle sessions.
    #[serde(with = "duration_secs")]
    pub reaper_interval: Duration,
    pub dtmf: DtmfConfig,
    pub tone: ToneConfig,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            port_min: 10000,
            port_max: 20000,
            idle_session_timeout: Duration::from_secs(60),
            reaper_interval: Duration::from_secs(30),
            dtmf: DtmfConfig::default(),
            tone: ToneConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DtmfConfig {
    #[serde(with = "duration_secs")]
    pub first_digit_timeout: Duration,
    #[serde(with = "duration_secs")]
    pub inter_digit_timeout: Duration,
}

impl Default for DtmfConfig {
    fn default() -> Self {
        Self {
            first_digit_timeout: Duration::from_secs(5),
            inter_digit_timeout: Duration::from_secs(3),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ToneConfig {
    pub frequency_hz: f64,
    pub amplitude: f64,
    pub join_duration_ms: u64,
    pub leave_duration_ms: u64,
}

impl Default for ToneConfig {
    fn default() -> Self {
        Self {
            frequency_hz: 440.0,
            amplitude: 0.25,
            join_duration_ms: 200,
            leave_duration_ms: 100,
        }
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(d)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_documented_tunables() {
        let cfg = MediaConfig::default();
        assert_eq!(cfg.idle_session_timeout, Duration::from_secs(60));
        assert_eq!(cfg.reaper_interval, Duration::from_secs(30));
        assert_eq!(cfg.dtmf.first_digit_timeout, Duration::from_secs(5));
        assert_eq!(cfg.dtmf.inter_digit_timeout, Duration::from_secs(3));
        assert_eq!(cfg.tone.frequency_hz, 440.0);
        assert_eq!(cfg.tone.amplitude, 0.25);
    }

    #[test]
    fn round_trips_through_json() {
        let cfg = MediaConfig::default();
        let json = serde_json::to_string(&cfg).unwrap();
        let parsed: MediaConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.port_min, cfg.port_min);
        assert_eq!(parsed.idle_session_timeout, cfg.idle_session_timeout);
    }
}
