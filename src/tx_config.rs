// Protocol settings and per-node configuration
//
// Settings are plain data with serde derives so scenarios can be loaded from YAML.
// A node takes its configuration at construction and never mutates it.

use std::fmt;

use crate::tx_interface::{
    seconds_to_millis, LinkSpeeds, RelayMode, SimTime, DANDELION_ROTATION_SECONDS, TX_EMITTERS,
};

// ============================================================================
// Protocol Selection
// ============================================================================

/// Announcement protocol used by a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtocolType {
    #[default]
    Standard,
    FiltersOnIncomingLinks,
    OutgoingFilters,
    PreferredOutDestinations,
    PreferredAllDestinations,
    DandelionMapping,
}

impl ProtocolType {
    pub fn uses_filters(&self) -> bool {
        matches!(
            self,
            ProtocolType::FiltersOnIncomingLinks | ProtocolType::OutgoingFilters
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconciliationMode {
    #[default]
    Off,
    /// Round-robin over outbound peers, one round per interval
    TimeBased,
    /// Each interval, every outbound peer whose set reached the threshold
    SetSizeBased,
}

/// When a stem-phase transaction switches to fluff
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FluffPolicy {
    /// Every relaying node fluffs with this probability
    Probabilistic { probability: f64 },
    /// Fluff once the hop count reaches the limit
    HopCount { max_stem_hops: u32 },
}

impl Default for FluffPolicy {
    fn default() -> Self {
        FluffPolicy::Probabilistic { probability: 0.1 }
    }
}

// ============================================================================
// Configuration
// ============================================================================

/// Protocol settings bundle handed to every node by the installer
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct ProtocolSettings {
    pub protocol: ProtocolType,

    /// Mean trickle interval for inbound peers (outbound peers use half) (default: 5)
    pub inv_interval_seconds: f64,

    /// Under reconciliation, transactions below this hop count are also flooded
    /// to the low-fanout peers (default: 4)
    pub loop_accommodation: u32,

    /// Share of inbound peers flooded under reconciliation (default: 10)
    pub lowfanout_order_in_percent: u32,

    /// Number of outbound peers flooded under reconciliation (default: 1)
    pub lowfanout_order_out: u32,

    pub reconciliation_mode: ReconciliationMode,

    /// (default: 2)
    pub reconciliation_interval_seconds: f64,

    /// Minimum set size for set-size based reconciliation (default: 20)
    pub reconciliation_set_threshold: usize,

    /// Scales A_ESTIMATOR in the difference estimate (default: 1.0)
    pub q_estimation_multiplier: f64,

    /// Stop stemming through peers that swallow stems and never announce anything back
    pub bh_detection: bool,

    /// K for preferred-destination flooding (default: 4)
    pub preferred_fanout: usize,

    /// Filter slice overlap, as a fraction of a slice (default: 0.0)
    pub filter_overlap: f64,

    pub fluff_policy: FluffPolicy,

    /// (default: 30)
    pub stem_embargo_seconds: f64,

    /// Period between stem mapping redraws (default: DANDELION_ROTATION_SECONDS)
    pub stem_rotation_seconds: f64,

    /// Wait for a requested payload before asking someone else (default: 20)
    pub request_timeout_seconds: f64,
}

impl Default for ProtocolSettings {
    fn default() -> Self {
        Self {
            protocol: ProtocolType::Standard,
            inv_interval_seconds: 5.0,
            loop_accommodation: 4,
            lowfanout_order_in_percent: 10,
            lowfanout_order_out: 1,
            reconciliation_mode: ReconciliationMode::Off,
            reconciliation_interval_seconds: 2.0,
            reconciliation_set_threshold: 20,
            q_estimation_multiplier: 1.0,
            bh_detection: false,
            preferred_fanout: 4,
            filter_overlap: 0.0,
            fluff_policy: FluffPolicy::default(),
            stem_embargo_seconds: 30.0,
            stem_rotation_seconds: DANDELION_ROTATION_SECONDS as f64,
            request_timeout_seconds: 20.0,
        }
    }
}

impl ProtocolSettings {
    pub fn reconciliation_enabled(&self) -> bool {
        self.reconciliation_mode != ReconciliationMode::Off
    }

    pub fn inv_interval(&self) -> SimTime {
        seconds_to_millis(self.inv_interval_seconds)
    }

    pub fn reconciliation_interval(&self) -> SimTime {
        seconds_to_millis(self.reconciliation_interval_seconds)
    }

    pub fn stem_embargo(&self) -> SimTime {
        seconds_to_millis(self.stem_embargo_seconds)
    }

    pub fn request_timeout(&self) -> SimTime {
        seconds_to_millis(self.request_timeout_seconds)
    }

    pub fn stem_rotation(&self) -> SimTime {
        seconds_to_millis(self.stem_rotation_seconds)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.inv_interval() == 0 {
            return Err(ConfigError::ZeroInterval("inv_interval_seconds"));
        }
        if self.reconciliation_enabled() && self.reconciliation_interval() == 0 {
            return Err(ConfigError::ZeroInterval("reconciliation_interval_seconds"));
        }
        if self.request_timeout() == 0 {
            return Err(ConfigError::ZeroInterval("request_timeout_seconds"));
        }
        if self.protocol == ProtocolType::DandelionMapping && self.stem_embargo() == 0 {
            return Err(ConfigError::ZeroInterval("stem_embargo_seconds"));
        }
        if self.protocol == ProtocolType::DandelionMapping && self.stem_rotation() == 0 {
            return Err(ConfigError::ZeroInterval("stem_rotation_seconds"));
        }
        if self.lowfanout_order_in_percent > 100 {
            return Err(ConfigError::PercentOutOfRange(self.lowfanout_order_in_percent));
        }
        if !(self.q_estimation_multiplier >= 0.0) {
            return Err(ConfigError::InvalidMultiplier(self.q_estimation_multiplier));
        }
        if !(0.0..=1.0).contains(&self.filter_overlap) {
            return Err(ConfigError::InvalidOverlap(self.filter_overlap));
        }
        if let FluffPolicy::Probabilistic { probability } = self.fluff_policy {
            if !(0.0..=1.0).contains(&probability) {
                return Err(ConfigError::InvalidProbability(probability));
            }
        }
        Ok(())
    }
}

/// Immutable per-node configuration
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub settings: ProtocolSettings,

    pub mode: RelayMode,

    /// No transactions are generated past this point (default: 600)
    pub time_to_run_seconds: f64,

    /// Mean Poisson inter-arrival time for regular nodes; None disables generation
    pub tx_interval_seconds: Option<f64>,

    /// Emitter nodes sharing the network-wide rate table (default: TX_EMITTERS)
    pub tx_emitters: u32,

    pub link: LinkSpeeds,

    /// Seed for the node's private random stream
    pub seed: u64,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            settings: ProtocolSettings::default(),
            mode: RelayMode::Regular,
            time_to_run_seconds: 600.0,
            tx_interval_seconds: None,
            tx_emitters: TX_EMITTERS,
            link: LinkSpeeds::default(),
            seed: 0,
        }
    }
}

impl NodeConfig {
    pub fn time_to_run(&self) -> SimTime {
        seconds_to_millis(self.time_to_run_seconds)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.settings.validate()?;
        if let Some(interval) = self.tx_interval_seconds {
            if seconds_to_millis(interval) == 0 {
                return Err(ConfigError::ZeroInterval("tx_interval_seconds"));
            }
        }
        if self.mode == RelayMode::TxEmitter && self.tx_emitters == 0 {
            return Err(ConfigError::NoEmitters);
        }
        Ok(())
    }
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// A periodic process was configured with a zero interval
    ZeroInterval(&'static str),

    PercentOutOfRange(u32),

    InvalidMultiplier(f64),

    InvalidOverlap(f64),

    InvalidProbability(f64),

    /// Emitter mode with nobody to share the rate table with
    NoEmitters,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::ZeroInterval(field) => write!(f, "{} must be positive", field),
            ConfigError::PercentOutOfRange(v) => {
                write!(f, "lowfanout_order_in_percent must be <= 100, got {}", v)
            }
            ConfigError::InvalidMultiplier(v) => {
                write!(f, "q_estimation_multiplier must be >= 0, got {}", v)
            }
            ConfigError::InvalidOverlap(v) => write!(f, "filter_overlap must be in [0, 1], got {}", v),
            ConfigError::InvalidProbability(v) => {
                write!(f, "fluff probability must be in [0, 1], got {}", v)
            }
            ConfigError::NoEmitters => write!(f, "tx_emitters must be positive for emitter nodes"),
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(ProtocolSettings::default().validate().is_ok());
        assert!(NodeConfig::default().validate().is_ok());
    }

    #[test]
    fn test_rejects_zero_inv_interval() {
        let settings = ProtocolSettings {
            inv_interval_seconds: 0.0,
            ..Default::default()
        };
        assert_eq!(
            settings.validate(),
            Err(ConfigError::ZeroInterval("inv_interval_seconds"))
        );
    }

    #[test]
    fn test_reconciliation_interval_only_checked_when_enabled() {
        let mut settings = ProtocolSettings {
            reconciliation_interval_seconds: 0.0,
            ..Default::default()
        };
        assert!(settings.validate().is_ok());

        settings.reconciliation_mode = ReconciliationMode::TimeBased;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_rejects_bad_percent_and_probability() {
        let settings = ProtocolSettings {
            protocol: ProtocolType::DandelionMapping,
            stem_rotation_seconds: 0.0,
            ..Default::default()
        };
        assert_eq!(
            settings.validate(),
            Err(ConfigError::ZeroInterval("stem_rotation_seconds"))
        );

        let settings = ProtocolSettings {
            lowfanout_order_in_percent: 101,
            ..Default::default()
        };
        assert_eq!(settings.validate(), Err(ConfigError::PercentOutOfRange(101)));

        let settings = ProtocolSettings {
            fluff_policy: FluffPolicy::Probabilistic { probability: 1.5 },
            ..Default::default()
        };
        assert_eq!(settings.validate(), Err(ConfigError::InvalidProbability(1.5)));

        let settings = ProtocolSettings {
            q_estimation_multiplier: f64::NAN,
            ..Default::default()
        };
        assert!(matches!(
            settings.validate(),
            Err(ConfigError::InvalidMultiplier(_))
        ));
    }

    #[test]
    fn test_node_config_checks_generation() {
        let config = NodeConfig {
            tx_interval_seconds: Some(0.0),
            ..Default::default()
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::ZeroInterval("tx_interval_seconds"))
        );

        let config = NodeConfig {
            mode: RelayMode::TxEmitter,
            tx_emitters: 0,
            ..Default::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::NoEmitters));
    }

    #[test]
    fn test_settings_from_yaml() {
        let yaml = "
protocol: dandelion_mapping
inv_interval_seconds: 2.0
fluff_policy:
  kind: hop_count
  max_stem_hops: 3
";
        let settings: ProtocolSettings = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(settings.protocol, ProtocolType::DandelionMapping);
        assert_eq!(settings.inv_interval(), 2000);
        assert_eq!(settings.fluff_policy, FluffPolicy::HopCount { max_stem_hops: 3 });
        // unspecified fields keep their defaults
        assert_eq!(settings.preferred_fanout, 4);
    }
}
