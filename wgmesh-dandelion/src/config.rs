//! Tunables for the Dandelion++ router (section 4.L).

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct DandelionConfig {
    /// Relay set rotation period.
    pub epoch_secs: u64,
    /// Hop count at which an announcement fluffs unconditionally.
    pub hop_cap: u8,
    /// Probability an announcement below the hop cap fluffs anyway.
    pub fluff_probability: f64,
}

impl Default for DandelionConfig {
    fn default() -> Self {
        DandelionConfig {
            epoch_secs: 600,
            hop_cap: 4,
            fluff_probability: 0.10,
        }
    }
}

impl DandelionConfig {
    pub fn epoch_duration(&self) -> Duration {
        Duration::from_secs(self.epoch_secs)
    }
}

pub struct DandelionConfigBuilder {
    config: DandelionConfig,
}

impl DandelionConfigBuilder {
    pub fn new() -> Self {
        DandelionConfigBuilder {
            config: DandelionConfig::default(),
        }
    }

    pub fn epoch_secs(mut self, epoch_secs: u64) -> Self {
        self.config.epoch_secs = epoch_secs;
        self
    }

    pub fn hop_cap(mut self, hop_cap: u8) -> Self {
        self.config.hop_cap = hop_cap;
        self
    }

    pub fn fluff_probability(mut self, fluff_probability: f64) -> Self {
        self.config.fluff_probability = fluff_probability;
        self
    }

    pub fn build(self) -> DandelionConfig {
        self.config
    }
}

impl Default for DandelionConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_constants() {
        let config = DandelionConfig::default();
        assert_eq!(config.epoch_secs, 600);
        assert_eq!(config.hop_cap, 4);
        assert!((config.fluff_probability - 0.10).abs() < f64::EPSILON);
    }

    #[test]
    fn builder_overrides_fields() {
        let config = DandelionConfigBuilder::new().epoch_secs(60).hop_cap(2).build();
        assert_eq!(config.epoch_secs, 60);
        assert_eq!(config.hop_cap, 2);
    }
}
