use pixelsarsa_vision::FeatureConfig;
use serde::{Deserialize, Serialize};

use crate::SarsaParams;

/// How long to learn, how to evaluate, and when to checkpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    /// Learning stops after the first episode that reaches this many frames in total.
    pub learning_frames: u64,
    pub eval_episodes: usize,
    /// Step cap of each evaluation episode.
    pub eval_episode_length: u64,
    pub save_every_frames: u64,
    /// Start every episode with a random number of no-op actions.
    pub random_no_op: bool,
    pub no_op_max: u32,
    pub seed: u64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            learning_frames: 1_000_000,
            eval_episodes: 10,
            eval_episode_length: 18_000,
            save_every_frames: 100_000,
            random_no_op: false,
            no_op_max: 30,
            seed: 12345,
        }
    }
}

/// Everything that configures a run, as read from a JSON file.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub sarsa: SarsaParams,
    pub features: FeatureConfig,
    pub schedule: ScheduleConfig,
}

#[derive(Debug, derive_more::Display, derive_more::Error)]
pub enum ConfigError {
    #[display("{name} must be within [0, 1], got {value}")]
    OutOfUnitRange { name: &'static str, value: f32 },
    #[display("{name} must be positive, got {value}")]
    NotPositive { name: &'static str, value: f64 },
    #[display("number of colors must be a power of two not above 256, got {_0}")]
    NumColors(#[error(not(source))] usize),
    #[display("at least one resolution is required")]
    NoResolutions,
    #[display("resolution {height}x{width} has an empty cell")]
    EmptyResolution { height: usize, width: usize },
}

impl RunConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let sarsa = &self.sarsa;
        for (name, value) in [
            ("epsilon", sarsa.epsilon),
            ("gamma", sarsa.gamma),
            ("lambda", sarsa.lambda),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::OutOfUnitRange { name, value });
            }
        }
        for (name, value) in [
            ("alpha", f64::from(sarsa.alpha)),
            ("trace threshold", f64::from(sarsa.trace_threshold)),
        ] {
            if value.is_nan() || value <= 0.0 {
                return Err(ConfigError::NotPositive { name, value });
            }
        }

        let features = &self.features;
        if !features.num_colors.is_power_of_two() || features.num_colors > 256 {
            return Err(ConfigError::NumColors(features.num_colors));
        }
        if features.resolutions.is_empty() {
            return Err(ConfigError::NoResolutions);
        }
        if let Some(tier) = features
            .resolutions
            .iter()
            .find(|tier| tier.block_height == 0 || tier.block_width == 0)
        {
            return Err(ConfigError::EmptyResolution {
                height: tier.block_height,
                width: tier.block_width,
            });
        }
        for (name, value) in [
            ("neighbor radius", features.neighbor_radius),
            ("tile rows", features.num_tile_rows),
            ("tile columns", features.num_tile_columns),
        ] {
            if value == 0 {
                return Err(ConfigError::NotPositive { name, value: 0.0 });
            }
        }

        let schedule = &self.schedule;
        if schedule.save_every_frames == 0 {
            return Err(ConfigError::NotPositive {
                name: "checkpoint interval",
                value: 0.0,
            });
        }
        if schedule.random_no_op && schedule.no_op_max == 0 {
            return Err(ConfigError::NotPositive {
                name: "no-op maximum",
                value: 0.0,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use pixelsarsa_vision::Tier;

    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = RunConfig::default();
        config.validate().unwrap();
        assert!((config.sarsa.alpha - 0.5).abs() < f32::EPSILON);
        assert!((config.sarsa.gamma - 0.99).abs() < f32::EPSILON);
        assert_eq!(config.features.num_colors, 8);
        assert_eq!(config.features.resolutions, vec![Tier::new(4, 4)]);
        assert_eq!(config.schedule.no_op_max, 30);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: RunConfig =
            serde_json::from_str(r#"{"sarsa": {"epsilon": 0.05}, "schedule": {"seed": 7}}"#).unwrap();
        assert!((config.sarsa.epsilon - 0.05).abs() < f32::EPSILON);
        assert!((config.sarsa.lambda - 0.9).abs() < f32::EPSILON);
        assert_eq!(config.schedule.seed, 7);
        assert_eq!(config.features, FeatureConfig::default());
    }

    #[test]
    fn test_rejects_out_of_range_values() {
        let mut config = RunConfig::default();
        config.sarsa.gamma = 1.5;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::OutOfUnitRange { name: "gamma", .. })
        ));

        let mut config = RunConfig::default();
        config.features.num_colors = 12;
        assert!(matches!(config.validate(), Err(ConfigError::NumColors(12))));

        let mut config = RunConfig::default();
        config.features.resolutions = vec![Tier::new(4, 0)];
        assert!(matches!(
            config.validate(),
            Err(ConfigError::EmptyResolution { height: 4, width: 0 })
        ));
    }
}
