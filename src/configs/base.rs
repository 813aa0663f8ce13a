use serde::{Deserialize, Serialize};

use crate::common::types::AnyResult;
use crate::configs::*;

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub mixer: MixerConfig,
    pub logging: Option<LoggingConfig>,
}

impl Config {
    pub fn load() -> AnyResult<Self> {
        let config_path = if std::path::Path::new("config.toml").exists() {
            "config.toml"
        } else if std::path::Path::new("config.default.toml").exists() {
            "config.default.toml"
        } else {
            return Err("config.toml or config.default.toml not found".into());
        };

        eprintln!("Loading configuration from: {}", config_path);

        let config_str = std::fs::read_to_string(config_path)?;
        if config_str.is_empty() {
            return Err(format!("{} is empty", config_path).into());
        }

        Self::from_toml(&config_str)
    }

    pub fn from_toml(config_str: &str) -> AnyResult<Self> {
        let config: Config = toml::from_str(config_str)?;
        config.mixer.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_fills_defaults() {
        let config = Config::from_toml(
            r#"
            [mixer]
            background_audio_source = "assets/typing-noise.wav"
            "#,
        )
        .unwrap();

        assert_eq!(config.server.port, 3000);
        assert_eq!(config.mixer.sample_rate, 16_000);
        assert_eq!(config.mixer.chunk_size, 640);
        assert!((config.mixer.background_volume - 0.4).abs() < f32::EPSILON);
        assert!(!config.mixer.output_to_speaker);
        assert!(config.logging.is_none());
    }

    #[test]
    fn out_of_range_volume_is_rejected() {
        let err = Config::from_toml(
            r#"
            [mixer]
            background_volume = 1.5
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("background_volume"));
    }

    #[test]
    fn shipped_default_config_parses() {
        let raw = include_str!("../../config.default.toml");
        let config = Config::from_toml(raw).unwrap();
        assert_eq!(config.mixer.tick_interval_ms, 100);
        assert_eq!(config.mixer.trailing_background_ms, None);
    }
}
