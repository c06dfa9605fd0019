use crate::events::Rgb;
use anyhow::{Context, Result};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub logging: LoggingConfig,
    pub host: HostConfig,
    pub composition: CompositionConfig,
    pub overlay: OverlayConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
    pub filter: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HostConfig {
    pub title: String,
    pub width: i32,
    pub height: i32,
    /// Зазор между левой и правой панелями
    pub gap: i32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CompositionConfig {
    pub zorder_interval_ms: u64,
    pub pick_delay_ms: u64,
    pub pump_interval_ms: u64,
    /// Показывать исходник 1:1 с обрезкой вместо масштабирования всей клиентской области
    #[serde(default)]
    pub mirror_crop_source: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OverlayConfig {
    pub marker_size: i32,
    pub alpha: u8,
    pub markers: Vec<MarkerConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MarkerConfig {
    pub label: String,
    pub color: String,
    pub x: i32,
    pub y: i32,
}

impl MarkerConfig {
    pub fn rgb(&self) -> Option<Rgb> {
        Rgb::parse(&self.color)
    }
}

impl CompositionConfig {
    pub fn zorder_interval(&self) -> Duration {
        Duration::from_millis(self.zorder_interval_ms)
    }

    pub fn pick_delay(&self) -> Duration {
        Duration::from_millis(self.pick_delay_ms)
    }

    pub fn pump_interval(&self) -> Duration {
        Duration::from_millis(self.pump_interval_ms)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            logging: LoggingConfig {
                level: "info".to_string(),
                format: "pretty".to_string(),
                filter: "duo_compositor=info".to_string(),
            },
            host: HostConfig {
                title: "Duo Compositor".to_string(),
                width: 1600,
                height: 900,
                gap: 8,
            },
            composition: CompositionConfig {
                zorder_interval_ms: 500,
                pick_delay_ms: 2000,
                pump_interval_ms: 10,
                mirror_crop_source: false,
            },
            overlay: OverlayConfig {
                marker_size: 36,
                alpha: 128,
                markers: vec![
                    MarkerConfig {
                        label: "1".to_string(),
                        color: "#3CB371".to_string(), // MediumSeaGreen
                        x: 40,
                        y: 40,
                    },
                    MarkerConfig {
                        label: "2".to_string(),
                        color: "#6495ED".to_string(), // CornflowerBlue
                        x: 100,
                        y: 40,
                    },
                ],
            },
        }
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(config_path: P) -> Result<Self> {
        let config_path = config_path.as_ref();

        let figment = Figment::from(Serialized::defaults(Config::default()))
            .merge(Toml::file(config_path))
            .merge(Env::prefixed("DUO_").split("__"));

        let config: Config = figment
            .extract()
            .with_context(|| format!("Не удалось загрузить конфигурацию из {:?}", config_path))?;

        config.validate()?;

        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        // Валидация настроек логирования
        match self.logging.level.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => anyhow::bail!("Неверный уровень логирования: {}", self.logging.level),
        }

        match self.logging.format.as_str() {
            "pretty" | "compact" => {}
            _ => anyhow::bail!("Неверный формат логирования: {}", self.logging.format),
        }

        // Валидация хост-окна
        if self.host.width <= 0 || self.host.height <= 0 {
            anyhow::bail!(
                "Размер хост-окна должен быть положительным: {}x{}",
                self.host.width,
                self.host.height
            );
        }
        if self.host.gap < 0 {
            anyhow::bail!("gap не может быть отрицательным");
        }

        // Валидация таймеров компоновки
        if self.composition.zorder_interval_ms < 50 {
            anyhow::bail!("zorder_interval_ms должно быть минимум 50");
        }
        if self.composition.pick_delay_ms > 30_000 {
            anyhow::bail!("pick_delay_ms должно быть не больше 30000");
        }
        if self.composition.pump_interval_ms == 0 {
            anyhow::bail!("pump_interval_ms должно быть больше 0");
        }

        // Валидация маркеров
        if self.overlay.marker_size <= 0 {
            anyhow::bail!("marker_size должно быть больше 0");
        }
        if self.overlay.alpha == 0 {
            anyhow::bail!("alpha = 0 делает маркеры невидимыми");
        }
        if self.overlay.markers.is_empty() {
            anyhow::bail!("Нужен хотя бы один маркер");
        }
        if self.overlay.markers.len() > u8::MAX as usize {
            anyhow::bail!("Слишком много маркеров: {}", self.overlay.markers.len());
        }

        let mut labels = HashSet::new();
        for (i, marker) in self.overlay.markers.iter().enumerate() {
            if marker.label.trim().is_empty() {
                anyhow::bail!("Пустая подпись у маркера #{}", i + 1);
            }
            if !labels.insert(marker.label.as_str()) {
                anyhow::bail!("Повторяющаяся подпись маркера '{}'", marker.label);
            }
            if marker.rgb().is_none() {
                anyhow::bail!("Неверный цвет '{}' у маркера #{}", marker.color, i + 1);
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_validation() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.composition.zorder_interval(), Duration::from_millis(500));
        assert_eq!(config.composition.pick_delay(), Duration::from_secs(2));
    }

    #[test]
    fn test_rejects_duplicate_labels() {
        let mut config = Config::default();
        config.overlay.markers[1].label = "1".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_bad_color() {
        let mut config = Config::default();
        config.overlay.markers[0].color = "green".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_too_fast_zorder_timer() {
        let mut config = Config::default();
        config.composition.zorder_interval_ms = 10;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_missing_file_falls_back_to_defaults() {
        let config = Config::load("/nonexistent/duo-compositor-test.toml").unwrap();
        assert_eq!(config.overlay.markers.len(), 2);
        assert_eq!(config.overlay.marker_size, 36);
    }
}
