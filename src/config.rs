use anyhow::{Context, Result};
use facefuse_vision::ModelName;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub static CONFIG_PATH: Lazy<&'static Path> = Lazy::new(|| {
    Path::new(option_env!("FACEFUSE_CONFIG_PATH").unwrap_or("/usr/local/etc/facefuse/config.toml"))
});

pub static DATA_PREFIX: Lazy<&'static Path> = Lazy::new(|| {
    Path::new(option_env!("FACEFUSE_DATA_PREFIX").unwrap_or("/usr/local/share/facefuse"))
});

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub models: ModelsConfig,
    pub data: DataConfig,
    pub fusion: FusionConfig,
    pub search: SearchConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 7860,
        }
    }
}

/// ONNX model files for the embedding provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelsConfig {
    pub detector: PathBuf,
    pub arcface: PathBuf,
    pub facenet: PathBuf,
    pub nms_threshold: f32,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            detector: DATA_PREFIX.join("face_detection_yunet_2023mar.onnx"),
            arcface: DATA_PREFIX.join("arcface.onnx"),
            facenet: DATA_PREFIX.join("facenet512.onnx"),
            nms_threshold: 0.3,
        }
    }
}

/// Pre-built indices and the identity registry they are aligned with.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    pub arcface_index: PathBuf,
    pub facenet_index: PathBuf,
    pub registry: PathBuf,
    /// Largest neighbor count the indices will serve; unset means unbounded.
    pub max_query: Option<usize>,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            arcface_index: DATA_PREFIX.join("arcface.idx"),
            facenet_index: DATA_PREFIX.join("facenet.idx"),
            registry: DATA_PREFIX.join("registry.json"),
            max_query: None,
        }
    }
}

/// Per-model vote weights.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelWeights {
    pub arcface: f32,
    pub facenet: f32,
}

impl Default for ModelWeights {
    fn default() -> Self {
        Self {
            arcface: 1.0,
            facenet: 1.0,
        }
    }
}

impl ModelWeights {
    pub fn new(arcface: f32, facenet: f32) -> Self {
        Self { arcface, facenet }
    }

    pub fn get(&self, model: ModelName) -> f32 {
        match model {
            ModelName::ArcFace => self.arcface,
            ModelName::Facenet512 => self.facenet,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionConfig {
    pub temperature: f32,
    pub min_agreement: f32,
    pub boost: f32,
    /// Minimum neighbors fetched per model before fusing.
    pub candidate_floor: usize,
    /// When unset every model votes with weight 1 and shares are divided by model count.
    pub weights: Option<ModelWeights>,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            temperature: 0.1,
            min_agreement: 0.5,
            boost: 1.8,
            candidate_floor: 50,
            weights: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Neighbor counts tried, largest first, after the full population fails.
    pub capacity_ladder: Vec<usize>,
    pub final_fallback: usize,
    pub tolerance: f32,
    pub diagnostic_samples: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            capacity_ladder: vec![50_000, 20_000, 10_000, 5_000],
            final_fallback: 1_000,
            tolerance: 0.3,
            diagnostic_samples: 5,
        }
    }
}

pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let path = path.unwrap_or(*CONFIG_PATH);
    if !path.exists() {
        log::debug!("no config at {}, using defaults", path.display());
        return Ok(Config::default());
    }
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading config at {}", path.display()))?;
    toml::from_str(&raw).with_context(|| format!("parsing config {}", path.display()))
}

pub fn save_config(cfg: &Config, path: Option<&Path>) -> Result<()> {
    let path = path.unwrap_or(*CONFIG_PATH);
    let data = toml::to_string_pretty(cfg)?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, data)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_keeps_defaults() {
        let cfg: Config = toml::from_str(
            r#"
            [server]
            port = 9000

            [fusion]
            min_agreement = 0.75
            weights = { arcface = 2.0, facenet = 1.0 }
            "#,
        )
        .unwrap();

        assert_eq!(cfg.server.port, 9000);
        assert_eq!(cfg.server.host, "127.0.0.1");
        assert_eq!(cfg.fusion.min_agreement, 0.75);
        assert_eq!(cfg.fusion.temperature, 0.1);
        assert_eq!(cfg.fusion.weights.unwrap().arcface, 2.0);
        assert_eq!(cfg.search.capacity_ladder, vec![50_000, 20_000, 10_000, 5_000]);
        assert_eq!(cfg.search.final_fallback, 1_000);
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let cfg = load_config(Some(Path::new("/nonexistent/facefuse.toml"))).unwrap();
        assert_eq!(cfg.fusion.candidate_floor, 50);
        assert!(cfg.data.max_query.is_none());
    }

    #[test]
    fn test_save_then_load() -> anyhow::Result<()> {
        let path = std::env::temp_dir().join(format!("facefuse-cfg-{}.toml", std::process::id()));
        let mut cfg = Config::default();
        cfg.search.tolerance = 0.45;
        save_config(&cfg, Some(&path))?;
        let loaded = load_config(Some(&path))?;
        std::fs::remove_file(&path)?;
        assert_eq!(loaded.search.tolerance, 0.45);
        Ok(())
    }
}
