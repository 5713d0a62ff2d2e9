use anyhow::{Context, Result};
use facefuse_vision::ModelName;

use crate::config::{Config, FusionConfig, SearchConfig};
use crate::index::{FlatIndex, SimilarityIndex};
use crate::registry::Registry;

/// Everything the recognition core reads: one index per model and the
/// registry they are aligned with.
///
/// Built once at startup and shared read-only afterwards.
pub struct ServiceContext {
    arcface: Box<dyn SimilarityIndex>,
    facenet: Box<dyn SimilarityIndex>,
    pub registry: Registry,
    pub fusion: FusionConfig,
    pub search: SearchConfig,
}

impl ServiceContext {
    /// Assemble a context, checking that both indices and the registry cover
    /// the same face vector ids.
    pub fn new(
        arcface: Box<dyn SimilarityIndex>,
        facenet: Box<dyn SimilarityIndex>,
        registry: Registry,
        fusion: FusionConfig,
        search: SearchConfig,
    ) -> Result<Self> {
        if arcface.len() != facenet.len() || arcface.len() != registry.len() {
            anyhow::bail!(
                "index ids are misaligned: arcface={}, facenet={}, registry={}",
                arcface.len(),
                facenet.len(),
                registry.len()
            );
        }
        Ok(Self {
            arcface,
            facenet,
            registry,
            fusion,
            search,
        })
    }

    pub fn load(cfg: &Config) -> Result<Self> {
        let data = &cfg.data;
        let arcface = FlatIndex::load(&data.arcface_index)
            .context("loading arcface index")?
            .with_max_results(data.max_query);
        let facenet = FlatIndex::load(&data.facenet_index)
            .context("loading facenet index")?
            .with_max_results(data.max_query);
        let registry = Registry::load(&data.registry).context("loading identity registry")?;

        Self::new(
            Box::new(arcface),
            Box::new(facenet),
            registry,
            cfg.fusion.clone(),
            cfg.search.clone(),
        )
    }

    pub fn index(&self, model: ModelName) -> &dyn SimilarityIndex {
        match model {
            ModelName::ArcFace => self.arcface.as_ref(),
            ModelName::Facenet512 => self.facenet.as_ref(),
        }
    }

    /// Number of indexed face vectors.
    pub fn population(&self) -> usize {
        self.registry.len()
    }
}
