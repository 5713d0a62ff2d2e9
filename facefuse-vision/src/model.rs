use std::fmt;
use std::path::Path;

use anyhow::{Context, Result};
#[cfg(any(feature = "openvino", feature = "cuda"))]
use ort::ep::{self, ExecutionProvider};
use ort::session::{
    builder::{GraphOptimizationLevel, SessionBuilder},
    Session,
};

/// Length of every embedding produced by the recognition models.
pub const EMBEDDING_DIM: usize = 512;

/// The recognition models the ensemble is built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ModelName {
    ArcFace,
    Facenet512,
}

impl ModelName {
    pub const ALL: [ModelName; 2] = [ModelName::ArcFace, ModelName::Facenet512];

    pub fn as_str(self) -> &'static str {
        match self {
            ModelName::ArcFace => "arcface",
            ModelName::Facenet512 => "facenet512",
        }
    }

    /// Side length of the square RGB input the model expects.
    pub fn input_size(self) -> u32 {
        match self {
            ModelName::ArcFace => 112,
            ModelName::Facenet512 => 160,
        }
    }
}

impl fmt::Display for ModelName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub fn session_builder() -> Result<SessionBuilder> {
    #[cfg_attr(not(any(feature = "openvino", feature = "cuda")), allow(unused_mut))]
    let mut builder =
        Session::builder()?.with_optimization_level(GraphOptimizationLevel::Level3)?;

    #[cfg(feature = "openvino")]
    {
        let ep = ep::OpenVINO::default();
        if ep.is_available()? {
            ep.register(&mut builder)?;
        } else {
            log::warn!("openvino feature is enabled, onnx runtime not compiled with openvino")
        }
    }

    #[cfg(feature = "cuda")]
    {
        let ep = ep::CUDA::default();
        if ep.is_available()? {
            ep.register(&mut builder)?;
        } else {
            log::warn!("cuda feature is enabled, onnx runtime not compiled with cuda")
        }
    }

    Ok(builder)
}

pub fn load_session(path: &Path) -> Result<Session> {
    log::debug!("loading onnx model {}", path.display());
    session_builder()?
        .commit_from_file(path)
        .with_context(|| format!("load model {}", path.display()))
}
