use std::collections::{BTreeSet, HashMap};
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::types::{display_confidence, FaceVectorId, IdentityMatch};

/// Metadata for one known person.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentityRecord {
    pub name: String,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default, alias = "performer_url")]
    pub profile_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RegistryFile {
    faces: Vec<String>,
    performers: HashMap<String, IdentityRecord>,
}

/// Maps face vector ids to external ids and external ids to records.
///
/// `faces[i]` names the identity behind vector `i` in every index.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    faces: Vec<String>,
    records: HashMap<String, IdentityRecord>,
}

impl Registry {
    pub fn new(faces: Vec<String>, records: HashMap<String, IdentityRecord>) -> Self {
        Self { faces, records }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw =
            std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        let file: RegistryFile =
            serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))?;
        let registry = Self::new(file.faces, file.performers);
        let orphans = registry
            .faces
            .iter()
            .filter(|id| !registry.records.contains_key(*id))
            .count();
        if orphans > 0 {
            log::warn!("{orphans} face ids have no identity record");
        }
        log::info!(
            "loaded registry with {} faces and {} identities",
            registry.faces.len(),
            registry.records.len()
        );
        Ok(registry)
    }

    /// Number of face vector ids.
    pub fn len(&self) -> usize {
        self.faces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.faces.is_empty()
    }

    pub fn external_id(&self, id: FaceVectorId) -> Option<&str> {
        self.faces.get(id).map(String::as_str)
    }

    pub fn record(&self, external_id: &str) -> Option<&IdentityRecord> {
        self.records.get(external_id)
    }

    pub fn record_for(&self, id: FaceVectorId) -> Option<&IdentityRecord> {
        self.external_id(id).and_then(|ext| self.record(ext))
    }

    /// First face vector id, in id order, whose record is named exactly `name`.
    pub fn resolve_name(&self, name: &str) -> Option<FaceVectorId> {
        self.faces.iter().position(|ext| {
            self.records
                .get(ext)
                .is_some_and(|record| record.name == name)
        })
    }

    pub fn contains_name(&self, name: &str) -> bool {
        self.resolve_name(name).is_some()
    }

    /// Sorted, de-duplicated display names of every indexed identity.
    pub fn names(&self) -> Vec<String> {
        self.faces
            .iter()
            .filter_map(|ext| self.records.get(ext))
            .map(|record| record.name.trim())
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    pub fn identity_match(&self, external_id: &str, score: f32) -> Option<IdentityMatch> {
        let record = self.record(external_id)?;
        Some(IdentityMatch {
            id: external_id.to_string(),
            name: record.name.clone(),
            confidence: display_confidence(score),
            image: record.image.clone(),
            country: record.country.clone(),
            profile_url: record.profile_url.clone(),
        })
    }
}
