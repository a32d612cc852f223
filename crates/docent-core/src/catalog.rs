//! Artifact catalog.
//!
//! The catalog, the museum profile and the recognition prompts live in a
//! TOML document. The Los Perales collection is embedded at compile time
//! from `contrib/catalog/los-perales.toml`.

use crate::types::Artifact;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;
use std::sync::OnceLock;
use thiserror::Error;

const BUILTIN_CATALOG: &str = include_str!("../../../contrib/catalog/los-perales.toml");

static BUILTIN: OnceLock<Catalog> = OnceLock::new();

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("failed to read catalog {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("bad catalog TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("catalog has no artifacts")]
    Empty,
    #[error("artifact with empty id: {0:?}")]
    EmptyId(String),
    #[error("duplicate artifact id: {0}")]
    DuplicateId(String),
}

/// Display text for the welcome screen.
#[derive(Debug, Clone, Deserialize)]
pub struct Museum {
    pub name: String,
    pub tagline: String,
    pub intro: String,
}

/// Fixed text sent with every recognition request.
#[derive(Debug, Clone, Deserialize)]
pub struct RecognitionText {
    pub system_instruction: String,
    /// Prompt lead-in; candidate names and descriptions follow it.
    pub prompt_preamble: String,
    #[serde(default = "default_id_hint")]
    pub artifact_id_hint: String,
    #[serde(default = "default_confidence_hint")]
    pub confidence_hint: String,
}

fn default_id_hint() -> String {
    "Identifier of the recognized artifact when found is true, otherwise null.".to_string()
}

fn default_confidence_hint() -> String {
    "Confidence from 0 to 1".to_string()
}

#[derive(Debug, Deserialize)]
struct CatalogFile {
    museum: Museum,
    recognition: RecognitionText,
    artifacts: Vec<Artifact>,
}

/// Read-only collection of known artifacts.
#[derive(Debug, Clone)]
pub struct Catalog {
    museum: Museum,
    recognition: RecognitionText,
    artifacts: Vec<Artifact>,
}

impl Catalog {
    /// Parse and validate a catalog document.
    pub fn from_toml_str(src: &str) -> Result<Self, CatalogError> {
        let file: CatalogFile = toml::from_str(src)?;
        Self::new(file.museum, file.recognition, file.artifacts)
    }

    /// Load a catalog document from disk.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, CatalogError> {
        let path = path.as_ref();
        let src = std::fs::read_to_string(path).map_err(|source| CatalogError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let catalog = Self::from_toml_str(&src)?;
        tracing::info!(
            path = %path.display(),
            artifacts = catalog.artifacts.len(),
            "loaded catalog"
        );
        Ok(catalog)
    }

    /// The embedded Los Perales catalog.
    pub fn builtin() -> &'static Catalog {
        BUILTIN.get_or_init(|| match Self::from_toml_str(BUILTIN_CATALOG) {
            Ok(catalog) => catalog,
            Err(e) => panic!("embedded catalog is invalid: {e}"),
        })
    }

    pub fn new(
        museum: Museum,
        recognition: RecognitionText,
        artifacts: Vec<Artifact>,
    ) -> Result<Self, CatalogError> {
        if artifacts.is_empty() {
            return Err(CatalogError::Empty);
        }
        let mut seen = HashSet::with_capacity(artifacts.len());
        for artifact in &artifacts {
            if artifact.id.trim().is_empty() {
                return Err(CatalogError::EmptyId(artifact.name.clone()));
            }
            if !seen.insert(artifact.id.as_str()) {
                return Err(CatalogError::DuplicateId(artifact.id.clone()));
            }
        }
        Ok(Self {
            museum,
            recognition,
            artifacts,
        })
    }

    /// Find an artifact by identifier. `None` is an expected outcome.
    pub fn lookup(&self, id: &str) -> Option<&Artifact> {
        self.artifacts.iter().find(|a| a.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.lookup(id).is_some()
    }

    pub fn artifacts(&self) -> &[Artifact] {
        &self.artifacts
    }

    pub fn museum(&self) -> &Museum {
        &self.museum
    }

    pub fn recognition(&self) -> &RecognitionText {
        &self.recognition
    }

    pub fn len(&self) -> usize {
        self.artifacts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.artifacts.is_empty()
    }
}
