//! Persona store: named character profiles used to flavor replies.
//!
//! Personas are loaded once from a directory of `*.json` files (one persona
//! per file) and never change afterwards. Bad files are skipped with a
//! warning; an empty result is replaced by a single friendly default.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Name of the synthetic persona used when nothing loads.
pub const DEFAULT_PERSONA_NAME: &str = "Default";

/// A character profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Persona {
    pub name: String,
    #[serde(default)]
    pub style: String,
    #[serde(default, rename = "randomFacts")]
    pub random_facts: Vec<String>,
    #[serde(default)]
    pub quirks: Vec<String>,
}

impl Persona {
    pub fn new(name: impl Into<String>, style: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            style: style.into(),
            random_facts: Vec::new(),
            quirks: Vec::new(),
        }
    }

    pub fn with_facts(mut self, facts: Vec<String>) -> Self {
        self.random_facts = facts;
        self
    }

    pub fn with_quirks(mut self, quirks: Vec<String>) -> Self {
        self.quirks = quirks;
        self
    }

    /// `{name: "Default", style: "friendly"}`.
    pub fn fallback_default() -> Self {
        Self::new(DEFAULT_PERSONA_NAME, "friendly")
    }
}

/// Why a single persona file was rejected.
#[derive(Debug, thiserror::Error)]
pub enum PersonaLoadError {
    #[error("failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid persona JSON in {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("persona in {} has no name", .path.display())]
    MissingName { path: PathBuf },
}

/// Immutable, never-empty set of personas.
#[derive(Debug, Clone)]
pub struct PersonaStore {
    personas: Vec<Persona>,
}

impl PersonaStore {
    /// Load every `*.json` persona in `dir`, in file-name order.
    pub fn load(dir: &Path) -> Self {
        let mut personas = Vec::new();

        match list_persona_files(dir) {
            Ok(files) => {
                for path in files {
                    match load_persona_file(&path) {
                        Ok(persona) => {
                            debug!(persona = %persona.name, path = %path.display(), "Loaded persona");
                            personas.push(persona);
                        }
                        Err(e) => warn!("Skipping persona file: {e}"),
                    }
                }
            }
            Err(e) => {
                warn!(dir = %dir.display(), error = %e, "Persona directory not readable");
            }
        }

        if personas.is_empty() {
            warn!("No character profiles found. Using default reply personality.");
        } else {
            info!(count = personas.len(), "Loaded character profiles");
        }

        Self::from_personas(personas)
    }

    /// Build a store from already-parsed personas. Duplicate names keep the
    /// first occurrence.
    pub fn from_personas(personas: Vec<Persona>) -> Self {
        let mut seen = HashSet::new();
        let mut unique = Vec::with_capacity(personas.len());
        for persona in personas {
            if seen.insert(persona.name.clone()) {
                unique.push(persona);
            } else {
                warn!(persona = %persona.name, "Duplicate persona name, keeping the first");
            }
        }

        if unique.is_empty() {
            unique.push(Persona::fallback_default());
        }

        Self { personas: unique }
    }

    /// Uniform random draw.
    pub fn choose<R: Rng>(&self, rng: &mut R) -> &Persona {
        let idx = rng.gen_range(0..self.personas.len());
        &self.personas[idx]
    }

    pub fn len(&self) -> usize {
        self.personas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.personas.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Persona> {
        self.personas.iter()
    }

    pub fn names(&self) -> Vec<&str> {
        self.personas.iter().map(|p| p.name.as_str()).collect()
    }
}

fn list_persona_files(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file() && p.extension().is_some_and(|ext| ext == "json"))
        .collect();
    files.sort();
    Ok(files)
}

/// Parse one persona file.
pub fn load_persona_file(path: &Path) -> Result<Persona, PersonaLoadError> {
    let raw = std::fs::read_to_string(path).map_err(|source| PersonaLoadError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let mut persona: Persona =
        serde_json::from_str(&raw).map_err(|source| PersonaLoadError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

    persona.name = persona.name.trim().to_string();
    if persona.name.is_empty() {
        return Err(PersonaLoadError::MissingName {
            path: path.to_path_buf(),
        });
    }
    Ok(persona)
}
