use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Top-level configuration loaded from kickstart.toml.
#[derive(Debug, Deserialize)]
#[serde(default)]
#[derive(Default)]
pub struct ParserConfig {
    pub schema: SchemaConfig,
    pub classify: ClassifyConfig,
    pub scrub: ScrubConfig,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SchemaConfig {
    /// Namespace URI that recognized invocation elements must be bound to.
    pub namespace: String,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ClassifyConfig {
    /// Transformation prefixes of engine housekeeping jobs.
    pub auxiliary_prefixes: Vec<String>,
    /// Extra prefixes treated as auxiliary when the record could not be fully parsed.
    pub degraded_auxiliary_prefixes: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
#[derive(Default)]
pub struct ScrubConfig {
    /// Directory for scratch copies of embedded documents (system temp dir when unset).
    pub scratch_dir: Option<PathBuf>,
}

// --- Default implementations ---

impl Default for SchemaConfig {
    fn default() -> Self {
        Self {
            namespace: "http://pegasus.isi.edu/schema/invocation".to_string(),
        }
    }
}

impl Default for ClassifyConfig {
    fn default() -> Self {
        Self {
            auxiliary_prefixes: vec!["pegasus:".to_string()],
            degraded_auxiliary_prefixes: vec!["stage_".to_string(), "create_dir".to_string()],
        }
    }
}

/// Load config from `path`, falling back to defaults when the file is missing
/// or cannot be parsed.
pub fn load_config(path: &Path) -> ParserConfig {
    match std::fs::read_to_string(path) {
        Ok(contents) => match toml::from_str(&contents) {
            Ok(cfg) => cfg,
            Err(e) => {
                tracing::warn!("failed to parse {}: {e}", path.display());
                ParserConfig::default()
            }
        },
        Err(_) => {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            ParserConfig::default()
        }
    }
}
