//! Client configuration.
//!
//! Loaded from `$XDG_CONFIG_HOME/famgraph/client.ron` when present, otherwise
//! defaults. Every field is optional in the file:
//!
//! ```ron
//! (
//!     backend_origin: "https://family.example.org",
//!     request_timeout_secs: 15,
//!     surface: (
//!         mode: light,
//!         exports: [pdf, svg],
//!     ),
//! )
//! ```
//!
//! `FAMGRAPH_BACKEND` overrides `backend_origin` after the file is read.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::constants::{
    CONFIG_DIR_NAME, CONFIG_FILE_NAME, DEFAULT_BACKEND_ORIGIN, DEFAULT_REQUEST_TIMEOUT,
    ENV_BACKEND,
};

/// Error type for configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("RON parse error in {path}: {source}")]
    Ron {
        path: PathBuf,
        #[source]
        source: ron::error::SpannedError,
    },
    #[error("invalid backend origin '{0}'")]
    InvalidOrigin(String),
    #[error("cannot build HTTP client: {0}")]
    HttpClient(String),
}

/// Colour scheme passed to the visualization surface.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SurfaceMode {
    #[default]
    Dark,
    Light,
}

/// Export entries offered in the surface's menu.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Pdf,
    Png,
    Svg,
    Xml,
    Json,
}

impl ExportFormat {
    /// Menu label shown by the surface.
    pub fn label(&self) -> &'static str {
        match self {
            ExportFormat::Pdf => "Export PDF",
            ExportFormat::Png => "Export PNG",
            ExportFormat::Svg => "Export SVG",
            ExportFormat::Xml => "Export XML",
            ExportFormat::Json => "Export JSON",
        }
    }
}

/// Presentation options, mapped onto the surface's own keys by
/// [`SurfaceConfig::new`](crate::surface::SurfaceConfig::new).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SurfaceOptions {
    pub mode: SurfaceMode,
    /// Zoom only while ctrl is held, so page scrolling still works.
    pub ctrl_zoom: bool,
    pub node_tree_menu: bool,
    /// Template slot → person field, e.g. `field_0 → name`.
    pub node_binding: BTreeMap<String, String>,
    pub exports: Vec<ExportFormat>,
}

impl Default for SurfaceOptions {
    fn default() -> Self {
        Self {
            mode: SurfaceMode::Dark,
            ctrl_zoom: true,
            node_tree_menu: true,
            node_binding: BTreeMap::from([
                ("field_0".to_string(), "name".to_string()),
                ("field_1".to_string(), "birthDate".to_string()),
            ]),
            exports: vec![
                ExportFormat::Pdf,
                ExportFormat::Png,
                ExportFormat::Svg,
                ExportFormat::Xml,
                ExportFormat::Json,
            ],
        }
    }
}

/// Everything the engine needs to know that isn't per-session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Scheme + host (+ port) of the backend; API paths are appended to it.
    pub backend_origin: String,
    pub request_timeout_secs: u64,
    pub surface: SurfaceOptions,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            backend_origin: DEFAULT_BACKEND_ORIGIN.to_string(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT.as_secs(),
            surface: SurfaceOptions::default(),
        }
    }
}

impl ClientConfig {
    /// Default config file location, if the platform has a config dir.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
    }

    /// Load configuration.
    ///
    /// An explicit `path` must exist. Without one, the default path is used
    /// if it exists and defaults otherwise. The environment is applied last.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(p) => {
                let expanded = PathBuf::from(shellexpand::tilde(&p.to_string_lossy()).as_ref());
                Self::from_file(&expanded)?
            }
            None => match Self::default_path().filter(|p| p.exists()) {
                Some(p) => Self::from_file(&p)?,
                None => {
                    debug!("no config file found, using defaults");
                    Self::default()
                }
            },
        };

        if let Ok(origin) = std::env::var(ENV_BACKEND) {
            config.backend_origin = origin;
        }
        config.normalize()?;
        Ok(config)
    }

    /// Parse a RON config file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = ron::from_str(&text).map_err(|source| ConfigError::Ron {
            path: path.to_path_buf(),
            source,
        })?;
        info!("loaded config from {}", path.display());
        Ok(config)
    }

    /// Strip trailing slashes from the origin and reject non-HTTP origins.
    pub fn normalize(&mut self) -> Result<(), ConfigError> {
        let trimmed = self.backend_origin.trim().trim_end_matches('/').to_string();
        if !(trimmed.starts_with("http://") || trimmed.starts_with("https://")) {
            return Err(ConfigError::InvalidOrigin(self.backend_origin.clone()));
        }
        self.backend_origin = trimmed;
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

// ============================================================================
// Tests
// ============================================================================
