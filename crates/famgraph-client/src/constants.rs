//! Client configuration constants.
//!
//! Centralizes hardcoded values for easier configuration and documentation.

use std::time::Duration;

/// Backend origin used when neither the config file nor the environment sets one.
pub const DEFAULT_BACKEND_ORIGIN: &str = "http://localhost:5000";

/// Per-request timeout for backend calls.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Config file name under `$XDG_CONFIG_HOME/famgraph/`.
pub const CONFIG_FILE_NAME: &str = "client.ron";

/// Directory name under the platform config dir.
pub const CONFIG_DIR_NAME: &str = "famgraph";

/// Environment variable overriding the backend origin.
pub const ENV_BACKEND: &str = "FAMGRAPH_BACKEND";

/// Environment variable carrying the bearer token for non-interactive hosts.
pub const ENV_TOKEN: &str = "FAMGRAPH_TOKEN";

/// Longest slice of an error body quoted back to the user.
pub const MAX_ERROR_BODY_CHARS: usize = 200;
