//! data_runtime: configuration schemas and loaders.
//!
//! Everything here is plain data: serde structs read from `data/config/*.toml`
//! with defaults when a file is absent and environment overrides on top.

pub mod configs {
    pub mod server;
    pub mod telemetry;
}

use std::path::PathBuf;

/// Workspace `data/` directory, falling back to a crate-local `data/`.
pub(crate) fn data_root() -> PathBuf {
    let here = std::path::Path::new(env!("CARGO_MANIFEST_DIR"));
    let ws = here.join("../../data");
    if ws.is_dir() { ws } else { here.join("data") }
}
