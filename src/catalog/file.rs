use std::path::Path;

use anyhow::Context;

use super::{MemoryCatalog, Script};

/// Loads a JSON array of scripts once at startup.
pub fn load_file_catalog(path: impl AsRef<Path>) -> anyhow::Result<MemoryCatalog> {
    let path = path.as_ref();
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading script catalog {}", path.display()))?;
    let scripts: Vec<Script> = serde_json::from_str(&raw)
        .with_context(|| format!("parsing script catalog {}", path.display()))?;

    let mut seen = std::collections::HashSet::new();
    for script in &scripts {
        anyhow::ensure!(seen.insert(script.id.as_str()), "duplicate script id {:?}", script.id);
    }

    tracing::info!(path = %path.display(), scripts = scripts.len(), "Loaded script catalog");
    Ok(MemoryCatalog::new(scripts))
}
