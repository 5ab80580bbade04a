//! Chart directory loading.
//!
//! A chart on disk is a directory tree of YAML manifests. Loading
//! concatenates every document into one buffer for the parser, in sorted
//! path order so runs are reproducible.

use std::path::{Path, PathBuf};

use tracing::debug;
use walkdir::WalkDir;

use crate::error::{Error, Result};

/// Collect every `.yaml`/`.yml` file under `path` into one multi-document
/// buffer.
pub async fn load_chart_dir(path: &Path) -> Result<String> {
    if !path.is_dir() {
        return Err(Error::configuration(format!(
            "chart path '{}' is not a directory",
            path.display()
        )));
    }

    let mut files: Vec<PathBuf> = WalkDir::new(path)
        .into_iter()
        .filter_map(std::result::Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| {
            matches!(
                entry.path().extension().and_then(|ext| ext.to_str()),
                Some("yaml" | "yml")
            )
        })
        .map(|entry| entry.into_path())
        .collect();
    files.sort();

    if files.is_empty() {
        return Err(Error::validation(
            path.display().to_string(),
            "no .yaml or .yml manifests found",
        ));
    }

    let mut documents = Vec::with_capacity(files.len());
    for file in files {
        debug!(file = %file.display(), "loading manifest file");
        let content = tokio::fs::read_to_string(&file).await?;
        documents.push(content);
    }
    Ok(documents.join("\n---\n"))
}
