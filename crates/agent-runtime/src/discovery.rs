//! Toolkit discovery from a directory of manifests
//!
//! Each `*.json` file in the directory describes one tool server:
//!
//! ```json
//! { "name": "files", "command": "mcp-files", "args": ["--root", "/srv"], "env": {} }
//! ```
//!
//! `name` is optional and defaults to the file stem. Every manifest becomes a
//! toolkit entry whose loader launches the server and wraps the session in a
//! [`RemoteToolkit`].

use std::path::{Path, PathBuf};
use std::sync::Arc;

use agent_core::plugin::{BundleSource, DEFAULT_TOOLKIT_GROUP, Toolkit, ToolkitEntry};
use agent_core::{AgentError, RemoteToolkit, Result};
use async_trait::async_trait;
use serde::Deserialize;

use crate::mcp::{LaunchSpec, McpSession};

#[derive(Debug, Deserialize)]
struct Manifest {
    #[serde(default)]
    name: Option<String>,
    #[serde(flatten)]
    launch: LaunchSpec,
}

/// Bundle source scanning a directory for toolkit manifests
#[derive(Clone, Debug)]
pub struct DirectoryBundleSource {
    dir: PathBuf,
    group: String,
}

impl DirectoryBundleSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            group: DEFAULT_TOOLKIT_GROUP.to_string(),
        }
    }

    #[must_use]
    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = group.into();
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    async fn manifest_paths(&self) -> Result<Vec<PathBuf>> {
        let mut paths = Vec::new();
        let mut dir = tokio::fs::read_dir(&self.dir).await?;
        while let Some(entry) = dir.next_entry().await? {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                paths.push(path);
            }
        }
        paths.sort();
        Ok(paths)
    }

    fn entry(&self, path: &Path, manifest: std::result::Result<Manifest, String>) -> ToolkitEntry {
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();

        match manifest {
            Ok(manifest) => {
                let name = manifest.name.unwrap_or(stem);
                let launch = manifest.launch;
                ToolkitEntry::new(name.clone(), self.group.clone(), move || {
                    connect(name.clone(), launch.clone())
                })
            }
            Err(reason) => {
                ToolkitEntry::new(stem.clone(), self.group.clone(), move || {
                    let err = AgentError::plugin_load(&stem, &reason);
                    async move { Err(err) }
                })
            }
        }
    }
}

async fn read_manifest(path: &Path) -> std::result::Result<Manifest, String> {
    let text = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| format!("cannot read {}: {e}", path.display()))?;
    let manifest: Manifest = serde_json::from_str(&text)
        .map_err(|e| format!("malformed manifest {}: {e}", path.display()))?;
    if manifest.launch.command.trim().is_empty() {
        return Err(format!("manifest {} has no command", path.display()));
    }
    Ok(manifest)
}

async fn connect(name: String, launch: LaunchSpec) -> Result<Arc<dyn Toolkit>> {
    let session = McpSession::connect(name.clone(), &launch)
        .await
        .map_err(|e| AgentError::plugin_load(&name, e))?;
    Ok(Arc::new(RemoteToolkit::new(name, Arc::new(session))))
}

#[async_trait]
impl BundleSource for DirectoryBundleSource {
    fn name(&self) -> &str {
        "directory"
    }

    async fn entries(&self) -> Result<Vec<ToolkitEntry>> {
        let mut entries = Vec::new();
        for path in self.manifest_paths().await? {
            let manifest = read_manifest(&path).await;
            if let Err(reason) = &manifest {
                tracing::debug!(path = %path.display(), %reason, "Unusable toolkit manifest");
            }
            entries.push(self.entry(&path, manifest));
        }
        Ok(entries)
    }
}
