//! Dockerfile emission from explicit image metadata.
//!
//! Used when no build history is available: the caller supplies the
//! image's configuration (env, labels, volumes, ports, entrypoint, cmd)
//! and an optional `files` payload layout, and gets a minimal buildable
//! Dockerfile in return. Shares quoting rules with the reconstruction
//! path.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use bon::Builder;
use color_eyre::{eyre::Context, Result};
use itertools::Itertools;
use tracing::debug;

use crate::dockerfile::set_file_mode;

/// Standard file name for emitted Dockerfiles.
pub const DOCKERFILE_NAME: &str = "Dockerfile";

/// Image configuration supplied by the caller for metadata-mode emission.
#[derive(Debug, Clone, Default, PartialEq, Eq, Builder)]
pub struct ImageMetadata {
    /// Volume mount points.
    #[builder(into, default)]
    pub volumes: Vec<String>,

    /// Working directory.
    #[builder(into, default)]
    pub working_dir: String,

    /// Environment entries in `K=V` form.
    #[builder(into, default)]
    pub env: Vec<String>,

    /// Labels by name.
    #[builder(into, default)]
    pub labels: BTreeMap<String, String>,

    /// Runtime user.
    #[builder(into, default)]
    pub user: String,

    /// Exposed ports in `port/proto` form.
    #[builder(into, default)]
    pub exposed_ports: Vec<String>,

    /// Entrypoint argv.
    #[builder(into, default)]
    pub entrypoint: Vec<String>,

    /// Cmd argv.
    #[builder(into, default)]
    pub cmd: Vec<String>,

    /// A `files` payload sits next to the Dockerfile.
    #[builder(default)]
    pub has_data: bool,

    /// The payload is a tarball (`files.tar`) rather than a directory.
    #[builder(default)]
    pub tar_data: bool,
}

/// Render the metadata as Dockerfile lines.
///
/// `tool_label` and `tool_version` identify the producing tool in a
/// leading `LABEL`.
pub fn render(metadata: &ImageMetadata, tool_label: &str, tool_version: &str) -> Vec<String> {
    let mut lines = vec![
        "FROM scratch".to_string(),
        format!("LABEL {tool_label}=\"{tool_version}\""),
    ];

    if !metadata.labels.is_empty() {
        for (name, value) in &metadata.labels {
            let encoded = serde_json::to_string(value).unwrap_or_else(|_| quote(value));
            lines.push(format!("LABEL {name}={encoded}"));
        }
        lines.push(String::new());
    }

    if !metadata.env.is_empty() {
        for entry in &metadata.env {
            if let Some((key, value)) = entry.split_once('=') {
                lines.push(format!("ENV {key} {}", quote(value)));
            }
        }
        lines.push(String::new());
    }

    if !metadata.volumes.is_empty() {
        let volumes = metadata.volumes.iter().map(|name| quote(name)).join(",");
        lines.push(format!("VOLUME [{volumes}]"));
    }

    if metadata.has_data {
        if metadata.tar_data {
            lines.push("ADD files.tar /".to_string());
        } else {
            lines.push("COPY files /".to_string());
        }
    }

    if !metadata.working_dir.is_empty() {
        lines.push(format!("WORKDIR {}", metadata.working_dir));
    }

    if !metadata.user.is_empty() {
        lines.push(format!("USER {}", metadata.user));
    }

    for port in &metadata.exposed_ports {
        lines.push(format!("EXPOSE {port}"));
    }

    if !metadata.entrypoint.is_empty() {
        let argv = metadata.entrypoint.iter().map(|arg| quote(arg)).join(",");
        lines.push(format!("ENTRYPOINT [{argv}]"));
    }

    if !metadata.cmd.is_empty() {
        let argv = metadata.cmd.iter().map(|arg| quote(arg)).join(",");
        lines.push(format!("CMD [{argv}]"));
    }

    lines
}

/// Render the metadata and write it as `Dockerfile` under `location` with
/// mode `0644`. Returns the written path.
pub async fn generate_from_info(
    location: impl AsRef<Path>,
    metadata: &ImageMetadata,
    tool_label: &str,
    tool_version: &str,
) -> Result<PathBuf> {
    let path = location.as_ref().join(DOCKERFILE_NAME);
    let mut data = render(metadata, tool_label, tool_version).join("\n");
    data.push('\n');

    tokio::fs::write(&path, data)
        .await
        .with_context(|| format!("write {}", path.display()))?;
    set_file_mode(&path).await?;

    debug!(path = %path.display(), "generated Dockerfile from metadata");
    Ok(path)
}

/// Minimal POSIX double-quote escaping: wraps in double quotes,
/// backslash-escaping `"` and `\`.
pub(crate) fn quote(value: &str) -> String {
    let escaped = value.replace('\\', "\\\\").replace('"', "\\\"");
    format!("\"{escaped}\"")
}
