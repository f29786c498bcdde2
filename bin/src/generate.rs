use std::{collections::BTreeMap, path::PathBuf};

use clap::Parser;
use color_eyre::eyre::{Context, Result};
use tracing::info;
use unweave_lib::{generate::generate_from_info, ImageMetadata};

/// Label recording which tool produced the Dockerfile.
const TOOL_LABEL: &str = "tools.unweave.version";

#[derive(Debug, Parser)]
pub struct Options {
    /// Directory to which the Dockerfile will be written
    #[arg(long, short, default_value = ".")]
    output_dir: PathBuf,

    /// Environment entries in K=V form (repeatable)
    #[arg(long = "env")]
    env: Vec<String>,

    /// Labels in name=value form (repeatable)
    #[arg(long = "label")]
    labels: Vec<String>,

    /// Volume mount points (repeatable)
    #[arg(long = "volume")]
    volumes: Vec<String>,

    /// Working directory
    #[arg(long)]
    workdir: Option<String>,

    /// Runtime user
    #[arg(long)]
    user: Option<String>,

    /// Exposed ports in port/proto form (repeatable)
    #[arg(long = "expose")]
    exposed_ports: Vec<String>,

    /// Entrypoint argv (repeat once per token)
    #[arg(long = "entrypoint")]
    entrypoint: Vec<String>,

    /// Cmd argv (repeat once per token)
    #[arg(long = "cmd")]
    cmd: Vec<String>,

    /// A `files` payload sits next to the Dockerfile
    #[arg(long)]
    has_data: bool,

    /// The payload is a tarball (`files.tar`) rather than a directory
    #[arg(long, requires = "has_data")]
    tar_data: bool,
}

#[tracing::instrument]
pub async fn main(opts: Options) -> Result<()> {
    let labels = opts
        .labels
        .iter()
        .filter_map(|label| label.split_once('='))
        .map(|(name, value)| (name.to_string(), value.to_string()))
        .collect::<BTreeMap<_, _>>();

    let metadata = ImageMetadata::builder()
        .volumes(opts.volumes)
        .working_dir(opts.workdir.unwrap_or_default())
        .env(opts.env)
        .labels(labels)
        .user(opts.user.unwrap_or_default())
        .exposed_ports(opts.exposed_ports)
        .entrypoint(opts.entrypoint)
        .cmd(opts.cmd)
        .has_data(opts.has_data)
        .tar_data(opts.tar_data)
        .build();

    let path = generate_from_info(
        &opts.output_dir,
        &metadata,
        TOOL_LABEL,
        env!("CARGO_PKG_VERSION"),
    )
    .await
    .context("generate Dockerfile")?;
    info!(path = %path.display(), "wrote Dockerfile");

    Ok(())
}
