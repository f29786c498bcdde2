use std::{path::PathBuf, str::FromStr};

use clap::Parser;
use color_eyre::eyre::{bail, Context, Result};
use tracing::info;
use unweave_lib::{daemon::Daemon, Dockerfile, ImageName, DOCKERFILE_NAME};

#[derive(Debug, Parser)]
pub struct Options {
    /// Image whose history is reconstructed (e.g. library/ubuntu:latest)
    #[arg(value_parser = ImageName::from_str)]
    image: ImageName,

    /// Directory to which the Dockerfile will be written
    #[arg(long, short, default_value = ".")]
    output_dir: PathBuf,

    /// Print the structured reconstruction model as JSON
    #[arg(long)]
    json: bool,
}

#[tracing::instrument]
pub async fn main(opts: Options) -> Result<()> {
    info!("reconstructing Dockerfile");

    let daemon = Daemon::builder()
        .image(opts.image)
        .build()
        .await
        .context("connect to daemon")?;

    if !daemon.image_exists().await.context("check image")? {
        bail!("image not found in the local daemon: {}", daemon.image);
    }

    let history = daemon.history().await.context("query image history")?;
    info!(layers = history.len(), "read image history");

    let dockerfile = Dockerfile::from_history(&history);
    let path = opts.output_dir.join(DOCKERFILE_NAME);
    dockerfile.save(&path).await.context("write Dockerfile")?;
    info!(path = %path.display(), "wrote Dockerfile");

    if opts.json {
        let rendered = serde_json::to_string_pretty(&dockerfile).context("render model")?;
        println!("{rendered}");
    }

    Ok(())
}
