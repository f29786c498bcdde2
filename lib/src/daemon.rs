//! Interacts with the local Docker daemon.

use bollard::{image::ListImagesOptions, models::HistoryResponseItem, Docker};
use color_eyre::eyre::{Context, Result};
use derive_more::Debug;
use tracing::debug;

use crate::{HistoryEntry, ImageName};

/// Each instance represents a Docker daemon connection for a specific image.
#[derive(Debug, Clone)]
pub struct Daemon {
    /// The image whose history is being read.
    pub image: ImageName,

    /// The Docker client for interacting with the daemon.
    #[debug(skip)]
    docker: Docker,
}

#[bon::bon]
impl Daemon {
    /// Create a new Daemon instance with the specified parameters.
    #[builder]
    pub async fn new(
        /// The image whose history is being read.
        image: ImageName,
    ) -> Result<Self> {
        let docker = Docker::connect_with_local_defaults().context("connect to Docker daemon")?;

        // Verify Docker daemon is accessible
        docker
            .version()
            .await
            .context("verify Docker daemon connection")?;

        Ok(Self { image, docker })
    }
}

impl Daemon {
    /// List all images in the Docker daemon.
    pub async fn list_images(&self) -> Result<Vec<String>> {
        let options = Some(ListImagesOptions::<String> {
            all: true,
            ..Default::default()
        });

        let images = self
            .docker
            .list_images(options)
            .await
            .context("list images")?;

        let mut image_tags = Vec::new();
        for image in images {
            image_tags.extend(image.repo_tags);
        }

        Ok(image_tags)
    }

    /// Checks if the image exists in the Docker daemon.
    pub async fn image_exists(&self) -> Result<bool> {
        let image_name = self.image.to_string();
        let images = self.list_images().await?;
        Ok(images.iter().any(|tag| tag == &image_name))
    }

    /// Query the layered build history of the image.
    /// Entries are returned newest-first, as the daemon reports them.
    pub async fn history(&self) -> Result<Vec<HistoryEntry>> {
        let name = self.image.to_string();
        let history = self
            .docker
            .image_history(&name)
            .await
            .context("query image history")?;

        debug!(layers = history.len(), image = %name, "read image history");
        Ok(history.into_iter().map(HistoryEntry::from).collect())
    }
}

impl From<HistoryResponseItem> for HistoryEntry {
    fn from(item: HistoryResponseItem) -> Self {
        HistoryEntry {
            id: item.id,
            created: item.created,
            created_by: item.created_by,
            tags: item.tags,
            size: item.size,
            comment: item.comment,
        }
    }
}

/// Checks if Docker daemon is available.
pub async fn is_daemon_available() -> bool {
    match Docker::connect_with_local_defaults() {
        Ok(docker) => docker.version().await.is_ok(),
        Err(_) => false,
    }
}
