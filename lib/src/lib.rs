//! Core library for `unweave`, a tool for reconstructing Dockerfiles from
//! container image history.
//!
//! The daemon's history query returns a lossy textual trace of the build:
//! every step is recorded as a synthetic shell command, metadata-only steps
//! are tagged `#(nop)`, exec-form arrays are flattened into Go struct
//! syntax, and build args are folded into a `|N ...` header. This crate
//! classifies those lines back into Dockerfile instructions, groups them
//! into an image stack at tag boundaries, and emits a buildable Dockerfile
//! plus a structured model of everything it recovered.

use bon::Builder;
use color_eyre::{
    eyre::{self, eyre},
    Section, SectionExt,
};
use std::str::FromStr;
use tap::Pipe;

pub mod daemon;
pub mod dockerfile;
pub mod generate;
pub mod instruction;
pub mod shell;

pub use dockerfile::{Dockerfile, ImageInfo, InstructionInfo};
pub use generate::{ImageMetadata, DOCKERFILE_NAME};
pub use instruction::InstructionKind;

/// Sentinel the daemon reports for layers that are not materialized locally.
pub const MISSING_LAYER_ID: &str = "<missing>";

/// One record of the daemon's image-history query.
///
/// The history API does not expose the author of a step; detecting whether
/// a step came from a Dockerfile instruction relies on the `#(nop)` marker
/// inside `created_by` instead.
#[derive(Debug, Clone, PartialEq, Eq, Builder)]
pub struct HistoryEntry {
    /// Layer id, or [`MISSING_LAYER_ID`] when not materialized locally.
    #[builder(into)]
    pub id: String,

    /// Creation time in unix seconds.
    #[builder(default)]
    pub created: i64,

    /// The synthetic shell command the daemon recorded for this step.
    #[builder(into, default)]
    pub created_by: String,

    /// Tags pointing at this layer. Non-empty tags mark an image boundary.
    #[builder(into, default)]
    pub tags: Vec<String>,

    /// Size of the layer's filesystem delta in bytes.
    #[builder(default)]
    pub size: i64,

    /// Free-form comment attached by the builder.
    #[builder(into, default)]
    pub comment: String,
}

/// A local image name of the form `repository[:tag]`.
///
/// ```
/// # use unweave_lib::ImageName;
/// # use std::str::FromStr;
/// let name = ImageName::from_str("library/ubuntu:24.04").expect("parse image name");
/// assert_eq!(name.repository, "library/ubuntu");
/// assert_eq!(name.tag.as_deref(), Some("24.04"));
/// assert_eq!(name.to_string(), "library/ubuntu:24.04");
///
/// // The tag is optional.
/// let name = ImageName::from_str("alpine").expect("parse image name");
/// assert_eq!(name.repository, "alpine");
/// assert_eq!(name.tag, None);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Builder)]
pub struct ImageName {
    /// Repository name including namespace (e.g. "library/ubuntu").
    #[builder(into)]
    pub repository: String,

    /// Version tag, if the name carried one.
    #[builder(into)]
    pub tag: Option<String>,
}

impl FromStr for ImageName {
    type Err = eyre::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let input_section = || s.to_string().header("Input:");
        if s.is_empty() {
            return Err(eyre!("image name cannot be empty"));
        }

        // The first ':' separates repository from tag.
        match s.split_once(':') {
            Some((repository, _)) if repository.is_empty() => {
                Err(eyre!("repository cannot be empty").with_section(input_section))
            }
            Some((repository, tag)) => Self {
                repository: repository.to_string(),
                tag: Some(tag.to_string()),
            }
            .pipe(Ok),
            None => Self {
                repository: s.to_string(),
                tag: None,
            }
            .pipe(Ok),
        }
    }
}

impl std::fmt::Display for ImageName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.repository)?;
        if let Some(tag) = &self.tag {
            write!(f, ":{tag}")?;
        }
        Ok(())
    }
}
