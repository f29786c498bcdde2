//! Reduction of image history into a Dockerfile model, and its emission.
//!
//! The daemon returns history newest-first; the reducer walks it
//! oldest-first, grouping consecutive instructions into image stack frames
//! at tag boundaries and carrying per-frame size aggregates. The emitter
//! then serializes the model as a line list opened by `FROM scratch`, with
//! each frame delimited by a `# new image` opener and an
//! `# end of image: ...` closer.

use std::path::Path;

use chrono::{DateTime, SecondsFormat};
use color_eyre::{eyre::Context, Result};
use itertools::Itertools;
use serde::Serialize;
use tracing::debug;

use crate::{
    instruction::{classify, InstructionKind},
    HistoryEntry, ImageName, MISSING_LAYER_ID,
};

/// Where an instruction sits within the emission order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
enum InstPosition {
    /// The oldest instruction overall.
    First,
    #[default]
    Intermediate,
    /// The closing instruction of a frame.
    Last,
}

/// One recovered Dockerfile instruction with its layer bookkeeping.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct InstructionInfo {
    /// The recovered instruction kind.
    #[serde(rename = "type")]
    pub kind: InstructionKind,

    /// Layer creation time, RFC-3339 UTC.
    pub time: String,

    /// True when this instruction's layer id equals its frame's id.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub is_last_instruction: bool,

    /// True when the raw line carried the `#(nop)` marker.
    pub is_nop: bool,

    /// True when the operand is a JSON array of tokens rather than a
    /// shell string. Meaningful for `RUN`, `CMD` and `ENTRYPOINT`.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub is_exec_form: bool,

    /// True when the layer is materialized in the local daemon.
    pub local_image_exists: bool,

    /// The layer id, cleared when it equals the frame's id.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub intermediate_image_id: String,

    /// Position among materializing layers, oldest-first; `-1` for
    /// metadata-only layers.
    pub layer_index: i64,

    /// Size of the layer's filesystem delta in bytes.
    pub size: i64,

    /// Base-10 humanized rendering of `size`, set when `size > 0`.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub size_human: String,

    /// Kind-specific operand. Absent for `RUN`, which uses
    /// `system_commands` instead.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub params: String,

    /// `command_all` truncated to 44 bytes with an ellipsis when longer.
    /// Truncation backs off to the previous UTF-8 boundary, so multibyte
    /// input may yield a slightly shorter snippet.
    pub command_snippet: String,

    /// The fully normalized single-line form.
    pub command_all: String,

    /// For `RUN`: the operand split on `&&` (else `;`). For `WORKDIR`:
    /// the synthetic `mkdir -p <dir>`.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub system_commands: Vec<String>,

    /// Free-form comment attached by the builder.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub comment: String,

    /// Always empty: the history query does not expose the author.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub author: String,

    /// Tags pointing at this instruction's layer.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub raw_tags: Vec<String>,

    /// Destination path, for `ADD` and `COPY` only.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub target: String,

    /// Source archive type, for `ADD` and `COPY` only.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub source_type: String,

    #[serde(skip)]
    position: InstPosition,

    #[serde(skip)]
    image_full_name: String,
}

/// One frame of the image stack: a contiguous run of instructions ending
/// at a tag boundary.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImageInfo {
    /// True for the final frame only.
    pub is_top_image: bool,

    /// Id of the layer that closed the frame.
    pub id: String,

    /// First raw tag of the frame, when tagged.
    pub full_name: String,

    /// Repository part of `full_name`, when it carried a tag.
    pub repo_name: String,

    /// Tag part of `full_name`, when it carried one.
    pub version_tag: String,

    /// All tags pointing at the closing layer.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub raw_tags: Vec<String>,

    /// Creation time of the closing layer, RFC-3339 UTC.
    pub create_time: String,

    /// Aggregate size of the frame's layers in bytes.
    pub new_size: i64,

    /// Base-10 humanized rendering of `new_size`.
    pub new_size_human: String,

    /// Id of the previous frame's closing layer; empty for the first frame.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub base_image_id: String,

    /// The frame's instructions, oldest-first.
    pub instructions: Vec<InstructionInfo>,
}

/// The reconstructed Dockerfile: emitted lines plus the structured model.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Dockerfile {
    /// The emitted Dockerfile, line by line.
    pub lines: Vec<String>,

    /// Every `MAINTAINER` operand, oldest-first.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub maintainers: Vec<String>,

    /// Every `USER` operand, oldest-first.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub all_users: Vec<String>,

    /// The last `USER` encountered, i.e. the user the image runs as.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub exe_user: String,

    /// Every `EXPOSE` operand, oldest-first.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub exposed_ports: Vec<String>,

    /// The recovered image stack, oldest frame first.
    pub image_stack: Vec<ImageInfo>,

    /// Every instruction across all frames, in emission order.
    pub all_instructions: Vec<InstructionInfo>,

    /// True when any instruction is an `ONBUILD`.
    pub has_onbuild: bool,
}

impl Dockerfile {
    /// Reconstruct a Dockerfile from image history, newest-first as the
    /// daemon returns it.
    ///
    /// Reduction is best-effort: a malformed entry degrades to its raw
    /// text but never aborts the walk.
    pub fn from_history(history: &[HistoryEntry]) -> Self {
        let mut out = Dockerfile::default();
        let mut current: Option<ImageInfo> = None;
        let mut prev_image_id = String::new();
        let mut next_layer_index: i64 = 0;

        let oldest = history.len().saturating_sub(1);
        for (idx, entry) in history.iter().enumerate().rev() {
            let mut inst = build_instruction(entry, &mut next_layer_index);

            match &inst.kind {
                InstructionKind::Maintainer if !inst.params.is_empty() => {
                    out.maintainers.push(inst.params.clone());
                }
                InstructionKind::User if !inst.params.is_empty() => {
                    out.all_users.push(inst.params.clone());
                    out.exe_user = inst.params.clone();
                }
                InstructionKind::Expose if !inst.params.is_empty() => {
                    out.exposed_ports.push(inst.params.clone());
                }
                InstructionKind::Onbuild => out.has_onbuild = true,
                _ => {}
            }

            let frame = current.get_or_insert_with(|| ImageInfo {
                base_image_id: prev_image_id.clone(),
                ..Default::default()
            });
            frame.new_size += entry.size;

            let mut position = if idx == oldest {
                InstPosition::First
            } else {
                InstPosition::Intermediate
            };

            // A non-empty tag list marks an image boundary; the newest
            // entry always closes the final frame.
            let closes_frame = idx == 0 || !entry.tags.is_empty();
            if closes_frame {
                position = InstPosition::Last;

                frame.id = entry.id.clone();
                prev_image_id = frame.id.clone();

                if inst.intermediate_image_id == frame.id {
                    inst.intermediate_image_id.clear();
                    inst.is_last_instruction = true;
                }

                frame.create_time = inst.time.clone();
                frame.raw_tags = entry.tags.clone();

                if let Some(first_tag) = entry.tags.first() {
                    inst.image_full_name = first_tag.clone();
                    frame.full_name = first_tag.clone();
                    if let Ok(name) = first_tag.parse::<ImageName>() {
                        if let Some(tag) = name.tag {
                            frame.repo_name = name.repository;
                            frame.version_tag = tag;
                        }
                    }
                }

                frame.new_size_human = humanize_bytes(frame.new_size.max(0) as u64);
            }

            inst.position = position;
            frame.instructions.push(inst.clone());
            out.all_instructions.push(inst);

            if closes_frame {
                if let Some(done) = current.take() {
                    out.image_stack.push(done);
                }
            }
        }

        if let Some(top) = out.image_stack.last_mut() {
            top.is_top_image = true;
        }

        out.lines = emit_lines(&out.all_instructions);
        debug!(
            lines = out.lines.len(),
            frames = out.image_stack.len(),
            "reconstructed Dockerfile"
        );
        out
    }

    /// Write the emitted lines to `path` with mode `0644`.
    pub async fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        save_lines(path, &self.lines).await
    }
}

/// Write a joined line list to `path` with mode `0644`.
pub async fn save_lines(path: impl AsRef<Path>, lines: &[String]) -> Result<()> {
    let path = path.as_ref();
    tokio::fs::write(path, lines.join("\n"))
        .await
        .with_context(|| format!("write {}", path.display()))?;
    set_file_mode(path).await
}

#[cfg(unix)]
pub(crate) async fn set_file_mode(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o644))
        .await
        .with_context(|| format!("set permissions on {}", path.display()))
}

#[cfg(not(unix))]
pub(crate) async fn set_file_mode(_path: &Path) -> Result<()> {
    Ok(())
}

/// Classify and normalize one history entry into an [`InstructionInfo`].
fn build_instruction(entry: &HistoryEntry, next_layer_index: &mut i64) -> InstructionInfo {
    let classified = classify(&entry.created_by);

    let mut info = InstructionInfo {
        command_all: classified.command(),
        kind: classified.kind,
        is_nop: classified.is_nop,
        is_exec_form: classified.is_exec_form,
        time: format_time(entry.created),
        comment: entry.comment.clone(),
        raw_tags: entry.tags.clone(),
        size: entry.size,
        ..Default::default()
    };

    match info.kind {
        InstructionKind::Run => {
            if !classified.operand.is_empty() {
                info.system_commands = split_system_commands(&classified.operand);
            }
        }
        _ if !classified.operand.is_empty() => info.params = classified.operand.clone(),
        _ => {}
    }

    if info.kind == InstructionKind::Workdir && !classified.operand.is_empty() {
        info.system_commands = vec![format!("mkdir -p {}", classified.operand)];
    }

    // ADD/COPY operands of the shape `<type>:<name> in <dest>` carry the
    // source archive and destination; rewrite to Dockerfile syntax.
    if matches!(info.kind, InstructionKind::Add | InstructionKind::Copy) {
        if let Some((source_type, rest)) = info.params.split_once(':') {
            if let Some((name, target)) = rest.split_once(" in ") {
                info.source_type = source_type.to_string();
                info.target = target.to_string();
                info.command_all =
                    format!("{} {}:{} {}", info.kind, info.source_type, name, info.target);
            }
        }
    }

    info.command_snippet = snippet(&info.command_all);

    if entry.size > 0 {
        info.size_human = humanize_bytes(entry.size as u64);
    }

    if entry.id != MISSING_LAYER_ID {
        info.local_image_exists = true;
        info.intermediate_image_id = entry.id.clone();
    }

    info.layer_index = if info.is_nop {
        -1
    } else {
        let index = *next_layer_index;
        *next_layer_index += 1;
        index
    };

    info
}

/// Split a `RUN` operand into its constituent commands: on `&&` when
/// present, else on `;`, with continuations and indentation stripped.
fn split_system_commands(operand: &str) -> Vec<String> {
    let flattened = operand.replace('\\', "");
    let parts: Vec<&str> = if flattened.contains("&&") {
        flattened.split("&&").collect()
    } else {
        flattened.split(';').collect()
    };
    parts
        .into_iter()
        .map(|part| part.trim().replace(['\t', '\n'], ""))
        .collect()
}

/// Serialize the model as Dockerfile lines.
fn emit_lines(instructions: &[InstructionInfo]) -> Vec<String> {
    let mut lines = vec!["FROM scratch".to_string()];

    for (idx, inst) in instructions.iter().enumerate() {
        // Open the first frame unconditionally: a one-instruction frame is
        // both first and last, and still gets both delimiters.
        if idx == 0 {
            lines.push("# new image".to_string());
        }

        lines.push(inst.command_all.clone());

        if inst.position == InstPosition::Last {
            lines.push(format!(
                "# end of image: {} (id: {} tags: {})",
                inst.image_full_name,
                inst.intermediate_image_id,
                inst.raw_tags.iter().join(",")
            ));
            lines.push(String::new());
            if idx < instructions.len() - 1 {
                lines.push("# new image".to_string());
            }
        }

        if !inst.comment.is_empty() {
            lines.push(format!("# {}", inst.comment));
        }
    }

    lines
}

/// RFC-3339 UTC rendering of a unix-seconds timestamp.
fn format_time(created: i64) -> String {
    DateTime::from_timestamp(created, 0)
        .unwrap_or(DateTime::UNIX_EPOCH)
        .to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Truncate a command to 44 bytes, appending an ellipsis when longer.
/// Backs off to the previous UTF-8 boundary rather than splitting a
/// multibyte character.
fn snippet(command: &str) -> String {
    const LIMIT: usize = 44;
    if command.len() <= LIMIT {
        return command.to_string();
    }
    let mut cut = LIMIT;
    while !command.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}...", &command[..cut])
}

/// Base-10 humanized byte count ("512 B", "1.5 kB", "83 MB").
fn humanize_bytes(size: u64) -> String {
    const UNITS: [&str; 7] = ["B", "kB", "MB", "GB", "TB", "PB", "EB"];
    if size < 10 {
        return format!("{size} B");
    }
    let exp = ((size as f64).ln() / 1000f64.ln())
        .floor()
        .min((UNITS.len() - 1) as f64);
    let value = ((size as f64 / 1000f64.powf(exp)) * 10.0 + 0.5).floor() / 10.0;
    let unit = UNITS[exp as usize];
    if value < 10.0 {
        format!("{value:.1} {unit}")
    } else {
        format!("{value:.0} {unit}")
    }
}
