//! Classification of raw image-history lines into Dockerfile instructions.
//!
//! The daemon records every build step as a synthetic shell command:
//! metadata-only steps are tagged `#(nop)` and carry the original
//! instruction verbatim, `RUN` steps are wrapped in `/bin/sh -c`, and steps
//! that declared build args get a `|N k1=v1 ...` header. Recovering the
//! instruction kind and its operand is a first-match-wins walk over those
//! prefixes, with every parse failure degrading to a coarser form that
//! preserves the raw text.

use std::str::FromStr;

use itertools::Itertools;
use strum::{Display, EnumString};
use tracing::debug;

use crate::shell;

/// Shell the daemon uses for shell-form instructions.
pub const DEFAULT_SHELL: &str = "/bin/sh";

/// Prefix of metadata-only (non-RUN) steps.
const NOP_PREFIX: &str = "/bin/sh -c #(nop) ";

/// Prefix of shell-form RUN steps that declared no build args.
const SHELL_PREFIX: &str = "/bin/sh -c ";

/// Header marker of steps that declared build args.
const ARGS_PREFIX: &str = "|";

/// Marker the daemon puts on steps that did not change the filesystem.
const NOP_MARKER: &str = "#(nop)";

/// Exec-form wrapper the daemon synthesizes around shell-form
/// `ENTRYPOINT`/`CMD` operands.
const SHELL_WRAP: &str = "[\"/bin/sh\" \"-c\" \"";

/// The instruction kinds the daemon can record.
///
/// History lines carry the instruction token in uppercase. Tokens outside
/// the known set pass through verbatim as [`InstructionKind::Other`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Display, EnumString)]
pub enum InstructionKind {
    #[strum(serialize = "FROM")]
    From,
    #[strum(serialize = "RUN")]
    Run,
    #[strum(serialize = "CMD")]
    Cmd,
    #[strum(serialize = "ENTRYPOINT")]
    Entrypoint,
    #[strum(serialize = "ENV")]
    Env,
    #[strum(serialize = "ARG")]
    Arg,
    #[strum(serialize = "LABEL")]
    Label,
    #[strum(serialize = "MAINTAINER")]
    Maintainer,
    #[strum(serialize = "USER")]
    User,
    #[strum(serialize = "WORKDIR")]
    Workdir,
    #[strum(serialize = "EXPOSE")]
    Expose,
    #[strum(serialize = "VOLUME")]
    Volume,
    #[strum(serialize = "ADD")]
    Add,
    #[strum(serialize = "COPY")]
    Copy,
    #[strum(serialize = "HEALTHCHECK")]
    Healthcheck,
    #[strum(serialize = "ONBUILD")]
    Onbuild,
    #[strum(serialize = "SHELL")]
    Shell,
    #[strum(serialize = "STOPSIGNAL")]
    Stopsignal,

    /// Empty history lines classify as `NONE`.
    #[default]
    #[strum(serialize = "NONE")]
    None,

    /// Verbatim passthrough for tokens outside the known set.
    #[strum(default, to_string = "{0}")]
    Other(String),
}

impl InstructionKind {
    /// Recover a kind from the leading token of an instruction line.
    /// Never fails: unknown tokens become [`InstructionKind::Other`].
    fn from_token(token: &str) -> Self {
        Self::from_str(token).unwrap_or_else(|_| Self::Other(token.to_string()))
    }
}

impl serde::Serialize for InstructionKind {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// One classified history line: the recovered kind, its operand, and form.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Instruction {
    /// The recovered instruction kind.
    pub kind: InstructionKind,

    /// The kind-specific operand, canonicalized.
    pub operand: String,

    /// True when the operand is a JSON array of tokens rather than a
    /// shell string. Meaningful for `RUN`, `CMD` and `ENTRYPOINT`.
    pub is_exec_form: bool,

    /// True when the raw line carried the `#(nop)` marker.
    pub is_nop: bool,
}

impl Instruction {
    /// The fully normalized single-line rendering.
    pub fn command(&self) -> String {
        if self.operand.is_empty() {
            if self.kind == InstructionKind::None {
                "#no instruction info".to_string()
            } else {
                self.kind.to_string()
            }
        } else {
            format!("{} {}", self.kind, self.operand)
        }
    }
}

/// Classify one raw history line.
pub fn classify(raw: &str) -> Instruction {
    let is_nop = raw.contains(NOP_MARKER);

    if raw.is_empty() {
        return Instruction {
            is_nop,
            ..Default::default()
        };
    }

    // Metadata-only steps carry the original instruction after the marker.
    if let Some(rest) = raw.strip_prefix(NOP_PREFIX) {
        let rest = rest.trim();
        if rest.is_empty() {
            return Instruction {
                is_nop,
                ..Default::default()
            };
        }
        let (token, operand) = match rest.split_once(char::is_whitespace) {
            Some((token, operand)) => (token, operand.trim()),
            None => (rest, ""),
        };
        return normalize(Instruction {
            kind: InstructionKind::from_token(token),
            operand: operand.to_string(),
            is_exec_form: false,
            is_nop,
        });
    }

    // Shell-form RUN without build args.
    if let Some(rest) = raw.strip_prefix(SHELL_PREFIX) {
        return Instruction {
            kind: InstructionKind::Run,
            operand: reflow_shell(rest),
            is_exec_form: false,
            is_nop,
        };
    }

    if raw.starts_with(ARGS_PREFIX) {
        if let Some(inst) = classify_with_build_args(raw, is_nop) {
            return inst;
        }
    }

    // Default: a RUN recorded without the shell wrapper, in exec form.
    let operand = match shell::split(raw) {
        Ok(tokens) => shell::json_array(&tokens).unwrap_or_else(|_| raw.to_string()),
        Err(err) => {
            debug!(%raw, %err, "unsplittable history line, keeping raw text");
            raw.to_string()
        }
    };
    Instruction {
        kind: InstructionKind::Run,
        operand,
        is_exec_form: true,
        is_nop,
    }
}

/// Parse a `|N k1=v1 ... kN=vN <cmd>` build-arg header.
///
/// Returns `None` when the header is malformed, sending the caller to the
/// exec-form fallback.
fn classify_with_build_args(raw: &str, is_nop: bool) -> Option<Instruction> {
    let (header, tail) = raw.split_once(' ')?;
    let count = match header.strip_prefix(ARGS_PREFIX)?.parse::<usize>() {
        Ok(count) => count,
        Err(err) => {
            debug!(%raw, %err, "malformed build-arg count");
            return None;
        }
    };
    let tokens = match shell::split(tail.trim()) {
        Ok(tokens) => tokens,
        Err(err) => {
            debug!(%raw, %err, "unsplittable build-arg command");
            return None;
        }
    };
    if tokens.len() <= count {
        debug!(%raw, "build-arg header declares more args than present");
        return None;
    }

    // The first `count` tokens are the declared build args themselves.
    let rest = &tokens[count..];
    if rest.len() > 2 && rest[0] == DEFAULT_SHELL && rest[1] == "-c" {
        return Some(Instruction {
            kind: InstructionKind::Run,
            operand: rest[2..].join(" ").trim().to_string(),
            is_exec_form: false,
            is_nop,
        });
    }

    Some(Instruction {
        kind: InstructionKind::Run,
        operand: shell::json_array(rest).ok()?,
        is_exec_form: true,
        is_nop,
    })
}

/// Reformat a multi-command `a && b && c` body as a line-continued block,
/// first segment unindented and the rest tab-indented.
///
/// Splitting does not respect `&&` inside quoted strings.
fn reflow_shell(body: &str) -> String {
    if !body.contains("&&") {
        return body.to_string();
    }
    body.split("&&")
        .enumerate()
        .map(|(idx, part)| {
            if idx == 0 {
                part.trim().to_string()
            } else {
                format!("\t{}", part.trim())
            }
        })
        .join(" && \\\n")
}

/// Per-kind canonicalization of the recovered operand.
fn normalize(mut inst: Instruction) -> Instruction {
    match inst.kind {
        InstructionKind::Entrypoint | InstructionKind::Cmd => {
            // The daemon serializes exec arrays in Go struct syntax.
            let operand = inst.operand.replace("&{[", "[").replace("]}", "]");
            if let Some(body) = operand.strip_prefix(SHELL_WRAP) {
                inst.operand = body.strip_suffix("\"]").unwrap_or(body).to_string();
                inst.is_exec_form = false;
            } else {
                inst.operand = shell::fix_json_array(&operand);
                inst.is_exec_form = true;
            }
        }
        InstructionKind::Healthcheck => {
            if let Some(restored) = restore_healthcheck(&inst.operand) {
                inst.operand = restored;
            } else if !inst.operand.is_empty() {
                debug!(operand = %inst.operand, "unrecognized HEALTHCHECK operand, keeping raw text");
            }
        }
        _ => {}
    }
    inst
}

/// Restore a `HEALTHCHECK` operand from the daemon's Go struct rendering.
///
/// `&{["CMD" "/healthcheck" "8080"] "5s" "10s" "2s" '\x03'}` becomes
/// `--interval=5s --timeout=10s --start-period=2s --retries=3 CMD /healthcheck 8080`.
fn restore_healthcheck(operand: &str) -> Option<String> {
    let body = operand.strip_prefix("&{")?.strip_suffix('}')?;
    let (test, timings) = body.strip_prefix('[')?.split_once(']')?;
    let test = test.replace('"', "");
    let test = test.split_whitespace().join(" ");

    let mut fields = timings.split_whitespace();
    let interval = fields.next()?.trim_matches('"');
    let timeout = fields.next()?.trim_matches('"');
    let start_period = fields.next()?.trim_matches('"');

    // Retries arrive as a character literal, e.g. `'\x03'`.
    let retries = fields.next()?.trim_matches('\'').strip_prefix("\\x")?;
    let retries = u32::from_str_radix(retries, 16).ok()?;

    Some(format!(
        "--interval={interval} --timeout={timeout} --start-period={start_period} --retries={retries} {test}"
    ))
}
