//! POSIX-style shell field splitting and token array rendering.
//!
//! The daemon flattens exec-form arrays into a single line and prepends
//! build-arg headers to `RUN` steps; both come back apart with shell
//! splitting rules.

use color_eyre::{
    eyre::{eyre, Context},
    Result,
};

/// Split a line into fields obeying POSIX shell quoting and backslash
/// escapes. Fails on unterminated quoting or a trailing escape.
pub fn split(line: &str) -> Result<Vec<String>> {
    shlex::split(line).ok_or_else(|| eyre!("unterminated quoting: {line}"))
}

/// Render tokens as a JSON array.
///
/// serde_json performs no HTML escaping, so `<`, `>` and `&` pass through
/// verbatim, matching how the daemon itself renders exec arrays.
pub fn json_array<S: AsRef<str> + serde::Serialize>(tokens: &[S]) -> Result<String> {
    serde_json::to_string(tokens).context("encode token array")
}

/// Normalize a pseudo-JSON array of shell tokens (`[a b "c d"]`) into a
/// real JSON array (`["a","b","c d"]`).
///
/// Inputs that fail to split or encode are returned verbatim; this is a
/// best-effort repair, not a validator.
pub fn fix_json_array(input: &str) -> String {
    // Outer brackets are the daemon's, not part of the tokens. The close
    // bracket is dropped positionally, whatever character sits there.
    let data = match input.strip_prefix('[') {
        Some(inner) => match inner.char_indices().last() {
            Some((idx, _)) => &inner[..idx],
            None => inner,
        },
        None => input,
    };

    let Ok(tokens) = split(data) else {
        return input.to_string();
    };
    json_array(&tokens).unwrap_or_else(|_| input.to_string())
}
