//! Inline symlink targets, including the conditional `root?A:B` form.
//!
//! Conditional targets are stored with the `:` delimiter rewritten to NUL,
//! so the two branches are NUL-separated in place and follow never has to
//! re-scan for the delimiter.

use wfs_error::{Result, WfsError};
use wfs_types::MAXSYMLINKLEN;

const CONDITIONAL_PREFIX: &[u8] = b"root?";

/// Validate a symlink target and produce its stored bytes.
///
/// A conditional target without a `:` after the prefix is malformed and
/// rejected (following it would over-run the string).
pub(crate) fn encode_target(target: &str) -> Result<Vec<u8>> {
    let bytes = target.as_bytes();
    if bytes.len() > MAXSYMLINKLEN || bytes.contains(&0) {
        return Err(WfsError::NameTooLong);
    }

    let mut stored = bytes.to_vec();
    if stored.starts_with(CONDITIONAL_PREFIX) {
        let rest = &stored[CONDITIONAL_PREFIX.len()..];
        let Some(colon) = rest.iter().position(|&b| b == b':') else {
            return Err(WfsError::NameTooLong);
        };
        stored[CONDITIONAL_PREFIX.len() + colon] = 0;
    }
    Ok(stored)
}

/// Resolve stored target bytes for the given effective uid: uid 0 takes the
/// first branch of a conditional target, everyone else the second. Plain
/// targets resolve to themselves.
pub(crate) fn resolve_target(stored: &[u8], euid: u32) -> String {
    let resolved = if let Some(rest) = stored.strip_prefix(CONDITIONAL_PREFIX) {
        match rest.iter().position(|&b| b == 0) {
            Some(nul) if euid != 0 => &rest[nul + 1..],
            Some(nul) => &rest[..nul],
            None => rest,
        }
    } else {
        stored
    };
    String::from_utf8_lossy(resolved).into_owned()
}
