//! Remote name collision avoidance.
//!
//! Tries the unmodified name first, then `base-1.ext`, `base-2.ext`, ...
//! until the prober reports the candidate is free. Probing is sequential;
//! races with other uploaders are not handled.

use std::path::Path;

use tracing::debug;

use crate::channel::{ChannelError, NameProber};

/// Upper bound on probes before giving up on a name.
const MAX_PROBES: u32 = 10_000;

/// Joins a destination prefix and a file name with exactly one `/`.
pub fn join_remote(prefix: &str, name: &str) -> String {
    let prefix = prefix.trim_end_matches('/');
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{prefix}/{name}")
    }
}

/// Returns the `n`th candidate for `remote_path` (`n == 0` is unmodified).
///
/// The suffix goes before the extension of the last path component.
pub fn suffixed_candidate(remote_path: &str, n: u32) -> String {
    if n == 0 {
        return remote_path.to_string();
    }

    let (dir, name) = match remote_path.rfind('/') {
        Some(idx) => remote_path.split_at(idx + 1),
        None => ("", remote_path),
    };

    let ext = Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .filter(|e| !e.is_empty());

    match ext {
        Some(ext) => {
            let stem = &name[..name.len() - ext.len() - 1];
            format!("{dir}{stem}-{n}.{ext}")
        }
        None => format!("{dir}{name}-{n}"),
    }
}

/// Finds the first candidate for `remote_path` that does not exist remotely.
pub async fn resolve_remote_name<P>(prober: &P, remote_path: &str) -> Result<String, ChannelError>
where
    P: NameProber + ?Sized,
{
    for n in 0..MAX_PROBES {
        let candidate = suffixed_candidate(remote_path, n);
        if !prober.exists(&candidate).await? {
            if n > 0 {
                debug!(original = %remote_path, resolved = %candidate, "renamed to avoid collision");
            }
            return Ok(candidate);
        }
    }

    Err(ChannelError::Protocol(format!(
        "no free remote name for {remote_path} after {MAX_PROBES} attempts"
    )))
}
