//! Mapping of key-value style paths onto `namespace/group/fileName`.

use regex::Regex;

use crate::ConfigFileId;
use crate::Result;
use crate::WatchError;

pub const DEFAULT_NAMESPACE: &str = "default";
pub const DEFAULT_GROUP: &str = "default";

/// Resolve `key` relative to `prefix` into a file identity.
///
/// * The namespace is the last segment of `prefix`.
/// * The remainder of the key is `{group}/{fileName}`; a key without a
///   separator names a file in the default group. The file name may itself
///   contain `/`.
/// * With an empty `prefix` the key carries the namespace itself:
///   `/{namespace}/{group}/{fileName}`.
/// * Empty namespace or group fall back to `default`.
pub fn parse_key(
    prefix: &str,
    key: &str,
) -> ConfigFileId {
    let (namespace, rest) = if prefix.is_empty() {
        let mut parts = key.trim_start_matches('/').splitn(2, '/');
        let namespace = parts.next().unwrap_or_default();
        (namespace, parts.next().unwrap_or_default())
    } else {
        let rest = key.strip_prefix(prefix).unwrap_or(key);
        (last_segment(prefix), rest)
    };

    let rest = rest.strip_prefix('/').unwrap_or(rest);
    let (group, file_name) = match rest.split_once('/') {
        Some((group, file_name)) => (group, file_name),
        None => ("", rest),
    };

    ConfigFileId::new(
        non_empty_or(namespace, DEFAULT_NAMESPACE),
        non_empty_or(group, DEFAULT_GROUP),
        file_name,
    )
}

fn last_segment(path: &str) -> &str {
    path.trim_end_matches('/').rsplit('/').next().unwrap_or_default()
}

fn non_empty_or<'a>(
    value: &'a str,
    default: &'a str,
) -> &'a str {
    if value.is_empty() {
        default
    } else {
        value
    }
}

/// A file name with `*` addresses every file of the group it matches
pub fn is_wildcard(file_name: &str) -> bool {
    file_name.contains('*')
}

/// Anchored regex for a glob where `*` matches any sequence
pub fn wildcard_to_regex(pattern: &str) -> Result<Regex> {
    let body = pattern.split('*').map(regex::escape).collect::<Vec<_>>().join(".*");

    Regex::new(&format!("^{body}$")).map_err(|source| {
        WatchError::InvalidPattern {
            pattern: pattern.to_string(),
            source,
        }
        .into()
    })
}
