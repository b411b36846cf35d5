//! Destination key and local path conventions
//!
//! ## Responsibilities
//!
//! - Sanitize site/subsite names coming from the remote hierarchy
//! - Build the date-partitioned remote key for a clip
//! - Derive the matching local storage path
//!
//! Key layout: `{site}/{subsite}/{year}/{month}/{day}/{hour}/{camera}_{timestamp}[_variant].{ext}`

use chrono::{DateTime, Datelike, Timelike, Utc};
use std::path::{Path, PathBuf};

/// Used in place of a component that sanitizes down to nothing
const EMPTY_COMPONENT: &str = "unnamed";

/// Placement placeholder while the device has no site/subsite yet
pub const UNASSIGNED: &str = "unassigned";

/// Normalize a hierarchy name into a safe path component: keep word
/// characters, spaces, hyphens, underscores and dots; collapse runs of
/// spaces/underscores into one underscore.
pub fn sanitize_component(name: &str) -> String {
    let kept: String = name
        .chars()
        .filter(|c| c.is_alphanumeric() || matches!(c, ' ' | '-' | '_' | '.'))
        .collect();

    let mut out = String::with_capacity(kept.len());
    let mut pending_sep = false;
    for c in kept.trim().chars() {
        if c == ' ' || c == '_' {
            pending_sep = true;
            continue;
        }
        if pending_sep && !out.is_empty() {
            out.push('_');
        }
        pending_sep = false;
        out.push(c);
    }

    if out.is_empty() {
        EMPTY_COMPONENT.to_string()
    } else {
        out
    }
}

/// Remote key for a clip recorded at `when` (UTC date partitioning)
pub fn destination_key(
    site: &str,
    subsite: &str,
    when: DateTime<Utc>,
    camera_id: &str,
    variant: Option<&str>,
    ext: &str,
) -> String {
    let stamp = when.format("%Y%m%d_%H%M%S");
    let name = match variant {
        Some(variant) => format!("{}_{}_{}.{}", camera_id, stamp, variant, ext),
        None => format!("{}_{}.{}", camera_id, stamp, ext),
    };
    format!(
        "{}/{}/{:04}/{:02}/{:02}/{:02}/{}",
        sanitize_component(site),
        sanitize_component(subsite),
        when.year(),
        when.month(),
        when.day(),
        when.hour(),
        name
    )
}

/// Local path mirroring a destination key under the storage root
pub fn local_clip_path(storage_dir: &Path, key: &str) -> PathBuf {
    let mut path = storage_dir.to_path_buf();
    for part in key.split('/') {
        path.push(part);
    }
    path
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_sanitize_keeps_safe_names() {
        assert_eq!(sanitize_component("Arena-01"), "Arena-01");
        assert_eq!(sanitize_component("quadra.norte"), "quadra.norte");
    }

    #[test]
    fn test_sanitize_collapses_spaces_and_underscores() {
        assert_eq!(sanitize_component("Main  Arena"), "Main_Arena");
        assert_eq!(sanitize_component("a __ b"), "a_b");
        assert_eq!(sanitize_component("  padded  "), "padded");
    }

    #[test]
    fn test_sanitize_strips_path_breakers() {
        assert_eq!(sanitize_component("a/b\\c:d"), "abcd");
        assert_eq!(sanitize_component("../../etc"), "....etc");
    }

    #[test]
    fn test_sanitize_empty_falls_back() {
        assert_eq!(sanitize_component(""), "unnamed");
        assert_eq!(sanitize_component("///"), "unnamed");
    }

    #[test]
    fn test_destination_key_layout() {
        let when = Utc.with_ymd_and_hms(2025, 3, 7, 9, 5, 42).unwrap();
        let key = destination_key("Main Arena", "Court 2", when, "camera_1", None, "mp4");
        assert_eq!(
            key,
            "Main_Arena/Court_2/2025/03/07/09/camera_1_20250307_090542.mp4"
        );
    }

    #[test]
    fn test_destination_key_with_variant() {
        let when = Utc.with_ymd_and_hms(2025, 12, 31, 23, 59, 59).unwrap();
        let key = destination_key("site", "sub", when, "camera_2", Some("compressed"), "mp4");
        assert!(key.ends_with("camera_2_20251231_235959_compressed.mp4"));
        assert!(key.starts_with("site/sub/2025/12/31/23/"));
    }

    #[test]
    fn test_local_path_mirrors_key() {
        let when = Utc.with_ymd_and_hms(2025, 3, 7, 9, 5, 42).unwrap();
        let key = destination_key("s", "q", when, "camera_1", None, "mp4");
        let path = local_clip_path(Path::new("/var/clips"), &key);
        assert_eq!(
            path,
            Path::new("/var/clips/s/q/2025/03/07/09/camera_1_20250307_090542.mp4")
        );
    }
}
