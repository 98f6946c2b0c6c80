//! Bucket addressing
//!
//! A task description hashes to a two-level bucket path,
//! `<root>/<hh>/<hh>/`, taken from the top 16 bits of a 32-bit string
//! hash. The hash is the classic `31 * h + c` polynomial over UTF-16 code
//! units, so existing cache roots written with that scheme stay readable.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex_lite::Regex;

/// Stable 32-bit hash of a task description.
pub fn description_hash(task_description: &str) -> u32 {
    task_description
        .encode_utf16()
        .fold(0u32, |h, unit| h.wrapping_mul(31).wrapping_add(u32::from(unit)))
}

/// Relative bucket path (`hh/hh`) for a task description.
pub fn bucket_segments(task_description: &str) -> (String, String) {
    let code = description_hash(task_description);
    (
        format!("{:02x}", code >> 24),
        format!("{:02x}", (code >> 16) & 0xff),
    )
}

/// Absolute bucket directory under `root`.
pub fn bucket_path(root: &Path, task_description: &str) -> PathBuf {
    let (outer, inner) = bucket_segments(task_description);
    root.join(outer).join(inner)
}

/// Whether `name` looks like a top-level bucket directory.
pub fn is_bucket_name(name: &str) -> bool {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new("^[0-9a-f]{2}$").expect("bucket pattern is valid"))
        .is_match(name)
}
