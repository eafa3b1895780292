//! File counters used by the retention policy.
//!
//! Both walks are recursive, include hidden entries, count regular files
//! only, and never follow symlinks. Unreadable subtrees are skipped.

use std::path::Path;

use walkdir::WalkDir;

/// Whether `name` ends with `extension` (literal suffix, case-sensitive).
pub fn has_extension(name: &std::ffi::OsStr, extension: &str) -> bool {
    name.as_encoded_bytes().ends_with(extension.as_bytes())
}

/// Count regular files under `root`.
pub fn count_all_files(root: &Path) -> u64 {
    count_matching(root, |_| true)
}

/// Count regular files under `root` whose name ends with `extension`.
pub fn count_language_files(root: &Path, extension: &str) -> u64 {
    count_matching(root, |name| has_extension(name, extension))
}

/// Both counts in one walk: `(total, language)`.
pub fn count_files(root: &Path, extension: &str) -> (u64, u64) {
    let mut total = 0;
    let mut language = 0;
    for entry in regular_files(root) {
        total += 1;
        if has_extension(entry.file_name(), extension) {
            language += 1;
        }
    }
    (total, language)
}

fn count_matching(root: &Path, keep: impl Fn(&std::ffi::OsStr) -> bool) -> u64 {
    regular_files(root)
        .filter(|entry| keep(entry.file_name()))
        .count() as u64
}

fn regular_files(root: &Path) -> impl Iterator<Item = walkdir::DirEntry> {
    WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_map(std::result::Result::ok)
        .filter(|entry| entry.file_type().is_file())
}
