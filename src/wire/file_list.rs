//! Flattened file listing carried by `FileListResponse`.
//!
//! Each entry is `path<SEP1>size`; entries are joined by `<SEP2>`. Both
//! separators travel in the frame next to the listing so the receiving node
//! never assumes them. Entries are split on NUL, which no file name can
//! contain; the size is taken after the last `*`, so `*` inside a name is
//! harmless.

use serde::{Deserialize, Serialize};

/// Separator between a path and its size
pub const FIELD_SEPARATOR: &str = "*";

/// Separator between entries
pub const ENTRY_SEPARATOR: &str = "\0";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileInfo {
    pub path: String,
    pub size: u64,
}

impl FileInfo {
    pub fn new(path: impl Into<String>, size: u64) -> Self {
        Self {
            path: path.into(),
            size,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileList {
    pub files: Vec<FileInfo>,
}

impl FileList {
    pub fn new(files: Vec<FileInfo>) -> Self {
        Self { files }
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn total_size(&self) -> u64 {
        self.files.iter().map(|f| f.size).sum()
    }

    pub fn find(&self, path: &str) -> Option<&FileInfo> {
        self.files.iter().find(|f| f.path == path)
    }

    /// Flatten the listing with the given separators.
    ///
    /// Entries whose path contains `entry_sep` cannot be split back out and
    /// are left out.
    pub fn flatten(&self, field_sep: &str, entry_sep: &str) -> String {
        self.files
            .iter()
            .filter(|f| {
                let splittable = !f.path.contains(entry_sep);
                if !splittable {
                    tracing::warn!("Leaving {:?} out of the file list", f.path);
                }
                splittable
            })
            .map(|f| format!("{}{}{}", f.path, field_sep, f.size))
            .collect::<Vec<_>>()
            .join(entry_sep)
    }

    /// Rebuild a listing, skipping entries whose size does not parse
    pub fn parse(flat: &str, field_sep: &str, entry_sep: &str) -> Self {
        if flat.is_empty() || field_sep.is_empty() || entry_sep.is_empty() {
            return Self::default();
        }

        let files = flat
            .split(entry_sep)
            .filter(|entry| !entry.is_empty())
            .filter_map(|entry| {
                let parsed = entry
                    .rsplit_once(field_sep)
                    .and_then(|(path, size)| size.parse::<u64>().ok().map(|s| (path, s)));
                if parsed.is_none() {
                    tracing::debug!("Skipping malformed file list entry: {:?}", entry);
                }
                parsed.map(|(path, size)| FileInfo::new(path, size))
            })
            .collect();

        Self { files }
    }
}
