//! Chunk naming
//!
//! A chunk of `report.pdf` is stored as `report-chunk-<index>.pdf`. Parsing
//! is anchored on both the expected base name and extension, so a key is
//! only accepted when it is exactly `<base>-chunk-<digits><ext>`.

use std::fmt;

/// Marker between the base name and the chunk index
pub const CHUNK_MARKER: &str = "-chunk-";

/// Storage key of one chunk
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChunkKey {
    pub base_name: String,
    pub extension: String,
    /// 1-based position of the chunk in the original file
    pub index: u64,
}

impl ChunkKey {
    pub fn new(base_name: impl Into<String>, extension: impl Into<String>, index: u64) -> Self {
        Self {
            base_name: base_name.into(),
            extension: extension.into(),
            index,
        }
    }

    /// Parse `key` as a chunk of the file `(base_name, extension)`
    pub fn parse(key: &str, base_name: &str, extension: &str) -> Option<Self> {
        parse(key, base_name, extension).map(|index| Self::new(base_name, extension, index))
    }
}

impl fmt::Display for ChunkKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&key_for(&self.base_name, &self.extension, self.index))
    }
}

/// Serialize a chunk key
pub fn key_for(base_name: &str, extension: &str, index: u64) -> String {
    format!("{base_name}{CHUNK_MARKER}{index}{extension}")
}

/// Extract the chunk index from `key`, or `None` if it is not a chunk of
/// `(base_name, extension)`.
pub fn parse(key: &str, base_name: &str, extension: &str) -> Option<u64> {
    let rest = key.strip_prefix(base_name)?.strip_prefix(CHUNK_MARKER)?;
    let digits = rest.strip_suffix(extension)?;

    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }

    match digits.parse::<u64>() {
        Ok(index) if index >= 1 => Some(index),
        _ => None,
    }
}

/// Split a filename into base name and extension.
///
/// The extension starts at the last `.`; a name whose stem would be empty
/// or only dots (`.bashrc`, `..`) has no extension.
pub fn split_filename(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(pos) if !name[..pos].trim_start_matches('.').is_empty() => {
            (&name[..pos], &name[pos..])
        }
        _ => (name, ""),
    }
}
