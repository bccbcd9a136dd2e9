//! Metadata for the in-memory provider

use super::{last_segment, BaseMetadata, EntryKind, FileMetadata, FolderMetadata, Metadata};
use crate::path::build_path;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Stored object description
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryObject {
    /// Object key (path without leading separator)
    pub key: String,
    pub size: u64,
    pub content_type: Option<String>,
    pub modified: DateTime<Utc>,
    /// MD5 of the content, hex encoded
    pub etag: String,
}

#[derive(Clone, Debug)]
pub struct MemoryFileMetadata {
    raw: MemoryObject,
}

impl MemoryFileMetadata {
    pub fn new(raw: MemoryObject) -> Self {
        Self { raw }
    }
}

impl BaseMetadata for MemoryFileMetadata {
    fn provider(&self) -> &'static str {
        "memory"
    }

    fn kind(&self) -> EntryKind {
        EntryKind::File
    }

    fn name(&self) -> String {
        last_segment(&self.raw.key)
    }

    fn path(&self) -> String {
        build_path([self.raw.key.as_str()], false)
    }

    fn size(&self) -> Option<u64> {
        Some(self.raw.size)
    }

    fn content_type(&self) -> Option<String> {
        self.raw.content_type.clone()
    }

    fn modified(&self) -> Option<DateTime<Utc>> {
        Some(self.raw.modified)
    }

    fn extra(&self) -> Map<String, Value> {
        let mut extra = Map::new();
        extra.insert("etag".to_string(), Value::String(self.raw.etag.clone()));
        extra
    }
}

impl FileMetadata for MemoryFileMetadata {
    fn file_id(&self) -> String {
        self.raw.key.clone()
    }
}

#[derive(Clone, Debug)]
pub struct MemoryFolderMetadata {
    prefix: String,
    entries: Vec<Metadata>,
}

impl MemoryFolderMetadata {
    /// `prefix` is the folder key including its trailing separator, empty for the root
    pub fn new(prefix: impl Into<String>, entries: Vec<Metadata>) -> Self {
        Self {
            prefix: prefix.into(),
            entries,
        }
    }
}

impl BaseMetadata for MemoryFolderMetadata {
    fn provider(&self) -> &'static str {
        "memory"
    }

    fn kind(&self) -> EntryKind {
        EntryKind::Folder
    }

    fn name(&self) -> String {
        last_segment(&self.prefix)
    }

    fn path(&self) -> String {
        build_path([self.prefix.as_str()], true)
    }
}

impl FolderMetadata for MemoryFolderMetadata {
    fn entries(&self) -> &[Metadata] {
        &self.entries
    }
}
