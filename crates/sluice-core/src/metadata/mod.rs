//! Normalized, backend-agnostic metadata.
//!
//! Every backend keeps its own raw payload shape; the variants in this module
//! wrap that payload and compute the public attributes from it on access, so
//! there is never a second copy of a field that could drift from the source.

pub mod cloudfiles;
pub mod dataverse;
pub mod memory;

pub use cloudfiles::{
    CloudFilesFileMetadata, CloudFilesFolderMetadata, CloudFilesListing, CloudFilesObject,
    CloudFilesSubdir,
};
pub use dataverse::{
    DataverseDatasetMetadata, DataverseDatasetVersion, DataverseFile, DataverseFileEntry,
    DataverseFileMetadata, DataverseId,
};
pub use memory::{MemoryFileMetadata, MemoryFolderMetadata, MemoryObject};

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::ser::{Serialize, SerializeSeq, Serializer};
use serde::Deserialize;
use serde_json::{Map, Value};

/// Whether an entry is a file or a folder
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    File,
    Folder,
}

/// Wire form of one metadata entry
#[derive(Clone, Debug, PartialEq, serde::Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetadataRecord {
    pub kind: EntryKind,
    pub provider: String,
    pub name: String,
    pub path: String,
    pub size: Option<u64>,
    pub content_type: Option<String>,
    pub modified: Option<DateTime<Utc>>,
    #[serde(default)]
    pub extra: Map<String, Value>,
}

/// Accessors every metadata variant exposes.
///
/// Implementations derive each value from their raw payload; optional
/// attributes return `None` when the payload lacks them and never fail.
pub trait BaseMetadata {
    /// Backend identifier
    fn provider(&self) -> &'static str;

    fn kind(&self) -> EntryKind;

    fn name(&self) -> String;

    /// Canonical path, a pure function of the identifying raw fields
    fn path(&self) -> String;

    fn size(&self) -> Option<u64> {
        None
    }

    fn content_type(&self) -> Option<String> {
        None
    }

    fn modified(&self) -> Option<DateTime<Utc>> {
        None
    }

    /// Backend-specific facts
    fn extra(&self) -> Map<String, Value> {
        Map::new()
    }

    /// Snapshot this entry as a wire record
    fn record(&self) -> MetadataRecord {
        MetadataRecord {
            kind: self.kind(),
            provider: self.provider().to_string(),
            name: self.name(),
            path: self.path(),
            size: self.size(),
            content_type: self.content_type(),
            modified: self.modified(),
            extra: self.extra(),
        }
    }
}

/// File-shaped metadata
pub trait FileMetadata: BaseMetadata {
    fn file_id(&self) -> String;

    /// Whether the backend will accept a delete of this file
    fn can_delete(&self) -> bool {
        true
    }
}

/// Folder-shaped metadata. A folder exclusively owns its entries.
pub trait FolderMetadata: BaseMetadata {
    fn entries(&self) -> &[Metadata];
}

/// Metadata for one entity of one backend
#[derive(Clone, Debug)]
pub enum Metadata {
    CloudFilesFile(CloudFilesFileMetadata),
    CloudFilesFolder(CloudFilesFolderMetadata),
    DataverseFile(DataverseFileMetadata),
    DataverseDataset(DataverseDatasetMetadata),
    MemoryFile(MemoryFileMetadata),
    MemoryFolder(MemoryFolderMetadata),
}

impl Metadata {
    /// Shared accessor interface
    pub fn base(&self) -> &dyn BaseMetadata {
        match self {
            Self::CloudFilesFile(m) => m,
            Self::CloudFilesFolder(m) => m,
            Self::DataverseFile(m) => m,
            Self::DataverseDataset(m) => m,
            Self::MemoryFile(m) => m,
            Self::MemoryFolder(m) => m,
        }
    }

    /// File view, `None` for folders
    pub fn as_file(&self) -> Option<&dyn FileMetadata> {
        match self {
            Self::CloudFilesFile(m) => Some(m),
            Self::DataverseFile(m) => Some(m),
            Self::MemoryFile(m) => Some(m),
            _ => None,
        }
    }

    /// Folder view, `None` for files
    pub fn as_folder(&self) -> Option<&dyn FolderMetadata> {
        match self {
            Self::CloudFilesFolder(m) => Some(m),
            Self::DataverseDataset(m) => Some(m),
            Self::MemoryFolder(m) => Some(m),
            _ => None,
        }
    }

    pub fn kind(&self) -> EntryKind {
        self.base().kind()
    }

    pub fn provider(&self) -> &'static str {
        self.base().provider()
    }

    pub fn name(&self) -> String {
        self.base().name()
    }

    pub fn path(&self) -> String {
        self.base().path()
    }

    pub fn size(&self) -> Option<u64> {
        self.base().size()
    }

    pub fn content_type(&self) -> Option<String> {
        self.base().content_type()
    }

    pub fn modified(&self) -> Option<DateTime<Utc>> {
        self.base().modified()
    }

    pub fn record(&self) -> MetadataRecord {
        self.base().record()
    }

    /// Child entries; always empty for files
    pub fn entries(&self) -> &[Metadata] {
        self.as_folder().map(|f| f.entries()).unwrap_or(&[])
    }

    /// Folders are never deletable through this core
    pub fn can_delete(&self) -> bool {
        self.as_file().map(|f| f.can_delete()).unwrap_or(false)
    }

    /// Records this entry serializes to.
    ///
    /// A file is one record. A folder with entries is one record per entry;
    /// an empty folder falls back to its own record so it stays representable.
    pub fn serialized(&self) -> Vec<MetadataRecord> {
        let entries = self.entries();
        if entries.is_empty() {
            vec![self.record()]
        } else {
            entries.iter().map(Metadata::record).collect()
        }
    }
}

impl Serialize for Metadata {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let entries = self.entries();
        if entries.is_empty() {
            return self.record().serialize(serializer);
        }
        let mut seq = serializer.serialize_seq(Some(entries.len()))?;
        for entry in entries {
            seq.serialize_element(&entry.record())?;
        }
        seq.end()
    }
}

/// Parse the timestamp formats backends report, `None` when unrecognised
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(value) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

/// Final segment of a slash separated name
pub(crate) fn last_segment(name: &str) -> String {
    name.trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or_default()
        .to_string()
}
