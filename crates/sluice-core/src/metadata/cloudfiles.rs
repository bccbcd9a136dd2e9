//! Rackspace CloudFiles (OpenStack Swift) metadata

use super::{last_segment, parse_timestamp, BaseMetadata, EntryKind, FileMetadata, FolderMetadata, Metadata};
use crate::path::build_path;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One object as reported by a container listing or an object `HEAD`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloudFilesObject {
    /// Full object name within the container
    pub name: String,
    #[serde(default)]
    pub bytes: Option<u64>,
    #[serde(default)]
    pub content_type: Option<String>,
    #[serde(default)]
    pub last_modified: Option<String>,
    /// MD5 of the object content
    #[serde(default)]
    pub hash: Option<String>,
}

/// Pseudo-directory entry produced by a delimited listing
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloudFilesSubdir {
    pub subdir: String,
}

/// One row of a `format=json` container listing
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CloudFilesListing {
    Subdir(CloudFilesSubdir),
    Object(CloudFilesObject),
}

impl CloudFilesListing {
    fn into_metadata(self) -> Metadata {
        match self {
            Self::Subdir(raw) => {
                Metadata::CloudFilesFolder(CloudFilesFolderMetadata::new(raw, Vec::new()))
            }
            Self::Object(raw) => Metadata::CloudFilesFile(CloudFilesFileMetadata::new(raw)),
        }
    }
}

#[derive(Clone, Debug)]
pub struct CloudFilesFileMetadata {
    raw: CloudFilesObject,
}

impl CloudFilesFileMetadata {
    pub fn new(raw: CloudFilesObject) -> Self {
        Self { raw }
    }
}

impl BaseMetadata for CloudFilesFileMetadata {
    fn provider(&self) -> &'static str {
        "cloudfiles"
    }

    fn kind(&self) -> EntryKind {
        EntryKind::File
    }

    fn name(&self) -> String {
        last_segment(&self.raw.name)
    }

    fn path(&self) -> String {
        build_path([self.raw.name.as_str()], false)
    }

    fn size(&self) -> Option<u64> {
        self.raw.bytes
    }

    fn content_type(&self) -> Option<String> {
        self.raw.content_type.clone()
    }

    fn modified(&self) -> Option<DateTime<Utc>> {
        self.raw.last_modified.as_deref().and_then(parse_timestamp)
    }

    fn extra(&self) -> Map<String, Value> {
        let mut extra = Map::new();
        if let Some(hash) = &self.raw.hash {
            extra.insert("hash".to_string(), Value::String(hash.clone()));
        }
        extra
    }
}

impl FileMetadata for CloudFilesFileMetadata {
    fn file_id(&self) -> String {
        self.raw.name.clone()
    }
}

#[derive(Clone, Debug)]
pub struct CloudFilesFolderMetadata {
    raw: CloudFilesSubdir,
    entries: Vec<Metadata>,
}

impl CloudFilesFolderMetadata {
    /// Build a folder and its entries from a delimited listing.
    ///
    /// Swift echoes the queried prefix back as a zero-byte marker object for
    /// pseudo-directories created through other tools; that marker is the
    /// folder itself, not a child, and is skipped.
    pub fn new(raw: CloudFilesSubdir, listing: Vec<CloudFilesListing>) -> Self {
        let entries = listing
            .into_iter()
            .filter(|row| !matches!(row, CloudFilesListing::Object(obj) if obj.name == raw.subdir))
            .map(CloudFilesListing::into_metadata)
            .collect();
        Self { raw, entries }
    }
}

impl BaseMetadata for CloudFilesFolderMetadata {
    fn provider(&self) -> &'static str {
        "cloudfiles"
    }

    fn kind(&self) -> EntryKind {
        EntryKind::Folder
    }

    fn name(&self) -> String {
        last_segment(&self.raw.subdir)
    }

    fn path(&self) -> String {
        build_path([self.raw.subdir.as_str()], true)
    }
}

impl FolderMetadata for CloudFilesFolderMetadata {
    fn entries(&self) -> &[Metadata] {
        &self.entries
    }
}
