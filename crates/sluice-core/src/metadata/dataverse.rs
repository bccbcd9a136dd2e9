//! Dataverse metadata.
//!
//! A mounted Dataverse provider is one dataset at one version; the dataset is
//! the provider root and its files are addressed by file id.

use super::{BaseMetadata, EntryKind, FileMetadata, FolderMetadata, Metadata};
use crate::path::build_path;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Dataverse reports ids as numbers, older endpoints as strings
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DataverseId {
    Number(u64),
    Text(String),
}

impl fmt::Display for DataverseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

/// Raw `dataFile` object
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataverseFile {
    pub id: DataverseId,
    #[serde(default, alias = "filename")]
    pub name: Option<String>,
    #[serde(default)]
    pub content_type: Option<String>,
    #[serde(default)]
    pub filesize: Option<u64>,
    #[serde(default)]
    pub md5: Option<String>,
}

/// One entry of a dataset version's `files` array
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataverseFileEntry {
    #[serde(rename = "dataFile", alias = "datafile")]
    pub data_file: DataverseFile,
    #[serde(default)]
    pub label: Option<String>,
}

/// Raw dataset version payload
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataverseDatasetVersion {
    #[serde(default)]
    pub files: Vec<DataverseFileEntry>,
    #[serde(default)]
    pub version_state: Option<String>,
}

#[derive(Clone, Debug)]
pub struct DataverseFileMetadata {
    raw: DataverseFile,
    dataset_version: String,
}

impl DataverseFileMetadata {
    pub fn new(raw: DataverseFile, dataset_version: impl Into<String>) -> Self {
        Self {
            raw,
            dataset_version: dataset_version.into(),
        }
    }
}

impl BaseMetadata for DataverseFileMetadata {
    fn provider(&self) -> &'static str {
        "dataverse"
    }

    fn kind(&self) -> EntryKind {
        EntryKind::File
    }

    fn name(&self) -> String {
        self.raw.name.clone().unwrap_or_else(|| self.file_id())
    }

    fn path(&self) -> String {
        build_path([self.file_id().as_str()], false)
    }

    fn size(&self) -> Option<u64> {
        self.raw.filesize
    }

    fn content_type(&self) -> Option<String> {
        self.raw.content_type.clone()
    }

    fn extra(&self) -> Map<String, Value> {
        let mut extra = Map::new();
        extra.insert("fileId".to_string(), Value::String(self.file_id()));
        extra.insert("canDelete".to_string(), Value::Bool(self.can_delete()));
        if let Some(md5) = &self.raw.md5 {
            extra.insert("md5".to_string(), Value::String(md5.clone()));
        }
        extra
    }
}

impl FileMetadata for DataverseFileMetadata {
    fn file_id(&self) -> String {
        self.raw.id.to_string()
    }

    /// Only files in a mutable dataset version can be removed
    fn can_delete(&self) -> bool {
        matches!(self.dataset_version.as_str(), "latest" | "draft")
    }
}

#[derive(Clone, Debug)]
pub struct DataverseDatasetMetadata {
    raw: DataverseDatasetVersion,
    name: String,
    doi: String,
    version: String,
    entries: Vec<Metadata>,
}

impl DataverseDatasetMetadata {
    pub fn new(
        raw: DataverseDatasetVersion,
        name: impl Into<String>,
        doi: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        let version = version.into();
        let entries = raw
            .files
            .iter()
            .map(|entry| {
                let mut file = entry.data_file.clone();
                if file.name.is_none() {
                    file.name = entry.label.clone();
                }
                Metadata::DataverseFile(DataverseFileMetadata::new(file, version.clone()))
            })
            .collect();

        Self {
            raw,
            name: name.into(),
            doi: doi.into(),
            version,
            entries,
        }
    }
}

impl BaseMetadata for DataverseDatasetMetadata {
    fn provider(&self) -> &'static str {
        "dataverse"
    }

    fn kind(&self) -> EntryKind {
        EntryKind::Folder
    }

    fn name(&self) -> String {
        self.name.clone()
    }

    fn path(&self) -> String {
        "/".to_string()
    }

    fn extra(&self) -> Map<String, Value> {
        let mut extra = Map::new();
        extra.insert("doi".to_string(), Value::String(self.doi.clone()));
        extra.insert("version".to_string(), Value::String(self.version.clone()));
        if let Some(state) = &self.raw.version_state {
            extra.insert("versionState".to_string(), Value::String(state.clone()));
        }
        extra
    }
}

impl FolderMetadata for DataverseDatasetMetadata {
    fn entries(&self) -> &[Metadata] {
        &self.entries
    }
}
