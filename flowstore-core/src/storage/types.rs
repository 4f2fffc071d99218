//! Block data model
//!
//! A `Block` is owned by the caller (the editor) and only mutated by the
//! engine through a `BlockSetter`. Its `storage_class` says where the
//! authoritative content currently lives:
//! - `Internal` - `content` is inline and complete
//! - `External` - content is split into chunks listed by a remote manifest

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::storage::ids::{BlockId, VersionId};

/// How a block's content is interpreted when chunking
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    #[default]
    Text,
    /// JSON document; an array is treated as a list of records
    Structured,
}

impl ContentType {
    /// Whether `content` counts as empty for this content type.
    /// Structured content that is only whitespace is empty.
    pub fn is_empty_content(&self, content: &str) -> bool {
        match self {
            ContentType::Text => content.is_empty(),
            ContentType::Structured => content.trim().is_empty(),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageClass {
    #[default]
    Internal,
    External,
}

impl fmt::Display for StorageClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageClass::Internal => write!(f, "internal"),
            StorageClass::External => write!(f, "external"),
        }
    }
}

/// Observable lifecycle flag rendered by the editor
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SavingStatus {
    Editing,
    Saving,
    #[default]
    Saved,
    Error,
    SwitchingToExternal,
    SwitchError,
}

/// Stable `{user_id}/{block_id}/{version_id}` namespace of a block's external chunks
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceKey(String);

impl ResourceKey {
    pub fn new(user_id: &str, block_id: &BlockId, version_id: &VersionId) -> Self {
        Self(format!("{}/{}/{}", user_id, block_id, version_id))
    }

    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Derive a resource key from a storage object key such as
    /// `user/block/version/manifest.json` by keeping its first three segments.
    /// Returns `None` when the key has fewer than three non-empty segments.
    pub fn from_storage_key(key: &str) -> Option<Self> {
        let segments: Vec<&str> = key.split('/').take(3).collect();
        if segments.len() < 3 || segments.iter().any(|s| s.is_empty()) {
            return None;
        }
        Some(Self(segments.join("/")))
    }

    /// The version segment (third path segment), if the key is well formed
    pub fn version_id(&self) -> Option<VersionId> {
        match self.0.split('/').nth(2) {
            Some(v) if !v.is_empty() => Some(VersionId::from_string(v)),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Pointer to a block's external storage. Kept after switching back to
/// internal so a later externalization reuses the same namespace.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalMetadata {
    pub resource_key: ResourceKey,
    pub version_id: VersionId,
    pub content_type: ContentType,
}

/// Derived state machine position of a block
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlockState {
    Internal,
    External { dirty: bool },
    SwitchingToExternal,
    SwitchError,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub id: BlockId,
    #[serde(default)]
    pub content_type: ContentType,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub storage_class: StorageClass,
    /// Only meaningful for external blocks: in-memory content has unsynced edits
    #[serde(default)]
    pub dirty: bool,
    #[serde(default)]
    pub saving_status: SavingStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub save_error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_metadata: Option<ExternalMetadata>,
}

impl Block {
    /// New internal block with the given content
    pub fn new(id: impl Into<BlockId>, content_type: ContentType, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            content_type,
            content: content.into(),
            storage_class: StorageClass::Internal,
            dirty: false,
            saving_status: SavingStatus::Saved,
            save_error: None,
            external_metadata: None,
        }
    }

    pub fn text(id: impl Into<BlockId>, content: impl Into<String>) -> Self {
        Self::new(id, ContentType::Text, content)
    }

    pub fn structured(id: impl Into<BlockId>, content: impl Into<String>) -> Self {
        Self::new(id, ContentType::Structured, content)
    }

    /// Apply an editor change. Internal blocks only flip to `Editing`;
    /// external blocks are additionally marked dirty.
    pub fn record_edit(&mut self, content: impl Into<String>) {
        self.content = content.into();
        if self.storage_class == StorageClass::External {
            self.dirty = true;
        }
        self.saving_status = SavingStatus::Editing;
    }

    pub fn state(&self) -> BlockState {
        match self.saving_status {
            SavingStatus::SwitchingToExternal => BlockState::SwitchingToExternal,
            SavingStatus::SwitchError => BlockState::SwitchError,
            _ => match self.storage_class {
                StorageClass::Internal => BlockState::Internal,
                StorageClass::External => BlockState::External { dirty: self.dirty },
            },
        }
    }

    pub fn resource_key(&self) -> Option<&ResourceKey> {
        self.external_metadata.as_ref().map(|m| &m.resource_key)
    }
}
