use serde::{de::DeserializeOwned, Deserialize, Serialize};
use uuid::Uuid;

use crate::constants::routing_keys;

/// An event payload bound to a routing key.
pub trait DomainEvent: Serialize + DeserializeOwned {
    const ROUTING_KEY: &'static str;
}

/// A full-resolution blob was written; the compressor picks this up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaUploaded {
    pub media_id: i32,
    pub external_id_full: Uuid,
    pub external_id_compressed: Uuid,
    pub content_type: String,
}

impl DomainEvent for MediaUploaded {
    const ROUTING_KEY: &'static str = routing_keys::MEDIA_UPLOADED;
}

/// The compressed variant exists.
///
/// `external_id_compressed` is optional; when present it pins the event to a
/// specific blob version so a late event cannot complete a rotated record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaCompressed {
    pub media_id: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_id_compressed: Option<Uuid>,
}

impl DomainEvent for MediaCompressed {
    const ROUTING_KEY: &'static str = routing_keys::MEDIA_COMPRESSED;
}

/// Hard-delete request for a record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaDeleted {
    pub media_id: i32,
}

impl DomainEvent for MediaDeleted {
    const ROUTING_KEY: &'static str = routing_keys::MEDIA_DELETED;
}

/// A blob id that no record should reference any more.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExternalIdDeleted {
    pub external_id: Uuid,
}

impl DomainEvent for ExternalIdDeleted {
    const ROUTING_KEY: &'static str = routing_keys::EXTERNAL_ID_DELETED;
}
