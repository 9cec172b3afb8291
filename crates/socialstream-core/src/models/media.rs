use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;
use uuid::Uuid;

#[cfg(feature = "sqlx")]
use sqlx::FromRow;

/// Compression progress of a media record.
///
/// Only moves forward: `Started` at creation (and again after a blob
/// rotation), `Complete` once the compressor reports the compressed variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(
    feature = "sqlx",
    sqlx(type_name = "compression_status", rename_all = "lowercase")
)]
#[serde(rename_all = "lowercase")]
pub enum CompressionStatus {
    Started,
    Complete,
}

impl Display for CompressionStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            CompressionStatus::Started => write!(f, "started"),
            CompressionStatus::Complete => write!(f, "complete"),
        }
    }
}

impl FromStr for CompressionStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "started" => Ok(CompressionStatus::Started),
            "complete" => Ok(CompressionStatus::Complete),
            _ => Err(anyhow::anyhow!("Invalid compression status: {}", s)),
        }
    }
}

/// A row of the `media` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(FromRow))]
#[serde(rename_all = "camelCase")]
pub struct MediaRecord {
    pub media_id: i32,
    pub owner_id: i32,
    pub external_id_full: Uuid,
    pub external_id_compressed: Uuid,
    pub content_type: String,
    pub compression_status: CompressionStatus,
    pub is_active: bool,
    pub upload_date: DateTime<Utc>,
}

impl MediaRecord {
    pub fn external_ids(&self) -> ExternalIds {
        ExternalIds {
            full: self.external_id_full,
            compressed: self.external_id_compressed,
        }
    }

    pub fn references(&self, external_id: Uuid) -> bool {
        self.external_id_full == external_id || self.external_id_compressed == external_id
    }
}

/// The two blob keys owned by a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExternalIds {
    pub full: Uuid,
    pub compressed: Uuid,
}

impl ExternalIds {
    /// Two fresh v4 ids. Ids are never reused across records or rotations.
    pub fn generate() -> Self {
        Self {
            full: Uuid::new_v4(),
            compressed: Uuid::new_v4(),
        }
    }

    pub fn as_array(&self) -> [Uuid; 2] {
        [self.full, self.compressed]
    }
}

/// Insert payload for a new record. Status starts at `Started` and the record
/// is active.
#[derive(Debug, Clone)]
pub struct NewMedia {
    pub owner_id: i32,
    pub external_ids: ExternalIds,
    pub content_type: String,
}
