use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;
use uuid::Uuid;

#[cfg(feature = "sqlx")]
use sqlx::FromRow;

/// Why a blob id was recorded as pending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(type_name = "text", rename_all = "lowercase"))]
#[serde(rename_all = "lowercase")]
pub enum PendingOperationKind {
    /// Blob written for a record that may never commit.
    Upload,
    /// Blob written for a rotation that may never commit.
    Replace,
    /// Blob that lost its record and still needs removal.
    Reclaim,
    /// Compressed id of a record that moved on before its compressor
    /// reported. The compressor may still write it, so an absent blob does
    /// not settle it.
    Superseded,
}

impl Display for PendingOperationKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            PendingOperationKind::Upload => write!(f, "upload"),
            PendingOperationKind::Replace => write!(f, "replace"),
            PendingOperationKind::Reclaim => write!(f, "reclaim"),
            PendingOperationKind::Superseded => write!(f, "superseded"),
        }
    }
}

impl FromStr for PendingOperationKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "upload" => Ok(PendingOperationKind::Upload),
            "replace" => Ok(PendingOperationKind::Replace),
            "reclaim" => Ok(PendingOperationKind::Reclaim),
            "superseded" => Ok(PendingOperationKind::Superseded),
            _ => Err(anyhow::anyhow!("Invalid pending operation kind: {}", s)),
        }
    }
}

/// A blob whose fate is not settled yet.
///
/// Rows are written outside the metadata transaction, so they survive a
/// rollback or a crash and the reconciliation sweep can finish the job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(FromRow))]
pub struct PendingBlobOperation {
    pub kind: PendingOperationKind,
    pub bucket: String,
    pub external_id: Uuid,
    pub created_at: DateTime<Utc>,
}
