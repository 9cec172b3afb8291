//! Application-wide constants.

/// Topic exchange routing keys used by the media lifecycle.
pub mod routing_keys {
    /// Published after a full-resolution blob is written; consumed by the compressor.
    pub const MEDIA_UPLOADED: &str = "media.uploaded";
    /// Published by the compressor once the compressed variant exists.
    pub const MEDIA_COMPRESSED: &str = "media.compressed";
    /// Hard-delete request for a media record, emitted by other services.
    pub const MEDIA_DELETED: &str = "media.deleted";
    /// A blob id that is no longer referenced and should be removed.
    pub const EXTERNAL_ID_DELETED: &str = "media.externalId.deleted";
}

/// Durable queue consumed by the media service.
pub const MEDIA_SERVICE_QUEUE: &str = "media_service";

/// Routing keys bound to [`MEDIA_SERVICE_QUEUE`].
pub const MEDIA_SERVICE_BINDINGS: [&str; 3] = [
    routing_keys::MEDIA_COMPRESSED,
    routing_keys::MEDIA_DELETED,
    routing_keys::EXTERNAL_ID_DELETED,
];

/// Bucket used when `MEDIA_BUCKET` is not set.
pub const DEFAULT_MEDIA_BUCKET: &str = "media";

/// Header carrying the authenticated caller's user id (set by the gateway).
pub const CALLER_USER_ID_HEADER: &str = "x-user-id";
