//! API constants

/// Prefix every media route is nested under.
pub const API_PREFIX: &str = "/api/v1/media";

/// Seconds a client should wait before retrying a delete of a media item that
/// is still being compressed.
pub const NOT_READY_RETRY_AFTER_SECS: u64 = 5;

/// Multipart field carrying the upload body.
pub const UPLOAD_FIELD: &str = "file";

/// Multipart field carrying a replacement profile image.
pub const PROFILE_IMAGE_FIELD: &str = "image";

/// Compressed bytes only change when a profile image is rotated in place.
pub const CACHE_CONTROL_COMPRESSED: &str = "public, max-age=3600";

/// The full variant is replaced by the compressed one once it exists.
pub const CACHE_CONTROL_UNCOMPRESSED: &str = "public, max-age=60";

/// A profile pointer may move at any time.
pub const CACHE_CONTROL_PROFILE: &str = "private, no-cache";
