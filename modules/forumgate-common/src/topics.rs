//! Bus topic names. Downstream consumers depend on these strings.

/// Inbound raw chat messages, one per transport event.
pub const RAW_MESSAGES: &str = "raw-messages";

/// Forum posts that passed the ingestion gate. Payload: `RawMessage`.
pub const ADMITTED_FORUM_POSTS: &str = "admitted-forum-posts";

/// Community channel messages that passed the ingestion gate. Payload: `RawMessage`.
pub const ADMITTED_COMMUNITY_MESSAGES: &str = "admitted-community-messages";

/// Posts with no close match. Payload: `UniquePostEvent`.
pub const UNIQUE_FORUM_POSTS: &str = "unique-forum-posts";

/// Posts matching prior content. Payload: `DuplicatePostEvent`.
pub const DUPLICATE_FORUM_POSTS: &str = "duplicate-forum-posts";
