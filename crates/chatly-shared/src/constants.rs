/// Application name
pub const APP_NAME: &str = "Chatly";

/// Maximum length of a user id handed to us by the auth provider
pub const MAX_USER_ID_LEN: usize = 128;

/// Separator used when deriving the unordered pair key of two users
pub const PAIR_KEY_SEPARATOR: char = '|';

/// Maximum text message length in characters
pub const MAX_TEXT_LEN: usize = 4096;

/// Maximum file upload size in bytes (50 MiB)
pub const MAX_FILE_SIZE: usize = 50 * 1024 * 1024;

/// Maximum number of users returned by a username prefix search
pub const SEARCH_LIMIT: usize = 20;

/// Upper bound appended to a prefix for lexicographic range search
pub const PREFIX_RANGE_END: char = '\u{f8ff}';

/// Default capacity of the store change bus
pub const DEFAULT_CHANGE_BUS_CAPACITY: usize = 1024;

/// Buffered snapshots per realtime subscription
pub const SUBSCRIPTION_BUFFER: usize = 16;

/// Fallback display name when a profile has none
pub const UNKNOWN_USER_NAME: &str = "Unknown User";

/// Preview stored on a freshly created chat
pub const NEW_CHAT_PREVIEW: &str = "You are now connected! Start chatting.";

/// Preview for image messages
pub const IMAGE_PREVIEW: &str = "📷 Photo";

/// Preview for document messages
pub const DOCUMENT_PREVIEW: &str = "📄 Document";

/// Blob path prefix for chat attachments
pub const CHAT_FILES_PREFIX: &str = "chatFiles";
