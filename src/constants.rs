//! Shared content-type headers, avatar/gravatar URLs, and API error messages.

/// Content-type header value for JSON responses.
pub const HEADER_JSON: &str = "application/json; charset=utf-8";

/// Base URL for gravatar avatar digests; the MD5 hex digest is appended.
pub const GRAVATAR_BASE_URL: &str = "https://www.gravatar.com/avatar/";

/// Generic avatar used when gravatar is disabled or no email is available.
pub const GENERIC_AVATAR: &str = "https://www.gravatar.com/avatar/00000000000000000000000000000000";

/// Display name used when an author has no name.
pub const DEFAULT_AUTHOR_NAME: &str = "Unknown";

/// Returned when the authorization header is malformed.
pub const API_ERROR_BAD_AUTH_HEADER: &str = "bad authorization header";

/// Returned when a supplied token is not recognized.
pub const API_ERROR_UNAUTHORIZED_ACCESS: &str = "unauthorized access";
