//! Request guards for Kateno.
//!
//! Provides:
//! - **Rate limiting**: Per-client sliding window behind the `RateLimit` trait
//! - **Validation**: Size and shape checks on incoming chat requests
//! - **Sanitization**: Strips script blocks and inline handlers from user text
//! - **CSRF**: Double-submit token generation and comparison

pub mod csrf;
pub mod rate_limit;
pub mod validation;

pub use csrf::{generate_token as generate_csrf_token, validate_token as validate_csrf_token};
pub use rate_limit::{RateLimit, RateLimitDecision, RateLimiter};
pub use validation::{
    MAX_CONTENT_CHARS, MAX_MEMORY_CHARS, ValidationError, sanitize, validate_and_sanitize,
};
