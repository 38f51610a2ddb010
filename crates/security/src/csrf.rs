//! CSRF tokens for browser clients.
//!
//! Tokens follow the double-submit pattern: the gateway hands one out in a
//! cookie and the client echoes it in a header. Both copies must match.

use rand::Rng;

/// Random bytes per token; the hex form is twice as long.
pub const TOKEN_BYTES: usize = 32;

/// Generate a fresh token: 32 random bytes, lowercase hex.
pub fn generate_token() -> String {
    let mut rng = rand::rng();
    let mut bytes = [0u8; TOKEN_BYTES];
    rng.fill(&mut bytes[..]);
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Whether `token` matches `stored`. Empty tokens never match.
pub fn validate_token(token: &str, stored: &str) -> bool {
    if token.is_empty() || stored.is_empty() || token.len() != stored.len() {
        return false;
    }
    // Compare every byte so timing does not reveal the matching prefix.
    token
        .bytes()
        .zip(stored.bytes())
        .fold(0u8, |diff, (a, b)| diff | (a ^ b))
        == 0
}
