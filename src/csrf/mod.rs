//! CSRF double-submit token service.
//!
//! A random token is set as a cookie and mirrored to the client in the
//! response body. Mutating requests must present the same value in the
//! `x-csrf-token` header; the guard compares header against cookie.

use rand::RngCore;

/// CSRF token length in bytes (32 bytes = 256 bits)
const CSRF_TOKEN_LENGTH: usize = 32;

/// Cookie holding the server-side half of the pair.
///
/// Deliberately not HttpOnly: the client must read the body copy anyway,
/// and the protection comes from the header/cookie match, not secrecy.
pub const CSRF_COOKIE_NAME: &str = "wd_csrf";

/// Request header carrying the client-side half of the pair
pub const CSRF_HEADER_NAME: &str = "x-csrf-token";

/// Token cookie lifetime (24 hours)
pub const CSRF_COOKIE_MAX_AGE_SECS: i64 = 24 * 60 * 60;

/// Generate a new CSRF token: 32 cryptographically random bytes rendered
/// as lowercase hex.
pub fn issue_token() -> String {
    let mut bytes = [0u8; CSRF_TOKEN_LENGTH];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Validate a presented header token against the cookie token.
///
/// Fails closed: missing either value or a length mismatch is invalid.
/// When lengths match, every byte pair is compared before concluding so
/// the comparison time does not depend on the length of the matching
/// prefix.
pub fn validate(cookie_value: Option<&str>, header_value: Option<&str>) -> bool {
    let (cookie, header) = match (cookie_value, header_value) {
        (Some(c), Some(h)) => (c.as_bytes(), h.as_bytes()),
        _ => return false,
    };

    if cookie.len() != header.len() || cookie.is_empty() {
        return false;
    }

    let mut diff = 0u8;
    for (a, b) in cookie.iter().zip(header.iter()) {
        diff |= a ^ b;
    }
    diff == 0
}

/// Build the Set-Cookie value for a freshly issued token.
pub fn build_cookie(token: &str, production: bool) -> String {
    let secure = if production { "; Secure" } else { "" };
    format!(
        "{}={}; Path=/; Max-Age={}; SameSite=Strict{}",
        CSRF_COOKIE_NAME, token, CSRF_COOKIE_MAX_AGE_SECS, secure
    )
}
