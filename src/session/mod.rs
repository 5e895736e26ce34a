//! Encrypted session cookie for the Salesforce connection.
//!
//! The full connection record (tokens included) lives client-side in one
//! AES-256-GCM encrypted cookie. The server holds only the master key, so
//! a cookie cannot be read or forged without it, and any tampering makes
//! decryption fail. A decode failure is treated as "no connection".

use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use anyhow::{anyhow, Context, Result};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD as BASE64, Engine};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Size of the master key in bytes (256 bits)
const KEY_SIZE: usize = 32;

/// Size of the nonce in bytes (96 bits, standard for GCM)
const NONCE_SIZE: usize = 12;

/// Session cookie name
pub const SESSION_COOKIE_NAME: &str = "wd_session";

/// Session cookie lifetime (24 hours)
pub const SESSION_COOKIE_MAX_AGE_SECS: i64 = 24 * 60 * 60;

/// One authenticated link to a Salesforce org.
///
/// The access token and `expires_at` are always set together; a connection
/// never carries a token without knowing when it dies.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Connection {
    /// Short-lived OAuth access token
    pub access_token: String,
    /// Long-lived OAuth refresh token
    pub refresh_token: String,
    /// Salesforce instance URL (e.g. https://acme.my.salesforce.com)
    pub instance_url: String,
    /// Salesforce org identifier
    pub org_id: String,
    /// Display name of the authenticated user
    pub user_name: String,
    /// When the current access token was issued (UTC)
    pub issued_at: DateTime<Utc>,
    /// When the current access token expires (UTC)
    pub expires_at: DateTime<Utc>,
}

/// Encrypts and decrypts [`Connection`] records into cookie values.
///
/// Wire format: base64url(nonce || ciphertext) over the JSON-serialized
/// connection. The random nonce is generated per encode and never reused.
#[derive(Clone)]
pub struct SessionCodec {
    key: Vec<u8>,
}

impl SessionCodec {
    /// Create a codec from a base64-encoded 32-byte master key.
    pub fn new(key_base64: &str) -> Result<Self> {
        let key = base64::engine::general_purpose::STANDARD
            .decode(key_base64)
            .context("Failed to decode base64 session key")?;

        if key.len() != KEY_SIZE {
            return Err(anyhow!(
                "Session key must be {} bytes (256 bits), got {} bytes",
                KEY_SIZE,
                key.len()
            ));
        }

        Ok(Self { key })
    }

    /// Encrypt a connection into a cookie-safe blob.
    pub fn encode(&self, connection: &Connection) -> Result<String> {
        let plaintext =
            serde_json::to_vec(connection).context("Failed to serialize connection")?;

        let cipher = Aes256Gcm::new_from_slice(&self.key)
            .map_err(|e| anyhow!("Failed to create cipher: {}", e))?;

        // Random nonce per encode (never reuse)
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

        let ciphertext = cipher
            .encrypt(&nonce, plaintext.as_ref())
            .map_err(|e| anyhow!("Encryption failed: {}", e))?;

        let mut blob = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        blob.extend_from_slice(&nonce);
        blob.extend_from_slice(&ciphertext);

        Ok(BASE64.encode(blob))
    }

    /// Decrypt a cookie value back into a connection.
    ///
    /// Returns `None` for anything that does not decrypt cleanly: bad
    /// base64, truncated input, wrong key, flipped bits. Callers checking
    /// for a session must not see malformed input as an error.
    pub fn decode(&self, blob: &str) -> Option<Connection> {
        let bytes = BASE64.decode(blob).ok()?;
        if bytes.len() <= NONCE_SIZE {
            return None;
        }

        let (nonce_bytes, ciphertext) = bytes.split_at(NONCE_SIZE);
        let cipher = Aes256Gcm::new_from_slice(&self.key).ok()?;
        let nonce = Nonce::from_slice(nonce_bytes);

        let plaintext = cipher.decrypt(nonce, ciphertext).ok()?;
        serde_json::from_slice(&plaintext).ok()
    }
}

/// Build the Set-Cookie value that installs a session.
pub fn build_session_cookie(blob: &str, production: bool) -> String {
    let secure = if production { "; Secure" } else { "" };
    format!(
        "{}={}; Path=/; Max-Age={}; HttpOnly; SameSite=Lax{}",
        SESSION_COOKIE_NAME, blob, SESSION_COOKIE_MAX_AGE_SECS, secure
    )
}

/// Build the Set-Cookie value that removes the session.
pub fn clear_session_cookie(production: bool) -> String {
    let secure = if production { "; Secure" } else { "" };
    format!(
        "{}=; Path=/; Max-Age=0; HttpOnly; SameSite=Lax{}",
        SESSION_COOKIE_NAME, secure
    )
}
