//! WireGuard Key Material
//!
//! Raw 32-byte keys as they appear in configuration files (base64) and on
//! the engine's control interface (hex). Generating or deriving keys is the
//! engine's job; this module only moves bytes between encodings.

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use std::fmt;

/// Length of every WireGuard key in bytes
pub const KEY_LEN: usize = 32;

fn to_array(bytes: Vec<u8>) -> Result<[u8; KEY_LEN], KeyError> {
    <[u8; KEY_LEN]>::try_from(bytes.as_slice()).map_err(|_| KeyError::InvalidLength(bytes.len()))
}

fn decode_base64(s: &str) -> Result<[u8; KEY_LEN], KeyError> {
    to_array(BASE64.decode(s)?)
}

fn decode_hex(s: &str) -> Result<[u8; KEY_LEN], KeyError> {
    to_array(hex::decode(s)?)
}

/// Interface private key
#[derive(Clone, PartialEq, Eq)]
pub struct PrivateKey {
    bytes: [u8; KEY_LEN],
}

impl PrivateKey {
    /// Create from raw bytes
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self { bytes }
    }

    /// Create from base64 string
    pub fn from_base64(s: &str) -> Result<Self, KeyError> {
        decode_base64(s).map(Self::from_bytes)
    }

    /// Get raw bytes
    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.bytes
    }

    /// Encode as base64
    pub fn to_base64(&self) -> String {
        BASE64.encode(self.bytes)
    }

    /// Encode as lowercase hex (control interface form)
    pub fn to_hex(&self) -> String {
        hex::encode(self.bytes)
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PrivateKey([redacted])")
    }
}

/// Peer public key
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct PublicKey {
    bytes: [u8; KEY_LEN],
}

impl PublicKey {
    /// Create from raw bytes
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self { bytes }
    }

    /// Create from base64 string
    pub fn from_base64(s: &str) -> Result<Self, KeyError> {
        decode_base64(s).map(Self::from_bytes)
    }

    /// Get raw bytes
    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.bytes
    }

    /// Encode as base64
    pub fn to_base64(&self) -> String {
        BASE64.encode(self.bytes)
    }

    /// Encode as lowercase hex (control interface form)
    pub fn to_hex(&self) -> String {
        hex::encode(self.bytes)
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({}...)", &self.to_base64()[..8])
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_base64())
    }
}

/// Optional symmetric key mixed into the handshake
#[derive(Clone, PartialEq, Eq)]
pub struct PresharedKey {
    bytes: [u8; KEY_LEN],
}

impl PresharedKey {
    /// Create from raw bytes
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self { bytes }
    }

    /// Create from hex string
    pub fn from_hex(s: &str) -> Result<Self, KeyError> {
        decode_hex(s).map(Self::from_bytes)
    }

    /// Create from base64 string
    pub fn from_base64(s: &str) -> Result<Self, KeyError> {
        decode_base64(s).map(Self::from_bytes)
    }

    /// Decode a configuration value: hex first, then base64.
    ///
    /// A value that is valid in both encodings is taken as hex. The error
    /// returned on failure is the one from the base64 attempt.
    pub fn decode(s: &str) -> Result<Self, KeyError> {
        Self::from_hex(s).or_else(|_| Self::from_base64(s))
    }

    /// Get raw bytes
    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.bytes
    }

    /// Encode as lowercase hex
    pub fn to_hex(&self) -> String {
        hex::encode(self.bytes)
    }
}

impl fmt::Debug for PresharedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PresharedKey([redacted])")
    }
}

/// Key parsing errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum KeyError {
    #[error("Missing key")]
    Missing,

    #[error("Invalid base64 encoding: {0}")]
    InvalidBase64(#[from] base64::DecodeError),

    #[error("Invalid hex encoding: {0}")]
    InvalidHex(#[from] hex::FromHexError),

    #[error("Invalid key length {0} (expected 32 bytes)")]
    InvalidLength(usize),
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY_B64: &str = "WDE5QVQyVWxQRWZBUEdldkxMWHRURng5MlVPTlk4M1E=";
    const KEY_HEX: &str = "583139415432556c50456641504765764c4c58745446783932554f4e59383351";

    #[test]
    fn test_key_base64_roundtrip() {
        let key = PrivateKey::from_base64(KEY_B64).unwrap();

        assert_eq!(key.to_base64(), KEY_B64);
        assert_eq!(key.to_hex(), KEY_HEX);
    }

    #[test]
    fn test_short_key() {
        let result = PublicKey::from_base64("Zm9vYmFy");
        assert_eq!(result, Err(KeyError::InvalidLength(6)));
    }

    #[test]
    fn test_invalid_base64() {
        let result = PublicKey::from_base64("not-valid-base64!!!");
        assert!(matches!(result, Err(KeyError::InvalidBase64(_))));
    }

    #[test]
    fn test_preshared_hex_then_base64() {
        let from_hex = PresharedKey::decode(KEY_HEX).unwrap();
        let from_b64 = PresharedKey::decode(KEY_B64).unwrap();

        assert_eq!(from_hex, from_b64);
        assert_eq!(from_hex.to_hex(), KEY_HEX);
    }

    #[test]
    fn test_preshared_rejects_short_hex() {
        // valid hex, but only 4 bytes; base64 fallback yields 6 bytes
        let result = PresharedKey::decode("1234abcd");
        assert_eq!(result, Err(KeyError::InvalidLength(6)));
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let key = PrivateKey::from_base64(KEY_B64).unwrap();
        assert_eq!(format!("{:?}", key), "PrivateKey([redacted])");
    }
}
