//! Token generation, hashing and syntax checks.

use std::fmt;

use rand::RngCore;
use sha2::{Digest, Sha256};

/// Length of a plaintext token: 16 random bytes in unpadded base32.
pub const PLAINTEXT_LEN: usize = 26;

const BASE32_ALPHABET: &[u8; 32] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ234567";

/// What a token may be used for. Tokens of different scopes share one store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenScope {
    Authentication,
    Activation,
}

impl TokenScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenScope::Authentication => "authentication",
            TokenScope::Activation => "activation",
        }
    }
}

impl fmt::Display for TokenScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Generate a fresh random plaintext token.
pub fn generate_plaintext() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    encode_base32(&bytes)
}

/// SHA-256 of the plaintext; only the hash is ever stored.
pub fn hash_plaintext(plaintext: &str) -> [u8; 32] {
    Sha256::digest(plaintext.as_bytes()).into()
}

/// Surface check performed before any store lookup.
pub fn is_valid_plaintext(plaintext: &str) -> bool {
    plaintext.len() == PLAINTEXT_LEN
        && plaintext
            .bytes()
            .all(|b| b.is_ascii_uppercase() || (b'2'..=b'7').contains(&b))
}

fn encode_base32(bytes: &[u8]) -> String {
    let mut out = String::with_capacity((bytes.len() * 8).div_ceil(5));
    let mut buffer: u16 = 0;
    let mut bits = 0;

    for &byte in bytes {
        buffer = (buffer << 8) | u16::from(byte);
        bits += 8;
        while bits >= 5 {
            bits -= 5;
            out.push(BASE32_ALPHABET[((buffer >> bits) & 0x1f) as usize] as char);
        }
    }
    if bits > 0 {
        out.push(BASE32_ALPHABET[((buffer << (5 - bits)) & 0x1f) as usize] as char);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_tokens_are_valid() {
        for _ in 0..32 {
            let token = generate_plaintext();
            assert_eq!(token.len(), PLAINTEXT_LEN);
            assert!(is_valid_plaintext(&token), "{token}");
        }
    }

    #[test]
    fn test_base32_known_vector() {
        // RFC 4648 test vector, without padding.
        assert_eq!(encode_base32(b"foobar"), "MZXW6YTBOI");
    }

    #[test]
    fn test_rejects_bad_syntax() {
        assert!(!is_valid_plaintext(""));
        assert!(!is_valid_plaintext("ABCDEFGHIJKLMNOPQRSTUVWXY"));
        assert!(!is_valid_plaintext("ABCDEFGHIJKLMNOPQRSTUVWXYZ2"));
        assert!(!is_valid_plaintext("abcdefghijklmnopqrstuvwxyz"));
        assert!(!is_valid_plaintext("ABCDEFGHIJKLMNOPQRSTUVWXY1"));
        assert!(is_valid_plaintext("ABCDEFGHIJKLMNOPQRSTUVWXY7"));
    }

    #[test]
    fn test_hash_is_stable() {
        assert_eq!(hash_plaintext("X"), hash_plaintext("X"));
        assert_ne!(hash_plaintext("X"), hash_plaintext("Y"));
    }
}
