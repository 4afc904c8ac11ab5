//! # Credential Generation
//!
//! Generates the passwords handed to provisioned database roles.
//!
//! Each password is 16 characters drawn from a fixed 64-entry alphabet by
//! masking one CSPRNG byte down to 6 bits per character, so selection is
//! uniform over the alphabet with no further character-class guarantees.

use ring::rand::{SecureRandom, SystemRandom};
use thiserror::Error;
use zeroize::Zeroizing;

/// Generated password length in characters
pub const PASSWORD_LEN: usize = 16;

// 64 entries so a 6-bit mask indexes it exactly
const ALPHABET: &[u8; 64] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789!$";

#[derive(Debug, Error)]
pub enum PasswordError {
    #[error("failed to read random data")]
    Entropy,
}

/// Produce a fresh random credential
///
/// Fails only if the system random source cannot fill the request.
pub fn generate() -> Result<Zeroizing<String>, PasswordError> {
    let rng = SystemRandom::new();
    let mut bytes = Zeroizing::new([0u8; PASSWORD_LEN]);
    rng.fill(&mut bytes[..]).map_err(|_| PasswordError::Entropy)?;

    let mut password = Zeroizing::new(String::with_capacity(PASSWORD_LEN));
    for byte in bytes.iter() {
        password.push(char::from(ALPHABET[usize::from(byte & 0x3f)]));
    }
    Ok(password)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alphabet_has_64_distinct_entries() {
        let mut seen = std::collections::HashSet::new();
        for byte in ALPHABET.iter() {
            assert!(seen.insert(*byte), "duplicate alphabet entry {}", *byte as char);
        }
        assert_eq!(seen.len(), 64);
    }

    #[test]
    fn generates_fixed_length_from_alphabet() {
        let password = generate().unwrap();
        assert_eq!(password.len(), PASSWORD_LEN);
        for ch in password.bytes() {
            assert!(ALPHABET.contains(&ch), "unexpected character {}", ch as char);
        }
    }

    #[test]
    fn successive_passwords_differ() {
        // 64^16 possibilities; a collision here means the source is broken
        let first = generate().unwrap();
        let second = generate().unwrap();
        assert_ne!(*first, *second);
    }
}
