//! Challenge response for the lock's PIN handshake
//!
//! The lock sends a random challenge on the lock status characteristic.
//! The first five bytes are offset by the PIN digits, the 16 byte block is
//! then AES-128 encrypted (ECB, no padding) with the shared key.

use aes::Aes128;
use aes::cipher::{BlockEncrypt, KeyInit, generic_array::GenericArray};

use secuyou_proto::CHALLENGE_LEN;

use crate::config::PIN_LEN;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CryptoError {
    #[error("challenge too short: expected {CHALLENGE_LEN} bytes, got {0}")]
    ChallengeTooShort(usize),
    #[error("pin must be {PIN_LEN} ascii digits")]
    InvalidPin,
    #[error("invalid AES key length {0}")]
    InvalidKeyLength(usize),
}

/// Compute the 16 byte response to `challenge`
///
/// Only the first [`CHALLENGE_LEN`] bytes of the challenge are used.
pub fn challenge_response(
    challenge: &[u8],
    pin: &[u8],
    key: &[u8],
) -> Result<[u8; CHALLENGE_LEN], CryptoError> {
    if challenge.len() < CHALLENGE_LEN {
        return Err(CryptoError::ChallengeTooShort(challenge.len()));
    }
    if pin.len() != PIN_LEN || !pin.iter().all(u8::is_ascii_digit) {
        return Err(CryptoError::InvalidPin);
    }
    let cipher =
        Aes128::new_from_slice(key).map_err(|_| CryptoError::InvalidKeyLength(key.len()))?;

    let mut buf = [0u8; CHALLENGE_LEN];
    buf.copy_from_slice(&challenge[..CHALLENGE_LEN]);
    for (byte, digit) in buf.iter_mut().zip(pin) {
        *byte = byte.wrapping_add(digit - b'0');
    }

    let mut block = GenericArray::clone_from_slice(&buf);
    cipher.encrypt_block(&mut block);

    let mut response = [0u8; CHALLENGE_LEN];
    response.copy_from_slice(&block);
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hex(s: &str) -> Vec<u8> {
        data_encoding::HEXUPPER.decode(s.as_bytes()).unwrap()
    }

    #[test]
    fn known_vector() {
        let challenge = hex("FCE8C4904CF87611BE3A79B75CC24650");
        let key = hex("AA7E151628AED2A6ABF7158809CF4F3C");
        let response = challenge_response(&challenge, b"12345", &key).unwrap();
        assert_eq!(response.to_vec(), hex("1B440138FC47F84D7B24905988C652E9"));
    }

    #[test]
    fn trailing_challenge_bytes_are_ignored() {
        let mut challenge = hex("FCE8C4904CF87611BE3A79B75CC24650");
        let key = hex("AA7E151628AED2A6ABF7158809CF4F3C");
        let short = challenge_response(&challenge, b"12345", &key).unwrap();
        challenge.extend_from_slice(&[0xDE, 0xAD, 0xBE, 0xEF]);
        let long = challenge_response(&challenge, b"12345", &key).unwrap();
        assert_eq!(short, long);
    }

    #[test]
    fn pin_digits_wrap_around() {
        // 0xFF + 9 must wrap instead of overflowing
        let challenge = [0xFF; 16];
        let key = [0u8; 16];
        assert!(challenge_response(&challenge, b"99999", &key).is_ok());
    }

    #[test]
    fn is_deterministic() {
        let challenge = [0x42; 16];
        let key = [7u8; 16];
        assert_eq!(
            challenge_response(&challenge, b"54321", &key),
            challenge_response(&challenge, b"54321", &key)
        );
        assert_ne!(
            challenge_response(&challenge, b"54321", &key),
            challenge_response(&challenge, b"54320", &key)
        );
    }

    #[test]
    fn rejects_bad_input() {
        let key = [0u8; 16];
        assert_eq!(
            challenge_response(&[0; 15], b"12345", &key),
            Err(CryptoError::ChallengeTooShort(15))
        );
        assert_eq!(
            challenge_response(&[0; 16], b"1234", &key),
            Err(CryptoError::InvalidPin)
        );
        assert_eq!(
            challenge_response(&[0; 16], b"12a45", &key),
            Err(CryptoError::InvalidPin)
        );
        assert_eq!(
            challenge_response(&[0; 16], b"12345", &[0; 15]),
            Err(CryptoError::InvalidKeyLength(15))
        );
    }
}
