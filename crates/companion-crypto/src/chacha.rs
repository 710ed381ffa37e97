//! ChaCha20-Poly1305 AEAD for pairing sub-TLVs and the Companion channel.

use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Nonce,
};
use companion_core::error::CryptoError;
use zeroize::ZeroizeOnDrop;

/// Build a 12-byte nonce from an 8-byte ASCII label ("PS-Msg05" etc).
///
/// The label is right-justified: four leading zero bytes, then the label.
pub fn nonce_from_label(label: &[u8]) -> [u8; 12] {
    debug_assert_eq!(label.len(), 8);
    let mut nonce = [0u8; 12];
    nonce[12 - label.len()..].copy_from_slice(label);
    nonce
}

/// Build a 12-byte nonce from a frame counter.
///
/// The counter is the 96-bit little-endian value: 8 LE bytes followed by
/// four zero bytes.
pub fn nonce_from_counter(counter: u64) -> [u8; 12] {
    let mut nonce = [0u8; 12];
    nonce[..8].copy_from_slice(&counter.to_le_bytes());
    nonce
}

/// Seal plaintext; the 16-byte tag is appended to the ciphertext.
pub fn seal(key: &[u8; 32], nonce: &[u8; 12], plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let cipher = ChaCha20Poly1305::new(key.into());
    cipher
        .encrypt(Nonce::from_slice(nonce), plaintext)
        .map_err(|e| CryptoError::Encryption(e.to_string()))
}

/// Open ciphertext+tag; authentication failure is `CryptoError::Decryption`.
pub fn open(key: &[u8; 32], nonce: &[u8; 12], ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let cipher = ChaCha20Poly1305::new(key.into());
    cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| CryptoError::Decryption)
}

/// Bidirectional channel cipher installed after pair-verify.
///
/// Counters double as nonces and never decrement; the session must be torn
/// down before either direction reaches `u64::MAX`.
///
/// Ciphers for both directions are cached to avoid re-initialisation per
/// frame.
#[derive(ZeroizeOnDrop)]
pub struct ChannelCipher {
    send_key: [u8; 32],
    recv_key: [u8; 32],
    #[zeroize(skip)]
    send_cipher: ChaCha20Poly1305,
    #[zeroize(skip)]
    recv_cipher: ChaCha20Poly1305,
    #[zeroize(skip)]
    send_counter: u64,
    #[zeroize(skip)]
    recv_counter: u64,
}

impl ChannelCipher {
    /// Create with the two directional keys, counters at zero.
    pub fn new(send_key: [u8; 32], recv_key: [u8; 32]) -> Self {
        let send_cipher = ChaCha20Poly1305::new(&send_key.into());
        let recv_cipher = ChaCha20Poly1305::new(&recv_key.into());
        Self {
            send_key,
            recv_key,
            send_cipher,
            recv_cipher,
            send_counter: 0,
            recv_counter: 0,
        }
    }

    /// Seal an outbound payload with the current send counter, then advance it.
    pub fn seal(&mut self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if self.send_counter == u64::MAX {
            return Err(CryptoError::CounterExhausted);
        }
        let nonce = nonce_from_counter(self.send_counter);
        let sealed = self
            .send_cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext)
            .map_err(|e| CryptoError::Encryption(e.to_string()))?;
        self.send_counter += 1;
        Ok(sealed)
    }

    /// Open an inbound payload with the current recv counter, then advance it.
    ///
    /// The counter advances only on success; an authentication failure
    /// terminates the session, so the unchanged counter is never reused.
    pub fn open(&mut self, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if self.recv_counter == u64::MAX {
            return Err(CryptoError::CounterExhausted);
        }
        let nonce = nonce_from_counter(self.recv_counter);
        let opened = self
            .recv_cipher
            .decrypt(Nonce::from_slice(&nonce), ciphertext)
            .map_err(|_| CryptoError::Decryption)?;
        self.recv_counter += 1;
        Ok(opened)
    }

    pub fn send_counter(&self) -> u64 {
        self.send_counter
    }

    pub fn recv_counter(&self) -> u64 {
        self.recv_counter
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY_A: [u8; 32] = [0x11; 32];
    const KEY_B: [u8; 32] = [0x22; 32];

    mod nonces {
        use super::*;

        #[test]
        fn label_nonce_is_left_zero_padded() {
            let nonce = nonce_from_label(b"PS-Msg05");
            assert_eq!(&nonce[..4], &[0, 0, 0, 0]);
            assert_eq!(&nonce[4..], b"PS-Msg05");
        }

        #[test]
        fn counter_nonce_is_little_endian() {
            let nonce = nonce_from_counter(0x0102_0304_0506_0708);
            assert_eq!(
                nonce,
                [0x08, 0x07, 0x06, 0x05, 0x04, 0x03, 0x02, 0x01, 0, 0, 0, 0]
            );
        }

        #[test]
        fn counter_zero_is_all_zero() {
            assert_eq!(nonce_from_counter(0), [0u8; 12]);
        }
    }

    mod seal_open {
        use super::*;

        #[test]
        fn roundtrip_with_label_nonce() {
            let nonce = nonce_from_label(b"PV-Msg02");
            let sealed = seal(&KEY_A, &nonce, b"inner tlv").unwrap();
            assert_eq!(sealed.len(), 9 + 16);
            assert_eq!(open(&KEY_A, &nonce, &sealed).unwrap(), b"inner tlv");
        }

        #[test]
        fn wrong_key_fails_to_open() {
            let nonce = nonce_from_label(b"PS-Msg05");
            let sealed = seal(&KEY_A, &nonce, b"secret").unwrap();
            assert!(matches!(
                open(&KEY_B, &nonce, &sealed),
                Err(CryptoError::Decryption)
            ));
        }

        #[test]
        fn wrong_nonce_fails_to_open() {
            let sealed = seal(&KEY_A, &nonce_from_label(b"PS-Msg05"), b"secret").unwrap();
            assert!(open(&KEY_A, &nonce_from_label(b"PS-Msg06"), &sealed).is_err());
        }

        #[test]
        fn tampered_ciphertext_fails_to_open() {
            let nonce = nonce_from_label(b"PS-Msg06");
            let mut sealed = seal(&KEY_A, &nonce, b"secret").unwrap();
            sealed[0] ^= 0x01;
            assert!(open(&KEY_A, &nonce, &sealed).is_err());
        }
    }

    mod channel {
        use super::*;

        #[test]
        fn counters_form_strictly_increasing_sequence() {
            let mut cipher = ChannelCipher::new(KEY_A, KEY_B);
            for expected in 0..16u64 {
                assert_eq!(cipher.send_counter(), expected);
                cipher.seal(b"frame").unwrap();
            }
            assert_eq!(cipher.send_counter(), 16);
        }

        #[test]
        fn paired_ciphers_exchange_frames() {
            let mut sender = ChannelCipher::new(KEY_A, KEY_B);
            let mut receiver = ChannelCipher::new(KEY_B, KEY_A);

            for i in 0..10 {
                let msg = format!("message {}", i);
                let sealed = sender.seal(msg.as_bytes()).unwrap();
                assert_eq!(receiver.open(&sealed).unwrap(), msg.as_bytes());
            }
        }

        #[test]
        fn replayed_ciphertext_fails_at_later_counter() {
            let mut sender = ChannelCipher::new(KEY_A, KEY_B);
            let mut receiver = ChannelCipher::new(KEY_B, KEY_A);

            let first = sender.seal(b"first").unwrap();
            receiver.open(&first).unwrap();

            let second = sender.seal(b"second").unwrap();
            receiver.open(&second).unwrap();

            // Replaying the first frame now decrypts under counter 2 and must fail.
            assert!(matches!(
                receiver.open(&first),
                Err(CryptoError::Decryption)
            ));
        }

        #[test]
        fn recv_counter_does_not_advance_on_failure() {
            let mut sender = ChannelCipher::new(KEY_A, KEY_B);
            let mut receiver = ChannelCipher::new(KEY_B, KEY_A);

            let sealed = sender.seal(b"payload").unwrap();
            let mut tampered = sealed.clone();
            tampered[0] ^= 0xFF;

            assert!(receiver.open(&tampered).is_err());
            assert_eq!(receiver.recv_counter(), 0);
        }
    }
}
