//! Authenticated encryption for post-handshake datagrams.
//!
//! Every datagram after the key exchange is a single ChaCha20-Poly1305
//! message. The sender keeps a 64-bit counter (starting at 1, never reused,
//! never reset — retransmissions get fresh nonces) that is expanded into the
//! low-order bytes of the 12-byte AEAD nonce. The nonce is not transmitted:
//! the receiver keeps a watermark of the last accepted nonce and tries a
//! small window of candidates ahead of it, which tolerates limited
//! reordering without opening a replay window. Datagrams whose nonce fell
//! behind the watermark are dropped here and recovered by the reliability
//! layer above.

use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Nonce};

use crate::core::{CryptoError, AEAD_NONCE_LEN, AEAD_TAG_LEN};

use super::keys::DirectionalKeys;

/// AEAD channel state for one connection.
pub struct SecureChannel {
    tx_cipher: ChaCha20Poly1305,
    rx_cipher: ChaCha20Poly1305,
    /// Next transmit nonce. Strictly increasing within the session.
    tx_nonce: u64,
    /// Highest receive nonce that authenticated successfully.
    last_rx_nonce: u64,
    /// Candidates tried ahead of the watermark on receive.
    search_window: u64,
}

impl SecureChannel {
    /// Build a channel from freshly derived directional keys.
    pub fn new(keys: &DirectionalKeys, search_window: u64) -> Self {
        Self {
            tx_cipher: ChaCha20Poly1305::new(keys.tx.as_bytes().into()),
            rx_cipher: ChaCha20Poly1305::new(keys.rx.as_bytes().into()),
            tx_nonce: 1,
            last_rx_nonce: 0,
            search_window: search_window.max(1),
        }
    }

    /// Expand a 64-bit counter into the AEAD nonce: the counter occupies the
    /// low-order 8 bytes big-endian, the leading 4 bytes are zero.
    fn expand_nonce(nonce: u64) -> Nonce {
        let mut buf = [0u8; AEAD_NONCE_LEN];
        buf[AEAD_NONCE_LEN - 8..].copy_from_slice(&nonce.to_be_bytes());
        Nonce::from(buf)
    }

    /// Encrypt one datagram with the next transmit nonce.
    ///
    /// The counter advances only after a successful encryption, so a failed
    /// call does not burn a nonce.
    pub fn encrypt(&mut self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if self.tx_nonce == u64::MAX {
            return Err(CryptoError::EncryptFailed);
        }

        let ciphertext = self
            .tx_cipher
            .encrypt(&Self::expand_nonce(self.tx_nonce), plaintext)
            .map_err(|_| CryptoError::EncryptFailed)?;

        self.tx_nonce += 1;
        Ok(ciphertext)
    }

    /// Decrypt one datagram, searching forward from the receive watermark.
    ///
    /// The first candidate nonce that authenticates wins and the watermark
    /// advances to it; nonces skipped over are gone for good. Failing every
    /// candidate leaves the watermark untouched.
    pub fn decrypt(&mut self, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if ciphertext.len() < AEAD_TAG_LEN {
            return Err(CryptoError::DecryptFailed);
        }

        let first = self.last_rx_nonce.saturating_add(1);
        let last = self.last_rx_nonce.saturating_add(self.search_window);
        for candidate in first..=last {
            if let Ok(plaintext) = self
                .rx_cipher
                .decrypt(&Self::expand_nonce(candidate), ciphertext)
            {
                self.last_rx_nonce = candidate;
                return Ok(plaintext);
            }
        }

        Err(CryptoError::DecryptFailed)
    }

    /// The nonce the next [`encrypt`](Self::encrypt) will use.
    pub fn next_tx_nonce(&self) -> u64 {
        self.tx_nonce
    }

    /// The receive watermark.
    pub fn last_rx_nonce(&self) -> u64 {
        self.last_rx_nonce
    }
}

impl std::fmt::Debug for SecureChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecureChannel")
            .field("tx_nonce", &self.tx_nonce)
            .field("last_rx_nonce", &self.last_rx_nonce)
            .field("search_window", &self.search_window)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::DEFAULT_NONCE_SEARCH_WINDOW;
    use crate::crypto::keys::{EphemeralKeypair, Role};

    fn channel_pair() -> (SecureChannel, SecureChannel) {
        let client = EphemeralKeypair::generate();
        let server = EphemeralKeypair::generate();
        let ck = client
            .derive_session_keys(&server.public_bytes(), Role::Initiator)
            .unwrap();
        let sk = server
            .derive_session_keys(&client.public_bytes(), Role::Responder)
            .unwrap();
        (
            SecureChannel::new(&ck, DEFAULT_NONCE_SEARCH_WINDOW),
            SecureChannel::new(&sk, DEFAULT_NONCE_SEARCH_WINDOW),
        )
    }

    #[test]
    fn round_trip() {
        let (mut client, mut server) = channel_pair();

        let wire = client.encrypt(b"over the wire").unwrap();
        assert_eq!(server.decrypt(&wire).unwrap(), b"over the wire");

        let reply = server.encrypt(b"and back").unwrap();
        assert_eq!(client.decrypt(&reply).unwrap(), b"and back");
    }

    #[test]
    fn tx_nonce_is_strictly_increasing() {
        let (mut client, _) = channel_pair();
        assert_eq!(client.next_tx_nonce(), 1);
        client.encrypt(b"a").unwrap();
        client.encrypt(b"b").unwrap();
        assert_eq!(client.next_tx_nonce(), 3);
    }

    #[test]
    fn replay_is_rejected() {
        let (mut client, mut server) = channel_pair();
        let wire = client.encrypt(b"once").unwrap();

        assert!(server.decrypt(&wire).is_ok());
        assert!(matches!(
            server.decrypt(&wire),
            Err(CryptoError::DecryptFailed)
        ));
    }

    #[test]
    fn reorder_within_window_drops_the_late_datagram() {
        let (mut client, mut server) = channel_pair();
        let first = client.encrypt(b"nonce 1").unwrap();
        let second = client.encrypt(b"nonce 2").unwrap();
        let third = client.encrypt(b"nonce 3").unwrap();

        // Arrival order 2, 1, 3: accepting 2 advances the watermark past 1.
        assert_eq!(server.decrypt(&second).unwrap(), b"nonce 2");
        assert!(server.decrypt(&first).is_err());
        assert_eq!(server.decrypt(&third).unwrap(), b"nonce 3");
        assert_eq!(server.last_rx_nonce(), 3);
    }

    #[test]
    fn gap_within_window_is_tolerated() {
        let (mut client, mut server) = channel_pair();
        for _ in 0..4 {
            client.encrypt(b"lost").unwrap();
        }
        let wire = client.encrypt(b"arrives").unwrap(); // nonce 5, watermark 0
        assert_eq!(server.decrypt(&wire).unwrap(), b"arrives");
        assert_eq!(server.last_rx_nonce(), 5);
    }

    #[test]
    fn gap_beyond_window_is_dropped() {
        let (mut client, mut server) = channel_pair();
        for _ in 0..5 {
            client.encrypt(b"lost").unwrap();
        }
        let wire = client.encrypt(b"too far").unwrap(); // nonce 6 > window of 5
        assert!(server.decrypt(&wire).is_err());
        assert_eq!(server.last_rx_nonce(), 0);
    }

    #[test]
    fn tampered_ciphertext_is_rejected() {
        let (mut client, mut server) = channel_pair();
        let mut wire = client.encrypt(b"integrity").unwrap();
        wire[0] ^= 0x80;
        assert!(server.decrypt(&wire).is_err());
    }

    #[test]
    fn runt_datagram_is_rejected() {
        let (_, mut server) = channel_pair();
        assert!(server.decrypt(&[0u8; 8]).is_err());
    }
}
