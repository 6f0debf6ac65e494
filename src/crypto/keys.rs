//! Ephemeral X25519 key agreement.
//!
//! Each connection generates a fresh keypair at construction; public keys
//! are exchanged in the clear (one 32-byte datagram per direction) and the
//! shared secret is expanded into two directional session keys. The
//! derivation is cross-matched: the initiator's transmit key is the
//! responder's receive key and vice versa.

use hkdf::Hkdf;
use rand::rngs::OsRng;
use sha2::Sha256;
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::Zeroize;

use crate::core::{CryptoError, PUBLIC_KEY_LEN, SESSION_KEY_LEN};

/// HKDF info label for session key derivation.
const KDF_LABEL: &[u8] = b"squall v1 session keys";

/// Which side of the handshake this endpoint is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// The connecting side (client); sends its public key first.
    Initiator,
    /// The accepting side (server); responds to first contact.
    Responder,
}

/// A 32-byte directional session key, zeroized on drop.
#[derive(Clone)]
pub struct SessionKey([u8; SESSION_KEY_LEN]);

impl SessionKey {
    /// Wrap raw key material.
    pub fn from_bytes(bytes: [u8; SESSION_KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// Raw key bytes. Handle with care.
    pub fn as_bytes(&self) -> &[u8; SESSION_KEY_LEN] {
        &self.0
    }
}

impl Drop for SessionKey {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

impl std::fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SessionKey(..)")
    }
}

/// The pair of directional keys a connection encrypts and decrypts with.
#[derive(Debug)]
pub struct DirectionalKeys {
    /// Decrypts inbound traffic.
    pub rx: SessionKey,
    /// Encrypts outbound traffic.
    pub tx: SessionKey,
}

/// A per-session ephemeral X25519 keypair.
///
/// The private half never leaves this struct and is zeroized when the
/// connection goes away.
pub struct EphemeralKeypair {
    secret: StaticSecret,
    public: PublicKey,
}

impl EphemeralKeypair {
    /// Generate a fresh keypair from the OS RNG.
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = PublicKey::from(&secret);
        Self { secret, public }
    }

    /// The public key to hand to the peer, as wire bytes.
    pub fn public_bytes(&self) -> [u8; PUBLIC_KEY_LEN] {
        *self.public.as_bytes()
    }

    /// Combine with the peer's public key and derive the directional keys
    /// for `role`.
    ///
    /// Fails with [`CryptoError::KeyAgreementFailed`] when the DH output is
    /// degenerate (a low-order peer key) or the KDF refuses the material;
    /// the caller must tear the connection down.
    pub fn derive_session_keys(
        &self,
        peer_public: &[u8; PUBLIC_KEY_LEN],
        role: Role,
    ) -> Result<DirectionalKeys, CryptoError> {
        let shared = self
            .secret
            .diffie_hellman(&PublicKey::from(*peer_public));
        if !shared.was_contributory() {
            return Err(CryptoError::KeyAgreementFailed);
        }

        let hk = Hkdf::<Sha256>::new(None, shared.as_bytes());
        let mut okm = [0u8; SESSION_KEY_LEN * 2];
        hk.expand(KDF_LABEL, &mut okm)
            .map_err(|_| CryptoError::KeyAgreementFailed)?;

        let mut initiator_to_responder = [0u8; SESSION_KEY_LEN];
        let mut responder_to_initiator = [0u8; SESSION_KEY_LEN];
        initiator_to_responder.copy_from_slice(&okm[..SESSION_KEY_LEN]);
        responder_to_initiator.copy_from_slice(&okm[SESSION_KEY_LEN..]);
        okm.zeroize();

        let (tx, rx) = match role {
            Role::Initiator => (initiator_to_responder, responder_to_initiator),
            Role::Responder => (responder_to_initiator, initiator_to_responder),
        };

        Ok(DirectionalKeys {
            rx: SessionKey::from_bytes(rx),
            tx: SessionKey::from_bytes(tx),
        })
    }
}

impl std::fmt::Debug for EphemeralKeypair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EphemeralKeypair")
            .field("public", &self.public)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keypairs_are_unique() {
        let a = EphemeralKeypair::generate();
        let b = EphemeralKeypair::generate();
        assert_ne!(a.public_bytes(), b.public_bytes());
    }

    #[test]
    fn derivation_is_cross_matched() {
        let client = EphemeralKeypair::generate();
        let server = EphemeralKeypair::generate();

        let client_keys = client
            .derive_session_keys(&server.public_bytes(), Role::Initiator)
            .unwrap();
        let server_keys = server
            .derive_session_keys(&client.public_bytes(), Role::Responder)
            .unwrap();

        assert_eq!(client_keys.tx.as_bytes(), server_keys.rx.as_bytes());
        assert_eq!(client_keys.rx.as_bytes(), server_keys.tx.as_bytes());
        assert_ne!(client_keys.tx.as_bytes(), client_keys.rx.as_bytes());
    }

    #[test]
    fn different_peers_get_different_keys() {
        let server = EphemeralKeypair::generate();
        let a = EphemeralKeypair::generate();
        let b = EphemeralKeypair::generate();

        let ka = server
            .derive_session_keys(&a.public_bytes(), Role::Responder)
            .unwrap();
        let kb = server
            .derive_session_keys(&b.public_bytes(), Role::Responder)
            .unwrap();
        assert_ne!(ka.tx.as_bytes(), kb.tx.as_bytes());
    }

    #[test]
    fn degenerate_peer_key_rejected() {
        let kp = EphemeralKeypair::generate();
        let zero = [0u8; PUBLIC_KEY_LEN];
        assert!(matches!(
            kp.derive_session_keys(&zero, Role::Initiator),
            Err(CryptoError::KeyAgreementFailed)
        ));
    }
}
