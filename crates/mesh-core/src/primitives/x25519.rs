//! X25519 Diffie-Hellman (RFC 7748).
//!
//! Two keypair flavors: [`StaticKeypair`] for a node's long-lived identity,
//! and [`EphemeralKeypair`] for a single handshake. Both zeroize their
//! private scalar on drop; only `EphemeralKeypair` additionally consumes
//! itself on use, since an ephemeral secret must never be reused.

use rand::rngs::OsRng;
use x25519_dalek::{EphemeralSecret, PublicKey, StaticSecret};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

/// A node's long-lived identity keypair.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct StaticKeypair {
    private: Zeroizing<[u8; 32]>,
    #[zeroize(skip)]
    pub public: [u8; 32],
}

impl StaticKeypair {
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = PublicKey::from(&secret);
        Self {
            private: Zeroizing::new(secret.to_bytes()),
            public: *public.as_bytes(),
        }
    }

    pub fn from_private(private_bytes: [u8; 32]) -> Self {
        let secret = StaticSecret::from(private_bytes);
        let public = PublicKey::from(&secret);
        Self {
            private: Zeroizing::new(private_bytes),
            public: *public.as_bytes(),
        }
    }

    pub fn private_bytes(&self) -> Zeroizing<[u8; 32]> {
        Zeroizing::new(*self.private)
    }

    pub fn diffie_hellman(&self, remote_public: &[u8; 32]) -> [u8; 32] {
        let secret = StaticSecret::from(*self.private);
        secret
            .diffie_hellman(&PublicKey::from(*remote_public))
            .to_bytes()
    }
}

/// A keypair generated solely for one handshake. The secret is consumed by
/// [`EphemeralKeypair::diffie_hellman`] — there is no way to compute the DH
/// twice from the same instance.
pub struct EphemeralKeypair {
    secret: EphemeralSecret,
    pub public: [u8; 32],
}

impl EphemeralKeypair {
    pub fn generate() -> Self {
        let secret = EphemeralSecret::random_from_rng(OsRng);
        let public = PublicKey::from(&secret);
        Self {
            secret,
            public: *public.as_bytes(),
        }
    }

    pub fn diffie_hellman(self, remote_public: &[u8; 32]) -> [u8; 32] {
        self.secret
            .diffie_hellman(&PublicKey::from(*remote_public))
            .to_bytes()
    }
}

/// One-shot DH between a raw private scalar and a remote public key, used by
/// the handshake where keys cross actor boundaries as plain bytes.
pub fn diffie_hellman(local_private: &[u8; 32], remote_public: &[u8; 32]) -> [u8; 32] {
    let secret = StaticSecret::from(*local_private);
    secret
        .diffie_hellman(&PublicKey::from(*remote_public))
        .to_bytes()
}
