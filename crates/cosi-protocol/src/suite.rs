//! Algebraic suite: Ristretto points and scalars from `curve25519-dalek`.
//!
//! Everything the engine needs from the group lives here: key pairs,
//! nil-safe point accumulation, the Fiat-Shamir challenge and the
//! per-round nonce stream.
use std::fmt;

use curve25519_dalek::ristretto::RistrettoPoint;
use curve25519_dalek::scalar::Scalar;
use curve25519_dalek::traits::Identity;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256, Sha512};

use crate::merkle::HashId;
use crate::types::{NodeName, RoundNumber};

/// Group element.
pub type Point = RistrettoPoint;
/// Group scalar.
pub type Secret = Scalar;

const KEY_DOMAIN: &[u8] = b"cosi/keypair/v1";
const CHALLENGE_DOMAIN: &[u8] = b"cosi/challenge/v1";
const NONCE_DOMAIN: &[u8] = b"cosi/nonce/v1";

/// Hash `parts` with SHA-512 and reduce the 64-byte digest to a scalar.
fn hash_to_scalar(parts: &[&[u8]]) -> Scalar {
    let mut hasher = Sha512::new();
    for part in parts {
        hasher.update(part);
    }
    let digest = hasher.finalize();
    let mut wide = [0u8; 64];
    wide.copy_from_slice(&digest);
    Scalar::from_bytes_mod_order_wide(&wide)
}

/// `g^s` for the suite's base point.
pub fn base_mul(s: &Secret) -> Point {
    RistrettoPoint::mul_base(s)
}

// ── Keys ────────────────────────────────────────────────────────────

/// A node's public key `X = g^x`.
#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicKey(Point);

impl PublicKey {
    pub fn from_point(point: Point) -> Self {
        Self(point)
    }

    pub fn point(&self) -> Point {
        self.0
    }

    /// Compressed 32-byte encoding.
    pub fn to_bytes(&self) -> [u8; 32] {
        self.0.compress().to_bytes()
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({self})")
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in &self.to_bytes()[..6] {
            write!(f, "{b:02x}")?;
        }
        Ok(())
    }
}

/// Secret scalar plus its public key.
#[derive(Clone)]
pub struct Keypair {
    secret: Secret,
    public: PublicKey,
}

impl Keypair {
    /// Fresh key pair from the thread RNG.
    pub fn generate() -> Self {
        let mut seed = [0u8; 64];
        rand::rng().fill_bytes(&mut seed);
        Self::from_secret(hash_to_scalar(&[KEY_DOMAIN, &seed]))
    }

    /// Deterministic key pair derived from `seed` (simulations, tests).
    pub fn from_seed(seed: &[u8]) -> Self {
        Self::from_secret(hash_to_scalar(&[KEY_DOMAIN, seed]))
    }

    fn from_secret(secret: Secret) -> Self {
        let public = PublicKey(base_mul(&secret));
        Self { secret, public }
    }

    pub fn public(&self) -> PublicKey {
        self.public
    }

    pub(crate) fn secret(&self) -> &Secret {
        &self.secret
    }
}

impl fmt::Debug for Keypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Keypair")
            .field("public", &self.public)
            .finish_non_exhaustive()
    }
}

// ── Accumulation ────────────────────────────────────────────────────

/// Running sum of points where "nothing folded yet" reads as the identity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Accumulator(Option<Point>);

impl Accumulator {
    pub fn new() -> Self {
        Self(None)
    }

    pub fn add(&mut self, point: &Point) {
        self.0 = Some(self.value() + point);
    }

    pub fn sub(&mut self, point: &Point) {
        self.0 = Some(self.value() - point);
    }

    /// Current sum, or the group identity if nothing was folded.
    pub fn value(&self) -> Point {
        self.0.unwrap_or_else(RistrettoPoint::identity)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_none()
    }
}

impl From<Point> for Accumulator {
    fn from(point: Point) -> Self {
        Self(Some(point))
    }
}

// ── Fiat-Shamir ─────────────────────────────────────────────────────

/// `c = H(merkle_root ‖ point)` reduced to a scalar.
pub fn challenge_scalar(merkle_root: &HashId, point: &Point) -> Secret {
    let compressed = point.compress();
    hash_to_scalar(&[CHALLENGE_DOMAIN, merkle_root, compressed.as_bytes()])
}

// ── Nonces ──────────────────────────────────────────────────────────

/// Hash-seeded stream of per-round commitment secrets.
///
/// Keyed by node name and secret key. A draw mixes a running counter and
/// the round number, so two draws never repeat even for the same round.
pub struct NonceStream {
    seed: [u8; 32],
    counter: u64,
}

impl NonceStream {
    /// Stream salted with fresh randomness; a restarted node never replays
    /// nonces from a previous run.
    pub fn new(name: &NodeName, keypair: &Keypair) -> Self {
        let mut salt = [0u8; 32];
        rand::rng().fill_bytes(&mut salt);
        Self::seeded(name, keypair, &salt)
    }

    /// Fully deterministic stream (reproducible runs).
    pub fn deterministic(name: &NodeName, keypair: &Keypair) -> Self {
        Self::seeded(name, keypair, &[])
    }

    fn seeded(name: &NodeName, keypair: &Keypair, salt: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(NONCE_DOMAIN);
        hasher.update(name.as_bytes());
        hasher.update(keypair.secret().as_bytes());
        hasher.update(salt);
        Self {
            seed: hasher.finalize().into(),
            counter: 0,
        }
    }

    /// Next commitment secret `v` for `round`.
    pub fn next(&mut self, round: RoundNumber) -> Secret {
        self.counter += 1;
        hash_to_scalar(&[
            NONCE_DOMAIN,
            &self.seed,
            &self.counter.to_le_bytes(),
            &round.to_le_bytes(),
        ])
    }
}
