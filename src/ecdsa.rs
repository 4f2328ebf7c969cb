//! Native ECDSA over secp256k1: signature instances, the public inputs a
//! step circuit exposes for them, and a deterministic signer used to build
//! fixtures.

use ark_ec::{AffineRepr, CurveGroup};
use ark_ff::{BigInteger, Field, MontFp, One, PrimeField, UniformRand, Zero};
use digest::Digest;
use rand_core::{CryptoRng, RngCore};
use sha3::Keccak256;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::curves::{secp_coordinates, secp_scalar_to_scalar, Scalar, SecpAffine, SecpScalar};
use crate::error::{EcdsaFoldError, Result};

/// `(n + 1) / 2`, the inverse of two modulo the group order.
const TWO_INV: SecpScalar =
    MontFp!("57896044618658097711785492504343953926418782139537452191302581570759080747169");

/// Values a step binds per signature: `[Q.x, Q.y, r, r_alt, s̃, z̃, r̃]`.
pub const NUM_STATEMENT_VALUES: usize = 7;

/// One ECDSA verification statement.
///
/// Values are not range checked beyond what their types enforce; a zero `r`
/// or `s` simply never verifies.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SignatureInstance {
    /// Message digest as a big-endian integer.
    pub digest: [u8; 32],
    pub public_key: SecpAffine,
    pub r: SecpScalar,
    pub s: SecpScalar,
}

impl SignatureInstance {
    pub fn new(digest: [u8; 32], public_key: SecpAffine, r: SecpScalar, s: SecpScalar) -> Self {
        Self {
            digest,
            public_key,
            r,
            s,
        }
    }

    /// `z = digest mod n`.
    pub fn message_scalar(&self) -> SecpScalar {
        SecpScalar::from_be_bytes_mod_order(&self.digest)
    }

    /// The nonce point `R = s^{-1}(z·G + r·Q)`, if it exists.
    pub fn nonce_point(&self) -> Option<SecpAffine> {
        let s_inv = self.s.inverse()?;
        let z = self.message_scalar();
        let point = (SecpAffine::generator() * (z * s_inv) + self.public_key * (self.r * s_inv))
            .into_affine();
        if point.is_zero() {
            None
        } else {
            Some(point)
        }
    }

    /// Standard ECDSA verification.
    pub fn verify(&self) -> bool {
        if self.r.is_zero() || self.s.is_zero() || self.public_key.is_zero() {
            return false;
        }
        if !self.public_key.is_on_curve() {
            return false;
        }
        match self.nonce_point().and_then(|p| secp_coordinates(&p)) {
            Some((x, _)) => SecpScalar::from_le_bytes_mod_order(&x.into_bigint().to_bytes_le()) == self.r,
            None => false,
        }
    }

    /// The values the step circuit checks and chains for this statement.
    pub fn statement_values(&self) -> Result<Vec<Scalar>> {
        let (qx, qy) = secp_coordinates(&self.public_key).ok_or_else(|| {
            EcdsaFoldError::SerializationError("public key is the point at infinity".to_string())
        })?;
        let r = secp_scalar_to_scalar(&self.r);
        Ok(vec![
            qx,
            qy,
            r,
            r_alternative(&self.r),
            secp_scalar_to_scalar(&recode(&self.s)),
            secp_scalar_to_scalar(&recode(&self.message_scalar())),
            secp_scalar_to_scalar(&recode(&self.r)),
        ])
    }
}

/// `r + n` when it is still below the base-field modulus, otherwise `r`.
///
/// `x(R) mod n = r` holds exactly when `x(R)` is one of these two values.
pub fn r_alternative(r: &SecpScalar) -> Scalar {
    let mut sum = r.into_bigint();
    let carry = sum.add_with_carry(&SecpScalar::MODULUS);
    let lifted = if carry { None } else { Scalar::from_bigint(sum) };
    lifted.unwrap_or_else(|| secp_scalar_to_scalar(r))
}

/// `k̃ = (k + 2^256 - 1) / 2 mod n`, so that the bits `b_i` of `k̃` satisfy
/// `Σ (2b_i - 1)·2^i ≡ k (mod n)`.
pub fn recode(k: &SecpScalar) -> SecpScalar {
    let all_ones = SecpScalar::from(2u64).pow([256u64]) - SecpScalar::one();
    (*k + all_ones) * TWO_INV
}

/// Keccak-256 of a message, the digest convention of the sample batches.
pub fn hash_message(message: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(message);
    hasher.finalize().into()
}

/// A secp256k1 secret key with deterministic nonces.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SigningKey {
    secret: SecpScalar,
}

impl SigningKey {
    pub fn random<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        loop {
            let secret = SecpScalar::rand(rng);
            if !secret.is_zero() {
                return Self { secret };
            }
        }
    }

    pub fn from_bytes(bytes: &[u8; 32]) -> Result<Self> {
        let secret = SecpScalar::from_be_bytes_mod_order(bytes);
        if secret.is_zero() {
            return Err(EcdsaFoldError::InvalidParameters(
                "secret key reduces to zero".to_string(),
            ));
        }
        Ok(Self { secret })
    }

    pub fn public_key(&self) -> SecpAffine {
        (SecpAffine::generator() * self.secret).into_affine()
    }

    /// Signs a 32-byte digest with a nonce derived from the key and digest.
    pub fn sign_digest(&self, digest: &[u8; 32]) -> SignatureInstance {
        let z = SecpScalar::from_be_bytes_mod_order(digest);
        let mut counter: u32 = 0;
        loop {
            let k = self.nonce(digest, counter);
            counter += 1;
            let Some(k_inv) = k.inverse() else {
                continue;
            };
            let Some((x, _)) = secp_coordinates(&(SecpAffine::generator() * k).into_affine()) else {
                continue;
            };
            let r = SecpScalar::from_le_bytes_mod_order(&x.into_bigint().to_bytes_le());
            let s = k_inv * (z + r * self.secret);
            if r.is_zero() || s.is_zero() {
                continue;
            }
            return SignatureInstance::new(*digest, self.public_key(), r, s);
        }
    }

    pub fn sign_message(&self, message: &[u8]) -> SignatureInstance {
        self.sign_digest(&hash_message(message))
    }

    fn nonce(&self, digest: &[u8; 32], counter: u32) -> SecpScalar {
        let mut hasher = blake3::Hasher::new();
        hasher.update(b"ecdsa_fold/nonce");
        hasher.update(&self.secret.into_bigint().to_bytes_le());
        hasher.update(digest);
        hasher.update(&counter.to_le_bytes());
        let mut wide = [0u8; 64];
        hasher.finalize_xof().fill(&mut wide);
        let k = SecpScalar::from_le_bytes_mod_order(&wide);
        wide.zeroize();
        k
    }
}

impl std::fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningKey").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand_chacha::ChaCha20Rng;
    use rand_core::SeedableRng;

    #[test]
    fn test_sign_and_verify() {
        let mut rng = ChaCha20Rng::seed_from_u64(1);
        let key = SigningKey::random(&mut rng);
        let sig = key.sign_message(b"hello");
        assert!(sig.verify());
        assert_eq!(sig, key.sign_message(b"hello"));

        let mut tampered = sig.clone();
        tampered.s += SecpScalar::one();
        assert!(!tampered.verify());

        let mut other = sig;
        other.digest[0] ^= 1;
        assert!(!other.verify());
    }

    #[test]
    fn test_recoding_identity() {
        let k = SecpScalar::from(987654321u64);
        let recoded = recode(&k);
        let bits = recoded.into_bigint().to_bits_le();
        let mut acc = SecpScalar::zero();
        let mut power = SecpScalar::one();
        for bit in bits.iter().take(256) {
            if *bit {
                acc += power;
            } else {
                acc -= power;
            }
            power.double_in_place();
        }
        assert_eq!(acc, k);
        assert_eq!(TWO_INV.double(), SecpScalar::one());
    }

    #[test]
    fn test_r_alternative() {
        let small = SecpScalar::from(5u64);
        let lifted = r_alternative(&small);
        let n_plus_5 = Scalar::from_le_bytes_mod_order(&SecpScalar::MODULUS.to_bytes_le())
            + Scalar::from(5u64);
        assert_eq!(lifted, n_plus_5);

        // r close to n: r + n exceeds p, so no alternative exists.
        let large = -SecpScalar::one();
        assert_eq!(r_alternative(&large), secp_scalar_to_scalar(&large));
    }

    #[test]
    fn test_statement_values_layout() {
        let key = SigningKey::from_bytes(&[7u8; 32]).unwrap();
        let sig = key.sign_digest(&hash_message(b"layout"));
        let inputs = sig.statement_values().unwrap();
        assert_eq!(inputs.len(), NUM_STATEMENT_VALUES);
        let (qx, qy) = secp_coordinates(&key.public_key()).unwrap();
        assert_eq!(inputs[0], qx);
        assert_eq!(inputs[1], qy);
        assert_eq!(inputs[2], secp_scalar_to_scalar(&sig.r));
    }

    #[test]
    fn test_keccak_digest() {
        assert_eq!(
            hex::encode(hash_message(b"")),
            "c5d2460186f7233c927e7db2dcc703c0e500b653ca82273b7bfad8045d85a470"
        );
    }
}
