//! Pedersen vector commitments on either curve of the cycle.
//!
//! Commitments are unblinded. Every committed vector in this system is a
//! deterministic function of public signature data.
//!
//! Generators are derived by hashing `(domain, curve, seed, index)` to the
//! curve, so the setup is transparent: anyone holding the seed can re-derive
//! the key and nobody knows discrete-log relations between generators.

use ark_ec::{AffineRepr, CurveGroup, VariableBaseMSM};
use ark_ff::{One, Zero};
use rayon::prelude::*;

use crate::curves::{hash_to_curve, Affine, CycleCurve, Projective};
use crate::error::{EcdsaFoldError, Result};
use crate::poseidon::PoseidonRO;

const GENERATOR_DOMAIN: &[u8] = b"ecdsa_fold/pedersen/generators";
const INNER_PRODUCT_DOMAIN: &[u8] = b"ecdsa_fold/pedersen/inner-product";

/// Commitment key: vector generators plus the generator used to bind inner
/// products in opening proofs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommitmentKey<G: CycleCurve> {
    gens: Vec<Affine<G>>,
    h: Affine<G>,
}

impl<G: CycleCurve> CommitmentKey<G> {
    /// Derives `len` generators from the setup seed.
    pub fn setup(seed: &[u8; 32], len: usize) -> Self {
        let gen_domain = [GENERATOR_DOMAIN, G::NAME.as_bytes(), seed.as_slice()].concat();
        let gens = (0..len)
            .into_par_iter()
            .map(|i| hash_to_curve::<G::Config>(&gen_domain, i as u64))
            .collect();
        let ip_domain = [INNER_PRODUCT_DOMAIN, G::NAME.as_bytes(), seed.as_slice()].concat();
        let h = hash_to_curve::<G::Config>(&ip_domain, 0);
        Self { gens, h }
    }

    pub(crate) fn from_parts(gens: Vec<Affine<G>>, h: Affine<G>) -> Self {
        Self { gens, h }
    }

    pub fn len(&self) -> usize {
        self.gens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.gens.is_empty()
    }

    pub fn gens(&self) -> &[Affine<G>] {
        &self.gens
    }

    pub fn h(&self) -> &Affine<G> {
        &self.h
    }

    /// `sum_i values[i] * G_i`.
    pub fn commit(&self, values: &[G::Scalar]) -> Result<Commitment<G>> {
        if values.len() > self.gens.len() {
            return Err(EcdsaFoldError::MalformedState(format!(
                "vector of length {} exceeds {} commitment key of length {}",
                values.len(),
                G::NAME,
                self.gens.len()
            )));
        }
        if values.is_empty() {
            return Ok(Commitment::identity());
        }
        let point = Projective::<G>::msm_unchecked(&self.gens[..values.len()], values);
        Ok(Commitment {
            point: point.into_affine(),
        })
    }
}

/// A Pedersen commitment, kept in affine form for hashing and transport.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Commitment<G: CycleCurve> {
    point: Affine<G>,
}

impl<G: CycleCurve> Default for Commitment<G> {
    fn default() -> Self {
        Self::identity()
    }
}

impl<G: CycleCurve> Commitment<G> {
    pub fn identity() -> Self {
        Self {
            point: Affine::<G>::zero(),
        }
    }

    pub fn from_point(point: Affine<G>) -> Self {
        Self { point }
    }

    pub fn point(&self) -> &Affine<G> {
        &self.point
    }

    /// `(x, y, is_infinity)` with the identity as `(0, 0, 1)`.
    pub fn coordinates(&self) -> (G::Base, G::Base, G::Base) {
        match self.point.xy() {
            Some((x, y)) => (*x, *y, G::Base::zero()),
            None => (G::Base::zero(), G::Base::zero(), G::Base::one()),
        }
    }

    /// Absorbs the coordinates into a random oracle over the coordinate field.
    pub fn absorb_in_ro(&self, ro: &mut PoseidonRO<'_, G::Base>) {
        let (x, y, is_infinity) = self.coordinates();
        ro.absorb(x);
        ro.absorb(y);
        ro.absorb(is_infinity);
    }

    /// `self + r * other`, the homomorphic step used when folding.
    pub fn fold(&self, other: &Commitment<G>, r: &G::Scalar) -> Commitment<G> {
        let folded = other.point * *r + self.point;
        Commitment {
            point: folded.into_affine(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::curves::{Scalar, Secp, Secq};
    use ark_ff::{One, UniformRand, Zero};
    use rand_chacha::ChaCha20Rng;
    use rand_core::SeedableRng;

    #[test]
    fn test_commitment_is_homomorphic() {
        let mut rng = ChaCha20Rng::seed_from_u64(7);
        let ck = CommitmentKey::<Secq>::setup(&[1u8; 32], 16);

        let a: Vec<Scalar> = (0..16).map(|_| Scalar::rand(&mut rng)).collect();
        let b: Vec<Scalar> = (0..16).map(|_| Scalar::rand(&mut rng)).collect();
        let r = Scalar::rand(&mut rng);

        let folded_vec: Vec<Scalar> = a.iter().zip(b.iter()).map(|(x, y)| *x + r * y).collect();
        let ca = ck.commit(&a).unwrap();
        let cb = ck.commit(&b).unwrap();
        assert_eq!(ca.fold(&cb, &r), ck.commit(&folded_vec).unwrap());
    }

    #[test]
    fn test_setup_depends_on_seed_and_curve() {
        let ck1 = CommitmentKey::<Secq>::setup(&[1u8; 32], 4);
        let ck2 = CommitmentKey::<Secq>::setup(&[1u8; 32], 4);
        let ck3 = CommitmentKey::<Secq>::setup(&[2u8; 32], 4);
        assert_eq!(ck1, ck2);
        assert_ne!(ck1.gens(), ck3.gens());
        assert!(ck1.gens().iter().all(|g| g.is_on_curve()));
        assert!(!ck1.gens().contains(ck1.h()));

        let secp = CommitmentKey::<Secp>::setup(&[1u8; 32], 4);
        assert!(secp.gens().iter().all(|g| g.is_on_curve()));
    }

    #[test]
    fn test_commit_rejects_oversized_vectors() {
        let ck = CommitmentKey::<Secq>::setup(&[3u8; 32], 2);
        let too_long = vec![Scalar::from(1u64); 3];
        assert!(ck.commit(&too_long).is_err());
        assert_eq!(ck.commit(&[]).unwrap(), Commitment::identity());
        assert_eq!(ck.commit(&[Scalar::zero(); 2]).unwrap(), Commitment::identity());
    }

    #[test]
    fn test_identity_coordinates() {
        let (x, y, inf) = Commitment::<Secp>::identity().coordinates();
        assert!(x.is_zero() && y.is_zero());
        assert!(inf.is_one());
    }
}
