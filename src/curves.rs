//! Curve and field choices for the ECDSA folding circuits.
//!
//! Signatures live on secp256k1. The primary constraint system is defined
//! over the secp256k1 *base* field `Fp`, so the point arithmetic of signature
//! verification is native inside it. Its witnesses are committed on
//! secq256k1, the curve over `Fn` whose group order is `p`.
//!
//! The two curves form a cycle: the secondary constraint system lives over
//! `Fn` and commits on secp256k1. Each side's circuit can therefore add the
//! other side's commitments with native field operations, which is what the
//! recursive folding verifier needs.

use std::fmt::Debug;

use ark_ec::models::CurveConfig;
use ark_ec::short_weierstrass::{self, SWCurveConfig};
use ark_ec::AffineRepr;
use ark_ff::{BigInteger, Field, MontFp, PrimeField, Zero};
use num_bigint::BigUint;

/// Field of the primary constraint system, `Fp`.
pub type Scalar = ark_secp256k1::Fq;

/// Integers modulo the secp256k1 group order `n`; field of the secondary
/// constraint system.
pub type SecpScalar = ark_secp256k1::Fr;

pub type SecpAffine = ark_secp256k1::Affine;
pub type SecpProjective = ark_secp256k1::Projective;

/// secq256k1: `y^2 = x^3 + 7` over `F_n`, prime order `p`.
#[derive(Copy, Clone, Default, PartialEq, Eq)]
pub struct SecqConfig;

const SECQ_GENERATOR_X: ark_secp256k1::Fr = MontFp!("1");
const SECQ_GENERATOR_Y: ark_secp256k1::Fr =
    MontFp!("5647885500061325675748484062311156374277086380342947163834798608016077912256");

impl CurveConfig for SecqConfig {
    type BaseField = ark_secp256k1::Fr;
    type ScalarField = ark_secp256k1::Fq;

    const COFACTOR: &'static [u64] = &[0x1];
    const COFACTOR_INV: Self::ScalarField = MontFp!("1");
}

impl SWCurveConfig for SecqConfig {
    const COEFF_A: Self::BaseField = MontFp!("0");
    const COEFF_B: Self::BaseField = MontFp!("7");
    const GENERATOR: short_weierstrass::Affine<Self> =
        short_weierstrass::Affine::<Self>::new_unchecked(SECQ_GENERATOR_X, SECQ_GENERATOR_Y);

    #[inline(always)]
    fn mul_by_a(_: Self::BaseField) -> Self::BaseField {
        Self::BaseField::zero()
    }
}

/// A commitment curve of the cycle.
///
/// Both members are `y^2 = x^3 + 7` with prime order, so in-circuit point
/// formulas are shared between them.
pub trait CycleCurve:
    Copy + Clone + Debug + Default + PartialEq + Eq + Send + Sync + 'static
{
    /// Coordinate field; the field of the circuit that folds this curve's
    /// instances.
    type Base: PrimeField;
    /// Group order; the field of the circuit whose witnesses this curve commits.
    type Scalar: PrimeField;
    type Config: SWCurveConfig<BaseField = Self::Base, ScalarField = Self::Scalar>;

    const NAME: &'static str;
}

/// Commits primary witnesses.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Secq;

/// Commits secondary witnesses.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Secp;

impl CycleCurve for Secq {
    type Base = SecpScalar;
    type Scalar = Scalar;
    type Config = SecqConfig;

    const NAME: &'static str = "secq256k1";
}

impl CycleCurve for Secp {
    type Base = Scalar;
    type Scalar = SecpScalar;
    type Config = ark_secp256k1::Config;

    const NAME: &'static str = "secp256k1";
}

pub type Affine<G> = short_weierstrass::Affine<<G as CycleCurve>::Config>;
pub type Projective<G> = short_weierstrass::Projective<<G as CycleCurve>::Config>;

/// Maps a secp256k1 scalar (`< n`) into `Fp`. Exact because `n < p`.
pub fn secp_scalar_to_scalar(k: &SecpScalar) -> Scalar {
    Scalar::from_le_bytes_mod_order(&k.into_bigint().to_bytes_le())
}

/// Affine coordinates of a secp256k1 point, `None` for the point at infinity.
pub fn secp_coordinates(point: &SecpAffine) -> Option<(Scalar, Scalar)> {
    point.xy().map(|(x, y)| (*x, *y))
}

/// Little-endian canonical bytes of a field element.
pub fn field_to_bytes<F: PrimeField>(value: &F) -> Vec<u8> {
    value.into_bigint().to_bytes_le()
}

pub fn to_biguint<F: PrimeField>(value: &F) -> BigUint {
    (*value).into()
}

/// Moves an integer into another prime field, `None` unless it is below the
/// target modulus.
pub fn convert_field<A: PrimeField, B: PrimeField>(value: &A) -> Option<B> {
    let integer = to_biguint(value);
    let modulus: BigUint = B::MODULUS.into();
    if integer < modulus {
        Some(B::from(integer))
    } else {
        None
    }
}

/// Moves an integer into another prime field, reducing it.
pub fn convert_field_mod<A: PrimeField, B: PrimeField>(value: &A) -> B {
    B::from(to_biguint(value))
}

/// Try-and-increment hash to a short Weierstrass curve with cofactor one.
///
/// The discrete logarithm of the output with respect to any other output is
/// unknown, which is what both the Pedersen generators and the circuit's
/// offset points rely on.
pub fn hash_to_curve<P>(domain: &[u8], index: u64) -> short_weierstrass::Affine<P>
where
    P: SWCurveConfig,
    P::BaseField: PrimeField,
{
    let mut counter: u32 = 0;
    loop {
        let mut hasher = blake3::Hasher::new();
        hasher.update(domain);
        hasher.update(&index.to_le_bytes());
        hasher.update(&counter.to_le_bytes());
        let mut wide = [0u8; 64];
        hasher.finalize_xof().fill(&mut wide);

        let x = P::BaseField::from_le_bytes_mod_order(&wide[..48]);
        let rhs = x * x * x + P::mul_by_a(x) + P::COEFF_B;
        if let Some(y) = rhs.sqrt() {
            if !y.is_zero() {
                let y = if wide[63] & 1 == 1 { -y } else { y };
                return short_weierstrass::Affine::<P>::new_unchecked(x, y);
            }
        }
        counter += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ark_ec::{CurveGroup, Group};
    use ark_ff::One;

    #[test]
    fn test_secq_generator_is_on_curve() {
        let g = Affine::<Secq>::generator();
        assert!(g.is_on_curve());
        assert!(g.is_in_correct_subgroup_assuming_on_curve());
    }

    #[test]
    fn test_secq_scalar_field_is_secp_base_field() {
        // [p]G = O on secq256k1 while [p - 1]G != O.
        let g = Projective::<Secq>::generator();
        let minus_one = -Scalar::one();
        let almost = g * minus_one;
        assert_eq!((almost + g).into_affine(), Affine::<Secq>::zero());
        assert!(!almost.into_affine().is_zero());
    }

    #[test]
    fn test_hash_to_curve_is_deterministic_and_domain_separated() {
        let a: Affine<Secq> = hash_to_curve(b"domain-a", 0);
        let b: Affine<Secq> = hash_to_curve(b"domain-a", 0);
        let c: Affine<Secq> = hash_to_curve(b"domain-b", 0);
        let d: Affine<Secq> = hash_to_curve(b"domain-a", 1);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, d);
        assert!(a.is_on_curve());

        let h: SecpAffine = hash_to_curve(b"offset", 7);
        assert!(h.is_on_curve());
    }

    #[test]
    fn test_field_conversions() {
        let k = SecpScalar::from(123456789u64);
        assert_eq!(secp_scalar_to_scalar(&k), Scalar::from(123456789u64));
        assert!(secp_coordinates(&SecpAffine::zero()).is_none());

        assert_eq!(
            convert_field::<Scalar, SecpScalar>(&Scalar::from(77u64)),
            Some(SecpScalar::from(77u64))
        );
        // p - 1 exceeds n.
        assert!(convert_field::<Scalar, SecpScalar>(&-Scalar::one()).is_none());
        assert_eq!(
            convert_field::<SecpScalar, Scalar>(&-SecpScalar::one()),
            Some(secp_scalar_to_scalar(&-SecpScalar::one()))
        );
    }
}
