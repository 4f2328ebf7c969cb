//! In-circuit arithmetic on commitments of the other curve in the cycle.
//!
//! The folding circuit over one field adds and scales commitments whose
//! coordinates live in that field. Unlike signature points, commitments can be
//! the identity and can coincide, so this module uses the complete projective
//! addition law for `y^2 = x^3 + b` (Renes, Costello, Batina 2016, Algorithm 7)
//! with `b = 7`, which both curves of the cycle share.
//!
//! Affine values carry an explicit infinity flag so they can be hashed:
//! the identity is `(0, 0, 1)`, matching the native encoding.
//!
//! Constraint costs:
//! - allocation with on-curve check: 7
//! - complete addition: 12
//! - projective to affine: 7
//! - scalar multiplication by `k` bits: `27k`

use ark_ff::PrimeField;

use crate::gadget::{inverse_or_zero, AllocatedBit, Num};
use crate::poseidon::PoseidonROGadget;
use crate::r1cs::{ConstraintSystem, LinearCombination};

const COEFF_B: u64 = 7;

/// An affine commitment `(x, y, is_infinity)`.
#[derive(Clone, Debug)]
pub struct AllocatedCommitment<F: PrimeField> {
    pub x: Num<F>,
    pub y: Num<F>,
    pub is_infinity: Num<F>,
}

impl<F: PrimeField> AllocatedCommitment<F> {
    pub fn identity() -> Self {
        Self {
            x: Num::zero(),
            y: Num::zero(),
            is_infinity: Num::constant(F::one()),
        }
    }

    /// Allocates `(x, y, is_infinity)` and proves it encodes a curve point.
    pub fn alloc<CS: ConstraintSystem<F>>(cs: &mut CS, coordinates: (F, F, F)) -> Self {
        let (x, y, inf) = coordinates;
        let is_infinity = AllocatedBit::alloc(cs, !inf.is_zero()).num();
        let x = Num::alloc(cs, x);
        let y = Num::alloc(cs, y);

        cs.enforce(x.lc(), is_infinity.lc(), LinearCombination::zero());
        cs.enforce(y.lc(), is_infinity.lc(), LinearCombination::zero());

        // (y^2 - x^3 - b)(1 - is_infinity) = 0
        let y2 = y.mul(cs, &y);
        let x2 = x.mul(cs, &x);
        let x3 = x2.mul(cs, &x);
        let lhs = y2.sub(&x3).add_constant(-F::from(COEFF_B));
        cs.enforce(
            lhs.lc(),
            LinearCombination::constant(F::one()) - is_infinity.lc(),
            LinearCombination::zero(),
        );

        Self { x, y, is_infinity }
    }

    pub fn value(&self) -> (F, F, F) {
        (self.x.value(), self.y.value(), self.is_infinity.value())
    }

    /// `(x : y + inf : 1 - inf)`; the identity maps to `(0 : 1 : 0)`.
    pub fn to_projective(&self) -> ProjectivePoint<F> {
        ProjectivePoint {
            x: self.x.clone(),
            y: self.y.add(&self.is_infinity),
            z: Num::constant(F::one()).sub(&self.is_infinity),
        }
    }

    pub fn absorb_into(&self, ro: &mut PoseidonROGadget<'_, F>) {
        ro.absorb(&self.x);
        ro.absorb(&self.y);
        ro.absorb(&self.is_infinity);
    }

    pub fn select<CS: ConstraintSystem<F>>(
        cs: &mut CS,
        cond: &AllocatedBit<F>,
        a: &AllocatedCommitment<F>,
        b: &AllocatedCommitment<F>,
    ) -> AllocatedCommitment<F> {
        AllocatedCommitment {
            x: Num::select(cs, cond, &a.x, &b.x),
            y: Num::select(cs, cond, &a.y, &b.y),
            is_infinity: Num::select(cs, cond, &a.is_infinity, &b.is_infinity),
        }
    }
}

/// A point in homogeneous projective coordinates.
#[derive(Clone, Debug)]
pub struct ProjectivePoint<F: PrimeField> {
    pub x: Num<F>,
    pub y: Num<F>,
    pub z: Num<F>,
}

impl<F: PrimeField> ProjectivePoint<F> {
    pub fn identity() -> Self {
        Self {
            x: Num::zero(),
            y: Num::constant(F::one()),
            z: Num::zero(),
        }
    }

    /// Complete addition; also valid for doubling and the identity.
    pub fn add<CS: ConstraintSystem<F>>(&self, cs: &mut CS, other: &ProjectivePoint<F>) -> ProjectivePoint<F> {
        let b3 = F::from(3 * COEFF_B);

        let t0 = self.x.mul(cs, &other.x);
        let t1 = self.y.mul(cs, &other.y);
        let t2 = self.z.mul(cs, &other.z);

        // X1·Y2 + X2·Y1, Y1·Z2 + Y2·Z1, X1·Z2 + X2·Z1
        let xy = self
            .x
            .add(&self.y)
            .mul(cs, &other.x.add(&other.y))
            .sub(&t0)
            .sub(&t1);
        let yz = self
            .y
            .add(&self.z)
            .mul(cs, &other.y.add(&other.z))
            .sub(&t1)
            .sub(&t2);
        let xz = self
            .x
            .add(&self.z)
            .mul(cs, &other.x.add(&other.z))
            .sub(&t0)
            .sub(&t2);

        let three_t0 = t0.scale(F::from(3u64));
        let b3_t2 = t2.scale(b3);
        let z_sum = t1.add(&b3_t2);
        let t1_diff = t1.sub(&b3_t2);
        let b3_xz = xz.scale(b3);

        let x = xy.mul(cs, &t1_diff).sub(&yz.mul(cs, &b3_xz));
        let y = b3_xz.mul(cs, &three_t0).add(&t1_diff.mul(cs, &z_sum));
        let z = z_sum.mul(cs, &yz).add(&three_t0.mul(cs, &xy));

        ProjectivePoint { x, y, z }
    }

    /// `k·self` for little-endian bits of `k`, most significant first.
    pub fn scalar_mul<CS: ConstraintSystem<F>>(&self, cs: &mut CS, bits: &[AllocatedBit<F>]) -> ProjectivePoint<F> {
        let mut acc = ProjectivePoint::identity();
        for bit in bits.iter().rev() {
            acc = acc.add(cs, &acc);
            let sum = acc.add(cs, self);
            acc = ProjectivePoint::select(cs, bit, &sum, &acc);
        }
        acc
    }

    pub fn select<CS: ConstraintSystem<F>>(
        cs: &mut CS,
        cond: &AllocatedBit<F>,
        a: &ProjectivePoint<F>,
        b: &ProjectivePoint<F>,
    ) -> ProjectivePoint<F> {
        ProjectivePoint {
            x: Num::select(cs, cond, &a.x, &b.x),
            y: Num::select(cs, cond, &a.y, &b.y),
            z: Num::select(cs, cond, &a.z, &b.z),
        }
    }

    /// Normalises to `(X/Z, Y/Z, 0)`, or `(0, 0, 1)` when `Z = 0`.
    pub fn to_affine<CS: ConstraintSystem<F>>(&self, cs: &mut CS) -> AllocatedCommitment<F> {
        let is_infinity = self.z.is_zero(cs).num();
        let z_inv = Num::alloc(cs, inverse_or_zero(&self.z.value()));
        cs.enforce(
            self.z.lc(),
            z_inv.lc(),
            LinearCombination::constant(F::one()) - is_infinity.lc(),
        );

        let x = self.x.mul(cs, &z_inv);
        let y = self.y.mul(cs, &z_inv);
        cs.enforce(x.lc(), is_infinity.lc(), LinearCombination::zero());
        cs.enforce(y.lc(), is_infinity.lc(), LinearCombination::zero());

        AllocatedCommitment { x, y, is_infinity }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commitment::Commitment;
    use crate::curves::{Affine, Projective, Scalar, Secp, SecpScalar};
    use crate::gadget::to_bits_le;
    use crate::r1cs::{R1CSShape, ShapeCS, WitnessCS};
    use ark_ec::{AffineRepr, CurveGroup, Group};
    use ark_ff::Zero;

    fn coords(p: &Affine<Secp>) -> (Scalar, Scalar, Scalar) {
        Commitment::<Secp>::from_point(*p).coordinates()
    }

    fn blank() -> (Scalar, Scalar, Scalar) {
        coords(&Affine::<Secp>::zero())
    }

    fn add_circuit<CS: ConstraintSystem<Scalar>>(
        cs: &mut CS,
        a: (Scalar, Scalar, Scalar),
        b: (Scalar, Scalar, Scalar),
    ) -> AllocatedCommitment<Scalar> {
        let a = AllocatedCommitment::alloc(cs, a);
        let b = AllocatedCommitment::alloc(cs, b);
        a.to_projective().add(cs, &b.to_projective()).to_affine(cs)
    }

    #[test]
    fn test_complete_addition_matches_native() {
        let mut shape_cs = ShapeCS::new();
        add_circuit(&mut shape_cs, blank(), blank());
        let shape = R1CSShape::from_shape_cs(&shape_cs).unwrap();

        let g = Projective::<Secp>::generator();
        let p = (g * SecpScalar::from(17u64)).into_affine();
        let q = (g * SecpScalar::from(99u64)).into_affine();
        let identity = Affine::<Secp>::zero();
        let cases = [
            (p, q),
            (p, p),
            (p, (-Projective::<Secp>::from(p)).into_affine()),
            (identity, q),
            (p, identity),
            (identity, identity),
        ];
        for (a, b) in cases {
            let mut cs = WitnessCS::new();
            let sum = add_circuit(&mut cs, coords(&a), coords(&b));
            assert_eq!(sum.value(), coords(&(a + b).into_affine()));
            let (w, x) = cs.into_assignment(&shape).unwrap();
            assert!(shape.is_sat(&w, &x).unwrap());
        }
    }

    #[test]
    fn test_off_curve_point_is_rejected() {
        let mut shape_cs = ShapeCS::new();
        AllocatedCommitment::alloc(&mut shape_cs, blank());
        let shape = R1CSShape::from_shape_cs(&shape_cs).unwrap();

        let mut cs = WitnessCS::new();
        AllocatedCommitment::alloc(&mut cs, (Scalar::from(1u64), Scalar::from(2u64), Scalar::zero()));
        let (w, x) = cs.into_assignment(&shape).unwrap();
        assert!(!shape.is_sat(&w, &x).unwrap());
    }

    fn mul_circuit<CS: ConstraintSystem<Scalar>>(
        cs: &mut CS,
        p: (Scalar, Scalar, Scalar),
        k: Scalar,
    ) -> AllocatedCommitment<Scalar> {
        let p = AllocatedCommitment::alloc(cs, p);
        let k = Num::alloc(cs, k);
        let bits = to_bits_le(cs, &k, 128);
        p.to_projective().scalar_mul(cs, &bits).to_affine(cs)
    }

    #[test]
    fn test_scalar_multiplication_matches_native() {
        let mut shape_cs = ShapeCS::new();
        mul_circuit(&mut shape_cs, blank(), Scalar::zero());
        let shape = R1CSShape::from_shape_cs(&shape_cs).unwrap();

        let p = (Projective::<Secp>::generator() * SecpScalar::from(5u64)).into_affine();
        let k: u128 = 0xfedc_ba98_7654_3210_0123_4567_89ab_cdef;
        for (point, scalar) in [(p, k), (p, 0), (Affine::<Secp>::zero(), k)] {
            let mut cs = WitnessCS::new();
            let out = mul_circuit(&mut cs, coords(&point), Scalar::from(scalar));
            let expected = (point * SecpScalar::from(scalar)).into_affine();
            assert_eq!(out.value(), coords(&expected));
            let (w, x) = cs.into_assignment(&shape).unwrap();
            assert!(shape.is_sat(&w, &x).unwrap());
        }
    }
}
