//! Non-native integers as 64-bit limbs.
//!
//! The folding circuit on one side of the cycle folds the public inputs of
//! the other side, which live in the other field. They are carried as four
//! range-checked limbs and combined with `acc + r·x mod m` where `m` is the
//! other field's modulus.
//!
//! The reduction is proven with a quotient and a remainder: the limb-wise
//! difference `acc + r·x - q·m - rem` is shown to vanish over the integers by
//! propagating signed carries between limb positions. Every intermediate stays
//! far below the native modulus, so the field equations imply the integer ones.

use ark_ff::PrimeField;
use num_bigint::{BigInt, BigUint, Sign};
use num_traits::Zero;

use crate::curves::to_biguint;
use crate::gadget::{pack_bits, AllocatedBit, Num};
use crate::r1cs::ConstraintSystem;

pub const LIMB_WIDTH: usize = 64;
pub const NUM_LIMBS: usize = 4;

/// Carries are below `2^67` in magnitude; they are shifted by `2^68` and
/// range-checked to 69 bits.
const CARRY_OFFSET_BITS: usize = 68;
const CARRY_BITS: usize = 69;

fn limb_values(value: &BigUint, num_limbs: usize) -> Vec<BigUint> {
    let mask = (BigUint::from(1u8) << LIMB_WIDTH) - BigUint::from(1u8);
    (0..num_limbs)
        .map(|i| (value >> (i * LIMB_WIDTH)) & &mask)
        .collect()
}

/// Little-endian 64-bit limbs of a field element's canonical integer, each
/// moved into the field `B`.
pub fn to_limbs<A: PrimeField, B: PrimeField>(value: &A) -> Vec<B> {
    limb_values(&to_biguint(value), NUM_LIMBS)
        .into_iter()
        .map(B::from)
        .collect()
}

/// An integer held as limbs in the constraint field.
#[derive(Clone, Debug)]
pub struct BigNat<F: PrimeField> {
    limbs: Vec<Num<F>>,
    value: BigUint,
}

impl<F: PrimeField> BigNat<F> {
    pub fn constant(value: &BigUint, num_limbs: usize) -> Self {
        Self {
            limbs: limb_values(value, num_limbs)
                .into_iter()
                .map(|limb| Num::constant(F::from(limb)))
                .collect(),
            value: value.clone(),
        }
    }

    /// Allocates `num_limbs` limbs, each proven to fit in 64 bits.
    pub fn alloc<CS: ConstraintSystem<F>>(cs: &mut CS, value: &BigUint, num_limbs: usize) -> Self {
        let limbs: Vec<Num<F>> = limb_values(value, num_limbs)
            .iter()
            .map(|limb| {
                let bits: Vec<AllocatedBit<F>> = (0..LIMB_WIDTH)
                    .map(|i| AllocatedBit::alloc(cs, limb.bit(i as u64)))
                    .collect();
                pack_bits(&bits)
            })
            .collect();
        let value = limbs
            .iter()
            .enumerate()
            .fold(BigUint::zero(), |acc, (i, limb)| {
                acc + (to_biguint(&limb.value()) << (i * LIMB_WIDTH))
            });
        Self { limbs, value }
    }

    /// Groups little-endian bits into limbs without new constraints.
    pub fn from_bits(bits: &[AllocatedBit<F>]) -> Self {
        let limbs: Vec<Num<F>> = bits.chunks(LIMB_WIDTH).map(pack_bits).collect();
        let value = bits
            .iter()
            .enumerate()
            .filter(|(_, bit)| bit.value())
            .fold(BigUint::zero(), |acc, (i, _)| acc + (BigUint::from(1u8) << i));
        Self { limbs, value }
    }

    pub fn limbs(&self) -> &[Num<F>] {
        &self.limbs
    }

    pub fn value(&self) -> &BigUint {
        &self.value
    }

    /// `if cond { a } else { b }` limb by limb.
    pub fn select<CS: ConstraintSystem<F>>(
        cs: &mut CS,
        cond: &AllocatedBit<F>,
        a: &BigNat<F>,
        b: &BigNat<F>,
    ) -> BigNat<F> {
        let limbs = a
            .limbs
            .iter()
            .zip(b.limbs.iter())
            .map(|(x, y)| Num::select(cs, cond, x, y))
            .collect();
        let value = if cond.value() {
            a.value.clone()
        } else {
            b.value.clone()
        };
        BigNat { limbs, value }
    }

    /// `(self + r·x) mod modulus`, as a fresh [`NUM_LIMBS`]-limb number.
    ///
    /// `r` must be at most two limbs and `x` at most four, and `modulus` must
    /// exceed `2^192`, so the quotient fits in two limbs.
    pub fn mul_add_mod<CS: ConstraintSystem<F>>(
        &self,
        cs: &mut CS,
        r: &BigNat<F>,
        x: &BigNat<F>,
        modulus: &BigUint,
    ) -> BigNat<F> {
        const QUOTIENT_LIMBS: usize = 2;

        let total = &self.value + &r.value * &x.value;
        let quotient = BigNat::alloc(cs, &(&total / modulus), QUOTIENT_LIMBS);
        let remainder = BigNat::alloc(cs, &(&total % modulus), NUM_LIMBS);
        let modulus_limbs = limb_values(modulus, NUM_LIMBS);

        let positions = (r.limbs.len() + x.limbs.len() - 1)
            .max(QUOTIENT_LIMBS + NUM_LIMBS - 1)
            .max(self.limbs.len());

        // Per-position difference, as constraints and as signed integers.
        let mut diffs: Vec<Num<F>> = (0..positions).map(|_| Num::zero()).collect();
        let mut diff_values: Vec<BigInt> = vec![BigInt::zero(); positions];
        let signed = |n: &Num<F>| BigInt::from_biguint(Sign::Plus, to_biguint(&n.value()));

        for (k, limb) in self.limbs.iter().enumerate() {
            diffs[k] = diffs[k].add(limb);
            diff_values[k] += signed(limb);
        }
        for (i, ri) in r.limbs.iter().enumerate() {
            for (j, xj) in x.limbs.iter().enumerate() {
                let product = ri.mul(cs, xj);
                diffs[i + j] = diffs[i + j].add(&product);
                diff_values[i + j] += signed(ri) * signed(xj);
            }
        }
        for (i, qi) in quotient.limbs.iter().enumerate() {
            for (j, mj) in modulus_limbs.iter().enumerate() {
                let coeff = F::from(mj.clone());
                diffs[i + j] = diffs[i + j].sub(&qi.scale(coeff));
                diff_values[i + j] -= signed(qi) * BigInt::from_biguint(Sign::Plus, mj.clone());
            }
        }
        for (k, limb) in remainder.limbs.iter().enumerate() {
            diffs[k] = diffs[k].sub(limb);
            diff_values[k] -= signed(limb);
        }

        let shift = F::from(BigUint::from(1u8) << LIMB_WIDTH);
        let offset = BigInt::from(1u8) << CARRY_OFFSET_BITS;
        let mut carry = Num::zero();
        let mut carry_value = BigInt::zero();
        for k in 0..positions {
            let with_carry = diffs[k].add(&carry);
            let with_carry_value = &diff_values[k] + &carry_value;
            if k + 1 == positions {
                with_carry.enforce_equal(cs, &Num::zero());
                break;
            }
            carry_value = with_carry_value >> LIMB_WIDTH;
            let shifted = (&carry_value + &offset).to_biguint().unwrap_or_default();
            let bits: Vec<AllocatedBit<F>> = (0..CARRY_BITS)
                .map(|i| AllocatedBit::alloc(cs, shifted.bit(i as u64)))
                .collect();
            let next_carry = pack_bits(&bits).add_constant(-F::from(BigUint::from(1u8) << CARRY_OFFSET_BITS));
            with_carry.enforce_equal(cs, &next_carry.scale(shift));
            carry = next_carry;
        }

        remainder
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::curves::{Scalar, SecpScalar};
    use crate::r1cs::{R1CSShape, ShapeCS, WitnessCS};
    use ark_ff::{One, UniformRand};
    use rand_chacha::ChaCha20Rng;
    use rand_core::SeedableRng;

    // Folds an Fn-valued accumulator inside an Fp circuit.
    fn fold_circuit<CS: ConstraintSystem<Scalar>>(
        cs: &mut CS,
        acc: &BigUint,
        r: &BigUint,
        x: &BigUint,
    ) -> BigNat<Scalar> {
        let modulus: BigUint = SecpScalar::MODULUS.into();
        let acc = BigNat::alloc(cs, acc, NUM_LIMBS);
        let r = BigNat::alloc(cs, r, 2);
        let x = BigNat::alloc(cs, x, NUM_LIMBS);
        acc.mul_add_mod(cs, &r, &x, &modulus)
    }

    fn fold_shape() -> R1CSShape<Scalar> {
        let mut cs = ShapeCS::new();
        let zero = BigUint::zero();
        fold_circuit(&mut cs, &zero, &zero, &zero);
        R1CSShape::from_shape_cs(&cs).unwrap()
    }

    #[test]
    fn test_mul_add_mod_matches_field_arithmetic() {
        let shape = fold_shape();
        let mut rng = ChaCha20Rng::seed_from_u64(11);
        for _ in 0..4 {
            let acc = SecpScalar::rand(&mut rng);
            let x = SecpScalar::rand(&mut rng);
            let r = BigUint::from(u128::rand(&mut rng));
            let expected = acc + SecpScalar::from(r.clone()) * x;

            let mut cs = WitnessCS::new();
            let out = fold_circuit(&mut cs, &to_biguint(&acc), &r, &to_biguint(&x));
            assert_eq!(out.value(), &to_biguint(&expected));
            let limbs: Vec<Scalar> = out.limbs().iter().map(|l| l.value()).collect();
            assert_eq!(limbs, to_limbs::<SecpScalar, Scalar>(&expected));

            let (w, io) = cs.into_assignment(&shape).unwrap();
            assert!(shape.is_sat(&w, &io).unwrap());
        }
    }

    #[test]
    fn test_extreme_operands_are_satisfiable() {
        let shape = fold_shape();
        let acc = to_biguint(&-SecpScalar::one());
        let x = to_biguint(&-SecpScalar::one());
        let r = (BigUint::from(1u8) << 128usize) - BigUint::from(1u8);

        let mut cs = WitnessCS::new();
        fold_circuit(&mut cs, &acc, &r, &x);
        let (w, io) = cs.into_assignment(&shape).unwrap();
        assert!(shape.is_sat(&w, &io).unwrap());
    }

    #[test]
    fn test_wrong_remainder_is_rejected() {
        // Shifting the remainder by one limb unit breaks the carry chain.
        let shape = fold_shape();
        let mut cs = WitnessCS::new();
        let acc = BigUint::from(5u8);
        let r = BigUint::from(3u8);
        let x = BigUint::from(7u8);
        fold_circuit(&mut cs, &acc, &r, &x);
        let (mut w, io) = cs.into_assignment(&shape).unwrap();
        assert!(shape.is_sat(&w, &io).unwrap());

        // Variables: 256 acc bits, 128 r bits, 256 x bits and 128 quotient
        // bits; the first remainder bit follows them.
        let first_remainder_bit = 256 + 128 + 256 + 128;
        w.w[first_remainder_bit] += Scalar::one();
        assert!(!shape.is_sat(&w, &io).unwrap());
    }

    #[test]
    fn test_limbs_of_field_elements() {
        let value = Scalar::from(u64::MAX) + Scalar::one();
        let limbs = to_limbs::<Scalar, SecpScalar>(&value);
        assert_eq!(
            limbs,
            vec![
                SecpScalar::from(0u64),
                SecpScalar::from(1u64),
                SecpScalar::from(0u64),
                SecpScalar::from(0u64)
            ]
        );
    }
}
