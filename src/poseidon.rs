//! Poseidon random oracle, natively and as a constraint gadget.
//!
//! The folding circuits hash the running instance and derive folding
//! challenges inside the proof, so the oracle has to be cheap in R1CS. Both
//! fields of the curve cycle get their own constants from the same recipe:
//!
//! - width 5 (rate 4, capacity 1), S-box `x^5`, 8 full and 60 partial rounds
//! - round constants hashed out of blake3 with the field modulus as context
//! - a Cauchy MDS matrix `1 / (i + j + WIDTH)`
//!
//! Inputs are absorbed as one fixed-length message; the capacity element is
//! initialised with the message length, so messages of different lengths never
//! collide. The native and gadget sponges are kept in lockstep by tests.

use ark_ff::PrimeField;
use num_bigint::BigUint;

use crate::gadget::{pack_bits, to_bits_strict, AllocatedBit, Num};
use crate::r1cs::ConstraintSystem;

pub const WIDTH: usize = 5;
pub const RATE: usize = WIDTH - 1;
pub const FULL_ROUNDS: usize = 8;
pub const PARTIAL_ROUNDS: usize = 60;

const ROUND_CONSTANT_DOMAIN: &[u8] = b"ecdsa_fold/poseidon/round-constants";

/// Round constants and MDS matrix for one field.
#[derive(Clone, Debug, PartialEq)]
pub struct PoseidonConstants<F: PrimeField> {
    round_constants: Vec<[F; WIDTH]>,
    mds: [[F; WIDTH]; WIDTH],
}

impl<F: PrimeField> Default for PoseidonConstants<F> {
    fn default() -> Self {
        Self::new()
    }
}

impl<F: PrimeField> PoseidonConstants<F> {
    pub fn new() -> Self {
        let modulus: BigUint = F::MODULUS.into();
        let modulus_bytes = modulus.to_bytes_le();
        let round_constants = (0..FULL_ROUNDS + PARTIAL_ROUNDS)
            .map(|round| {
                let mut row = [F::zero(); WIDTH];
                for (i, slot) in row.iter_mut().enumerate() {
                    let mut hasher = blake3::Hasher::new();
                    hasher.update(ROUND_CONSTANT_DOMAIN);
                    hasher.update(&modulus_bytes);
                    hasher.update(&(round as u32).to_le_bytes());
                    hasher.update(&(i as u32).to_le_bytes());
                    let mut wide = [0u8; 64];
                    hasher.finalize_xof().fill(&mut wide);
                    *slot = F::from_le_bytes_mod_order(&wide);
                }
                row
            })
            .collect();

        let mut mds = [[F::zero(); WIDTH]; WIDTH];
        for (i, row) in mds.iter_mut().enumerate() {
            for (j, entry) in row.iter_mut().enumerate() {
                let denominator = F::from((i + j + WIDTH) as u64);
                *entry = denominator.inverse().unwrap_or_else(F::zero);
            }
        }
        Self {
            round_constants,
            mds,
        }
    }

    fn is_full_round(round: usize) -> bool {
        round < FULL_ROUNDS / 2 || round >= FULL_ROUNDS / 2 + PARTIAL_ROUNDS
    }

    /// The permutation over native field elements.
    pub fn permute(&self, state: &mut [F; WIDTH]) {
        for (round, constants) in self.round_constants.iter().enumerate() {
            for (s, c) in state.iter_mut().zip(constants.iter()) {
                *s += c;
            }
            if Self::is_full_round(round) {
                state.iter_mut().for_each(|s| *s = sbox(*s));
            } else {
                state[0] = sbox(state[0]);
            }
            let mut next = [F::zero(); WIDTH];
            for (i, out) in next.iter_mut().enumerate() {
                for j in 0..WIDTH {
                    *out += self.mds[i][j] * state[j];
                }
            }
            *state = next;
        }
    }

    /// The same permutation as constraints.
    fn permute_gadget<CS: ConstraintSystem<F>>(&self, cs: &mut CS, state: &mut Vec<Num<F>>) {
        for (round, constants) in self.round_constants.iter().enumerate() {
            for (s, c) in state.iter_mut().zip(constants.iter()) {
                *s = s.add_constant(*c);
            }
            if Self::is_full_round(round) {
                for s in state.iter_mut() {
                    *s = sbox_gadget(cs, s);
                }
            } else {
                state[0] = sbox_gadget(cs, &state[0]);
            }
            let next = (0..WIDTH)
                .map(|i| {
                    let mut acc = Num::zero();
                    for (j, s) in state.iter().enumerate() {
                        acc = acc.add(&s.scale(self.mds[i][j]));
                    }
                    acc.compact()
                })
                .collect();
            *state = next;
        }
    }
}

fn sbox<F: PrimeField>(x: F) -> F {
    let x2 = x.square();
    x2.square() * x
}

fn sbox_gadget<F: PrimeField, CS: ConstraintSystem<F>>(cs: &mut CS, x: &Num<F>) -> Num<F> {
    let x2 = x.mul(cs, x);
    let x4 = x2.mul(cs, &x2);
    x4.mul(cs, x)
}

/// Native fixed-length sponge.
#[derive(Clone, Debug)]
pub struct PoseidonRO<'a, F: PrimeField> {
    constants: &'a PoseidonConstants<F>,
    elements: Vec<F>,
}

impl<'a, F: PrimeField> PoseidonRO<'a, F> {
    pub fn new(constants: &'a PoseidonConstants<F>) -> Self {
        Self {
            constants,
            elements: Vec::new(),
        }
    }

    pub fn absorb(&mut self, element: F) {
        self.elements.push(element);
    }

    /// Full field output.
    pub fn squeeze(&self) -> F {
        let mut state = [F::zero(); WIDTH];
        state[0] = F::from(self.elements.len() as u64);
        if self.elements.is_empty() {
            self.constants.permute(&mut state);
        }
        for chunk in self.elements.chunks(RATE) {
            for (slot, element) in state[1..].iter_mut().zip(chunk.iter()) {
                *slot += element;
            }
            self.constants.permute(&mut state);
        }
        state[1]
    }

    /// The low `num_bits` bits of the output as an integer.
    pub fn squeeze_bits(&self, num_bits: usize) -> BigUint {
        let full: BigUint = self.squeeze().into();
        let mask = (BigUint::from(1u8) << num_bits) - BigUint::from(1u8);
        full & mask
    }

    /// The low `num_bits` bits of the output, moved into any field wide enough
    /// to hold them.
    pub fn squeeze_truncated<T: PrimeField>(&self, num_bits: usize) -> T {
        T::from(self.squeeze_bits(num_bits))
    }
}

/// Constraint version of [`PoseidonRO`].
#[derive(Clone, Debug)]
pub struct PoseidonROGadget<'a, F: PrimeField> {
    constants: &'a PoseidonConstants<F>,
    elements: Vec<Num<F>>,
}

impl<'a, F: PrimeField> PoseidonROGadget<'a, F> {
    pub fn new(constants: &'a PoseidonConstants<F>) -> Self {
        Self {
            constants,
            elements: Vec::new(),
        }
    }

    pub fn absorb(&mut self, element: &Num<F>) {
        self.elements.push(element.clone());
    }

    pub fn squeeze<CS: ConstraintSystem<F>>(&self, cs: &mut CS) -> Num<F> {
        let mut state: Vec<Num<F>> = (0..WIDTH).map(|_| Num::zero()).collect();
        state[0] = Num::constant(F::from(self.elements.len() as u64));
        if self.elements.is_empty() {
            self.constants.permute_gadget(cs, &mut state);
        }
        for chunk in self.elements.chunks(RATE) {
            for (slot, element) in state[1..].iter_mut().zip(chunk.iter()) {
                *slot = slot.add(element);
            }
            self.constants.permute_gadget(cs, &mut state);
        }
        state.swap_remove(1)
    }

    /// The low `num_bits` output bits, little-endian. The output is
    /// decomposed strictly, so the bits are those of the canonical integer.
    pub fn squeeze_bits<CS: ConstraintSystem<F>>(
        &self,
        cs: &mut CS,
        num_bits: usize,
    ) -> Vec<AllocatedBit<F>> {
        let full = self.squeeze(cs);
        let mut bits = to_bits_strict(cs, &full);
        bits.truncate(num_bits);
        bits
    }

    /// [`Self::squeeze_bits`] packed back into one number.
    pub fn squeeze_truncated<CS: ConstraintSystem<F>>(&self, cs: &mut CS, num_bits: usize) -> Num<F> {
        pack_bits(&self.squeeze_bits(cs, num_bits))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::curves::{Scalar, SecpScalar};
    use crate::r1cs::{R1CSShape, ShapeCS, WitnessCS};
    use ark_ff::{One, Zero};

    fn hash_circuit<F: PrimeField, CS: ConstraintSystem<F>>(
        cs: &mut CS,
        constants: &PoseidonConstants<F>,
        inputs: &[F],
    ) -> (Num<F>, Num<F>) {
        let mut ro = PoseidonROGadget::new(constants);
        for input in inputs {
            ro.absorb(&Num::alloc(cs, *input));
        }
        let full = ro.squeeze(cs);
        let truncated = ro.squeeze_truncated(cs, 128);
        (full, truncated)
    }

    fn check_lockstep<F: PrimeField>(len: usize) {
        let constants = PoseidonConstants::<F>::new();
        let inputs: Vec<F> = (0..len).map(|i| F::from((i * i + 3) as u64)).collect();

        let mut native = PoseidonRO::new(&constants);
        inputs.iter().for_each(|x| native.absorb(*x));

        let mut shape_cs = ShapeCS::new();
        hash_circuit(&mut shape_cs, &constants, &vec![F::zero(); len]);
        let shape = R1CSShape::from_shape_cs(&shape_cs).unwrap();

        let mut cs = WitnessCS::new();
        let (full, truncated) = hash_circuit(&mut cs, &constants, &inputs);
        assert_eq!(full.value(), native.squeeze());
        assert_eq!(truncated.value(), native.squeeze_truncated::<F>(128));
        let (w, x) = cs.into_assignment(&shape).unwrap();
        assert!(shape.is_sat(&w, &x).unwrap());
    }

    #[test]
    fn test_gadget_matches_native_on_both_fields() {
        for len in [1, 4, 5, 9] {
            check_lockstep::<Scalar>(len);
        }
        check_lockstep::<SecpScalar>(7);
    }

    #[test]
    fn test_length_is_bound() {
        let constants = PoseidonConstants::<Scalar>::new();
        let mut short = PoseidonRO::new(&constants);
        short.absorb(Scalar::one());
        let mut long = short.clone();
        long.absorb(Scalar::zero());
        assert_ne!(short.squeeze(), long.squeeze());
    }

    #[test]
    fn test_mds_is_invertible_and_constants_differ_per_field() {
        let fp = PoseidonConstants::<Scalar>::new();
        assert!(fp.mds.iter().flatten().all(|e| !e.is_zero()));
        let again = PoseidonConstants::<Scalar>::new();
        assert_eq!(fp, again);

        let fn_constants = PoseidonConstants::<SecpScalar>::new();
        let fp_first: BigUint = fp.round_constants[0][0].into();
        let fn_first: BigUint = fn_constants.round_constants[0][0].into();
        assert_ne!(fp_first, fn_first);
    }

    #[test]
    fn test_truncation_keeps_low_bits() {
        let constants = PoseidonConstants::<Scalar>::new();
        let mut ro = PoseidonRO::new(&constants);
        ro.absorb(Scalar::from(42u64));
        let bits = ro.squeeze_bits(128);
        assert!(bits.bits() <= 128);
        let full: BigUint = ro.squeeze().into();
        assert_eq!(full % (BigUint::from(1u8) << 128usize), bits);
    }
}
