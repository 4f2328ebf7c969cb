//! The augmented step circuit of the recursion.
//!
//! Each side of the cycle runs the same circuit around its own step function.
//! Over the field `G::Base` it folds one fresh instance `u` of the other side
//! (committed on `G`) into the running instance `U` and applies the step to
//! the state:
//!
//! 1. `i = 0` is the base case. Otherwise `u.x[0]` must equal
//!    `H(params, i, z0, zi, U)`, the hash this circuit emitted one step ago.
//! 2. `r = H(params, U, u, comm_T)` truncated to [`CHALLENGE_BITS`], and
//!    `U' = (W + r·W_u, E + r·T, u + r, X + r·x mod |G|)`.
//! 3. In the base case `U'` is replaced by a fixed value: the trivial
//!    instance on the primary side, `u` itself on the secondary side.
//! 4. `z_{i+1} = F(zi)` (or `F(z0)` in the base case).
//! 5. The public outputs are `u.x[1]`, passed through unchanged, and
//!    `H(params, i + 1, z0, z_{i+1}, U')`.
//!
//! Hashes are truncated to [`HASH_BITS`] so they are canonical in both fields.
//! The non-native public inputs of `U` are carried as range-checked limbs.

use ark_ff::{One, PrimeField, Zero};
use num_bigint::BigUint;

use crate::bignat::{BigNat, NUM_LIMBS};
use crate::circuit::StepCircuit;
use crate::commitment::Commitment;
use crate::curves::{convert_field_mod, to_biguint, CycleCurve};
use crate::ecc::AllocatedCommitment;
use crate::error::{EcdsaFoldError, Result};
use crate::gadget::{pack_bits, to_bits_le, AllocatedBit, Num};
use crate::poseidon::{PoseidonConstants, PoseidonRO, PoseidonROGadget};
use crate::r1cs::{ConstraintSystem, LinearCombination, R1CSInstance, RelaxedR1CSInstance};

/// Bits kept from every state hash.
pub const HASH_BITS: usize = 250;
/// Bits of every folding challenge.
pub const CHALLENGE_BITS: usize = 128;
/// Public inputs of both augmented circuits.
pub const NUM_IO: usize = 2;

/// Witness values of one augmented step. `None` entries take the blank
/// default, which is what the base case and shape recording use.
#[derive(Clone, Debug)]
pub struct AugmentedInputs<G: CycleCurve> {
    pub params_digest: G::Base,
    pub i: G::Base,
    pub z0: Vec<G::Base>,
    pub zi: Option<Vec<G::Base>>,
    pub running: Option<RelaxedR1CSInstance<G>>,
    pub fresh: Option<R1CSInstance<G>>,
    pub comm_t: Option<Commitment<G>>,
}

impl<G: CycleCurve> AugmentedInputs<G> {
    pub fn blank(arity: usize) -> Self {
        Self {
            params_digest: G::Base::zero(),
            i: G::Base::zero(),
            z0: vec![G::Base::zero(); arity],
            zi: None,
            running: None,
            fresh: None,
            comm_t: None,
        }
    }
}

/// Running instance of the other side, allocated.
#[derive(Clone, Debug)]
struct AllocatedRelaxedInstance<G: CycleCurve> {
    w: AllocatedCommitment<G::Base>,
    e: AllocatedCommitment<G::Base>,
    u: Num<G::Base>,
    x: Vec<BigNat<G::Base>>,
}

impl<G: CycleCurve> AllocatedRelaxedInstance<G> {
    fn alloc<CS: ConstraintSystem<G::Base>>(cs: &mut CS, instance: &RelaxedR1CSInstance<G>) -> Self {
        Self {
            w: AllocatedCommitment::alloc(cs, instance.comm_w.coordinates()),
            e: AllocatedCommitment::alloc(cs, instance.comm_e.coordinates()),
            u: Num::alloc(cs, convert_field_mod(&instance.u)),
            x: instance
                .x
                .iter()
                .map(|x| BigNat::alloc(cs, &to_biguint(x), NUM_LIMBS))
                .collect(),
        }
    }

    /// The trivially satisfied instance as constants.
    fn trivial() -> Self {
        Self {
            w: AllocatedCommitment::identity(),
            e: AllocatedCommitment::identity(),
            u: Num::zero(),
            x: (0..NUM_IO)
                .map(|_| BigNat::constant(&BigUint::zero(), NUM_LIMBS))
                .collect(),
        }
    }

    /// `u` embedded with `E = 0` and `u = 1`.
    fn from_fresh(fresh: &AllocatedInstance<G>) -> Self {
        Self {
            w: fresh.w.clone(),
            e: AllocatedCommitment::identity(),
            u: Num::constant(G::Base::one()),
            x: fresh.x_limbs.clone(),
        }
    }

    /// Same layout as [`RelaxedR1CSInstance::absorb_in_ro`].
    fn absorb_into(&self, ro: &mut PoseidonROGadget<'_, G::Base>) {
        self.w.absorb_into(ro);
        self.e.absorb_into(ro);
        ro.absorb(&self.u);
        for x in &self.x {
            x.limbs().iter().for_each(|limb| ro.absorb(limb));
        }
    }

    fn fold<CS: ConstraintSystem<G::Base>>(
        &self,
        cs: &mut CS,
        poseidon: &PoseidonConstants<G::Base>,
        params: &Num<G::Base>,
        fresh: &AllocatedInstance<G>,
        comm_t: &AllocatedCommitment<G::Base>,
    ) -> Self {
        let mut ro = PoseidonROGadget::new(poseidon);
        ro.absorb(params);
        self.absorb_into(&mut ro);
        fresh.absorb_into(&mut ro);
        comm_t.absorb_into(&mut ro);
        let r_bits = ro.squeeze_bits(cs, CHALLENGE_BITS);

        let r_w = fresh.w.to_projective().scalar_mul(cs, &r_bits);
        let w = self.w.to_projective().add(cs, &r_w).to_affine(cs);
        let r_t = comm_t.to_projective().scalar_mul(cs, &r_bits);
        let e = self.e.to_projective().add(cs, &r_t).to_affine(cs);

        let u = self.u.add(&pack_bits(&r_bits));

        let r = BigNat::from_bits(&r_bits);
        let modulus: BigUint = G::Scalar::MODULUS.into();
        let x = self
            .x
            .iter()
            .zip(fresh.x_limbs.iter())
            .map(|(acc, x)| acc.mul_add_mod(cs, &r, x, &modulus))
            .collect();

        Self { w, e, u, x }
    }

    fn select<CS: ConstraintSystem<G::Base>>(
        cs: &mut CS,
        cond: &AllocatedBit<G::Base>,
        a: &Self,
        b: &Self,
    ) -> Self {
        Self {
            w: AllocatedCommitment::select(cs, cond, &a.w, &b.w),
            e: AllocatedCommitment::select(cs, cond, &a.e, &b.e),
            u: Num::select(cs, cond, &a.u, &b.u),
            x: a
                .x
                .iter()
                .zip(b.x.iter())
                .map(|(a, b)| BigNat::select(cs, cond, a, b))
                .collect(),
        }
    }
}

/// Fresh instance of the other side. Its public inputs are truncated hashes,
/// held both as native numbers and as limbs.
#[derive(Clone, Debug)]
struct AllocatedInstance<G: CycleCurve> {
    w: AllocatedCommitment<G::Base>,
    x: Vec<Num<G::Base>>,
    x_limbs: Vec<BigNat<G::Base>>,
}

impl<G: CycleCurve> AllocatedInstance<G> {
    fn alloc<CS: ConstraintSystem<G::Base>>(cs: &mut CS, instance: &R1CSInstance<G>) -> Self {
        let w = AllocatedCommitment::alloc(cs, instance.comm_w.coordinates());
        let mut x = Vec::with_capacity(instance.x.len());
        let mut x_limbs = Vec::with_capacity(instance.x.len());
        for value in &instance.x {
            let num = Num::alloc(cs, convert_field_mod(value));
            let bits = to_bits_le(cs, &num, HASH_BITS);
            x_limbs.push(BigNat::from_bits(&bits));
            x.push(num);
        }
        Self { w, x, x_limbs }
    }

    /// Same layout as [`R1CSInstance::absorb_in_ro`].
    fn absorb_into(&self, ro: &mut PoseidonROGadget<'_, G::Base>) {
        self.w.absorb_into(ro);
        self.x.iter().for_each(|x| ro.absorb(x));
    }
}

/// One step of the recursion on the side whose circuit field is `G::Base`.
pub struct AugmentedCircuit<'a, G: CycleCurve, SC: StepCircuit<G::Base>> {
    is_primary: bool,
    poseidon: &'a PoseidonConstants<G::Base>,
    step: &'a SC,
    inputs: AugmentedInputs<G>,
}

impl<'a, G: CycleCurve, SC: StepCircuit<G::Base>> AugmentedCircuit<'a, G, SC> {
    pub fn new(
        is_primary: bool,
        poseidon: &'a PoseidonConstants<G::Base>,
        step: &'a SC,
        inputs: AugmentedInputs<G>,
    ) -> Self {
        Self {
            is_primary,
            poseidon,
            step,
            inputs,
        }
    }

    /// Synthesizes the step and returns `z_{i+1}`.
    pub fn synthesize<CS: ConstraintSystem<G::Base>>(&self, cs: &mut CS) -> Result<Vec<Num<G::Base>>> {
        let arity = self.step.arity();
        let inputs = &self.inputs;
        if inputs.z0.len() != arity || inputs.zi.as_ref().is_some_and(|zi| zi.len() != arity) {
            return Err(EcdsaFoldError::MalformedState(format!(
                "step state must have {} elements",
                arity
            )));
        }
        let running = inputs
            .running
            .clone()
            .unwrap_or_else(|| RelaxedR1CSInstance::empty(NUM_IO));
        let fresh = inputs.fresh.clone().unwrap_or_else(|| R1CSInstance::empty(NUM_IO));
        if running.x.len() != NUM_IO || fresh.x.len() != NUM_IO {
            return Err(EcdsaFoldError::MalformedState(format!(
                "folded instances must have {} public inputs",
                NUM_IO
            )));
        }

        let params = Num::alloc(cs, inputs.params_digest);
        let i = Num::alloc(cs, inputs.i);
        let z0: Vec<Num<G::Base>> = inputs.z0.iter().map(|v| Num::alloc(cs, *v)).collect();
        let zi_values = inputs.zi.as_ref().unwrap_or(&inputs.z0);
        let zi: Vec<Num<G::Base>> = zi_values.iter().map(|v| Num::alloc(cs, *v)).collect();
        let running = AllocatedRelaxedInstance::alloc(cs, &running);
        let fresh = AllocatedInstance::alloc(cs, &fresh);
        let comm_t = AllocatedCommitment::alloc(cs, inputs.comm_t.unwrap_or_default().coordinates());

        let is_base = i.is_zero(cs);

        let mut ro = PoseidonROGadget::new(self.poseidon);
        ro.absorb(&params);
        ro.absorb(&i);
        z0.iter().chain(zi.iter()).for_each(|z| ro.absorb(z));
        running.absorb_into(&mut ro);
        let h_in = ro.squeeze_truncated(cs, HASH_BITS);
        let check = fresh.x[0].equals(cs, &h_in);
        // (1 - is_base)(1 - check) = 0
        cs.enforce(is_base.not().lc(), check.not().lc(), LinearCombination::zero());

        let folded = running.fold(cs, self.poseidon, &params, &fresh, &comm_t);
        let base = if self.is_primary {
            AllocatedRelaxedInstance::trivial()
        } else {
            AllocatedRelaxedInstance::from_fresh(&fresh)
        };
        let next = AllocatedRelaxedInstance::select(cs, &is_base, &base, &folded);

        let z_in: Vec<Num<G::Base>> = z0
            .iter()
            .zip(zi.iter())
            .map(|(a, b)| Num::select(cs, &is_base, a, b))
            .collect();
        let z_next = self.step.synthesize(cs, &z_in);
        if z_next.len() != arity {
            return Err(EcdsaFoldError::MalformedState(format!(
                "step returned {} elements, expected {}",
                z_next.len(),
                arity
            )));
        }

        let mut ro = PoseidonROGadget::new(self.poseidon);
        ro.absorb(&params);
        ro.absorb(&i.add_constant(G::Base::one()));
        z0.iter().chain(z_next.iter()).for_each(|z| ro.absorb(z));
        next.absorb_into(&mut ro);
        let h_out = ro.squeeze_truncated(cs, HASH_BITS);

        fresh.x[1].inputize(cs);
        h_out.inputize(cs);
        Ok(z_next)
    }
}

/// Native counterpart of the state hash, `H(params, i, z0, zi, U)`.
pub fn state_hash<G: CycleCurve>(
    poseidon: &PoseidonConstants<G::Base>,
    params_digest: G::Base,
    i: u64,
    z0: &[G::Base],
    zi: &[G::Base],
    running: &RelaxedR1CSInstance<G>,
) -> G::Base {
    let mut ro = PoseidonRO::new(poseidon);
    ro.absorb(params_digest);
    ro.absorb(G::Base::from(i));
    z0.iter().chain(zi.iter()).for_each(|z| ro.absorb(*z));
    running.absorb_in_ro(&mut ro);
    ro.squeeze_truncated(HASH_BITS)
}
