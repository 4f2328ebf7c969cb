//! Step circuits of the recursion.
//!
//! The primary step checks one ECDSA signature. It is satisfiable exactly when
//! `s·R = z·G + r·Q` for a point `R` on the curve with `x(R) ≡ r (mod n)`.
//! Each scalar multiplication starts from its own offset point `H_i`
//! (hash-to-curve, unknown discrete log), so after 256 double-and-add steps
//! the accumulators are
//!
//! ```text
//! A = 2^256·H0 + s·R,   B = 2^256·H1 + z·G,   C = 2^256·H2 + r·Q
//! ```
//!
//! and the final check is `A + K = B + C` with `K = 2^256·(H1 + H2 - H0)`.
//!
//! The step threads one value through the recursion: a running Poseidon hash
//! of every checked statement, `z' = H(z, Q.x, Q.y, r, r_alt, s̃, z̃, r̃)`.
//! A verifier holding the signatures recomputes the chain natively, so the
//! proof never carries per-signature data.
//!
//! The secondary side of the cycle runs [`TrivialStep`], which passes its
//! state through unchanged.

use ark_ec::{AffineRepr, CurveGroup};
use ark_ff::{Field, PrimeField, Zero};

use crate::curves::{hash_to_curve, secp_coordinates, Scalar, SecpAffine, SecpScalar};
use crate::ecdsa::{SignatureInstance, NUM_STATEMENT_VALUES};
use crate::error::{EcdsaFoldError, Result};
use crate::gadget::{scalar_mul_signed, to_bits_strict, AllocatedPoint, Num};
use crate::poseidon::{PoseidonConstants, PoseidonRO, PoseidonROGadget};
use crate::r1cs::{ConstraintSystem, LinearCombination};

const OFFSET_DOMAIN: &[u8] = b"ecdsa_fold/circuit/offsets";

/// Size of a circuit before and after padding.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CircuitSummary {
    pub num_constraints: usize,
    pub num_aux: usize,
    pub num_inputs: usize,
    pub padded_constraints: usize,
    pub padded_vars: usize,
}

/// A function `z_{i+1} = F(z_i)` proven once per recursion step.
pub trait StepCircuit<F: PrimeField> {
    /// Length of the state vector.
    fn arity(&self) -> usize;

    fn synthesize<CS: ConstraintSystem<F>>(&self, cs: &mut CS, z: &[Num<F>]) -> Vec<Num<F>>;
}

/// Identity step for the secondary circuit.
#[derive(Clone, Copy, Debug, Default)]
pub struct TrivialStep;

impl<F: PrimeField> StepCircuit<F> for TrivialStep {
    fn arity(&self) -> usize {
        1
    }

    fn synthesize<CS: ConstraintSystem<F>>(&self, _cs: &mut CS, z: &[Num<F>]) -> Vec<Num<F>> {
        z.to_vec()
    }
}

/// Offset points of the three scalar multiplications and the correction `K`.
#[derive(Clone, Debug)]
struct Offsets {
    h: [(Scalar, Scalar); 3],
    k: (Scalar, Scalar),
}

impl Offsets {
    fn derive() -> Result<Self> {
        let points: [SecpAffine; 3] = [
            hash_to_curve::<ark_secp256k1::Config>(OFFSET_DOMAIN, 0),
            hash_to_curve::<ark_secp256k1::Config>(OFFSET_DOMAIN, 1),
            hash_to_curve::<ark_secp256k1::Config>(OFFSET_DOMAIN, 2),
        ];
        let two_256 = SecpScalar::from(2u64).pow([256u64]);
        let k = ((points[1] + points[2] - points[0]) * two_256).into_affine();

        let coords = |p: &SecpAffine| {
            secp_coordinates(p).ok_or_else(|| {
                EcdsaFoldError::MalformedState("circuit offset is the point at infinity".to_string())
            })
        };
        Ok(Self {
            h: [coords(&points[0])?, coords(&points[1])?, coords(&points[2])?],
            k: coords(&k)?,
        })
    }
}

/// Values of one step: the statement values in circuit order plus the nonce point.
#[derive(Clone, Debug)]
struct StepAssignment {
    values: [Scalar; NUM_STATEMENT_VALUES],
    nonce: (Scalar, Scalar),
}

impl StepAssignment {
    /// All-zero values, used to record the shape.
    fn blank() -> Self {
        Self {
            values: [Scalar::zero(); NUM_STATEMENT_VALUES],
            nonce: (Scalar::zero(), Scalar::zero()),
        }
    }

    fn from_instance(instance: &SignatureInstance) -> Result<Self> {
        let values: [Scalar; NUM_STATEMENT_VALUES] =
            instance.statement_values()?.try_into().map_err(|_| {
                EcdsaFoldError::MalformedState("unexpected number of statement values".to_string())
            })?;
        let nonce = instance
            .nonce_point()
            .and_then(|p| secp_coordinates(&p))
            .unwrap_or((Scalar::zero(), Scalar::zero()));
        Ok(Self { values, nonce })
    }
}

/// Fixed data of the signature check.
#[derive(Clone, Debug)]
pub struct EcdsaCircuit {
    offsets: Offsets,
}

impl EcdsaCircuit {
    pub fn new() -> Result<Self> {
        Ok(Self {
            offsets: Offsets::derive()?,
        })
    }

    /// The step that records the shape.
    pub fn blank_step<'a>(&'a self, poseidon: &'a PoseidonConstants<Scalar>) -> EcdsaStep<'a> {
        EcdsaStep {
            circuit: self,
            poseidon,
            assignment: StepAssignment::blank(),
        }
    }

    /// The step for one signature. Fails with `InvalidSignature { index }`
    /// unless the signature verifies natively.
    pub fn step<'a>(
        &'a self,
        poseidon: &'a PoseidonConstants<Scalar>,
        instance: &SignatureInstance,
        index: usize,
    ) -> Result<EcdsaStep<'a>> {
        if !instance.verify() {
            return Err(EcdsaFoldError::InvalidSignature { index });
        }
        Ok(EcdsaStep {
            circuit: self,
            poseidon,
            assignment: StepAssignment::from_instance(instance)?,
        })
    }

    fn enforce_signature<CS: ConstraintSystem<Scalar>>(
        &self,
        cs: &mut CS,
        values: &[Num<Scalar>],
        nonce: (Scalar, Scalar),
    ) {
        let q = AllocatedPoint {
            x: values[0].clone(),
            y: values[1].clone(),
        };
        let (r, r_alt, s_rec, z_rec, r_rec) = (&values[2], &values[3], &values[4], &values[5], &values[6]);

        let nonce = AllocatedPoint::alloc(cs, nonce.0, nonce.1);
        nonce.enforce_on_curve(cs);
        q.enforce_on_curve(cs);

        // (x(R) - r)(x(R) - r_alt) = 0
        cs.enforce(
            nonce.x.sub(r).lc(),
            nonce.x.sub(r_alt).lc(),
            LinearCombination::zero(),
        );

        let s_bits = to_bits_strict(cs, s_rec);
        let z_bits = to_bits_strict(cs, z_rec);
        let r_bits = to_bits_strict(cs, r_rec);

        let offset = |i: usize| AllocatedPoint::constant(self.offsets.h[i].0, self.offsets.h[i].1);
        let (gx, gy) = generator_coordinates();
        let generator = AllocatedPoint::constant(gx, gy);

        let a = scalar_mul_signed(cs, &s_bits, &nonce, &offset(0));
        let b = scalar_mul_signed(cs, &z_bits, &generator, &offset(1));
        let c = scalar_mul_signed(cs, &r_bits, &q, &offset(2));

        let correction = AllocatedPoint::constant(self.offsets.k.0, self.offsets.k.1);
        let lhs = a.add(cs, &correction);
        let rhs = b.add(cs, &c);
        lhs.enforce_equal(cs, &rhs);
    }
}

/// One signature check plus the chain update.
#[derive(Clone, Debug)]
pub struct EcdsaStep<'a> {
    circuit: &'a EcdsaCircuit,
    poseidon: &'a PoseidonConstants<Scalar>,
    assignment: StepAssignment,
}

impl StepCircuit<Scalar> for EcdsaStep<'_> {
    fn arity(&self) -> usize {
        1
    }

    fn synthesize<CS: ConstraintSystem<Scalar>>(&self, cs: &mut CS, z: &[Num<Scalar>]) -> Vec<Num<Scalar>> {
        let values: Vec<Num<Scalar>> = self
            .assignment
            .values
            .iter()
            .map(|v| Num::alloc(cs, *v))
            .collect();
        self.circuit.enforce_signature(cs, &values, self.assignment.nonce);

        let mut ro = PoseidonROGadget::new(self.poseidon);
        z.iter().for_each(|e| ro.absorb(e));
        values.iter().for_each(|v| ro.absorb(v));
        vec![ro.squeeze(cs)]
    }
}

/// Starting value of the statement chain.
pub fn chain_seed() -> Scalar {
    Scalar::zero()
}

/// Native counterpart of the chain update in [`EcdsaStep`].
pub fn chain_step(
    poseidon: &PoseidonConstants<Scalar>,
    z: &Scalar,
    instance: &SignatureInstance,
) -> Result<Scalar> {
    let mut ro = PoseidonRO::new(poseidon);
    ro.absorb(*z);
    for value in instance.statement_values()? {
        ro.absorb(value);
    }
    Ok(ro.squeeze())
}

/// Chain value after every signature of a batch, in order.
pub fn chain_digest(poseidon: &PoseidonConstants<Scalar>, instances: &[SignatureInstance]) -> Result<Scalar> {
    instances
        .iter()
        .try_fold(chain_seed(), |z, instance| chain_step(poseidon, &z, instance))
}

fn generator_coordinates() -> (Scalar, Scalar) {
    let g = SecpAffine::generator();
    (g.x, g.y)
}
