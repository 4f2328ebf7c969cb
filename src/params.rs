//! Public parameters: the shapes of both augmented circuits and a transparent
//! commitment key on each curve of the cycle.
//!
//! Setup draws a 32-byte seed and derives every Pedersen generator from it by
//! hashing to the curve. No trapdoor is produced, and two independent setups
//! differ in their seed, hence in their digest.

use num_bigint::BigUint;
use rand_core::{CryptoRng, RngCore};
use std::time::Instant;
use tracing::{debug, info};

use crate::augmented::{AugmentedCircuit, AugmentedInputs, HASH_BITS};
use crate::circuit::{CircuitSummary, EcdsaCircuit, TrivialStep};
use crate::codec::{
    decode_envelope, encode_envelope, ensure_consumed, read_point, read_vec, write_point,
    write_vec, PayloadKind,
};
use crate::commitment::CommitmentKey;
use crate::curves::{CycleCurve, Scalar, Secp, SecpScalar, Secq};
use crate::error::{EcdsaFoldError, Result};
use crate::poseidon::PoseidonConstants;
use crate::r1cs::{R1CSShape, ShapeCS};

/// Everything the prover and verifier share.
#[derive(Clone, Debug)]
pub struct PublicParameters {
    circuit: EcdsaCircuit,
    poseidon_primary: PoseidonConstants<Scalar>,
    poseidon_secondary: PoseidonConstants<SecpScalar>,
    shape_primary: R1CSShape<Scalar>,
    summary_primary: CircuitSummary,
    shape_secondary: R1CSShape<SecpScalar>,
    summary_secondary: CircuitSummary,
    ck_primary: CommitmentKey<Secq>,
    ck_secondary: CommitmentKey<Secp>,
    seed: [u8; 32],
    circuit_digest: [u8; 32],
    digest: [u8; 32],
}

/// Shapes and constants that depend only on the circuit, never on the seed.
struct CircuitData {
    circuit: EcdsaCircuit,
    poseidon_primary: PoseidonConstants<Scalar>,
    poseidon_secondary: PoseidonConstants<SecpScalar>,
    shape_primary: R1CSShape<Scalar>,
    summary_primary: CircuitSummary,
    shape_secondary: R1CSShape<SecpScalar>,
    summary_secondary: CircuitSummary,
    circuit_digest: [u8; 32],
}

impl CircuitData {
    fn synthesize() -> Result<Self> {
        let circuit = EcdsaCircuit::new()?;
        let poseidon_primary = PoseidonConstants::<Scalar>::new();
        let poseidon_secondary = PoseidonConstants::<SecpScalar>::new();

        let step = circuit.blank_step(&poseidon_primary);
        let (shape_primary, summary_primary) = record_shape(|cs| {
            AugmentedCircuit::<Secp, _>::new(true, &poseidon_primary, &step, AugmentedInputs::blank(1))
                .synthesize(cs)
                .map(|_| ())
        })?;
        let (shape_secondary, summary_secondary) = record_shape(|cs| {
            AugmentedCircuit::<Secq, _>::new(
                false,
                &poseidon_secondary,
                &TrivialStep,
                AugmentedInputs::blank(1),
            )
            .synthesize(cs)
            .map(|_| ())
        })?;

        let mut hasher = blake3::Hasher::new();
        hasher.update(b"ecdsa_fold/circuits");
        hasher.update(&shape_primary.digest());
        hasher.update(&shape_secondary.digest());
        let circuit_digest = *hasher.finalize().as_bytes();

        Ok(Self {
            circuit,
            poseidon_primary,
            poseidon_secondary,
            shape_primary,
            summary_primary,
            shape_secondary,
            summary_secondary,
            circuit_digest,
        })
    }

    fn with_keys(
        self,
        seed: [u8; 32],
        ck_primary: CommitmentKey<Secq>,
        ck_secondary: CommitmentKey<Secp>,
        digest: [u8; 32],
    ) -> PublicParameters {
        PublicParameters {
            circuit: self.circuit,
            poseidon_primary: self.poseidon_primary,
            poseidon_secondary: self.poseidon_secondary,
            shape_primary: self.shape_primary,
            summary_primary: self.summary_primary,
            shape_secondary: self.shape_secondary,
            summary_secondary: self.summary_secondary,
            ck_primary,
            ck_secondary,
            seed,
            circuit_digest: self.circuit_digest,
            digest,
        }
    }
}

fn record_shape<F, S>(synthesize: S) -> Result<(R1CSShape<F>, CircuitSummary)>
where
    F: ark_ff::PrimeField,
    S: FnOnce(&mut ShapeCS<F>) -> Result<()>,
{
    let mut cs = ShapeCS::new();
    synthesize(&mut cs)?;
    let shape = R1CSShape::from_shape_cs(&cs)?;
    let summary = CircuitSummary {
        num_constraints: cs.num_constraints(),
        num_aux: cs.num_aux(),
        num_inputs: cs.num_inputs(),
        padded_constraints: shape.num_cons(),
        padded_vars: shape.num_vars(),
    };
    Ok((shape, summary))
}

impl PublicParameters {
    /// Fresh parameters from a random seed.
    pub fn setup<R: RngCore + CryptoRng>(rng: &mut R) -> Result<Self> {
        let mut seed = [0u8; 32];
        rng.fill_bytes(&mut seed);
        Self::setup_with_seed(seed)
    }

    /// Deterministic parameters for a given seed.
    pub fn setup_with_seed(seed: [u8; 32]) -> Result<Self> {
        let start = Instant::now();
        let data = CircuitData::synthesize()?;
        let ck_primary = CommitmentKey::setup(&seed, key_length(&data.shape_primary));
        let ck_secondary = CommitmentKey::setup(&seed, key_length(&data.shape_secondary));
        let digest = params_digest(&data.circuit_digest, &seed, &ck_primary, &ck_secondary)?;
        info!(
            primary_constraints = data.summary_primary.num_constraints,
            primary_variables = data.summary_primary.num_aux,
            secondary_constraints = data.summary_secondary.num_constraints,
            secondary_variables = data.summary_secondary.num_aux,
            padded_primary = data.shape_primary.num_cons(),
            padded_secondary = data.shape_secondary.num_cons(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Public parameters generated"
        );
        Ok(data.with_keys(seed, ck_primary, ck_secondary, digest))
    }

    pub fn circuit(&self) -> &EcdsaCircuit {
        &self.circuit
    }

    pub fn poseidon_primary(&self) -> &PoseidonConstants<Scalar> {
        &self.poseidon_primary
    }

    pub fn poseidon_secondary(&self) -> &PoseidonConstants<SecpScalar> {
        &self.poseidon_secondary
    }

    pub fn shape_primary(&self) -> &R1CSShape<Scalar> {
        &self.shape_primary
    }

    pub fn shape_secondary(&self) -> &R1CSShape<SecpScalar> {
        &self.shape_secondary
    }

    /// Commits primary witnesses.
    pub fn ck_primary(&self) -> &CommitmentKey<Secq> {
        &self.ck_primary
    }

    /// Commits secondary witnesses.
    pub fn ck_secondary(&self) -> &CommitmentKey<Secp> {
        &self.ck_secondary
    }

    pub fn seed(&self) -> &[u8; 32] {
        &self.seed
    }

    pub fn summary_primary(&self) -> &CircuitSummary {
        &self.summary_primary
    }

    pub fn summary_secondary(&self) -> &CircuitSummary {
        &self.summary_secondary
    }

    pub fn circuit_digest(&self) -> &[u8; 32] {
        &self.circuit_digest
    }

    /// Digest binding both circuits, the seed and both commitment keys.
    pub fn digest(&self) -> &[u8; 32] {
        &self.digest
    }

    /// The digest as a field element: its low [`HASH_BITS`] bits, which name
    /// the same integer in both fields of the cycle.
    pub fn digest_scalar<F: ark_ff::PrimeField>(&self) -> F {
        let mask = (BigUint::from(1u8) << HASH_BITS) - BigUint::from(1u8);
        F::from(BigUint::from_bytes_le(&self.digest) & mask)
    }

    /// Constraints of the primary circuit before padding.
    pub fn num_constraints(&self) -> usize {
        self.summary_primary.num_constraints
    }

    pub fn num_variables(&self) -> usize {
        self.summary_primary.num_aux
    }

    pub fn num_public_inputs(&self) -> usize {
        self.summary_primary.num_inputs
    }

    /// Re-derives both commitment keys from the seed and compares.
    pub fn verify_setup(&self) -> bool {
        let primary = CommitmentKey::<Secq>::setup(&self.seed, key_length(&self.shape_primary));
        if primary != self.ck_primary {
            return false;
        }
        let secondary = CommitmentKey::<Secp>::setup(&self.seed, key_length(&self.shape_secondary));
        secondary == self.ck_secondary
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut body = Vec::with_capacity(96 + 33 * (self.ck_primary.len() + self.ck_secondary.len()));
        body.extend_from_slice(&self.circuit_digest);
        body.extend_from_slice(&self.seed);
        body.extend_from_slice(&key_bytes(&self.ck_primary)?);
        body.extend_from_slice(&key_bytes(&self.ck_secondary)?);
        body.extend_from_slice(&self.digest);
        Ok(encode_envelope(PayloadKind::Parameters, &body))
    }

    /// Decodes parameters and checks them against this build's circuits and
    /// against the seed. Every failure is reported as `InvalidParameters`.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Self::decode(bytes).map_err(|err| match err {
            invalid @ EcdsaFoldError::InvalidParameters(_) => invalid,
            other => EcdsaFoldError::InvalidParameters(other.to_string()),
        })
    }

    fn decode(bytes: &[u8]) -> Result<Self> {
        let mut reader = decode_envelope(PayloadKind::Parameters, bytes)?;
        let circuit_digest = read_array(&mut reader)?;
        let seed = read_array(&mut reader)?;
        let ck_primary = read_key::<Secq>(&mut reader)?;
        let ck_secondary = read_key::<Secp>(&mut reader)?;
        let digest = read_array(&mut reader)?;
        ensure_consumed(reader)?;

        let data = CircuitData::synthesize()?;
        if data.circuit_digest != circuit_digest {
            return Err(EcdsaFoldError::InvalidParameters(
                "parameters were generated for a different circuit".to_string(),
            ));
        }
        check_key_length(ck_primary.len(), &data.shape_primary, Secq::NAME)?;
        check_key_length(ck_secondary.len(), &data.shape_secondary, Secp::NAME)?;
        if params_digest(&circuit_digest, &seed, &ck_primary, &ck_secondary)? != digest {
            return Err(EcdsaFoldError::InvalidParameters(
                "parameter digest mismatch".to_string(),
            ));
        }

        let params = data.with_keys(seed, ck_primary, ck_secondary, digest);
        if !params.verify_setup() {
            return Err(EcdsaFoldError::InvalidParameters(
                "commitment keys were not derived from the seed".to_string(),
            ));
        }
        debug!(digest = %hex::encode(digest), "Public parameters decoded");
        Ok(params)
    }
}

fn key_length<F: ark_ff::PrimeField>(shape: &R1CSShape<F>) -> usize {
    shape.num_vars().max(shape.num_cons())
}

fn check_key_length<F: ark_ff::PrimeField>(len: usize, shape: &R1CSShape<F>, curve: &str) -> Result<()> {
    if len != key_length(shape) {
        return Err(EcdsaFoldError::InvalidParameters(format!(
            "{} commitment key has {} generators, circuit needs {}",
            curve,
            len,
            key_length(shape)
        )));
    }
    Ok(())
}

fn key_bytes<G: CycleCurve>(ck: &CommitmentKey<G>) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(4 + 33 * (ck.len() + 1));
    write_vec(&mut out, ck.gens(), write_point::<G>)?;
    write_point::<G>(&mut out, ck.h())?;
    Ok(out)
}

fn read_key<G: CycleCurve>(reader: &mut &[u8]) -> Result<CommitmentKey<G>> {
    let gens = read_vec(reader, 32, read_point::<G>)?;
    let h = read_point::<G>(reader)?;
    Ok(CommitmentKey::from_parts(gens, h))
}

fn read_array(reader: &mut &[u8]) -> Result<[u8; 32]> {
    if reader.len() < 32 {
        return Err(EcdsaFoldError::InvalidParameters(
            "truncated parameters".to_string(),
        ));
    }
    let (head, rest) = reader.split_at(32);
    let mut out = [0u8; 32];
    out.copy_from_slice(head);
    *reader = rest;
    Ok(out)
}

fn params_digest(
    circuit_digest: &[u8; 32],
    seed: &[u8; 32],
    ck_primary: &CommitmentKey<Secq>,
    ck_secondary: &CommitmentKey<Secp>,
) -> Result<[u8; 32]> {
    let mut hasher = blake3::Hasher::new();
    hasher.update(b"ecdsa_fold/params");
    hasher.update(circuit_digest);
    hasher.update(seed);
    hasher.update(&key_bytes(ck_primary)?);
    hasher.update(&key_bytes(ck_secondary)?);
    Ok(*hasher.finalize().as_bytes())
}
