//! Nova-style incrementally verifiable folding of ECDSA steps.
//!
//! Two augmented circuits run in lockstep over the curve cycle. Step `i` of
//! the primary circuit checks signature `i` and folds the last secondary
//! instance into the running secondary instance; step `i` of the secondary
//! circuit folds the new primary instance into the running primary instance.
//! Natively the prover mirrors each in-circuit fold with [`Nifs::prove`]:
//!
//! ```text
//! comm_W ← comm_W + r·comm_W'     W ← W + r·W'
//! comm_E ← comm_E + r·comm_T      E ← E + r·T
//! u ← u + r                       x ← x + r·x'
//! ```
//!
//! After `n` steps the state is three instance/witness pairs of fixed size,
//! whatever `n` is: the running primary pair, the running secondary pair and
//! the last secondary instance, whose public outputs hash both running
//! instances together with `n` and the statement chain.

use std::time::Instant;

use ark_ff::Zero;
use tracing::{debug, info, warn};

use crate::augmented::{AugmentedCircuit, AugmentedInputs, CHALLENGE_BITS, NUM_IO};
use crate::circuit::{chain_seed, StepCircuit, TrivialStep};
use crate::commitment::{Commitment, CommitmentKey};
use crate::compression::{compress, CompressedProof};
use crate::curves::{CycleCurve, Scalar, Secp, SecpScalar, Secq};
use crate::ecdsa::SignatureInstance;
use crate::error::{EcdsaFoldError, Result};
use crate::params::PublicParameters;
use crate::poseidon::{PoseidonConstants, PoseidonRO};
use crate::r1cs::{
    R1CSInstance, R1CSShape, R1CSWitness, RelaxedR1CSInstance, RelaxedR1CSWitness, WitnessCS,
};

/// The non-interactive folding scheme for instances committed on `G`.
///
/// The challenge comes from Poseidon over `G::Base`, the field of the circuit
/// that repeats the fold, so prover and circuit derive the same `r`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Nifs<G: CycleCurve> {
    pub comm_t: Commitment<G>,
}

impl<G: CycleCurve> Nifs<G> {
    pub fn challenge(
        poseidon: &PoseidonConstants<G::Base>,
        params_digest: G::Base,
        running: &RelaxedR1CSInstance<G>,
        fresh: &R1CSInstance<G>,
        comm_t: &Commitment<G>,
    ) -> G::Scalar {
        let mut ro = PoseidonRO::new(poseidon);
        ro.absorb(params_digest);
        running.absorb_in_ro(&mut ro);
        fresh.absorb_in_ro(&mut ro);
        comm_t.absorb_in_ro(&mut ro);
        ro.squeeze_truncated(CHALLENGE_BITS)
    }

    /// Folds `(fresh, fresh_witness)` into the running pair.
    #[allow(clippy::too_many_arguments)]
    pub fn prove(
        ck: &CommitmentKey<G>,
        poseidon: &PoseidonConstants<G::Base>,
        params_digest: G::Base,
        shape: &R1CSShape<G::Scalar>,
        running: &RelaxedR1CSInstance<G>,
        running_witness: RelaxedR1CSWitness<G::Scalar>,
        fresh: &R1CSInstance<G>,
        fresh_witness: &R1CSWitness<G::Scalar>,
    ) -> Result<(Self, RelaxedR1CSInstance<G>, RelaxedR1CSWitness<G::Scalar>)> {
        let (t, comm_t) = shape.commit_t(ck, running, &running_witness, fresh, fresh_witness)?;
        let r = Self::challenge(poseidon, params_digest, running, fresh, &comm_t);
        let instance = running.fold(fresh, &comm_t, &r)?;
        let witness = running_witness.fold(fresh_witness, &t, &r)?;
        Ok((Self { comm_t }, instance, witness))
    }

    /// Folds the public side only.
    pub fn verify(
        &self,
        poseidon: &PoseidonConstants<G::Base>,
        params_digest: G::Base,
        running: &RelaxedR1CSInstance<G>,
        fresh: &R1CSInstance<G>,
    ) -> Result<RelaxedR1CSInstance<G>> {
        let r = Self::challenge(poseidon, params_digest, running, fresh, &self.comm_t);
        running.fold(fresh, &self.comm_t, &r)
    }
}

/// Runs one augmented circuit and commits its witness on `C`.
fn synthesize_step<G, C, SC>(
    ck: &CommitmentKey<C>,
    shape: &R1CSShape<G::Base>,
    circuit: AugmentedCircuit<'_, G, SC>,
) -> Result<(R1CSInstance<C>, R1CSWitness<G::Base>, Vec<G::Base>)>
where
    G: CycleCurve,
    C: CycleCurve<Scalar = G::Base>,
    SC: StepCircuit<G::Base>,
{
    let mut cs = WitnessCS::new();
    let z_next = circuit.synthesize(&mut cs)?;
    let (witness, x) = cs.into_assignment(shape)?;
    let comm_w = ck.commit(&witness.w)?;
    let z_next = z_next.iter().map(|z| z.value()).collect();
    Ok((R1CSInstance { comm_w, x }, witness, z_next))
}

/// The recursion state after `steps` folded signatures.
///
/// Passed by value from one step to the next.
#[derive(Clone, Debug)]
pub struct FoldingState {
    steps: usize,
    zi: Vec<Scalar>,
    r_u_primary: RelaxedR1CSInstance<Secq>,
    r_w_primary: RelaxedR1CSWitness<Scalar>,
    r_u_secondary: RelaxedR1CSInstance<Secp>,
    r_w_secondary: RelaxedR1CSWitness<SecpScalar>,
    l_u_secondary: R1CSInstance<Secp>,
    l_w_secondary: R1CSWitness<SecpScalar>,
}

impl FoldingState {
    /// Runs both circuits in their base case for the first signature.
    fn base(params: &PublicParameters, step: &impl StepCircuit<Scalar>) -> Result<Self> {
        let mut inputs = AugmentedInputs::<Secp>::blank(1);
        inputs.params_digest = params.digest_scalar();
        inputs.z0 = vec![chain_seed()];
        let circuit = AugmentedCircuit::new(true, params.poseidon_primary(), step, inputs);
        let (u_primary, w_primary, zi) = synthesize_step(params.ck_primary(), params.shape_primary(), circuit)?;

        let mut inputs = AugmentedInputs::<Secq>::blank(1);
        inputs.params_digest = params.digest_scalar();
        inputs.fresh = Some(u_primary.clone());
        let circuit = AugmentedCircuit::new(false, params.poseidon_secondary(), &TrivialStep, inputs);
        let (u_secondary, w_secondary, _) =
            synthesize_step(params.ck_secondary(), params.shape_secondary(), circuit)?;

        Ok(Self {
            steps: 1,
            zi,
            r_u_primary: RelaxedR1CSInstance::from_r1cs_instance(&u_primary),
            r_w_primary: RelaxedR1CSWitness::from_r1cs_witness(w_primary, params.shape_primary().num_cons()),
            r_u_secondary: RelaxedR1CSInstance::empty(NUM_IO),
            r_w_secondary: RelaxedR1CSWitness::empty(params.shape_secondary()),
            l_u_secondary: u_secondary,
            l_w_secondary: w_secondary,
        })
    }

    /// Proves step `self.steps` of both circuits.
    fn advance(self, params: &PublicParameters, step: &impl StepCircuit<Scalar>) -> Result<Self> {
        let i = self.steps as u64;
        let digest_primary: Scalar = params.digest_scalar();
        let digest_secondary: SecpScalar = params.digest_scalar();

        let (nifs_secondary, r_u_secondary, r_w_secondary) = Nifs::prove(
            params.ck_secondary(),
            params.poseidon_primary(),
            digest_primary,
            params.shape_secondary(),
            &self.r_u_secondary,
            self.r_w_secondary,
            &self.l_u_secondary,
            &self.l_w_secondary,
        )?;
        let inputs = AugmentedInputs::<Secp> {
            params_digest: digest_primary,
            i: Scalar::from(i),
            z0: vec![chain_seed()],
            zi: Some(self.zi),
            running: Some(self.r_u_secondary),
            fresh: Some(self.l_u_secondary),
            comm_t: Some(nifs_secondary.comm_t),
        };
        let circuit = AugmentedCircuit::new(true, params.poseidon_primary(), step, inputs);
        let (l_u_primary, l_w_primary, zi) =
            synthesize_step(params.ck_primary(), params.shape_primary(), circuit)?;

        let (nifs_primary, r_u_primary, r_w_primary) = Nifs::prove(
            params.ck_primary(),
            params.poseidon_secondary(),
            digest_secondary,
            params.shape_primary(),
            &self.r_u_primary,
            self.r_w_primary,
            &l_u_primary,
            &l_w_primary,
        )?;
        let inputs = AugmentedInputs::<Secq> {
            params_digest: digest_secondary,
            i: SecpScalar::from(i),
            z0: vec![SecpScalar::zero()],
            zi: Some(vec![SecpScalar::zero()]),
            running: Some(self.r_u_primary),
            fresh: Some(l_u_primary),
            comm_t: Some(nifs_primary.comm_t),
        };
        let circuit = AugmentedCircuit::new(false, params.poseidon_secondary(), &TrivialStep, inputs);
        let (l_u_secondary, l_w_secondary, _) =
            synthesize_step(params.ck_secondary(), params.shape_secondary(), circuit)?;

        Ok(Self {
            steps: self.steps + 1,
            zi,
            r_u_primary,
            r_w_primary,
            r_u_secondary,
            r_w_secondary,
            l_u_secondary,
            l_w_secondary,
        })
    }

    pub fn steps(&self) -> usize {
        self.steps
    }

    /// Statement chain value after the folded signatures.
    pub fn chain_value(&self) -> Scalar {
        self.zi.first().copied().unwrap_or_else(chain_seed)
    }

    pub fn running_primary(&self) -> (&RelaxedR1CSInstance<Secq>, &RelaxedR1CSWitness<Scalar>) {
        (&self.r_u_primary, &self.r_w_primary)
    }

    #[cfg(test)]
    pub(crate) fn running_primary_mut(
        &mut self,
    ) -> (&mut RelaxedR1CSInstance<Secq>, &mut RelaxedR1CSWitness<Scalar>) {
        (&mut self.r_u_primary, &mut self.r_w_primary)
    }

    pub fn running_secondary(&self) -> (&RelaxedR1CSInstance<Secp>, &RelaxedR1CSWitness<SecpScalar>) {
        (&self.r_u_secondary, &self.r_w_secondary)
    }

    pub fn last_secondary(&self) -> (&R1CSInstance<Secp>, &R1CSWitness<SecpScalar>) {
        (&self.l_u_secondary, &self.l_w_secondary)
    }
}

/// The uncompressed result of folding. Its size depends on the circuits,
/// not on the number of signatures.
#[derive(Clone, Debug)]
pub struct IvcProof {
    pub params_digest: [u8; 32],
    pub state: FoldingState,
}

impl IvcProof {
    pub fn num_steps(&self) -> usize {
        self.state.steps
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Empty,
    Folding { steps: usize },
    Folded,
    Compressed,
    Failed,
}

/// One proving session over a fixed parameter set.
///
/// `Empty → Folding(k) → Folded → Compressed`. A failed fold, finish or
/// compression moves the session to `Failed`, after which every call returns
/// `MalformedState`. Out-of-order calls are refused without a state change.
pub struct ProofSession<'a> {
    params: &'a PublicParameters,
    state: SessionState,
    running: Option<FoldingState>,
    ivc: Option<IvcProof>,
}

impl<'a> ProofSession<'a> {
    pub fn new(params: &'a PublicParameters) -> Self {
        Self {
            params,
            state: SessionState::Empty,
            running: None,
            ivc: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn ivc_proof(&self) -> Option<&IvcProof> {
        self.ivc.as_ref()
    }

    fn fail(&mut self, err: EcdsaFoldError) -> EcdsaFoldError {
        warn!(error = %err, "Proof session failed");
        self.state = SessionState::Failed;
        self.running = None;
        self.ivc = None;
        err
    }

    fn illegal(&self, operation: &str) -> EcdsaFoldError {
        EcdsaFoldError::MalformedState(format!("cannot {} in state {:?}", operation, self.state))
    }

    /// Folds the next signature.
    pub fn fold_step(&mut self, signature: &SignatureInstance) -> Result<()> {
        let index = match self.state {
            SessionState::Empty => 0,
            SessionState::Folding { steps } => steps,
            _ => return Err(self.illegal("fold a step")),
        };
        match self.fold_step_inner(index, signature) {
            Ok(()) => {
                self.state = SessionState::Folding { steps: index + 1 };
                Ok(())
            }
            Err(err) => Err(self.fail(err)),
        }
    }

    fn fold_step_inner(&mut self, index: usize, signature: &SignatureInstance) -> Result<()> {
        let params = self.params;
        let start = Instant::now();
        let step = params
            .circuit()
            .step(params.poseidon_primary(), signature, index)?;

        let next = match self.running.take() {
            None => FoldingState::base(params, &step)?,
            Some(running) => running.advance(params, &step)?,
        };
        self.running = Some(next);
        debug!(
            step = index,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Folded signature"
        );
        Ok(())
    }

    /// Ends folding. An empty session fails with `EmptyInput`.
    pub fn finish(&mut self) -> Result<()> {
        match self.state {
            SessionState::Folding { .. } => {}
            SessionState::Empty => return Err(self.fail(EcdsaFoldError::EmptyInput)),
            _ => return Err(self.illegal("finish folding")),
        }
        let Some(state) = self.running.take() else {
            let err = EcdsaFoldError::MalformedState("no running instance".to_string());
            return Err(self.fail(err));
        };
        self.ivc = Some(IvcProof {
            params_digest: *self.params.digest(),
            state,
        });
        self.state = SessionState::Folded;
        Ok(())
    }

    /// Produces the compressed proof.
    pub fn compress(&mut self) -> Result<CompressedProof> {
        if self.state != SessionState::Folded {
            return Err(self.illegal("compress"));
        }
        let Some(ivc) = self.ivc.as_ref() else {
            let err = EcdsaFoldError::MalformedState("folded session without proof".to_string());
            return Err(self.fail(err));
        };
        match compress(self.params, ivc) {
            Ok(proof) => {
                self.state = SessionState::Compressed;
                Ok(proof)
            }
            Err(err) => Err(self.fail(err)),
        }
    }

    /// Takes the raw folding proof out of a folded or compressed session.
    pub fn into_ivc_proof(self) -> Result<IvcProof> {
        match (self.state, self.ivc) {
            (SessionState::Folded | SessionState::Compressed, Some(ivc)) => Ok(ivc),
            (state, _) => Err(EcdsaFoldError::MalformedState(format!(
                "no folding proof in state {:?}",
                state
            ))),
        }
    }
}

/// Folds `instances` in order.
pub fn fold(params: &PublicParameters, instances: &[SignatureInstance]) -> Result<IvcProof> {
    let start = Instant::now();
    let mut session = ProofSession::new(params);
    for signature in instances {
        session.fold_step(signature)?;
    }
    session.finish()?;
    let ivc = session.into_ivc_proof()?;
    info!(
        steps = ivc.num_steps(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "Folding complete"
    );
    Ok(ivc)
}
