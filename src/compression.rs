//! Compression of the recursion state into a succinct argument.
//!
//! Mathematical Foundation:
//! A running instance `(comm_W, comm_E, u, x)` is satisfied when
//! `Az ◦ Bz = u·Cz + E` with `z = (W, u, x)`. Following Spartan:
//!
//! 1. Outer sumcheck over the rows, for random `τ`:
//!    `0 = Σ_x eq(τ, x)·(Az(x)·Bz(x) - u·Cz(x) - E(x))`, ending at `r_x`.
//! 2. The prover claims `Az(r_x), Bz(r_x), Cz(r_x)` and `E(r_x)`.
//! 3. Inner sumcheck over the columns, for random `r`:
//!    `Az(r_x) + r·Bz(r_x) + r²·Cz(r_x) = Σ_y (A + rB + r²C)(r_x, y)·z(y)`,
//!    ending at `r_y`.
//! 4. `z(r_y) = (1 - r_y[0])·W(r_y[1..]) + r_y[0]·(u, x)(r_y[1..])`. The
//!    verifier evaluates the matrices and the public part itself.
//! 5. Inner-product openings bind `W(r_y[1..])` to `comm_W` and `E(r_x)` to
//!    `comm_E`.
//!
//! A [`CompressedProof`] carries the running primary instance, the running
//! and last secondary instances, one fold of the last into the running
//! secondary instance, and one such argument per curve. Every part has a size
//! fixed by the circuits, so the proof does not grow with the number of
//! signatures.

use std::time::Instant;

use ark_ff::{One, Zero};
use merlin::Transcript;
use tracing::{debug, info};

use crate::augmented::NUM_IO;
use crate::codec::{
    decode_envelope, encode_envelope, ensure_consumed, read_commitment, read_r1cs_instance,
    read_relaxed_instance, read_scalar, write_commitment, write_r1cs_instance,
    write_relaxed_instance, write_scalar, PayloadKind,
};
use crate::commitment::CommitmentKey;
use crate::curves::{CycleCurve, Scalar, Secp, Secq};
use crate::error::{EcdsaFoldError, Result};
use crate::folding::{IvcProof, Nifs};
use crate::ipa::InnerProductProof;
use crate::params::PublicParameters;
use crate::polynomial::{evaluate_table, EqPolynomial};
use crate::r1cs::{R1CSInstance, R1CSShape, RelaxedR1CSInstance, RelaxedR1CSWitness};
use crate::sumcheck::SumcheckProof;
use crate::transcript::TranscriptProtocol;

const SNARK_DOMAIN: &[u8] = b"ecdsa_fold_snark";

/// Spartan-style argument of knowledge for a relaxed R1CS instance whose
/// witness is committed on `G`.
#[derive(Clone, Debug, PartialEq)]
pub struct RelaxedR1CSSnark<G: CycleCurve> {
    outer: SumcheckProof<G::Scalar>,
    eval_az: G::Scalar,
    eval_bz: G::Scalar,
    eval_cz: G::Scalar,
    eval_e: G::Scalar,
    inner: SumcheckProof<G::Scalar>,
    eval_w: G::Scalar,
    open_w: InnerProductProof<G>,
    open_e: InnerProductProof<G>,
}

fn snark_transcript<G: CycleCurve>(params_digest: &[u8; 32], instance: &RelaxedR1CSInstance<G>) -> Transcript {
    let mut transcript = Transcript::new(SNARK_DOMAIN);
    transcript.append_message(b"curve", G::NAME.as_bytes());
    transcript.append_message(b"params_digest", params_digest);
    instance.append_to_transcript(&mut transcript);
    transcript
}

fn log2(n: usize) -> usize {
    n.trailing_zeros() as usize
}

impl<G: CycleCurve> RelaxedR1CSSnark<G> {
    pub fn prove(
        ck: &CommitmentKey<G>,
        shape: &R1CSShape<G::Scalar>,
        params_digest: &[u8; 32],
        instance: &RelaxedR1CSInstance<G>,
        witness: &RelaxedR1CSWitness<G::Scalar>,
    ) -> Result<Self> {
        let mut transcript = snark_transcript(params_digest, instance);

        let num_rounds_x = log2(shape.num_cons());
        let tau = transcript.challenge_vector(b"tau", num_rounds_x);

        let z = shape.build_z(&witness.w, instance.u, &instance.x)?;
        let (az, bz, cz) = shape.multiply_vec(&z)?;
        let eq_tau = EqPolynomial::new(tau).evals();

        let (outer, rx, [eval_az, eval_bz, eval_cz, eval_e]) = SumcheckProof::prove_cubic(
            G::Scalar::zero(),
            eq_tau,
            az,
            bz,
            cz,
            witness.e.clone(),
            instance.u,
            &mut transcript,
        );
        debug!(curve = G::NAME, rounds = outer.num_rounds(), "Outer sumcheck proved");

        transcript.append_scalars(b"claims", &[eval_az, eval_bz, eval_cz, eval_e]);
        let r: G::Scalar = transcript.challenge_scalar(b"r_combine");

        let claim_inner = eval_az + r * eval_bz + r * r * eval_cz;
        let eq_rx = EqPolynomial::new(rx.clone()).evals();
        let abc = shape.bind_row_vars(&eq_rx, r);
        let (inner, ry, _) = SumcheckProof::prove_quadratic(claim_inner, abc, z, &mut transcript);
        debug!(curve = G::NAME, rounds = inner.num_rounds(), "Inner sumcheck proved");

        let eval_w = evaluate_table(&witness.w, &ry[1..]);
        transcript.append_scalar(b"eval_w", &eval_w);

        let b_w = EqPolynomial::new(ry[1..].to_vec()).evals();
        let open_w =
            InnerProductProof::prove(ck, &instance.comm_w, &witness.w, &b_w, &eval_w, &mut transcript)?;
        let open_e =
            InnerProductProof::prove(ck, &instance.comm_e, &witness.e, &eq_rx, &eval_e, &mut transcript)?;

        Ok(Self {
            outer,
            eval_az,
            eval_bz,
            eval_cz,
            eval_e,
            inner,
            eval_w,
            open_w,
            open_e,
        })
    }

    /// `Ok(false)` for any failing check.
    pub fn verify(
        &self,
        ck: &CommitmentKey<G>,
        shape: &R1CSShape<G::Scalar>,
        params_digest: &[u8; 32],
        instance: &RelaxedR1CSInstance<G>,
    ) -> Result<bool> {
        if instance.x.len() != shape.num_io() {
            return Ok(false);
        }
        let mut transcript = snark_transcript(params_digest, instance);

        let num_rounds_x = log2(shape.num_cons());
        let num_rounds_y = log2(2 * shape.num_vars());
        let tau = transcript.challenge_vector(b"tau", num_rounds_x);

        let Ok((claim_outer, rx)) =
            self.outer
                .verify(G::Scalar::zero(), num_rounds_x, 3, &mut transcript)
        else {
            return Ok(false);
        };
        let eq_tau_rx = EqPolynomial::new(tau).evaluate(&rx);
        let expected_outer = eq_tau_rx
            * (self.eval_az * self.eval_bz - instance.u * self.eval_cz - self.eval_e);
        if claim_outer != expected_outer {
            debug!(curve = G::NAME, "Outer sumcheck final claim mismatch");
            return Ok(false);
        }

        transcript.append_scalars(
            b"claims",
            &[self.eval_az, self.eval_bz, self.eval_cz, self.eval_e],
        );
        let r: G::Scalar = transcript.challenge_scalar(b"r_combine");
        let claim_inner = self.eval_az + r * self.eval_bz + r * r * self.eval_cz;

        let Ok((claim_final, ry)) = self.inner.verify(claim_inner, num_rounds_y, 2, &mut transcript)
        else {
            return Ok(false);
        };

        let eq_rx = EqPolynomial::new(rx).evals();
        let eq_ry = EqPolynomial::new(ry.clone()).evals();
        let (eval_a, eval_b, eval_c) = shape.evaluate_matrices(&eq_rx, &eq_ry);
        let eval_abc = eval_a + r * eval_b + r * r * eval_c;

        // (u, x) occupies the first entries of the upper half of z.
        let eq_io = EqPolynomial::new(ry[1..].to_vec());
        let eval_io = std::iter::once(&instance.u)
            .chain(instance.x.iter())
            .enumerate()
            .map(|(j, v)| *v * eq_io.evaluate_index(j))
            .sum::<G::Scalar>();
        let eval_z = (G::Scalar::one() - ry[0]) * self.eval_w + ry[0] * eval_io;
        if claim_final != eval_abc * eval_z {
            debug!(curve = G::NAME, "Inner sumcheck final claim mismatch");
            return Ok(false);
        }

        transcript.append_scalar(b"eval_w", &self.eval_w);
        let b_w = EqPolynomial::new(ry[1..].to_vec()).evals();
        if !self
            .open_w
            .verify(ck, &instance.comm_w, &b_w, &self.eval_w, &mut transcript)?
        {
            debug!(curve = G::NAME, "Witness opening rejected");
            return Ok(false);
        }
        if !self
            .open_e
            .verify(ck, &instance.comm_e, &eq_rx, &self.eval_e, &mut transcript)?
        {
            debug!(curve = G::NAME, "Error-vector opening rejected");
            return Ok(false);
        }
        Ok(true)
    }

    pub(crate) fn write_to(&self, out: &mut Vec<u8>) -> Result<()> {
        self.outer.write_to(out)?;
        for claim in [&self.eval_az, &self.eval_bz, &self.eval_cz, &self.eval_e] {
            write_scalar(out, claim)?;
        }
        self.inner.write_to(out)?;
        write_scalar(out, &self.eval_w)?;
        self.open_w.write_to(out)?;
        self.open_e.write_to(out)
    }

    fn read_from(reader: &mut &[u8]) -> Result<Self> {
        let outer = SumcheckProof::read_from(reader)?;
        let eval_az = read_scalar(reader)?;
        let eval_bz = read_scalar(reader)?;
        let eval_cz = read_scalar(reader)?;
        let eval_e = read_scalar(reader)?;
        let inner = SumcheckProof::read_from(reader)?;
        let eval_w = read_scalar(reader)?;
        let open_w = InnerProductProof::read_from(reader)?;
        let open_e = InnerProductProof::read_from(reader)?;
        Ok(Self {
            outer,
            eval_az,
            eval_bz,
            eval_cz,
            eval_e,
            inner,
            eval_w,
            open_w,
            open_e,
        })
    }
}

/// The transportable proof.
#[derive(Clone, Debug, PartialEq)]
pub struct CompressedProof {
    pub params_digest: [u8; 32],
    pub num_steps: u64,
    pub r_u_primary: RelaxedR1CSInstance<Secq>,
    pub r_u_secondary: RelaxedR1CSInstance<Secp>,
    pub l_u_secondary: R1CSInstance<Secp>,
    /// Folds `l_u_secondary` into `r_u_secondary`.
    pub nifs_secondary: Nifs<Secp>,
    pub snark_primary: RelaxedR1CSSnark<Secq>,
    /// Proves the folded secondary instance.
    pub snark_secondary: RelaxedR1CSSnark<Secp>,
}

impl CompressedProof {
    pub fn num_steps(&self) -> usize {
        usize::try_from(self.num_steps).unwrap_or(usize::MAX)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut body = Vec::new();
        body.extend_from_slice(&self.params_digest);
        body.extend_from_slice(&self.num_steps.to_le_bytes());
        write_relaxed_instance(&mut body, &self.r_u_primary)?;
        write_relaxed_instance(&mut body, &self.r_u_secondary)?;
        write_r1cs_instance(&mut body, &self.l_u_secondary)?;
        write_commitment(&mut body, &self.nifs_secondary.comm_t)?;
        self.snark_primary.write_to(&mut body)?;
        self.snark_secondary.write_to(&mut body)?;
        Ok(encode_envelope(PayloadKind::Proof, &body))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut reader = decode_envelope(PayloadKind::Proof, bytes)?;
        if reader.len() < 40 {
            return Err(EcdsaFoldError::SerializationError(
                "truncated proof".to_string(),
            ));
        }
        let (head, rest) = reader.split_at(40);
        let mut params_digest = [0u8; 32];
        params_digest.copy_from_slice(&head[..32]);
        let mut steps = [0u8; 8];
        steps.copy_from_slice(&head[32..]);
        reader = rest;

        let r_u_primary = read_relaxed_instance(&mut reader, NUM_IO)?;
        let r_u_secondary = read_relaxed_instance(&mut reader, NUM_IO)?;
        let l_u_secondary = read_r1cs_instance(&mut reader, NUM_IO)?;
        let comm_t = read_commitment(&mut reader)?;
        let snark_primary = RelaxedR1CSSnark::read_from(&mut reader)?;
        let snark_secondary = RelaxedR1CSSnark::read_from(&mut reader)?;
        ensure_consumed(reader)?;
        Ok(Self {
            params_digest,
            num_steps: u64::from_le_bytes(steps),
            r_u_primary,
            r_u_secondary,
            l_u_secondary,
            nifs_secondary: Nifs { comm_t },
            snark_primary,
            snark_secondary,
        })
    }
}

/// Compresses a folding proof. Fails with `MalformedState` when the proof was
/// made under other parameters or its witnesses do not satisfy its instances.
pub fn compress(params: &PublicParameters, ivc: &IvcProof) -> Result<CompressedProof> {
    let start = Instant::now();
    if &ivc.params_digest != params.digest() {
        return Err(EcdsaFoldError::MalformedState(
            "folding proof was produced under different parameters".to_string(),
        ));
    }
    let (r_u_primary, r_w_primary) = ivc.state.running_primary();
    let (r_u_secondary, r_w_secondary) = ivc.state.running_secondary();
    let (l_u_secondary, l_w_secondary) = ivc.state.last_secondary();

    let (primary_ok, secondary_ok) = rayon::join(
        || {
            params
                .shape_primary()
                .is_sat_relaxed(params.ck_primary(), r_u_primary, r_w_primary)
        },
        || -> Result<bool> {
            let shape = params.shape_secondary();
            Ok(shape.is_sat_relaxed(params.ck_secondary(), r_u_secondary, r_w_secondary)?
                && shape.is_sat_committed(params.ck_secondary(), l_u_secondary, l_w_secondary)?)
        },
    );
    if !primary_ok? || !secondary_ok? {
        return Err(EcdsaFoldError::MalformedState(
            "folding witnesses do not satisfy their instances".to_string(),
        ));
    }

    let digest: Scalar = params.digest_scalar();
    let (nifs_secondary, f_u_secondary, f_w_secondary) = Nifs::prove(
        params.ck_secondary(),
        params.poseidon_primary(),
        digest,
        params.shape_secondary(),
        r_u_secondary,
        r_w_secondary.clone(),
        l_u_secondary,
        l_w_secondary,
    )?;

    let (snark_primary, snark_secondary) = rayon::join(
        || {
            RelaxedR1CSSnark::prove(
                params.ck_primary(),
                params.shape_primary(),
                params.digest(),
                r_u_primary,
                r_w_primary,
            )
        },
        || {
            RelaxedR1CSSnark::prove(
                params.ck_secondary(),
                params.shape_secondary(),
                params.digest(),
                &f_u_secondary,
                &f_w_secondary,
            )
        },
    );
    let proof = CompressedProof {
        params_digest: ivc.params_digest,
        num_steps: ivc.num_steps() as u64,
        r_u_primary: r_u_primary.clone(),
        r_u_secondary: r_u_secondary.clone(),
        l_u_secondary: l_u_secondary.clone(),
        nifs_secondary,
        snark_primary: snark_primary?,
        snark_secondary: snark_secondary?,
    };
    info!(
        steps = ivc.num_steps(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "Compressed folding proof"
    );
    Ok(proof)
}
