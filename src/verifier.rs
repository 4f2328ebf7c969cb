//! Verification against a signature sequence.
//!
//! The verifier never sees a per-signature record. It recomputes the
//! statement chain from the signatures and checks that the public outputs of
//! the last secondary instance hash the running instances it was handed,
//! together with the step count and that chain value. Then it checks the
//! running instances themselves: by their witnesses for an [`IvcProof`], by
//! one fold and two SNARKs for a [`CompressedProof`].

use std::time::Instant;

use ark_ff::Zero;
use subtle::ConstantTimeEq;
use tracing::{debug, info, warn};

use crate::augmented::{state_hash, NUM_IO};
use crate::circuit::{chain_digest, chain_seed};
use crate::compression::CompressedProof;
use crate::curves::{convert_field, Scalar, Secp, SecpScalar, Secq};
use crate::ecdsa::SignatureInstance;
use crate::error::Result;
use crate::folding::IvcProof;
use crate::params::PublicParameters;
use crate::r1cs::{R1CSInstance, RelaxedR1CSInstance};

/// Whether the last secondary instance commits to the running instances after
/// `instances.len()` steps over exactly `instances`, in order.
fn outputs_match(
    params: &PublicParameters,
    instances: &[SignatureInstance],
    r_u_primary: &RelaxedR1CSInstance<Secq>,
    r_u_secondary: &RelaxedR1CSInstance<Secp>,
    l_u_secondary: &R1CSInstance<Secp>,
) -> Result<bool> {
    if r_u_primary.x.len() != NUM_IO || r_u_secondary.x.len() != NUM_IO || l_u_secondary.x.len() != NUM_IO {
        debug!("Instance with the wrong number of public inputs");
        return Ok(false);
    }
    if instances.iter().any(|sig| sig.r.is_zero() || sig.s.is_zero()) {
        debug!("Signature with a zero component");
        return Ok(false);
    }
    // `u` grows by under 2^128 per step. Past `Fn` it would alias in the
    // secondary circuit, which carries it as a native number.
    if convert_field::<Scalar, SecpScalar>(&r_u_primary.u).is_none() {
        debug!("Running primary instance with an out-of-range u");
        return Ok(false);
    }

    let n = instances.len() as u64;
    let zn = chain_digest(params.poseidon_primary(), instances)?;
    let hash_primary = state_hash::<Secp>(
        params.poseidon_primary(),
        params.digest_scalar(),
        n,
        &[chain_seed()],
        &[zn],
        r_u_secondary,
    );
    let hash_secondary = state_hash::<Secq>(
        params.poseidon_secondary(),
        params.digest_scalar(),
        n,
        &[SecpScalar::zero()],
        &[SecpScalar::zero()],
        r_u_primary,
    );
    let expected_primary = convert_field::<Scalar, SecpScalar>(&hash_primary);
    Ok(expected_primary == Some(l_u_secondary.x[0]) && hash_secondary == l_u_secondary.x[1])
}

fn same_params(params: &PublicParameters, digest: &[u8; 32]) -> bool {
    bool::from(digest[..].ct_eq(&params.digest()[..]))
}

/// `Ok(true)` only if the uncompressed folding proof attests that every
/// signature in `instances` verifies, in this order, under `params`.
pub fn verify_ivc(params: &PublicParameters, ivc: &IvcProof, instances: &[SignatureInstance]) -> Result<bool> {
    let start = Instant::now();
    if instances.is_empty() {
        warn!("Rejecting folding proof for an empty signature sequence");
        return Ok(false);
    }
    if !same_params(params, &ivc.params_digest) {
        warn!("Rejecting folding proof made under different parameters");
        return Ok(false);
    }
    if ivc.num_steps() != instances.len() {
        warn!(
            proof_steps = ivc.num_steps(),
            signatures = instances.len(),
            "Rejecting folding proof with mismatched step count"
        );
        return Ok(false);
    }
    let (r_u_primary, r_w_primary) = ivc.state.running_primary();
    let (r_u_secondary, r_w_secondary) = ivc.state.running_secondary();
    let (l_u_secondary, l_w_secondary) = ivc.state.last_secondary();
    if !outputs_match(params, instances, r_u_primary, r_u_secondary, l_u_secondary)? {
        warn!("Rejecting folding proof whose outputs do not match the signatures");
        return Ok(false);
    }

    let (primary, secondary) = rayon::join(
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
    let accepted = primary? && secondary?;
    if accepted {
        info!(
            steps = instances.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Folding proof verified"
        );
    } else {
        warn!(steps = instances.len(), "Folding proof witnesses rejected");
    }
    Ok(accepted)
}

/// `Ok(true)` only if `proof` attests that every signature in `instances`
/// verifies, in this order, under `params`.
pub fn verify(
    params: &PublicParameters,
    proof: &CompressedProof,
    instances: &[SignatureInstance],
) -> Result<bool> {
    let start = Instant::now();
    if instances.is_empty() {
        warn!("Rejecting proof for an empty signature sequence");
        return Ok(false);
    }
    if !same_params(params, &proof.params_digest) {
        warn!("Rejecting proof made under different parameters");
        return Ok(false);
    }
    if proof.num_steps() != instances.len() {
        warn!(
            proof_steps = proof.num_steps(),
            signatures = instances.len(),
            "Rejecting proof with mismatched step count"
        );
        return Ok(false);
    }
    if !outputs_match(
        params,
        instances,
        &proof.r_u_primary,
        &proof.r_u_secondary,
        &proof.l_u_secondary,
    )? {
        warn!("Rejecting proof whose outputs do not match the signatures");
        return Ok(false);
    }

    let digest: Scalar = params.digest_scalar();
    let f_u_secondary = proof.nifs_secondary.verify(
        params.poseidon_primary(),
        digest,
        &proof.r_u_secondary,
        &proof.l_u_secondary,
    )?;
    let (primary, secondary) = rayon::join(
        || {
            proof.snark_primary.verify(
                params.ck_primary(),
                params.shape_primary(),
                params.digest(),
                &proof.r_u_primary,
            )
        },
        || {
            proof.snark_secondary.verify(
                params.ck_secondary(),
                params.shape_secondary(),
                params.digest(),
                &f_u_secondary,
            )
        },
    );
    let accepted = primary? && secondary?;
    if accepted {
        info!(
            steps = instances.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Proof verified"
        );
    } else {
        warn!(steps = instances.len(), "Compressed proof rejected");
    }
    Ok(accepted)
}
