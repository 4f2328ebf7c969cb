//! Folding proofs for ordered batches of secp256k1 ECDSA signatures.
//!
//! A step circuit checks one signature and extends a running hash of the
//! checked statements. Two augmented circuits over the secp/secq cycle fold
//! each step into running relaxed R1CS instances and verify the previous fold
//! in-circuit, so the state after any number of signatures has a fixed size.
//! The compression stage proves that state with a sumcheck based SNARK per
//! curve, and the verifier recomputes the statement hash from the public
//! signature data before checking the SNARKs.
//!
//! The byte-level entry points are [`generate_params`], [`generate_proof`] and
//! [`verify_proof`]. They share one lazily built [`Engine`], which exposes the
//! same operations with an explicit worker pool and a parameter cache; the
//! typed functions [`fold`], [`compress`], [`verify_ivc`] and [`verify`] sit
//! underneath.

pub mod augmented;
pub mod bignat;
pub mod circuit;
pub mod codec;
pub mod commitment;
pub mod compression;
pub mod config;
pub mod curves;
pub mod ecc;
pub mod ecdsa;
pub mod engine;
pub mod error;
pub mod folding;
pub mod gadget;
pub mod ipa;
pub mod params;
pub mod poseidon;
pub mod polynomial;
pub mod r1cs;
pub mod sumcheck;
pub mod transcript;
pub mod verifier;

#[cfg(test)]
mod integration_tests;

use std::sync::OnceLock;

pub use circuit::{chain_digest, CircuitSummary, EcdsaCircuit, StepCircuit};
pub use codec::{
    decode_signatures, encode_signatures, signatures_from_json, signatures_to_json,
    JsonSignature, JsonSignatureBatch,
};
pub use commitment::{Commitment, CommitmentKey};
pub use compression::{compress, CompressedProof, RelaxedR1CSSnark};
pub use config::{EngineConfig, THREADS_ENV_VAR};
pub use curves::{CycleCurve, Scalar, Secp, SecpAffine, SecpScalar, Secq};
pub use ecdsa::{hash_message, SignatureInstance, SigningKey};
pub use engine::Engine;
pub use error::{EcdsaFoldError, Result};
pub use folding::{fold, FoldingState, IvcProof, Nifs, ProofSession, SessionState};
pub use params::PublicParameters;
pub use verifier::{verify, verify_ivc};

/// The engine behind the free functions, built on first use from
/// [`EngineConfig::from_env`].
pub fn shared_engine() -> Result<&'static Engine> {
    static ENGINE: OnceLock<Engine> = OnceLock::new();
    if let Some(engine) = ENGINE.get() {
        return Ok(engine);
    }
    let engine = Engine::from_env()?;
    Ok(ENGINE.get_or_init(|| engine))
}

/// Encoded public parameters from a fresh transparent setup.
pub fn generate_params() -> Result<Vec<u8>> {
    shared_engine()?.generate_params()
}

/// Encoded parameters for a fixed setup seed.
pub fn generate_params_with_seed(seed: [u8; 32]) -> Result<Vec<u8>> {
    shared_engine()?.setup_with_seed(seed)?.to_bytes()
}

/// Proves that every signature in the encoded sequence verifies, in order.
pub fn generate_proof(params: &[u8], signatures: &[u8]) -> Result<Vec<u8>> {
    shared_engine()?.generate_proof(params, signatures)
}

/// Checks an encoded proof against encoded parameters and signatures.
pub fn verify_proof(params: &[u8], proof: &[u8], signatures: &[u8]) -> Result<bool> {
    shared_engine()?.verify_proof(params, proof, signatures)
}
