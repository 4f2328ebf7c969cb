//! The engine handle exposing the three boundary operations.
//!
//! Each call runs inside the engine's own worker pool. The most recently
//! decoded parameters are kept, keyed by a hash of their encoding, so repeated
//! calls with the same parameter bytes skip decoding and circuit synthesis.

use std::sync::{Arc, Mutex};
use std::time::Instant;

use rand_core::OsRng;
use rayon::{ThreadPool, ThreadPoolBuilder};
use tracing::{debug, info, warn};

use crate::codec::{decode_signatures, encode_signatures};
use crate::compression::CompressedProof;
use crate::config::EngineConfig;
use crate::ecdsa::SignatureInstance;
use crate::error::Result;
use crate::folding::{fold, IvcProof, ProofSession};
use crate::params::PublicParameters;
use crate::verifier;

pub struct Engine {
    config: EngineConfig,
    pool: ThreadPool,
    cached_params: Mutex<Option<([u8; 32], Arc<PublicParameters>)>>,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Result<Self> {
        let threads = config.effective_parallelism();
        let pool = ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("ecdsa-fold-{}", i))
            .build()?;
        debug!(threads, "Engine worker pool ready");
        Ok(Self {
            config,
            pool,
            cached_params: Mutex::new(None),
        })
    }

    pub fn from_env() -> Result<Self> {
        Self::new(EngineConfig::from_env()?)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Fresh parameters from OS randomness.
    pub fn setup(&self) -> Result<PublicParameters> {
        self.pool.install(|| PublicParameters::setup(&mut OsRng))
    }

    pub fn setup_with_seed(&self, seed: [u8; 32]) -> Result<PublicParameters> {
        self.pool.install(|| PublicParameters::setup_with_seed(seed))
    }

    /// Folds and compresses `signatures` in order.
    pub fn prove(
        &self,
        params: &PublicParameters,
        signatures: &[SignatureInstance],
    ) -> Result<CompressedProof> {
        self.pool.install(|| {
            let start = Instant::now();
            let mut session = ProofSession::new(params);
            for signature in signatures {
                session.fold_step(signature)?;
            }
            session.finish()?;
            let proof = session.compress()?;
            info!(
                signatures = signatures.len(),
                elapsed_ms = start.elapsed().as_millis() as u64,
                "Proof generated"
            );
            Ok(proof)
        })
    }

    /// Folds `signatures` without compressing.
    pub fn fold(&self, params: &PublicParameters, signatures: &[SignatureInstance]) -> Result<IvcProof> {
        self.pool.install(|| fold(params, signatures))
    }

    pub fn verify_ivc(
        &self,
        params: &PublicParameters,
        ivc: &IvcProof,
        signatures: &[SignatureInstance],
    ) -> Result<bool> {
        self.pool.install(|| verifier::verify_ivc(params, ivc, signatures))
    }

    pub fn verify(
        &self,
        params: &PublicParameters,
        proof: &CompressedProof,
        signatures: &[SignatureInstance],
    ) -> Result<bool> {
        self.pool.install(|| verifier::verify(params, proof, signatures))
    }

    /// `generate_params() -> bytes`.
    pub fn generate_params(&self) -> Result<Vec<u8>> {
        let params = self.setup()?;
        let bytes = params.to_bytes()?;
        self.remember(&bytes, Arc::new(params));
        info!(bytes = bytes.len(), "Parameters encoded");
        Ok(bytes)
    }

    /// `generate_proof(params, signatures) -> bytes`.
    pub fn generate_proof(&self, params: &[u8], signatures: &[u8]) -> Result<Vec<u8>> {
        let params = self.load_params(params)?;
        let signatures = decode_signatures(signatures)?;
        let proof = self.prove(&params, &signatures)?;
        let bytes = proof.to_bytes()?;
        info!(bytes = bytes.len(), "Proof encoded");
        Ok(bytes)
    }

    /// `verify_proof(params, proof, signatures) -> bool`.
    ///
    /// Undecodable proof bytes are a rejection, not an error.
    pub fn verify_proof(&self, params: &[u8], proof: &[u8], signatures: &[u8]) -> Result<bool> {
        let params = self.load_params(params)?;
        let signatures = decode_signatures(signatures)?;
        let proof = match CompressedProof::from_bytes(proof) {
            Ok(proof) => proof,
            Err(err) => {
                warn!(error = %err, "Rejecting undecodable proof");
                return Ok(false);
            }
        };
        self.verify(&params, &proof, &signatures)
    }

    /// Encodes a signature sequence in the boundary format.
    pub fn encode_signatures(&self, signatures: &[SignatureInstance]) -> Result<Vec<u8>> {
        encode_signatures(signatures)
    }

    fn load_params(&self, bytes: &[u8]) -> Result<Arc<PublicParameters>> {
        let key = *blake3::hash(bytes).as_bytes();
        if let Some(params) = self.cached(&key) {
            debug!("Parameter cache hit");
            return Ok(params);
        }
        let params = Arc::new(self.pool.install(|| PublicParameters::from_bytes(bytes))?);
        self.remember(bytes, Arc::clone(&params));
        Ok(params)
    }

    fn cached(&self, key: &[u8; 32]) -> Option<Arc<PublicParameters>> {
        let guard = self.cached_params.lock().ok()?;
        guard
            .as_ref()
            .filter(|(cached_key, _)| cached_key == key)
            .map(|(_, params)| Arc::clone(params))
    }

    fn remember(&self, bytes: &[u8], params: Arc<PublicParameters>) {
        let key = *blake3::hash(bytes).as_bytes();
        match self.cached_params.lock() {
            Ok(mut guard) => *guard = Some((key, params)),
            Err(_) => warn!("Parameter cache unavailable"),
        }
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.config)
            .field("threads", &self.pool.current_num_threads())
            .finish()
    }
}
