//! End-to-end tests over the byte-level operations.
//!
//! One parameter set and one two-signature proof are built once and shared;
//! the remaining tests derive altered inputs from them.

use std::sync::OnceLock;

use ark_ff::One;
use proptest::prelude::*;

use crate::augmented::NUM_IO;
use crate::codec::{
    decode_signatures, encode_signatures, write_commitment, write_r1cs_instance,
    write_relaxed_instance, HEADER_LEN,
};
use crate::compression::CompressedProof;
use crate::config::EngineConfig;
use crate::curves::SecpScalar;
use crate::ecdsa::{hash_message, SignatureInstance, SigningKey};
use crate::engine::Engine;
use crate::error::EcdsaFoldError;
use crate::params::PublicParameters;

struct Fixture {
    engine: Engine,
    params: Vec<u8>,
    signatures: Vec<SignatureInstance>,
    proof: Vec<u8>,
}

fn fixture() -> &'static Fixture {
    static FIXTURE: OnceLock<Fixture> = OnceLock::new();
    FIXTURE.get_or_init(|| {
        let engine = Engine::new(EngineConfig::default()).unwrap();
        let params = engine.setup_with_seed([42u8; 32]).unwrap().to_bytes().unwrap();
        let signatures = sample_signatures(2);
        let proof = engine
            .generate_proof(&params, &encode_signatures(&signatures).unwrap())
            .unwrap();
        Fixture {
            engine,
            params,
            signatures,
            proof,
        }
    })
}

fn sample_signatures(count: usize) -> Vec<SignatureInstance> {
    (0..count)
        .map(|i| {
            let key = SigningKey::from_bytes(&[(i + 1) as u8; 32]).unwrap();
            key.sign_digest(&hash_message(format!("transfer #{}", i).as_bytes()))
        })
        .collect()
}

/// Start offset of every field of the encoded fixture proof, in layout order.
fn proof_regions(fixture: &Fixture) -> Vec<(&'static str, usize)> {
    let proof = CompressedProof::from_bytes(&fixture.proof).unwrap();
    let mut body = Vec::new();
    let mut regions = vec![("header", 0)];
    let mut mark = |name, body: &Vec<u8>| regions.push((name, HEADER_LEN + body.len()));

    mark("params digest", &body);
    body.extend_from_slice(&proof.params_digest);
    mark("step count", &body);
    body.extend_from_slice(&proof.num_steps.to_le_bytes());
    mark("running primary", &body);
    write_relaxed_instance(&mut body, &proof.r_u_primary).unwrap();
    mark("running secondary", &body);
    write_relaxed_instance(&mut body, &proof.r_u_secondary).unwrap();
    mark("last secondary", &body);
    write_r1cs_instance(&mut body, &proof.l_u_secondary).unwrap();
    mark("cross term", &body);
    write_commitment(&mut body, &proof.nifs_secondary.comm_t).unwrap();
    mark("primary snark", &body);
    proof.snark_primary.write_to(&mut body).unwrap();
    mark("secondary snark", &body);
    proof.snark_secondary.write_to(&mut body).unwrap();
    assert_eq!(HEADER_LEN + body.len(), fixture.proof.len());
    regions
}

/// Rejected either as `Ok(false)` or as an error.
fn rejects(fixture: &Fixture, proof: &[u8]) -> bool {
    let signatures = encode_signatures(&fixture.signatures).unwrap();
    !matches!(
        fixture.engine.verify_proof(&fixture.params, proof, &signatures),
        Ok(true)
    )
}

fn verify_with(fixture: &Fixture, proof: &[u8], signatures: &[SignatureInstance]) -> bool {
    fixture
        .engine
        .verify_proof(&fixture.params, proof, &encode_signatures(signatures).unwrap())
        .unwrap()
}

#[test]
fn test_valid_batch_verifies() {
    let fixture = fixture();
    assert!(verify_with(fixture, &fixture.proof, &fixture.signatures));
}

#[test]
fn test_payloads_round_trip() {
    let fixture = fixture();

    let params = PublicParameters::from_bytes(&fixture.params).unwrap();
    assert_eq!(params.to_bytes().unwrap(), fixture.params);

    let encoded = encode_signatures(&fixture.signatures).unwrap();
    assert_eq!(decode_signatures(&encoded).unwrap(), fixture.signatures);

    let proof = CompressedProof::from_bytes(&fixture.proof).unwrap();
    assert_eq!(proof.num_steps(), 2);
    assert_eq!(proof.to_bytes().unwrap(), fixture.proof);
}

#[test]
fn test_swapped_order_is_rejected() {
    let fixture = fixture();
    let mut swapped = fixture.signatures.clone();
    swapped.swap(0, 1);
    assert!(!verify_with(fixture, &fixture.proof, &swapped));
}

#[test]
fn test_altered_signature_is_rejected() {
    let fixture = fixture();
    for index in 0..fixture.signatures.len() {
        let mut altered = fixture.signatures.clone();
        altered[index].s += SecpScalar::one();

        let err = fixture
            .engine
            .generate_proof(&fixture.params, &encode_signatures(&altered).unwrap())
            .unwrap_err();
        assert!(matches!(err, EcdsaFoldError::InvalidSignature { index: i } if i == index));
        assert!(!verify_with(fixture, &fixture.proof, &altered));
    }
}

#[test]
fn test_altered_digest_is_rejected() {
    let fixture = fixture();
    let mut altered = fixture.signatures.clone();
    altered[1].digest[31] ^= 0x01;
    assert!(!verify_with(fixture, &fixture.proof, &altered));
}

#[test]
fn test_extra_or_missing_signatures_are_rejected() {
    let fixture = fixture();
    let mut extra = fixture.signatures.clone();
    extra.push(sample_signatures(3)[2].clone());
    assert!(!verify_with(fixture, &fixture.proof, &extra));
    assert!(!verify_with(fixture, &fixture.proof, &fixture.signatures[..1]));
}

#[test]
fn test_tampered_proof_is_rejected() {
    let fixture = fixture();
    let regions = proof_regions(fixture);
    let len = fixture.proof.len();
    for (i, &(name, start)) in regions.iter().enumerate() {
        let end = regions.get(i + 1).map_or(len, |&(_, next)| next);
        for position in [start, (start + end) / 2, end - 1] {
            let mut tampered = fixture.proof.clone();
            tampered[position] ^= 0x04;
            assert!(
                rejects(fixture, &tampered),
                "flipped byte {} in {} accepted",
                position,
                name
            );
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn prop_flipping_any_proof_bit_is_rejected(position in any::<prop::sample::Index>(), bit in 0u8..8) {
        let fixture = fixture();
        let mut tampered = fixture.proof.clone();
        let position = position.index(tampered.len());
        tampered[position] ^= 1 << bit;
        prop_assert!(rejects(fixture, &tampered), "flipped bit {} of byte {} accepted", bit, position);
    }
}

#[test]
fn test_truncated_proof_is_rejected() {
    let fixture = fixture();
    let truncated = &fixture.proof[..fixture.proof.len() - 1];
    assert!(!verify_with(fixture, truncated, &fixture.signatures));
    assert!(!verify_with(fixture, &[], &fixture.signatures));

    let mut extended = fixture.proof.clone();
    extended.push(0);
    assert!(!verify_with(fixture, &extended, &fixture.signatures));
}

#[test]
fn test_parameter_binding() {
    let fixture = fixture();
    let other = fixture
        .engine
        .setup_with_seed([43u8; 32])
        .unwrap()
        .to_bytes()
        .unwrap();
    let signatures = encode_signatures(&fixture.signatures).unwrap();
    assert!(!fixture
        .engine
        .verify_proof(&other, &fixture.proof, &signatures)
        .unwrap());
}

#[test]
fn test_empty_input_policy() {
    let fixture = fixture();
    let empty = encode_signatures(&[]).unwrap();
    assert!(matches!(
        fixture.engine.generate_proof(&fixture.params, &empty),
        Err(EcdsaFoldError::EmptyInput)
    ));
    assert!(!fixture
        .engine
        .verify_proof(&fixture.params, &fixture.proof, &empty)
        .unwrap());
}

#[test]
fn test_undecodable_inputs_are_errors() {
    let fixture = fixture();
    let signatures = encode_signatures(&fixture.signatures).unwrap();

    let mut bad_params = fixture.params.clone();
    bad_params.truncate(bad_params.len() / 2);
    assert!(matches!(
        fixture.engine.generate_proof(&bad_params, &signatures),
        Err(EcdsaFoldError::InvalidParameters(_))
    ));
    assert!(matches!(
        fixture
            .engine
            .verify_proof(&bad_params, &fixture.proof, &signatures),
        Err(EcdsaFoldError::InvalidParameters(_))
    ));

    let bad_signatures = &signatures[..signatures.len() - 3];
    assert!(matches!(
        fixture.engine.generate_proof(&fixture.params, bad_signatures),
        Err(EcdsaFoldError::SerializationError(_))
    ));
    assert!(matches!(
        fixture
            .engine
            .verify_proof(&fixture.params, &fixture.proof, bad_signatures),
        Err(EcdsaFoldError::SerializationError(_))
    ));
}

#[test]
fn test_single_worker_produces_the_same_proof() {
    let fixture = fixture();
    let serial = Engine::new(EngineConfig::new().with_parallelism(1)).unwrap();
    let signatures = encode_signatures(&fixture.signatures).unwrap();
    let proof = serial.generate_proof(&fixture.params, &signatures).unwrap();
    assert_eq!(proof, fixture.proof);
    assert!(serial
        .verify_proof(&fixture.params, &fixture.proof, &signatures)
        .unwrap());
}

#[test]
fn test_generated_params_are_usable() {
    let engine = Engine::new(EngineConfig::default()).unwrap();
    let first = engine.generate_params().unwrap();
    let second = engine.generate_params().unwrap();
    assert_ne!(first, second);

    let params = PublicParameters::from_bytes(&first).unwrap();
    assert!(params.verify_setup());
    assert_eq!(params.num_public_inputs(), NUM_IO);
}

#[test]
fn test_uncompressed_folding_proof_verifies() {
    let fixture = fixture();
    let params = PublicParameters::from_bytes(&fixture.params).unwrap();
    let ivc = fixture.engine.fold(&params, &fixture.signatures).unwrap();
    assert_eq!(ivc.num_steps(), 2);
    assert!(fixture
        .engine
        .verify_ivc(&params, &ivc, &fixture.signatures)
        .unwrap());

    let mut swapped = fixture.signatures.clone();
    swapped.swap(0, 1);
    assert!(!fixture.engine.verify_ivc(&params, &ivc, &swapped).unwrap());
}

#[test]
fn test_free_functions_share_one_engine() {
    let first = crate::shared_engine().unwrap();
    let second = crate::shared_engine().unwrap();
    assert!(std::ptr::eq(first, second));

    let fixture = fixture();
    let signatures = encode_signatures(&fixture.signatures).unwrap();
    assert_eq!(crate::generate_params_with_seed([42u8; 32]).unwrap(), fixture.params);
    assert!(crate::verify_proof(&fixture.params, &fixture.proof, &signatures).unwrap());
}
