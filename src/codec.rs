//! Byte formats crossing the engine boundary.
//!
//! Every payload is wrapped in an envelope:
//!
//! ```text
//! magic "EFLD" | version u16 LE | kind u8 | body
//! ```
//!
//! Signature bodies are `count u32 LE` followed by `count` fixed-size records
//! `digest[32] | SEC1 compressed public key[33] | r BE[32] | s BE[32]`.
//! A JSON batch format with hex fields is offered for tooling.

use std::io::{Read, Write};

use ark_ff::{BigInteger, Field, PrimeField};
use ark_serialize::{CanonicalDeserialize, CanonicalSerialize};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use num_bigint::BigUint;
use num_traits::Num;
use serde::{Deserialize, Serialize};

use crate::commitment::Commitment;
use crate::curves::{secp_coordinates, Affine, CycleCurve, Scalar, SecpAffine, SecpScalar};
use crate::ecdsa::SignatureInstance;
use crate::error::{EcdsaFoldError, Result};
use crate::r1cs::{R1CSInstance, RelaxedR1CSInstance};

pub const MAGIC: &[u8; 4] = b"EFLD";
pub const VERSION: u16 = 1;
pub(crate) const HEADER_LEN: usize = 4 + 2 + 1;
const SIGNATURE_RECORD_LEN: usize = 32 + 33 + 32 + 32;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum PayloadKind {
    Parameters = 1,
    Signatures = 2,
    Proof = 3,
}

impl PayloadKind {
    fn name(self) -> &'static str {
        match self {
            Self::Parameters => "parameters",
            Self::Signatures => "signatures",
            Self::Proof => "proof",
        }
    }
}

fn truncated(what: &str) -> EcdsaFoldError {
    EcdsaFoldError::SerializationError(format!("truncated {}", what))
}

pub fn encode_envelope(kind: PayloadKind, body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_LEN + body.len());
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&VERSION.to_le_bytes());
    out.push(kind as u8);
    out.extend_from_slice(body);
    out
}

/// Checks the header and returns the body.
pub fn decode_envelope(kind: PayloadKind, bytes: &[u8]) -> Result<&[u8]> {
    let mut reader = bytes;
    let mut magic = [0u8; 4];
    reader
        .read_exact(&mut magic)
        .map_err(|_| truncated("envelope header"))?;
    if &magic != MAGIC {
        return Err(EcdsaFoldError::SerializationError(
            "bad magic bytes".to_string(),
        ));
    }
    let version = reader
        .read_u16::<LittleEndian>()
        .map_err(|_| truncated("envelope header"))?;
    if version != VERSION {
        return Err(EcdsaFoldError::SerializationError(format!(
            "unsupported format version {}",
            version
        )));
    }
    let tag = reader.read_u8().map_err(|_| truncated("envelope header"))?;
    if tag != kind as u8 {
        return Err(EcdsaFoldError::SerializationError(format!(
            "expected {} payload, found kind {}",
            kind.name(),
            tag
        )));
    }
    Ok(reader)
}

/// Fails unless the reader is exhausted.
pub fn ensure_consumed(reader: &[u8]) -> Result<()> {
    if reader.is_empty() {
        Ok(())
    } else {
        Err(EcdsaFoldError::SerializationError(format!(
            "{} trailing bytes",
            reader.len()
        )))
    }
}

/// Writes a `u32` count followed by each item.
pub fn write_vec<T, F>(out: &mut Vec<u8>, items: &[T], mut write_item: F) -> Result<()>
where
    F: FnMut(&mut Vec<u8>, &T) -> Result<()>,
{
    let count = u32::try_from(items.len())
        .map_err(|_| EcdsaFoldError::ResourceExhausted("vector too long to encode".to_string()))?;
    out.write_u32::<LittleEndian>(count)?;
    for item in items {
        write_item(out, item)?;
    }
    Ok(())
}

/// Reads a vector written by [`write_vec`]. The count is checked against the
/// remaining input before anything is allocated.
pub fn read_vec<T, F>(reader: &mut &[u8], min_item_len: usize, mut read_item: F) -> Result<Vec<T>>
where
    F: FnMut(&mut &[u8]) -> Result<T>,
{
    let count = reader
        .read_u32::<LittleEndian>()
        .map_err(|_| truncated("vector length"))? as usize;
    if count.saturating_mul(min_item_len.max(1)) > reader.len() {
        return Err(truncated("vector"));
    }
    let mut items = Vec::with_capacity(count);
    for _ in 0..count {
        items.push(read_item(reader)?);
    }
    Ok(items)
}

pub fn write_scalar<F: PrimeField>(out: &mut Vec<u8>, value: &F) -> Result<()> {
    value.serialize_compressed(out)?;
    Ok(())
}

pub fn read_scalar<F: PrimeField>(reader: &mut &[u8]) -> Result<F> {
    Ok(F::deserialize_compressed(&mut *reader)?)
}

/// Compressed point; decoding checks the curve equation.
pub fn write_point<G: CycleCurve>(out: &mut Vec<u8>, value: &Affine<G>) -> Result<()> {
    value.serialize_compressed(out)?;
    Ok(())
}

/// Reads a compressed point, accepting only the encoding `write_point` emits.
pub fn read_point<G: CycleCurve>(reader: &mut &[u8]) -> Result<Affine<G>> {
    let start: &[u8] = reader;
    let point = Affine::<G>::deserialize_compressed(&mut *reader)?;
    let consumed = start.len() - reader.len();
    let mut canonical = Vec::with_capacity(consumed);
    write_point::<G>(&mut canonical, &point)?;
    if canonical[..] != start[..consumed] {
        return Err(EcdsaFoldError::SerializationError(
            "non-canonical point encoding".to_string(),
        ));
    }
    Ok(point)
}

pub fn write_commitment<G: CycleCurve>(out: &mut Vec<u8>, value: &Commitment<G>) -> Result<()> {
    write_point::<G>(out, value.point())
}

pub fn read_commitment<G: CycleCurve>(reader: &mut &[u8]) -> Result<Commitment<G>> {
    Ok(Commitment::from_point(read_point::<G>(reader)?))
}

fn read_public_inputs<F: PrimeField>(reader: &mut &[u8], num_io: usize) -> Result<Vec<F>> {
    let x = read_vec(reader, 32, read_scalar::<F>)?;
    if x.len() != num_io {
        return Err(EcdsaFoldError::SerializationError(format!(
            "instance has {} public inputs, expected {}",
            x.len(),
            num_io
        )));
    }
    Ok(x)
}

pub fn write_r1cs_instance<G: CycleCurve>(out: &mut Vec<u8>, value: &R1CSInstance<G>) -> Result<()> {
    write_commitment(out, &value.comm_w)?;
    write_vec(out, &value.x, write_scalar)
}

pub fn read_r1cs_instance<G: CycleCurve>(reader: &mut &[u8], num_io: usize) -> Result<R1CSInstance<G>> {
    Ok(R1CSInstance {
        comm_w: read_commitment(reader)?,
        x: read_public_inputs(reader, num_io)?,
    })
}

pub fn write_relaxed_instance<G: CycleCurve>(
    out: &mut Vec<u8>,
    value: &RelaxedR1CSInstance<G>,
) -> Result<()> {
    write_commitment(out, &value.comm_w)?;
    write_commitment(out, &value.comm_e)?;
    write_scalar(out, &value.u)?;
    write_vec(out, &value.x, write_scalar)
}

pub fn read_relaxed_instance<G: CycleCurve>(
    reader: &mut &[u8],
    num_io: usize,
) -> Result<RelaxedR1CSInstance<G>> {
    Ok(RelaxedR1CSInstance {
        comm_w: read_commitment(reader)?,
        comm_e: read_commitment(reader)?,
        u: read_scalar(reader)?,
        x: read_public_inputs(reader, num_io)?,
    })
}

/// SEC1 compressed encoding of a finite point.
pub fn encode_public_key(point: &SecpAffine) -> Result<[u8; 33]> {
    let (x, y) = secp_coordinates(point).ok_or_else(|| {
        EcdsaFoldError::SerializationError("cannot encode the point at infinity".to_string())
    })?;
    let mut out = [0u8; 33];
    out[0] = if y.into_bigint().is_odd() { 0x03 } else { 0x02 };
    out[1..].copy_from_slice(&x.into_bigint().to_bytes_be());
    Ok(out)
}

/// Parses a SEC1 public key, compressed (33 bytes) or uncompressed (65 bytes).
pub fn decode_public_key(bytes: &[u8]) -> Result<SecpAffine> {
    match (bytes.len(), bytes.first()) {
        (33, Some(&prefix)) if prefix == 0x02 || prefix == 0x03 => {
            let x = canonical_base_field(&bytes[1..33])?;
            let rhs = x * x * x + Scalar::from(7u64);
            let y = rhs.sqrt().ok_or_else(|| {
                EcdsaFoldError::SerializationError("public key x is not on the curve".to_string())
            })?;
            let odd = prefix == 0x03;
            let y = if y.into_bigint().is_odd() == odd { y } else { -y };
            Ok(SecpAffine::new_unchecked(x, y))
        }
        (65, Some(&0x04)) => {
            let x = canonical_base_field(&bytes[1..33])?;
            let y = canonical_base_field(&bytes[33..65])?;
            let point = SecpAffine::new_unchecked(x, y);
            if point.is_on_curve() {
                Ok(point)
            } else {
                Err(EcdsaFoldError::SerializationError(
                    "public key is not on the curve".to_string(),
                ))
            }
        }
        _ => Err(EcdsaFoldError::SerializationError(format!(
            "unrecognised SEC1 public key of {} bytes",
            bytes.len()
        ))),
    }
}

fn canonical_base_field(bytes: &[u8]) -> Result<Scalar> {
    let value = Scalar::from_be_bytes_mod_order(bytes);
    if value.into_bigint().to_bytes_be() != bytes {
        return Err(EcdsaFoldError::SerializationError(
            "coordinate is not below the field modulus".to_string(),
        ));
    }
    Ok(value)
}

/// Parses a canonical big-endian scalar, rejecting values `>= n`.
pub fn canonical_scalar(bytes: &[u8]) -> Result<SecpScalar> {
    if bytes.len() != 32 {
        return Err(EcdsaFoldError::SerializationError(format!(
            "scalar must be 32 bytes, got {}",
            bytes.len()
        )));
    }
    let value = SecpScalar::from_be_bytes_mod_order(bytes);
    if value.into_bigint().to_bytes_be() != bytes {
        return Err(EcdsaFoldError::SerializationError(
            "scalar is not below the group order".to_string(),
        ));
    }
    Ok(value)
}

fn scalar_bytes_be(k: &SecpScalar) -> Vec<u8> {
    k.into_bigint().to_bytes_be()
}

/// Serializes an ordered signature sequence.
pub fn encode_signatures(signatures: &[SignatureInstance]) -> Result<Vec<u8>> {
    let count = u32::try_from(signatures.len()).map_err(|_| {
        EcdsaFoldError::ResourceExhausted(format!(
            "{} signatures exceed the format limit",
            signatures.len()
        ))
    })?;
    let mut body = Vec::with_capacity(4 + signatures.len() * SIGNATURE_RECORD_LEN);
    body.write_u32::<LittleEndian>(count)?;
    for sig in signatures {
        body.write_all(&sig.digest)?;
        body.write_all(&encode_public_key(&sig.public_key)?)?;
        body.write_all(&scalar_bytes_be(&sig.r))?;
        body.write_all(&scalar_bytes_be(&sig.s))?;
    }
    Ok(encode_envelope(PayloadKind::Signatures, &body))
}

/// Parses an ordered signature sequence; any defect is a `SerializationError`.
pub fn decode_signatures(bytes: &[u8]) -> Result<Vec<SignatureInstance>> {
    let mut reader = decode_envelope(PayloadKind::Signatures, bytes)?;
    let count = reader
        .read_u32::<LittleEndian>()
        .map_err(|_| truncated("signature count"))? as usize;
    let expected = count
        .checked_mul(SIGNATURE_RECORD_LEN)
        .ok_or_else(|| truncated("signature list"))?;
    if reader.len() < expected {
        return Err(truncated("signature list"));
    }

    let mut signatures = Vec::with_capacity(count);
    for _ in 0..count {
        let mut record = [0u8; SIGNATURE_RECORD_LEN];
        reader
            .read_exact(&mut record)
            .map_err(|_| truncated("signature record"))?;
        let mut digest = [0u8; 32];
        digest.copy_from_slice(&record[..32]);
        let public_key = decode_public_key(&record[32..65])?;
        let r = canonical_scalar(&record[65..97])?;
        let s = canonical_scalar(&record[97..129])?;
        signatures.push(SignatureInstance::new(digest, public_key, r, s));
    }
    ensure_consumed(reader)?;
    Ok(signatures)
}

/// One signature in the JSON batch format.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct JsonSignature {
    /// Hex, 32 bytes.
    pub message_digest: String,
    /// Hex SEC1 key, compressed or uncompressed.
    pub public_key: String,
    /// Decimal, or hex with a `0x` prefix.
    pub r: String,
    pub s: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct JsonSignatureBatch {
    pub signatures: Vec<JsonSignature>,
}

fn strip_hex_prefix(s: &str) -> &str {
    s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")).unwrap_or(s)
}

fn parse_json_scalar(text: &str) -> Result<SecpScalar> {
    let trimmed = text.trim();
    let parsed = if trimmed.starts_with("0x") || trimmed.starts_with("0X") {
        BigUint::from_str_radix(strip_hex_prefix(trimmed), 16)
    } else {
        BigUint::from_str_radix(trimmed, 10)
    };
    let value = parsed.map_err(|e| {
        EcdsaFoldError::SerializationError(format!("invalid scalar {:?}: {}", text, e))
    })?;
    let be = value.to_bytes_be();
    if be.len() > 32 {
        return Err(EcdsaFoldError::SerializationError(format!(
            "scalar {:?} exceeds 256 bits",
            text
        )));
    }
    let mut padded = [0u8; 32];
    padded[32 - be.len()..].copy_from_slice(&be);
    canonical_scalar(&padded)
}

impl JsonSignature {
    pub fn from_instance(sig: &SignatureInstance) -> Result<Self> {
        Ok(Self {
            message_digest: hex::encode(sig.digest),
            public_key: hex::encode(encode_public_key(&sig.public_key)?),
            r: BigUint::from_bytes_be(&scalar_bytes_be(&sig.r)).to_str_radix(10),
            s: BigUint::from_bytes_be(&scalar_bytes_be(&sig.s)).to_str_radix(10),
        })
    }

    pub fn to_instance(&self) -> Result<SignatureInstance> {
        let digest_bytes = hex::decode(strip_hex_prefix(&self.message_digest))?;
        let digest: [u8; 32] = digest_bytes.as_slice().try_into().map_err(|_| {
            EcdsaFoldError::SerializationError(format!(
                "message digest must be 32 bytes, got {}",
                digest_bytes.len()
            ))
        })?;
        let public_key = decode_public_key(&hex::decode(strip_hex_prefix(&self.public_key))?)?;
        Ok(SignatureInstance::new(
            digest,
            public_key,
            parse_json_scalar(&self.r)?,
            parse_json_scalar(&self.s)?,
        ))
    }
}

pub fn signatures_from_json(text: &str) -> Result<Vec<SignatureInstance>> {
    let batch: JsonSignatureBatch = serde_json::from_str(text)?;
    batch.signatures.iter().map(JsonSignature::to_instance).collect()
}

pub fn signatures_to_json(signatures: &[SignatureInstance]) -> Result<String> {
    let batch = JsonSignatureBatch {
        signatures: signatures
            .iter()
            .map(JsonSignature::from_instance)
            .collect::<Result<_>>()?,
    };
    Ok(serde_json::to_string_pretty(&batch)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::curves::{Projective, Secp, Secq};
    use crate::ecdsa::SigningKey;
    use ark_ec::{AffineRepr, CurveGroup, Group};
    use proptest::prelude::*;

    fn sample(count: usize) -> Vec<SignatureInstance> {
        let key = SigningKey::from_bytes(&[9u8; 32]).unwrap();
        (0..count)
            .map(|i| key.sign_message(format!("message {}", i).as_bytes()))
            .collect()
    }

    #[test]
    fn test_signature_bytes_round_trip() {
        let sigs = sample(3);
        let bytes = encode_signatures(&sigs).unwrap();
        assert_eq!(bytes.len(), HEADER_LEN + 4 + 3 * SIGNATURE_RECORD_LEN);
        assert_eq!(decode_signatures(&bytes).unwrap(), sigs);
        assert!(decode_signatures(&encode_signatures(&[]).unwrap()).unwrap().is_empty());
    }

    #[test]
    fn test_trailing_and_truncated_bytes_are_rejected() {
        let mut bytes = encode_signatures(&sample(1)).unwrap();
        bytes.push(0);
        assert!(matches!(
            decode_signatures(&bytes),
            Err(EcdsaFoldError::SerializationError(_))
        ));
        bytes.truncate(bytes.len() - 2);
        assert!(matches!(
            decode_signatures(&bytes),
            Err(EcdsaFoldError::SerializationError(_))
        ));
    }

    #[test]
    fn test_vector_length_is_bounded_by_input() {
        let mut bytes = Vec::new();
        bytes.write_u32::<LittleEndian>(u32::MAX).unwrap();
        bytes.extend_from_slice(&[0u8; 64]);
        let mut reader = bytes.as_slice();
        assert!(read_vec(&mut reader, 32, read_scalar::<Scalar>).is_err());

        let values = vec![Scalar::from(3u64), Scalar::from(4u64)];
        let mut out = Vec::new();
        write_vec(&mut out, &values, write_scalar).unwrap();
        let mut reader = out.as_slice();
        assert_eq!(read_vec(&mut reader, 32, read_scalar::<Scalar>).unwrap(), values);
        assert!(reader.is_empty());
    }

    #[test]
    fn test_instances_round_trip_and_check_input_count() {
        let point = (Projective::<Secq>::generator() * Scalar::from(7u64)).into_affine();
        let instance = RelaxedR1CSInstance::<Secq> {
            comm_w: Commitment::from_point(point),
            comm_e: Commitment::identity(),
            u: Scalar::from(3u64),
            x: vec![Scalar::from(1u64), Scalar::from(2u64)],
        };
        let mut out = Vec::new();
        write_relaxed_instance(&mut out, &instance).unwrap();
        let mut reader = out.as_slice();
        assert_eq!(read_relaxed_instance::<Secq>(&mut reader, 2).unwrap(), instance);
        assert!(reader.is_empty());
        assert!(read_relaxed_instance::<Secq>(&mut out.as_slice(), 3).is_err());

        let fresh = R1CSInstance::<Secp> {
            comm_w: Commitment::identity(),
            x: vec![SecpScalar::from(4u64), SecpScalar::from(5u64)],
        };
        let mut out = Vec::new();
        write_r1cs_instance(&mut out, &fresh).unwrap();
        assert_eq!(read_r1cs_instance::<Secp>(&mut out.as_slice(), 2).unwrap(), fresh);
    }

    #[test]
    fn test_non_canonical_point_is_rejected() {
        let point = (Projective::<Secq>::generator() * Scalar::from(11u64)).into_affine();
        let mut out = Vec::new();
        write_point::<Secq>(&mut out, &point).unwrap();
        let mut reader = out.as_slice();
        assert_eq!(read_point::<Secq>(&mut reader).unwrap(), point);
        assert!(reader.is_empty());

        // Spare bits below the flags of the last byte.
        let mut padded = out.clone();
        *padded.last_mut().unwrap() |= 1;
        assert!(read_point::<Secq>(&mut padded.as_slice()).is_err());

        // Identity with a non-zero x.
        let mut identity = Vec::new();
        write_point::<Secp>(&mut identity, &Affine::<Secp>::zero()).unwrap();
        assert_eq!(read_point::<Secp>(&mut identity.as_slice()).unwrap(), Affine::<Secp>::zero());
        identity[0] = 1;
        assert!(read_point::<Secp>(&mut identity.as_slice()).is_err());
    }

    #[test]
    fn test_wrong_envelope_kind() {
        let bytes = encode_envelope(PayloadKind::Proof, &[0, 0, 0, 0]);
        assert!(decode_signatures(&bytes).is_err());
        assert!(decode_envelope(PayloadKind::Proof, &bytes).is_ok());
        assert!(decode_envelope(PayloadKind::Proof, b"EFL").is_err());
    }

    #[test]
    fn test_non_canonical_scalar_is_rejected() {
        let mut bytes = encode_signatures(&sample(1)).unwrap();
        let s_offset = HEADER_LEN + 4 + 97;
        for b in &mut bytes[s_offset..s_offset + 32] {
            *b = 0xff;
        }
        assert!(matches!(
            decode_signatures(&bytes),
            Err(EcdsaFoldError::SerializationError(_))
        ));
    }

    #[test]
    fn test_public_key_encodings() {
        let key = SigningKey::from_bytes(&[5u8; 32]).unwrap();
        let pk = key.public_key();
        let compressed = encode_public_key(&pk).unwrap();
        assert_eq!(decode_public_key(&compressed).unwrap(), pk);

        let (x, y) = secp_coordinates(&pk).unwrap();
        let mut uncompressed = vec![0x04];
        uncompressed.extend(x.into_bigint().to_bytes_be());
        uncompressed.extend(y.into_bigint().to_bytes_be());
        assert_eq!(decode_public_key(&uncompressed).unwrap(), pk);

        uncompressed[64] ^= 1;
        assert!(decode_public_key(&uncompressed).is_err());
        assert!(encode_public_key(&SecpAffine::zero()).is_err());
    }

    #[test]
    fn test_json_batch_round_trip() {
        let sigs = sample(2);
        let json = signatures_to_json(&sigs).unwrap();
        assert_eq!(signatures_from_json(&json).unwrap(), sigs);

        let mut batch: JsonSignatureBatch = serde_json::from_str(&json).unwrap();
        batch.signatures[0].r = format!("0x{}", hex::encode(scalar_bytes_be(&sigs[0].r)));
        let decoded = signatures_from_json(&serde_json::to_string(&batch).unwrap()).unwrap();
        assert_eq!(decoded[0].r, sigs[0].r);

        batch.signatures[1].message_digest = "abcd".to_string();
        assert!(signatures_from_json(&serde_json::to_string(&batch).unwrap()).is_err());
    }

    proptest! {
        #[test]
        fn prop_scalar_decoding_matches_range(bytes in proptest::array::uniform32(any::<u8>())) {
            let in_range = BigUint::from_bytes_be(&bytes)
                < BigUint::from_bytes_be(&SecpScalar::MODULUS.to_bytes_be());
            prop_assert_eq!(canonical_scalar(&bytes).is_ok(), in_range);
        }

        #[test]
        fn prop_garbage_never_panics(data in proptest::collection::vec(any::<u8>(), 0..300)) {
            let _ = decode_signatures(&data);
            let _ = decode_public_key(&data);
        }
    }
}
