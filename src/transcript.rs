//! Fiat–Shamir helpers on top of `merlin` transcripts.

use ark_ec::AffineRepr;
use ark_ff::PrimeField;
use merlin::Transcript;

use crate::curves::{field_to_bytes, Affine, CycleCurve};

pub trait TranscriptProtocol {
    fn append_scalar<F: PrimeField>(&mut self, label: &'static [u8], scalar: &F);
    fn append_scalars<F: PrimeField>(&mut self, label: &'static [u8], scalars: &[F]);
    fn append_point<G: CycleCurve>(&mut self, label: &'static [u8], point: &Affine<G>);
    fn challenge_scalar<F: PrimeField>(&mut self, label: &'static [u8]) -> F;
    fn challenge_vector<F: PrimeField>(&mut self, label: &'static [u8], len: usize) -> Vec<F>;
}

impl TranscriptProtocol for Transcript {
    fn append_scalar<F: PrimeField>(&mut self, label: &'static [u8], scalar: &F) {
        self.append_message(label, &field_to_bytes(scalar));
    }

    fn append_scalars<F: PrimeField>(&mut self, label: &'static [u8], scalars: &[F]) {
        self.append_u64(b"len", scalars.len() as u64);
        for scalar in scalars {
            self.append_scalar(label, scalar);
        }
    }

    fn append_point<G: CycleCurve>(&mut self, label: &'static [u8], point: &Affine<G>) {
        // Affine coordinates with an explicit identity marker.
        match point.xy() {
            Some((x, y)) => {
                let mut bytes = Vec::with_capacity(65);
                bytes.push(1u8);
                bytes.extend_from_slice(&field_to_bytes(x));
                bytes.extend_from_slice(&field_to_bytes(y));
                self.append_message(label, &bytes);
            }
            None => self.append_message(label, &[0u8]),
        }
    }

    fn challenge_scalar<F: PrimeField>(&mut self, label: &'static [u8]) -> F {
        let mut buf = [0u8; 64];
        self.challenge_bytes(label, &mut buf);
        F::from_le_bytes_mod_order(&buf)
    }

    fn challenge_vector<F: PrimeField>(&mut self, label: &'static [u8], len: usize) -> Vec<F> {
        (0..len).map(|_| self.challenge_scalar(label)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::curves::{Scalar, Secp, Secq, SecpScalar};

    #[test]
    fn test_challenges_depend_on_history() {
        let mut t1 = Transcript::new(b"test");
        let mut t2 = Transcript::new(b"test");
        t1.append_scalar(b"a", &Scalar::from(1u64));
        t2.append_scalar(b"a", &Scalar::from(2u64));
        assert_ne!(
            t1.challenge_scalar::<Scalar>(b"c"),
            t2.challenge_scalar::<Scalar>(b"c")
        );

        let mut t3 = Transcript::new(b"test");
        let mut t4 = Transcript::new(b"test");
        t3.append_point::<Secq>(b"p", &Affine::<Secq>::generator());
        t4.append_point::<Secq>(b"p", &Affine::<Secq>::generator());
        assert_eq!(
            t3.challenge_vector::<Scalar>(b"v", 3),
            t4.challenge_vector::<Scalar>(b"v", 3)
        );
    }

    #[test]
    fn test_points_of_either_curve_are_absorbed() {
        let mut t1 = Transcript::new(b"test");
        let mut t2 = Transcript::new(b"test");
        t1.append_point::<Secp>(b"p", &Affine::<Secp>::generator());
        t2.append_point::<Secp>(b"p", &Affine::<Secp>::zero());
        assert_ne!(
            t1.challenge_scalar::<SecpScalar>(b"c"),
            t2.challenge_scalar::<SecpScalar>(b"c")
        );
    }
}
