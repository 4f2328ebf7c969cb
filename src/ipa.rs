//! Inner-product argument for opening Pedersen vector commitments.
//!
//! Proves knowledge of `a` with `C = <a, G>` and `<a, b> = v` for a public
//! vector `b` (an `eq` table, so `v` is a multilinear evaluation). Each round
//! halves the vectors:
//!
//! ```text
//! L = <a_L, G_R> + <a_L, b_R>·U      R = <a_R, G_L> + <a_R, b_L>·U
//! a' = x·a_L + x⁻¹·a_R   b' = x⁻¹·b_L + x·b_R   G' = x⁻¹·G_L + x·G_R
//! ```
//!
//! The verifier folds everything into one multi-scalar multiplication.

use ark_ec::{CurveGroup, VariableBaseMSM};
use ark_ff::{batch_inversion, Field, One, Zero};
use merlin::Transcript;
use rayon::prelude::*;

use crate::codec::{read_point, read_scalar, read_vec, write_point, write_scalar, write_vec};
use crate::commitment::{Commitment, CommitmentKey};
use crate::curves::{Affine, CycleCurve, Projective};
use crate::error::{EcdsaFoldError, Result};
use crate::transcript::TranscriptProtocol;

#[derive(Clone, Debug, PartialEq)]
pub struct InnerProductProof<G: CycleCurve> {
    l_vec: Vec<Affine<G>>,
    r_vec: Vec<Affine<G>>,
    a: G::Scalar,
}

fn inner_product<F: Field>(a: &[F], b: &[F]) -> F {
    a.par_iter().zip(b.par_iter()).map(|(x, y)| *x * y).sum()
}

/// Absorbs the statement and returns the inner-product generator `U = c·H`.
fn bind_statement<G: CycleCurve>(
    ck: &CommitmentKey<G>,
    comm: &Commitment<G>,
    value: &G::Scalar,
    transcript: &mut Transcript,
) -> Projective<G> {
    transcript.append_point::<G>(b"ipa_commitment", comm.point());
    transcript.append_scalar(b"ipa_value", value);
    let c: G::Scalar = transcript.challenge_scalar(b"ipa_u");
    *ck.h() * c
}

impl<G: CycleCurve> InnerProductProof<G> {
    pub fn num_rounds(&self) -> usize {
        self.l_vec.len()
    }

    pub fn prove(
        ck: &CommitmentKey<G>,
        comm: &Commitment<G>,
        a: &[G::Scalar],
        b: &[G::Scalar],
        value: &G::Scalar,
        transcript: &mut Transcript,
    ) -> Result<Self> {
        let n = a.len();
        if n == 0 || !n.is_power_of_two() || b.len() != n || n > ck.len() {
            return Err(EcdsaFoldError::MalformedState(format!(
                "inner-product opening of length {} (|b| = {}, key {})",
                n,
                b.len(),
                ck.len()
            )));
        }
        let u = bind_statement(ck, comm, value, transcript).into_affine();

        let mut a = a.to_vec();
        let mut b = b.to_vec();
        let mut g = ck.gens()[..n].to_vec();
        let rounds = n.trailing_zeros() as usize;
        let mut l_vec = Vec::with_capacity(rounds);
        let mut r_vec = Vec::with_capacity(rounds);

        while a.len() > 1 {
            let half = a.len() / 2;
            let (a_l, a_r) = a.split_at(half);
            let (b_l, b_r) = b.split_at(half);
            let (g_l, g_r) = g.split_at(half);

            let (l, r) = rayon::join(
                || {
                    Projective::<G>::msm_unchecked(g_r, a_l) + u * inner_product(a_l, b_r)
                },
                || {
                    Projective::<G>::msm_unchecked(g_l, a_r) + u * inner_product(a_r, b_l)
                },
            );
            let l = l.into_affine();
            let r = r.into_affine();
            transcript.append_point::<G>(b"ipa_l", &l);
            transcript.append_point::<G>(b"ipa_r", &r);
            let x: G::Scalar = transcript.challenge_scalar(b"ipa_x");
            let x_inv = x.inverse().ok_or_else(|| {
                EcdsaFoldError::MalformedState("zero inner-product challenge".to_string())
            })?;

            let a_next: Vec<G::Scalar> = a_l
                .par_iter()
                .zip(a_r.par_iter())
                .map(|(lo, hi)| x * lo + x_inv * hi)
                .collect();
            let b_next: Vec<G::Scalar> = b_l
                .par_iter()
                .zip(b_r.par_iter())
                .map(|(lo, hi)| x_inv * lo + x * hi)
                .collect();
            let g_next: Vec<Projective<G>> = g_l
                .par_iter()
                .zip(g_r.par_iter())
                .map(|(lo, hi)| *lo * x_inv + *hi * x)
                .collect();

            a = a_next;
            b = b_next;
            g = Projective::<G>::normalize_batch(&g_next);
            l_vec.push(l);
            r_vec.push(r);
        }

        Ok(Self {
            l_vec,
            r_vec,
            a: a[0],
        })
    }

    /// Checks the opening of `comm` to `value` against `b`.
    pub fn verify(
        &self,
        ck: &CommitmentKey<G>,
        comm: &Commitment<G>,
        b: &[G::Scalar],
        value: &G::Scalar,
        transcript: &mut Transcript,
    ) -> Result<bool> {
        let n = b.len();
        if n == 0 || !n.is_power_of_two() || n > ck.len() {
            return Ok(false);
        }
        let rounds = n.trailing_zeros() as usize;
        if self.l_vec.len() != rounds || self.r_vec.len() != rounds {
            return Ok(false);
        }
        let u = bind_statement(ck, comm, value, transcript).into_affine();

        let mut challenges: Vec<G::Scalar> = Vec::with_capacity(rounds);
        for (l, r) in self.l_vec.iter().zip(self.r_vec.iter()) {
            transcript.append_point::<G>(b"ipa_l", l);
            transcript.append_point::<G>(b"ipa_r", r);
            challenges.push(transcript.challenge_scalar(b"ipa_x"));
        }
        if challenges.iter().any(|x| x.is_zero()) {
            return Ok(false);
        }
        let mut inverses = challenges.clone();
        batch_inversion(&mut inverses);

        // s_i = Π_j x_j^{±1}; round j splits on bit (rounds - 1 - j) of i.
        let s: Vec<G::Scalar> = (0..n)
            .into_par_iter()
            .map(|i| {
                (0..rounds)
                    .map(|j| {
                        if (i >> (rounds - 1 - j)) & 1 == 1 {
                            challenges[j]
                        } else {
                            inverses[j]
                        }
                    })
                    .product()
            })
            .collect();
        let b_final = inner_product(&s, b);

        // a·<s, G> + a·b_final·U - C - v·U - Σ (x²·L + x⁻²·R) = 0
        let mut bases: Vec<Affine<G>> = Vec::with_capacity(n + 2 * rounds + 2);
        let mut scalars: Vec<G::Scalar> = Vec::with_capacity(n + 2 * rounds + 2);
        bases.extend_from_slice(&ck.gens()[..n]);
        scalars.extend(s.iter().map(|s| *s * self.a));
        bases.push(u);
        scalars.push(self.a * b_final - value);
        bases.push(*comm.point());
        scalars.push(-G::Scalar::one());
        for j in 0..rounds {
            bases.push(self.l_vec[j]);
            scalars.push(-challenges[j].square());
            bases.push(self.r_vec[j]);
            scalars.push(-inverses[j].square());
        }
        let check = Projective::<G>::msm_unchecked(&bases, &scalars);
        Ok(check.is_zero())
    }

    pub fn write_to(&self, out: &mut Vec<u8>) -> Result<()> {
        write_vec(out, &self.l_vec, write_point::<G>)?;
        write_vec(out, &self.r_vec, write_point::<G>)?;
        write_scalar(out, &self.a)
    }

    pub fn read_from(reader: &mut &[u8]) -> Result<Self> {
        let l_vec = read_vec(reader, 32, read_point::<G>)?;
        let r_vec = read_vec(reader, 32, read_point::<G>)?;
        let a = read_scalar(reader)?;
        Ok(Self { l_vec, r_vec, a })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::curves::{Scalar, Secq};
    use crate::polynomial::{evaluate_table, EqPolynomial};
    use ark_ff::{One, UniformRand};
    use rand_chacha::ChaCha20Rng;
    use rand_core::SeedableRng;

    fn setup(n: usize, seed: u64) -> (CommitmentKey<Secq>, Vec<Scalar>, Vec<Scalar>, Vec<Scalar>) {
        let mut rng = ChaCha20Rng::seed_from_u64(seed);
        let ck = CommitmentKey::setup(&[8u8; 32], n);
        let a: Vec<Scalar> = (0..n).map(|_| Scalar::rand(&mut rng)).collect();
        let point: Vec<Scalar> = (0..n.trailing_zeros())
            .map(|_| Scalar::rand(&mut rng))
            .collect();
        let b = EqPolynomial::new(point.clone()).evals();
        (ck, a, b, point)
    }

    #[test]
    fn test_opening_verifies() {
        let (ck, a, b, point) = setup(16, 41);
        let comm = ck.commit(&a).unwrap();
        let value = evaluate_table(&a, &point);

        let mut pt = Transcript::new(b"ipa-test");
        let proof = InnerProductProof::prove(&ck, &comm, &a, &b, &value, &mut pt).unwrap();
        assert_eq!(proof.num_rounds(), 4);

        let mut vt = Transcript::new(b"ipa-test");
        assert!(proof.verify(&ck, &comm, &b, &value, &mut vt).unwrap());
    }

    #[test]
    fn test_wrong_value_or_commitment_fails() {
        let (ck, a, b, point) = setup(8, 42);
        let comm = ck.commit(&a).unwrap();
        let value = evaluate_table(&a, &point);
        let proof =
            InnerProductProof::prove(&ck, &comm, &a, &b, &value, &mut Transcript::new(b"t")).unwrap();

        let wrong_value = value + Scalar::one();
        assert!(!proof
            .verify(&ck, &comm, &b, &wrong_value, &mut Transcript::new(b"t"))
            .unwrap());

        let other = ck.commit(&b).unwrap();
        assert!(!proof
            .verify(&ck, &other, &b, &value, &mut Transcript::new(b"t"))
            .unwrap());

        assert!(!proof
            .verify(&ck, &comm, &b[..4], &value, &mut Transcript::new(b"t"))
            .unwrap());
    }

    #[test]
    fn test_proof_bytes_round_trip() {
        let (ck, a, b, point) = setup(4, 43);
        let comm = ck.commit(&a).unwrap();
        let value = evaluate_table(&a, &point);
        let proof =
            InnerProductProof::prove(&ck, &comm, &a, &b, &value, &mut Transcript::new(b"t")).unwrap();
        let mut bytes = Vec::new();
        proof.write_to(&mut bytes).unwrap();
        let mut reader = bytes.as_slice();
        assert_eq!(InnerProductProof::read_from(&mut reader).unwrap(), proof);
    }
}
