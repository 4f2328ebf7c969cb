//! Non-interactive sumcheck over multilinear tables.
//!
//! Each round polynomial is sent as its evaluations at `0, 2, 3, ..., d`; the
//! value at `1` follows from the running claim, `g(1) = claim - g(0)`.
//!
//! Two provers are provided, matching the two sumchecks of the compression
//! stage:
//! - cubic: `Σ_x eq(x)·(A(x)·B(x) - u·C(x) - E(x))`
//! - quadratic: `Σ_y M(y)·Z(y)`

use ark_ff::PrimeField;
use merlin::Transcript;
use rayon::prelude::*;

use crate::codec::{read_scalar, read_vec, write_scalar, write_vec};
use crate::error::{EcdsaFoldError, Result};
use crate::polynomial::{interpolate_at, MultilinearPolynomial};
use crate::transcript::TranscriptProtocol;

/// One round message.
#[derive(Clone, Debug, PartialEq)]
pub struct RoundPoly<F: PrimeField> {
    /// `g(0), g(2), ..., g(d)`.
    evals: Vec<F>,
}

impl<F: PrimeField> RoundPoly<F> {
    fn degree(&self) -> usize {
        self.evals.len()
    }

    fn full_evals(&self, claim: &F) -> Vec<F> {
        let mut full = Vec::with_capacity(self.evals.len() + 1);
        full.push(self.evals[0]);
        full.push(*claim - self.evals[0]);
        full.extend_from_slice(&self.evals[1..]);
        full
    }

    fn evaluate(&self, claim: &F, r: &F) -> F {
        interpolate_at(&self.full_evals(claim), r)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct SumcheckProof<F: PrimeField> {
    rounds: Vec<RoundPoly<F>>,
}

impl<F: PrimeField> SumcheckProof<F> {
    pub fn num_rounds(&self) -> usize {
        self.rounds.len()
    }

    /// Replays the rounds, returning the final claim and the challenge point.
    pub fn verify(
        &self,
        claim: F,
        num_rounds: usize,
        degree: usize,
        transcript: &mut Transcript,
    ) -> Result<(F, Vec<F>)> {
        if self.rounds.len() != num_rounds {
            return Err(EcdsaFoldError::SerializationError(format!(
                "sumcheck has {} rounds, expected {}",
                self.rounds.len(),
                num_rounds
            )));
        }
        let mut claim = claim;
        let mut point = Vec::with_capacity(num_rounds);
        for round in &self.rounds {
            if round.degree() != degree {
                return Err(EcdsaFoldError::SerializationError(format!(
                    "round polynomial of degree {}, expected {}",
                    round.degree(),
                    degree
                )));
            }
            transcript.append_scalars(b"sumcheck_round", &round.evals);
            let r: F = transcript.challenge_scalar(b"sumcheck_challenge");
            claim = round.evaluate(&claim, &r);
            point.push(r);
        }
        Ok((claim, point))
    }

    /// Proves `Σ_x eq(x)·(A(x)·B(x) - u·C(x) - E(x)) = claim`.
    ///
    /// Returns the proof, the challenge point, and `[A, B, C, E]` at that point.
    #[allow(clippy::too_many_arguments)]
    pub fn prove_cubic(
        claim: F,
        eq: Vec<F>,
        a: Vec<F>,
        b: Vec<F>,
        c: Vec<F>,
        e: Vec<F>,
        u: F,
        transcript: &mut Transcript,
    ) -> (Self, Vec<F>, [F; 4]) {
        let mut eq = MultilinearPolynomial::new(eq);
        let mut a = MultilinearPolynomial::new(a);
        let mut b = MultilinearPolynomial::new(b);
        let mut c = MultilinearPolynomial::new(c);
        let mut e = MultilinearPolynomial::new(e);

        let num_rounds = eq.num_vars();
        let mut rounds = Vec::with_capacity(num_rounds);
        let mut point = Vec::with_capacity(num_rounds);
        let mut claim = claim;

        for _ in 0..num_rounds {
            let half = eq.len() / 2;
            let (eval_0, eval_2, eval_3) = (0..half)
                .into_par_iter()
                .map(|i| {
                    let at = |p: &MultilinearPolynomial<F>| {
                        let lo = p.evals()[i];
                        let hi = p.evals()[i + half];
                        let step = hi - lo;
                        (lo, hi + step, hi + step + step)
                    };
                    let (eq0, eq2, eq3) = at(&eq);
                    let (a0, a2, a3) = at(&a);
                    let (b0, b2, b3) = at(&b);
                    let (c0, c2, c3) = at(&c);
                    let (e0, e2, e3) = at(&e);
                    (
                        eq0 * (a0 * b0 - u * c0 - e0),
                        eq2 * (a2 * b2 - u * c2 - e2),
                        eq3 * (a3 * b3 - u * c3 - e3),
                    )
                })
                .reduce(
                    || (F::zero(), F::zero(), F::zero()),
                    |x, y| (x.0 + y.0, x.1 + y.1, x.2 + y.2),
                );

            let round = RoundPoly {
                evals: vec![eval_0, eval_2, eval_3],
            };
            transcript.append_scalars(b"sumcheck_round", &round.evals);
            let r: F = transcript.challenge_scalar(b"sumcheck_challenge");
            claim = round.evaluate(&claim, &r);
            rounds.push(round);
            point.push(r);

            eq.bind_top(&r);
            a.bind_top(&r);
            b.bind_top(&r);
            c.bind_top(&r);
            e.bind_top(&r);
        }
        debug_assert_eq!(
            claim,
            eq.evals()[0] * (a.evals()[0] * b.evals()[0] - u * c.evals()[0] - e.evals()[0])
        );

        (
            Self { rounds },
            point,
            [a.evals()[0], b.evals()[0], c.evals()[0], e.evals()[0]],
        )
    }

    /// Proves `Σ_y M(y)·Z(y) = claim`. Returns `[M, Z]` at the challenge point.
    pub fn prove_quadratic(
        claim: F,
        m: Vec<F>,
        z: Vec<F>,
        transcript: &mut Transcript,
    ) -> (Self, Vec<F>, [F; 2]) {
        let mut m = MultilinearPolynomial::new(m);
        let mut z = MultilinearPolynomial::new(z);

        let num_rounds = m.num_vars();
        let mut rounds = Vec::with_capacity(num_rounds);
        let mut point = Vec::with_capacity(num_rounds);
        let mut claim = claim;

        for _ in 0..num_rounds {
            let half = m.len() / 2;
            let (eval_0, eval_2) = (0..half)
                .into_par_iter()
                .map(|i| {
                    let (m_lo, m_hi) = (m.evals()[i], m.evals()[i + half]);
                    let (z_lo, z_hi) = (z.evals()[i], z.evals()[i + half]);
                    let m2 = m_hi + m_hi - m_lo;
                    let z2 = z_hi + z_hi - z_lo;
                    (m_lo * z_lo, m2 * z2)
                })
                .reduce(
                    || (F::zero(), F::zero()),
                    |x, y| (x.0 + y.0, x.1 + y.1),
                );

            let round = RoundPoly {
                evals: vec![eval_0, eval_2],
            };
            transcript.append_scalars(b"sumcheck_round", &round.evals);
            let r: F = transcript.challenge_scalar(b"sumcheck_challenge");
            claim = round.evaluate(&claim, &r);
            rounds.push(round);
            point.push(r);

            m.bind_top(&r);
            z.bind_top(&r);
        }
        debug_assert_eq!(claim, m.evals()[0] * z.evals()[0]);

        (Self { rounds }, point, [m.evals()[0], z.evals()[0]])
    }

    pub fn write_to(&self, out: &mut Vec<u8>) -> Result<()> {
        write_vec(out, &self.rounds, |out, round| write_vec(out, &round.evals, write_scalar::<F>))
    }

    pub fn read_from(reader: &mut &[u8]) -> Result<Self> {
        let rounds = read_vec(reader, 4, |reader| {
            Ok(RoundPoly {
                evals: read_vec(reader, 32, read_scalar::<F>)?,
            })
        })?;
        if rounds.iter().any(|round| round.evals.is_empty()) {
            return Err(EcdsaFoldError::SerializationError(
                "empty round polynomial".to_string(),
            ));
        }
        Ok(Self { rounds })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::curves::Scalar;
    use crate::polynomial::{evaluate_table, EqPolynomial};
    use ark_ff::{One, UniformRand, Zero};
    use rand_chacha::ChaCha20Rng;
    use rand_core::SeedableRng;

    fn random_vec(rng: &mut ChaCha20Rng, n: usize) -> Vec<Scalar> {
        (0..n).map(|_| Scalar::rand(rng)).collect()
    }

    #[test]
    fn test_quadratic_sumcheck() {
        let mut rng = ChaCha20Rng::seed_from_u64(31);
        let m = random_vec(&mut rng, 16);
        let z = random_vec(&mut rng, 16);
        let claim: Scalar = m.iter().zip(z.iter()).map(|(a, b)| *a * b).sum();

        let mut prover = Transcript::new(b"sumcheck-test");
        let (proof, point, finals) = SumcheckProof::prove_quadratic(claim, m.clone(), z.clone(), &mut prover);

        let mut verifier = Transcript::new(b"sumcheck-test");
        let (final_claim, vpoint) = proof.verify(claim, 4, 2, &mut verifier).unwrap();
        assert_eq!(point, vpoint);
        assert_eq!(finals[0], evaluate_table(&m, &point));
        assert_eq!(finals[1], evaluate_table(&z, &point));
        assert_eq!(final_claim, finals[0] * finals[1]);

        let mut wrong = Transcript::new(b"sumcheck-test");
        let (bad_claim, _) = proof.verify(claim + Scalar::one(), 4, 2, &mut wrong).unwrap();
        assert_ne!(bad_claim, final_claim);
    }

    #[test]
    fn test_cubic_sumcheck_on_satisfied_relation() {
        let mut rng = ChaCha20Rng::seed_from_u64(32);
        let n = 8;
        let a = random_vec(&mut rng, n);
        let b = random_vec(&mut rng, n);
        let c = random_vec(&mut rng, n);
        let u = Scalar::rand(&mut rng);
        // E chosen so every row satisfies A·B = u·C + E.
        let e: Vec<Scalar> = (0..n).map(|i| a[i] * b[i] - u * c[i]).collect();
        let tau = random_vec(&mut rng, 3);
        let eq = EqPolynomial::new(tau.clone()).evals();

        let mut prover = Transcript::new(b"cubic");
        let (proof, point, finals) = SumcheckProof::prove_cubic(
            Scalar::zero(),
            eq,
            a.clone(),
            b.clone(),
            c.clone(),
            e.clone(),
            u,
            &mut prover,
        );

        let mut verifier = Transcript::new(b"cubic");
        let (final_claim, vpoint) = proof.verify(Scalar::zero(), 3, 3, &mut verifier).unwrap();
        assert_eq!(point, vpoint);
        let expected = EqPolynomial::new(tau).evaluate(&point)
            * (finals[0] * finals[1] - u * finals[2] - finals[3]);
        assert_eq!(final_claim, expected);
        assert_eq!(finals[3], evaluate_table(&e, &point));
    }

    #[test]
    fn test_wrong_shape_is_rejected_and_bytes_round_trip() {
        let mut rng = ChaCha20Rng::seed_from_u64(33);
        let m = random_vec(&mut rng, 4);
        let z = random_vec(&mut rng, 4);
        let claim: Scalar = m.iter().zip(z.iter()).map(|(a, b)| *a * b).sum();
        let mut t = Transcript::new(b"shape");
        let (proof, _, _) = SumcheckProof::prove_quadratic(claim, m, z, &mut t);

        assert!(proof.verify(claim, 3, 2, &mut Transcript::new(b"shape")).is_err());
        assert!(proof.verify(claim, 2, 3, &mut Transcript::new(b"shape")).is_err());

        let mut bytes = Vec::new();
        proof.write_to(&mut bytes).unwrap();
        let mut reader = bytes.as_slice();
        assert_eq!(SumcheckProof::read_from(&mut reader).unwrap(), proof);
        assert!(reader.is_empty());
    }
}
