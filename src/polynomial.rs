//! Multilinear polynomials in evaluation form.
//!
//! A table of `2^m` evaluations is indexed so that the *first* coordinate of
//! an evaluation point selects the most significant bit of the index. Binding
//! in the sumcheck therefore halves the table from the top.

use ark_ff::{batch_inversion, PrimeField};
use rayon::prelude::*;

/// The multilinear extension of equality, `eq(r, x) = Π (r_i x_i + (1 - r_i)(1 - x_i))`.
#[derive(Clone, Debug, PartialEq)]
pub struct EqPolynomial<F: PrimeField> {
    r: Vec<F>,
}

impl<F: PrimeField> EqPolynomial<F> {
    pub fn new(r: Vec<F>) -> Self {
        Self { r }
    }

    /// `eq(r, x)` at an arbitrary point.
    pub fn evaluate(&self, x: &[F]) -> F {
        debug_assert_eq!(self.r.len(), x.len());
        self.r
            .iter()
            .zip(x.iter())
            .map(|(r, x)| *r * x + (F::one() - r) * (F::one() - x))
            .product()
    }

    /// `eq(r, bits(index))` for a single hypercube point.
    pub fn evaluate_index(&self, index: usize) -> F {
        let m = self.r.len();
        self.r
            .iter()
            .enumerate()
            .map(|(j, r)| {
                if (index >> (m - 1 - j)) & 1 == 1 {
                    *r
                } else {
                    F::one() - r
                }
            })
            .product()
    }

    /// All `2^m` values `eq(r, x)` over the hypercube.
    pub fn evals(&self) -> Vec<F> {
        let mut evals = vec![F::one()];
        for r in &self.r {
            let mut next = vec![F::zero(); evals.len() * 2];
            next.par_chunks_mut(2)
                .zip(evals.par_iter())
                .for_each(|(pair, e)| {
                    let hi = *e * r;
                    pair[1] = hi;
                    pair[0] = *e - hi;
                });
            evals = next;
        }
        evals
    }
}

/// Dense multilinear polynomial.
#[derive(Clone, Debug, PartialEq)]
pub struct MultilinearPolynomial<F: PrimeField> {
    num_vars: usize,
    evals: Vec<F>,
}

impl<F: PrimeField> MultilinearPolynomial<F> {
    /// Wraps a table whose length is a power of two.
    pub fn new(evals: Vec<F>) -> Self {
        debug_assert!(evals.len().is_power_of_two());
        Self {
            num_vars: evals.len().trailing_zeros() as usize,
            evals,
        }
    }

    pub fn num_vars(&self) -> usize {
        self.num_vars
    }

    pub fn len(&self) -> usize {
        self.evals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.evals.is_empty()
    }

    pub fn evals(&self) -> &[F] {
        &self.evals
    }

    /// Fixes the top variable to `r`.
    pub fn bind_top(&mut self, r: &F) {
        let half = self.evals.len() / 2;
        let (lo, hi) = self.evals.split_at_mut(half);
        lo.par_iter_mut().zip(hi.par_iter()).for_each(|(l, h)| {
            *l += *r * (*h - *l);
        });
        self.evals.truncate(half);
        self.num_vars -= 1;
    }

    pub fn evaluate(&self, point: &[F]) -> F {
        evaluate_table(&self.evals, point)
    }
}

/// `Σ table[i] · eq(point, i)`.
pub fn evaluate_table<F: PrimeField>(table: &[F], point: &[F]) -> F {
    let eq = EqPolynomial::new(point.to_vec()).evals();
    table
        .par_iter()
        .zip(eq.par_iter())
        .map(|(t, e)| *t * e)
        .sum()
}

/// Evaluates the unique polynomial of degree `evals.len() - 1` through
/// `(0, evals[0]), (1, evals[1]), ...` at `r`.
pub fn interpolate_at<F: PrimeField>(evals: &[F], r: &F) -> F {
    let n = evals.len();
    let mut denominators: Vec<F> = (0..n)
        .map(|i| {
            (0..n)
                .filter(|j| *j != i)
                .map(|j| {
                    if i > j {
                        F::from((i - j) as u64)
                    } else {
                        -F::from((j - i) as u64)
                    }
                })
                .product()
        })
        .collect();
    batch_inversion(&mut denominators);

    (0..n)
        .map(|i| {
            let numerator: F = (0..n)
                .filter(|j| *j != i)
                .map(|j| *r - F::from(j as u64))
                .product();
            evals[i] * numerator * denominators[i]
        })
        .sum()
}
