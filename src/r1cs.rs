//! R1CS integration for the folding engine.
//!
//! Mathematical Foundation:
//! An R1CS shape is a triple of sparse matrices `(A, B, C)` over the circuit
//! field. A vector `z = (W, u, x)` satisfies the *relaxed* relation with error
//! vector `E` when `(Az) ◦ (Bz) = u·(Cz) + E`. Plain R1CS is the special case
//! `u = 1, E = 0`. Relaxation is what makes two instances foldable into one:
//! the cross term of the product is absorbed into `E`.
//!
//! Layout:
//! - columns `0..num_vars` hold the witness `W` (padded to a power of two),
//! - column `num_vars` holds `u` (the constant one for plain instances),
//! - columns `num_vars + 1..` hold the public inputs `x`.
//!
//! Rows are padded to a power of two with empty constraints so the sumcheck
//! in the compression stage runs over a full boolean hypercube.
//!
//! Circuits are written once against [`ConstraintSystem`]. Two back ends
//! implement it: [`ShapeCS`] records the matrices and [`WitnessCS`] records the
//! assignment, so the structure of a step never depends on its values.
//!
//! Everything here is generic over the circuit field, since the primary and
//! secondary circuits live over the two fields of the curve cycle. Instances
//! carry commitments on the curve whose scalar field is the circuit field.

use std::collections::BTreeMap;
use std::ops::{Add, Neg, Sub};

use ark_ff::{One, PrimeField, Zero};
use merlin::Transcript;
use rayon::prelude::*;

use crate::bignat;
use crate::commitment::{Commitment, CommitmentKey};
use crate::curves::{convert_field_mod, field_to_bytes, CycleCurve};
use crate::error::{EcdsaFoldError, Result};
use crate::poseidon::PoseidonRO;
use crate::transcript::TranscriptProtocol;

/// A variable of a constraint system before column assignment.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Variable {
    One,
    Input(usize),
    Aux(usize),
}

/// Sparse linear combination `sum coeff_i * var_i`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LinearCombination<F: PrimeField> {
    terms: Vec<(Variable, F)>,
}

impl<F: PrimeField> LinearCombination<F> {
    pub fn zero() -> Self {
        Self { terms: Vec::new() }
    }

    pub fn from_variable(var: Variable) -> Self {
        Self {
            terms: vec![(var, F::one())],
        }
    }

    pub fn constant(value: F) -> Self {
        Self {
            terms: vec![(Variable::One, value)],
        }
    }

    pub fn add_term(mut self, var: Variable, coeff: F) -> Self {
        self.terms.push((var, coeff));
        self
    }

    pub fn terms(&self) -> &[(Variable, F)] {
        &self.terms
    }

    /// True when the combination only references the constant-one variable.
    pub fn is_constant(&self) -> bool {
        self.terms.iter().all(|(var, _)| *var == Variable::One)
    }

    pub fn scale(&self, factor: F) -> Self {
        Self {
            terms: self
                .terms
                .iter()
                .map(|(var, coeff)| (*var, *coeff * factor))
                .collect(),
        }
    }

    /// Merges repeated variables and drops zero coefficients.
    ///
    /// Gadgets that feed combinations back into themselves round after round
    /// (the permutation rounds of the hash) call this to keep them bounded.
    pub fn compact(self) -> Self {
        let mut merged: BTreeMap<Variable, F> = BTreeMap::new();
        for (var, coeff) in self.terms {
            *merged.entry(var).or_insert_with(F::zero) += coeff;
        }
        Self {
            terms: merged
                .into_iter()
                .filter(|(_, coeff)| !coeff.is_zero())
                .collect(),
        }
    }
}

impl<F: PrimeField> Add for LinearCombination<F> {
    type Output = LinearCombination<F>;

    fn add(mut self, other: LinearCombination<F>) -> LinearCombination<F> {
        self.terms.extend(other.terms);
        self
    }
}

impl<F: PrimeField> Sub for LinearCombination<F> {
    type Output = LinearCombination<F>;

    fn sub(self, other: LinearCombination<F>) -> LinearCombination<F> {
        self + (-other)
    }
}

impl<F: PrimeField> Neg for LinearCombination<F> {
    type Output = LinearCombination<F>;

    fn neg(self) -> LinearCombination<F> {
        self.scale(-F::one())
    }
}

/// Interface gadgets are written against.
pub trait ConstraintSystem<F: PrimeField> {
    /// Allocates a private (witness) variable.
    fn alloc(&mut self, value: F) -> Variable;

    /// Allocates a public input.
    fn alloc_input(&mut self, value: F) -> Variable;

    /// Enforces `a * b = c`.
    fn enforce(&mut self, a: LinearCombination<F>, b: LinearCombination<F>, c: LinearCombination<F>);
}

type Constraint<F> = (LinearCombination<F>, LinearCombination<F>, LinearCombination<F>);

/// Records constraint structure and ignores values.
#[derive(Clone, Debug, Default)]
pub struct ShapeCS<F: PrimeField> {
    constraints: Vec<Constraint<F>>,
    num_aux: usize,
    num_inputs: usize,
}

impl<F: PrimeField> ShapeCS<F> {
    pub fn new() -> Self {
        Self {
            constraints: Vec::new(),
            num_aux: 0,
            num_inputs: 0,
        }
    }

    pub fn num_constraints(&self) -> usize {
        self.constraints.len()
    }

    pub fn num_aux(&self) -> usize {
        self.num_aux
    }

    pub fn num_inputs(&self) -> usize {
        self.num_inputs
    }
}

impl<F: PrimeField> ConstraintSystem<F> for ShapeCS<F> {
    fn alloc(&mut self, _value: F) -> Variable {
        self.num_aux += 1;
        Variable::Aux(self.num_aux - 1)
    }

    fn alloc_input(&mut self, _value: F) -> Variable {
        self.num_inputs += 1;
        Variable::Input(self.num_inputs - 1)
    }

    fn enforce(&mut self, a: LinearCombination<F>, b: LinearCombination<F>, c: LinearCombination<F>) {
        self.constraints.push((a, b, c));
    }
}

/// Records variable assignments and ignores constraints.
#[derive(Clone, Debug, Default)]
pub struct WitnessCS<F: PrimeField> {
    aux: Vec<F>,
    inputs: Vec<F>,
    num_constraints: usize,
}

impl<F: PrimeField> WitnessCS<F> {
    pub fn new() -> Self {
        Self {
            aux: Vec::new(),
            inputs: Vec::new(),
            num_constraints: 0,
        }
    }

    pub fn aux(&self) -> &[F] {
        &self.aux
    }

    pub fn inputs(&self) -> &[F] {
        &self.inputs
    }

    pub fn num_constraints(&self) -> usize {
        self.num_constraints
    }

    /// Value of a linear combination under the current assignment.
    pub fn eval(&self, lc: &LinearCombination<F>) -> F {
        lc.terms()
            .iter()
            .map(|(var, coeff)| {
                let value = match var {
                    Variable::One => F::one(),
                    Variable::Input(i) => self.inputs[*i],
                    Variable::Aux(i) => self.aux[*i],
                };
                value * coeff
            })
            .sum()
    }

    /// Splits the assignment into a padded witness and the public inputs.
    pub fn into_assignment(self, shape: &R1CSShape<F>) -> Result<(R1CSWitness<F>, Vec<F>)> {
        if self.aux.len() > shape.num_vars || self.inputs.len() != shape.num_io {
            return Err(EcdsaFoldError::MalformedState(format!(
                "assignment ({} aux, {} inputs) does not fit shape ({} vars, {} inputs)",
                self.aux.len(),
                self.inputs.len(),
                shape.num_vars,
                shape.num_io
            )));
        }
        let mut w = self.aux;
        w.resize(shape.num_vars, F::zero());
        Ok((R1CSWitness { w }, self.inputs))
    }
}

impl<F: PrimeField> ConstraintSystem<F> for WitnessCS<F> {
    fn alloc(&mut self, value: F) -> Variable {
        self.aux.push(value);
        Variable::Aux(self.aux.len() - 1)
    }

    fn alloc_input(&mut self, value: F) -> Variable {
        self.inputs.push(value);
        Variable::Input(self.inputs.len() - 1)
    }

    fn enforce(&mut self, _a: LinearCombination<F>, _b: LinearCombination<F>, _c: LinearCombination<F>) {
        self.num_constraints += 1;
    }
}

/// Compressed sparse row matrix.
#[derive(Clone, Debug, PartialEq)]
pub struct SparseMatrix<F: PrimeField> {
    num_rows: usize,
    row_ptr: Vec<usize>,
    cols: Vec<usize>,
    vals: Vec<F>,
}

impl<F: PrimeField> SparseMatrix<F> {
    /// Builds a matrix from per-row entries; duplicate columns are summed and
    /// zero entries dropped. Rows beyond `rows.len()` are empty.
    fn from_rows(rows: Vec<Vec<(usize, F)>>, num_rows: usize) -> Self {
        let mut row_ptr = Vec::with_capacity(num_rows + 1);
        let mut cols = Vec::new();
        let mut vals = Vec::new();
        row_ptr.push(0);
        for row in 0..num_rows {
            if let Some(entries) = rows.get(row) {
                let mut merged: BTreeMap<usize, F> = BTreeMap::new();
                for (col, val) in entries {
                    *merged.entry(*col).or_insert_with(F::zero) += val;
                }
                for (col, val) in merged {
                    if !val.is_zero() {
                        cols.push(col);
                        vals.push(val);
                    }
                }
            }
            row_ptr.push(cols.len());
        }
        Self {
            num_rows,
            row_ptr,
            cols,
            vals,
        }
    }

    pub fn nnz(&self) -> usize {
        self.vals.len()
    }

    fn row(&self, row: usize) -> impl Iterator<Item = (usize, &F)> + '_ {
        let range = self.row_ptr[row]..self.row_ptr[row + 1];
        self.cols[range.clone()].iter().copied().zip(self.vals[range].iter())
    }

    pub fn multiply_vec(&self, z: &[F]) -> Vec<F> {
        (0..self.num_rows)
            .into_par_iter()
            .map(|row| self.row(row).map(|(col, val)| *val * z[col]).sum())
            .collect()
    }

    /// `sum_{i,j} M[i][j] * eq_rows[i] * eq_cols[j]`.
    pub fn evaluate(&self, eq_rows: &[F], eq_cols: &[F]) -> F {
        (0..self.num_rows)
            .into_par_iter()
            .map(|row| {
                let inner: F = self.row(row).map(|(col, val)| *val * eq_cols[col]).sum();
                inner * eq_rows[row]
            })
            .sum()
    }

    /// `out[j] += coeff * sum_i M[i][j] * eq_rows[i]`.
    fn accumulate_bound_rows(&self, eq_rows: &[F], coeff: F, out: &mut [F]) {
        for row in 0..self.num_rows {
            let weight = eq_rows[row] * coeff;
            if weight.is_zero() {
                continue;
            }
            for (col, val) in self.row(row) {
                out[col] += weight * val;
            }
        }
    }

    fn absorb(&self, hasher: &mut blake3::Hasher) {
        hasher.update(&(self.num_rows as u64).to_le_bytes());
        hasher.update(&(self.vals.len() as u64).to_le_bytes());
        for row in 0..self.num_rows {
            for (col, val) in self.row(row) {
                hasher.update(&(row as u64).to_le_bytes());
                hasher.update(&(col as u64).to_le_bytes());
                hasher.update(&field_to_bytes(val));
            }
        }
    }
}

/// The fixed structure of a step circuit.
#[derive(Clone, Debug, PartialEq)]
pub struct R1CSShape<F: PrimeField> {
    num_cons: usize,
    num_vars: usize,
    num_io: usize,
    a: SparseMatrix<F>,
    b: SparseMatrix<F>,
    c: SparseMatrix<F>,
}

impl<F: PrimeField> R1CSShape<F> {
    /// Converts recorded constraints into padded sparse matrices.
    pub fn from_shape_cs(cs: &ShapeCS<F>) -> Result<Self> {
        if cs.constraints.is_empty() {
            return Err(EcdsaFoldError::InvalidParameters(
                "circuit has no constraints".to_string(),
            ));
        }
        let num_io = cs.num_inputs;
        let num_vars = cs.num_aux.max(num_io + 1).max(1).next_power_of_two();
        let num_cons = cs.constraints.len().next_power_of_two();

        let column = |var: &Variable| match var {
            Variable::Aux(i) => *i,
            Variable::One => num_vars,
            Variable::Input(i) => num_vars + 1 + *i,
        };
        let to_row = |lc: &LinearCombination<F>| -> Vec<(usize, F)> {
            lc.terms()
                .iter()
                .map(|(var, coeff)| (column(var), *coeff))
                .collect()
        };

        let mut rows_a = Vec::with_capacity(cs.constraints.len());
        let mut rows_b = Vec::with_capacity(cs.constraints.len());
        let mut rows_c = Vec::with_capacity(cs.constraints.len());
        for (a, b, c) in &cs.constraints {
            rows_a.push(to_row(a));
            rows_b.push(to_row(b));
            rows_c.push(to_row(c));
        }

        Ok(Self {
            num_cons,
            num_vars,
            num_io,
            a: SparseMatrix::from_rows(rows_a, num_cons),
            b: SparseMatrix::from_rows(rows_b, num_cons),
            c: SparseMatrix::from_rows(rows_c, num_cons),
        })
    }

    pub fn num_cons(&self) -> usize {
        self.num_cons
    }

    pub fn num_vars(&self) -> usize {
        self.num_vars
    }

    pub fn num_io(&self) -> usize {
        self.num_io
    }

    /// Number of non-zero entries in `A`, `B` and `C` combined.
    pub fn nnz(&self) -> usize {
        self.a.nnz() + self.b.nnz() + self.c.nnz()
    }

    /// `z = (W, u, x)` zero-padded to `2 * num_vars` entries.
    pub fn build_z(&self, w: &[F], u: F, x: &[F]) -> Result<Vec<F>> {
        if w.len() != self.num_vars || x.len() != self.num_io {
            return Err(EcdsaFoldError::MalformedState(format!(
                "z layout mismatch: |W| = {} (want {}), |x| = {} (want {})",
                w.len(),
                self.num_vars,
                x.len(),
                self.num_io
            )));
        }
        let mut z = Vec::with_capacity(2 * self.num_vars);
        z.extend_from_slice(w);
        z.push(u);
        z.extend_from_slice(x);
        z.resize(2 * self.num_vars, F::zero());
        Ok(z)
    }

    /// `(Az, Bz, Cz)`.
    pub fn multiply_vec(&self, z: &[F]) -> Result<(Vec<F>, Vec<F>, Vec<F>)> {
        if z.len() < self.num_vars + 1 + self.num_io {
            return Err(EcdsaFoldError::MalformedState(format!(
                "z has {} entries, shape needs {}",
                z.len(),
                self.num_vars + 1 + self.num_io
            )));
        }
        let (az, (bz, cz)) = rayon::join(
            || self.a.multiply_vec(z),
            || rayon::join(|| self.b.multiply_vec(z), || self.c.multiply_vec(z)),
        );
        Ok((az, bz, cz))
    }

    /// Plain satisfiability `Az ◦ Bz = Cz` with `u = 1`.
    pub fn is_sat(&self, witness: &R1CSWitness<F>, x: &[F]) -> Result<bool> {
        let z = self.build_z(&witness.w, F::one(), x)?;
        let (az, bz, cz) = self.multiply_vec(&z)?;
        Ok((0..self.num_cons)
            .into_par_iter()
            .all(|i| az[i] * bz[i] == cz[i]))
    }

    /// Plain satisfiability including the witness commitment.
    pub fn is_sat_committed<G: CycleCurve<Scalar = F>>(
        &self,
        ck: &CommitmentKey<G>,
        instance: &R1CSInstance<G>,
        witness: &R1CSWitness<F>,
    ) -> Result<bool> {
        if !self.is_sat(witness, &instance.x)? {
            return Ok(false);
        }
        Ok(ck.commit(&witness.w)? == instance.comm_w)
    }

    /// Relaxed satisfiability including the commitment openings.
    pub fn is_sat_relaxed<G: CycleCurve<Scalar = F>>(
        &self,
        ck: &CommitmentKey<G>,
        instance: &RelaxedR1CSInstance<G>,
        witness: &RelaxedR1CSWitness<F>,
    ) -> Result<bool> {
        if witness.e.len() != self.num_cons {
            return Ok(false);
        }
        let z = self.build_z(&witness.w, instance.u, &instance.x)?;
        let (az, bz, cz) = self.multiply_vec(&z)?;
        let u = instance.u;
        let rows_ok = (0..self.num_cons)
            .into_par_iter()
            .all(|i| az[i] * bz[i] == u * cz[i] + witness.e[i]);
        if !rows_ok {
            return Ok(false);
        }
        let (comm_w, comm_e) = rayon::join(|| ck.commit(&witness.w), || ck.commit(&witness.e));
        Ok(comm_w? == instance.comm_w && comm_e? == instance.comm_e)
    }

    /// Cross term `T = Az1◦Bz2 + Az2◦Bz1 - u1·Cz2 - u2·Cz1` and its commitment.
    pub fn commit_t<G: CycleCurve<Scalar = F>>(
        &self,
        ck: &CommitmentKey<G>,
        running: &RelaxedR1CSInstance<G>,
        running_witness: &RelaxedR1CSWitness<F>,
        step: &R1CSInstance<G>,
        step_witness: &R1CSWitness<F>,
    ) -> Result<(Vec<F>, Commitment<G>)> {
        let z1 = self.build_z(&running_witness.w, running.u, &running.x)?;
        let z2 = self.build_z(&step_witness.w, F::one(), &step.x)?;
        let (first, second) = rayon::join(|| self.multiply_vec(&z1), || self.multiply_vec(&z2));
        let (az1, bz1, cz1) = first?;
        let (az2, bz2, cz2) = second?;
        let u1 = running.u;
        let t: Vec<F> = (0..self.num_cons)
            .into_par_iter()
            .map(|i| az1[i] * bz2[i] + az2[i] * bz1[i] - u1 * cz2[i] - cz1[i])
            .collect();
        let comm_t = ck.commit(&t)?;
        Ok((t, comm_t))
    }

    /// `(A(rx, ry), B(rx, ry), C(rx, ry))` from the eq tables of both points.
    pub fn evaluate_matrices(&self, eq_rx: &[F], eq_ry: &[F]) -> (F, F, F) {
        let (a, (b, c)) = rayon::join(
            || self.a.evaluate(eq_rx, eq_ry),
            || {
                rayon::join(
                    || self.b.evaluate(eq_rx, eq_ry),
                    || self.c.evaluate(eq_rx, eq_ry),
                )
            },
        );
        (a, b, c)
    }

    /// Column polynomial `A(rx, ·) + r·B(rx, ·) + r²·C(rx, ·)` over `2 * num_vars` entries.
    pub fn bind_row_vars(&self, eq_rx: &[F], r: F) -> Vec<F> {
        let mut out = vec![F::zero(); 2 * self.num_vars];
        self.a.accumulate_bound_rows(eq_rx, F::one(), &mut out);
        self.b.accumulate_bound_rows(eq_rx, r, &mut out);
        self.c.accumulate_bound_rows(eq_rx, r * r, &mut out);
        out
    }

    /// Structural commitment to the shape.
    pub fn digest(&self) -> [u8; 32] {
        let mut hasher = blake3::Hasher::new();
        hasher.update(b"ecdsa_fold/r1cs-shape");
        hasher.update(&field_to_bytes(&-F::one()));
        hasher.update(&(self.num_cons as u64).to_le_bytes());
        hasher.update(&(self.num_vars as u64).to_le_bytes());
        hasher.update(&(self.num_io as u64).to_le_bytes());
        self.a.absorb(&mut hasher);
        self.b.absorb(&mut hasher);
        self.c.absorb(&mut hasher);
        *hasher.finalize().as_bytes()
    }
}

/// A committed step instance: `comm(W)` and the public inputs.
#[derive(Clone, Debug, PartialEq)]
pub struct R1CSInstance<G: CycleCurve> {
    pub comm_w: Commitment<G>,
    pub x: Vec<G::Scalar>,
}

impl<G: CycleCurve> R1CSInstance<G> {
    /// Default instance with an identity commitment and zero inputs.
    pub fn empty(num_io: usize) -> Self {
        Self {
            comm_w: Commitment::identity(),
            x: vec![G::Scalar::zero(); num_io],
        }
    }

    pub fn append_to_transcript(&self, transcript: &mut Transcript) {
        transcript.append_point::<G>(b"comm_w", self.comm_w.point());
        transcript.append_scalars(b"x", &self.x);
    }

    /// `W` followed by each public input moved into the coordinate field.
    /// Honest inputs are truncated hashes, small enough to move exactly.
    pub fn absorb_in_ro(&self, ro: &mut PoseidonRO<'_, G::Base>) {
        self.comm_w.absorb_in_ro(ro);
        for x in &self.x {
            ro.absorb(convert_field_mod(x));
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct R1CSWitness<F: PrimeField> {
    pub w: Vec<F>,
}

/// Running (accumulated) instance of the relaxed relation.
#[derive(Clone, Debug, PartialEq)]
pub struct RelaxedR1CSInstance<G: CycleCurve> {
    pub comm_w: Commitment<G>,
    pub comm_e: Commitment<G>,
    pub u: G::Scalar,
    pub x: Vec<G::Scalar>,
}

impl<G: CycleCurve> RelaxedR1CSInstance<G> {
    /// The trivially satisfied instance: identity commitments, `u = 0`, `x = 0`.
    pub fn empty(num_io: usize) -> Self {
        Self {
            comm_w: Commitment::identity(),
            comm_e: Commitment::identity(),
            u: G::Scalar::zero(),
            x: vec![G::Scalar::zero(); num_io],
        }
    }

    /// Embeds a plain instance: `u = 1`, `E = 0`.
    pub fn from_r1cs_instance(instance: &R1CSInstance<G>) -> Self {
        Self {
            comm_w: instance.comm_w,
            comm_e: Commitment::identity(),
            u: G::Scalar::one(),
            x: instance.x.clone(),
        }
    }

    pub fn append_to_transcript(&self, transcript: &mut Transcript) {
        transcript.append_point::<G>(b"comm_w", self.comm_w.point());
        transcript.append_point::<G>(b"comm_e", self.comm_e.point());
        transcript.append_scalar(b"u", &self.u);
        transcript.append_scalars(b"x", &self.x);
    }

    /// `W`, `E`, `u` moved into the coordinate field, then every public
    /// input as little-endian limbs. This is the layout the folding circuit
    /// hashes.
    pub fn absorb_in_ro(&self, ro: &mut PoseidonRO<'_, G::Base>) {
        self.comm_w.absorb_in_ro(ro);
        self.comm_e.absorb_in_ro(ro);
        ro.absorb(convert_field_mod(&self.u));
        for x in &self.x {
            for limb in bignat::to_limbs::<G::Scalar, G::Base>(x) {
                ro.absorb(limb);
            }
        }
    }

    /// Folds a plain instance in with challenge `r`.
    pub fn fold(&self, step: &R1CSInstance<G>, comm_t: &Commitment<G>, r: &G::Scalar) -> Result<Self> {
        if step.x.len() != self.x.len() {
            return Err(EcdsaFoldError::MalformedState(format!(
                "public input length mismatch: {} vs {}",
                self.x.len(),
                step.x.len()
            )));
        }
        let x = self
            .x
            .iter()
            .zip(step.x.iter())
            .map(|(a, b)| *a + *r * b)
            .collect();
        Ok(Self {
            comm_w: self.comm_w.fold(&step.comm_w, r),
            comm_e: self.comm_e.fold(comm_t, r),
            u: self.u + r,
            x,
        })
    }
}

/// Running witness of the relaxed relation.
#[derive(Clone, Debug, PartialEq)]
pub struct RelaxedR1CSWitness<F: PrimeField> {
    pub w: Vec<F>,
    pub e: Vec<F>,
}

impl<F: PrimeField> RelaxedR1CSWitness<F> {
    /// All-zero witness matching [`RelaxedR1CSInstance::empty`].
    pub fn empty(shape: &R1CSShape<F>) -> Self {
        Self {
            w: vec![F::zero(); shape.num_vars()],
            e: vec![F::zero(); shape.num_cons()],
        }
    }

    pub fn from_r1cs_witness(witness: R1CSWitness<F>, num_cons: usize) -> Self {
        Self {
            w: witness.w,
            e: vec![F::zero(); num_cons],
        }
    }

    /// `W + r·W2`, `E + r·T`, reusing this witness's buffers.
    pub fn fold(mut self, step: &R1CSWitness<F>, t: &[F], r: &F) -> Result<Self> {
        if step.w.len() != self.w.len() || t.len() != self.e.len() {
            return Err(EcdsaFoldError::MalformedState(
                "witness length mismatch while folding".to_string(),
            ));
        }
        let r = *r;
        self.w
            .par_iter_mut()
            .zip(step.w.par_iter())
            .for_each(|(acc, w)| *acc += r * w);
        self.e
            .par_iter_mut()
            .zip(t.par_iter())
            .for_each(|(acc, t)| *acc += r * t);
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::curves::{Scalar, Secq};

    /// x0 * x0 * x0 + x0 + 5 = out, with x0 private and out public.
    fn cubic_cs<CS: ConstraintSystem<Scalar>>(cs: &mut CS, x0: u64) {
        let x = Scalar::from(x0);
        let out_value = x * x * x + x + Scalar::from(5u64);
        let out = cs.alloc_input(out_value);
        let x_var = cs.alloc(x);
        let sq = cs.alloc(x * x);
        let cube = cs.alloc(x * x * x);
        cs.enforce(
            LinearCombination::from_variable(x_var),
            LinearCombination::from_variable(x_var),
            LinearCombination::from_variable(sq),
        );
        cs.enforce(
            LinearCombination::from_variable(sq),
            LinearCombination::from_variable(x_var),
            LinearCombination::from_variable(cube),
        );
        cs.enforce(
            LinearCombination::from_variable(cube)
                + LinearCombination::from_variable(x_var)
                + LinearCombination::constant(Scalar::from(5u64)),
            LinearCombination::constant(Scalar::one()),
            LinearCombination::from_variable(out),
        );
    }

    fn cubic_shape() -> R1CSShape<Scalar> {
        let mut cs = ShapeCS::new();
        cubic_cs(&mut cs, 0);
        R1CSShape::from_shape_cs(&cs).unwrap()
    }

    fn cubic_assignment(shape: &R1CSShape<Scalar>, x0: u64) -> (R1CSWitness<Scalar>, Vec<Scalar>) {
        let mut cs = WitnessCS::new();
        cubic_cs(&mut cs, x0);
        cs.into_assignment(shape).unwrap()
    }

    #[test]
    fn test_shape_is_padded() {
        let shape = cubic_shape();
        assert_eq!(shape.num_cons(), 4);
        assert_eq!(shape.num_vars(), 4);
        assert_eq!(shape.num_io(), 1);
    }

    #[test]
    fn test_satisfiability() {
        let shape = cubic_shape();
        let (w, x) = cubic_assignment(&shape, 3);
        assert_eq!(x, vec![Scalar::from(35u64)]);
        assert!(shape.is_sat(&w, &x).unwrap());
        assert!(!shape.is_sat(&w, &[Scalar::from(36u64)]).unwrap());
    }

    #[test]
    fn test_folding_preserves_relaxed_satisfiability() {
        let shape = cubic_shape();
        let ck = CommitmentKey::<Secq>::setup(&[9u8; 32], shape.num_vars().max(shape.num_cons()));

        let (w1, x1) = cubic_assignment(&shape, 3);
        let (w2, x2) = cubic_assignment(&shape, 11);
        let u1 = R1CSInstance {
            comm_w: ck.commit(&w1.w).unwrap(),
            x: x1,
        };
        let u2 = R1CSInstance {
            comm_w: ck.commit(&w2.w).unwrap(),
            x: x2,
        };
        assert!(shape.is_sat_committed(&ck, &u2, &w2).unwrap());

        let running = RelaxedR1CSInstance::from_r1cs_instance(&u1);
        let running_w = RelaxedR1CSWitness::from_r1cs_witness(w1, shape.num_cons());
        assert!(shape.is_sat_relaxed(&ck, &running, &running_w).unwrap());

        let (t, comm_t) = shape.commit_t(&ck, &running, &running_w, &u2, &w2).unwrap();
        let r = Scalar::from(123456u64);
        let folded = running.fold(&u2, &comm_t, &r).unwrap();
        let folded_w = running_w.fold(&w2, &t, &r).unwrap();
        assert!(shape.is_sat_relaxed(&ck, &folded, &folded_w).unwrap());

        let mut broken = folded.clone();
        broken.u += Scalar::one();
        assert!(!shape.is_sat_relaxed(&ck, &broken, &folded_w).unwrap());
    }

    #[test]
    fn test_empty_instance_is_satisfied() {
        let shape = cubic_shape();
        let ck = CommitmentKey::<Secq>::setup(&[9u8; 32], 4);
        let instance = RelaxedR1CSInstance::<Secq>::empty(shape.num_io());
        let witness = RelaxedR1CSWitness::empty(&shape);
        assert!(shape.is_sat_relaxed(&ck, &instance, &witness).unwrap());
    }

    #[test]
    fn test_digest_tracks_structure() {
        let shape = cubic_shape();
        assert_eq!(shape.digest(), cubic_shape().digest());

        let mut cs = ShapeCS::new();
        cubic_cs(&mut cs, 0);
        let extra = cs.alloc(Scalar::zero());
        cs.enforce(
            LinearCombination::from_variable(extra),
            LinearCombination::from_variable(extra),
            LinearCombination::from_variable(extra),
        );
        let other = R1CSShape::from_shape_cs(&cs).unwrap();
        assert_ne!(shape.digest(), other.digest());
    }

    #[test]
    fn test_duplicate_terms_are_merged() {
        let mut cs = ShapeCS::<Scalar>::new();
        let v = cs.alloc(Scalar::zero());
        cs.enforce(
            LinearCombination::from_variable(v) + LinearCombination::from_variable(v),
            LinearCombination::constant(Scalar::one()),
            LinearCombination::from_variable(v) - LinearCombination::from_variable(v),
        );
        let shape = R1CSShape::from_shape_cs(&cs).unwrap();
        // 2v in A, 1 in B, nothing in C.
        assert_eq!(shape.nnz(), 2);
    }

    #[test]
    fn test_compact_merges_and_drops_zeros() {
        let v = Variable::Aux(0);
        let w = Variable::Aux(1);
        let lc = LinearCombination::<Scalar>::from_variable(v)
            + LinearCombination::from_variable(w)
            + LinearCombination::from_variable(v).scale(Scalar::from(2u64))
            - LinearCombination::from_variable(w);
        let compact = lc.compact();
        assert_eq!(compact.terms(), &[(v, Scalar::from(3u64))]);
    }
}
