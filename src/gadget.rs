//! Constraint gadgets shared by the step circuits.
//!
//! Mathematical Foundation:
//! - [`Num`] pairs a linear combination with its value, so linear algebra is
//!   free and only products cost a constraint.
//! - Bits are little-endian. A strict decomposition also proves the packed
//!   integer is at most `modulus - 1`, which makes it unique.
//! - Signature points use *incomplete* affine formulas over the secp256k1 base
//!   field (no point at infinity). Every division is guarded by an enforced
//!   inverse of the denominator, so a satisfying assignment always describes a
//!   genuine group operation.
//! - Scalars are consumed as signed digits `d_i = 2b_i - 1 ∈ {-1, +1}`, which
//!   removes the conditional "add or skip" branch from double-and-add.
//!
//! Constraint costs:
//! - boolean: 1
//! - strict 256-bit decomposition: 256 booleans + 1 packing + 255 range
//! - equality test, selection: 2, 1
//! - `2A + P`: 6 (plus 1 when `P` is not a constant)
//! - `A + B`: 4
//! - on-curve check: 3

use std::marker::PhantomData;

use ark_ff::{BigInteger, PrimeField};

use crate::r1cs::{ConstraintSystem, LinearCombination, Variable};

/// `v^{-1}`, or zero when `v` is zero. Blank and invalid assignments rely on
/// this to synthesize without panicking; the enforced inverse then fails.
pub fn inverse_or_zero<F: PrimeField>(v: &F) -> F {
    v.inverse().unwrap_or_else(F::zero)
}

fn bool_to_field<F: PrimeField>(value: bool) -> F {
    if value {
        F::one()
    } else {
        F::zero()
    }
}

/// A linear combination paired with its value under the current assignment.
#[derive(Clone, Debug)]
pub struct Num<F: PrimeField> {
    value: F,
    lc: LinearCombination<F>,
}

impl<F: PrimeField> Num<F> {
    pub fn constant(value: F) -> Self {
        Self {
            value,
            lc: LinearCombination::constant(value),
        }
    }

    pub fn zero() -> Self {
        Self {
            value: F::zero(),
            lc: LinearCombination::zero(),
        }
    }

    pub fn alloc<CS: ConstraintSystem<F>>(cs: &mut CS, value: F) -> Self {
        let var = cs.alloc(value);
        Self {
            value,
            lc: LinearCombination::from_variable(var),
        }
    }

    pub fn alloc_input<CS: ConstraintSystem<F>>(cs: &mut CS, value: F) -> Self {
        let var = cs.alloc_input(value);
        Self {
            value,
            lc: LinearCombination::from_variable(var),
        }
    }

    pub fn value(&self) -> F {
        self.value
    }

    pub fn lc(&self) -> LinearCombination<F> {
        self.lc.clone()
    }

    pub fn is_constant(&self) -> bool {
        self.lc.is_constant()
    }

    pub fn add(&self, other: &Num<F>) -> Num<F> {
        Num {
            value: self.value + other.value,
            lc: self.lc() + other.lc(),
        }
    }

    pub fn sub(&self, other: &Num<F>) -> Num<F> {
        Num {
            value: self.value - other.value,
            lc: self.lc() - other.lc(),
        }
    }

    pub fn scale(&self, factor: F) -> Num<F> {
        Num {
            value: self.value * factor,
            lc: self.lc.scale(factor),
        }
    }

    pub fn add_constant(&self, c: F) -> Num<F> {
        Num {
            value: self.value + c,
            lc: self.lc() + LinearCombination::constant(c),
        }
    }

    /// Same value with repeated variables merged.
    pub fn compact(self) -> Num<F> {
        Num {
            value: self.value,
            lc: self.lc.compact(),
        }
    }

    /// `self * other`. Allocates unless one side is a constant.
    pub fn mul<CS: ConstraintSystem<F>>(&self, cs: &mut CS, other: &Num<F>) -> Num<F> {
        if self.is_constant() {
            return other.scale(self.value);
        }
        if other.is_constant() {
            return self.scale(other.value);
        }
        let product = Num::alloc(cs, self.value * other.value);
        cs.enforce(self.lc(), other.lc(), product.lc());
        product
    }

    /// Allocates `self^{-1}` and enforces `inv * self = 1`, which also proves
    /// `self != 0`.
    pub fn inverse<CS: ConstraintSystem<F>>(&self, cs: &mut CS) -> Num<F> {
        let inv = Num::alloc(cs, inverse_or_zero(&self.value));
        cs.enforce(inv.lc(), self.lc(), LinearCombination::constant(F::one()));
        inv
    }

    pub fn enforce_equal<CS: ConstraintSystem<F>>(&self, cs: &mut CS, other: &Num<F>) {
        cs.enforce(
            self.lc() - other.lc(),
            LinearCombination::constant(F::one()),
            LinearCombination::zero(),
        );
    }

    /// Exposes the value as a public input equal to `self`.
    pub fn inputize<CS: ConstraintSystem<F>>(&self, cs: &mut CS) -> Num<F> {
        let input = Num::alloc_input(cs, self.value);
        self.enforce_equal(cs, &input);
        input
    }

    /// Bit that is set exactly when `self = 0`.
    pub fn is_zero<CS: ConstraintSystem<F>>(&self, cs: &mut CS) -> AllocatedBit<F> {
        let is_zero = self.value.is_zero();
        let flag = cs.alloc(bool_to_field(is_zero));
        let inv = Num::alloc(cs, inverse_or_zero(&self.value));
        // self * inv = 1 - flag, self * flag = 0
        cs.enforce(
            self.lc(),
            inv.lc(),
            LinearCombination::constant(F::one()) - LinearCombination::from_variable(flag),
        );
        cs.enforce(
            self.lc(),
            LinearCombination::from_variable(flag),
            LinearCombination::zero(),
        );
        AllocatedBit {
            var: flag,
            value: is_zero,
            _field: PhantomData,
        }
    }

    /// Bit that is set exactly when `self = other`.
    pub fn equals<CS: ConstraintSystem<F>>(&self, cs: &mut CS, other: &Num<F>) -> AllocatedBit<F> {
        self.sub(other).is_zero(cs)
    }

    /// `if cond { a } else { b }`.
    pub fn select<CS: ConstraintSystem<F>>(
        cs: &mut CS,
        cond: &AllocatedBit<F>,
        a: &Num<F>,
        b: &Num<F>,
    ) -> Num<F> {
        let value = if cond.value { a.value } else { b.value };
        let out = Num::alloc(cs, value);
        // cond * (a - b) = out - b
        cs.enforce(
            LinearCombination::from_variable(cond.var),
            a.lc() - b.lc(),
            out.lc() - b.lc(),
        );
        out
    }
}

/// A variable constrained to `{0, 1}`.
#[derive(Clone, Copy, Debug)]
pub struct AllocatedBit<F: PrimeField> {
    var: Variable,
    value: bool,
    _field: PhantomData<F>,
}

impl<F: PrimeField> AllocatedBit<F> {
    pub fn alloc<CS: ConstraintSystem<F>>(cs: &mut CS, value: bool) -> Self {
        let var = cs.alloc(bool_to_field(value));
        // b * (1 - b) = 0
        cs.enforce(
            LinearCombination::from_variable(var),
            LinearCombination::constant(F::one()) - LinearCombination::from_variable(var),
            LinearCombination::zero(),
        );
        Self {
            var,
            value,
            _field: PhantomData,
        }
    }

    pub fn value(&self) -> bool {
        self.value
    }

    pub fn num(&self) -> Num<F> {
        Num {
            value: bool_to_field(self.value),
            lc: LinearCombination::from_variable(self.var),
        }
    }

    /// `1 - b` as a linear expression.
    pub fn not(&self) -> Num<F> {
        Num::constant(F::one()).sub(&self.num())
    }

    /// The signed digit `2b - 1` as a linear expression.
    pub fn signed_digit(&self) -> Num<F> {
        self.num().scale(F::from(2u64)).add_constant(-F::one())
    }
}

/// `sum_i 2^i b_i` as a linear expression.
pub fn pack_bits<F: PrimeField>(bits: &[AllocatedBit<F>]) -> Num<F> {
    let mut value = F::zero();
    let mut lc = LinearCombination::zero();
    let mut coeff = F::one();
    for bit in bits {
        if bit.value {
            value += coeff;
        }
        lc = lc.add_term(bit.var, coeff);
        coeff.double_in_place();
    }
    Num { value, lc }
}

fn alloc_packed<F: PrimeField, CS: ConstraintSystem<F>>(
    cs: &mut CS,
    num: &Num<F>,
    bit_values: &[bool],
) -> Vec<AllocatedBit<F>> {
    let bits: Vec<AllocatedBit<F>> = bit_values
        .iter()
        .map(|b| AllocatedBit::alloc(cs, *b))
        .collect();
    cs.enforce(
        pack_bits(&bits).lc(),
        LinearCombination::constant(F::one()),
        num.lc(),
    );
    bits
}

/// Decomposes `num` into `n` little-endian bits, proving `num < 2^n`.
/// `n` must be below the modulus bit size for the result to be unique.
pub fn to_bits_le<F: PrimeField, CS: ConstraintSystem<F>>(
    cs: &mut CS,
    num: &Num<F>,
    n: usize,
) -> Vec<AllocatedBit<F>> {
    let bit_values = num.value().into_bigint().to_bits_le();
    let values: Vec<bool> = (0..n)
        .map(|i| bit_values.get(i).copied().unwrap_or(false))
        .collect();
    alloc_packed(cs, num, &values)
}

/// Decomposes `num` into `MODULUS_BIT_SIZE` little-endian bits and proves
/// the packed integer is at most `modulus - 1`.
pub fn to_bits_strict<F: PrimeField, CS: ConstraintSystem<F>>(
    cs: &mut CS,
    num: &Num<F>,
) -> Vec<AllocatedBit<F>> {
    let bit_values = num.value().into_bigint().to_bits_le();
    let n = F::MODULUS_BIT_SIZE as usize;
    let values: Vec<bool> = (0..n)
        .map(|i| bit_values.get(i).copied().unwrap_or(false))
        .collect();
    strict_bits_from(cs, num, &values)
}

fn strict_bits_from<F: PrimeField, CS: ConstraintSystem<F>>(
    cs: &mut CS,
    num: &Num<F>,
    values: &[bool],
) -> Vec<AllocatedBit<F>> {
    let bits = alloc_packed(cs, num, values);
    let mut bound = F::MODULUS;
    bound.sub_with_borrow(&F::BigInt::from(1u64));
    let bound_bits = bound.to_bits_le();

    // `equal` stays one while the bits read so far (from the top) match the
    // bound; a set bit is then only allowed where the bound has one.
    let mut equal = Num::constant(F::one());
    for (i, bit) in bits.iter().enumerate().rev() {
        if bound_bits.get(i).copied().unwrap_or(false) {
            equal = equal.mul(cs, &bit.num());
        } else {
            cs.enforce(equal.lc(), bit.num().lc(), LinearCombination::zero());
        }
    }
    bits
}

/// An affine point of `y^2 = x^3 + 7` whose coordinates are linear
/// expressions. Signature verification uses it over the secp256k1 base field.
#[derive(Clone, Debug)]
pub struct AllocatedPoint<F: PrimeField> {
    pub x: Num<F>,
    pub y: Num<F>,
}

impl<F: PrimeField> AllocatedPoint<F> {
    pub fn constant(x: F, y: F) -> Self {
        Self {
            x: Num::constant(x),
            y: Num::constant(y),
        }
    }

    pub fn alloc<CS: ConstraintSystem<F>>(cs: &mut CS, x: F, y: F) -> Self {
        Self {
            x: Num::alloc(cs, x),
            y: Num::alloc(cs, y),
        }
    }

    pub fn value(&self) -> (F, F) {
        (self.x.value(), self.y.value())
    }

    /// `y^2 = x^3 + 7`.
    pub fn enforce_on_curve<CS: ConstraintSystem<F>>(&self, cs: &mut CS) {
        let x2 = self.x.mul(cs, &self.x);
        let x3 = x2.mul(cs, &self.x);
        cs.enforce(self.y.lc(), self.y.lc(), x3.add_constant(F::from(7u64)).lc());
    }

    pub fn enforce_equal<CS: ConstraintSystem<F>>(&self, cs: &mut CS, other: &AllocatedPoint<F>) {
        self.x.enforce_equal(cs, &other.x);
        self.y.enforce_equal(cs, &other.y);
    }

    /// `self + other` for points with distinct x coordinates.
    pub fn add<CS: ConstraintSystem<F>>(&self, cs: &mut CS, other: &AllocatedPoint<F>) -> AllocatedPoint<F> {
        let (xa, ya) = self.value();
        let (xb, yb) = other.value();

        let dx = other.x.sub(&self.x);
        dx.inverse(cs);

        let lambda = Num::alloc(cs, (yb - ya) * inverse_or_zero(&(xb - xa)));
        cs.enforce(lambda.lc(), dx.lc(), other.y.sub(&self.y).lc());

        let lv = lambda.value();
        let x_out = Num::alloc(cs, lv * lv - xa - xb);
        cs.enforce(
            lambda.lc(),
            lambda.lc(),
            x_out.add(&self.x).add(&other.x).lc(),
        );

        let y_out = Num::alloc(cs, lv * (xa - x_out.value()) - ya);
        cs.enforce(
            lambda.lc(),
            self.x.sub(&x_out).lc(),
            y_out.add(&self.y).lc(),
        );

        AllocatedPoint { x: x_out, y: y_out }
    }

    /// `2·self + p` in one step, via `S = self + p` then `S + self`.
    ///
    /// Requires `x(self) != x(p)` (enforced) and `x(S) != x(self)` (implied by
    /// the slope constraint because no point of the curve has `y = 0`).
    pub fn double_and_add<CS: ConstraintSystem<F>>(&self, cs: &mut CS, p: &AllocatedPoint<F>) -> AllocatedPoint<F> {
        let (xa, ya) = self.value();
        let (xp, yp) = p.value();

        let dx = p.x.sub(&self.x);
        dx.inverse(cs);

        let lambda1 = Num::alloc(cs, (yp - ya) * inverse_or_zero(&(xp - xa)));
        cs.enforce(lambda1.lc(), dx.lc(), p.y.sub(&self.y).lc());

        let l1 = lambda1.value();
        let xs = Num::alloc(cs, l1 * l1 - xa - xp);
        cs.enforce(
            lambda1.lc(),
            lambda1.lc(),
            xs.add(&self.x).add(&p.x).lc(),
        );

        let two_ya = ya.double();
        let lambda2 = Num::alloc(cs, -l1 - two_ya * inverse_or_zero(&(xs.value() - xa)));
        cs.enforce(
            lambda1.add(&lambda2).lc(),
            self.x.sub(&xs).lc(),
            self.y.scale(F::from(2u64)).lc(),
        );

        let l2 = lambda2.value();
        let xt = Num::alloc(cs, l2 * l2 - xa - xs.value());
        cs.enforce(
            lambda2.lc(),
            lambda2.lc(),
            xt.add(&self.x).add(&xs).lc(),
        );

        let yt = Num::alloc(cs, l2 * (xa - xt.value()) - ya);
        cs.enforce(
            lambda2.lc(),
            self.x.sub(&xt).lc(),
            yt.add(&self.y).lc(),
        );

        AllocatedPoint { x: xt, y: yt }
    }

    /// `d·self` for a signed digit `d = 2b - 1`.
    fn conditional_negate<CS: ConstraintSystem<F>>(&self, cs: &mut CS, bit: &AllocatedBit<F>) -> AllocatedPoint<F> {
        let y = bit.signed_digit().mul(cs, &self.y);
        AllocatedPoint { x: self.x.clone(), y }
    }
}

/// Computes `2^n·offset + Σ (2b_i - 1)·2^i·base` with `n = bits.len()`,
/// processing bits from the most significant down.
pub fn scalar_mul_signed<F: PrimeField, CS: ConstraintSystem<F>>(
    cs: &mut CS,
    bits: &[AllocatedBit<F>],
    base: &AllocatedPoint<F>,
    offset: &AllocatedPoint<F>,
) -> AllocatedPoint<F> {
    let mut acc = offset.clone();
    for bit in bits.iter().rev() {
        let addend = base.conditional_negate(cs, bit);
        acc = acc.double_and_add(cs, &addend);
    }
    acc
}
