//! Finite field arithmetic.
//!
//! This module provides arithmetic in a prime field together with the
//! roots of unity needed by the number-theoretic transform.  The
//! [`Field`](struct.Field.html) type stores a prime modulus and a generator of
//! its multiplicative group.  All operations reduce their results modulo the
//! field modulus, so overflow is never an error condition.

use crate::error::{EngineError, Result};

/// The Goldilocks prime `2^64 - 2^32 + 1`.
pub const GOLDILOCKS_MODULUS: u64 = 0xFFFF_FFFF_0000_0001;

/// Generator of the Goldilocks multiplicative group.
pub const GOLDILOCKS_GENERATOR: u64 = 7;

/// A prime field together with a generator of its multiplicative group.
///
/// The generator is only used to derive roots of unity; it is the caller's
/// responsibility to supply a true generator when constructing a custom
/// field.  Root-of-unity derivation rejects generators that do not produce a
/// primitive root of the requested order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Field {
    p: u64,
    generator: u64,
}

impl Default for Field {
    fn default() -> Self {
        Self::goldilocks()
    }
}

impl Field {
    /// Returns the Goldilocks field used by default.
    pub const fn goldilocks() -> Self {
        Field {
            p: GOLDILOCKS_MODULUS,
            generator: GOLDILOCKS_GENERATOR,
        }
    }

    /// Creates a new finite field with the given modulus and generator.
    ///
    /// # Panics
    ///
    /// Panics if the modulus is less than 3 or even, or if the generator is
    /// zero modulo `p`.
    pub fn new(p: u64, generator: u64) -> Self {
        match Self::try_new(p, generator) {
            Ok(field) => field,
            Err(err) => panic!("{err}"),
        }
    }

    /// Fallible constructor used by configuration loading.
    pub fn try_new(p: u64, generator: u64) -> Result<Self> {
        if p < 3 || p % 2 == 0 {
            return Err(EngineError::shape(format!(
                "field modulus {p} must be an odd prime >= 3"
            )));
        }
        if generator % p == 0 {
            return Err(EngineError::shape("field generator must be non-zero"));
        }
        Ok(Field {
            p,
            generator: generator % p,
        })
    }

    /// Returns the modulus of the field.
    #[inline]
    pub fn modulus(&self) -> u64 {
        self.p
    }

    /// Returns the multiplicative generator.
    #[inline]
    pub fn generator(&self) -> u64 {
        self.generator
    }

    /// Reduces an arbitrary `u64` into the field.
    #[inline]
    pub fn reduce(&self, a: u64) -> u64 {
        a % self.p
    }

    /// Adds two field elements.
    #[inline]
    pub fn add(&self, a: u64, b: u64) -> u64 {
        let (s, carry) = (a % self.p).overflowing_add(b % self.p);
        if carry || s >= self.p {
            s.wrapping_sub(self.p)
        } else {
            s
        }
    }

    /// Subtracts `b` from `a`.
    #[inline]
    pub fn sub(&self, a: u64, b: u64) -> u64 {
        let a = a % self.p;
        let b = b % self.p;
        if a >= b {
            a - b
        } else {
            self.p - (b - a)
        }
    }

    /// Negates a field element.
    #[inline]
    pub fn neg(&self, a: u64) -> u64 {
        self.sub(0, a)
    }

    /// Multiplies two field elements.
    #[inline]
    pub fn mul(&self, a: u64, b: u64) -> u64 {
        ((a as u128 * b as u128) % self.p as u128) as u64
    }

    /// Computes the multiplicative inverse of `a`.
    ///
    /// # Panics
    ///
    /// Panics if `a` is zero modulo `p`.
    #[inline]
    pub fn inv(&self, a: u64) -> u64 {
        let a = a % self.p;
        assert!(a != 0, "cannot invert zero");
        // Fermat: a^(p-2) mod p
        self.pow(a, self.p - 2)
    }

    /// Divides `a` by `b`.
    #[inline]
    pub fn div(&self, a: u64, b: u64) -> u64 {
        self.mul(a, self.inv(b))
    }

    /// Exponentiates `a` by `e` modulo `p`.
    #[inline]
    pub fn pow(&self, mut a: u64, mut e: u64) -> u64 {
        a %= self.p;
        let mut result = 1u64;
        while e > 0 {
            if e & 1 == 1 {
                result = self.mul(result, a);
            }
            a = self.mul(a, a);
            e >>= 1;
        }
        result
    }

    /// Largest `k` such that `2^k` divides `p - 1`.
    pub fn two_adicity(&self) -> u32 {
        (self.p - 1).trailing_zeros()
    }

    /// Returns a primitive `order`-th root of unity.
    ///
    /// `order` must be a power of two dividing `p - 1`.
    pub fn root_of_unity(&self, order: usize) -> Result<u64> {
        if order == 0 || !order.is_power_of_two() {
            return Err(EngineError::shape(format!(
                "root of unity order {order} is not a power of two"
            )));
        }
        if order.trailing_zeros() > self.two_adicity() {
            return Err(EngineError::shape(format!(
                "field with two-adicity {} has no root of unity of order {order}",
                self.two_adicity()
            )));
        }
        let omega = self.pow(self.generator, (self.p - 1) / order as u64);
        if order > 1 && self.pow(omega, (order / 2) as u64) != self.p - 1 {
            return Err(EngineError::shape(format!(
                "generator {} does not yield a primitive root of order {order}",
                self.generator
            )));
        }
        Ok(omega)
    }

    /// Inverts every element of `values` in place with a single inversion.
    ///
    /// # Panics
    ///
    /// Panics if any element is zero.
    pub fn batch_inverse(&self, values: &mut [u64]) {
        if values.is_empty() {
            return;
        }
        let mut prefix = Vec::with_capacity(values.len());
        let mut acc = 1u64;
        for &v in values.iter() {
            prefix.push(acc);
            acc = self.mul(acc, v);
        }
        let mut inv = self.inv(acc);
        for (v, before) in values.iter_mut().zip(prefix).rev() {
            let next = self.mul(inv, *v);
            *v = self.mul(inv, before);
            inv = next;
        }
    }
}
