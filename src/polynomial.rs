//! Univariate polynomials in coefficient form.

use crate::domain::Domain;
use crate::error::Result;
use crate::field::Field;

/// Coefficients `c_0, c_1, …` of `c_0 + c_1·x + c_2·x² + ⋯` over a prime field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Polynomial {
    field: Field,
    coeffs: Vec<u64>,
}

impl Polynomial {
    /// Wraps a coefficient vector, reducing every entry into the field.
    pub fn from_coefficients(field: Field, mut coeffs: Vec<u64>) -> Self {
        for c in coeffs.iter_mut() {
            *c = field.reduce(*c);
        }
        Self { field, coeffs }
    }

    /// The field the coefficients live in.
    pub fn field(&self) -> Field {
        self.field
    }

    /// Coefficients, lowest degree first.
    pub fn coefficients(&self) -> &[u64] {
        &self.coeffs
    }

    /// Consumes the polynomial and returns its coefficients.
    pub fn into_coefficients(self) -> Vec<u64> {
        self.coeffs
    }

    /// Number of stored coefficients (the interpolated length).
    pub fn len(&self) -> usize {
        self.coeffs.len()
    }

    /// Returns true if no coefficients are stored.
    pub fn is_empty(&self) -> bool {
        self.coeffs.is_empty()
    }

    /// Index of the highest non-zero coefficient; `None` for the zero polynomial.
    pub fn degree(&self) -> Option<usize> {
        self.coeffs.iter().rposition(|&c| c != 0)
    }

    /// Evaluates at `x` with Horner's rule.
    pub fn evaluate(&self, x: u64) -> u64 {
        horner(&self.field, &self.coeffs, x)
    }

    /// Evaluates at point `idx` of the canonical domain of length `len()`.
    pub fn evaluate_at_domain_index(&self, idx: usize) -> Result<u64> {
        let domain = Domain::new(self.field, self.coeffs.len())?;
        Ok(self.evaluate(domain.point(idx)))
    }
}

pub(crate) fn horner(field: &Field, coeffs: &[u64], x: u64) -> u64 {
    coeffs
        .iter()
        .rev()
        .fold(0u64, |acc, &c| field.add(field.mul(acc, x), c))
}
