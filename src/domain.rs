//! Canonical evaluation domains.
//!
//! The domain of length `n` is the first `n` powers of `ω_N`, the primitive
//! `N`-th root of unity for `N = n.next_power_of_two()`.  For power-of-two
//! lengths this is the whole multiplicative subgroup of order `n`, which is
//! what the NTT path needs; other lengths reuse a prefix of the enclosing
//! subgroup so every length has distinct, deterministic points.

use crate::error::{EngineError, Result};
use crate::field::Field;

/// Ordered evaluation points `ω_N^0, ω_N^1, …, ω_N^(length-1)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Domain {
    field: Field,
    length: usize,
    subgroup: usize,
    generator: u64,
}

impl Domain {
    /// Domain of `length` points in `field`.
    pub fn new(field: Field, length: usize) -> Result<Self> {
        if length == 0 {
            return Err(EngineError::shape("domain length must be positive"));
        }
        let subgroup = length
            .checked_next_power_of_two()
            .ok_or_else(|| EngineError::shape(format!("domain length {length} is too large")))?;
        let generator = field.root_of_unity(subgroup)?;
        Ok(Self {
            field,
            length,
            subgroup,
            generator,
        })
    }

    /// Number of points.
    pub fn len(&self) -> usize {
        self.length
    }

    /// Always false; domains have at least one point.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Order of the enclosing subgroup.
    pub fn subgroup_size(&self) -> usize {
        self.subgroup
    }

    /// `ω_N`.
    pub fn generator(&self) -> u64 {
        self.generator
    }

    /// The field the points live in.
    pub fn field(&self) -> Field {
        self.field
    }

    /// Returns true if the domain is a full subgroup.
    pub fn is_power_of_two(&self) -> bool {
        self.length == self.subgroup
    }

    /// Point `idx`, i.e. `ω_N^idx`.
    pub fn point(&self, idx: usize) -> u64 {
        self.field.pow(self.generator, idx as u64)
    }

    /// All points in order.
    pub fn points(&self) -> Vec<u64> {
        let mut out = vec![0u64; self.length];
        self.fill_points(&mut out);
        out
    }

    /// Writes the points into `out[..len]`.
    pub fn fill_points(&self, out: &mut [u64]) {
        let mut acc = 1u64;
        for slot in out.iter_mut().take(self.length) {
            *slot = acc;
            acc = self.field.mul(acc, self.generator);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn power_of_two_domain_is_a_subgroup() {
        let field = Field::goldilocks();
        let domain = Domain::new(field, 8).unwrap();
        assert!(domain.is_power_of_two());
        let points = domain.points();
        assert_eq!(points.len(), 8);
        assert_eq!(points[0], 1);
        assert_eq!(field.mul(points[7], domain.generator()), 1);
        assert_eq!(domain.point(3), points[3]);
    }

    #[test]
    fn odd_domain_is_a_prefix_of_the_enclosing_subgroup() {
        let field = Field::goldilocks();
        let odd = Domain::new(field, 5).unwrap();
        let full = Domain::new(field, 8).unwrap();
        assert_eq!(odd.subgroup_size(), 8);
        assert!(!odd.is_power_of_two());
        assert_eq!(odd.points(), full.points()[..5].to_vec());
    }

    #[test]
    fn rejects_empty_and_unsupported_lengths() {
        assert!(Domain::new(Field::goldilocks(), 0).is_err());
        // 101 - 1 = 4 * 25: no subgroup of order 8.
        assert!(Domain::new(Field::new(101, 2), 5).is_err());
        assert!(Domain::new(Field::new(101, 2), 4).is_ok());
    }

    #[test]
    fn single_point_domain() {
        let domain = Domain::new(Field::goldilocks(), 1).unwrap();
        assert_eq!(domain.points(), vec![1]);
        assert_eq!(domain.generator(), 1);
    }
}
