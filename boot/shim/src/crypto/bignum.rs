//! Arbitrary-precision unsigned integers for RSA public-key operations
//!
//! Only what signature verification needs: byte conversion, multiplication,
//! reduction and modular exponentiation. Values are public, so no attempt is
//! made at constant-time arithmetic.

use alloc::vec;
use alloc::vec::Vec;
use core::cmp::Ordering;

/// Big unsigned integer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BigUint {
    /// Limbs in little-endian order, never with high zero limbs beyond the first
    limbs: Vec<u64>,
}

impl BigUint {
    /// Create zero
    pub fn zero() -> Self {
        Self { limbs: vec![0] }
    }

    /// Create one
    pub fn one() -> Self {
        Self { limbs: vec![1] }
    }

    /// Create from big-endian bytes
    pub fn from_be_bytes(bytes: &[u8]) -> Self {
        let start = bytes.iter().position(|&b| b != 0).unwrap_or(bytes.len());
        let bytes = &bytes[start..];

        let mut limbs = Vec::with_capacity(bytes.len() / 8 + 1);
        for chunk in bytes.rchunks(8) {
            limbs.push(chunk.iter().fold(0u64, |acc, &b| (acc << 8) | u64::from(b)));
        }

        let mut value = Self { limbs };
        value.normalize();
        value
    }

    /// Convert to big-endian bytes left-padded to `len`
    ///
    /// Returns `None` if the value does not fit.
    pub fn to_be_bytes_padded(&self, len: usize) -> Option<Vec<u8>> {
        let mut bytes = Vec::with_capacity(self.limbs.len() * 8);
        for &limb in self.limbs.iter().rev() {
            bytes.extend_from_slice(&limb.to_be_bytes());
        }

        let start = bytes.iter().position(|&b| b != 0).unwrap_or(bytes.len());
        let significant = &bytes[start..];
        if significant.len() > len {
            return None;
        }

        let mut padded = vec![0u8; len - significant.len()];
        padded.extend_from_slice(significant);
        Some(padded)
    }

    /// Check if zero
    pub fn is_zero(&self) -> bool {
        self.limbs.iter().all(|&l| l == 0)
    }

    /// Number of significant bits
    pub fn bits(&self) -> usize {
        let top = self.limbs.len() - 1;
        let high = self.limbs[top];
        if high == 0 {
            0
        } else {
            top * 64 + (64 - high.leading_zeros() as usize)
        }
    }

    fn bit(&self, index: usize) -> bool {
        self.limbs
            .get(index / 64)
            .is_some_and(|limb| (limb >> (index % 64)) & 1 == 1)
    }

    fn normalize(&mut self) {
        while self.limbs.len() > 1 && self.limbs.last() == Some(&0) {
            self.limbs.pop();
        }
        if self.limbs.is_empty() {
            self.limbs.push(0);
        }
    }

    /// Shift left by one bit, shifting `low` in
    fn shl1(&mut self, low: bool) {
        let mut carry = u64::from(low);
        for limb in self.limbs.iter_mut() {
            let next = *limb >> 63;
            *limb = (*limb << 1) | carry;
            carry = next;
        }
        if carry != 0 {
            self.limbs.push(carry);
        }
        self.normalize();
    }

    /// Multiplication
    pub fn mul(&self, other: &BigUint) -> BigUint {
        let n = self.limbs.len();
        let m = other.limbs.len();
        let mut result = vec![0u64; n + m];

        for i in 0..n {
            let mut carry = 0u128;
            for j in 0..m {
                let product = u128::from(self.limbs[i]) * u128::from(other.limbs[j])
                    + u128::from(result[i + j])
                    + carry;
                result[i + j] = product as u64;
                carry = product >> 64;
            }
            result[i + m] = carry as u64;
        }

        let mut value = BigUint { limbs: result };
        value.normalize();
        value
    }

    /// Subtraction (self - other), requires self >= other
    fn sub_assign(&mut self, other: &BigUint) {
        let mut borrow = 0u64;
        for i in 0..self.limbs.len() {
            let b = other.limbs.get(i).copied().unwrap_or(0);
            let (d1, o1) = self.limbs[i].overflowing_sub(b);
            let (d2, o2) = d1.overflowing_sub(borrow);
            self.limbs[i] = d2;
            borrow = u64::from(o1 || o2);
        }
        self.normalize();
    }

    /// Remainder of division by `modulus` (binary long division)
    pub fn rem(&self, modulus: &BigUint) -> BigUint {
        if modulus.is_zero() {
            return BigUint::zero();
        }
        if *self < *modulus {
            return self.clone();
        }

        let mut remainder = BigUint::zero();
        for i in (0..self.bits()).rev() {
            remainder.shl1(self.bit(i));
            if remainder >= *modulus {
                remainder.sub_assign(modulus);
            }
        }
        remainder
    }

    /// Modular exponentiation: self^exp mod modulus
    pub fn mod_pow(&self, exp: &BigUint, modulus: &BigUint) -> BigUint {
        if modulus.is_zero() {
            return BigUint::zero();
        }

        let mut result = BigUint::one().rem(modulus);
        let mut base = self.rem(modulus);

        // Square-and-multiply from LSB to MSB
        for i in 0..exp.bits() {
            if exp.bit(i) {
                result = result.mul(&base).rem(modulus);
            }
            base = base.mul(&base).rem(modulus);
        }

        result
    }
}

impl PartialOrd for BigUint {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for BigUint {
    fn cmp(&self, other: &Self) -> Ordering {
        self.limbs
            .len()
            .cmp(&other.limbs.len())
            .then_with(|| self.limbs.iter().rev().cmp(other.limbs.iter().rev()))
    }
}

// =============================================================================
// TESTS
// =============================================================================
