//! Threshold splitting of data keys
//!
//! Shamir secret sharing over GF(256), polynomial per secret byte. Any
//! `threshold` shares recombine to the secret; fewer reveal nothing.
//! The field is GF(2^8) with the reduction polynomial x^8+x^4+x^3+x+1.

use rand::rngs::OsRng;
use rand::RngCore;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{Result, VaultError};

/// One share of a split data key.
///
/// `index` is the nonzero x-coordinate the share was evaluated at;
/// share bytes are zeroized on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct KeyShare {
    pub index: u8,
    pub bytes: Vec<u8>,
}

impl std::fmt::Debug for KeyShare {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "KeyShare(index={}, <{} bytes>)", self.index, self.bytes.len())
    }
}

fn gf_mul(mut a: u8, mut b: u8) -> u8 {
    let mut product = 0u8;
    while b != 0 {
        if b & 1 != 0 {
            product ^= a;
        }
        let carry = a & 0x80;
        a <<= 1;
        if carry != 0 {
            a ^= 0x1b;
        }
        b >>= 1;
    }
    product
}

fn gf_pow(base: u8, mut exp: u8) -> u8 {
    let mut acc = 1u8;
    let mut base = base;
    while exp != 0 {
        if exp & 1 != 0 {
            acc = gf_mul(acc, base);
        }
        base = gf_mul(base, base);
        exp >>= 1;
    }
    acc
}

// Fermat inverse: a^254 = a^-1 in GF(256), a != 0
fn gf_inv(a: u8) -> u8 {
    gf_pow(a, 254)
}

// Horner evaluation; coeffs[0] is the constant term (the secret byte)
fn eval_poly(coeffs: &[u8], x: u8) -> u8 {
    let mut acc = 0u8;
    for &coeff in coeffs.iter().rev() {
        acc = gf_mul(acc, x) ^ coeff;
    }
    acc
}

/// Split `secret` into `share_count` shares, any `threshold` of which
/// recombine to it.
pub fn split(secret: &[u8], share_count: u8, threshold: u8) -> Result<Vec<KeyShare>> {
    if threshold == 0 || threshold > share_count {
        return Err(VaultError::InvalidThreshold {
            threshold,
            service_count: share_count as usize,
        });
    }

    let mut shares: Vec<KeyShare> = (1..=share_count)
        .map(|index| KeyShare {
            index,
            bytes: vec![0u8; secret.len()],
        })
        .collect();

    let mut coeffs = vec![0u8; threshold as usize];
    for (byte_idx, &secret_byte) in secret.iter().enumerate() {
        coeffs[0] = secret_byte;
        if threshold > 1 {
            OsRng.fill_bytes(&mut coeffs[1..]);
        }
        for share in shares.iter_mut() {
            share.bytes[byte_idx] = eval_poly(&coeffs, share.index);
        }
    }
    coeffs.zeroize();

    Ok(shares)
}

/// Recombine shares via Lagrange interpolation at x = 0.
///
/// Callers pass exactly the shares they intend to use; every share must
/// carry a distinct nonzero index and `secret_len` bytes.
pub fn combine(shares: &[KeyShare], secret_len: usize) -> Result<Vec<u8>> {
    if shares.is_empty() {
        return Err(VaultError::Internal("no shares to combine".to_string()));
    }
    for (i, share) in shares.iter().enumerate() {
        if share.index == 0 {
            return Err(VaultError::Internal("share index 0 is reserved".to_string()));
        }
        if share.bytes.len() != secret_len {
            return Err(VaultError::Internal(format!(
                "share {} has {} bytes, expected {secret_len}",
                share.index,
                share.bytes.len()
            )));
        }
        if shares[..i].iter().any(|other| other.index == share.index) {
            return Err(VaultError::Internal(format!(
                "duplicate share index {}",
                share.index
            )));
        }
    }

    let mut secret = vec![0u8; secret_len];
    for (j, share) in shares.iter().enumerate() {
        let mut basis = 1u8;
        for (m, other) in shares.iter().enumerate() {
            if m == j {
                continue;
            }
            basis = gf_mul(basis, gf_mul(other.index, gf_inv(other.index ^ share.index)));
        }
        for (byte_idx, &byte) in share.bytes.iter().enumerate() {
            secret[byte_idx] ^= gf_mul(byte, basis);
        }
    }
    Ok(secret)
}
