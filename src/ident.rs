//! Jail identifier tokens
//!
//! Host-side interface names and rctl handles are keyed by a short
//! lowercase token derived from the jail's ctid. FreeBSD interface names are
//! limited to 15 characters, so the token has to stay short while remaining
//! unique for every ctid in the supported range.
//!
//! The mapping is an affine permutation of `[0, 26^length)` followed by a
//! base-26 encoding, which makes it a bijection: two ids below the capacity
//! never share a token.

use crate::error::{Error, Result};

const LETTERS: &[u8; 26] = b"abcdefghijklmnopqrstuvwxyz";

/// Multiplier of the permutation; must stay coprime with 26
const MULTIPLIER: u128 = 7_919;

/// Offset of the permutation
const OFFSET: u128 = 104_729;

/// Longest token length supported
pub const MAX_TOKEN_LENGTH: usize = 13;

/// Number of distinct tokens of the given length
pub fn capacity(length: usize) -> Option<u64> {
    if length == 0 || length > MAX_TOKEN_LENGTH {
        return None;
    }
    26u64.checked_pow(length as u32)
}

/// Check whether every id in `0..=max_id` gets its own token
pub fn covers(length: usize, max_id: u64) -> bool {
    capacity(length).is_some_and(|cap| max_id < cap)
}

/// Derive the token for `id`
///
/// Fails when `id` does not fit the token space, since the result would
/// collide with a smaller id.
pub fn derive(id: u64, length: usize) -> Result<String> {
    let cap = capacity(length).ok_or_else(|| {
        Error::InvalidValue(format!(
            "token length {} outside 1..={}",
            length, MAX_TOKEN_LENGTH
        ))
    })?;

    if id >= cap {
        return Err(Error::InvalidValue(format!(
            "id {} does not fit a {}-letter token (capacity {})",
            id, length, cap
        )));
    }

    let space = cap as u128;
    let mut num = (id as u128 * MULTIPLIER + OFFSET) % space;

    let mut out = vec![b'a'; length];
    for slot in out.iter_mut().rev() {
        *slot = LETTERS[(num % 26) as usize];
        num /= 26;
    }

    Ok(String::from_utf8_lossy(&out).into_owned())
}

/// Base name of the epair connecting a jail to a switch (`<token>_<switch>`)
///
/// The host side is this name with an `a` suffix, the jail side with `b`.
pub fn epair_base(token: &str, switch_id: u32) -> String {
    format!("{}_{}", token, switch_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_derive_is_stable() {
        let a = derive(101, 5).unwrap();
        let b = derive(101, 5).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 5);
        assert!(a.bytes().all(|c| c.is_ascii_lowercase()));
    }

    #[test]
    fn test_no_collisions_in_supported_range() {
        let mut seen = HashSet::new();
        for id in 1..=9999u64 {
            assert!(seen.insert(derive(id, 5).unwrap()), "collision at {}", id);
        }
    }

    #[test]
    fn test_full_space_is_a_permutation() {
        let mut seen = HashSet::new();
        for id in 0..26u64 * 26 {
            seen.insert(derive(id, 2).unwrap());
        }
        assert_eq!(seen.len(), 26 * 26);
    }

    #[test]
    fn test_out_of_range_rejected() {
        assert!(derive(26, 1).is_err());
        assert!(derive(25, 1).is_ok());
        assert!(derive(1, 0).is_err());
        assert!(derive(1, MAX_TOKEN_LENGTH + 1).is_err());
    }

    #[test]
    fn test_covers() {
        assert!(covers(5, 9999));
        assert!(!covers(2, 9999));
        assert!(covers(3, 9999));
        assert!(!covers(0, 1));
    }

    #[test]
    fn test_epair_base() {
        assert_eq!(epair_base("abcde", 5), "abcde_5");
    }
}
