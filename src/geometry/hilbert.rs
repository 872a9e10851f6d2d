//! Hilbert-curve digit codec.
//!
//! Each level contributes one base-4 digit. The digit for a quadrant and the
//! orientation used for the next level come from a four-state automaton;
//! even faces start in the canonical orientation, odd faces with the axes
//! swapped. The resulting ordering matches the S2 cell id position bits.

use crate::error::{CellStoreError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Orientation {
    Canonical,
    SwappedInverted,
    Inverted,
    Swapped,
}

use Orientation::{Canonical, Inverted, Swapped, SwappedInverted};

/// `(digit, next orientation)` indexed by `(i_bit << 1) | j_bit`.
const fn transitions(orientation: Orientation) -> [(u8, Orientation); 4] {
    match orientation {
        Canonical => [(0, Swapped), (1, Canonical), (3, SwappedInverted), (2, Canonical)],
        SwappedInverted => [
            (2, SwappedInverted),
            (1, SwappedInverted),
            (3, Canonical),
            (0, Inverted),
        ],
        Inverted => [(2, Inverted), (3, Swapped), (1, Inverted), (0, SwappedInverted)],
        Swapped => [(0, Canonical), (3, Inverted), (1, Swapped), (2, Swapped)],
    }
}

fn start(face: u8) -> Orientation {
    if face % 2 == 1 { Swapped } else { Canonical }
}

/// Emit `level` base-4 digits for grid position `(i, j)` on `face`.
pub fn hilbert_digits(face: u8, i: u32, j: u32, level: u8) -> Vec<u8> {
    let mut orientation = start(face);
    let mut digits = Vec::with_capacity(usize::from(level));
    for bit in (0..level).rev() {
        let quad = (((i >> bit) & 1) << 1 | ((j >> bit) & 1)) as usize;
        let (digit, next) = transitions(orientation)[quad];
        digits.push(digit);
        orientation = next;
    }
    digits
}

/// Inverse of [`hilbert_digits`]: recover `(i, j)` from a digit sequence.
pub fn grid_from_digits(face: u8, digits: &[u8]) -> Result<(u32, u32)> {
    let mut orientation = start(face);
    let (mut i, mut j) = (0u32, 0u32);
    for &digit in digits {
        let table = transitions(orientation);
        let (quad, &(_, next)) = table
            .iter()
            .enumerate()
            .find(|(_, (d, _))| *d == digit)
            .ok_or_else(|| CellStoreError::invalid(format!("digit {digit} is not base-4")))?;
        // quad < 4
        let quad = quad as u32;
        i = (i << 1) | (quad >> 1);
        j = (j << 1) | (quad & 1);
        orientation = next;
    }
    Ok((i, j))
}

/// Pack digits into position bits, most significant digit first.
pub fn position_bits(digits: &[u8]) -> u64 {
    digits
        .iter()
        .fold(0u64, |acc, &d| (acc << 2) | u64::from(d & 3))
}

/// Unpack `level` digits from position bits.
pub fn digits_from_position(position: u64, level: u8) -> Vec<u8> {
    (0..level)
        .rev()
        .map(|n| ((position >> (2 * u32::from(n))) & 3) as u8)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_one_order() {
        // canonical face: (0,0) (0,1) (1,1) (1,0)
        assert_eq!(hilbert_digits(0, 0, 0, 1), vec![0]);
        assert_eq!(hilbert_digits(0, 0, 1, 1), vec![1]);
        assert_eq!(hilbert_digits(0, 1, 1, 1), vec![2]);
        assert_eq!(hilbert_digits(0, 1, 0, 1), vec![3]);
        // swapped face: (0,0) (1,0) (1,1) (0,1)
        assert_eq!(hilbert_digits(1, 1, 0, 1), vec![1]);
        assert_eq!(hilbert_digits(1, 0, 1, 1), vec![3]);
    }

    #[test]
    fn test_consecutive_positions_are_adjacent() {
        let level = 4;
        for face in 0..6u8 {
            let size = 1u32 << level;
            let mut by_position = vec![(0u32, 0u32); (size * size) as usize];
            for i in 0..size {
                for j in 0..size {
                    let pos = position_bits(&hilbert_digits(face, i, j, level));
                    by_position[pos as usize] = (i, j);
                }
            }
            for pair in by_position.windows(2) {
                let (a, b) = (pair[0], pair[1]);
                let dist = a.0.abs_diff(b.0) + a.1.abs_diff(b.1);
                assert_eq!(dist, 1, "curve jumps between {a:?} and {b:?} on face {face}");
            }
        }
    }

    #[test]
    fn test_digits_round_trip() {
        for face in 0..6u8 {
            for &(i, j) in &[(0u32, 0u32), (5, 9), (1023, 0), (777, 1000)] {
                let digits = hilbert_digits(face, i, j, 10);
                assert_eq!(grid_from_digits(face, &digits).unwrap(), (i, j));
                let pos = position_bits(&digits);
                assert_eq!(digits_from_position(pos, 10), digits);
            }
        }
    }

    #[test]
    fn test_rejects_bad_digit() {
        assert!(grid_from_digits(0, &[0, 4]).is_err());
    }
}
