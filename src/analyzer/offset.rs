//! Seek offsets cross the engine binding as two 32-bit halves.
//!
//! The binding returns the low and high words of the 64-bit `GoTo` position as
//! signed 32-bit integers. The low word is therefore negative whenever its top bit
//! is set and must be reinterpreted as unsigned (equivalently, corrected by adding
//! 2^32) before it is combined with the high word. `(-1, -1)` is the "no seek" sentinel.

use thiserror::Error;

/// Halves reported when the engine has no seek pending
pub const NO_SEEK: (i32, i32) = (-1, -1);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SeekHalvesError {
    #[error("seek offset high word is negative ({high}) with low word {low}")]
    NegativeHigh { low: i32, high: i32 },
}

/// Recombine `(low, high)` into an absolute offset.
///
/// Returns `Ok(None)` for the sentinel pair.
pub fn combine_seek_halves(low: i32, high: i32) -> Result<Option<u64>, SeekHalvesError> {
    if (low, high) == NO_SEEK {
        return Ok(None);
    }
    if high < 0 {
        return Err(SeekHalvesError::NegativeHigh { low, high });
    }

    let low = u64::from(low as u32);
    let high = u64::from(high as u32);
    Ok(Some((high << 32) | low))
}

/// Inverse of [`combine_seek_halves`], for engines that expose a native 64-bit position.
pub fn split_seek_offset(offset: u64) -> (i32, i32) {
    let low = (offset & 0xFFFF_FFFF) as u32 as i32;
    let high = (offset >> 32) as u32 as i32;
    (low, high)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentinel_means_no_seek() {
        assert_eq!(combine_seek_halves(-1, -1), Ok(None));
    }

    #[test]
    fn small_positive_offsets() {
        assert_eq!(combine_seek_halves(0, 0), Ok(Some(0)));
        assert_eq!(combine_seek_halves(4096, 0), Ok(Some(4096)));
        assert_eq!(combine_seek_halves(i32::MAX, 0), Ok(Some(0x7FFF_FFFF)));
    }

    #[test]
    fn negative_low_half_is_corrected() {
        // 0x8000_0000 arrives as i32::MIN
        assert_eq!(combine_seek_halves(i32::MIN, 0), Ok(Some(0x8000_0000)));
        // 0xFFFF_FFFF with a zero high word is a real offset, not the sentinel
        assert_eq!(combine_seek_halves(-1, 0), Ok(Some(0xFFFF_FFFF)));
        // 3 GiB + 5 bytes
        let offset = 3 * (1u64 << 30) + 5;
        assert_eq!(combine_seek_halves(offset as u32 as i32, 0), Ok(Some(offset)));
    }

    #[test]
    fn high_half_contributes_upper_word() {
        assert_eq!(combine_seek_halves(0, 1), Ok(Some(1 << 32)));
        assert_eq!(combine_seek_halves(-2, 2), Ok(Some((2 << 32) + 0xFFFF_FFFE)));
        assert_eq!(combine_seek_halves(7, 0x10), Ok(Some((0x10 << 32) | 7)));
    }

    #[test]
    fn negative_high_half_is_rejected() {
        assert_eq!(
            combine_seek_halves(0, -5),
            Err(SeekHalvesError::NegativeHigh { low: 0, high: -5 })
        );
        assert!(combine_seek_halves(12, -1).is_err());
    }

    #[test]
    fn split_then_combine_is_exact_at_word_boundaries() {
        for offset in [0u64, 1, 0x7FFF_FFFF, 0x8000_0000, 0xFFFF_FFFF, 0x1_0000_0000, 0x1_8000_0001] {
            let (low, high) = split_seek_offset(offset);
            assert_eq!(combine_seek_halves(low, high), Ok(Some(offset)), "offset {offset:#x}");
        }
    }
}
