#![cfg_attr(not(test), no_std)]

use core::fmt::Display;

pub const KIB: usize = 1024usize;
pub const MIB: usize = KIB * 1024;

pub fn size_suffix_and_divisor(num: u64) -> (&'static str, u64) {
    if num >= MIB as u64 {
        ("MiB", MIB as u64)
    } else if num >= KIB as u64 {
        ("KiB", KIB as u64)
    } else {
        ("bytes", 1)
    }
}

/// Byte count that prints with a binary suffix, `12 KiB`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteSize(pub usize);

impl Display for ByteSize {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let (suffix, divisor) = size_suffix_and_divisor(self.0 as u64);
        if divisor == 1 || self.0 as u64 % divisor == 0 {
            write!(f, "{} {}", self.0 as u64 / divisor, suffix)
        } else {
            let tenths = (self.0 as u64 * 10 / divisor) % 10;
            write!(f, "{}.{} {}", self.0 as u64 / divisor, tenths, suffix)
        }
    }
}

/// Fills `count` words starting at `destination` with `value`.
///
/// # Safety
///
/// The range must be word aligned and writable.
pub unsafe fn fill_words(destination: usize, value: usize, count: usize) {
    let words = core::slice::from_raw_parts_mut(destination as *mut usize, count);
    words.fill(value);
}

/// `None` when rounding up would overflow.
pub const fn align_up(value: usize, alignment: usize) -> Option<usize> {
    match value.checked_add(alignment - 1) {
        Some(sum) => Some(sum & !(alignment - 1)),
        None => None,
    }
}

pub const fn align_down(value: usize, alignment: usize) -> usize {
    value & !(alignment - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rounding_up_refuses_to_wrap() {
        assert_eq!(align_up(13, 8), Some(16));
        assert_eq!(align_up(16, 8), Some(16));
        assert_eq!(align_up(usize::MAX - 2, 8), None);
    }

    #[test]
    fn sizes_pick_the_largest_whole_unit() {
        assert_eq!(format!("{}", ByteSize(100)), "100 bytes");
        assert_eq!(format!("{}", ByteSize(16 * KIB)), "16 KiB");
        assert_eq!(format!("{}", ByteSize(1536)), "1.5 KiB");
        assert_eq!(format!("{}", ByteSize(2 * MIB)), "2 MiB");
    }

    #[test]
    fn fill_covers_exactly_count_words() {
        let mut words = [0usize; 6];
        unsafe { fill_words(words.as_mut_ptr() as usize + core::mem::size_of::<usize>(), 0xDEAD_BEEF, 4) };
        assert_eq!(words[0], 0);
        assert!(words[1..5].iter().all(|w| *w == 0xDEAD_BEEF));
        assert_eq!(words[5], 0);
    }

    #[test]
    fn alignment_rounds_to_powers_of_two() {
        assert_eq!(align_down(13, 8), 8);
    }
}
