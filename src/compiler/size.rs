use std::fmt;
use std::ops::{Add, AddAssign};

/// Packed (min_bits, min_refs, max_bits, max_refs) size interval.
///
/// Each 32-bit half holds `bits << 8 | refs`; the min half sits in the high
/// word. The generous field widths let plain 64-bit addition add both halves
/// at once, after which `normalize` saturates bits at 0x7ff and refs at 7.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MinMaxSize(u64);

/// Unpacked view of a [`MinMaxSize`], used for unions and repetitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnpackedSize {
    pub min_bits: u32,
    pub min_refs: u32,
    pub max_bits: u32,
    pub max_refs: u32,
}

impl MinMaxSize {
    /// Any size a cell can hold: 0..1023 bits plus some of 0..7 refs wide.
    pub const ANY: MinMaxSize = MinMaxSize(0x7ff07);
    /// Exactly one cell reference.
    pub const ONE_REF: MinMaxSize = MinMaxSize(0x1_0000_0001);
    /// The distinguished top: min above max, nothing satisfies it.
    pub const IMPOSSIBLE: MinMaxSize = MinMaxSize(0x7ff07 << 32);
    pub const ZERO: MinMaxSize = MinMaxSize(0);

    pub fn fixed_size(bits: u32) -> MinMaxSize {
        MinMaxSize(bits as u64 * 0x100_0000_0100)
    }

    pub fn size_range(min_bits: u32, max_bits: u32) -> MinMaxSize {
        MinMaxSize((((min_bits as u64) << 32) + max_bits as u64) << 8)
    }

    pub fn get(self) -> u64 {
        self.0
    }

    fn min_half(self) -> u32 {
        (self.0 >> 32) as u32
    }

    fn max_half(self) -> u32 {
        self.0 as u32
    }

    pub fn is_fixed(self) -> bool {
        self.min_half() == self.max_half()
    }

    /// If the size is a fixed number of bits with no refs, that number.
    pub fn fixed_bit_size(self) -> Option<u32> {
        if self.is_fixed() && self.min_half() & 0xff == 0 {
            Some(self.min_half() >> 8)
        } else {
            None
        }
    }

    /// True when the minimal instance fits into one cell
    /// (at most 1023 bits and 4 references).
    pub fn fits_into_cell(self) -> bool {
        (0x3ff04u32.wrapping_sub(self.min_half())) & 0x8000_0080 == 0
    }

    /// True unless the minimum exceeds the maximum in either component.
    pub fn is_possible(self) -> bool {
        (self.max_half().wrapping_sub(self.min_half())) & 0x8000_0080 == 0
    }

    pub fn clear_min(&mut self) -> &mut Self {
        self.0 &= (1 << 32) - 1;
        self
    }

    fn nrm(&mut self, a: u64, b: u64) {
        if self.0 & a != 0 {
            self.0 = (self.0 | (a | b)) - a;
        }
    }

    /// Saturates overflowed components: refs cap at 7, bits at 0x7ff.
    pub fn normalize(&mut self) {
        if self.0 & (0xfff8_00f8u64 * 0x1_0000_0001) != 0 {
            self.nrm(0xf8, 0x7);
            self.nrm(0xfff8_0000, 0x7ff00);
            self.nrm(0xf8 << 32, 7 << 32);
            self.nrm(0xfff8_0000 << 32, 0x7ff00 << 32);
        }
    }

    pub fn unpack(self) -> UnpackedSize {
        let mut val = self;
        val.normalize();
        UnpackedSize {
            max_refs: (val.0 & 0xff) as u32,
            max_bits: ((val.0 >> 8) & 0x7ff) as u32,
            min_refs: ((val.0 >> 32) & 0xff) as u32,
            min_bits: ((val.0 >> 40) & 0x7ff) as u32,
        }
    }

    /// Pointwise union (component-wise min of mins, max of maxes).
    pub fn union_with(&mut self, other: MinMaxSize) {
        let a = self.unpack();
        let b = other.unpack();
        *self = UnpackedSize {
            min_bits: a.min_bits.min(b.min_bits),
            min_refs: a.min_refs.min(b.min_refs),
            max_bits: a.max_bits.max(b.max_bits),
            max_refs: a.max_refs.max(b.max_refs),
        }
        .pack();
    }

    /// Size of `count` consecutive repetitions.
    pub fn repeat(&mut self, count: u32) {
        if count == 0 {
            *self = MinMaxSize::ZERO;
            return;
        }
        if count == 1 {
            return;
        }
        let z = self.unpack();
        let count = count.min(1024);
        *self = UnpackedSize {
            min_bits: (z.min_bits * count).min(0x7ff),
            min_refs: (z.min_refs * count).min(7),
            max_bits: (z.max_bits * count).min(0x7ff),
            max_refs: (z.max_refs * count).min(7),
        }
        .pack();
    }

    /// Size of at least `count` repetitions (unbounded above).
    pub fn repeat_at_least(&mut self, count: u32) {
        let count = count.min(1024);
        let z = self.unpack();
        *self = UnpackedSize {
            min_bits: (z.min_bits * count).min(0x7ff),
            min_refs: (z.min_refs * count).min(7),
            max_bits: if z.max_bits != 0 { 0x7ff } else { 0 },
            max_refs: if z.max_refs != 0 { 7 } else { 0 },
        }
        .pack();
    }
}

impl UnpackedSize {
    pub fn pack(self) -> MinMaxSize {
        let t = ((self.min_bits as u64 * 0x100 + self.min_refs as u64) << 32)
            + (self.max_bits as u64 * 0x100 + self.max_refs as u64);
        MinMaxSize(t)
    }
}

impl Default for MinMaxSize {
    fn default() -> Self {
        MinMaxSize::IMPOSSIBLE
    }
}

impl Add for MinMaxSize {
    type Output = MinMaxSize;

    fn add(self, rhs: MinMaxSize) -> MinMaxSize {
        let mut res = MinMaxSize(self.0 + rhs.0);
        res.normalize();
        res
    }
}

impl AddAssign for MinMaxSize {
    fn add_assign(&mut self, rhs: MinMaxSize) {
        self.0 += rhs.0;
        self.normalize();
    }
}

impl fmt::Display for MinMaxSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let z = self.unpack();
        let fixed = z.min_bits == z.max_bits && z.min_refs == z.max_refs;
        if fixed {
            write!(f, "=")?;
        }
        if z.min_bits >= 1024 && z.min_refs >= 7 {
            write!(f, "infty")?;
        } else {
            write!(f, "{}", z.min_bits)?;
            if z.min_refs != 0 {
                write!(f, "+{}R", z.min_refs)?;
            }
        }
        if !fixed {
            write!(f, "..")?;
            if z.max_bits >= 1024 && z.max_refs >= 7 {
                write!(f, "infty")?;
            } else {
                write!(f, "{}", z.max_bits)?;
                if z.max_refs != 0 {
                    write!(f, "+{}R", z.max_refs)?;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_sizes_add() {
        let a = MinMaxSize::fixed_size(8) + MinMaxSize::fixed_size(24);
        assert_eq!(a, MinMaxSize::fixed_size(32));
        assert!(a.is_fixed());
        assert_eq!(a.fixed_bit_size(), Some(32));
    }

    #[test]
    fn refs_saturate_at_seven() {
        let mut s = MinMaxSize::ZERO;
        for _ in 0..9 {
            s += MinMaxSize::ONE_REF;
        }
        let z = s.unpack();
        assert_eq!(z.min_refs, 7);
        assert_eq!(z.max_refs, 7);
        assert!(!s.fits_into_cell());
    }

    #[test]
    fn impossible_is_recognized() {
        assert!(!MinMaxSize::IMPOSSIBLE.is_possible());
        assert!(MinMaxSize::ZERO.is_possible());
        assert!(MinMaxSize::ANY.is_possible());
    }

    #[test]
    fn union_widens_both_ends() {
        let mut s = MinMaxSize::fixed_size(8);
        s.union_with(MinMaxSize::fixed_size(32));
        let z = s.unpack();
        assert_eq!((z.min_bits, z.max_bits), (8, 32));
        assert!(!s.is_fixed());
    }

    #[test]
    fn union_with_impossible_is_identity() {
        let mut s = MinMaxSize::IMPOSSIBLE;
        s.union_with(MinMaxSize::fixed_size(5));
        assert_eq!(s, MinMaxSize::fixed_size(5));
    }

    #[test]
    fn repetition_scales_and_caps() {
        let mut s = MinMaxSize::fixed_size(100);
        s.repeat(3);
        assert_eq!(s, MinMaxSize::fixed_size(300));
        let mut s = MinMaxSize::fixed_size(100);
        s.repeat(100);
        assert_eq!(s.unpack().max_bits, 0x7ff);
        let mut s = MinMaxSize::fixed_size(4);
        s.repeat_at_least(2);
        let z = s.unpack();
        assert_eq!(z.min_bits, 8);
        assert_eq!(z.max_bits, 0x7ff);
    }

    #[test]
    fn zero_repetition_clears() {
        let mut s = MinMaxSize::fixed_size(100);
        s.repeat(0);
        assert_eq!(s, MinMaxSize::ZERO);
    }

    #[test]
    fn display_formats() {
        assert_eq!(MinMaxSize::fixed_size(1).to_string(), "=1");
        assert_eq!(MinMaxSize::size_range(0, 32).to_string(), "0..32");
        assert_eq!(MinMaxSize::ONE_REF.to_string(), "=0+1R");
    }
}
