//! CPU membership masks.
//!
//! A [`Mask`] says which logical CPUs belong to an entity. Two representations exist and an
//! entity keeps the one it was built with for its whole lifetime:
//!
//! - [`Mask::Bitset`]: an arbitrary-length bit-set indexed by global logical CPU id.
//! - [`Mask::Group`]: a processor group id plus a 64-bit mask whose bit positions are local
//!   to that group (machines with more than 64 CPUs split into fixed-size groups).
//!
//! Comparing a bit-set with a group mask is a programming error and panics.

use bitvec::prelude::*;
use std::cmp::Ordering;
use std::fmt;

pub type CpuBits = BitVec<u64, Lsb0>;

#[derive(Clone, Debug)]
pub enum Mask {
    Bitset(CpuBits),
    Group { group_id: u32, bits: u64 },
}

impl Mask {
    /// An empty bit-set sized for `len` logical CPUs.
    pub fn empty(len: usize) -> Self {
        Mask::Bitset(BitVec::repeat(false, len))
    }

    /// A bit-set with every CPU in `0..len` set.
    pub fn full(len: usize) -> Self {
        Mask::Bitset(BitVec::repeat(true, len))
    }

    /// A bit-set of `len` CPUs with only `cpu` set.
    pub fn single(len: usize, cpu: usize) -> Self {
        let mut mask = Mask::empty(len.max(cpu + 1));
        mask.set(cpu);
        mask
    }

    pub fn from_indices(len: usize, cpus: impl IntoIterator<Item = usize>) -> Self {
        let mut mask = Mask::empty(len);
        for cpu in cpus {
            mask.set(cpu);
        }
        mask
    }

    pub fn group(group_id: u32, bits: u64) -> Self {
        Mask::Group { group_id, bits }
    }

    pub fn is_group(&self) -> bool {
        matches!(self, Mask::Group { .. })
    }

    pub fn group_id(&self) -> Option<u32> {
        match self {
            Mask::Group { group_id, .. } => Some(*group_id),
            Mask::Bitset(_) => None,
        }
    }

    /// Sets a bit. Bit-sets grow to fit; group masks only have 64 positions.
    pub fn set(&mut self, index: usize) {
        match self {
            Mask::Bitset(bits) => {
                if index >= bits.len() {
                    bits.resize(index + 1, false);
                }
                bits.set(index, true);
            }
            Mask::Group { bits, .. } => {
                assert!(index < 64, "group mask bit {index} out of range");
                *bits |= 1u64 << index;
            }
        }
    }

    /// Tests a bit position (local to the group for group masks).
    pub fn test(&self, index: usize) -> bool {
        match self {
            Mask::Bitset(bits) => bits.get(index).map_or(false, |b| *b),
            Mask::Group { bits, .. } => index < 64 && (bits >> index) & 1 == 1,
        }
    }

    pub fn cardinality(&self) -> usize {
        match self {
            Mask::Bitset(bits) => bits.count_ones(),
            Mask::Group { bits, .. } => bits.count_ones() as usize,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.cardinality() == 0
    }

    pub fn lowest_set(&self) -> Option<usize> {
        match self {
            Mask::Bitset(bits) => bits.first_one(),
            Mask::Group { bits: 0, .. } => None,
            Mask::Group { bits, .. } => Some(bits.trailing_zeros() as usize),
        }
    }

    /// Calls `f` with every set bit position at or above `from`, in ascending order.
    pub fn for_each_set_index(&self, from: usize, mut f: impl FnMut(usize)) {
        match self {
            Mask::Bitset(bits) => bits.iter_ones().filter(|&i| i >= from).for_each(f),
            Mask::Group { bits, .. } => {
                let mut rest = if from >= 64 { 0 } else { bits & (!0u64 << from) };
                while rest != 0 {
                    f(rest.trailing_zeros() as usize);
                    rest &= rest - 1;
                }
            }
        }
    }

    pub fn indices(&self) -> Vec<usize> {
        let mut out = Vec::with_capacity(self.cardinality());
        self.for_each_set_index(0, |i| out.push(i));
        out
    }

    /// Intersection. Group masks of different groups intersect to nothing.
    pub fn and(&self, other: &Mask) -> Mask {
        self.assert_same_family(other, "and");
        match (self, other) {
            (Mask::Bitset(a), Mask::Bitset(_)) => {
                Mask::from_indices(a.len(), a.iter_ones().filter(|&i| other.test(i)))
            }
            (Mask::Group { group_id, bits }, Mask::Group { group_id: og, bits: ob }) => {
                let bits = if group_id == og { bits & ob } else { 0 };
                Mask::group(*group_id, bits)
            }
            _ => unreachable!(),
        }
    }

    /// Every CPU in `self` is also in `other`. Group masks additionally need equal group ids.
    pub fn subset_of(&self, other: &Mask) -> bool {
        self.assert_same_family(other, "subset_of");
        match (self, other) {
            (Mask::Bitset(a), Mask::Bitset(_)) => a.iter_ones().all(|i| other.test(i)),
            (Mask::Group { group_id, bits }, Mask::Group { group_id: og, bits: ob }) => {
                group_id == og && (ob | !bits) == !0u64
            }
            _ => unreachable!(),
        }
    }

    pub fn overlaps(&self, other: &Mask) -> bool {
        self.assert_same_family(other, "overlaps");
        match (self, other) {
            (Mask::Bitset(a), Mask::Bitset(_)) => a.iter_ones().any(|i| other.test(i)),
            (Mask::Group { group_id, bits }, Mask::Group { group_id: og, bits: ob }) => {
                group_id == og && bits & ob != 0
            }
            _ => unreachable!(),
        }
    }

    /// Ordering used by diagnostics: group id first, then the mask whose lowest differing bit
    /// is set sorts first. Entities starting at the same CPU therefore list widest first.
    pub fn layout_cmp(&self, other: &Mask) -> Ordering {
        self.assert_same_family(other, "layout_cmp");
        match (self, other) {
            (Mask::Group { group_id, bits }, Mask::Group { group_id: og, bits: ob }) => {
                group_id.cmp(og).then_with(|| {
                    let diff = bits ^ ob;
                    if diff == 0 {
                        Ordering::Equal
                    } else if (bits >> diff.trailing_zeros()) & 1 == 1 {
                        Ordering::Less
                    } else {
                        Ordering::Greater
                    }
                })
            }
            (Mask::Bitset(a), Mask::Bitset(b)) => {
                symmetric_difference(a, b).first_one().map_or(Ordering::Equal, |i| {
                    if self.test(i) {
                        Ordering::Less
                    } else {
                        Ordering::Greater
                    }
                })
            }
            _ => unreachable!(),
        }
    }

    /// Bytes of the mask, least significant first.
    fn to_le_bytes(&self) -> Vec<u8> {
        match self {
            Mask::Group { bits, .. } => bits.to_le_bytes().to_vec(),
            Mask::Bitset(bits) => {
                let len = bits.len().div_ceil(8).max(1);
                let mut bytes = vec![0u8; len];
                for i in bits.iter_ones() {
                    bytes[i / 8] |= 1 << (i % 8);
                }
                bytes
            }
        }
    }

    fn assert_same_family(&self, other: &Mask, op: &str) {
        if self.is_group() != other.is_group() {
            panic!("mask representation mismatch in {op}: {self} vs {other}");
        }
    }
}

/// Bits set in exactly one of `a` and `b`, as long as the longer of the two.
fn symmetric_difference(a: &CpuBits, b: &CpuBits) -> CpuBits {
    let (mut diff, shorter) = if a.len() >= b.len() { (a.clone(), b) } else { (b.clone(), a) };
    diff ^= shorter.as_bitslice();
    diff
}

/// Masks are equal when they select the same CPUs; the length of a bit-set is not compared.
impl PartialEq for Mask {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Mask {}

/// Numeric order: group id, then the mask read as an unsigned integer.
/// Used to give each entity kind a deterministic iteration order during construction.
impl Ord for Mask {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Mask::Group { group_id, bits }, Mask::Group { group_id: og, bits: ob }) => {
                group_id.cmp(og).then(bits.cmp(ob))
            }
            (Mask::Bitset(a), Mask::Bitset(b)) => {
                symmetric_difference(a, b).last_one().map_or(Ordering::Equal, |i| {
                    if self.test(i) {
                        Ordering::Greater
                    } else {
                        Ordering::Less
                    }
                })
            }
            (Mask::Bitset(_), Mask::Group { .. }) => Ordering::Less,
            (Mask::Group { .. }, Mask::Bitset(_)) => Ordering::Greater,
        }
    }
}

impl PartialOrd for Mask {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Grouped binary, most significant byte first: `FF` for a full byte, `OO` for an empty one,
/// runs of either compressed to `FFxN` / `OOxN`.
impl fmt::Display for Mask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Mask::Group { group_id, .. } = self {
            write!(f, "g{group_id}:")?;
        }
        let bytes = self.to_le_bytes();
        let mut parts: Vec<String> = Vec::with_capacity(bytes.len());
        let mut i = bytes.len();
        while i > 0 {
            i -= 1;
            let byte = bytes[i];
            let token = match byte {
                0xFF => "FF",
                0x00 => "OO",
                _ => {
                    parts.push(format!("{byte:08b}"));
                    continue;
                }
            };
            let mut run = 1;
            while i > 0 && bytes[i - 1] == byte {
                i -= 1;
                run += 1;
            }
            if run > 1 {
                parts.push(format!("{token}x{run}"));
            } else {
                parts.push(token.to_string());
            }
        }
        f.write_str(&parts.join("."))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subset_and_overlap_bitset() {
        let core = Mask::from_indices(8, [2, 6]);
        let socket = Mask::full(8);
        assert!(core.subset_of(&socket));
        assert!(!socket.subset_of(&core));
        assert!(core.overlaps(&socket));
        assert!(!core.overlaps(&Mask::from_indices(8, [3, 7])));
        assert_eq!(core.and(&Mask::from_indices(8, [6, 7])).indices(), vec![6]);
    }

    #[test]
    fn test_subset_group_requires_same_group() {
        let core = Mask::group(0, 0b0011);
        let package = Mask::group(0, 0b1111);
        assert!(core.subset_of(&package));
        assert!(!package.subset_of(&core));
        assert!(!Mask::group(1, 0b0011).subset_of(&package));
        assert!(!Mask::group(1, 0b0011).overlaps(&package));
        assert_eq!(core.and(&Mask::group(1, 0b0011)).cardinality(), 0);
    }

    #[test]
    #[should_panic(expected = "mask representation mismatch")]
    fn test_mixing_families_panics() {
        Mask::full(4).subset_of(&Mask::group(0, 0b1111));
    }

    #[test]
    fn test_for_each_set_index_from() {
        let mut seen = Vec::new();
        Mask::group(2, 0b1011_0100).for_each_set_index(3, |i| seen.push(i));
        assert_eq!(seen, vec![4, 5, 7]);

        seen.clear();
        Mask::from_indices(130, [0, 64, 129]).for_each_set_index(1, |i| seen.push(i));
        assert_eq!(seen, vec![64, 129]);
    }

    #[test]
    fn test_numeric_order() {
        let low = Mask::from_indices(8, [0, 4]);
        let high = Mask::from_indices(8, [1, 5]);
        assert!(low < high);
        assert!(Mask::group(0, u64::MAX) < Mask::group(1, 1));
    }

    #[test]
    fn test_equality_ignores_bitset_length() {
        let short = Mask::from_indices(4, [1]);
        let long = Mask::from_indices(130, [1]);
        assert_eq!(short, long);
        assert_eq!(short.cmp(&long), Ordering::Equal);
        assert_eq!(short.layout_cmp(&long), Ordering::Equal);
        assert_eq!(Mask::empty(4), Mask::empty(64));
        assert!(short < Mask::from_indices(4, [1, 2]));
        assert!(Mask::from_indices(130, [129]) > Mask::full(64));
        assert_ne!(Mask::group(0, 0b10), Mask::group(1, 0b10));

        let set: std::collections::BTreeSet<Mask> =
            [short, long, Mask::from_indices(8, [3])].into_iter().collect();
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_layout_order_lowest_bit_wins() {
        let socket = Mask::full(8);
        let core0 = Mask::from_indices(8, [0, 4]);
        let core1 = Mask::from_indices(8, [1, 5]);
        assert_eq!(socket.layout_cmp(&core0), Ordering::Less);
        assert_eq!(core0.layout_cmp(&core1), Ordering::Less);
        assert_eq!(core0.layout_cmp(&core0.clone()), Ordering::Equal);
    }

    #[test]
    fn test_display_compresses_runs() {
        assert_eq!(Mask::full(8).to_string(), "FF");
        assert_eq!(Mask::from_indices(8, [2, 6]).to_string(), "01000100");
        let mut socket = Mask::empty(64);
        for cpu in (0..8).chain(32..40) {
            socket.set(cpu);
        }
        assert_eq!(socket.to_string(), "OOx3.FF.OOx3.FF");
        assert_eq!(Mask::group(1, 0x3).to_string(), "g1:OOx7.00000011");
    }

    #[test]
    fn test_set_grows_bitset() {
        let mut mask = Mask::empty(2);
        mask.set(9);
        assert!(mask.test(9));
        assert_eq!(mask.cardinality(), 1);
        assert_eq!(mask.lowest_set(), Some(9));
    }
}
