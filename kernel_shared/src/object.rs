//! Heap block header contract.
//!
//! Every block on the managed heap starts with [`OBJECT_HEADER_WORDS`] words:
//!
//! | word | free block        | object            | raw bytes |
//! |------|-------------------|-------------------|-----------|
//! | 0    | multi-use word    | multi-use word    | multi-use word |
//! | 1    | size in words     | size in words     | size in words |
//! | 2    | next free block   | type id           | 0         |
//!
//! Sizes include the header. The multi-use word packs the block kind in bits
//! 0..1, the mark bit in bit 2 and the reference count from bit 8 upwards.
//! Generated code depends on this layout, it cannot change.
//!
//! [`OBJECT_HEADER_WORDS`]: crate::constants::OBJECT_HEADER_WORDS

use alloc::collections::BTreeMap;
use core::fmt::Display;

use serde::{Deserialize, Serialize};

use crate::constants::MAX_REFERENCE_COUNT;

pub const HEADER_MULTI_USE_WORD: usize = 0;
pub const HEADER_SIZE_WORD: usize = 1;
pub const HEADER_EXTRA_WORD: usize = 2;

const KIND_MASK: usize = 0b11;
const MARK_BIT: usize = 1 << 2;
const REFERENCE_COUNT_SHIFT: usize = 8;

/// Terminates the in-band free list.
pub const NO_NEXT_BLOCK: usize = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(usize)]
pub enum BlockKind {
    Free = 0,
    Object = 1,
    RawBytes = 2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct MultiUseWord(usize);

impl MultiUseWord {
    pub const fn new(kind: BlockKind) -> Self {
        Self(kind as usize)
    }

    pub const fn from_bits(bits: usize) -> Self {
        Self(bits)
    }

    pub const fn bits(&self) -> usize {
        self.0
    }

    /// `None` when the low bits do not name a block kind, which means the word
    /// is not a header at all.
    pub fn kind(&self) -> Option<BlockKind> {
        match self.0 & KIND_MASK {
            0 => Some(BlockKind::Free),
            1 => Some(BlockKind::Object),
            2 => Some(BlockKind::RawBytes),
            _ => None,
        }
    }

    pub const fn is_marked(&self) -> bool {
        self.0 & MARK_BIT != 0
    }

    pub const fn with_mark(self, marked: bool) -> Self {
        if marked {
            Self(self.0 | MARK_BIT)
        } else {
            Self(self.0 & !MARK_BIT)
        }
    }

    pub const fn reference_count(&self) -> usize {
        (self.0 >> REFERENCE_COUNT_SHIFT) & MAX_REFERENCE_COUNT
    }

    pub const fn with_reference_count(self, count: usize) -> Self {
        let low = self.0 & ((1 << REFERENCE_COUNT_SHIFT) - 1);
        Self(low | ((count & MAX_REFERENCE_COUNT) << REFERENCE_COUNT_SHIFT))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct TypeId(pub u32);

impl Display for TypeId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "type#{}", self.0)
    }
}

/// Where the references inside an instance live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeLayout {
    /// Word offsets into the payload that hold object references.
    Fields(&'static [usize]),
    /// First payload word is the element count, every element is a reference.
    ReferenceArray,
    /// No references at all, strings and value arrays.
    Opaque,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypeDescriptor {
    pub id: TypeId,
    pub name: &'static str,
    /// Payload bytes of a fixed-size instance. Arrays size themselves at allocation.
    pub instance_size: usize,
    pub layout: TypeLayout,
}

impl TypeDescriptor {
    pub const fn new(
        id: TypeId,
        name: &'static str,
        instance_size: usize,
        layout: TypeLayout,
    ) -> Self {
        Self {
            id,
            name,
            instance_size,
            layout,
        }
    }

    pub fn has_references(&self) -> bool {
        match self.layout {
            TypeLayout::Fields(offsets) => !offsets.is_empty(),
            TypeLayout::ReferenceArray => true,
            TypeLayout::Opaque => false,
        }
    }

    /// Payload word offsets holding references, given the payload's size in
    /// words and, for arrays, its element count word.
    pub fn reference_slots(
        &self,
        payload_words: usize,
        element_count: usize,
    ) -> impl Iterator<Item = usize> + '_ {
        let (fields, array): (&[usize], core::ops::Range<usize>) = match self.layout {
            TypeLayout::Fields(offsets) => (offsets, 0..0),
            TypeLayout::ReferenceArray => {
                let end = element_count.saturating_add(1).min(payload_words);
                (&[], 1.min(end)..end)
            }
            TypeLayout::Opaque => (&[], 0..0),
        };
        fields
            .iter()
            .copied()
            .filter(move |offset| *offset < payload_words)
            .chain(array)
    }
}

/// Compiler-emitted descriptors, looked up by the id stored in header word 2.
#[derive(Debug, Default, Clone)]
pub struct TypeTable {
    types: BTreeMap<TypeId, TypeDescriptor>,
}

impl TypeTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, descriptor: TypeDescriptor) {
        self.types.insert(descriptor.id, descriptor);
    }

    pub fn get(&self, id: TypeId) -> Option<&TypeDescriptor> {
        self.types.get(&id)
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

impl FromIterator<TypeDescriptor> for TypeTable {
    fn from_iter<T: IntoIterator<Item = TypeDescriptor>>(iter: T) -> Self {
        let mut table = TypeTable::new();
        for descriptor in iter {
            table.register(descriptor);
        }
        table
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn multi_use_word_keeps_fields_apart() {
        let word = MultiUseWord::new(BlockKind::Object)
            .with_reference_count(5)
            .with_mark(true);

        assert_eq!(word.kind(), Some(BlockKind::Object));
        assert!(word.is_marked());
        assert_eq!(word.reference_count(), 5);

        let cleared = word.with_mark(false).with_reference_count(4);
        assert_eq!(cleared.kind(), Some(BlockKind::Object));
        assert!(!cleared.is_marked());
        assert_eq!(cleared.reference_count(), 4);
    }

    #[test]
    fn kind_bits_three_is_not_a_header() {
        assert_eq!(MultiUseWord::from_bits(0b11).kind(), None);
    }

    #[test]
    fn array_slots_follow_the_element_count() {
        let descriptor =
            TypeDescriptor::new(TypeId(7), "Object[]", 0, TypeLayout::ReferenceArray);
        let slots: alloc::vec::Vec<_> = descriptor.reference_slots(4, 3).collect();
        assert_eq!(slots, [1, 2, 3]);

        // A corrupt count never walks past the payload.
        let slots: alloc::vec::Vec<_> = descriptor.reference_slots(4, 100).collect();
        assert_eq!(slots, [1, 2, 3]);
    }

    #[test]
    fn field_slots_come_from_the_descriptor() {
        const OFFSETS: &[usize] = &[0, 2];
        let descriptor = TypeDescriptor::new(TypeId(1), "Node", 12, TypeLayout::Fields(OFFSETS));
        let slots: alloc::vec::Vec<_> = descriptor.reference_slots(3, 0).collect();
        assert_eq!(slots, [0, 2]);
    }
}
