use core::mem;

pub const ARCH_WORD_SIZE: usize = mem::size_of::<usize>();

/// Words in front of every heap block, see [`crate::object`].
pub const OBJECT_HEADER_WORDS: usize = 3;
pub const OBJECT_HEADER_SIZE: usize = OBJECT_HEADER_WORDS * ARCH_WORD_SIZE;

pub const DEFAULT_STACK_SIZE: usize = 2048;
pub const DEFAULT_QUANTUM_MILLISECONDS: u64 = 20;

/// Written at the lowest word of every thread stack.
pub const STACK_CANARY: usize = 0xBAAD_F00D;

/// Pattern used to fill free heap memory when the dirty fill is configured.
pub const DIRTY_MEMORY_PATTERN: usize = 0xDEAD_BEEF;

/// Reference counts live in the upper 24 bits of a 32-bit multi-use word.
pub const MAX_REFERENCE_COUNT: usize = 0x00FF_FFFF;
