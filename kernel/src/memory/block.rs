use kernel_shared::{
    constants::{ARCH_WORD_SIZE, OBJECT_HEADER_SIZE, OBJECT_HEADER_WORDS},
    object::{
        BlockKind, MultiUseWord, TypeId, HEADER_EXTRA_WORD, HEADER_MULTI_USE_WORD,
        HEADER_SIZE_WORD, NO_NEXT_BLOCK,
    },
};

/// A block header inside a heap segment.
///
/// Only segments hand these out, and only for addresses they own, which is
/// what makes the raw accesses below sound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Block(usize);

impl Block {
    /// # Safety
    ///
    /// `header` must be the address of a header inside a live segment.
    pub unsafe fn at(header: usize) -> Self {
        Block(header)
    }

    pub fn from_payload(payload: usize) -> usize {
        payload - OBJECT_HEADER_SIZE
    }

    pub fn address(&self) -> usize {
        self.0
    }

    pub fn payload(&self) -> usize {
        self.0 + OBJECT_HEADER_SIZE
    }

    pub fn end(&self) -> usize {
        self.0 + self.size_words() * ARCH_WORD_SIZE
    }

    pub fn contains(&self, address: usize) -> bool {
        address >= self.0 && address < self.end()
    }

    fn word(&self, index: usize) -> usize {
        // SAFETY: see `at`.
        unsafe { core::ptr::read_volatile((self.0 as *const usize).add(index)) }
    }

    fn set_word(&self, index: usize, value: usize) {
        // SAFETY: see `at`.
        unsafe { core::ptr::write_volatile((self.0 as *mut usize).add(index), value) }
    }

    pub fn multi_use(&self) -> MultiUseWord {
        MultiUseWord::from_bits(self.word(HEADER_MULTI_USE_WORD))
    }

    pub fn set_multi_use(&self, word: MultiUseWord) {
        self.set_word(HEADER_MULTI_USE_WORD, word.bits())
    }

    pub fn kind(&self) -> Option<BlockKind> {
        self.multi_use().kind()
    }

    pub fn size_words(&self) -> usize {
        self.word(HEADER_SIZE_WORD)
    }

    pub fn size_bytes(&self) -> usize {
        self.size_words() * ARCH_WORD_SIZE
    }

    pub fn payload_words(&self) -> usize {
        self.size_words().saturating_sub(OBJECT_HEADER_WORDS)
    }

    pub fn type_id(&self) -> TypeId {
        TypeId(self.word(HEADER_EXTRA_WORD) as u32)
    }

    pub fn next_free(&self) -> Option<usize> {
        match self.word(HEADER_EXTRA_WORD) {
            NO_NEXT_BLOCK => None,
            next => Some(next),
        }
    }

    pub fn set_next_free(&self, next: Option<usize>) {
        self.set_word(HEADER_EXTRA_WORD, next.unwrap_or(NO_NEXT_BLOCK))
    }

    pub fn format_free(&self, size_words: usize, next: Option<usize>) {
        self.set_multi_use(MultiUseWord::new(BlockKind::Free));
        self.set_word(HEADER_SIZE_WORD, size_words);
        self.set_next_free(next);
    }

    pub fn format_object(&self, size_words: usize, type_id: TypeId, reference_count: usize) {
        self.set_multi_use(MultiUseWord::new(BlockKind::Object).with_reference_count(reference_count));
        self.set_word(HEADER_SIZE_WORD, size_words);
        self.set_word(HEADER_EXTRA_WORD, type_id.0 as usize);
    }

    pub fn format_raw(&self, size_words: usize) {
        self.set_multi_use(MultiUseWord::new(BlockKind::RawBytes));
        self.set_word(HEADER_SIZE_WORD, size_words);
        self.set_word(HEADER_EXTRA_WORD, 0);
    }

    pub fn payload_word(&self, index: usize) -> Option<usize> {
        if index >= self.payload_words() {
            return None;
        }
        Some(self.word(OBJECT_HEADER_WORDS + index))
    }

    pub fn set_payload_word(&self, index: usize, value: usize) -> bool {
        if index >= self.payload_words() {
            return false;
        }
        self.set_word(OBJECT_HEADER_WORDS + index, value);
        true
    }

    pub fn fill_payload(&self, value: usize) {
        // SAFETY: the payload is part of the block.
        unsafe { klib::fill_words(self.payload(), value, self.payload_words()) }
    }
}
