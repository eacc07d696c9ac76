use bitvec::vec::BitVec;

/// One bit per heap word, set where an allocated block's header starts.
///
/// Resolves interior pointers: the owning block of any address is the last
/// set bit at or before it.
#[derive(Debug)]
pub(crate) struct ObjectStartMap {
    data: BitVec<usize>,
}

impl ObjectStartMap {
    pub fn new(length: usize) -> ObjectStartMap {
        let mut data = BitVec::new();
        data.resize(length, false);
        ObjectStartMap { data }
    }

    pub fn is_start(&self, index: usize) -> bool {
        self.data.len() > index && self.data[index]
    }

    pub fn set(&mut self, index: usize, state: bool) {
        if index < self.data.len() {
            self.data.set(index, state);
        }
    }

    /// Closest start at or before `index`.
    pub fn find_start(&self, index: usize) -> Option<usize> {
        if index >= self.data.len() {
            return None;
        }
        self.data[..=index].last_one()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interior_index_resolves_to_preceding_start() {
        let mut map = ObjectStartMap::new(64);
        map.set(3, true);
        map.set(10, true);

        assert_eq!(map.find_start(2), None);
        assert_eq!(map.find_start(3), Some(3));
        assert_eq!(map.find_start(9), Some(3));
        assert_eq!(map.find_start(40), Some(10));
        assert_eq!(map.find_start(64), None);
    }
}
