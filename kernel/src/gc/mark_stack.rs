/// Fixed capacity gray stack. A push that does not fit only sets the overflow
/// flag, the collector then rescans the heap for marked objects.
pub(crate) struct MarkStack<const CAPACITY: usize> {
    items: [usize; CAPACITY],
    len: usize,
    overflowed: bool,
}

impl<const CAPACITY: usize> MarkStack<CAPACITY> {
    pub const fn new() -> Self {
        Self {
            items: [0; CAPACITY],
            len: 0,
            overflowed: false,
        }
    }

    pub fn push(&mut self, object: usize) {
        if self.len == CAPACITY {
            self.overflowed = true;
            return;
        }
        self.items[self.len] = object;
        self.len += 1;
    }

    pub fn pop(&mut self) -> Option<usize> {
        if self.len == 0 {
            return None;
        }
        self.len -= 1;
        Some(self.items[self.len])
    }

    /// Clears the overflow flag and reports whether it was set.
    pub fn take_overflow(&mut self) -> bool {
        core::mem::replace(&mut self.overflowed, false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pushes_past_capacity_raise_the_overflow_flag() {
        let mut stack = MarkStack::<2>::new();
        stack.push(1);
        stack.push(2);
        stack.push(3);

        assert!(stack.take_overflow());
        assert!(!stack.take_overflow());
        assert_eq!(stack.pop(), Some(2));
        assert_eq!(stack.pop(), Some(1));
        assert_eq!(stack.pop(), None);
    }
}
