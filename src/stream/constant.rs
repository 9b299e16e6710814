//! Constant generator for constant-to-port streams.
//!
//! Produces `constant` `num_elem` times, then `constant2` `num_elem2`
//! times, and repeats the pair for `iters` outer rounds:
//!
//! ```text
//! constant=7 num_elem=2 constant2=9 num_elem2=1 iters=2
//!   -> 7 7 9 7 7 9
//! ```

/// Two-phase repeating constant source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConstPattern {
    constant: u64,
    num_elem: u64,
    constant2: u64,
    num_elem2: u64,
    iters_left: u64,
    elements_left: u64,
    elements_left2: u64,
}

impl ConstPattern {
    pub fn new(constant: u64, num_elem: u64, constant2: u64, num_elem2: u64, iters: u64) -> Self {
        // Rounds with nothing to emit are no work at all.
        let iters_left = if num_elem == 0 && num_elem2 == 0 { 0 } else { iters };
        Self {
            constant,
            num_elem,
            constant2,
            num_elem2,
            iters_left,
            elements_left: 0,
            elements_left2: 0,
        }
    }

    /// True while any element of any round remains.
    #[inline]
    pub fn active(&self) -> bool {
        self.iters_left != 0 || self.elements_left != 0 || self.elements_left2 != 0
    }

    /// Elements still to be produced.
    pub fn remaining(&self) -> u64 {
        self.elements_left + self.elements_left2 + self.iters_left * (self.num_elem + self.num_elem2)
    }

    /// Start the next round once the current one is exhausted.
    fn check_for_iter(&mut self) {
        if self.elements_left == 0 && self.elements_left2 == 0 && self.iters_left > 0 {
            self.iters_left -= 1;
            self.elements_left = self.num_elem;
            self.elements_left2 = self.num_elem2;
        }
    }

    /// Produce the next element.
    pub fn pop_item(&mut self) -> Option<u64> {
        self.check_for_iter();
        if self.elements_left > 0 {
            self.elements_left -= 1;
            Some(self.constant)
        } else if self.elements_left2 > 0 {
            self.elements_left2 -= 1;
            Some(self.constant2)
        } else {
            None
        }
    }
}

impl Iterator for ConstPattern {
    type Item = u64;

    fn next(&mut self) -> Option<u64> {
        self.pop_item()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = self.remaining() as usize;
        (n, Some(n))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_two_phase_rounds() {
        let pattern = ConstPattern::new(7, 2, 9, 1, 2);
        assert_eq!(pattern.remaining(), 6);
        let values: Vec<u64> = pattern.collect();
        assert_eq!(values, vec![7, 7, 9, 7, 7, 9]);
    }

    #[test]
    fn test_active_until_last_element() {
        let mut pattern = ConstPattern::new(1, 1, 2, 1, 1);
        assert!(pattern.active());
        assert_eq!(pattern.pop_item(), Some(1));
        assert!(pattern.active());
        assert_eq!(pattern.pop_item(), Some(2));
        assert!(!pattern.active());
        assert_eq!(pattern.pop_item(), None);
    }

    #[test]
    fn test_second_phase_only() {
        let values: Vec<u64> = ConstPattern::new(5, 0, 3, 2, 2).collect();
        assert_eq!(values, vec![3, 3, 3, 3]);
    }

    #[test]
    fn test_empty_pattern_inactive() {
        let mut pattern = ConstPattern::new(5, 0, 3, 0, 10);
        assert!(!pattern.active());
        assert_eq!(pattern.pop_item(), None);

        let pattern = ConstPattern::new(5, 4, 3, 4, 0);
        assert!(!pattern.active());
    }
}
