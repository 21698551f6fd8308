//! Growable bitset
//!
//! Word-packed occupancy bits (1 = used, 0 = free). Bits past the last
//! stored word read as clear, and the word vector never ends in a zero word,
//! so `length()` is a constant-time lookup.

/// Bits per storage word
const WORD_BITS: u64 = 64;

#[derive(Debug, Clone, Default)]
pub(crate) struct BitSet {
    words: Vec<u64>,
}

impl BitSet {
    pub fn new() -> Self {
        Self { words: Vec::new() }
    }

    /// Check a single bit
    pub fn get(&self, index: u64) -> bool {
        let word_idx = (index / WORD_BITS) as usize;
        self.words
            .get(word_idx)
            .is_some_and(|word| word & (1u64 << (index % WORD_BITS)) != 0)
    }

    /// Set bits `[from, to)`
    pub fn set_range(&mut self, from: u64, to: u64) {
        if from >= to {
            return;
        }
        let last_word = ((to - 1) / WORD_BITS) as usize;
        if self.words.len() <= last_word {
            self.words.resize(last_word + 1, 0);
        }
        for (word_idx, mask) in range_masks(from, to) {
            self.words[word_idx] |= mask;
        }
    }

    /// Clear bits `[from, to)`
    pub fn clear_range(&mut self, from: u64, to: u64) {
        if from >= to {
            return;
        }
        let len = self.words.len();
        for (word_idx, mask) in range_masks(from, to) {
            if word_idx >= len {
                break;
            }
            self.words[word_idx] &= !mask;
        }
        self.trim();
    }

    /// Clear every bit
    pub fn clear(&mut self) {
        self.words.clear();
    }

    /// Index of the highest set bit plus one (0 when empty)
    pub fn length(&self) -> u64 {
        match self.words.last() {
            Some(&last) => {
                (self.words.len() as u64 - 1) * WORD_BITS + WORD_BITS
                    - u64::from(last.leading_zeros())
            }
            None => 0,
        }
    }

    /// Number of set bits
    pub fn cardinality(&self) -> u64 {
        self.words.iter().map(|w| u64::from(w.count_ones())).sum()
    }

    /// First set bit at or after `from`
    pub fn next_set_bit(&self, from: u64) -> Option<u64> {
        let mut word_idx = (from / WORD_BITS) as usize;
        if word_idx >= self.words.len() {
            return None;
        }
        let mut word = self.words[word_idx] & (u64::MAX << (from % WORD_BITS));
        loop {
            if word != 0 {
                return Some(word_idx as u64 * WORD_BITS + u64::from(word.trailing_zeros()));
            }
            word_idx += 1;
            if word_idx >= self.words.len() {
                return None;
            }
            word = self.words[word_idx];
        }
    }

    /// First clear bit at or after `from` (always exists)
    pub fn next_clear_bit(&self, from: u64) -> u64 {
        let mut word_idx = (from / WORD_BITS) as usize;
        if word_idx >= self.words.len() {
            return from;
        }
        let mut word = !self.words[word_idx] & (u64::MAX << (from % WORD_BITS));
        loop {
            if word != 0 {
                return word_idx as u64 * WORD_BITS + u64::from(word.trailing_zeros());
            }
            word_idx += 1;
            if word_idx >= self.words.len() {
                return self.words.len() as u64 * WORD_BITS;
            }
            word = !self.words[word_idx];
        }
    }

    /// Last set bit at or before `from`
    pub fn previous_set_bit(&self, from: u64) -> Option<u64> {
        let word_idx = (from / WORD_BITS) as usize;
        if word_idx >= self.words.len() {
            return self.length().checked_sub(1);
        }
        let word = self.words[word_idx] & (u64::MAX >> (WORD_BITS - 1 - from % WORD_BITS));
        Self::scan_back(word_idx, word, |w| w, &self.words)
    }

    /// Last clear bit at or before `from`
    pub fn previous_clear_bit(&self, from: u64) -> Option<u64> {
        let word_idx = (from / WORD_BITS) as usize;
        if word_idx >= self.words.len() {
            return Some(from);
        }
        let word = !self.words[word_idx] & (u64::MAX >> (WORD_BITS - 1 - from % WORD_BITS));
        Self::scan_back(word_idx, word, |w| !w, &self.words)
    }

    fn scan_back(
        mut word_idx: usize,
        mut word: u64,
        view: impl Fn(u64) -> u64,
        words: &[u64],
    ) -> Option<u64> {
        loop {
            if word != 0 {
                return Some(
                    word_idx as u64 * WORD_BITS + (WORD_BITS - 1)
                        - u64::from(word.leading_zeros()),
                );
            }
            if word_idx == 0 {
                return None;
            }
            word_idx -= 1;
            word = view(words[word_idx]);
        }
    }

    fn trim(&mut self) {
        while self.words.last() == Some(&0) {
            self.words.pop();
        }
    }
}

/// Per-word masks covering bits `[from, to)`; requires `from < to`
fn range_masks(from: u64, to: u64) -> impl Iterator<Item = (usize, u64)> {
    let first = (from / WORD_BITS) as usize;
    let last = ((to - 1) / WORD_BITS) as usize;
    (first..=last).map(move |word_idx| {
        let lo = if word_idx == first { from % WORD_BITS } else { 0 };
        let hi = if word_idx == last { (to - 1) % WORD_BITS } else { WORD_BITS - 1 };
        let mask = (u64::MAX >> (WORD_BITS - 1 - hi)) & (u64::MAX << lo);
        (word_idx, mask)
    })
}
