//! In-memory map of used sectors, rebuilt every time an image is opened
type BitmapWord = u64;

const WORD_BITS: usize = 64;

/// One bit per sector, set while the sector's status byte is non-zero
pub struct Bitmap {
    words: Vec<BitmapWord>,
    bits: usize,
}

impl Bitmap {
    /// All clear
    pub fn new(bits: usize) -> Self {
        Self {
            words: vec![0; (bits + WORD_BITS - 1) / WORD_BITS],
            bits,
        }
    }
    /**
        Find the lowest clear bit at or after `from`:
        *does not set it, the caller claims the sector by writing to it
    */
    pub fn first_clear(&self, from: usize) -> Option<usize> {
        let start_word = from / WORD_BITS;
        self.words
            .iter()
            .enumerate()
            .skip(start_word)
            .find_map(|(word_pos, word)| {
                // hide bits below `from` in the first word
                let mask = if word_pos == start_word {
                    (1u64 << (from % WORD_BITS)) - 1
                } else {
                    0
                };
                let word = *word | mask;
                (word != BitmapWord::MAX).then(|| word_pos * WORD_BITS + word.trailing_ones() as usize)
            })
            .filter(|bit| *bit < self.bits)
    }
    /// Mark a sector used or free
    pub fn set(&mut self, bit: usize, used: bool) {
        let (word_pos, inner_pos) = Self::decomposition(bit);
        if used {
            self.words[word_pos] |= 1u64 << inner_pos;
        } else {
            self.words[word_pos] &= !(1u64 << inner_pos);
        }
    }
    /// Number of clear bits
    pub fn count_clear(&self) -> usize {
        let used: usize = self.words.iter().map(|w| w.count_ones() as usize).sum();
        self.bits - used
    }
    /// (word_pos, inner_pos)
    fn decomposition(bit: usize) -> (usize, usize) {
        (bit / WORD_BITS, bit % WORD_BITS)
    }
}
