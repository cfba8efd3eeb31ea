//! Bit-packed 2D boolean image.
//!
//! One bit per element, stored LSB-first in `u64` words. Bits past
//! `width * height` in the last word are always kept clear so word-level
//! operations and `count_ones` stay exact.

const BITS_PER_WORD: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BitBuffer2 {
    words: Vec<u64>,
    width: usize,
    height: usize,
    len: usize,
}

impl BitBuffer2 {
    pub fn new_filled(width: usize, height: usize, value: bool) -> Self {
        let len = width * height;
        let fill = if value { !0u64 } else { 0u64 };
        let mut buffer = Self {
            words: vec![fill; len.div_ceil(BITS_PER_WORD)],
            width,
            height,
            len,
        };
        buffer.clear_tail();
        buffer
    }

    pub fn new_default(width: usize, height: usize) -> Self {
        Self::new_filled(width, height, false)
    }

    /// Build from a predicate over `(x, y)`.
    pub fn from_fn(width: usize, height: usize, mut f: impl FnMut(usize, usize) -> bool) -> Self {
        let mut buffer = Self::new_default(width, height);
        for y in 0..height {
            for x in 0..width {
                if f(x, y) {
                    buffer.set(y * width + x, true);
                }
            }
        }
        buffer
    }

    pub fn from_slice(width: usize, height: usize, data: &[bool]) -> Self {
        assert_eq!(
            data.len(),
            width * height,
            "data length {} does not match dimensions {}x{}",
            data.len(),
            width,
            height
        );
        let mut buffer = Self::new_default(width, height);
        for (i, &value) in data.iter().enumerate() {
            if value {
                buffer.set(i, true);
            }
        }
        buffer
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.width
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.height
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn get(&self, idx: usize) -> bool {
        debug_assert!(idx < self.len);
        (self.words[idx / BITS_PER_WORD] >> (idx % BITS_PER_WORD)) & 1 != 0
    }

    #[inline]
    pub fn set(&mut self, idx: usize, value: bool) {
        debug_assert!(idx < self.len);
        let bit = 1u64 << (idx % BITS_PER_WORD);
        let word = &mut self.words[idx / BITS_PER_WORD];
        if value {
            *word |= bit;
        } else {
            *word &= !bit;
        }
    }

    #[inline]
    pub fn get_xy(&self, x: usize, y: usize) -> bool {
        debug_assert!(x < self.width && y < self.height);
        self.get(y * self.width + x)
    }

    #[inline]
    pub fn set_xy(&mut self, x: usize, y: usize, value: bool) {
        debug_assert!(x < self.width && y < self.height);
        self.set(y * self.width + x, value);
    }

    pub fn fill(&mut self, value: bool) {
        self.words.fill(if value { !0u64 } else { 0u64 });
        self.clear_tail();
    }

    pub fn count_ones(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// In-place logical AND with a buffer of the same shape.
    pub fn and_assign(&mut self, other: &Self) {
        assert_eq!(
            (self.width, self.height),
            (other.width, other.height),
            "shape mismatch"
        );
        for (a, b) in self.words.iter_mut().zip(&other.words) {
            *a &= *b;
        }
    }

    /// In-place logical OR with a buffer of the same shape.
    pub fn or_assign(&mut self, other: &Self) {
        assert_eq!(
            (self.width, self.height),
            (other.width, other.height),
            "shape mismatch"
        );
        for (a, b) in self.words.iter_mut().zip(&other.words) {
            *a |= *b;
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = bool> + '_ {
        (0..self.len).map(move |i| self.get(i))
    }

    /// Linear indices of set bits, ascending.
    pub fn iter_ones(&self) -> impl Iterator<Item = usize> + '_ {
        self.words.iter().enumerate().flat_map(|(wi, &word)| {
            let mut rest = word;
            std::iter::from_fn(move || {
                if rest == 0 {
                    return None;
                }
                let bit = rest.trailing_zeros() as usize;
                rest &= rest - 1;
                Some(wi * BITS_PER_WORD + bit)
            })
        })
    }

    fn clear_tail(&mut self) {
        let used = self.len % BITS_PER_WORD;
        if used != 0 {
            if let Some(last) = self.words.last_mut() {
                *last &= (1u64 << used) - 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filled_count_ignores_tail_bits() {
        let buf = BitBuffer2::new_filled(10, 7, true);
        assert_eq!(buf.len(), 70);
        assert_eq!(buf.count_ones(), 70);
    }

    #[test]
    fn test_set_get_xy() {
        let mut buf = BitBuffer2::new_default(100, 3);
        buf.set_xy(99, 2, true);
        buf.set_xy(0, 1, true);
        assert!(buf.get_xy(99, 2));
        assert!(buf.get_xy(0, 1));
        assert!(!buf.get_xy(1, 1));
        buf.set_xy(99, 2, false);
        assert!(!buf.get_xy(99, 2));
        assert_eq!(buf.count_ones(), 1);
    }

    #[test]
    fn test_and_keeps_only_common_bits() {
        let a = BitBuffer2::from_slice(3, 1, &[true, true, false]);
        let b = BitBuffer2::from_slice(3, 1, &[true, false, true]);
        let mut c = a.clone();
        c.and_assign(&b);
        assert_eq!(c.iter().collect::<Vec<_>>(), vec![true, false, false]);
        let mut d = a;
        d.or_assign(&b);
        assert_eq!(d.count_ones(), 3);
    }

    #[test]
    fn test_iter_ones_crosses_words() {
        let buf = BitBuffer2::from_fn(130, 1, |x, _| x % 63 == 0);
        assert_eq!(buf.iter_ones().collect::<Vec<_>>(), vec![0, 63, 126]);
    }

    #[test]
    fn test_fill_false_then_true() {
        let mut buf = BitBuffer2::new_filled(65, 1, false);
        buf.fill(true);
        assert_eq!(buf.count_ones(), 65);
        buf.fill(false);
        assert_eq!(buf.count_ones(), 0);
    }
}
