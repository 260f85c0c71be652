// Page visitation order

pub fn gcd(mut a: usize, mut b: usize) -> usize {
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a
}

pub fn is_coprime(a: usize, b: usize) -> bool {
    gcd(a, b) == 1
}

/// Page indices `(stride * i) mod num_pages` for `i` in `0..num_pages`
///
/// Spreads consecutive mapped pages across the allocation; a permutation
/// when `stride` and `num_pages` are coprime.
#[derive(Debug, Clone)]
pub struct PageOrder {
    stride: usize,
    num_pages: usize,
    next: usize,
}

impl PageOrder {
    pub fn new(stride: usize, num_pages: usize) -> Self {
        Self {
            stride,
            num_pages,
            next: 0,
        }
    }
}

impl Iterator for PageOrder {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        if self.next >= self.num_pages {
            return None;
        }
        let page = ((self.stride as u128 * self.next as u128) % self.num_pages as u128) as usize;
        self.next += 1;
        Some(page)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.num_pages.saturating_sub(self.next);
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for PageOrder {}
