//! Bloom filters over identity hashes.
//!
//! No false negatives: a negative lookup means the identity was never
//! recorded. Positives must be confirmed against the exact identity index.

use insightgraph_common::IdentityHash;

/// Fixed-capacity bloom filter. Bit positions come from double hashing over
/// the two 64-bit lanes of the SHA-256 identity, so no extra hashing is done.
pub struct BloomFilter {
    bits: Vec<u64>,
    num_hashes: usize,
    num_bits: usize,
    capacity: usize,
    len: usize,
}

impl BloomFilter {
    pub fn new(expected_items: usize, false_positive_rate: f64) -> Self {
        let expected_items = expected_items.max(1);
        let num_bits = Self::optimal_num_bits(expected_items, false_positive_rate).max(64);
        let num_hashes = Self::optimal_num_hashes(expected_items, num_bits);

        Self {
            bits: vec![0; num_bits.div_ceil(64)],
            num_hashes,
            num_bits,
            capacity: expected_items,
            len: 0,
        }
    }

    fn optimal_num_bits(n: usize, p: f64) -> usize {
        let ln2 = std::f64::consts::LN_2;
        (-(n as f64) * p.ln() / (ln2 * ln2)).ceil() as usize
    }

    fn optimal_num_hashes(n: usize, m: usize) -> usize {
        let ln2 = std::f64::consts::LN_2;
        (((m as f64 / n as f64) * ln2).ceil() as usize).max(1)
    }

    fn positions<'a>(&'a self, identity: &IdentityHash) -> impl Iterator<Item = usize> + 'a {
        let (h1, h2) = identity.lanes();
        // Odd step so successive hashes never collapse onto one bit.
        let h2 = h2 | 1;
        let m = self.num_bits as u64;
        (0..self.num_hashes as u64).map(move |i| (h1.wrapping_add(i.wrapping_mul(h2)) % m) as usize)
    }

    pub fn insert(&mut self, identity: &IdentityHash) {
        let positions: Vec<usize> = self.positions(identity).collect();
        for bit in positions {
            self.bits[bit / 64] |= 1u64 << (bit % 64);
        }
        self.len += 1;
    }

    pub fn contains(&self, identity: &IdentityHash) -> bool {
        self.positions(identity)
            .all(|bit| self.bits[bit / 64] & (1u64 << (bit % 64)) != 0)
    }

    pub fn is_full(&self) -> bool {
        self.len >= self.capacity
    }

    /// Estimated false positive rate given the current bit saturation.
    pub fn current_false_positive_rate(&self) -> f64 {
        let set_bits: u32 = self.bits.iter().map(|w| w.count_ones()).sum();
        let p = set_bits as f64 / self.num_bits as f64;
        p.powi(self.num_hashes as i32)
    }
}

/// Bloom filter that grows by stacking filters. Each new layer doubles the
/// capacity and halves the layer FP rate, so the compound rate stays under
/// the configured target however many identities are recorded.
pub struct ScalableBloomFilter {
    filters: Vec<BloomFilter>,
    false_positive_rate: f64,
    len: usize,
}

const GROWTH_FACTOR: usize = 2;
const TIGHTENING_RATIO: f64 = 0.5;

impl ScalableBloomFilter {
    pub fn new(initial_capacity: usize, false_positive_rate: f64) -> Self {
        let first_rate = false_positive_rate * (1.0 - TIGHTENING_RATIO);
        Self {
            filters: vec![BloomFilter::new(initial_capacity, first_rate)],
            false_positive_rate,
            len: 0,
        }
    }

    pub fn insert(&mut self, identity: &IdentityHash) {
        if self.filters.last().is_some_and(BloomFilter::is_full) {
            let layer = self.filters.len() as i32;
            let capacity = self.filters[0].capacity * GROWTH_FACTOR.pow(layer as u32);
            let rate = self.false_positive_rate
                * (1.0 - TIGHTENING_RATIO)
                * TIGHTENING_RATIO.powi(layer);
            self.filters.push(BloomFilter::new(capacity, rate));
        }
        if let Some(filter) = self.filters.last_mut() {
            filter.insert(identity);
        }
        self.len += 1;
    }

    pub fn contains(&self, identity: &IdentityHash) -> bool {
        self.filters.iter().any(|f| f.contains(identity))
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn num_filters(&self) -> usize {
        self.filters.len()
    }
}
