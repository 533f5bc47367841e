//! Auto-pass (QC bypass) selection
//!
//! A configured percentage of each ingestion batch skips manual triage and
//! goes straight to assessment. Selection is over the batch as a whole, not
//! per-item coin flips, so the realized percentage stays predictable within
//! rounding.

use rand::Rng;

/// Select which items of an `n`-item batch are auto-passed.
///
/// Picks `round(n * percent / 100)` distinct indices uniformly at random and
/// returns a parallel flag vector. `percent` is clamped to 0-100.
pub fn select_auto_pass<R: Rng>(n: usize, percent: u8, rng: &mut R) -> Vec<bool> {
    let percent = percent.min(100) as usize;
    let count = ((n * percent) as f64 / 100.0).round() as usize;
    let count = count.min(n);

    let mut flags = vec![false; n];
    if count == 0 {
        return flags;
    }

    // Partial Fisher-Yates: the first `count` positions of `indices` end up
    // a uniform random subset
    let mut indices: Vec<usize> = (0..n).collect();
    for i in 0..count {
        let j = rng.gen_range(i..n);
        indices.swap(i, j);
    }
    for &idx in &indices[..count] {
        flags[idx] = true;
    }

    flags
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_exact_count_selected() {
        let mut rng = StdRng::seed_from_u64(7);
        for (n, percent, expected) in [
            (100, 20u8, 20usize),
            (10, 25, 3),  // round(2.5) = 3
            (10, 24, 2),  // round(2.4) = 2
            (7, 50, 4),   // round(3.5) = 4
            (5, 100, 5),
            (5, 0, 0),
            (0, 50, 0),
        ] {
            let flags = select_auto_pass(n, percent, &mut rng);
            assert_eq!(flags.len(), n);
            assert_eq!(
                flags.iter().filter(|&&f| f).count(),
                expected,
                "n={n} percent={percent}"
            );
        }
    }

    #[test]
    fn test_percent_clamped_to_100() {
        let mut rng = StdRng::seed_from_u64(1);
        let flags = select_auto_pass(4, 250, &mut rng);
        assert_eq!(flags.iter().filter(|&&f| f).count(), 4);
    }

    #[test]
    fn test_selection_varies_across_batch() {
        // With a 50% rate over many draws every index gets picked sometimes
        let mut rng = StdRng::seed_from_u64(42);
        let mut hits = vec![0usize; 8];
        for _ in 0..200 {
            let flags = select_auto_pass(8, 50, &mut rng);
            for (i, &f) in flags.iter().enumerate() {
                if f {
                    hits[i] += 1;
                }
            }
        }
        assert!(hits.iter().all(|&h| h > 0), "hits: {:?}", hits);
    }
}
