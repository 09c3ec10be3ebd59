use super::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

// -------------------- Count-Min --------------------

#[test]
fn cms_dimensions_follow_error_bounds() {
    let cms = CountMinSketch::with_seed(0.01, 0.01, 1);
    // ceil(e / 0.01) = 272, ceil(ln 100) = 5
    assert_eq!(cms.width(), 272);
    assert_eq!(cms.depth(), 5);
}

#[test]
fn cms_never_undercounts() {
    let mut cms = CountMinSketch::with_seed(0.01, 0.01, 9);
    let mut rng = StdRng::seed_from_u64(4);
    let mut truth = std::collections::HashMap::new();

    for _ in 0..5_000 {
        let k: u32 = rng.gen_range(0..300);
        cms.add(&k.to_le_bytes(), 1);
        *truth.entry(k).or_insert(0u64) += 1;
    }

    for (k, &count) in &truth {
        let est = cms.estimate(&k.to_le_bytes());
        assert!(est >= count, "key {} estimated {} < true {}", k, est, count);
        // epsilon * total = 50
        assert!(est <= count + 50, "key {} overestimated: {} vs {}", k, est, count);
    }
}

#[test]
fn cms_unknown_key_is_zero_when_empty() {
    let cms = CountMinSketch::with_seed(0.1, 0.1, 2);
    assert_eq!(cms.estimate(b"ghost"), 0);
}

#[test]
fn cms_roundtrip() {
    let mut cms = CountMinSketch::with_seed(0.05, 0.05, 3);
    cms.add(b"a", 3);
    cms.add(b"b", 7);
    let back = CountMinSketch::from_bytes(&cms.to_bytes()).unwrap();
    assert_eq!(back, cms);
    assert_eq!(back.estimate(b"b"), cms.estimate(b"b"));
}

#[test]
fn cms_rejects_trailing_bytes() {
    let mut bytes = CountMinSketch::with_seed(0.5, 0.5, 3).to_bytes();
    bytes.push(0);
    assert!(CountMinSketch::from_bytes(&bytes).is_err());
}

// -------------------- HyperLogLog --------------------

#[test]
fn hll_estimates_within_tolerance() {
    let mut hll = HyperLogLog::new(12);
    for i in 0..20_000u32 {
        hll.add(&i.to_le_bytes());
        // duplicates must not move the estimate
        hll.add(&i.to_le_bytes());
    }
    let est = hll.estimate();
    let err = (est - 20_000.0).abs() / 20_000.0;
    assert!(err < 0.06, "estimate {} too far from 20000", est);
}

#[test]
fn hll_small_range_uses_linear_counting() {
    let mut hll = HyperLogLog::new(10);
    for i in 0..50u32 {
        hll.add(&i.to_le_bytes());
    }
    let est = hll.estimate();
    assert!((est - 50.0).abs() < 5.0, "estimate {} too far from 50", est);
}

#[test]
fn hll_merge_unions_sets() {
    let mut a = HyperLogLog::new(10);
    let mut b = HyperLogLog::new(10);
    for i in 0..500u32 {
        a.add(&i.to_le_bytes());
    }
    for i in 250..750u32 {
        b.add(&i.to_le_bytes());
    }
    a.merge(&b).unwrap();
    let est = a.estimate();
    assert!((est - 750.0).abs() / 750.0 < 0.1, "merged estimate {}", est);

    assert!(a.merge(&HyperLogLog::new(11)).is_err());
}

#[test]
fn hll_roundtrip_and_validation() {
    let mut hll = HyperLogLog::new(4);
    hll.add(b"x");
    let bytes = hll.to_bytes();
    assert_eq!(bytes.len(), 17);
    assert_eq!(HyperLogLog::from_bytes(&bytes).unwrap(), hll);

    assert!(HyperLogLog::from_bytes(&bytes[..10]).is_err());
    assert!(HyperLogLog::from_bytes(&[]).is_err());
    assert!(HyperLogLog::from_bytes(&[3, 0, 0, 0, 0, 0, 0, 0, 0]).is_err());
}

#[test]
#[should_panic(expected = "precision must be in 4..=16")]
fn hll_rejects_bad_precision() {
    HyperLogLog::new(20);
}

// -------------------- SimHash --------------------

#[test]
fn simhash_identical_texts_match() {
    let a = SimHash::of_text("the quick brown fox");
    let b = SimHash::of_text("The Quick  brown FOX");
    assert_eq!(a, b);
    assert_eq!(a.distance(&b), 0);
}

#[test]
fn simhash_similar_texts_are_closer_than_unrelated() {
    let base = SimHash::of_text(
        "log structured merge trees buffer writes in memory and flush sorted runs to disk",
    );
    let near = SimHash::of_text(
        "log structured merge trees buffer writes in memory and flush sorted files to disk",
    );
    let far = SimHash::of_text("completely different sentence about cooking pasta with garlic");
    assert!(base.distance(&near) < base.distance(&far));
}

#[test]
fn simhash_roundtrip() {
    let s = SimHash::of_text("hello world");
    assert_eq!(SimHash::from_bytes(&s.to_bytes()).unwrap(), s);
    assert!(SimHash::from_bytes(&[1, 2, 3]).is_err());
}

#[test]
fn hamming_distance_counts_bits() {
    assert_eq!(hamming_distance(0, 0), 0);
    assert_eq!(hamming_distance(0b1011, 0b0001), 2);
    assert_eq!(hamming_distance(u64::MAX, 0), 64);
}
