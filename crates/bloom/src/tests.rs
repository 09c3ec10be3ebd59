use super::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::io::Cursor;

// -------------------- Construction --------------------

#[test]
fn sizing_follows_optimal_formulas() {
    let bf = BloomFilter::with_seed(1000, 0.01, 7);
    // m = ceil(1000 * ln(100) / ln(2)^2) = 9586, k = ceil(9.586 * ln 2) = 7
    assert_eq!(bf.num_bits(), 9586);
    assert_eq!(bf.num_hashes(), 7);
    assert_eq!(bf.bits.len(), 9586usize.div_ceil(8));
}

#[test]
fn seeds_are_distinct_and_reproducible() {
    let a = BloomFilter::with_seed(100, 0.01, 99);
    let b = BloomFilter::with_seed(100, 0.01, 99);
    assert_eq!(a.seeds, b.seeds);

    let mut sorted = a.seeds.clone();
    sorted.sort_unstable();
    sorted.dedup();
    assert_eq!(sorted.len(), a.seeds.len(), "every hash function needs its own seed");

    let c = BloomFilter::with_seed(100, 0.01, 100);
    assert_ne!(a.seeds, c.seeds);
}

#[test]
fn seeded_hash_family_members_differ() {
    assert_eq!(seeded_hash(1, b"key"), seeded_hash(1, b"key"));
    assert_ne!(seeded_hash(1, b"key"), seeded_hash(2, b"key"));

    let mut a = 5u64;
    let mut b = 5u64;
    assert_eq!(splitmix64(&mut a), splitmix64(&mut b));
    assert_ne!(splitmix64(&mut a), 0);
}

#[test]
#[should_panic(expected = "expected_items must be > 0")]
fn new_panics_on_zero_items() {
    BloomFilter::new(0, 0.01);
}

#[test]
#[should_panic(expected = "false_positive_rate must be in (0, 1)")]
fn new_panics_on_zero_fpr() {
    BloomFilter::new(100, 0.0);
}

#[test]
#[should_panic(expected = "false_positive_rate must be in (0, 1)")]
fn new_panics_on_one_fpr() {
    BloomFilter::new(100, 1.0);
}

// -------------------- Insert / Contains --------------------

#[test]
fn inserted_key_is_found() {
    let mut bf = BloomFilter::with_seed(100, 0.01, 1);
    bf.insert(b"hello");
    assert!(bf.may_contain(b"hello"));
}

#[test]
fn missing_key_is_not_found() {
    let bf = BloomFilter::with_seed(100, 0.01, 1);
    assert!(!bf.may_contain(b"hello"));
}

#[test]
fn no_false_negatives() {
    let mut bf = BloomFilter::with_seed(1000, 0.01, 3);
    for i in 0..1000u64 {
        bf.insert(&i.to_le_bytes());
    }
    for i in 0..1000u64 {
        assert!(bf.may_contain(&i.to_le_bytes()), "key {} should be found", i);
    }
}

#[test]
fn false_positive_rate_within_twice_target() {
    let n = 1000;
    let fpr = 0.01;
    let mut bf = BloomFilter::with_seed(n, fpr, 0xfeed);
    let mut rng = StdRng::seed_from_u64(11);

    for i in 0..n as u64 {
        bf.insert(format!("member-{}", i).as_bytes());
    }

    let trials = 10_000;
    let mut false_positives = 0;
    for _ in 0..trials {
        let sample: u64 = rng.gen();
        if bf.may_contain(format!("outsider-{}", sample).as_bytes()) {
            false_positives += 1;
        }
    }

    let actual = false_positives as f64 / trials as f64;
    assert!(
        actual <= fpr * 2.0,
        "FPR too high: {:.4} (target {:.4})",
        actual,
        fpr
    );
}

#[test]
fn empty_and_binary_keys() {
    let mut bf = BloomFilter::with_seed(10, 0.01, 5);
    let key = vec![0u8, 1, 2, 255, 254, 253];
    bf.insert(b"");
    bf.insert(&key);
    assert!(bf.may_contain(b""));
    assert!(bf.may_contain(&key));
}

// -------------------- Serialization --------------------

#[test]
fn serialized_layout_matches_format() {
    let mut bf = BloomFilter::with_seed(10, 0.1, 8);
    bf.insert(b"x");
    let buf = bf.to_bytes();
    assert_eq!(buf.len(), bf.serialized_size());

    let m = u32::from_le_bytes(buf[0..4].try_into().unwrap()) as usize;
    assert_eq!(m, bf.num_bits() as usize);
    assert!(buf[4..4 + m].iter().all(|&b| b == 0 || b == 1));
    let ones = buf[4..4 + m].iter().filter(|&&b| b == 1).count();
    assert!(ones >= 1 && ones <= bf.num_hashes() as usize);

    let k = u32::from_le_bytes(buf[4 + m..8 + m].try_into().unwrap());
    assert_eq!(k, bf.num_hashes());
    assert_eq!(buf.len(), 8 + m + k as usize * SEED_LEN);
}

#[test]
fn roundtrip_preserves_membership() {
    let mut bf = BloomFilter::with_seed(500, 0.01, 21);
    for i in 0..500u64 {
        bf.insert(&i.to_le_bytes());
    }

    let mut cursor = Cursor::new(bf.to_bytes());
    let bf2 = BloomFilter::read_from(&mut cursor).unwrap();

    assert_eq!(bf2, bf);
    for i in 0..500u64 {
        assert!(bf2.may_contain(&i.to_le_bytes()), "key {} missing after roundtrip", i);
    }
}

#[test]
fn deserialize_rejects_oversized_filter() {
    let mut buf = Vec::new();
    buf.extend_from_slice(&(MAX_BLOOM_BITS + 1).to_le_bytes());
    assert!(BloomFilter::from_bytes(&buf).is_err());
}

#[test]
fn deserialize_rejects_non_binary_bits() {
    let mut buf = Vec::new();
    buf.extend_from_slice(&8u32.to_le_bytes());
    buf.extend_from_slice(&[0, 1, 0, 2, 0, 0, 0, 0]);
    buf.extend_from_slice(&1u32.to_le_bytes());
    buf.extend_from_slice(&7u32.to_le_bytes());
    assert!(BloomFilter::from_bytes(&buf).is_err());
}

#[test]
fn deserialize_rejects_truncated_input() {
    let bf = BloomFilter::with_seed(50, 0.01, 2);
    let buf = bf.to_bytes();
    assert!(BloomFilter::from_bytes(&buf[..buf.len() - 1]).is_err());
}

// -------------------- Debug --------------------

#[test]
fn debug_impl_works() {
    let bf = BloomFilter::new(100, 0.01);
    let debug = format!("{:?}", bf);
    assert!(debug.contains("BloomFilter"));
    assert!(debug.contains("num_bits"));
    assert!(debug.contains("num_hashes"));
}

// -------------------- Edge cases --------------------

#[test]
fn very_low_fpr() {
    let bf = BloomFilter::new(100, 0.0001);
    assert!(bf.num_bits() > 1000);
    assert!(bf.num_hashes() > 5);
}

#[test]
fn high_fpr_still_works() {
    let mut bf = BloomFilter::new(100, 0.5);
    bf.insert(b"test");
    assert!(bf.may_contain(b"test"));
}
