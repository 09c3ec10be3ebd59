use super::*;

fn data(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

// -------------------- Build --------------------

#[test]
fn empty_data_has_zero_root() {
    let t = MerkleTree::build(&[], 16);
    assert_eq!(t.root(), ZERO_HASH);
    assert_eq!(t.height(), 1);
}

#[test]
fn single_chunk_root_is_leaf_hash() {
    let t = MerkleTree::build(b"hello", 16);
    assert_eq!(t.root(), *blake3::hash(b"hello").as_bytes());
    assert_eq!(t.leaf_count(), 1);
    assert_eq!(t.height(), 1);
}

#[test]
fn odd_leaf_count_is_padded() {
    // 3 chunks -> padded to 4 leaves, 2 parents, 1 root
    let t = MerkleTree::build(&data(40), 16);
    assert_eq!(t.leaf_count(), 4);
    assert_eq!(t.leaves()[3], ZERO_HASH);
    assert_eq!(t.height(), 3);

    let l = t.leaves();
    let expected = hash_pair(&hash_pair(&l[0], &l[1]), &hash_pair(&l[2], &ZERO_HASH));
    assert_eq!(t.root(), expected);
}

#[test]
fn odd_inner_levels_are_padded() {
    // 5 chunks -> 6 leaves -> 3 parents padded to 4 -> 2 -> 1
    let t = MerkleTree::build(&data(5 * 8), 8);
    assert_eq!(t.leaf_count(), 6);
    assert_eq!(t.levels[1].len(), 4);
    assert_eq!(t.levels[1][3], ZERO_HASH);
    assert_eq!(t.height(), 4);
}

#[test]
fn build_is_deterministic() {
    let a = MerkleTree::build(&data(1000), 64);
    let b = MerkleTree::build(&data(1000), 64);
    assert_eq!(a, b);
}

// -------------------- Serialization --------------------

#[test]
fn serialize_prefixes_each_node_with_depth() {
    let t = MerkleTree::build(&data(40), 16);
    let bytes = t.serialize();
    // 1 root + 2 parents + 4 leaves
    assert_eq!(bytes.len(), 7 * 33);
    let depths: Vec<u8> = bytes.chunks(33).map(|n| n[0]).collect();
    assert_eq!(depths, vec![0, 1, 1, 2, 2, 2, 2]);
    assert_eq!(&bytes[1..33], &t.root());
}

#[test]
fn serialize_roundtrip() {
    let t = MerkleTree::build(&data(777), 32);
    let back = MerkleTree::deserialize(&t.serialize()).unwrap();
    assert_eq!(back, t);
}

#[test]
fn roundtrip_every_chunk_count() {
    for chunks in 1..=17usize {
        let t = MerkleTree::build(&data(chunks * 8), 8);
        let back = MerkleTree::deserialize(&t.serialize())
            .unwrap_or_else(|e| panic!("{} chunks: {}", chunks, e));
        assert_eq!(back, t, "{} chunks", chunks);
        assert_eq!(back.root(), t.root());
    }
}

#[test]
fn roundtrip_through_padded_inner_level() {
    // 6 chunks: widths 6 -> 4 (padded) -> 2 -> 1
    let t = MerkleTree::build(&data(6 * 8), 8);
    assert_eq!(t.levels[1].len(), 4);
    assert_eq!(t.levels[1][3], ZERO_HASH);
    let back = MerkleTree::deserialize(&t.serialize()).unwrap();
    assert_eq!(back.levels[0].len(), 6);
    assert_eq!(back, t);
}

#[test]
fn deserialize_rejects_short_level_under_unpadded_parent() {
    // 8 chunks: widths 8 -> 4 -> 2 -> 1; no padding anywhere
    let mut bytes = MerkleTree::build(&data(8 * 8), 8).serialize();
    bytes.truncate(bytes.len() - 2 * 33);
    assert!(matches!(
        MerkleTree::deserialize(&bytes),
        Err(MerkleError::BadLevelWidth { depth: 3, expected: 8, found: 6 })
    ));
}

#[test]
fn deserialize_rejects_truncated_input() {
    let bytes = MerkleTree::build(&data(100), 16).serialize();
    assert_eq!(
        MerkleTree::deserialize(&bytes[..bytes.len() - 5]),
        Err(MerkleError::Truncated(28))
    );
    assert_eq!(MerkleTree::deserialize(&[]), Err(MerkleError::Empty));
}

#[test]
fn deserialize_rejects_wrong_level_width() {
    let mut bytes = MerkleTree::build(&data(40), 16).serialize();
    // drop one leaf node
    bytes.truncate(bytes.len() - 33);
    assert!(matches!(
        MerkleTree::deserialize(&bytes),
        Err(MerkleError::BadLevelWidth { depth: 2, expected: 4, found: 3 })
    ));
}

#[test]
fn deserialize_rejects_depth_gap() {
    let mut bytes = MerkleTree::build(&data(40), 16).serialize();
    bytes[33] = 2;
    assert!(matches!(
        MerkleTree::deserialize(&bytes),
        Err(MerkleError::DepthOutOfOrder { .. })
    ));
}

// -------------------- Compare --------------------

#[test]
fn identical_trees_have_no_divergence() {
    let a = MerkleTree::build(&data(500), 50);
    let b = MerkleTree::build(&data(500), 50);
    assert!(MerkleTree::compare(&a, &b).is_empty());
}

#[test]
fn single_byte_flip_is_localized() {
    let original = data(1000);
    let a = MerkleTree::build(&original, 64);

    for pos in [0usize, 63, 64, 500, 999] {
        let mut corrupted = original.clone();
        corrupted[pos] ^= 0xff;
        let b = MerkleTree::build(&corrupted, 64);
        assert_ne!(a.root(), b.root());
        assert_eq!(MerkleTree::compare(&a, &b), vec![pos / 64], "flip at {}", pos);
    }
}

#[test]
fn multiple_corrupted_chunks_are_all_reported() {
    let original = data(16 * 16);
    let mut corrupted = original.clone();
    corrupted[3] ^= 1;
    corrupted[16 * 9 + 2] ^= 1;
    corrupted[16 * 15] ^= 1;

    let a = MerkleTree::build(&original, 16);
    let b = MerkleTree::build(&corrupted, 16);
    assert_eq!(MerkleTree::compare(&a, &b), vec![0, 9, 15]);
}

#[test]
fn differently_shaped_trees_report_every_leaf() {
    let a = MerkleTree::build(&data(64), 16);
    let b = MerkleTree::build(&data(96), 16);
    assert_eq!(MerkleTree::compare(&a, &b), (0..6).collect::<Vec<_>>());
}
