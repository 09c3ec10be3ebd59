use super::*;
use crate::{Lookup, MAX_KEY_SIZE, MAX_VALUE_SIZE};
use anyhow::Result;
use memtable::MemtableKind;
use tempfile::tempdir;

// --------------------- Basic put / get / delete ---------------------

#[test]
fn put_and_get() -> Result<()> {
    let dir = tempdir()?;
    let engine = open(dir.path())?;

    engine.put(b"name", b"alice")?;
    assert_eq!(engine.get(b"name")?, Lookup::Found(b"alice".to_vec()));
    Ok(())
}

#[test]
fn get_missing_key() -> Result<()> {
    let dir = tempdir()?;
    let engine = open(dir.path())?;

    assert_eq!(engine.get(b"nope")?, Lookup::Missing);
    Ok(())
}

#[test]
fn delete_leaves_tombstone() -> Result<()> {
    let dir = tempdir()?;
    let engine = open(dir.path())?;

    engine.put(b"k", b"v")?;
    engine.delete(b"k")?;
    assert_eq!(engine.get(b"k")?, Lookup::Deleted);

    // a key that never existed still gets a tombstone
    engine.delete(b"ghost")?;
    assert_eq!(engine.get(b"ghost")?, Lookup::Deleted);
    Ok(())
}

#[test]
fn overwrite_key() -> Result<()> {
    let dir = tempdir()?;
    let engine = open(dir.path())?;

    engine.put(b"k", b"v1")?;
    engine.put(b"k", b"v2")?;
    assert_eq!(engine.get(b"k")?.into_value(), Some(b"v2".to_vec()));
    Ok(())
}

#[test]
fn put_after_delete_resurrects() -> Result<()> {
    let dir = tempdir()?;
    let engine = open(dir.path())?;

    engine.put(b"k", b"v1")?;
    engine.delete(b"k")?;
    engine.put(b"k", b"v2")?;
    assert_eq!(engine.get(b"k")?, Lookup::Found(b"v2".to_vec()));
    Ok(())
}

#[test]
fn timestamps_strictly_increase() -> Result<()> {
    let dir = tempdir()?;
    let engine = open(dir.path())?;

    let mut last = engine.put(b"a", b"1")?;
    for i in 0..20 {
        let ts = if i % 3 == 0 {
            engine.delete(b"a")?
        } else {
            engine.put(b"a", b"x")?
        };
        assert!(ts > last);
        last = ts;
    }
    Ok(())
}

// --------------------- Validation ---------------------

#[test]
fn empty_key_rejected() -> Result<()> {
    let dir = tempdir()?;
    let engine = open(dir.path())?;

    assert!(engine.put(b"", b"v").is_err());
    assert!(engine.delete(b"").is_err());
    Ok(())
}

#[test]
fn oversized_key_rejected() -> Result<()> {
    let dir = tempdir()?;
    let engine = open(dir.path())?;

    let big = vec![b'k'; MAX_KEY_SIZE + 1];
    let err = engine.put(&big, b"v").unwrap_err();
    assert!(err.to_string().contains("key too large"));
    Ok(())
}

#[test]
fn oversized_value_rejected() -> Result<()> {
    let dir = tempdir()?;
    let engine = open(dir.path())?;

    let big = vec![0u8; MAX_VALUE_SIZE + 1];
    let err = engine.put(b"k", &big).unwrap_err();
    assert!(err.to_string().contains("value too large"));
    assert_eq!(engine.get(b"k")?, Lookup::Missing);
    Ok(())
}

// --------------------- Sealing and flushing ---------------------

#[test]
fn full_memtable_is_sealed_not_flushed() -> Result<()> {
    let dir = tempdir()?;
    let engine = open(dir.path())?;

    put_range(&engine, 0..5)?;
    let stats = engine.stats();
    assert_eq!(stats.sealed_memtables, 1);
    assert_eq!(stats.active_entries, 1);
    assert_eq!(engine.sstable_count(), 0);
    Ok(())
}

#[test]
fn overwriting_in_full_memtable_does_not_seal() -> Result<()> {
    let dir = tempdir()?;
    let engine = open(dir.path())?;

    put_range(&engine, 0..4)?;
    engine.put(&key(2), b"again")?;
    engine.delete(&key(3))?;
    let stats = engine.stats();
    assert_eq!(stats.sealed_memtables, 0);
    assert_eq!(stats.active_entries, 4);
    Ok(())
}

#[test]
fn too_many_sealed_memtables_flushes_oldest() -> Result<()> {
    let dir = tempdir()?;
    let engine = open(dir.path())?;

    // keys 0..4 sealed at key 4, keys 4..8 sealed at key 8, which makes
    // two sealed memtables and flushes the first
    put_range(&engine, 0..9)?;
    let stats = engine.stats();
    assert_eq!(stats.sealed_memtables, 1);
    assert_eq!(stats.active_entries, 1);
    assert_eq!(engine.tables_at_level(0), vec![1]);
    assert_eq!(table_files(dir.path())?, 1);

    // segment 1 held only the flushed memtable
    assert_eq!(wal_segments(dir.path())?, 2);

    for i in 0..9 {
        assert_eq!(engine.get(&key(i))?.into_value(), Some(value(i)));
    }
    Ok(())
}

#[test]
fn flush_writes_everything_and_prunes_wal() -> Result<()> {
    let dir = tempdir()?;
    let engine = open(dir.path())?;

    put_range(&engine, 0..9)?;
    engine.flush()?;

    let stats = engine.stats();
    assert_eq!(stats.active_entries, 0);
    assert_eq!(stats.sealed_memtables, 0);
    assert_eq!(engine.sstable_count(), 3);
    assert_eq!(wal_segments(dir.path())?, 1, "only the fresh segment remains");

    for i in 0..9 {
        assert_eq!(engine.get(&key(i))?.into_value(), Some(value(i)));
    }
    Ok(())
}

#[test]
fn flush_on_empty_engine_is_noop() -> Result<()> {
    let dir = tempdir()?;
    let engine = open(dir.path())?;

    engine.flush()?;
    engine.flush()?;
    assert_eq!(engine.sstable_count(), 0);
    assert_eq!(table_files(dir.path())?, 0);
    Ok(())
}

#[test]
fn memtable_shadows_flushed_value() -> Result<()> {
    let dir = tempdir()?;
    let engine = open(dir.path())?;

    engine.put(b"k", b"old")?;
    engine.flush()?;
    assert_eq!(engine.get(b"k")?, Lookup::Found(b"old".to_vec()));

    engine.put(b"k", b"new")?;
    assert_eq!(engine.get(b"k")?, Lookup::Found(b"new".to_vec()));

    engine.delete(b"k")?;
    assert_eq!(engine.get(b"k")?, Lookup::Deleted);

    engine.flush()?;
    assert_eq!(engine.get(b"k")?, Lookup::Deleted);
    Ok(())
}

#[test]
fn newer_table_shadows_older_table() -> Result<()> {
    let dir = tempdir()?;
    let engine = open(dir.path())?;

    engine.put(b"k", b"v1")?;
    engine.flush()?;
    engine.put(b"k", b"v2")?;
    engine.flush()?;
    assert_eq!(engine.tables_at_level(0), vec![2, 1]);
    assert_eq!(engine.get(b"k")?, Lookup::Found(b"v2".to_vec()));
    Ok(())
}

#[test]
fn every_backend_behaves_the_same() -> Result<()> {
    for kind in [MemtableKind::HashMap, MemtableKind::SkipList, MemtableKind::BTree] {
        let dir = tempdir()?;
        let engine = Engine::open(Config {
            memtable_struct: kind,
            ..config(dir.path())
        })?;

        put_range(&engine, 0..30)?;
        for i in (0..30).step_by(3) {
            engine.delete(&key(i))?;
        }
        engine.put(&key(3), b"back")?;

        for i in 0..30 {
            let expected = match i {
                3 => Lookup::Found(b"back".to_vec()),
                i if i % 3 == 0 => Lookup::Deleted,
                i => Lookup::Found(value(i)),
            };
            assert_eq!(engine.get(&key(i))?, expected, "{} key {}", kind, i);
        }
    }
    Ok(())
}

#[test]
fn single_file_layout() -> Result<()> {
    let dir = tempdir()?;
    let engine = Engine::open(Config {
        sstable_single_file: true,
        ..config(dir.path())
    })?;

    put_range(&engine, 0..10)?;
    engine.flush()?;
    assert!(dir.path().join("sstables").join("sstable_0000000001.db").is_file());
    for i in 0..10 {
        assert_eq!(engine.get(&key(i))?.into_value(), Some(value(i)));
    }
    Ok(())
}

#[test]
fn concurrent_writers() -> Result<()> {
    let dir = tempdir()?;
    let engine = open(dir.path())?;

    let handles: Vec<_> = (0..4)
        .map(|t| {
            let engine = engine.clone();
            std::thread::spawn(move || -> Result<()> {
                for i in 0..25 {
                    engine.put(&key(t * 100 + i), &value(i))?;
                }
                Ok(())
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("writer thread panicked")?;
    }

    for t in 0..4 {
        for i in 0..25 {
            assert_eq!(engine.get(&key(t * 100 + i))?.into_value(), Some(value(i)));
        }
    }
    Ok(())
}
