use super::*;
use crate::Lookup;
use anyhow::Result;
use std::fs;
use tempfile::tempdir;

#[test]
fn reopen_replays_wal() -> Result<()> {
    let dir = tempdir()?;
    {
        let engine = open(dir.path())?;
        put_range(&engine, 0..3)?;
        engine.delete(&key(1))?;
        assert_eq!(engine.sstable_count(), 0);
    }

    let engine = open(dir.path())?;
    assert_eq!(engine.sstable_count(), 0);
    assert_eq!(engine.stats().active_entries, 3);
    assert_eq!(engine.get(&key(0))?.into_value(), Some(value(0)));
    assert_eq!(engine.get(&key(1))?, Lookup::Deleted);
    assert_eq!(engine.get(&key(2))?.into_value(), Some(value(2)));
    Ok(())
}

#[test]
fn reopen_loads_tables() -> Result<()> {
    let dir = tempdir()?;
    {
        let engine = open(dir.path())?;
        put_range(&engine, 0..10)?;
        engine.flush()?;
    }

    let engine = open(dir.path())?;
    assert_eq!(engine.sstable_count(), 3);
    assert_eq!(engine.stats().active_entries, 0);
    for i in 0..10 {
        assert_eq!(engine.get(&key(i))?.into_value(), Some(value(i)));
    }
    Ok(())
}

#[test]
fn replay_spanning_several_memtables_is_flushed() -> Result<()> {
    let dir = tempdir()?;
    {
        let engine = open(dir.path())?;
        // one sealed memtable plus two keys in the active one
        put_range(&engine, 0..6)?;
        assert_eq!(engine.stats().sealed_memtables, 1);
        assert_eq!(engine.sstable_count(), 0);
    }

    let engine = open(dir.path())?;
    let stats = engine.stats();
    assert_eq!(stats.sealed_memtables, 0);
    assert_eq!(stats.active_entries, 0);
    assert_eq!(engine.sstable_count(), 2);
    assert_eq!(wal_segments(dir.path())?, 1, "replayed segments are pruned");
    for i in 0..6 {
        assert_eq!(engine.get(&key(i))?.into_value(), Some(value(i)));
    }
    Ok(())
}

#[test]
fn replay_under_smaller_memtables() -> Result<()> {
    let dir = tempdir()?;
    {
        let engine = Engine::open(Config {
            max_memtable_size: 100,
            ..config(dir.path())
        })?;
        put_range(&engine, 0..30)?;
    }

    let engine = open(dir.path())?;
    assert!(engine.sstable_count() >= 7);
    for i in 0..30 {
        assert_eq!(engine.get(&key(i))?.into_value(), Some(value(i)));
    }
    Ok(())
}

#[test]
fn segment_limit_can_change_between_runs() -> Result<()> {
    let dir = tempdir()?;
    {
        let engine = Engine::open(Config {
            max_memtable_size: 64,
            wal_max_records_per_segment: 1000,
            ..config(dir.path())
        })?;
        put_range(&engine, 0..10)?;
        assert_eq!(engine.sstable_count(), 0);
    }

    let small = || Config {
        wal_max_records_per_segment: 2,
        ..config(dir.path())
    };
    {
        let engine = Engine::open(small())?;
        put_range(&engine, 10..21)?;
    }

    let engine = Engine::open(small())?;
    for i in 0..21 {
        assert_eq!(engine.get(&key(i))?.into_value(), Some(value(i)), "key {}", i);
    }
    Ok(())
}

#[test]
fn timestamps_resume_after_restart() -> Result<()> {
    let dir = tempdir()?;
    let before = {
        let engine = open(dir.path())?;
        engine.put(b"k", b"v")?
    };

    let engine = open(dir.path())?;
    let after = engine.put(b"k", b"v2")?;
    assert!(after > before);
    assert_eq!(engine.get(b"k")?.into_value(), Some(b"v2".to_vec()));
    Ok(())
}

#[test]
fn table_ids_continue_after_restart() -> Result<()> {
    let dir = tempdir()?;
    {
        let engine = open(dir.path())?;
        engine.put(b"a", b"1")?;
        engine.flush()?;
        engine.put(b"b", b"2")?;
        engine.flush()?;
    }

    let engine = open(dir.path())?;
    engine.put(b"c", b"3")?;
    engine.flush()?;
    assert_eq!(engine.tables_at_level(0), vec![3, 2, 1]);
    Ok(())
}

#[test]
fn tombstone_in_memtable_survives_restart() -> Result<()> {
    let dir = tempdir()?;
    {
        let engine = open(dir.path())?;
        engine.put(b"k", b"v")?;
        engine.flush()?;
        engine.delete(b"k")?;
    }

    let engine = open(dir.path())?;
    assert_eq!(engine.get(b"k")?, Lookup::Deleted);
    Ok(())
}

#[test]
fn unfinished_writes_are_removed() -> Result<()> {
    let dir = tempdir()?;
    {
        let engine = open(dir.path())?;
        engine.put(b"a", b"1")?;
        engine.flush()?;
    }
    let sst_dir = dir.path().join("sstables");
    let tmp_dir = sst_dir.join("sstable_0000000009.tmp");
    fs::create_dir(&tmp_dir)?;
    fs::write(tmp_dir.join("Data.db"), b"partial")?;
    let tmp_file = sst_dir.join("sstable_0000000010.db.tmp");
    fs::write(&tmp_file, b"partial")?;

    let engine = open(dir.path())?;
    assert!(!tmp_dir.exists());
    assert!(!tmp_file.exists());
    assert_eq!(engine.sstable_count(), 1);
    assert_eq!(engine.get(b"a")?.into_value(), Some(b"1".to_vec()));
    Ok(())
}

#[test]
fn idle_restarts_do_not_pile_up_segments() -> Result<()> {
    let dir = tempdir()?;
    for _ in 0..4 {
        open(dir.path())?;
    }
    assert_eq!(wal_segments(dir.path())?, 1);
    Ok(())
}

#[test]
fn invalid_config_is_rejected() -> Result<()> {
    let dir = tempdir()?;
    let err = Engine::open(Config {
        num_memtables: 0,
        ..config(dir.path())
    })
    .unwrap_err();
    assert_eq!(
        err.downcast_ref::<config::ConfigError>(),
        Some(&config::ConfigError::Zero("num_memtables"))
    );
    Ok(())
}
