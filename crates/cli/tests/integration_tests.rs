/// End-to-end tests that drive the shell binary through stdin.
use std::fs;
use std::path::Path;
use tempfile::tempdir;

/// Runs `commands` (plus a trailing EXIT) against a shell rooted at `data_dir`
/// and returns its stdout.
fn run_cli(data_dir: &Path, commands: &str) -> String {
    use std::io::Write;
    use std::process::{Command, Stdio};

    let mut child = Command::new(env!("CARGO_BIN_EXE_cli"))
        .env("STRATA_DATA_DIR", data_dir)
        .env("STRATA_MAX_MEMTABLE_SIZE", "4")
        .env("STRATA_NUM_MEMTABLES", "2")
        .env("STRATA_MAX_TABLES_PER_LEVEL", "2")
        .env("STRATA_BLOCK_SIZE", "256")
        .env("STRATA_WAL_MAX_RECORDS", "8")
        .env("STRATA_SEED", "7")
        .env("RUST_LOG", "warn")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("failed to spawn cli");

    {
        let stdin = child.stdin.as_mut().expect("failed to open stdin");
        stdin
            .write_all(commands.as_bytes())
            .expect("failed to write commands");
        stdin.write_all(b"EXIT\n").expect("failed to write EXIT");
    }

    let output = child.wait_with_output().expect("failed to read output");
    assert!(output.status.success(), "cli exited with {}", output.status);
    String::from_utf8_lossy(&output.stdout).to_string()
}

fn table_entries(data_dir: &Path) -> usize {
    fs::read_dir(data_dir.join("sstables"))
        .map(|it| {
            it.filter_map(|e| e.ok())
                .filter(|e| e.file_name().to_string_lossy().starts_with("sstable_"))
                .count()
        })
        .unwrap_or(0)
}

#[test]
fn test_basic_put_get() {
    let dir = tempdir().unwrap();
    let output = run_cli(dir.path(), "PUT key1 value1\nGET key1\n");

    assert!(output.contains("OK"));
    assert!(output.contains("value1"));
}

#[test]
fn test_overwrite_and_delete() {
    let dir = tempdir().unwrap();
    let output = run_cli(
        dir.path(),
        "PUT k old\nGET k\nPUT k new\nGET k\nDELETE k\nGET k\nGET never\n",
    );

    assert!(output.contains("old"));
    assert!(output.contains("new"));
    assert!(output.contains("(deleted)"));
    assert!(output.contains("(nil)"));
}

#[test]
fn test_range_scan() {
    let dir = tempdir().unwrap();
    let output = run_cli(
        dir.path(),
        "PUT a 1\nPUT b 2\nPUT c 3\nPUT d 4\nDELETE c\nSCAN b d\n",
    );

    assert!(output.contains("b -> 2"));
    assert!(output.contains("d -> 4"));
    assert!(!output.contains("a -> 1"));
    assert!(!output.contains("c -> 3"));
    assert!(output.contains("(2 entries)"));
}

#[test]
fn test_flush_creates_sstables() {
    let dir = tempdir().unwrap();
    let output = run_cli(dir.path(), "PUT a 1\nPUT b 2\nFLUSH\nGET a\n");

    assert!(output.contains("OK (1 sstables)"));
    assert!(output.contains('1'));
    assert_eq!(table_entries(dir.path()), 1);
}

#[test]
fn test_memtable_rollover_and_compaction() {
    let dir = tempdir().unwrap();
    let mut commands = String::new();
    for i in 0..40 {
        commands.push_str(&format!("PUT key{:03} value{}\n", i, i));
    }
    commands.push_str("FLUSH\nCOMPACT\nGET key000\nGET key039\nSTATS\n");
    let output = run_cli(dir.path(), &commands);

    assert!(output.contains("value0\n"));
    assert!(output.contains("value39\n"));
    // the per-level limit of 2 keeps the table count small
    assert!(table_entries(dir.path()) <= 6);
}

#[test]
fn test_persistence_across_restarts() {
    let dir = tempdir().unwrap();
    run_cli(dir.path(), "PUT durable yes\nPUT gone soon\nDELETE gone\n");

    let output = run_cli(dir.path(), "GET durable\nGET gone\n");
    assert!(output.contains("yes"));
    assert!(output.contains("(deleted)"));
}

#[test]
fn test_internal_keys_refused() {
    let dir = tempdir().unwrap();
    let output = run_cli(dir.path(), "PUT __bf__x 1\nGET __bf__x\n");

    assert!(output.contains("reserved"));
    assert!(!output.contains("OK"));
}

#[test]
fn test_errors_do_not_stop_the_shell() {
    let dir = tempdir().unwrap();
    let output = run_cli(dir.path(), "FROB\nPUT onlykey\nPUT k v\nGET k\n");

    assert!(output.contains("unknown command"));
    assert!(output.contains("usage: PUT key value"));
    assert!(output.contains("\nOK") || output.contains("> OK"));
    assert!(output.contains("> v\n"));
    assert!(output.contains("bye"));
}

#[test]
fn test_validate_detects_corruption() {
    let dir = tempdir().unwrap();
    let output = run_cli(dir.path(), "PUT a 1\nPUT b 2\nFLUSH\nVALIDATE\n");
    assert!(output.contains("OK (1 tables, 0 corrupt)"));

    let data = dir
        .path()
        .join("sstables")
        .join("sstable_0000000001")
        .join("Data.db");
    let mut bytes = fs::read(&data).unwrap();
    let last = bytes.len() - 1;
    bytes[last] ^= 0xFF;
    fs::write(&data, bytes).unwrap();

    let output = run_cli(dir.path(), "VALIDATE\nGET b\nGET a\n");
    assert!(output.contains("CORRUPT"));
    assert!(output.contains("1 corrupt"));
    assert!(output.contains("ERR read failed"));
    assert!(output.contains("> 1\n"));
}

#[test]
fn test_help_lists_commands() {
    let dir = tempdir().unwrap();
    let output = run_cli(dir.path(), "HELP\n");
    for cmd in ["PUT", "GET", "DELETE", "SCAN", "FLUSH", "COMPACT", "VALIDATE"] {
        assert!(output.contains(cmd), "help should mention {}", cmd);
    }
}
