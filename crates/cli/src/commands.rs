//! Command parsing and execution for the shell.

use anyhow::Result;
use engine::{Engine, Lookup, INTERNAL_PREFIX};
use std::io::Write;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Put { key: String, value: String },
    Get { key: String },
    Delete { key: String },
    Scan { min: String, max: Option<String> },
    Flush,
    Compact,
    Validate,
    Stats,
    Help,
    Exit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Exit,
}

pub const HELP: &str = "\
PUT key value | GET key | DELETE key | SCAN [min] [max]
FLUSH | COMPACT | VALIDATE | STATS | HELP | EXIT";

impl Command {
    /// Parses one input line. The error is a usage message.
    pub fn parse(line: &str) -> Result<Self, String> {
        let mut parts = line.split_whitespace();
        let Some(word) = parts.next() else {
            return Err("empty command".into());
        };
        let mut key = |usage: &str| -> Result<String, String> {
            let key = parts.next().ok_or_else(|| format!("usage: {}", usage))?;
            if key.starts_with(INTERNAL_PREFIX) {
                return Err(format!("keys starting with {} are reserved", INTERNAL_PREFIX));
            }
            Ok(key.to_string())
        };

        let cmd = match word.to_uppercase().as_str() {
            "PUT" | "SET" => {
                let key = key("PUT key value")?;
                let value = parts.collect::<Vec<_>>().join(" ");
                if value.is_empty() {
                    return Err("usage: PUT key value".into());
                }
                Command::Put { key, value }
            }
            "GET" => Command::Get {
                key: key("GET key")?,
            },
            "DELETE" | "DEL" => Command::Delete {
                key: key("DELETE key")?,
            },
            "SCAN" => Command::Scan {
                min: parts.next().unwrap_or("").to_string(),
                max: parts.next().map(str::to_string),
            },
            "FLUSH" => Command::Flush,
            "COMPACT" => Command::Compact,
            "VALIDATE" => Command::Validate,
            "STATS" => Command::Stats,
            "HELP" => Command::Help,
            "EXIT" | "QUIT" => Command::Exit,
            other => return Err(format!("unknown command: {}", other)),
        };
        Ok(cmd)
    }

    /// Runs the command, printing its result to `out`.
    ///
    /// Engine failures are printed and the shell goes on; only a failed
    /// write to `out` is returned as an error.
    pub fn run<W: Write>(self, engine: &Engine, out: &mut W) -> Result<Flow> {
        match self {
            Command::Put { key, value } => match engine.put(key.as_bytes(), value.as_bytes()) {
                Ok(_) => writeln!(out, "OK")?,
                Err(e) => writeln!(out, "ERR put failed: {:#}", e)?,
            },
            Command::Get { key } => match engine.get(key.as_bytes()) {
                Ok(Lookup::Found(v)) => writeln!(out, "{}", String::from_utf8_lossy(&v))?,
                Ok(Lookup::Deleted) => writeln!(out, "(deleted)")?,
                Ok(Lookup::Missing) => writeln!(out, "(nil)")?,
                Err(e) => writeln!(out, "ERR read failed: {:#}", e)?,
            },
            Command::Delete { key } => match engine.delete(key.as_bytes()) {
                Ok(_) => writeln!(out, "OK")?,
                Err(e) => writeln!(out, "ERR delete failed: {:#}", e)?,
            },
            Command::Scan { min, max } => {
                match engine.scan(min.as_bytes(), max.as_deref().map(str::as_bytes)) {
                    Ok(pairs) => {
                        let visible: Vec<_> = pairs
                            .iter()
                            .filter(|(k, _)| !k.starts_with(INTERNAL_PREFIX.as_bytes()))
                            .collect();
                        if visible.is_empty() {
                            writeln!(out, "(empty)")?;
                        } else {
                            for (k, v) in &visible {
                                writeln!(
                                    out,
                                    "{} -> {}",
                                    String::from_utf8_lossy(k),
                                    String::from_utf8_lossy(v)
                                )?;
                            }
                            writeln!(out, "({} entries)", visible.len())?;
                        }
                    }
                    Err(e) => writeln!(out, "ERR scan failed: {:#}", e)?,
                }
            }
            Command::Flush => match engine.flush() {
                Ok(()) => writeln!(out, "OK ({} sstables)", engine.sstable_count())?,
                Err(e) => writeln!(out, "ERR flush failed: {:#}", e)?,
            },
            Command::Compact => match engine.compact() {
                Ok(n) => writeln!(out, "OK ({} levels merged)", n)?,
                Err(e) => writeln!(out, "ERR compact failed: {:#}", e)?,
            },
            Command::Validate => match engine.validate() {
                Ok(reports) => {
                    let mut bad = 0;
                    for r in &reports {
                        if !r.validation.is_ok() {
                            bad += 1;
                            writeln!(
                                out,
                                "CORRUPT {} chunks {:?}",
                                r.path.display(),
                                r.validation.corrupted_chunks
                            )?;
                        }
                    }
                    writeln!(out, "OK ({} tables, {} corrupt)", reports.len(), bad)?;
                }
                Err(e) => writeln!(out, "ERR validate failed: {:#}", e)?,
            },
            Command::Stats => {
                let s = engine.stats();
                writeln!(
                    out,
                    "active={} sealed={} levels={:?} wal_segment={} cached_blocks={} cached_lookups={}",
                    s.active_entries,
                    s.sealed_memtables,
                    s.levels,
                    s.wal_segment,
                    s.cached_blocks,
                    s.cached_lookups
                )?;
            }
            Command::Help => writeln!(out, "{}", HELP)?,
            Command::Exit => {
                writeln!(out, "bye")?;
                return Ok(Flow::Exit);
            }
        }
        Ok(Flow::Continue)
    }
}
