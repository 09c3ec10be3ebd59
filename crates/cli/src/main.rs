//! # CLI - StrataKV Interactive Shell
//!
//! A line-oriented shell over the storage engine. Reads commands from stdin,
//! runs them, and prints results to stdout; logs go to stderr. Works the
//! same interactively or with commands piped in.
//!
//! ## Commands
//!
//! ```text
//! PUT key value      Insert or update a key (value may contain spaces)
//! GET key            Print the value, "(nil)" or "(deleted)"
//! DELETE key         Write a tombstone for the key
//! SCAN [min] [max]   Live pairs with min <= key <= max
//! FLUSH              Write all memtables to SSTables
//! COMPACT            Run size-tiered compaction
//! VALIDATE           Check every SSTable against its Merkle tree
//! STATS              Print engine counters
//! HELP               List commands
//! EXIT / QUIT        Leave the shell
//! ```
//!
//! Keys starting with `__` are reserved for internal structures and are
//! refused. Configuration comes from `STRATA_*` environment variables (see
//! the `config` crate); `RUST_LOG` controls log verbosity.

mod commands;

use anyhow::Result;
use config::Config;
use engine::Engine;
use std::io::{self, BufRead, Write};
use tracing::info;
use tracing_subscriber::EnvFilter;

use commands::{Command, Flow};

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .init();

    let config = Config::from_env()?;
    let engine = Engine::open(config)?;
    info!(?engine, "engine ready");

    let stdout = io::stdout();
    let mut out = stdout.lock();
    writeln!(out, "StrataKV ready. Type HELP for commands.")?;
    write!(out, "> ")?;
    out.flush()?;

    for line in io::stdin().lock().lines() {
        let line = line?;
        if !line.trim().is_empty() {
            let flow = match Command::parse(&line) {
                Ok(cmd) => cmd.run(&engine, &mut out)?,
                Err(usage) => {
                    writeln!(out, "ERR {}", usage)?;
                    Flow::Continue
                }
            };
            if flow == Flow::Exit {
                break;
            }
        }
        write!(out, "> ")?;
        out.flush()?;
    }
    // let a merge started by the last flush finish before exiting
    engine.wait_for_compaction();
    Ok(())
}
