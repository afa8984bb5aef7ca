//! `waverider` — build and query time-partitioned indexes from the command
//! line.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Instant;

use clap::{Parser, Subcommand};

use wave_engine::{Engine, EngineConfig};
use wave_ssql::ParseError;

#[derive(Parser)]
#[command(name = "waverider", about = "Semi-structured data index")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Build an index from UTF-8 encoded JSON files.
    Index {
        /// JSON batch files to index.
        #[arg(required = true)]
        files: Vec<PathBuf>,
        /// Index directory.
        #[arg(short, long, default_value = "data")]
        dir: PathBuf,
        /// JSON path to the timestamp field, for example '/timestamp'.
        #[arg(short, long)]
        timestamp: String,
        /// JSON paths to key fields queryable without a time range.
        #[arg(short, long)]
        keys: Vec<String>,
    },
    /// Execute an SSQL statement.
    Query {
        /// The SSQL statement.
        query: String,
        /// Index directory.
        #[arg(short, long, default_value = "data")]
        dir: PathBuf,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt().with_env_filter(
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
    )
    .init();

    match Cli::parse().command {
        Command::Index { files, dir, timestamp, keys } => {
            if timestamp.is_empty() {
                eprintln!("error: timestamp field must not be empty");
                return ExitCode::FAILURE;
            }
            let engine = match Engine::open(EngineConfig::new(dir), &timestamp, &keys) {
                Ok(engine) => engine,
                Err(e) => {
                    eprintln!("error: {e}");
                    return ExitCode::FAILURE;
                }
            };

            let mut failed = false;
            for file in files {
                let started = Instant::now();
                match engine.index_file(&file) {
                    Ok(wid) => println!(
                        "indexed {} as block {wid:016X} in {:?}",
                        file.display(),
                        started.elapsed()
                    ),
                    Err(e) => {
                        eprintln!("indexing {} failed: {e}", file.display());
                        failed = true;
                    }
                }
            }
            if failed {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            }
        }
        Command::Query { query, dir } => {
            let engine = match Engine::open(EngineConfig::new(dir), "/ts", &[]) {
                Ok(engine) => engine,
                Err(e) => {
                    eprintln!("error: {e}");
                    return ExitCode::FAILURE;
                }
            };
            engine.refresh_wal_index();

            match engine.query(&query) {
                Ok(out) => {
                    println!("{}", String::from_utf8_lossy(&out));
                    ExitCode::SUCCESS
                }
                Err(errors) => {
                    print_parse_errors(&query, &errors);
                    ExitCode::FAILURE
                }
            }
        }
    }
}

/// Prints each offending line with caret anchors under the error columns.
fn print_parse_errors(query: &str, errors: &[ParseError]) {
    for (number, line) in query.lines().enumerate() {
        let on_line: Vec<&ParseError> = errors.iter().filter(|e| e.line == number + 1).collect();
        eprintln!("{line}");
        if on_line.is_empty() {
            continue;
        }
        let mut anchor = vec![b' '; line.len()];
        for e in &on_line {
            if e.column >= 1 && e.column <= anchor.len() {
                anchor[e.column - 1] = b'^';
            }
        }
        eprintln!("{}", String::from_utf8_lossy(&anchor));
    }
    for e in errors {
        eprintln!("{e}");
    }
}
