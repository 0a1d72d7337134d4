//! Command-line interface definitions and argument parsing.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

/// Operator CLI for the baggage event processing platform.
#[derive(Parser)]
#[command(name = "bag-cli")]
#[command(about = "Operator CLI for the baggage event processing platform")]
#[command(version)]
pub struct Cli {
    /// Log level for the application.
    #[arg(long, default_value = "info")]
    #[arg(value_enum)]
    pub log_level: LogLevel,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Available log levels.
#[derive(Clone, ValueEnum)]
pub enum LogLevel {
    /// Trace level logging (most verbose).
    Trace,
    /// Debug level logging.
    Debug,
    /// Info level logging (default).
    Info,
    /// Warning level logging.
    Warn,
    /// Error level logging (least verbose).
    Error,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogLevel::Trace => write!(f, "trace"),
            LogLevel::Debug => write!(f, "debug"),
            LogLevel::Info => write!(f, "info"),
            LogLevel::Warn => write!(f, "warn"),
            LogLevel::Error => write!(f, "error"),
        }
    }
}

/// Top-level operator commands.
#[derive(Subcommand)]
pub enum Commands {
    /// Ingest newline-delimited JSON scan records from a file.
    Ingest {
        /// Path to a file containing one JSON scan record per line.
        #[arg(short, long)]
        file: PathBuf,
    },
    /// Run the processor pool against the configured backends until
    /// interrupted.
    Daemon {
        /// Number of Event Processor Workers to spawn.
        #[arg(short, long, default_value_t = 4)]
        workers: usize,
    },
    /// Read-only introspection queries.
    Query {
        #[command(subcommand)]
        command: QueryCommands,
    },
    /// Trigger an immediate reconciliation sweep instead of waiting for the
    /// background interval.
    Reconcile,
}

/// Introspection subcommands.
#[derive(Subcommand)]
pub enum QueryCommands {
    /// Ingest bus and reconciliation-debt snapshot (spec §6 `GET
    /// /events/stream/info`).
    StreamInfo,
    /// The authoritative relational record for a bag (spec §6 `GET
    /// /bag/{tag}`).
    Bag {
        /// 10-digit bag tag.
        tag: String,
    },
    /// The full scan journey for a bag (spec §6 `GET
    /// /graph/bags/{id}/journey`).
    Journey {
        /// 10-digit bag tag.
        tag: String,
    },
}
