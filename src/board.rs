use log::{debug, info, warn};

use credit_ledger::*;
use snafu::{prelude::*, Snafu};

use std::fs;
use std::path::Path;

use serde::Deserialize;
use serde_json::Value as JSValue;

pub mod config_reader;
pub mod io_json;
pub mod io_sqlite;
pub mod session;
pub mod store;
pub mod summary;

use crate::board::store::StoreError;

#[derive(Debug, Snafu)]
pub enum BoardError {
    #[snafu(display("Error opening file {path}"))]
    OpeningFile {
        source: std::io::Error,
        path: String,
    },
    #[snafu(display("Error writing file {path}"))]
    WritingFile {
        source: std::io::Error,
        path: String,
    },
    #[snafu(display("Error parsing JSON file {path}: {source}"))]
    ParsingJson {
        source: serde_json::Error,
        path: String,
    },
    #[snafu(display("Error serializing JSON: {source}"))]
    SerializingJson { source: serde_json::Error },
    #[snafu(display("Invalid number in configuration: {value}"))]
    ParsingJsonNumber { value: String },

    #[snafu(context(false), display("{source}"))]
    Ledger { source: LedgerErrors },
    #[snafu(context(false), display("Store error: {source}"))]
    Store { source: StoreError },
    #[snafu(display(
        "{operation} stopped at {record}: {message} ({applied} applied, {skipped} skipped)"
    ))]
    PartialFailure {
        operation: String,
        record: String,
        message: String,
        applied: usize,
        skipped: usize,
    },
    #[snafu(display("Vote for {player} cancelled: the selected player changed"))]
    Cancelled { player: String },
    #[snafu(display("No player selected"))]
    NoSelection {},
    #[snafu(display("No player named {name:?}"))]
    UnknownPlayerName { name: String },
    #[snafu(display("No character named {name:?}"))]
    UnknownCharacterName { name: String },
    #[snafu(display("The name {name:?} is already taken"))]
    DuplicateName { name: String },
    #[snafu(display("Internal lock poisoned: {what}"))]
    LockPoisoned { what: String },

    #[snafu(whatever, display("{message}"))]
    Whatever {
        message: String,
        #[snafu(source(from(Box<dyn std::error::Error + Send + Sync>, Some)))]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

pub type BoardResult<T> = Result<T, BoardError>;

/// The single path by which failures leave the board: every failure is logged
/// here before being handed back to the caller.
pub fn report_failure(operation: &str, err: BoardError) -> BoardError {
    warn!("{} failed: {}", operation, err);
    err
}

/// Adds a context to the result of a board operation, logging the failures.
pub fn reported<T>(operation: &str, res: BoardResult<T>) -> BoardResult<T> {
    res.map_err(|e| report_failure(operation, e))
}

/// Writes a JSON value to a file, or to the standard output for `stdout`.
pub fn write_json(path: &str, js: &JSValue) -> BoardResult<()> {
    let pretty = serde_json::to_string_pretty(js).context(SerializingJsonSnafu {})?;
    if path == "stdout" {
        println!("{}", pretty);
        return Ok(());
    }
    info!("Writing summary to {:?}", path);
    fs::write(path, pretty).context(WritingFileSnafu {
        path: path.to_string(),
    })
}

/// Reads and parses a JSON document from disk.
pub fn read_json_file<T>(path: &Path) -> BoardResult<T>
where
    T: for<'de> Deserialize<'de>,
{
    let display = path.display().to_string();
    let contents = fs::read_to_string(path).context(OpeningFileSnafu {
        path: display.clone(),
    })?;
    debug!("read_json_file: {} bytes from {}", contents.len(), display);
    serde_json::from_str(contents.as_str()).context(ParsingJsonSnafu { path: display })
}
