//! File primitives behind the persistent in-process stores.
//!
//! Ledgers that only grow (weakness misses, quiz attempts) are JSON-lines
//! journals: each entry is appended as one line with a single write on a file
//! opened in append mode, so several processes sharing a journal add to it
//! without overwriting each other. Whole values (one vector collection) are
//! written to a uniquely named staging file and renamed into place.

use crate::EngineError;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::path::Path;
use tracing::warn;
use uuid::Uuid;

pub(crate) fn append_line<T: Serialize>(path: &Path, entry: &T) -> Result<(), EngineError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut line = serde_json::to_vec(entry)?;
    line.push(b'\n');

    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    file.write_all(&line)?;
    Ok(())
}

/// Entries of the journal at `path`; a missing journal is empty. Lines that do
/// not parse (a writer died mid-append) are skipped with a warning.
pub(crate) fn read_lines<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>, EngineError> {
    let file = match fs::File::open(path) {
        Ok(file) => file,
        Err(error) if error.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(error) => return Err(error.into()),
    };

    let mut entries = Vec::new();
    for (number, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str(&line) {
            Ok(entry) => entries.push(entry),
            Err(error) => {
                warn!(path = %path.display(), line = number + 1, %error, "skipping unreadable journal line");
            }
        }
    }
    Ok(entries)
}

pub(crate) fn write_atomically<T: Serialize>(path: &Path, value: &T) -> Result<(), EngineError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let staging = path.with_extension(format!("{}.tmp", Uuid::new_v4().simple()));
    fs::write(&staging, serde_json::to_vec(value)?)?;
    if let Err(error) = fs::rename(&staging, path) {
        let _ = fs::remove_file(&staging);
        return Err(error.into());
    }
    Ok(())
}

pub(crate) fn remove_if_present(path: &Path) -> Result<bool, EngineError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(error) if error.kind() == ErrorKind::NotFound => Ok(false),
        Err(error) => Err(error.into()),
    }
}
