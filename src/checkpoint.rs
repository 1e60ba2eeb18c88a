//! Checkpoint trait and error handling for weight persistence.
//!
//! Scoring models serialize their trainable weights through a deterministic,
//! versioned binary codec. The same snapshot path backs both plain
//! save/load and the clear-and-rebuild memory-reclaim cycle: weights are
//! written to durable storage before the computation state is torn down and
//! reloaded into a freshly constructed network afterwards. Snapshots carry a
//! version header so incompatible files are rejected during load.

use std::fmt;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use bincode::Options;

/// Errors that can occur while saving or loading weight snapshots.
#[derive(Debug)]
pub enum CheckpointError {
    /// Underlying I/O failure while reading or writing snapshot files.
    Io(std::io::Error),
    /// Serialization or deserialization error from the binary codec.
    Serialization(bincode::Error),
    /// The snapshot was well formed but carries an incompatible version.
    VersionMismatch { expected: u32, found: u32 },
    /// The snapshot did not match the expected structure.
    InvalidFormat(String),
}

impl fmt::Display for CheckpointError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckpointError::Io(err) => write!(f, "I/O error while accessing snapshot: {err}"),
            CheckpointError::Serialization(err) => {
                write!(f, "Failed to (de)serialize weight snapshot: {err}")
            }
            CheckpointError::VersionMismatch { expected, found } => write!(
                f,
                "Snapshot version mismatch: expected {expected}, found {found}",
            ),
            CheckpointError::InvalidFormat(msg) => {
                write!(f, "Snapshot has invalid structure: {msg}")
            }
        }
    }
}

impl std::error::Error for CheckpointError {}

impl From<std::io::Error> for CheckpointError {
    fn from(err: std::io::Error) -> Self {
        CheckpointError::Io(err)
    }
}

impl From<bincode::Error> for CheckpointError {
    fn from(err: bincode::Error) -> Self {
        CheckpointError::Serialization(err)
    }
}

/// Deterministic binary codec options shared by all snapshot implementations.
fn codec() -> impl Options {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .allow_trailing_bytes()
        .with_little_endian()
}

/// Models that support deterministic weight persistence implement this trait.
pub trait Checkpointable: Sized {
    /// Save the current weights to `path` using the deterministic codec.
    fn save_checkpoint<P: AsRef<Path>>(&self, path: P) -> Result<(), CheckpointError>;

    /// Load a model from `path`, replacing any existing instance.
    fn load_checkpoint<P: AsRef<Path>>(path: P) -> Result<Self, CheckpointError>;

    /// Utility for writing a serializable snapshot with the shared codec.
    fn write_snapshot<P, T>(snapshot: &T, path: P) -> Result<(), CheckpointError>
    where
        P: AsRef<Path>,
        T: serde::Serialize,
    {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        codec().serialize_into(&mut writer, snapshot)?;
        writer.flush()?;
        Ok(())
    }

    /// Utility for reading a serializable snapshot with the shared codec.
    fn read_snapshot<P, T>(path: P) -> Result<T, CheckpointError>
    where
        P: AsRef<Path>,
        T: serde::de::DeserializeOwned,
    {
        let file = File::open(path)?;
        let mut reader = BufReader::new(file);
        Ok(codec().deserialize_from(&mut reader)?)
    }
}

/// Reject a snapshot whose version header does not match.
pub fn check_version(expected: u32, found: u32) -> Result<(), CheckpointError> {
    if expected != found {
        return Err(CheckpointError::VersionMismatch { expected, found });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_check() {
        assert!(check_version(1, 1).is_ok());
        let err = check_version(1, 2).unwrap_err();
        assert!(err.to_string().contains("expected 1"));
        assert!(err.to_string().contains("found 2"));
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<CheckpointError>();
    }
}
