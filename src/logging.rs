use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;

use crate::models::EpochMetrics;

fn log_dir() -> io::Result<()> {
    fs::create_dir_all("logs")
}

fn append_json_line<P: AsRef<Path>, T: Serialize>(path: P, value: &T) -> io::Result<()> {
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    serde_json::to_writer(&mut file, value)
        .map_err(|err| io::Error::new(io::ErrorKind::Other, err))?;
    file.write_all(b"\n")
}

#[derive(Debug, Serialize)]
pub struct EpochLogEntry<'a> {
    pub model: &'a str,
    pub epoch: usize,
    pub train_loss: f32,
    pub val_loss: Option<f32>,
    pub metrics: &'a [(String, f32)],
    pub learning_rate: f32,
    pub elapsed_ms: u128,
    pub timestamp_ms: u128,
}

pub fn log_epoch(model: &str, metrics: &EpochMetrics) -> io::Result<()> {
    log_dir()?;
    let entry = EpochLogEntry {
        model,
        epoch: metrics.epoch,
        train_loss: metrics.train_loss,
        val_loss: metrics.val_loss,
        metrics: &metrics.metrics,
        learning_rate: metrics.learning_rate,
        elapsed_ms: metrics.elapsed_ms,
        timestamp_ms: SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis(),
    };
    append_json_line("logs/training.jsonl", &entry)
}
