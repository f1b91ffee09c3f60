//! Capture file reading
//!
//! Captures are newline-delimited JSON, optionally zstd-compressed (`.zst`).

use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

/// Open a capture file as a line reader, decompressing `.zst` files.
pub fn open_capture(path: &Path) -> Result<Box<dyn BufRead>> {
    let file = File::open(path).with_context(|| format!("open {}", path.display()))?;

    if is_compressed(path) {
        let decoder = zstd::stream::read::Decoder::new(file)
            .with_context(|| format!("start zstd stream for {}", path.display()))?;
        Ok(Box::new(BufReader::new(decoder)))
    } else {
        Ok(Box::new(BufReader::new(file)))
    }
}

fn is_compressed(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "zst")
}

/// Capture files in processing order. Captures are named by time, so a
/// lexical sort is chronological.
pub fn sorted_paths(mut paths: Vec<PathBuf>) -> Vec<PathBuf> {
    paths.sort();
    paths.dedup();
    paths
}

/// What one line of a capture held.
#[derive(Debug)]
pub enum Line {
    Text(String),
    /// Not UTF-8; the line was consumed and can be skipped.
    Undecodable(io::Error),
}

/// Iterate the lines of a capture. Invalid UTF-8 is reported per line;
/// any other read error ends the file with an error.
pub fn lines(reader: Box<dyn BufRead>) -> impl Iterator<Item = Result<Line>> {
    reader.lines().map(|line| match line {
        Ok(text) => Ok(Line::Text(text)),
        Err(err) if err.kind() == io::ErrorKind::InvalidData => Ok(Line::Undecodable(err)),
        Err(err) => Err(anyhow::Error::new(err).context("read capture")),
    })
}
