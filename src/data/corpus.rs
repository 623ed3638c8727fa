// ============================================================
// Layer 4 — Byte Corpus Loader
// ============================================================
// Reads the raw training corpus as bytes. The tokenizer works
// on bytes directly, so there is no parsing or decoding here:
// every file is one opaque byte string.
//
// The corpus path may be:
//   - a single file          → one CorpusFile
//   - a directory            → every regular file directly
//                              inside it, in name order
//
// Name order keeps the train/eval split reproducible across
// restarts, since the split shuffles with a fixed seed.

use anyhow::{Context, Result};
use std::{fs, path::{Path, PathBuf}};

/// One corpus file's contents.
#[derive(Debug, Clone)]
pub struct CorpusFile {
    pub source: String,
    pub bytes:  Vec<u8>,
}

pub struct CorpusLoader {
    path: PathBuf,
}

impl CorpusLoader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn load_all(&self) -> Result<Vec<CorpusFile>> {
        if !self.path.exists() {
            tracing::warn!(
                "Corpus path '{}' does not exist — returning empty corpus",
                self.path.display()
            );
            return Ok(Vec::new());
        }

        if self.path.is_file() {
            return Ok(vec![load_file(&self.path)?]);
        }

        let mut paths: Vec<PathBuf> = fs::read_dir(&self.path)
            .with_context(|| format!("Cannot read directory '{}'", self.path.display()))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.is_file())
            .collect();
        paths.sort();

        let mut files = Vec::with_capacity(paths.len());
        for path in &paths {
            match load_file(path) {
                Ok(file) => {
                    tracing::debug!("Loaded: {} ({} bytes)", file.source, file.bytes.len());
                    files.push(file);
                }
                // One unreadable file should not sink the whole corpus
                Err(e) => tracing::warn!("Skipping '{}': {:#}", path.display(), e),
            }
        }

        tracing::info!(
            "Loaded {} corpus files ({} bytes)",
            files.len(),
            files.iter().map(|f| f.bytes.len()).sum::<usize>()
        );
        Ok(files)
    }
}

fn load_file(path: &Path) -> Result<CorpusFile> {
    let bytes = fs::read(path)
        .with_context(|| format!("Cannot read '{}'", path.display()))?;
    let source = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("unknown")
        .to_string();
    Ok(CorpusFile { source, bytes })
}
