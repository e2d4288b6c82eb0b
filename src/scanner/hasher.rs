//! Content fingerprints and the bounded hashing pool.

use std::fs::{self, File};
use std::io::{ErrorKind, Read};
use std::path::{Path, PathBuf};
use std::thread;

use crossbeam_channel as channel;
use sha2::{Digest, Sha256};

use crate::cache::store::FileFingerprint;
use crate::core::config::HashingConfig;
use crate::core::errors::{FreshError, Result};
use crate::core::paths::modified_millis;

const READ_BUFFER_BYTES: usize = 64 * 1024;

/// Hex SHA-256 of everything readable from `reader`.
pub fn digest_reader<R: Read>(mut reader: R) -> std::io::Result<String> {
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; READ_BUFFER_BYTES];
    loop {
        match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => hasher.update(&buf[..n]),
            Err(err) if err.kind() == ErrorKind::Interrupted => {}
            Err(err) => return Err(err),
        }
    }
    Ok(format!("{:x}", hasher.finalize()))
}

/// Hex SHA-256 of a byte slice.
pub fn digest_bytes(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// Hash one file and pair the digest with the mtime seen before the read.
///
/// If the mtime moves while the file is being read the read is retried once.
/// The pre-read mtime is always the one returned, so a write racing the read
/// leaves the file newer than its stored fingerprint and it is picked up again
/// on the next scan.
pub fn hash_file(path: &Path) -> Result<FileFingerprint> {
    let mut attempt = 0;
    loop {
        let before = fs::metadata(path).map_err(|e| FreshError::io(path, e))?;
        let file = File::open(path).map_err(|e| FreshError::io(path, e))?;
        let hash = digest_reader(file).map_err(|e| FreshError::io(path, e))?;
        let after = fs::metadata(path).map_err(|e| FreshError::io(path, e))?;

        let modified_ms = modified_millis(&before);
        if modified_ms == modified_millis(&after) || attempt > 0 {
            return Ok(FileFingerprint { hash, modified_ms });
        }
        attempt += 1;
    }
}

/// Per-file hashing result.
pub type HashOutcome = (PathBuf, Result<FileFingerprint>);

/// Fixed-size worker pool for content hashing.
///
/// Work is split into chunks of `chunk_size`; each chunk is drained by exactly
/// `workers` threads through a bounded channel and fully collected before the
/// next chunk starts. No more than `workers` files are open at once.
#[derive(Debug, Clone, Copy)]
pub struct HashPool {
    workers: usize,
    chunk_size: usize,
}

impl HashPool {
    /// Pool of `workers` threads over chunks of `chunk_size`; both clamp to 1.
    pub fn new(workers: usize, chunk_size: usize) -> Self {
        Self {
            workers: workers.max(1),
            chunk_size: chunk_size.max(1),
        }
    }

    /// Pool sized from the `[hashing]` config section.
    pub fn from_config(config: &HashingConfig) -> Self {
        Self::new(config.workers, config.chunk_size)
    }

    /// Hash every path; per-file failures are returned, not raised.
    ///
    /// Only pool plumbing failures surface as `Err`. Results are sorted by path.
    pub fn hash_all(&self, paths: &[PathBuf]) -> Result<Vec<HashOutcome>> {
        self.run(paths, hash_file)
    }

    pub(crate) fn run<F>(&self, paths: &[PathBuf], hash: F) -> Result<Vec<HashOutcome>>
    where
        F: Fn(&Path) -> Result<FileFingerprint> + Sync,
    {
        let mut results = Vec::with_capacity(paths.len());
        for chunk in paths.chunks(self.chunk_size) {
            results.extend(self.run_chunk(chunk, &hash)?);
        }
        results.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(results)
    }

    fn run_chunk<F>(&self, chunk: &[PathBuf], hash: &F) -> Result<Vec<HashOutcome>>
    where
        F: Fn(&Path) -> Result<FileFingerprint> + Sync,
    {
        let (job_tx, job_rx) = channel::bounded::<&PathBuf>(self.workers);
        let (result_tx, result_rx) = channel::unbounded::<HashOutcome>();

        thread::scope(|scope| -> Result<()> {
            for _ in 0..self.workers.min(chunk.len()) {
                let job_rx = job_rx.clone();
                let result_tx = result_tx.clone();
                scope.spawn(move || {
                    for path in &job_rx {
                        if result_tx.send((path.clone(), hash(path))).is_err() {
                            return;
                        }
                    }
                });
            }
            drop(job_rx);
            drop(result_tx);

            for path in chunk {
                job_tx
                    .send(path)
                    .map_err(|_| FreshError::ChannelClosed {
                        component: "hash_pool",
                    })?;
            }
            drop(job_tx);
            Ok(())
        })?;

        let collected: Vec<HashOutcome> = result_rx.try_iter().collect();
        if collected.len() != chunk.len() {
            return Err(FreshError::ChannelClosed {
                component: "hash_pool",
            });
        }
        Ok(collected)
    }
}
