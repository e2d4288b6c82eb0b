//! Fingerprint store: durable `path -> (content hash, mtime)` table in SQLite.
//!
//! One writer connection sits behind the single writer lock; every mutation is
//! a `BEGIN IMMEDIATE` transaction that either commits (fsynced, `synchronous =
//! FULL`) or rolls back as a whole. Reads use a small pool of read-only
//! connections and share a commit gate that commits hold exclusively, so a
//! reader never observes a half-applied batch.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use parking_lot::{Mutex, RwLock};
use rusqlite::{Connection, OpenFlags, OptionalExtension, Transaction, TransactionBehavior, params};

use crate::core::errors::{FreshError, Result};
use crate::core::paths::{modified_millis, normalize_key};

/// Number of read-only connections opened next to the writer.
const READ_POOL_SIZE: usize = 2;

/// Hash and timestamp observed together for one file.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct FileFingerprint {
    /// Lowercase hex SHA-256 of the file bytes.
    pub hash: String,
    /// Modification time (epoch millis) captured with the same read.
    pub modified_ms: u64,
}

/// Transactional fingerprint cache for one project.
pub struct FingerprintStore {
    path: Option<PathBuf>,
    writer: Mutex<Option<Connection>>,
    readers: Vec<Mutex<Option<Connection>>>,
    next_reader: AtomicUsize,
    commit_gate: RwLock<()>,
    closed: AtomicBool,
}

impl FingerprintStore {
    /// Open (or create) the store at `path`.
    ///
    /// Any failure here is fatal for the caller: the engine cannot run without
    /// its backing store.
    pub fn open(path: &Path) -> Result<Self> {
        Self::open_inner(path).map_err(|error| match error {
            FreshError::StoreInit { .. } => error,
            other => FreshError::StoreInit {
                path: path.to_path_buf(),
                details: other.to_string(),
            },
        })
    }

    fn open_inner(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| FreshError::io(parent, source))?;
        }

        let writer = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        apply_pragmas(&writer)?;
        apply_schema(&writer)?;

        let mut readers = Vec::with_capacity(READ_POOL_SIZE);
        for _ in 0..READ_POOL_SIZE {
            let reader = Connection::open_with_flags(
                path,
                OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
            )?;
            reader.busy_timeout(std::time::Duration::from_secs(5))?;
            readers.push(Mutex::new(Some(reader)));
        }

        Ok(Self {
            path: Some(path.to_path_buf()),
            writer: Mutex::new(Some(writer)),
            readers,
            next_reader: AtomicUsize::new(0),
            commit_gate: RwLock::new(()),
            closed: AtomicBool::new(false),
        })
    }

    /// Open a private in-memory store (tests and dry runs).
    pub fn open_in_memory() -> Result<Self> {
        let writer = Connection::open_in_memory()?;
        apply_schema(&writer)?;
        Ok(Self {
            path: None,
            writer: Mutex::new(Some(writer)),
            readers: Vec::new(),
            next_reader: AtomicUsize::new(0),
            commit_gate: RwLock::new(()),
            closed: AtomicBool::new(false),
        })
    }

    /// Database file path (`None` for in-memory stores).
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Whether `close()` has run.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    // ──────────────────── reads ────────────────────

    /// Recorded digest, or `None` if the path was never fingerprinted.
    pub fn get_hash(&self, path: &Path) -> Result<Option<String>> {
        let key = normalize_key(path);
        self.with_reader(|conn| {
            Ok(conn
                .prepare_cached("SELECT hash FROM file_hashes WHERE path = ?1")?
                .query_row(params![key], |row| row.get(0))
                .optional()?)
        })
    }

    /// Recorded mtime in epoch millis, or `None` if never fingerprinted.
    pub fn get_timestamp(&self, path: &Path) -> Result<Option<u64>> {
        let key = normalize_key(path);
        self.with_reader(|conn| {
            let raw: Option<i64> = conn
                .prepare_cached("SELECT modified_ms FROM file_timestamps WHERE path = ?1")?
                .query_row(params![key], |row| row.get(0))
                .optional()?;
            Ok(raw.map(from_sql_millis))
        })
    }

    /// Both halves of a fingerprint, read under one gate acquisition.
    pub fn get_fingerprint(&self, path: &Path) -> Result<Option<FileFingerprint>> {
        let key = normalize_key(path);
        self.with_reader(|conn| {
            Ok(conn
                .prepare_cached(
                    "SELECT h.hash, t.modified_ms FROM file_hashes h
                     JOIN file_timestamps t ON t.path = h.path
                     WHERE h.path = ?1",
                )?
                .query_row(params![key], |row| {
                    Ok(FileFingerprint {
                        hash: row.get(0)?,
                        modified_ms: from_sql_millis(row.get(1)?),
                    })
                })
                .optional()?)
        })
    }

    /// Full `normalized path -> hash` snapshot (diagnostics only).
    pub fn get_all_hashes(&self) -> Result<BTreeMap<String, String>> {
        self.with_reader(|conn| {
            let mut stmt = conn.prepare_cached("SELECT path, hash FROM file_hashes")?;
            let rows = stmt
                .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
                .collect::<std::result::Result<BTreeMap<_, _>, _>>()?;
            Ok(rows)
        })
    }

    /// Number of fingerprinted files.
    pub fn len(&self) -> Result<usize> {
        self.with_reader(|conn| {
            let count: i64 =
                conn.query_row("SELECT COUNT(*) FROM file_hashes", [], |row| row.get(0))?;
            Ok(usize::try_from(count).unwrap_or(0))
        })
    }

    /// No fingerprints recorded yet.
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    // ──────────────────── writes ────────────────────

    /// Record `hash` for one file, stamping it with the file's current mtime.
    pub fn store_hash(&self, path: &Path, hash: &str) -> Result<()> {
        let meta = fs::metadata(path).map_err(|source| FreshError::io(path, source))?;
        let mut batch = BTreeMap::new();
        batch.insert(
            path.to_path_buf(),
            FileFingerprint {
                hash: hash.to_string(),
                modified_ms: modified_millis(&meta),
            },
        );
        self.batch_update(&batch).map(|_| ())
    }

    /// Write many fingerprints in one transaction; all or nothing.
    pub fn batch_update(&self, entries: &BTreeMap<PathBuf, FileFingerprint>) -> Result<usize> {
        if self.is_closed() {
            return Err(FreshError::StoreClosed);
        }
        if entries.is_empty() {
            return Ok(0);
        }
        let keyed: Vec<(String, &FileFingerprint)> = entries
            .iter()
            .map(|(path, fp)| (normalize_key(path), fp))
            .collect();

        self.with_writer("batch_update", |tx| {
            let mut hash_stmt = tx.prepare_cached(
                "INSERT INTO file_hashes (path, hash) VALUES (?1, ?2)
                 ON CONFLICT(path) DO UPDATE SET hash = excluded.hash",
            )?;
            let mut ts_stmt = tx.prepare_cached(
                "INSERT INTO file_timestamps (path, modified_ms) VALUES (?1, ?2)
                 ON CONFLICT(path) DO UPDATE SET modified_ms = excluded.modified_ms",
            )?;
            for (key, fp) in &keyed {
                hash_stmt.execute(params![key, fp.hash])?;
                ts_stmt.execute(params![key, to_sql_millis(fp.modified_ms)])?;
            }
            Ok(keyed.len())
        })
    }

    /// Write many hashes, stamping each with its file's current mtime.
    ///
    /// Every file is stat'ed before the transaction starts; one missing file
    /// aborts the whole batch without touching the store.
    pub fn batch_update_hashes(&self, hashes: &BTreeMap<PathBuf, String>) -> Result<usize> {
        let mut entries = BTreeMap::new();
        for (path, hash) in hashes {
            let meta = fs::metadata(path).map_err(|source| FreshError::io(path, source))?;
            entries.insert(
                path.clone(),
                FileFingerprint {
                    hash: hash.clone(),
                    modified_ms: modified_millis(&meta),
                },
            );
        }
        self.batch_update(&entries)
    }

    /// Evict one entry from both tables. Returns whether anything was removed.
    pub fn remove_hash(&self, path: &Path) -> Result<bool> {
        let key = normalize_key(path);
        self.with_writer("remove_hash", |tx| {
            let hashes = tx.execute("DELETE FROM file_hashes WHERE path = ?1", params![key])?;
            let stamps = tx.execute("DELETE FROM file_timestamps WHERE path = ?1", params![key])?;
            Ok(hashes + stamps > 0)
        })
    }

    /// Flush the WAL and release every connection.
    ///
    /// Idempotent; later operations fail with `StoreClosed`.
    pub fn close(&self) -> Result<()> {
        let mut writer = self.writer.lock();
        let _gate = self.commit_gate.write();
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        for reader in &self.readers {
            if let Some(conn) = reader.lock().take() {
                let _ = conn.close();
            }
        }

        if let Some(conn) = writer.take() {
            if self.path.is_some() {
                conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);")?;
            }
            conn.close().map_err(|(_, error)| FreshError::from(error))?;
        }
        Ok(())
    }

    // ──────────────────── internals ────────────────────

    /// Run `f` inside an immediate transaction while holding the writer lock
    /// and the commit gate. Dropping the transaction on error rolls it back.
    fn with_writer<T, F>(&self, context: &'static str, f: F) -> Result<T>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T>,
    {
        let guard = self.writer.lock();
        let conn = guard.as_ref().ok_or(FreshError::StoreClosed)?;
        let _gate = self.commit_gate.write();

        let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate).map_err(
            |error| FreshError::Sql {
                context,
                details: format!("begin: {error}"),
            },
        )?;
        let value = f(&tx)?;
        tx.commit().map_err(|error| FreshError::Sql {
            context,
            details: format!("commit: {error}"),
        })?;
        Ok(value)
    }

    fn with_reader<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        if self.readers.is_empty() {
            // In-memory stores cannot share the database across connections;
            // the writer lock alone keeps reads off in-flight commits.
            let guard = self.writer.lock();
            let conn = guard.as_ref().ok_or(FreshError::StoreClosed)?;
            return f(conn);
        }

        let _gate = self.commit_gate.read();
        let slot = self.next_reader.fetch_add(1, Ordering::Relaxed) % self.readers.len();
        let guard = self.readers[slot].lock();
        let conn = guard.as_ref().ok_or(FreshError::StoreClosed)?;
        f(conn)
    }
}

impl Drop for FingerprintStore {
    fn drop(&mut self) {
        if !self.is_closed()
            && let Err(error) = self.close()
        {
            eprintln!("[FC-STORE] close on drop failed: {error}");
        }
    }
}

impl std::fmt::Debug for FingerprintStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FingerprintStore")
            .field("path", &self.path)
            .field("readers", &self.readers.len())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

fn to_sql_millis(millis: u64) -> i64 {
    i64::try_from(millis).unwrap_or(i64::MAX)
}

fn from_sql_millis(raw: i64) -> u64 {
    u64::try_from(raw).unwrap_or(0)
}

// ──────────────────── schema & pragmas ────────────────────

fn apply_pragmas(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA synchronous = FULL;
         PRAGMA temp_store = MEMORY;
         PRAGMA busy_timeout = 5000;",
    )?;
    let mode: String = conn.query_row("PRAGMA journal_mode", [], |row| row.get(0))?;
    if !mode.eq_ignore_ascii_case("wal") {
        eprintln!("[FC-STORE] WARNING: requested WAL mode but got '{mode}'");
    }
    Ok(())
}

fn apply_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS file_hashes (
            path TEXT PRIMARY KEY NOT NULL,
            hash TEXT NOT NULL CHECK (length(hash) = 64)
        );

        CREATE TABLE IF NOT EXISTS file_timestamps (
            path TEXT PRIMARY KEY NOT NULL,
            modified_ms INTEGER NOT NULL
        );",
    )?;
    Ok(())
}

// ──────────────────── tests ────────────────────
