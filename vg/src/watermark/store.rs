//! File-backed watermark store
//!
//! One `<key>.timestamp` file per watermark under the state directory. The
//! first line holds an RFC 3339 instant and the second the escaped key.
//! Writes go through a temp file in the same directory and a rename, so a
//! crash leaves either the old or the new value on disk.
//!
//! Keys whose escaped form would exceed [`MAX_STEM_LEN`] bytes get a stem of
//! `<escaped prefix>~<sha256 of key>`, keeping file names within filesystem
//! limits; the key recorded inside the file is what `entries` reports.

use std::collections::HashMap;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, SecondsFormat, Utc};
use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::{WatermarkConfig, WatermarkScope};
use crate::domain::RepoPair;

const EXTENSION: &str = "timestamp";

/// Longest file stem written; leaves room for the extension under NAME_MAX
pub const MAX_STEM_LEN: usize = 200;

/// Separates the kept prefix from the digest in a shortened stem
const DIGEST_MARKER: char = '~';

/// Key shared by every pair when the scope is global
pub const GLOBAL_KEY: &str = "since";

/// Failure to durably record a watermark
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("Failed to access watermark state at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl PersistenceError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Durable "last checked" instants, keyed per pair (or one global key)
///
/// The in-memory cache and every write sit behind one mutex, so concurrent
/// saves are serialized and the forward-only check is made against the
/// latest value.
pub struct WatermarkStore {
    dir: PathBuf,
    scope: WatermarkScope,
    default: DateTime<Utc>,
    cache: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl WatermarkStore {
    /// Open (creating if needed) a store rooted at `dir`
    ///
    /// `default` is handed out for keys that have no record yet.
    pub fn open(
        dir: impl AsRef<Path>,
        scope: WatermarkScope,
        default: DateTime<Utc>,
    ) -> Result<Self, PersistenceError> {
        let dir = dir.as_ref().to_path_buf();
        debug!(?dir, ?scope, %default, "WatermarkStore::open: called");
        fs::create_dir_all(&dir).map_err(|e| PersistenceError::io(&dir, e))?;

        Ok(Self {
            dir,
            scope,
            default,
            cache: Mutex::new(HashMap::new()),
        })
    }

    /// Open the store described by the config
    ///
    /// Without `initial-since` the default is the current time.
    pub fn from_config(config: &WatermarkConfig) -> Result<Self, PersistenceError> {
        let default = config.initial_since.unwrap_or_else(Utc::now);
        Self::open(config.state_dir(), config.scope, default)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn scope(&self) -> WatermarkScope {
        self.scope
    }

    /// Watermark key for a pair under the configured scope
    pub fn key_for(&self, pair: &RepoPair) -> String {
        match self.scope {
            WatermarkScope::PerPair => pair.key(),
            WatermarkScope::Global => GLOBAL_KEY.to_string(),
        }
    }

    /// File holding the watermark for `key`
    pub fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.{}", file_stem(key), EXTENSION))
    }

    /// Last recorded watermark for `key`, or the default
    ///
    /// Never fails: a missing record is normal on first run and is written
    /// back with the default so the starting point stays fixed across
    /// restarts. An unreadable record is logged and treated as missing.
    pub fn load(&self, key: &str) -> DateTime<Utc> {
        let mut cache = self.lock();
        if let Some(instant) = cache.get(key) {
            return *instant;
        }

        let path = self.path_for(key);
        let instant = match read_record(&path) {
            Ok(Some((instant, _))) => {
                debug!(%key, %instant, "WatermarkStore::load: read from disk");
                instant
            }
            Ok(None) => {
                info!(%key, default = %self.default, "No watermark recorded yet, using default");
                if let Err(e) = write_record(&self.dir, &path, key, self.default) {
                    warn!(%key, error = %e, "Failed to record default watermark");
                }
                self.default
            }
            Err(e) => {
                warn!(%key, error = %e, default = %self.default, "Unreadable watermark, using default");
                self.default
            }
        };

        cache.insert(key.to_string(), instant);
        instant
    }

    /// Durably advance the watermark for `key` to `instant`
    ///
    /// Returns `Ok(false)` without writing when `instant` is not later than
    /// the current value; watermarks only move forward.
    pub fn save(&self, key: &str, instant: DateTime<Utc>) -> Result<bool, PersistenceError> {
        let mut cache = self.lock();
        let path = self.path_for(key);

        let current = match cache.get(key) {
            Some(current) => Some(*current),
            None => read_record(&path).ok().flatten().map(|(instant, _)| instant),
        };
        if let Some(current) = current
            && instant <= current
        {
            debug!(%key, %instant, %current, "WatermarkStore::save: not newer, keeping current");
            return Ok(false);
        }

        write_record(&self.dir, &path, key, instant)?;
        cache.insert(key.to_string(), instant);
        info!(%key, %instant, "Watermark advanced");
        Ok(true)
    }

    /// All recorded watermarks, sorted by key
    pub fn entries(&self) -> Result<Vec<(String, DateTime<Utc>)>, PersistenceError> {
        let read_dir = fs::read_dir(&self.dir).map_err(|e| PersistenceError::io(&self.dir, e))?;

        let mut entries = Vec::new();
        for entry in read_dir {
            let path = entry.map_err(|e| PersistenceError::io(&self.dir, e))?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(EXTENSION) {
                continue;
            }
            let (instant, stored_key) = match read_record(&path) {
                Ok(Some(record)) => record,
                Ok(None) => continue,
                Err(e) => {
                    warn!(?path, error = %e, "Skipping unreadable watermark");
                    continue;
                }
            };
            // Records written before keys were stored inside the file carry it in the name
            let key = stored_key.or_else(|| path.file_stem().and_then(|s| s.to_str()).and_then(key_from_stem));
            match key {
                Some(key) => entries.push((key, instant)),
                None => warn!(?path, "Skipping watermark with no recoverable key"),
            }
        }

        entries.sort();
        Ok(entries)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, DateTime<Utc>>> {
        // A panic while holding the lock leaves the cache consistent with disk.
        self.cache.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Serialize an instant losslessly
pub fn format_instant(instant: DateTime<Utc>) -> String {
    instant.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

/// Parse an instant written by [`format_instant`] (any RFC 3339 offset is accepted)
pub fn parse_instant(s: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(s.trim()).map(|d| d.with_timezone(&Utc))
}

/// Instant and stored key of a record; the key line is absent in older records
fn read_record(path: &Path) -> Result<Option<(DateTime<Utc>, Option<String>)>, PersistenceError> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(PersistenceError::io(path, e)),
    };
    let mut lines = content.lines();
    let instant = parse_instant(lines.next().unwrap_or_default())
        .map_err(|e| PersistenceError::io(path, std::io::Error::new(ErrorKind::InvalidData, e)))?;
    let key = lines.next().map(str::trim).filter(|l| !l.is_empty()).and_then(unescape_key);
    Ok(Some((instant, key)))
}

fn write_record(dir: &Path, path: &Path, key: &str, instant: DateTime<Utc>) -> Result<(), PersistenceError> {
    let content = format!("{}\n{}\n", format_instant(instant), escape_key(key));
    let mut tmp = NamedTempFile::new_in(dir).map_err(|e| PersistenceError::io(dir, e))?;
    tmp.write_all(content.as_bytes())
        .and_then(|_| tmp.as_file().sync_all())
        .map_err(|e| PersistenceError::io(tmp.path(), e))?;
    tmp.persist(path).map_err(|e| PersistenceError::io(path, e.error))?;
    Ok(())
}

/// File stem for a key: the escaped key, or a prefix of it plus a SHA-256
/// digest of the full key when the escaped key exceeds [`MAX_STEM_LEN`]
fn file_stem(key: &str) -> String {
    let escaped = escape_key(key);
    if escaped.len() <= MAX_STEM_LEN {
        return escaped;
    }
    let digest = format!("{:x}", Sha256::digest(key.as_bytes()));
    // The escaped key is ASCII, so any byte offset is a char boundary
    let keep = MAX_STEM_LEN - digest.len() - DIGEST_MARKER.len_utf8();
    format!("{}{}{}", &escaped[..keep], DIGEST_MARKER, digest)
}

/// Key encoded in an unshortened stem
fn key_from_stem(stem: &str) -> Option<String> {
    if stem.contains(DIGEST_MARKER) {
        return None;
    }
    unescape_key(stem)
}

/// Every byte outside `[A-Za-z0-9._-]` becomes `%XX`, so distinct keys
/// never share an escaped form
fn escape_key(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    for byte in key.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'.' | b'_' | b'-' => out.push(byte as char),
            _ => out.push_str(&format!("%{:02X}", byte)),
        }
    }
    out
}

fn unescape_key(escaped: &str) -> Option<String> {
    let bytes = escaped.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = escaped.get(i + 1..i + 3)?;
            out.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).ok()
}
