//! On-disk index cache: one SQLite file per corpus.
//!
//! The whole file is rewritten on every rebuild. It is written next to its
//! destination and renamed into place, so a crash mid-write leaves the
//! previous cache intact.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OpenFlags};

use super::snapshot::IndexSnapshot;
use super::types::PolicyChunk;
use super::PolicyError;

const FORMAT_VERSION: &str = "1";

const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS index_meta (
    key   TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS policy_chunks (
    position        INTEGER PRIMARY KEY,
    chunk_id        TEXT NOT NULL UNIQUE,
    source_document TEXT NOT NULL,
    ordinal         INTEGER NOT NULL,
    char_offset     INTEGER NOT NULL,
    text            TEXT NOT NULL,
    embedding       BLOB NOT NULL
);
";

/// Write a snapshot to `path`, replacing any previous cache.
pub fn save(path: &Path, snapshot: &IndexSnapshot) -> Result<(), PolicyError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = temp_path(path);
    if tmp.exists() {
        std::fs::remove_file(&tmp)?;
    }

    {
        let mut conn = Connection::open(&tmp)?;
        conn.execute_batch(SCHEMA_SQL)?;
        let tx = conn.transaction()?;
        {
            let mut meta = tx.prepare("INSERT INTO index_meta (key, value) VALUES (?1, ?2)")?;
            meta.execute(params!["format_version", FORMAT_VERSION])?;
            meta.execute(params!["fingerprint", snapshot.fingerprint()])?;
            meta.execute(params!["dimension", snapshot.dimension().to_string()])?;
            meta.execute(params!["embedder_id", snapshot.embedder_id()])?;
            meta.execute(params!["built_at", snapshot.built_at().to_rfc3339()])?;

            let mut insert = tx.prepare(
                "INSERT INTO policy_chunks
                 (position, chunk_id, source_document, ordinal, char_offset, text, embedding)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )?;
            for (position, (chunk, vector)) in snapshot.chunks().iter().zip(snapshot.vectors()).enumerate() {
                insert.execute(params![
                    position as i64,
                    chunk.id,
                    chunk.source_document,
                    chunk.ordinal as i64,
                    chunk.char_offset as i64,
                    chunk.text,
                    encode_f32_blob(vector),
                ])?;
            }
        }
        tx.commit()?;
    }

    std::fs::rename(&tmp, path)?;
    tracing::info!(path = %path.display(), chunks = snapshot.len(), "Policy index cache written");
    Ok(())
}

/// Read a cached snapshot. `Ok(None)` when no cache exists.
pub fn load(path: &Path) -> Result<Option<IndexSnapshot>, PolicyError> {
    if !path.exists() {
        return Ok(None);
    }
    let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)?;

    let meta = |key: &str| -> Result<String, PolicyError> {
        conn.query_row("SELECT value FROM index_meta WHERE key = ?1", params![key], |row| row.get(0))
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => PolicyError::InvalidCache(format!("missing {key}")),
                other => PolicyError::Persistence(other),
            })
    };

    let version = meta("format_version")?;
    if version != FORMAT_VERSION {
        return Err(PolicyError::InvalidCache(format!("format version {version}")));
    }
    let fingerprint = meta("fingerprint")?;
    let embedder_id = meta("embedder_id")?;
    let dimension: usize = meta("dimension")?
        .parse()
        .map_err(|_| PolicyError::InvalidCache("dimension is not a number".into()))?;
    let built_at = DateTime::parse_from_rfc3339(&meta("built_at")?)
        .map_err(|e| PolicyError::InvalidCache(format!("built_at: {e}")))?
        .with_timezone(&Utc);

    let mut stmt = conn.prepare(
        "SELECT chunk_id, source_document, ordinal, char_offset, text, embedding
         FROM policy_chunks ORDER BY position",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok((
            PolicyChunk {
                id: row.get(0)?,
                source_document: row.get(1)?,
                ordinal: row.get::<_, i64>(2)? as usize,
                char_offset: row.get::<_, i64>(3)? as usize,
                text: row.get(4)?,
            },
            row.get::<_, Vec<u8>>(5)?,
        ))
    })?;

    let mut chunks = Vec::new();
    let mut vectors = Vec::new();
    for row in rows {
        let (chunk, blob) = row?;
        vectors.push(decode_f32_blob(&blob, dimension)?);
        chunks.push(chunk);
    }

    let snapshot = IndexSnapshot::new(chunks, vectors, dimension, embedder_id, fingerprint, built_at)?;
    tracing::debug!(path = %path.display(), chunks = snapshot.len(), "Policy index cache loaded");
    Ok(Some(snapshot))
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

fn encode_f32_blob(vector: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(std::mem::size_of_val(vector));
    for &value in vector {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

fn decode_f32_blob(blob: &[u8], dimension: usize) -> Result<Vec<f32>, PolicyError> {
    let expected = dimension * std::mem::size_of::<f32>();
    if blob.len() != expected {
        return Err(PolicyError::InvalidCache(format!(
            "embedding blob is {} bytes, expected {expected}",
            blob.len()
        )));
    }
    let vector: Vec<f32> = blob
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect();
    if vector.iter().any(|v| !v.is_finite()) {
        return Err(PolicyError::InvalidCache("embedding contains non-finite values".into()));
    }
    Ok(vector)
}
