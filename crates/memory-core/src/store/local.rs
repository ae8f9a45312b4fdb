//! Local vector store (C4) — SQLite-backed primary storage.
//!
//! One metadata table, one tag table, one FTS5 index on content, and an
//! in-process `usearch` HNSW index kept in lockstep with a BLOB column that
//! plays the role of the "vector virtual table" (§4.4, §9 — this corpus has
//! no real SQLite vector-extension crate, so the vector index lives beside
//! the file rather than inside it, rebuilt from the BLOB column on open).

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value as Json;
use usearch::{Index, IndexOptions, MetricKind, ScalarKind};

use crate::embeddings::EmbeddingProvider;
use crate::error::{MemoryError, Result};
use crate::model::{now_unix, reserved_keys, Memory, MemoryType};

use super::{MemoryStore, MemoryQueryResult, Stats};

const SCHEMA_VERSION: &str = "1";
const DISTANCE_METRIC: &str = "cosine";

/// In-process HNSW index over content-hash keys. Rebuilt from the
/// `memory_embeddings` BLOB column whenever a `LocalStore` is opened.
struct VectorIndex {
    index: Index,
    dimensions: usize,
    key_to_id: HashMap<String, u64>,
    id_to_key: HashMap<u64, String>,
    next_id: u64,
}

impl VectorIndex {
    fn new(dimensions: usize) -> Result<Self> {
        let options = IndexOptions {
            dimensions,
            metric: MetricKind::Cos,
            quantization: ScalarKind::F32,
            connectivity: 16,
            expansion_add: 128,
            expansion_search: 64,
            multi: false,
        };
        let index = Index::new(&options)
            .map_err(|e| MemoryError::Storage(format!("vector index creation failed: {e}")))?;
        index
            .reserve(16)
            .map_err(|e| MemoryError::Storage(format!("vector index reserve failed: {e}")))?;
        Ok(Self {
            index,
            dimensions,
            key_to_id: HashMap::new(),
            id_to_key: HashMap::new(),
            next_id: 0,
        })
    }

    fn len(&self) -> usize {
        self.index.size()
    }

    fn upsert(&mut self, key: &str, vector: &[f32]) -> Result<()> {
        if vector.len() != self.dimensions {
            return Err(MemoryError::Validation(format!(
                "expected {}-dim embedding, got {}",
                self.dimensions,
                vector.len()
            )));
        }

        if let Some(&id) = self.key_to_id.get(key) {
            let _ = self.index.remove(id);
            self.reserve_if_needed()?;
            self.index
                .add(id, vector)
                .map_err(|e| MemoryError::Storage(format!("vector index update failed: {e}")))?;
            return Ok(());
        }

        self.reserve_if_needed()?;
        let id = self.next_id;
        self.next_id += 1;
        self.index
            .add(id, vector)
            .map_err(|e| MemoryError::Storage(format!("vector index insert failed: {e}")))?;
        self.key_to_id.insert(key.to_string(), id);
        self.id_to_key.insert(id, key.to_string());
        Ok(())
    }

    fn reserve_if_needed(&self) -> Result<()> {
        let capacity = self.index.capacity();
        let size = self.index.size();
        if size >= capacity {
            let new_capacity = std::cmp::max(capacity * 2, 16);
            self.index
                .reserve(new_capacity)
                .map_err(|e| MemoryError::Storage(format!("vector index reserve failed: {e}")))?;
        }
        Ok(())
    }

    fn remove(&mut self, key: &str) {
        if let Some(id) = self.key_to_id.remove(key) {
            self.id_to_key.remove(&id);
            let _ = self.index.remove(id);
        }
    }

    /// Returns `(content_hash, cosine_distance)` pairs, nearest first.
    /// `usearch`'s `Cos` metric reports distance in `[0, 2]`; the caller
    /// converts to similarity via `1 - d/2` (§4.4.2).
    fn search(&self, query: &[f32], limit: usize) -> Result<Vec<(String, f32)>> {
        if self.len() == 0 {
            return Ok(vec![]);
        }
        let results = self
            .index
            .search(query, limit)
            .map_err(|e| MemoryError::Storage(format!("vector search failed: {e}")))?;
        let mut out = Vec::with_capacity(results.keys.len());
        for (id, distance) in results.keys.iter().zip(results.distances.iter()) {
            if let Some(key) = self.id_to_key.get(id) {
                out.push((key.clone(), *distance));
            }
        }
        Ok(out)
    }
}

/// SQLite-backed local store. Uses a single connection behind a mutex —
/// rusqlite's `Connection` is not `Sync`, and operations are short enough
/// that serializing them costs nothing the WAL journal doesn't already buy.
pub struct LocalStore {
    conn: Mutex<Connection>,
    vector_index: Mutex<VectorIndex>,
    embedder: Arc<dyn EmbeddingProvider>,
    db_path: Option<PathBuf>,
}

impl LocalStore {
    pub fn open(db_path: Option<PathBuf>, embedder: Arc<dyn EmbeddingProvider>) -> Result<Self> {
        let path = match &db_path {
            Some(p) => p.clone(),
            None => default_db_path()?,
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(&path)?;
        Self::configure_connection(&conn)?;
        Self::apply_schema(&conn)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if path.exists() {
                let _ = std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600));
            }
        }

        let dimensions = embedder.dimensions();
        let mut vector_index = VectorIndex::new(dimensions)?;
        Self::load_embeddings_into_index(&conn, &mut vector_index, dimensions)?;
        Self::reconcile_distance_metric(&conn)?;

        tracing::info!(path = %path.display(), "local store opened");

        Ok(Self {
            conn: Mutex::new(conn),
            vector_index: Mutex::new(vector_index),
            embedder,
            db_path: Some(path),
        })
    }

    pub fn in_memory(embedder: Arc<dyn EmbeddingProvider>) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::configure_connection(&conn)?;
        Self::apply_schema(&conn)?;
        let dimensions = embedder.dimensions();
        let vector_index = VectorIndex::new(dimensions)?;
        Ok(Self {
            conn: Mutex::new(conn),
            vector_index: Mutex::new(vector_index),
            embedder,
            db_path: None,
        })
    }

    /// PRAGMAs applied at connect time, not after (§4.4). `busy_timeout` is
    /// set via the connection API itself rather than a raw `PRAGMA` string.
    fn configure_connection(conn: &Connection) -> Result<()> {
        conn.busy_timeout(std::time::Duration::from_millis(15_000))?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA cache_size = 20000;
             PRAGMA foreign_keys = ON;
             PRAGMA mmap_size = 268435456;",
        )?;
        Ok(())
    }

    /// Concurrent init: `IF NOT EXISTS` everywhere so two processes (the
    /// stdio server and the HTTP server) opening the same file never race
    /// on DDL.
    fn apply_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS memories (
                content_hash TEXT PRIMARY KEY,
                content TEXT NOT NULL,
                memory_type TEXT NOT NULL,
                created_at REAL NOT NULL,
                updated_at REAL NOT NULL,
                metadata_json TEXT NOT NULL,
                quality_score REAL
            );
            CREATE INDEX IF NOT EXISTS idx_memories_created_at ON memories(created_at);
            CREATE INDEX IF NOT EXISTS idx_memories_type ON memories(memory_type);

            CREATE TABLE IF NOT EXISTS memory_embeddings (
                content_hash TEXT PRIMARY KEY REFERENCES memories(content_hash) ON DELETE CASCADE,
                embedding BLOB NOT NULL,
                dimensions INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS memory_tags (
                content_hash TEXT NOT NULL REFERENCES memories(content_hash) ON DELETE CASCADE,
                tag TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_memory_tags_tag ON memory_tags(tag, content_hash);

            CREATE VIRTUAL TABLE IF NOT EXISTS memory_fts USING fts5(
                content,
                content='memories',
                content_rowid='rowid'
            );

            CREATE TRIGGER IF NOT EXISTS memories_ai AFTER INSERT ON memories BEGIN
                INSERT INTO memory_fts(rowid, content) VALUES (new.rowid, new.content);
            END;
            CREATE TRIGGER IF NOT EXISTS memories_ad AFTER DELETE ON memories BEGIN
                INSERT INTO memory_fts(memory_fts, rowid, content) VALUES ('delete', old.rowid, old.content);
            END;
            CREATE TRIGGER IF NOT EXISTS memories_au AFTER UPDATE ON memories BEGIN
                INSERT INTO memory_fts(memory_fts, rowid, content) VALUES ('delete', old.rowid, old.content);
                INSERT INTO memory_fts(rowid, content) VALUES (new.rowid, new.content);
            END;

            CREATE TABLE IF NOT EXISTS metadata (
                k TEXT PRIMARY KEY,
                v TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS sync_failures (
                op_id TEXT PRIMARY KEY,
                content_hash TEXT,
                kind TEXT NOT NULL,
                last_error TEXT NOT NULL,
                failed_at REAL NOT NULL
            );",
        )?;

        conn.execute(
            "INSERT OR IGNORE INTO metadata (k, v) VALUES ('schema_version', ?1)",
            params![SCHEMA_VERSION],
        )?;

        Ok(())
    }

    fn load_embeddings_into_index(
        conn: &Connection,
        index: &mut VectorIndex,
        dimensions: usize,
    ) -> Result<()> {
        let mut stmt = conn.prepare("SELECT content_hash, embedding, dimensions FROM memory_embeddings")?;
        let rows: Vec<(String, Vec<u8>, i64)> = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?
            .filter_map(|r| r.ok())
            .collect();

        for (hash, blob, dims) in rows {
            let vector = bytes_to_vector(&blob);
            let vector = if dims as usize != dimensions {
                crate::embeddings::matryoshka_truncate(vector, dimensions)
            } else {
                vector
            };
            if let Err(e) = index.upsert(&hash, &vector) {
                tracing::warn!(hash = %hash, error = %e, "failed to load embedding into vector index");
            }
        }
        Ok(())
    }

    /// §4.4.2: detect a wrong distance metric recorded from a prior run and
    /// migrate. This store has only ever written `cosine`, so in practice
    /// this only fires against a database file produced by an older build
    /// that recorded `l2`; retried with exponential backoff on lock errors.
    fn reconcile_distance_metric(conn: &Connection) -> Result<()> {
        let existing: Option<String> = conn
            .query_row(
                "SELECT v FROM metadata WHERE k = 'distance_metric'",
                [],
                |row| row.get(0),
            )
            .optional()?;

        match existing {
            None => {
                conn.execute(
                    "INSERT INTO metadata (k, v) VALUES ('distance_metric', ?1)",
                    params![DISTANCE_METRIC],
                )?;
            }
            Some(metric) if metric != DISTANCE_METRIC => {
                tracing::warn!(from = %metric, to = DISTANCE_METRIC, "distance metric migration required");
                let mut delay_ms = 1000u64;
                for attempt in 0..3 {
                    match conn.execute("DELETE FROM memory_embeddings", []) {
                        Ok(_) => break,
                        Err(e) if attempt < 2 => {
                            tracing::warn!(attempt, error = %e, "distance metric migration retry");
                            std::thread::sleep(std::time::Duration::from_millis(delay_ms));
                            delay_ms *= 2;
                        }
                        Err(e) => return Err(MemoryError::Migration(e.to_string())),
                    }
                }
                conn.execute(
                    "UPDATE metadata SET v = ?1 WHERE k = 'distance_metric'",
                    params![DISTANCE_METRIC],
                )?;
                tracing::info!("distance metric migrated; embeddings will be regenerated lazily");
            }
            Some(_) => {}
        }
        Ok(())
    }

    pub fn db_path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    /// Used by the sync worker to persist a permanently-failed op (§4.7).
    pub fn record_sync_failure(&self, op_id: &str, content_hash: &str, kind: &str, last_error: &str) -> Result<()> {
        let conn = self.conn.lock().expect("local store connection lock poisoned");
        conn.execute(
            "INSERT OR REPLACE INTO sync_failures (op_id, content_hash, kind, last_error, failed_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![op_id, content_hash, kind, last_error, now_unix()],
        )?;
        Ok(())
    }

    pub fn count_sync_failures(&self) -> Result<u64> {
        let conn = self.conn.lock().expect("local store connection lock poisoned");
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM sync_failures", [], |r| r.get(0))?;
        Ok(n as u64)
    }

    async fn ensure_embedding(&self, memory: &mut Memory) -> Result<()> {
        if memory.embedding.is_none() {
            let vector = self.embedder.embed(&memory.content).await?;
            Memory::validate_embedding(&vector)?;
            memory.embedding = Some(vector);
        }
        Ok(())
    }

    fn row_to_memory(&self, conn: &Connection, content_hash: &str, content: String, memory_type: String, created_at: f64, updated_at: f64, metadata_json: String, quality_score: Option<f32>) -> Result<Memory> {
        let metadata: BTreeMap<String, Json> = serde_json::from_str(&metadata_json).unwrap_or_default();
        let tags = self.tags_for(conn, content_hash)?;
        let embedding = self.embedding_for(conn, content_hash)?;
        Ok(Memory {
            content,
            content_hash: content_hash.to_string(),
            tags,
            memory_type: MemoryType::parse(&memory_type),
            metadata,
            created_at,
            updated_at,
            embedding,
            quality_score,
        })
    }

    fn tags_for(&self, conn: &Connection, content_hash: &str) -> Result<Vec<String>> {
        let mut stmt = conn.prepare("SELECT tag FROM memory_tags WHERE content_hash = ?1")?;
        let tags = stmt
            .query_map(params![content_hash], |row| row.get(0))?
            .filter_map(|r: rusqlite::Result<String>| r.ok())
            .collect();
        Ok(tags)
    }

    fn embedding_for(&self, conn: &Connection, content_hash: &str) -> Result<Option<Vec<f32>>> {
        let blob: Option<Vec<u8>> = conn
            .query_row(
                "SELECT embedding FROM memory_embeddings WHERE content_hash = ?1",
                params![content_hash],
                |row| row.get(0),
            )
            .optional()?;
        Ok(blob.map(|b| bytes_to_vector(&b)))
    }
}

fn default_db_path() -> Result<PathBuf> {
    let proj_dirs = directories::ProjectDirs::from("com", "memvault", "core")
        .ok_or_else(|| MemoryError::Storage("could not determine platform data directory".into()))?;
    let data_dir = proj_dirs.data_dir();
    std::fs::create_dir_all(data_dir)?;
    Ok(data_dir.join("memvault.db"))
}

fn vector_to_bytes(v: &[f32]) -> Vec<u8> {
    v.iter().flat_map(|f| f.to_le_bytes()).collect()
}

fn bytes_to_vector(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

fn tag_placeholders(tags: &[String]) -> String {
    tags.iter().map(|_| "?").collect::<Vec<_>>().join(", ")
}

#[async_trait]
impl MemoryStore for LocalStore {
    async fn store(&self, mut memory: Memory) -> Result<(bool, String)> {
        self.ensure_embedding(&mut memory).await?;

        let mut conn = self.conn.lock().expect("local store connection lock poisoned");
        let tx = conn.transaction()?;

        let exists: Option<String> = tx
            .query_row(
                "SELECT content_hash FROM memories WHERE content_hash = ?1",
                params![memory.content_hash],
                |row| row.get(0),
            )
            .optional()?;
        if exists.is_some() {
            tracing::warn!(hash = %memory.content_hash, "duplicate store ignored");
            return Ok((false, "duplicate".to_string()));
        }

        let metadata_json = serde_json::to_string(&memory.metadata).unwrap_or_else(|_| "{}".to_string());
        tx.execute(
            "INSERT INTO memories (content_hash, content, memory_type, created_at, updated_at, metadata_json, quality_score)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                memory.content_hash,
                memory.content,
                memory.memory_type.as_str(),
                memory.created_at,
                memory.updated_at,
                metadata_json,
                memory.quality_score,
            ],
        )?;

        for tag in &memory.tags {
            tx.execute(
                "INSERT INTO memory_tags (content_hash, tag) VALUES (?1, ?2)",
                params![memory.content_hash, tag],
            )?;
        }

        if let Some(embedding) = &memory.embedding {
            tx.execute(
                "INSERT INTO memory_embeddings (content_hash, embedding, dimensions) VALUES (?1, ?2, ?3)",
                params![memory.content_hash, vector_to_bytes(embedding), embedding.len() as i64],
            )?;
        }

        tx.commit()?;
        drop(conn);

        if let Some(embedding) = &memory.embedding {
            let mut index = self.vector_index.lock().expect("vector index lock poisoned");
            index.upsert(&memory.content_hash, embedding)?;
        }

        tracing::info!(hash = %memory.content_hash, "memory stored");
        Ok((true, memory.content_hash))
    }

    async fn update_memory_metadata(
        &self,
        content_hash: &str,
        patch: serde_json::Map<String, Json>,
    ) -> Result<(bool, String)> {
        let conn = self.conn.lock().expect("local store connection lock poisoned");
        let existing: Option<String> = conn
            .query_row(
                "SELECT metadata_json FROM memories WHERE content_hash = ?1",
                params![content_hash],
                |row| row.get(0),
            )
            .optional()?;

        let Some(existing_json) = existing else {
            return Ok((false, "not found".to_string()));
        };

        let mut metadata: BTreeMap<String, Json> = serde_json::from_str(&existing_json).unwrap_or_default();
        for (k, v) in patch {
            metadata.insert(k, v);
        }
        let now = now_unix();
        metadata.insert(reserved_keys::UPDATED_AT_ISO.to_string(), Json::String(crate::model::unix_to_iso(now)));

        let metadata_json = serde_json::to_string(&metadata).unwrap_or_else(|_| "{}".to_string());
        conn.execute(
            "UPDATE memories SET metadata_json = ?1, updated_at = ?2 WHERE content_hash = ?3",
            params![metadata_json, now, content_hash],
        )?;

        Ok((true, "updated".to_string()))
    }

    async fn update_memories_batch(&self, memories: Vec<Memory>) -> Result<(u64, u64)> {
        let mut conn = self.conn.lock().expect("local store connection lock poisoned");
        let tx = conn.transaction()?;
        let mut ok = 0u64;
        let mut failed = 0u64;

        for memory in memories {
            let metadata_json = serde_json::to_string(&memory.metadata).unwrap_or_else(|_| "{}".to_string());
            let updated = tx.execute(
                "UPDATE memories SET metadata_json = ?1, updated_at = ?2, quality_score = ?3, memory_type = ?4 WHERE content_hash = ?5",
                params![metadata_json, memory.updated_at, memory.quality_score, memory.memory_type.as_str(), memory.content_hash],
            )?;
            if updated > 0 {
                tx.execute("DELETE FROM memory_tags WHERE content_hash = ?1", params![memory.content_hash])?;
                for tag in &memory.tags {
                    tx.execute(
                        "INSERT INTO memory_tags (content_hash, tag) VALUES (?1, ?2)",
                        params![memory.content_hash, tag],
                    )?;
                }
                ok += 1;
            } else {
                failed += 1;
            }
        }

        tx.commit()?;
        tracing::info!(ok, failed, "batch update committed");
        Ok((ok, failed))
    }

    async fn delete(&self, content_hash: &str) -> Result<(bool, String)> {
        let mut conn = self.conn.lock().expect("local store connection lock poisoned");
        let tx = conn.transaction()?;
        let deleted = tx.execute("DELETE FROM memories WHERE content_hash = ?1", params![content_hash])?;
        tx.execute("DELETE FROM memory_tags WHERE content_hash = ?1", params![content_hash])?;
        tx.execute("DELETE FROM memory_embeddings WHERE content_hash = ?1", params![content_hash])?;
        tx.commit()?;
        drop(conn);

        if deleted == 0 {
            return Ok((false, "not found".to_string()));
        }

        self.vector_index.lock().expect("vector index lock poisoned").remove(content_hash);
        Ok((true, "deleted".to_string()))
    }

    async fn delete_by_tags(&self, tags: Vec<String>) -> Result<(u64, Vec<String>)> {
        if tags.is_empty() {
            return Ok((0, vec![]));
        }
        let conn = self.conn.lock().expect("local store connection lock poisoned");
        let placeholders = tag_placeholders(&tags);
        let sql = format!(
            "SELECT DISTINCT content_hash FROM memory_tags WHERE tag IN ({placeholders})"
        );
        let mut stmt = conn.prepare(&sql)?;
        let params_refs: Vec<&dyn rusqlite::ToSql> = tags.iter().map(|t| t as &dyn rusqlite::ToSql).collect();
        let hashes: Vec<String> = stmt
            .query_map(params_refs.as_slice(), |row| row.get(0))?
            .filter_map(|r: rusqlite::Result<String>| r.ok())
            .collect();
        drop(stmt);
        drop(conn);

        let mut deleted = 0u64;
        let mut errors = Vec::new();
        for hash in hashes {
            match self.delete(&hash).await {
                Ok((true, _)) => deleted += 1,
                Ok((false, reason)) => errors.push(format!("{hash}: {reason}")),
                Err(e) => errors.push(format!("{hash}: {e}")),
            }
        }
        Ok((deleted, errors))
    }

    async fn delete_by_timeframe(&self, start: f64, end: f64) -> Result<(u64, Vec<String>)> {
        let hashes = {
            let conn = self.conn.lock().expect("local store connection lock poisoned");
            let mut stmt = conn.prepare("SELECT content_hash FROM memories WHERE created_at BETWEEN ?1 AND ?2")?;
            stmt.query_map(params![start, end], |row| row.get(0))?
                .filter_map(|r: rusqlite::Result<String>| r.ok())
                .collect::<Vec<_>>()
        };

        let mut deleted = 0u64;
        let mut errors = Vec::new();
        for hash in hashes {
            match self.delete(&hash).await {
                Ok((true, _)) => deleted += 1,
                Ok((false, reason)) => errors.push(format!("{hash}: {reason}")),
                Err(e) => errors.push(format!("{hash}: {e}")),
            }
        }
        Ok((deleted, errors))
    }

    async fn delete_before_date(&self, ts: f64) -> Result<(u64, Vec<String>)> {
        self.delete_by_timeframe(0.0, ts).await
    }

    async fn get_by_hash(&self, content_hash: &str) -> Result<Option<Memory>> {
        let conn = self.conn.lock().expect("local store connection lock poisoned");
        let row = conn
            .query_row(
                "SELECT content, memory_type, created_at, updated_at, metadata_json, quality_score
                 FROM memories WHERE content_hash = ?1",
                params![content_hash],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, f64>(2)?,
                        row.get::<_, f64>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, Option<f32>>(5)?,
                    ))
                },
            )
            .optional()?;

        match row {
            Some((content, memory_type, created_at, updated_at, metadata_json, quality_score)) => Ok(Some(
                self.row_to_memory(&conn, content_hash, content, memory_type, created_at, updated_at, metadata_json, quality_score)?,
            )),
            None => Ok(None),
        }
    }

    async fn get_all_memories(
        &self,
        limit: u64,
        offset: u64,
        memory_type: Option<&str>,
        tags: Option<&[String]>,
    ) -> Result<Vec<Memory>> {
        let conn = self.conn.lock().expect("local store connection lock poisoned");
        let mut sql = String::from(
            "SELECT DISTINCT m.content_hash, m.content, m.memory_type, m.created_at, m.updated_at, m.metadata_json, m.quality_score
             FROM memories m",
        );
        let mut conditions = Vec::new();
        let mut args: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(tags) = tags {
            if !tags.is_empty() {
                sql.push_str(" JOIN memory_tags t ON t.content_hash = m.content_hash");
                let placeholders = tag_placeholders(tags);
                conditions.push(format!("t.tag IN ({placeholders})"));
                for tag in tags {
                    args.push(Box::new(tag.clone()));
                }
            }
        }
        if let Some(mt) = memory_type {
            conditions.push("m.memory_type = ?".to_string());
            args.push(Box::new(mt.to_string()));
        }
        if !conditions.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&conditions.join(" AND "));
        }
        sql.push_str(" ORDER BY m.created_at DESC LIMIT ? OFFSET ?");
        args.push(Box::new(limit as i64));
        args.push(Box::new(offset as i64));

        let mut stmt = conn.prepare(&sql)?;
        let args_refs: Vec<&dyn rusqlite::ToSql> = args.iter().map(|a| a.as_ref()).collect();
        let rows: Vec<(String, String, String, f64, f64, String, Option<f32>)> = stmt
            .query_map(args_refs.as_slice(), |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                    row.get(5)?,
                    row.get(6)?,
                ))
            })?
            .filter_map(|r| r.ok())
            .collect();
        drop(stmt);

        rows.into_iter()
            .map(|(hash, content, mt, created_at, updated_at, metadata_json, quality_score)| {
                self.row_to_memory(&conn, &hash, content, mt, created_at, updated_at, metadata_json, quality_score)
            })
            .collect()
    }

    async fn get_recent_memories(&self, n: u64) -> Result<Vec<Memory>> {
        self.get_all_memories(n, 0, None, None).await
    }

    async fn get_memory_timestamps(&self) -> Result<Vec<(String, f64)>> {
        let conn = self.conn.lock().expect("local store connection lock poisoned");
        let mut stmt = conn.prepare("SELECT content_hash, created_at FROM memories")?;
        let rows = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .filter_map(|r: rusqlite::Result<(String, f64)>| r.ok())
            .collect();
        Ok(rows)
    }

    async fn get_largest_memories(&self, n: u64) -> Result<Vec<Memory>> {
        let conn = self.conn.lock().expect("local store connection lock poisoned");
        let mut stmt = conn.prepare(
            "SELECT content_hash, content, memory_type, created_at, updated_at, metadata_json, quality_score
             FROM memories ORDER BY LENGTH(content) DESC LIMIT ?1",
        )?;
        let rows: Vec<(String, String, String, f64, f64, String, Option<f32>)> = stmt
            .query_map(params![n as i64], |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                    row.get(5)?,
                    row.get(6)?,
                ))
            })?
            .filter_map(|r| r.ok())
            .collect();
        drop(stmt);

        rows.into_iter()
            .map(|(hash, content, mt, created_at, updated_at, metadata_json, quality_score)| {
                self.row_to_memory(&conn, &hash, content, mt, created_at, updated_at, metadata_json, quality_score)
            })
            .collect()
    }

    async fn count_all_memories(&self, memory_type: Option<&str>, tags: Option<&[String]>) -> Result<u64> {
        let conn = self.conn.lock().expect("local store connection lock poisoned");
        let mut sql = String::from("SELECT COUNT(DISTINCT m.content_hash) FROM memories m");
        let mut conditions = Vec::new();
        let mut args: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(tags) = tags {
            if !tags.is_empty() {
                sql.push_str(" JOIN memory_tags t ON t.content_hash = m.content_hash");
                let placeholders = tag_placeholders(tags);
                conditions.push(format!("t.tag IN ({placeholders})"));
                for tag in tags {
                    args.push(Box::new(tag.clone()));
                }
            }
        }
        if let Some(mt) = memory_type {
            conditions.push("m.memory_type = ?".to_string());
            args.push(Box::new(mt.to_string()));
        }
        if !conditions.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&conditions.join(" AND "));
        }

        let args_refs: Vec<&dyn rusqlite::ToSql> = args.iter().map(|a| a.as_ref()).collect();
        let count: i64 = conn.query_row(&sql, args_refs.as_slice(), |row| row.get(0))?;
        Ok(count as u64)
    }

    async fn retrieve(
        &self,
        query: &str,
        n: u64,
        similarity_threshold: Option<f32>,
        time_start: Option<f64>,
        time_end: Option<f64>,
    ) -> Result<Vec<MemoryQueryResult>> {
        let query_vector = self.embedder.embed(query).await?;
        let threshold = similarity_threshold.unwrap_or(0.0);

        let candidates = {
            let index = self.vector_index.lock().expect("vector index lock poisoned");
            index.search(&query_vector, (n as usize).saturating_mul(4).max(20))?
        };

        let mut results = Vec::with_capacity(candidates.len());
        for (hash, distance) in candidates {
            let similarity = 1.0 - (distance / 2.0);
            if similarity < threshold {
                continue;
            }
            let Some(memory) = self.get_by_hash(&hash).await? else {
                continue;
            };
            if memory.memory_type == MemoryType::Archived {
                continue; // excluded from default search (P11)
            }
            if time_start.is_some_and(|s| memory.created_at < s) {
                continue;
            }
            if time_end.is_some_and(|e| memory.created_at > e) {
                continue;
            }
            results.push(MemoryQueryResult {
                memory,
                similarity_score: similarity,
                distance,
            });
        }

        results.sort_by(|a, b| b.similarity_score.partial_cmp(&a.similarity_score).unwrap_or(std::cmp::Ordering::Equal));
        results.truncate(n as usize);
        Ok(results)
    }

    async fn search_by_tag(&self, tags: &[String], match_all: bool, time_start: Option<f64>) -> Result<Vec<Memory>> {
        if tags.is_empty() {
            return Ok(vec![]);
        }
        let conn = self.conn.lock().expect("local store connection lock poisoned");
        let placeholders = tag_placeholders(tags);
        let mut sql = format!(
            "SELECT m.content_hash, m.content, m.memory_type, m.created_at, m.updated_at, m.metadata_json, m.quality_score
             FROM memories m JOIN memory_tags t ON t.content_hash = m.content_hash
             WHERE t.tag IN ({placeholders})"
        );
        if let Some(start) = time_start {
            sql.push_str(&format!(" AND m.created_at >= {start}"));
        }
        if match_all {
            sql.push_str(&format!(
                " GROUP BY m.content_hash HAVING COUNT(DISTINCT t.tag) = {}",
                tags.len()
            ));
        } else {
            sql.push_str(" GROUP BY m.content_hash");
        }
        sql.push_str(" ORDER BY m.created_at DESC");

        let mut stmt = conn.prepare(&sql)?;
        let params_refs: Vec<&dyn rusqlite::ToSql> = tags.iter().map(|t| t as &dyn rusqlite::ToSql).collect();
        let rows: Vec<(String, String, String, f64, f64, String, Option<f32>)> = stmt
            .query_map(params_refs.as_slice(), |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                    row.get(5)?,
                    row.get(6)?,
                ))
            })?
            .filter_map(|r| r.ok())
            .collect();
        drop(stmt);

        rows.into_iter()
            .map(|(hash, content, mt, created_at, updated_at, metadata_json, quality_score)| {
                self.row_to_memory(&conn, &hash, content, mt, created_at, updated_at, metadata_json, quality_score)
            })
            .collect()
    }

    async fn get_all_tags(&self) -> Result<Vec<String>> {
        let conn = self.conn.lock().expect("local store connection lock poisoned");
        let mut stmt = conn.prepare("SELECT DISTINCT tag FROM memory_tags ORDER BY tag")?;
        let tags = stmt
            .query_map([], |row| row.get(0))?
            .filter_map(|r: rusqlite::Result<String>| r.ok())
            .collect();
        Ok(tags)
    }

    async fn get_stats(&self) -> Result<Stats> {
        let conn = self.conn.lock().expect("local store connection lock poisoned");
        let memory_count: i64 = conn.query_row("SELECT COUNT(*) FROM memories", [], |r| r.get(0))?;
        let unique_tags: i64 = conn.query_row("SELECT COUNT(DISTINCT tag) FROM memory_tags", [], |r| r.get(0))?;
        let week_ago = now_unix() - 7.0 * 86400.0;
        let memories_this_week: i64 = conn.query_row(
            "SELECT COUNT(*) FROM memories WHERE created_at >= ?1",
            params![week_ago],
            |r| r.get(0),
        )?;

        let db_size_bytes = self
            .db_path
            .as_ref()
            .and_then(|p| std::fs::metadata(p).ok())
            .map(|m| m.len())
            .unwrap_or(0);

        Ok(Stats {
            backend: "local".to_string(),
            memory_count: memory_count as u64,
            unique_tags: unique_tags as u64,
            memories_this_week: memories_this_week as u64,
            database_size_bytes: db_size_bytes,
            database_size_mb: db_size_bytes as f64 / (1024.0 * 1024.0),
            embedding_model: "nomic-ai/nomic-embed-text-v1.5".to_string(),
            embedding_dimension: self.embedder.dimensions(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::EmbeddingError;

    struct StubEmbedder;

    #[async_trait]
    impl EmbeddingProvider for StubEmbedder {
        fn dimensions(&self) -> usize {
            4
        }

        async fn embed(&self, text: &str) -> std::result::Result<Vec<f32>, EmbeddingError> {
            let seed = text.bytes().map(|b| b as f32).sum::<f32>();
            let v = vec![seed, seed / 2.0, seed / 3.0, 1.0];
            Ok(crate::embeddings::matryoshka_truncate(v, 4))
        }
    }

    fn store() -> LocalStore {
        LocalStore::in_memory(Arc::new(StubEmbedder)).unwrap()
    }

    #[tokio::test]
    async fn store_then_get_by_hash_round_trips_content() {
        let store = store();
        let memory = Memory::new("hello world".into(), vec!["greeting".into()], MemoryType::Note, Default::default()).unwrap();
        let hash = memory.content_hash.clone();
        let (ok, _) = store.store(memory).await.unwrap();
        assert!(ok);

        let fetched = store.get_by_hash(&hash).await.unwrap().unwrap();
        assert_eq!(fetched.content, "hello world");
        assert_eq!(fetched.tags, vec!["greeting".to_string()]);
    }

    #[tokio::test]
    async fn duplicate_store_is_a_no_op_with_warning() {
        let store = store();
        let memory = Memory::new("hello world".into(), vec!["greeting".into()], MemoryType::Note, Default::default()).unwrap();
        let memory2 = Memory::new("hello world".into(), vec!["greeting".into(), "dup".into()], MemoryType::Note, Default::default()).unwrap();
        let hash = memory.content_hash.clone();

        store.store(memory).await.unwrap();
        let (ok, reason) = store.store(memory2).await.unwrap();
        assert!(!ok);
        assert_eq!(reason, "duplicate");

        let fetched = store.get_by_hash(&hash).await.unwrap().unwrap();
        assert_eq!(fetched.tags, vec!["greeting".to_string()]);
    }

    #[tokio::test]
    async fn delete_nonexistent_hash_is_not_an_error() {
        let store = store();
        let (ok, reason) = store.delete("does-not-exist").await.unwrap();
        assert!(!ok);
        assert_eq!(reason, "not found");
    }

    #[tokio::test]
    async fn retrieve_excludes_archived_memories() {
        let store = store();
        let mut memory = Memory::new("archived content".into(), vec![], MemoryType::Archived, Default::default()).unwrap();
        memory.embedding = Some(vec![1.0, 0.5, 0.33, 1.0]);
        store.store(memory).await.unwrap();

        let results = store.retrieve("archived content", 10, Some(-1.0), None, None).await.unwrap();
        assert!(results.is_empty());
    }
}
