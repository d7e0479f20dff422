//! SQLite-based storage implementation.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, Once};
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use tracing::{debug, info, warn};

use rag_core::protocol::{check_dimension, check_embedder_dimension, project_metadata, resolve_record, Record};
use rag_core::{
    DuplicatePolicy, Embedder, Metadata, RagError, Result, RetrievedDoc, StoreConfig,
    StoreDescriptor, VectorStore,
};

use crate::schema::{documents_schema, validate_table_name, vec_schema, REGISTRY_SCHEMA, SCHEMA_VERSION};

/// Largest `k` sqlite-vec accepts in a KNN query.
const MAX_KNN: usize = 4096;

static VEC_INIT: Once = Once::new();

/// Register sqlite-vec for every connection opened by this process.
fn register_vec_extension() {
    VEC_INIT.call_once(|| unsafe {
        rusqlite::ffi::sqlite3_auto_extension(Some(std::mem::transmute(
            sqlite_vec::sqlite3_vec_init as *const (),
        )));
    });
}

/// SQLite store backed by the sqlite-vec `vec0` virtual table.
///
/// One collection maps to a documents table `{table}` and a vector table
/// `{table}_vec`; several collections can share a database file.
///
/// All operations go through a single connection behind a blocking mutex,
/// so concurrent callers are served one at a time. Use a connection pool if
/// throughput matters.
pub struct SqliteStore {
    /// `None` once the store is closed.
    conn: Mutex<Option<Connection>>,

    table: String,
    dimension: usize,
    duplicates: DuplicatePolicy,
    embedder: Arc<dyn Embedder>,
}

impl SqliteStore {
    /// Open or create a database at the given path.
    pub fn open(
        path: impl AsRef<Path>,
        table: &str,
        dimension: usize,
        embedder: Arc<dyn Embedder>,
    ) -> Result<Self> {
        let path = path.as_ref();

        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        register_vec_extension();
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|e| RagError::connection(format!("Failed to open database: {}", e)))?;

        Self::init(conn, path, table, dimension, embedder)
    }

    /// Open an in-memory database (for testing).
    pub fn open_memory(table: &str, dimension: usize, embedder: Arc<dyn Embedder>) -> Result<Self> {
        register_vec_extension();
        let conn = Connection::open_in_memory()
            .map_err(|e| RagError::connection(format!("Failed to open in-memory database: {}", e)))?;

        Self::init(conn, Path::new(":memory:"), table, dimension, embedder)
    }

    /// Open the store described by `config`.
    pub fn from_config(config: &StoreConfig, embedder: Arc<dyn Embedder>) -> Result<Self> {
        Ok(
            Self::open(&config.path, &config.collection, config.dimension, embedder)?
                .with_duplicate_policy(config.duplicates),
        )
    }

    /// Set how re-indexing an existing id is handled.
    pub fn with_duplicate_policy(mut self, duplicates: DuplicatePolicy) -> Self {
        self.duplicates = duplicates;
        self
    }

    fn init(
        conn: Connection,
        path: &Path,
        table: &str,
        dimension: usize,
        embedder: Arc<dyn Embedder>,
    ) -> Result<Self> {
        validate_table_name(table)?;
        check_embedder_dimension(&*embedder, dimension)?;

        Self::configure_connection(&conn)?;

        let version: String = conn
            .query_row("SELECT vec_version()", [], |row| row.get(0))
            .map_err(|e| RagError::schema(format!("sqlite-vec extension not available: {}", e)))?;
        debug!("sqlite-vec {} loaded", version);

        Self::bootstrap(&conn, table, dimension)?;

        info!(
            "Database opened at {:?} (table: {}, dim: {})",
            path, table, dimension
        );

        Ok(Self {
            conn: Mutex::new(Some(conn)),
            table: table.to_string(),
            dimension,
            duplicates: DuplicatePolicy::default(),
            embedder,
        })
    }

    /// Configure SQLite connection for optimal performance.
    fn configure_connection(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA cache_size = -64000;
            PRAGMA busy_timeout = 30000;
            PRAGMA temp_store = MEMORY;
            "#,
        )
        .map_err(|e| RagError::connection(format!("Failed to configure connection: {}", e)))?;

        Ok(())
    }

    /// Create the collection tables, or check an existing collection's dimension.
    fn bootstrap(conn: &Connection, table: &str, dimension: usize) -> Result<()> {
        conn.execute_batch(REGISTRY_SCHEMA)
            .map_err(|e| RagError::schema(format!("Failed to initialize schema: {}", e)))?;

        let existing: Option<i64> = conn
            .query_row(
                "SELECT dimension FROM rag_collections WHERE name = ?1",
                params![table],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| RagError::schema(e.to_string()))?;

        match existing {
            Some(existing) if existing as usize != dimension => {
                return Err(RagError::schema(format!(
                    "table {} holds {}-dimensional vectors, store expects {}",
                    table, existing, dimension
                )));
            }
            Some(_) => debug!("Reusing table {}", table),
            None => {
                conn.execute_batch(&documents_schema(table))
                    .map_err(|e| RagError::schema(format!("Failed to create table {}: {}", table, e)))?;
                conn.execute_batch(&vec_schema(table, dimension))
                    .map_err(|e| RagError::schema(format!("Failed to create vec table: {}", e)))?;
                conn.execute(
                    "INSERT INTO rag_collections (name, dimension, schema_version) VALUES (?1, ?2, ?3)",
                    params![table, dimension as i64, SCHEMA_VERSION],
                )
                .map_err(|e| RagError::schema(e.to_string()))?;
                info!("Created table {} ({} dimensions)", table, dimension);
            }
        }

        Ok(())
    }

    /// Number of documents in the collection.
    pub async fn count(&self) -> Result<usize> {
        let sql = format!("SELECT COUNT(*) FROM {}", self.table);
        self.with_conn(|conn| {
            let count: i64 = conn
                .query_row(&sql, [], |row| row.get(0))
                .map_err(|e| RagError::database(e.to_string()))?;
            Ok(count as usize)
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Option<Connection>>> {
        self.conn.lock().map_err(|e| RagError::database(e.to_string()))
    }

    /// Execute a blocking operation on the connection.
    fn with_conn<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&Connection) -> Result<R>,
    {
        let guard = self.lock()?;
        let conn = guard.as_ref().ok_or(RagError::Closed)?;
        f(conn)
    }

    /// Execute a mutable blocking operation on the connection.
    fn with_conn_mut<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&mut Connection) -> Result<R>,
    {
        let mut guard = self.lock()?;
        let conn = guard.as_mut().ok_or(RagError::Closed)?;
        f(conn)
    }

    /// Persist one record in its own transaction.
    fn write_record(&self, record: &Record) -> Result<()> {
        let metadata = serde_json::to_string(&record.metadata)?;
        let embedding = vec_to_bytes(&record.vector);
        let created_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);
        let table = &self.table;
        let duplicates = self.duplicates;

        self.with_conn_mut(|conn| {
            let tx = conn
                .transaction()
                .map_err(|e| RagError::database(e.to_string()))?;

            if duplicates == DuplicatePolicy::Reject {
                let found: Option<i64> = tx
                    .query_row(
                        &format!("SELECT 1 FROM {} WHERE id = ?1", table),
                        params![record.id],
                        |row| row.get(0),
                    )
                    .optional()
                    .map_err(|e| RagError::database(e.to_string()))?;
                if found.is_some() {
                    return Err(RagError::DuplicateId {
                        id: record.id.clone(),
                    });
                }
            }

            tx.execute(
                &format!(
                    "INSERT INTO {} (id, text, metadata, created_at) VALUES (?1, ?2, ?3, ?4)
                     ON CONFLICT(id) DO UPDATE SET
                        text = excluded.text,
                        metadata = excluded.metadata,
                        created_at = excluded.created_at",
                    table
                ),
                params![record.id, record.text, metadata, created_at],
            )
            .map_err(|e| RagError::database(e.to_string()))?;

            // vec0 has no upsert
            tx.execute(
                &format!("DELETE FROM {}_vec WHERE id = ?1", table),
                params![record.id],
            )
            .map_err(|e| RagError::database(e.to_string()))?;
            tx.execute(
                &format!("INSERT INTO {}_vec (id, embedding) VALUES (?1, ?2)", table),
                params![record.id, embedding],
            )
            .map_err(|e| RagError::database(e.to_string()))?;

            tx.commit().map_err(|e| RagError::database(e.to_string()))
        })
    }
}

#[async_trait]
impl VectorStore for SqliteStore {
    async fn index(&self, docs: Vec<rag_core::Document>) -> Result<Vec<String>> {
        let total = docs.len();
        let mut ids = Vec::with_capacity(total);

        for doc in docs {
            let record = match resolve_record(doc, &*self.embedder, self.dimension).await {
                Ok(record) => record,
                Err(e) => return Err(RagError::after_partial_write(ids, e)),
            };
            if let Err(e) = self.write_record(&record) {
                return Err(RagError::after_partial_write(ids, e));
            }
            ids.push(record.id);
        }

        debug!("Indexed {} documents into {}", total, self.table);
        Ok(ids)
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let table = &self.table;
        self.with_conn_mut(|conn| {
            let tx = conn
                .transaction()
                .map_err(|e| RagError::database(e.to_string()))?;
            tx.execute(&format!("DELETE FROM {}_vec WHERE id = ?1", table), params![id])
                .map_err(|e| RagError::database(e.to_string()))?;
            let removed = tx
                .execute(&format!("DELETE FROM {} WHERE id = ?1", table), params![id])
                .map_err(|e| RagError::database(e.to_string()))?;
            tx.commit().map_err(|e| RagError::database(e.to_string()))?;

            if removed == 0 {
                debug!("Delete of missing document {} in {}", id, table);
            }
            Ok(())
        })
    }

    async fn exists(&self, id: &str) -> Result<bool> {
        let sql = format!("SELECT 1 FROM {} WHERE id = ?1", self.table);
        self.with_conn(|conn| {
            let found: Option<i64> = conn
                .query_row(&sql, params![id], |row| row.get(0))
                .optional()
                .map_err(|e| RagError::database(e.to_string()))?;
            Ok(found.is_some())
        })
    }

    async fn retrieve(
        &self,
        vector: &[f32],
        top_k: usize,
        fields: &[&str],
    ) -> Result<Vec<RetrievedDoc>> {
        check_dimension(self.dimension, vector)?;

        let k = if top_k > MAX_KNN {
            warn!("top_k {} exceeds sqlite-vec limit, using {}", top_k, MAX_KNN);
            MAX_KNN
        } else {
            top_k
        };

        let embedding_bytes = vec_to_bytes(vector);
        let sql = format!(
            r#"
            WITH knn AS (
                SELECT id, embedding, distance
                FROM {table}_vec
                WHERE embedding MATCH ?1 AND k = ?2
            )
            SELECT d.id, d.text, d.metadata, knn.embedding, knn.distance
            FROM knn
            JOIN {table} d ON d.id = knn.id
            ORDER BY knn.distance
            "#,
            table = self.table
        );

        let rows = self.with_conn(|conn| {
            if k == 0 {
                return Ok(Vec::new());
            }

            let mut stmt = conn
                .prepare(&sql)
                .map_err(|e| RagError::database(e.to_string()))?;

            let rows = stmt
                .query_map(params![embedding_bytes, k as i64], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, Vec<u8>>(3)?,
                        row.get::<_, f64>(4)?,
                    ))
                })
                .map_err(|e| RagError::database(e.to_string()))?;

            let results: Vec<_> = rows
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| RagError::database(e.to_string()))?;

            Ok(results)
        })?;

        let results = rows
            .into_iter()
            .map(|(id, text, metadata, embedding, distance)| {
                let metadata: Metadata = serde_json::from_str(&metadata)?;
                Ok(RetrievedDoc {
                    id: Some(id),
                    text,
                    metadata: project_metadata(metadata, fields),
                    vector: bytes_to_vec(&embedding),
                    score: Some(1.0 - distance as f32),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        debug!("Retrieved {} documents from {}", results.len(), self.table);
        Ok(results)
    }

    async fn close(&self) -> Result<()> {
        let conn = self.lock()?.take();
        if let Some(conn) = conn {
            conn.close()
                .map_err(|(_, e)| RagError::database(format!("Failed to close database: {}", e)))?;
            info!("Closed table {}", self.table);
        }
        Ok(())
    }

    fn embedder(&self) -> Arc<dyn Embedder> {
        self.embedder.clone()
    }

    fn descriptor(&self) -> StoreDescriptor {
        StoreDescriptor {
            backend: "sqlite".to_string(),
            collection: self.table.clone(),
            dimension: self.dimension,
            embedder: self.embedder.descriptor(),
        }
    }
}

/// Convert f32 vector to bytes (little-endian).
fn vec_to_bytes(v: &[f32]) -> Vec<u8> {
    v.iter().flat_map(|f| f.to_le_bytes()).collect()
}

fn bytes_to_vec(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}
