//! Postgres + pgvector backend.

use std::collections::BTreeMap;

use anyhow::{anyhow, Context, Result};
use pgvector::Vector;
use tokio::runtime::Handle;
use tokio_postgres::{Client, NoTls, Row};
use tracing::{error, info};

use super::{DistanceMetric, StoredVector, VectorHit, VectorStore};
use crate::records::{filename_from_path, split_chunk_key};

/// Fully-qualified Postgres table name (schema + table).
#[derive(Debug, Clone)]
pub struct TableName {
    schema: String,
    table: String,
}

impl TableName {
    /// Builds a new table identifier.
    pub fn new<S, T>(schema: S, table: T) -> Result<Self>
    where
        S: Into<String>,
        T: Into<String>,
    {
        let schema = schema.into();
        let table = table.into();
        anyhow::ensure!(!schema.trim().is_empty(), "schema name is required");
        anyhow::ensure!(!table.trim().is_empty(), "table name is required");
        Ok(Self { schema, table })
    }

    /// Fully-qualified table reference with quoted identifiers.
    pub fn qualified(&self) -> String {
        format!("{}.{}", quote_ident(&self.schema), quote_ident(&self.table))
    }

    /// Raw table string.
    pub fn table(&self) -> &str {
        &self.table
    }
}

/// Quotes Postgres identifiers, escaping embedded quotes.
pub fn quote_ident(input: &str) -> String {
    let escaped = input.replace('"', "\"\"");
    format!("\"{}\"", escaped)
}

/// Chunk table queried through pgvector distance operators.
///
/// Construction is async; [`VectorStore::query`] blocks on the runtime captured at connect
/// time and must be called from outside that runtime's worker threads (for example inside
/// `spawn_blocking`).
pub struct PgVectorStore {
    client: Client,
    runtime: Handle,
    table: TableName,
    metric: DistanceMetric,
    query_sql: String,
    count_sql: String,
    sample_sql: String,
}

impl PgVectorStore {
    /// Connects and spawns the connection driver on the current runtime.
    pub async fn connect(database_url: &str, table: TableName, metric: DistanceMetric) -> Result<Self> {
        let (client, connection) = tokio_postgres::connect(database_url, NoTls)
            .await
            .with_context(|| format!("failed to connect to Postgres for {}", table.qualified()))?;
        tokio::spawn(async move {
            if let Err(err) = connection.await {
                error!(error = %err, "postgres connection error");
            }
        });
        Ok(Self {
            client,
            runtime: Handle::current(),
            query_sql: select_sql(&table, metric),
            count_sql: format!("SELECT COUNT(*) FROM {}", table.qualified()),
            sample_sql: sample_sql(&table),
            table,
            metric,
        })
    }

    /// Creates the pgvector extension and the chunk table when missing.
    pub async fn prepare(&self, dims: usize) -> Result<()> {
        anyhow::ensure!(dims > 0, "embedding dimension must be positive");
        self.client
            .execute("CREATE EXTENSION IF NOT EXISTS vector", &[])
            .await
            .context("failed to ensure pgvector extension")?;
        self.client
            .execute(&create_table_sql(&self.table, dims), &[])
            .await
            .context("failed to create pgvector table")?;
        info!(table = %self.table.qualified(), dims, "pgvector table ready");
        Ok(())
    }

    /// Inserts one batch inside a transaction, replacing rows with the same id.
    pub async fn upsert(&mut self, records: &[StoredVector]) -> Result<usize> {
        if records.is_empty() {
            return Ok(0);
        }
        let sql = upsert_sql(&self.table);
        let transaction = self.client.transaction().await?;
        let statement = transaction.prepare(&sql).await?;
        for record in records {
            let row = RowValues::from_record(record)?;
            let vector = Vector::from(record.embedding.clone());
            transaction
                .execute(
                    &statement,
                    &[
                        &record.id,
                        &row.file_path,
                        &row.filename,
                        &row.chunk_index,
                        &record.document,
                        &vector,
                    ],
                )
                .await
                .with_context(|| format!("failed to upsert chunk {}", record.id))?;
        }
        transaction.commit().await?;
        Ok(records.len())
    }

    async fn query_rows(&self, embedding: &[f32], k: usize) -> Result<Vec<VectorHit>> {
        if k == 0 {
            return Ok(Vec::new());
        }
        let limit = i64::try_from(k).map_err(|_| anyhow!("k {} exceeds i64 range", k))?;
        let vector = Vector::from(embedding.to_vec());
        let rows = self
            .client
            .query(self.query_sql.as_str(), &[&vector, &limit])
            .await
            .with_context(|| format!("similarity query on {} failed", self.table.qualified()))?;
        rows.iter().map(hit_from_row).collect()
    }

    async fn count_rows(&self) -> Result<usize> {
        let row = self
            .client
            .query_one(self.count_sql.as_str(), &[])
            .await
            .with_context(|| format!("count on {} failed", self.table.qualified()))?;
        let count: i64 = row.get(0);
        usize::try_from(count).map_err(|_| anyhow!("negative row count {}", count))
    }

    async fn sample_rows(&self, limit: usize) -> Result<Vec<StoredVector>> {
        let limit = i64::try_from(limit).map_err(|_| anyhow!("limit {} exceeds i64 range", limit))?;
        let rows = self
            .client
            .query(self.sample_sql.as_str(), &[&limit])
            .await
            .with_context(|| format!("sampling {} failed", self.table.qualified()))?;
        rows.iter().map(record_from_row).collect()
    }
}

impl VectorStore for PgVectorStore {
    fn query(&self, embedding: &[f32], k: usize) -> Result<Vec<VectorHit>> {
        self.runtime.block_on(self.query_rows(embedding, k))
    }

    fn count(&self) -> Result<usize> {
        self.runtime.block_on(self.count_rows())
    }

    fn describe(&self) -> String {
        format!("pgvector:{}", self.table.qualified())
    }

    fn metric(&self) -> DistanceMetric {
        self.metric
    }

    fn sample(&self, limit: usize) -> Result<Vec<StoredVector>> {
        self.runtime.block_on(self.sample_rows(limit))
    }
}

struct RowValues {
    file_path: String,
    filename: String,
    chunk_index: i64,
}

impl RowValues {
    // Metadata wins; the id is the fallback for both path and index.
    fn from_record(record: &StoredVector) -> Result<Self> {
        let (id_path, id_index) = split_chunk_key(&record.id);
        let file_path = record
            .metadata
            .get("file_path")
            .cloned()
            .unwrap_or_else(|| id_path.to_string());
        let filename = record
            .metadata
            .get("filename")
            .filter(|name| !name.is_empty())
            .cloned()
            .unwrap_or_else(|| filename_from_path(&file_path));
        let raw_index = record
            .metadata
            .get("chunk_index")
            .map(String::as_str)
            .unwrap_or(id_index);
        let chunk_index = raw_index
            .trim()
            .parse::<i64>()
            .with_context(|| format!("record {} has non-numeric chunk_index {raw_index:?}", record.id))?;
        Ok(Self {
            file_path,
            filename,
            chunk_index,
        })
    }
}

fn hit_from_row(row: &Row) -> Result<VectorHit> {
    let id: String = row.try_get("id")?;
    let file_path: String = row.try_get("file_path")?;
    let filename: String = row.try_get("filename")?;
    let chunk_index: i64 = row.try_get("chunk_index")?;
    let text: Option<String> = row.try_get("text")?;
    let distance: f64 = row.try_get("distance")?;
    let mut metadata = BTreeMap::new();
    metadata.insert("file_path".to_string(), file_path);
    metadata.insert("filename".to_string(), filename);
    metadata.insert("chunk_index".to_string(), chunk_index.to_string());
    Ok(VectorHit {
        id,
        text,
        metadata,
        distance,
    })
}

fn record_from_row(row: &Row) -> Result<StoredVector> {
    let embedding: Vector = row.try_get("embedding")?;
    let chunk_index: i64 = row.try_get("chunk_index")?;
    let mut metadata = BTreeMap::new();
    metadata.insert("file_path".to_string(), row.try_get::<_, String>("file_path")?);
    metadata.insert("filename".to_string(), row.try_get::<_, String>("filename")?);
    metadata.insert("chunk_index".to_string(), chunk_index.to_string());
    Ok(StoredVector {
        id: row.try_get("id")?,
        embedding: embedding.to_vec(),
        document: row.try_get("text")?,
        metadata,
    })
}

fn distance_expr(metric: DistanceMetric) -> &'static str {
    match metric {
        DistanceMetric::Cosine => "embedding <=> $1",
        DistanceMetric::L2 => "embedding <-> $1",
        // `<#>` yields the negated inner product.
        DistanceMetric::InnerProduct => "1 + (embedding <#> $1)",
    }
}

fn order_expr(metric: DistanceMetric) -> &'static str {
    match metric {
        DistanceMetric::Cosine => "embedding <=> $1",
        DistanceMetric::L2 => "embedding <-> $1",
        DistanceMetric::InnerProduct => "embedding <#> $1",
    }
}

fn select_sql(table: &TableName, metric: DistanceMetric) -> String {
    format!(
        "SELECT \
            id, \
            file_path, \
            filename, \
            chunk_index, \
            text, \
            {} AS distance \
        FROM {} \
        ORDER BY {} ASC \
        LIMIT $2",
        distance_expr(metric),
        table.qualified(),
        order_expr(metric)
    )
}

fn sample_sql(table: &TableName) -> String {
    format!(
        "SELECT id, file_path, filename, chunk_index, text, embedding \
        FROM {} \
        ORDER BY file_path, chunk_index \
        LIMIT $1",
        table.qualified()
    )
}

fn create_table_sql(table: &TableName, dims: usize) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {} (
            id TEXT PRIMARY KEY,
            file_path TEXT NOT NULL,
            filename TEXT NOT NULL,
            chunk_index BIGINT NOT NULL,
            text TEXT,
            embedding VECTOR({dims}) NOT NULL
        )",
        table.qualified()
    )
}

fn upsert_sql(table: &TableName) -> String {
    format!(
        "INSERT INTO {} (id, file_path, filename, chunk_index, text, embedding) \
            VALUES ($1, $2, $3, $4, $5, $6) \
            ON CONFLICT (id) DO UPDATE SET \
                file_path = EXCLUDED.file_path, \
                filename = EXCLUDED.filename, \
                chunk_index = EXCLUDED.chunk_index, \
                text = EXCLUDED.text, \
                embedding = EXCLUDED.embedding",
        table.qualified()
    )
}
