use crate::chunking::{estimate_token_count, TextChunk};
use crate::config::{BackendKind, Config, QdrantConfig};
use crate::embeddings::Embedding;
use crate::error::{RagError, Result};
use arrow_array::builder::{FixedSizeListBuilder, Float32Builder};
use arrow_array::{
    Array, ArrayRef, Float32Array, RecordBatch, RecordBatchIterator, StringArray, UInt64Array,
};
use arrow_schema::{DataType, Field, Schema};
use futures::TryStreamExt;
use lancedb::query::{ExecutableQuery, QueryBase};
use lancedb::table::AddDataMode;
use lancedb::{connect, Connection, DistanceType, Table};
use log::{debug, info, warn};
use qdrant_client::qdrant::{
    CountPointsBuilder, CreateCollectionBuilder, Distance, PointStruct, SearchPointsBuilder,
    UpsertPointsBuilder, Value, VectorParamsBuilder,
};
use qdrant_client::Qdrant;
use std::collections::HashMap;
use std::fmt::Display;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::sync::RwLock;

const CHUNKS_TABLE: &str = "chunks";

/// A retrieved chunk and its similarity to the query
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub chunk: TextChunk,
    /// Cosine similarity, higher is closer
    pub score: f32,
}

/// The persisted set of (chunk, embedding) pairs.
///
/// Exactly one collection exists per store. `add` creates it on first use
/// and appends afterwards; `delete` destroys it until the next `add`.
#[allow(async_fn_in_trait)]
pub trait VectorStore {
    /// Whether a persisted, non-empty collection is present
    async fn exists(&self) -> Result<bool>;

    /// Open the persisted collection and return its chunk count.
    /// Fails with `NoVectorStore` when there is nothing to open.
    async fn open(&mut self) -> Result<usize>;

    /// Store chunks with their embeddings and return the new chunk count
    async fn add(&mut self, chunks: Vec<TextChunk>, embeddings: Vec<Embedding>) -> Result<usize>;

    /// Swap the whole collection for the given chunks
    async fn replace(
        &mut self,
        chunks: Vec<TextChunk>,
        embeddings: Vec<Embedding>,
    ) -> Result<usize> {
        check_batch(&chunks, &embeddings)?;
        self.delete().await?;
        self.add(chunks, embeddings).await
    }

    /// The `limit` chunks most similar to the query, closest first
    async fn search(&self, query: &Embedding, limit: usize) -> Result<Vec<SearchHit>>;

    async fn count(&self) -> Result<usize>;

    /// Irreversibly remove the whole collection
    async fn delete(&mut self) -> Result<()>;
}

fn store_error(e: impl Display) -> RagError {
    RagError::Store(e.to_string())
}

/// Validate a batch and return its embedding dimension
fn check_batch(chunks: &[TextChunk], embeddings: &[Embedding]) -> Result<usize> {
    if chunks.is_empty() {
        return Err(RagError::Store("no chunks to store".to_string()));
    }
    if chunks.len() != embeddings.len() {
        return Err(RagError::Store(format!(
            "{} chunks but {} embeddings",
            chunks.len(),
            embeddings.len()
        )));
    }

    let dimension = embeddings[0].dimension();
    if let Some(bad) = embeddings.iter().find(|e| e.dimension() != dimension) {
        return Err(RagError::Store(format!(
            "embedding dimension {} does not match batch dimension {}",
            bad.dimension(),
            dimension
        )));
    }
    Ok(dimension)
}

/// Collection kept as a LanceDB table in a local directory
pub struct LanceStore {
    db_path: PathBuf,
    /// Opened on first use
    connection: RwLock<Option<Connection>>,
}

impl LanceStore {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Self {
        LanceStore {
            db_path: db_path.as_ref().to_path_buf(),
            connection: RwLock::new(None),
        }
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    async fn connection(&self) -> Result<Connection> {
        {
            let conn = self.connection.read().await;
            if let Some(conn) = conn.as_ref() {
                return Ok(conn.clone());
            }
        }

        let mut conn = self.connection.write().await;
        if let Some(conn) = conn.as_ref() {
            return Ok(conn.clone());
        }

        let uri = self.db_path.to_string_lossy().to_string();
        let opened = connect(&uri).execute().await.map_err(|e| {
            RagError::Store(format!("failed to connect to LanceDB at {}: {}", uri, e))
        })?;
        *conn = Some(opened.clone());
        Ok(opened)
    }

    /// The chunks table, or `None` when nothing has been stored yet.
    /// Anything else in the directory is ignored.
    async fn chunks_table(&self) -> Result<Option<Table>> {
        match fs::metadata(&self.db_path).await {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => return Ok(None),
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        }

        let conn = self.connection().await?;
        let tables = conn.table_names().execute().await.map_err(|e| {
            RagError::Store(format!("failed to list tables: {}", e))
        })?;
        if !tables.iter().any(|name| name == CHUNKS_TABLE) {
            return Ok(None);
        }

        let table = conn
            .open_table(CHUNKS_TABLE)
            .execute()
            .await
            .map_err(|e| RagError::Store(format!("failed to open chunks table: {}", e)))?;
        Ok(Some(table))
    }

    /// Drop a chunks table that is listed but cannot be opened
    async fn discard_unreadable_table(&self) -> Result<()> {
        let dir = self.db_path.join(format!("{}.lance", CHUNKS_TABLE));
        match fs::remove_dir_all(&dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        warn!("Discarded unreadable table at {}", dir.display());
        Ok(())
    }

    async fn create_table(&self, batch: RecordBatch) -> Result<Table> {
        fs::create_dir_all(&self.db_path).await?;
        let conn = self.connection().await?;

        let schema = batch.schema();
        let batches = RecordBatchIterator::new(vec![Ok(batch)], schema);
        let table = conn
            .create_table(CHUNKS_TABLE, Box::new(batches))
            .execute()
            .await
            .map_err(|e| RagError::Store(format!("failed to create chunks table: {}", e)))?;

        info!("Created LanceDB table at {}", self.db_path.display());
        Ok(table)
    }
}

fn chunks_schema(dimension: usize) -> Schema {
    Schema::new(vec![
        Field::new("text", DataType::Utf8, false),
        Field::new("source", DataType::Utf8, false),
        Field::new("page", DataType::UInt64, true),
        Field::new("chunk_index", DataType::UInt64, false),
        Field::new("start_position", DataType::UInt64, false),
        Field::new(
            "vector",
            DataType::FixedSizeList(
                Arc::new(Field::new("item", DataType::Float32, true)),
                dimension as i32,
            ),
            false,
        ),
    ])
}

/// Convert chunks and their embeddings to an Arrow `RecordBatch`
fn chunks_to_batch(
    chunks: &[TextChunk],
    embeddings: &[Embedding],
    dimension: usize,
) -> Result<RecordBatch> {
    let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
    let sources: Vec<String> = chunks.iter().map(|c| c.source.clone()).collect();
    let pages: Vec<Option<u64>> = chunks.iter().map(|c| c.page.map(|p| p as u64)).collect();
    let indices: Vec<u64> = chunks.iter().map(|c| c.chunk_index as u64).collect();
    let positions: Vec<u64> = chunks.iter().map(|c| c.start_position as u64).collect();

    let mut vectors = FixedSizeListBuilder::new(Float32Builder::new(), dimension as i32);
    for embedding in embeddings {
        vectors.values().append_slice(&embedding.values);
        vectors.append(true);
    }

    let columns: Vec<ArrayRef> = vec![
        Arc::new(StringArray::from(texts)),
        Arc::new(StringArray::from(sources)),
        Arc::new(UInt64Array::from(pages)),
        Arc::new(UInt64Array::from(indices)),
        Arc::new(UInt64Array::from(positions)),
        Arc::new(vectors.finish()),
    ];

    RecordBatch::try_new(Arc::new(chunks_schema(dimension)), columns).map_err(store_error)
}

async fn table_dimension(table: &Table) -> Result<usize> {
    let schema = table.schema().await.map_err(store_error)?;
    match schema.field_with_name("vector").map(|f| f.data_type()) {
        Ok(DataType::FixedSizeList(_, size)) => Ok(*size as usize),
        _ => Err(RagError::Store(
            "chunks table has no fixed-size vector column".to_string(),
        )),
    }
}

fn column<'a, T: 'static>(batch: &'a RecordBatch, name: &str) -> Result<&'a T> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<T>())
        .ok_or_else(|| RagError::Store(format!("search result is missing column {}", name)))
}

fn batch_to_hits(batch: &RecordBatch) -> Result<Vec<SearchHit>> {
    let texts = column::<StringArray>(batch, "text")?;
    let sources = column::<StringArray>(batch, "source")?;
    let pages = column::<UInt64Array>(batch, "page")?;
    let indices = column::<UInt64Array>(batch, "chunk_index")?;
    let positions = column::<UInt64Array>(batch, "start_position")?;
    let distances = column::<Float32Array>(batch, "_distance")?;

    let hits = (0..batch.num_rows())
        .map(|i| {
            let text = texts.value(i).to_string();
            SearchHit {
                chunk: TextChunk {
                    token_count: estimate_token_count(&text),
                    text,
                    source: sources.value(i).to_string(),
                    page: (!pages.is_null(i)).then(|| pages.value(i) as usize),
                    chunk_index: indices.value(i) as usize,
                    start_position: positions.value(i) as usize,
                },
                // Cosine distance to similarity
                score: 1.0 - distances.value(i),
            }
        })
        .collect();

    Ok(hits)
}

impl VectorStore for LanceStore {
    async fn exists(&self) -> Result<bool> {
        match self.chunks_table().await {
            Ok(Some(table)) => Ok(table.count_rows(None).await.map_err(store_error)? > 0),
            Ok(None) => Ok(false),
            Err(e) => {
                warn!("Ignoring unreadable vector store: {}", e);
                Ok(false)
            }
        }
    }

    async fn open(&mut self) -> Result<usize> {
        let count = self.count().await?;
        if count == 0 {
            return Err(RagError::NoVectorStore);
        }

        info!("Loaded existing vector store with {} chunks", count);
        Ok(count)
    }

    async fn add(&mut self, chunks: Vec<TextChunk>, embeddings: Vec<Embedding>) -> Result<usize> {
        let dimension = check_batch(&chunks, &embeddings)?;
        let batch = chunks_to_batch(&chunks, &embeddings, dimension)?;

        let existing = match self.chunks_table().await {
            Ok(table) => table,
            Err(e) => {
                warn!("Replacing unreadable vector store: {}", e);
                self.discard_unreadable_table().await?;
                None
            }
        };

        let table = match existing {
            Some(table) => {
                let expected = table_dimension(&table).await?;
                if expected != dimension {
                    return Err(RagError::Store(format!(
                        "embedding dimension {} does not match collection dimension {}",
                        dimension, expected
                    )));
                }

                let schema = batch.schema();
                let batches = RecordBatchIterator::new(vec![Ok(batch)], schema);
                table
                    .add(Box::new(batches))
                    .execute()
                    .await
                    .map_err(|e| RagError::Store(format!("failed to insert chunks: {}", e)))?;
                table
            }
            None => self.create_table(batch).await?,
        };

        let count = table.count_rows(None).await.map_err(store_error)?;
        debug!("LanceDB table now holds {} chunks", count);
        Ok(count)
    }

    /// Overwrites in a single commit, so a failure keeps the old rows
    async fn replace(
        &mut self,
        chunks: Vec<TextChunk>,
        embeddings: Vec<Embedding>,
    ) -> Result<usize> {
        let dimension = check_batch(&chunks, &embeddings)?;

        if let Ok(Some(table)) = self.chunks_table().await {
            if table_dimension(&table).await? == dimension {
                let batch = chunks_to_batch(&chunks, &embeddings, dimension)?;
                let schema = batch.schema();
                let batches = RecordBatchIterator::new(vec![Ok(batch)], schema);
                table
                    .add(Box::new(batches))
                    .mode(AddDataMode::Overwrite)
                    .execute()
                    .await
                    .map_err(|e| RagError::Store(format!("failed to overwrite chunks: {}", e)))?;

                return table.count_rows(None).await.map_err(store_error);
            }
        }

        self.delete().await?;
        self.add(chunks, embeddings).await
    }

    async fn search(&self, query: &Embedding, limit: usize) -> Result<Vec<SearchHit>> {
        let table = self.chunks_table().await?.ok_or(RagError::NoVectorStore)?;

        let dimension = table_dimension(&table).await?;
        if query.dimension() != dimension {
            return Err(RagError::Store(format!(
                "query dimension {} does not match collection dimension {}",
                query.dimension(),
                dimension
            )));
        }

        let mut results = table
            .vector_search(query.values.clone())
            .map_err(|e| RagError::Store(format!("failed to create search query: {}", e)))?
            .distance_type(DistanceType::Cosine)
            .limit(limit)
            .execute()
            .await
            .map_err(|e| RagError::Store(format!("failed to execute search: {}", e)))?;

        let mut hits = Vec::new();
        while let Some(batch) = results.try_next().await.map_err(store_error)? {
            hits.extend(batch_to_hits(&batch)?);
        }
        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));

        Ok(hits)
    }

    async fn count(&self) -> Result<usize> {
        match self.chunks_table().await? {
            Some(table) => table.count_rows(None).await.map_err(store_error),
            None => Ok(0),
        }
    }

    async fn delete(&mut self) -> Result<()> {
        *self.connection.get_mut() = None;
        match fs::remove_dir_all(&self.db_path).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        fs::create_dir_all(&self.db_path).await?;
        info!("Deleted vector store at {}", self.db_path.display());
        Ok(())
    }
}

/// Client for a single Qdrant collection
pub struct QdrantStore {
    client: Qdrant,
    collection: String,
}

impl QdrantStore {
    /// Create a new Qdrant-backed store
    pub fn new(config: &QdrantConfig) -> Result<Self> {
        let config_builder = Qdrant::from_url(&config.url);
        let config_builder = if let Some(api_key) = &config.api_key {
            config_builder.api_key(api_key.clone())
        } else {
            config_builder
        };

        let client = config_builder.build().map_err(store_error)?;

        Ok(QdrantStore {
            client,
            collection: config.collection.clone(),
        })
    }

    async fn collection_exists(&self) -> Result<bool> {
        self.client
            .collection_exists(self.collection.clone())
            .await
            .map_err(|e| RagError::Store(format!("failed to check collection existence: {}", e)))
    }

    async fn create_collection(&self, dimension: usize) -> Result<()> {
        let create_collection = CreateCollectionBuilder::new(self.collection.clone())
            .vectors_config(VectorParamsBuilder::new(dimension as u64, Distance::Cosine));

        self.client
            .create_collection(create_collection)
            .await
            .map_err(|e| {
                RagError::Store(format!(
                    "failed to create collection {}: {}",
                    self.collection, e
                ))
            })?;

        info!("Created Qdrant collection {} ({} dims)", self.collection, dimension);
        Ok(())
    }
}

impl VectorStore for QdrantStore {
    async fn exists(&self) -> Result<bool> {
        Ok(self.collection_exists().await? && self.count().await? > 0)
    }

    async fn open(&mut self) -> Result<usize> {
        if !self.exists().await? {
            return Err(RagError::NoVectorStore);
        }
        self.count().await
    }

    async fn add(&mut self, chunks: Vec<TextChunk>, embeddings: Vec<Embedding>) -> Result<usize> {
        check_batch(&chunks, &embeddings)?;

        let first_id = if self.collection_exists().await? {
            self.count().await? as u64
        } else {
            self.create_collection(embeddings[0].dimension()).await?;
            0
        };

        let points: Vec<PointStruct> = chunks
            .into_iter()
            .zip(embeddings)
            .enumerate()
            .map(|(idx, (chunk, embedding))| {
                let mut payload: HashMap<String, Value> = HashMap::new();
                payload.insert("text".to_string(), chunk.text.into());
                payload.insert("source".to_string(), chunk.source.into());
                payload.insert("chunk_index".to_string(), (chunk.chunk_index as i64).into());
                payload.insert(
                    "start_position".to_string(),
                    (chunk.start_position as i64).into(),
                );
                if let Some(page) = chunk.page {
                    payload.insert("page".to_string(), (page as i64).into());
                }

                PointStruct::new(first_id + idx as u64, embedding.values, payload)
            })
            .collect();

        self.client
            .upsert_points(UpsertPointsBuilder::new(self.collection.clone(), points).wait(true))
            .await
            .map_err(|e| {
                RagError::Store(format!(
                    "failed to upsert points in collection {}: {}",
                    self.collection, e
                ))
            })?;

        self.count().await
    }

    async fn search(&self, query: &Embedding, limit: usize) -> Result<Vec<SearchHit>> {
        if !self.collection_exists().await? {
            return Err(RagError::NoVectorStore);
        }

        let search_response = self
            .client
            .search_points(
                SearchPointsBuilder::new(self.collection.clone(), query.values.clone(), limit as u64)
                    .with_payload(true),
            )
            .await
            .map_err(|e| {
                RagError::Store(format!(
                    "failed to search collection {}: {}",
                    self.collection, e
                ))
            })?;

        let hits = search_response
            .result
            .into_iter()
            .filter_map(|scored_point| {
                let payload = scored_point.payload;
                let text = payload.get("text")?.as_str()?.to_string();
                let source = payload
                    .get("source")
                    .and_then(|v| v.as_str())
                    .cloned()
                    .unwrap_or_default();
                let integer = |key: &str| {
                    payload
                        .get(key)
                        .and_then(|v| v.as_integer())
                        .map(|v| v as usize)
                };

                Some(SearchHit {
                    chunk: TextChunk {
                        token_count: estimate_token_count(&text),
                        text,
                        source,
                        page: integer("page"),
                        chunk_index: integer("chunk_index").unwrap_or(0),
                        start_position: integer("start_position").unwrap_or(0),
                    },
                    score: scored_point.score,
                })
            })
            .collect();

        Ok(hits)
    }

    async fn count(&self) -> Result<usize> {
        let response = self
            .client
            .count(CountPointsBuilder::new(self.collection.clone()).exact(true))
            .await
            .map_err(store_error)?;

        Ok(response.result.map(|r| r.count as usize).unwrap_or(0))
    }

    async fn delete(&mut self) -> Result<()> {
        if self.collection_exists().await? {
            self.client
                .delete_collection(self.collection.clone())
                .await
                .map_err(|e| {
                    RagError::Store(format!(
                        "failed to delete collection {}: {}",
                        self.collection, e
                    ))
                })?;
            info!("Deleted Qdrant collection {}", self.collection);
        }
        Ok(())
    }
}

/// The vector store backend selected by configuration
pub enum Store {
    Lance(LanceStore),
    Qdrant(QdrantStore),
}

impl Store {
    pub fn from_config(config: &Config) -> Result<Self> {
        match config.backend {
            BackendKind::Lance => Ok(Store::Lance(LanceStore::new(&config.store_dir))),
            BackendKind::Qdrant => Ok(Store::Qdrant(QdrantStore::new(&config.qdrant)?)),
        }
    }
}

impl VectorStore for Store {
    async fn exists(&self) -> Result<bool> {
        match self {
            Store::Lance(store) => store.exists().await,
            Store::Qdrant(store) => store.exists().await,
        }
    }

    async fn open(&mut self) -> Result<usize> {
        match self {
            Store::Lance(store) => store.open().await,
            Store::Qdrant(store) => store.open().await,
        }
    }

    async fn add(&mut self, chunks: Vec<TextChunk>, embeddings: Vec<Embedding>) -> Result<usize> {
        match self {
            Store::Lance(store) => store.add(chunks, embeddings).await,
            Store::Qdrant(store) => store.add(chunks, embeddings).await,
        }
    }

    async fn replace(
        &mut self,
        chunks: Vec<TextChunk>,
        embeddings: Vec<Embedding>,
    ) -> Result<usize> {
        match self {
            Store::Lance(store) => store.replace(chunks, embeddings).await,
            Store::Qdrant(store) => store.replace(chunks, embeddings).await,
        }
    }

    async fn search(&self, query: &Embedding, limit: usize) -> Result<Vec<SearchHit>> {
        match self {
            Store::Lance(store) => store.search(query, limit).await,
            Store::Qdrant(store) => store.search(query, limit).await,
        }
    }

    async fn count(&self) -> Result<usize> {
        match self {
            Store::Lance(store) => store.count().await,
            Store::Qdrant(store) => store.count().await,
        }
    }

    async fn delete(&mut self) -> Result<()> {
        match self {
            Store::Lance(store) => store.delete().await,
            Store::Qdrant(store) => store.delete().await,
        }
    }
}
