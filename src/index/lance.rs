//! LanceDB-backed vector index.
//!
//! All documents share one `chunk_vectors` table, filtered by `doc_key`. The
//! embedding strategy is stored per row and must be uniform within a key.

use crate::error::{Error, Result};
use crate::index::VectorIndex;
use crate::models::{Chunk, ScoredChunk};
use arrow_array::cast::AsArray;
use arrow_array::types::{Float32Type, Int32Type, Int64Type};
use arrow_array::{Array, RecordBatchIterator};
use async_trait::async_trait;
use futures::TryStreamExt;
use std::path::Path;
use std::sync::Arc;

const TABLE_NAME: &str = "chunk_vectors";
const EMBEDDING_DIM: i32 = 384;

/// Connect to the LanceDB dataset under `data_dir`.
pub async fn connect(data_dir: &Path) -> Result<lancedb::Connection> {
    std::fs::create_dir_all(data_dir).map_err(|e| Error::IndexCorrupt {
        key: String::new(),
        message: format!("cannot create index directory: {e}"),
    })?;
    let uri = data_dir.to_string_lossy().to_string();
    lancedb::connect(&uri)
        .execute()
        .await
        .map_err(|e| Error::IndexCorrupt {
            key: String::new(),
            message: e.to_string(),
        })
}

/// One document's view of the shared chunk vector table.
pub struct LanceIndex {
    table: lancedb::Table,
    doc_key: String,
    strategy: Option<String>,
}

impl LanceIndex {
    /// Open the shared table, creating it if needed, and load the stored
    /// strategy for this document key. A table that can neither be opened nor
    /// created is dropped and recreated.
    pub async fn open(connection: &lancedb::Connection, doc_key: &str) -> Result<Self> {
        let table = match connection.open_table(TABLE_NAME).execute().await {
            Ok(table) => table,
            Err(error) => {
                tracing::debug!(%error, "chunk_vectors table not openable, creating");
                match Self::create_empty_table(connection).await {
                    Ok(table) => table,
                    Err(error) => {
                        tracing::warn!(%error, "create failed, recovering from corrupted table");
                        if let Err(error) = connection.drop_table(TABLE_NAME, &[]).await {
                            tracing::warn!(%error, "drop_table failed during recovery");
                        }
                        Self::create_empty_table(connection).await?
                    }
                }
            }
        };

        let mut index = Self {
            table,
            doc_key: doc_key.to_string(),
            strategy: None,
        };
        index.strategy = index.load_strategy().await?;
        Ok(index)
    }

    async fn create_empty_table(connection: &lancedb::Connection) -> Result<lancedb::Table> {
        let schema = Self::schema();
        let batches = RecordBatchIterator::new(vec![].into_iter().map(Ok), Arc::new(schema));
        connection
            .create_table(TABLE_NAME, Box::new(batches))
            .execute()
            .await
            .map_err(|e| Error::IndexCorrupt {
                key: String::new(),
                message: e.to_string(),
            })
    }

    fn corrupt(&self, message: impl Into<String>) -> Error {
        Error::IndexCorrupt {
            key: self.doc_key.clone(),
            message: message.into(),
        }
    }

    fn key_predicate(&self) -> String {
        format!("doc_key = '{}'", self.doc_key.replace('\'', "''"))
    }

    async fn load_strategy(&self) -> Result<Option<String>> {
        use lancedb::query::{ExecutableQuery, QueryBase};

        let results: Vec<arrow_array::RecordBatch> = self
            .table
            .query()
            .only_if(self.key_predicate())
            .select(lancedb::query::Select::columns(&["strategy"]))
            .limit(1)
            .execute()
            .await
            .map_err(|e| self.corrupt(e.to_string()))?
            .try_collect()
            .await
            .map_err(|e| self.corrupt(e.to_string()))?;

        for batch in results {
            if let Some(column) = batch.column_by_name("strategy") {
                let values: &arrow_array::StringArray = column.as_string::<i32>();
                if !values.is_empty() && values.is_valid(0) {
                    return Ok(Some(values.value(0).to_string()));
                }
            }
        }
        Ok(None)
    }

    fn schema() -> arrow_schema::Schema {
        arrow_schema::Schema::new(vec![
            arrow_schema::Field::new("chunk_id", arrow_schema::DataType::Int32, false),
            arrow_schema::Field::new("doc_key", arrow_schema::DataType::Utf8, false),
            arrow_schema::Field::new("text", arrow_schema::DataType::Utf8, false),
            arrow_schema::Field::new("token_count", arrow_schema::DataType::Int32, false),
            arrow_schema::Field::new("pages", arrow_schema::DataType::Utf8, false),
            arrow_schema::Field::new("span_start", arrow_schema::DataType::Int64, false),
            arrow_schema::Field::new("span_end", arrow_schema::DataType::Int64, false),
            arrow_schema::Field::new("strategy", arrow_schema::DataType::Utf8, false),
            arrow_schema::Field::new(
                "embedding",
                arrow_schema::DataType::FixedSizeList(
                    Arc::new(arrow_schema::Field::new(
                        "item",
                        arrow_schema::DataType::Float32,
                        true,
                    )),
                    EMBEDDING_DIM,
                ),
                false,
            ),
        ])
    }
}

#[async_trait]
impl VectorIndex for LanceIndex {
    fn strategy(&self) -> Option<String> {
        self.strategy.clone()
    }

    async fn count(&self) -> Result<usize> {
        use lancedb::query::{ExecutableQuery, QueryBase};

        let results: Vec<arrow_array::RecordBatch> = self
            .table
            .query()
            .only_if(self.key_predicate())
            .select(lancedb::query::Select::columns(&["chunk_id"]))
            .execute()
            .await
            .map_err(|e| self.corrupt(e.to_string()))?
            .try_collect()
            .await
            .map_err(|e| self.corrupt(e.to_string()))?;

        Ok(results.iter().map(|b| b.num_rows()).sum())
    }

    async fn add_batch(
        &mut self,
        entries: Vec<(Chunk, Vec<f32>)>,
        strategy: &str,
    ) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }
        if let Some(existing) = &self.strategy {
            if existing != strategy {
                return Err(self.corrupt(format!(
                    "cannot mix '{strategy}' vectors into a '{existing}' index"
                )));
            }
        }
        for (_, vector) in &entries {
            if vector.len() != EMBEDDING_DIM as usize {
                return Err(self.corrupt(format!(
                    "embedding dimension mismatch: expected {EMBEDDING_DIM}, got {}",
                    vector.len()
                )));
            }
        }

        use arrow_array::{FixedSizeListArray, Int32Array, Int64Array, RecordBatch, StringArray};

        let schema = Self::schema();
        let ids = Int32Array::from(
            entries.iter().map(|(c, _)| c.id as i32).collect::<Vec<_>>(),
        );
        let doc_keys = StringArray::from(
            entries.iter().map(|(c, _)| c.doc_key.as_str()).collect::<Vec<_>>(),
        );
        let texts = StringArray::from(
            entries.iter().map(|(c, _)| c.text.as_str()).collect::<Vec<_>>(),
        );
        let token_counts = Int32Array::from(
            entries.iter().map(|(c, _)| c.token_count as i32).collect::<Vec<_>>(),
        );
        let pages = StringArray::from(
            entries
                .iter()
                .map(|(c, _)| serde_json::to_string(&c.pages).unwrap_or_else(|_| "[]".to_string()))
                .collect::<Vec<_>>(),
        );
        let starts = Int64Array::from(
            entries.iter().map(|(c, _)| c.start as i64).collect::<Vec<_>>(),
        );
        let ends = Int64Array::from(
            entries.iter().map(|(c, _)| c.end as i64).collect::<Vec<_>>(),
        );
        let strategies = StringArray::from(vec![strategy; entries.len()]);
        let embeddings = FixedSizeListArray::from_iter_primitive::<Float32Type, _, _>(
            entries
                .iter()
                .map(|(_, v)| Some(v.iter().map(|x| Some(*x)).collect::<Vec<_>>())),
            EMBEDDING_DIM,
        );

        let batch = RecordBatch::try_new(
            Arc::new(schema),
            vec![
                Arc::new(ids) as arrow_array::ArrayRef,
                Arc::new(doc_keys) as arrow_array::ArrayRef,
                Arc::new(texts) as arrow_array::ArrayRef,
                Arc::new(token_counts) as arrow_array::ArrayRef,
                Arc::new(pages) as arrow_array::ArrayRef,
                Arc::new(starts) as arrow_array::ArrayRef,
                Arc::new(ends) as arrow_array::ArrayRef,
                Arc::new(strategies) as arrow_array::ArrayRef,
                Arc::new(embeddings) as arrow_array::ArrayRef,
            ],
        )
        .map_err(|e| self.corrupt(e.to_string()))?;

        let batches = RecordBatchIterator::new(vec![Ok(batch)], Arc::new(Self::schema()));
        self.table
            .add(Box::new(batches))
            .execute()
            .await
            .map_err(|e| self.corrupt(e.to_string()))?;

        self.strategy.get_or_insert_with(|| strategy.to_string());
        Ok(())
    }

    async fn search(&self, query: &[f32], k: usize) -> Result<Vec<ScoredChunk>> {
        use lancedb::query::{ExecutableQuery, QueryBase};

        if k == 0 {
            return Ok(Vec::new());
        }
        if query.len() != EMBEDDING_DIM as usize {
            return Err(self.corrupt(format!(
                "query dimension mismatch: expected {EMBEDDING_DIM}, got {}",
                query.len()
            )));
        }

        let results: Vec<arrow_array::RecordBatch> = self
            .table
            .query()
            .nearest_to(query)
            .map_err(|e| self.corrupt(e.to_string()))?
            .distance_type(lancedb::DistanceType::Cosine)
            .only_if(self.key_predicate())
            .limit(k)
            .execute()
            .await
            .map_err(|e| self.corrupt(e.to_string()))?
            .try_collect()
            .await
            .map_err(|e| self.corrupt(e.to_string()))?;

        let mut matches = Vec::new();
        for batch in results {
            let (Some(id_col), Some(text_col), Some(tokens_col), Some(pages_col), Some(start_col), Some(end_col), Some(dist_col)) = (
                batch.column_by_name("chunk_id"),
                batch.column_by_name("text"),
                batch.column_by_name("token_count"),
                batch.column_by_name("pages"),
                batch.column_by_name("span_start"),
                batch.column_by_name("span_end"),
                batch.column_by_name("_distance"),
            ) else {
                continue;
            };

            let ids: &arrow_array::PrimitiveArray<Int32Type> = id_col.as_primitive();
            let texts: &arrow_array::StringArray = text_col.as_string::<i32>();
            let token_counts: &arrow_array::PrimitiveArray<Int32Type> = tokens_col.as_primitive();
            let pages: &arrow_array::StringArray = pages_col.as_string::<i32>();
            let starts: &arrow_array::PrimitiveArray<Int64Type> = start_col.as_primitive();
            let ends: &arrow_array::PrimitiveArray<Int64Type> = end_col.as_primitive();
            let distances: &arrow_array::PrimitiveArray<Float32Type> = dist_col.as_primitive();

            for i in 0..ids.len() {
                if !ids.is_valid(i) || !distances.is_valid(i) {
                    continue;
                }
                let page_numbers: Vec<u32> =
                    serde_json::from_str(pages.value(i)).unwrap_or_default();
                matches.push(ScoredChunk {
                    chunk: Chunk {
                        id: ids.value(i) as u32,
                        doc_key: self.doc_key.clone(),
                        text: texts.value(i).to_string(),
                        token_count: token_counts.value(i) as usize,
                        pages: page_numbers,
                        start: starts.value(i) as usize,
                        end: ends.value(i) as usize,
                    },
                    score: (1.0 - distances.value(i)).clamp(-1.0, 1.0),
                });
            }
        }

        matches.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.chunk.id.cmp(&b.chunk.id))
        });
        matches.truncate(k);
        Ok(matches)
    }

    async fn persist(&self) -> Result<()> {
        // LanceDB writes are durable on commit.
        Ok(())
    }

    async fn clear(&mut self) -> Result<()> {
        self.table
            .delete(&self.key_predicate())
            .await
            .map_err(|e| self.corrupt(e.to_string()))?;
        self.strategy = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(id: u32, text: &str, page: u32) -> Chunk {
        Chunk {
            id,
            doc_key: "doc_a".to_string(),
            text: text.to_string(),
            token_count: text.split_whitespace().count(),
            pages: vec![page],
            start: 0,
            end: text.len(),
        }
    }

    fn basis_vector(index: usize) -> Vec<f32> {
        let mut v = vec![0.0f32; EMBEDDING_DIM as usize];
        v[index] = 1.0;
        v
    }

    #[tokio::test]
    async fn add_search_and_clear_round_trip() {
        let temp = tempfile::tempdir().expect("tempdir");
        let connection = connect(temp.path()).await.expect("connect");

        let mut index = LanceIndex::open(&connection, "doc_a").await.expect("open");
        assert_eq!(index.count().await.expect("count"), 0);
        assert!(index.strategy().is_none());

        index
            .add_batch(
                vec![
                    (chunk(0, "knee surgery is covered", 2), basis_vector(0)),
                    (chunk(1, "dental requires a rider", 3), basis_vector(1)),
                ],
                "hashed",
            )
            .await
            .expect("add");

        assert_eq!(index.count().await.expect("count"), 2);

        let results = index.search(&basis_vector(0), 2).await.expect("search");
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].chunk.id, 0);
        assert_eq!(results[0].chunk.pages, vec![2]);
        assert!(results[0].score > results[1].score);

        index.clear().await.expect("clear");
        assert_eq!(index.count().await.expect("count"), 0);
    }

    #[tokio::test]
    async fn keys_are_isolated_and_strategy_restored() {
        let temp = tempfile::tempdir().expect("tempdir");
        let connection = connect(temp.path()).await.expect("connect");

        let mut index_a = LanceIndex::open(&connection, "doc_a").await.expect("open a");
        index_a
            .add_batch(vec![(chunk(0, "alpha", 1), basis_vector(0))], "hashed")
            .await
            .expect("add a");

        let index_b = LanceIndex::open(&connection, "doc_b").await.expect("open b");
        assert_eq!(index_b.count().await.expect("count b"), 0);
        assert!(index_b.search(&basis_vector(0), 5).await.expect("search b").is_empty());

        let reopened = LanceIndex::open(&connection, "doc_a").await.expect("reopen a");
        assert_eq!(reopened.strategy().as_deref(), Some("hashed"));
        assert_eq!(reopened.count().await.expect("count"), 1);
    }
}
