//! Persistent vector index on LanceDB.
//!
//! All manuals share one table; every read and delete carries a
//! `manual_id = ...` predicate that LanceDB applies before scoring, which is
//! what keeps one manual's rows out of another manual's results.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

use arrow_array::{Array, FixedSizeListArray, Float32Array, Int32Array, RecordBatch, RecordBatchIterator, StringArray};
use async_trait::async_trait;
use futures::TryStreamExt;
use lancedb::query::{ExecutableQuery, QueryBase, Select};
use lancedb::{Connection, DistanceType, Table};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use manualqa_core::error::{Error, Result};
use manualqa_core::traits::VectorIndex;
use manualqa_core::types::{Chunk, ChunkId, ChunkLevel, IndexRecord, ManualId, ScoredChunk};

use crate::schema::{build_chunk_schema, quote};
use crate::table::{ensure_table, op_err, open_db, table_exists};

const DELETE_BATCH: usize = 256;

pub struct LanceVectorIndex {
    db: Connection,
    table_name: String,
    dim: usize,
    // serializes writers on the shared table
    write_lock: Mutex<()>,
}

impl LanceVectorIndex {
    pub async fn open(db_path: &Path, table_name: &str, dim: usize) -> Result<Self> {
        let db = open_db(db_path.to_string_lossy().as_ref()).await?;
        Ok(Self { db, table_name: table_name.to_string(), dim, write_lock: Mutex::new(()) })
    }

    async fn table(&self) -> Result<Option<Table>> {
        if !table_exists(&self.db, &self.table_name).await? {
            return Ok(None);
        }
        let table = self.db.open_table(&self.table_name).execute().await.map_err(op_err("open table"))?;
        Ok(Some(table))
    }

    fn records_to_batch(&self, records: &[IndexRecord]) -> Result<RecordBatch> {
        let schema = build_chunk_schema(self.dim as i32);
        let mut ids = Vec::with_capacity(records.len());
        let mut manual_ids = Vec::with_capacity(records.len());
        let mut levels = Vec::with_capacity(records.len());
        let mut ordinals = Vec::with_capacity(records.len());
        let mut metas = Vec::with_capacity(records.len());
        let mut vectors: Vec<Option<Vec<Option<f32>>>> = Vec::with_capacity(records.len());
        for r in records {
            if r.vector.len() != self.dim {
                return Err(Error::Operation(format!(
                    "vector for {} has dim {}, index expects {}",
                    r.chunk.id,
                    r.vector.len(),
                    self.dim
                )));
            }
            ids.push(r.chunk.id.clone());
            manual_ids.push(r.chunk.manual_id.to_string());
            levels.push(r.chunk.level.as_str().to_string());
            ordinals.push(r.chunk.ordinal as i32);
            metas.push(serde_json::to_string(&r.chunk)?);
            vectors.push(Some(r.vector.iter().map(|&x| Some(x)).collect()));
        }
        RecordBatch::try_new(
            schema,
            vec![
                Arc::new(StringArray::from(ids)),
                Arc::new(StringArray::from(manual_ids)),
                Arc::new(StringArray::from(levels)),
                Arc::new(Int32Array::from(ordinals)),
                Arc::new(StringArray::from(metas)),
                Arc::new(FixedSizeListArray::from_iter_primitive::<arrow_array::types::Float32Type, _, _>(
                    vectors.into_iter(),
                    self.dim as i32,
                )),
            ],
        )
        .map_err(|e| Error::Operation(format!("record batch: {e}")))
    }
}

fn string_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a StringArray> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<StringArray>())
        .ok_or_else(|| Error::Operation(format!("column '{name}' missing")))
}

#[async_trait]
impl VectorIndex for LanceVectorIndex {
    async fn upsert(&self, manual_id: &ManualId, records: &[IndexRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        if let Some(stray) = records.iter().find(|r| &r.chunk.manual_id != manual_id) {
            return Err(Error::InvalidHierarchy(format!(
                "chunk {} belongs to {}, not {manual_id}",
                stray.chunk.id, stray.chunk.manual_id
            )));
        }
        let batch = self.records_to_batch(records)?;
        let schema = batch.schema();

        let _guard = self.write_lock.lock().await;
        ensure_table(&self.db, &self.table_name, schema.clone()).await?;
        let table = self.db.open_table(&self.table_name).execute().await.map_err(op_err("open table"))?;
        let reader = Box::new(RecordBatchIterator::new(vec![Ok(batch)].into_iter(), schema));
        // chunk ids embed the manual id, so matching on `id` alone stays in this partition
        let mut mi = table.merge_insert(&["id"]);
        mi.when_matched_update_all(None).when_not_matched_insert_all();
        mi.execute(reader).await.map_err(op_err("merge insert"))?;
        debug!(manual = %manual_id, rows = records.len(), "upserted chunk vectors");
        Ok(())
    }

    async fn query(&self, manual_id: &ManualId, level: ChunkLevel, vector: &[f32], top_k: usize) -> Result<Vec<ScoredChunk>> {
        let unavailable = |e: Error| Error::RetrievalUnavailable(e.to_string());
        let table = self
            .table()
            .await
            .map_err(unavailable)?
            .ok_or_else(|| Error::RetrievalUnavailable(format!("table '{}' does not exist", self.table_name)))?;
        let filter = format!("manual_id = {} AND level = {}", quote(manual_id.as_str()), quote(level.as_str()));
        let mut stream = table
            .vector_search(vector.to_vec())
            .map_err(|e| Error::RetrievalUnavailable(e.to_string()))?
            .distance_type(DistanceType::Cosine)
            .only_if(filter)
            .select(Select::columns(&["id", "manual_id"]))
            .limit(top_k)
            .execute()
            .await
            .map_err(|e| Error::RetrievalUnavailable(e.to_string()))?;

        let mut hits = Vec::new();
        while let Some(batch) = stream.try_next().await.map_err(|e| Error::RetrievalUnavailable(e.to_string()))? {
            let ids = string_column(&batch, "id").map_err(unavailable)?;
            let manuals = string_column(&batch, "manual_id").map_err(unavailable)?;
            let distances = batch.column_by_name("_distance").and_then(|c| c.as_any().downcast_ref::<Float32Array>());
            for i in 0..batch.num_rows() {
                if manuals.value(i) != manual_id.as_str() {
                    warn!(manual = %manual_id, row_manual = manuals.value(i), "dropping row from another manual");
                    continue;
                }
                let score = distances.map_or(0.0, |d| (1.0 - d.value(i)).clamp(0.0, 1.0));
                hits.push(ScoredChunk { chunk_id: ids.value(i).to_string(), score });
            }
        }
        Ok(hits)
    }

    async fn delete_manual(&self, manual_id: &ManualId) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let Some(table) = self.table().await? else {
            return Ok(());
        };
        table
            .delete(&format!("manual_id = {}", quote(manual_id.as_str())))
            .await
            .map_err(op_err("delete manual"))?;
        debug!(manual = %manual_id, "deleted manual rows");
        Ok(())
    }

    async fn delete_chunks(&self, manual_id: &ManualId, chunk_ids: &[ChunkId]) -> Result<()> {
        if chunk_ids.is_empty() {
            return Ok(());
        }
        let _guard = self.write_lock.lock().await;
        let Some(table) = self.table().await? else {
            return Ok(());
        };
        for ids in chunk_ids.chunks(DELETE_BATCH) {
            let list = ids.iter().map(|id| quote(id)).collect::<Vec<_>>().join(", ");
            table
                .delete(&format!("manual_id = {} AND id IN ({list})", quote(manual_id.as_str())))
                .await
                .map_err(op_err("delete chunks"))?;
        }
        debug!(manual = %manual_id, rows = chunk_ids.len(), "deleted stale chunk rows");
        Ok(())
    }

    async fn list_manuals(&self) -> Result<Vec<ManualId>> {
        let Some(table) = self.table().await? else {
            return Ok(Vec::new());
        };
        let mut stream = table
            .query()
            .select(Select::columns(&["manual_id"]))
            .execute()
            .await
            .map_err(op_err("scan manuals"))?;
        let mut manuals = BTreeSet::new();
        while let Some(batch) = stream.try_next().await.map_err(op_err("scan manuals"))? {
            let col = string_column(&batch, "manual_id")?;
            for i in 0..batch.num_rows() {
                if col.is_valid(i) {
                    manuals.insert(ManualId::new(col.value(i)));
                }
            }
        }
        Ok(manuals.into_iter().collect())
    }

    async fn load_chunks(&self, manual_id: &ManualId) -> Result<Vec<Chunk>> {
        let Some(table) = self.table().await? else {
            return Ok(Vec::new());
        };
        let mut stream = table
            .query()
            .only_if(format!("manual_id = {}", quote(manual_id.as_str())))
            .select(Select::columns(&["meta"]))
            .execute()
            .await
            .map_err(op_err("load chunks"))?;
        let mut chunks = Vec::new();
        while let Some(batch) = stream.try_next().await.map_err(op_err("load chunks"))? {
            let metas = string_column(&batch, "meta")?;
            for i in 0..batch.num_rows() {
                chunks.push(serde_json::from_str::<Chunk>(metas.value(i))?);
            }
        }
        Ok(chunks)
    }
}
