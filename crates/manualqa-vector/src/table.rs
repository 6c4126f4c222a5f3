//! LanceDB connection and table housekeeping helpers.
use std::sync::Arc;

use arrow_array::RecordBatchIterator;
use lancedb::{connect, Connection};

use manualqa_core::error::{Error, Result};

pub(crate) fn op_err<E: std::fmt::Display>(context: &str) -> impl Fn(E) -> Error + '_ {
    move |e| Error::Operation(format!("{context}: {e}"))
}

pub async fn open_db(uri: &str) -> Result<Connection> {
    connect(uri).execute().await.map_err(op_err("open lancedb"))
}

pub async fn table_exists(conn: &Connection, name: &str) -> Result<bool> {
    let names = conn.table_names().execute().await.map_err(op_err("list tables"))?;
    Ok(names.iter().any(|n| n == name))
}

pub async fn ensure_table(conn: &Connection, name: &str, schema: Arc<arrow_schema::Schema>) -> Result<()> {
    if table_exists(conn, name).await? {
        return Ok(());
    }
    let iter = RecordBatchIterator::new(vec![].into_iter(), schema.clone());
    conn.create_table(name, Box::new(iter)).execute().await.map_err(op_err("create table"))?;
    Ok(())
}
