use arrow_schema::{DataType, Field, Schema};
use std::sync::Arc;

/// One row per chunk. `meta` holds the serialized `Chunk` so a manual's
/// hierarchy can be rebuilt from the table alone.
pub fn build_chunk_schema(dim: i32) -> Arc<Schema> {
    Arc::new(Schema::new(vec![
        Field::new("id", DataType::Utf8, false),
        Field::new("manual_id", DataType::Utf8, false),
        Field::new("level", DataType::Utf8, false),
        Field::new("ordinal", DataType::Int32, false),
        Field::new("meta", DataType::Utf8, false),
        Field::new("vector", DataType::FixedSizeList(Arc::new(Field::new("item", DataType::Float32, true)), dim), true),
    ]))
}

/// SQL string literal with single quotes escaped.
pub fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}
