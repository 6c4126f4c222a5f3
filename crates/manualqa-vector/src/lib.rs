pub mod indexer;
pub mod memory;
pub mod schema;
pub mod store;
pub mod table;

pub use indexer::{build_progress_bar, IndexReport, ManualIndexer};
pub use memory::MemoryVectorIndex;
pub use store::LanceVectorIndex;
