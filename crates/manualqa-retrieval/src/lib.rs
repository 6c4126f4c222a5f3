pub mod engine;
mod rank;

pub use engine::RetrievalEngine;
