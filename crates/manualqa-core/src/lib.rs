pub mod chunker;
pub mod config;
pub mod error;
pub mod events;
pub mod guard;
pub mod hierarchy;
pub mod pages;
pub mod registry;
pub mod retry;
pub mod scope;
pub mod selector;
pub mod settings;
pub mod traits;
pub mod types;

pub use error::{Error, Result};
