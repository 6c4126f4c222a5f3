pub mod citations;
pub mod commands;
pub mod generator;
pub mod prompt;
pub mod session;

pub use citations::{SourceGroup, Sources};
pub use generator::{get_default_generator, ExtractiveGenerator, HttpGenerator, RetryingGenerator};
pub use session::{ChatPipeline, ChatSession, Reply};
