pub mod context;
pub mod error;
pub mod pipeline;
pub mod store;
pub mod types;

pub use context::{ContextBuilder, ContextParams, ContextResult};
pub use error::MemoryError;
pub use pipeline::{ConversationTurn, ObservationPipeline};
pub use store::MemoryStore;
