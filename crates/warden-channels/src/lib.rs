pub mod adapter;
pub mod error;
pub mod formatter;
pub mod helpers;
pub mod observer;
pub mod probability;
pub mod reactions;
pub mod types;

pub use adapter::ChatAdapter;
pub use error::ChannelError;
pub use observer::ChannelObserver;
pub use reactions::ReactionManager;
pub use types::{JudgeItem, JudgeResponse, ReactionType};
