pub mod engine;
pub mod grouper;
pub mod types;
pub mod writer;

pub use engine::{EngineConfig, ExchangeState, RegisterEngine};
pub use grouper::{group_addresses, DEFAULT_MAX_BLOCK_SIZE};
pub use types::*;
pub use writer::{QueueSettings, WriteQueue};
