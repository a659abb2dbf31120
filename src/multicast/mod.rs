pub mod buffer;
pub mod clock;
pub mod engine;
pub mod log;
pub mod membership;
pub mod message;
pub mod timestamp;

pub type ProcessId = u32;
pub type MulticastId = u64;

pub use buffer::*;
pub use clock::*;
pub use engine::*;
pub use log::*;
pub use membership::*;
pub use message::*;
pub use timestamp::*;
