pub mod api;
pub mod batch;
pub mod batch_buffer;
pub mod channel;
pub mod client;
pub mod error;
pub mod retry;

pub use batch::Batch;
pub use batch_buffer::BatchBuffer;
pub use channel::{channel_name_for, AppendReceipt, ChannelSession, ChannelState, ChannelStatus};
pub use client::{ClientState, FlushOutcome, IngestStats, IngestionClient};
pub use error::{ErrorKind, IngestError, Operation};
pub use retry::{Attempt, RetryDecision, RetryPolicy};
