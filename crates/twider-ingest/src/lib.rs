//! Twider ingestion crate - stream transports and the durable consumer loop.

pub mod consumer;
pub mod handler;
pub mod memory;
pub mod nats;
pub mod transport;

pub use consumer::{
    ConsumerHandle, ConsumerSettings, ConsumerStats, ConsumerStatsSnapshot, CycleOutcome,
    IngestionConsumer,
};
pub use handler::MessageHandler;
pub use memory::{DeadLetter, MemoryMessage, MemoryStream};
pub use nats::{NatsMessage, NatsTransport};
pub use transport::{StreamMessage, StreamTransport};
