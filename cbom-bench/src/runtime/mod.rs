/// Producer and handler seams plus output normalization.
pub mod adapter;
/// Worker runtime builder.
pub mod builder;
/// Child-process producer for external scanners.
pub mod command;
/// Dequeue loop, timeout enforcement and shutdown signaling.
pub mod supervisor;
/// Worker configuration.
pub mod worker;

pub use adapter::{truncate, Handler, HandlerOutput, Producer, ProducerHandler, RawOutput, Trace};
pub use builder::WorkerRuntimeBuilder;
pub use command::CommandProducer;
pub use supervisor::{ShutdownToken, Step, WorkerRuntime};
pub use worker::WorkerConfig;
