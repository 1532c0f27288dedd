//! Lab Relay Command Dispatcher
//!
//! This crate owns the device registry and the single-worker queue that
//! every serial transaction goes through.
//!
//! # Architecture
//!
//! A single actor task processes a strict FIFO of work items:
//!
//! - **Command jobs**: resolve a logical identifier against the registry,
//!   run one serial transaction, report exactly one [`JobOutcome`]
//! - **Scans**: probe every port for controllers, replace the registry,
//!   then queue a clock synchronization job for each discovered device
//!
//! Because scan probes and commands share the one worker, at most one
//! serial port is open at any instant. Callers only enqueue; they await
//! their own outcome through a oneshot channel.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use relay_detect::HardwareBackend;
//! use relay_dispatch::{DispatchConfig, Dispatcher};
//! use relay_protocol::DeviceCommand;
//!
//! # async fn run() -> Result<(), relay_dispatch::DispatchError> {
//! let backend = Arc::new(HardwareBackend::new());
//! let (dispatcher, _actor) = Dispatcher::spawn(backend, DispatchConfig::default());
//!
//! dispatcher.scan().await?;
//! let outcome = dispatcher.submit("POWER_RELAY_1", DeviceCommand::Status).await?;
//! println!("{}", outcome.to_json());
//! # Ok(())
//! # }
//! ```

pub mod actor;
pub mod error;
pub mod events;
pub mod job;
pub mod registry;

pub use actor::{
    run_dispatch_actor, DispatchActorCommand, DispatchConfig, DispatchContext, Dispatcher,
};
pub use error::DispatchError;
pub use events::DispatchEvent;
pub use job::{CommandJob, JobId, JobOutcome, JobState};
pub use registry::DeviceRegistry;
