//! RoboBus - concurrency and scheduling core for robot control units
//!
//! Units (sensors, motors, network endpoints) exchange commands over an
//! in-process [`bus::TransferBusQueue`] instead of calling each other. An
//! [`agent::GenericAgent`] pairs one producer and one consumer around such a
//! queue, and a [`scheduler::Scheduler`] delivers messages to units on a
//! fixed period.

pub mod agent;
pub mod bus;
pub mod config;
pub mod error;
pub mod scheduler;
pub mod unit;
pub mod utils;

pub use agent::{
    ActivityLog, AgentConsumer, AgentProducer, AgentState, AgentStatus, CommandProcessor,
    GenericAgent, QueueConsumer, QueueProducer,
};
pub use bus::{BusMessage, Command, TransferBusQueue};
pub use config::Config;
pub use error::{Result, RoboError};
pub use scheduler::{
    DefaultScheduler, FinalInvocationListener, ScheduleContext, ScheduleHandle, ScheduleState,
    Scheduler,
};
pub use unit::{LifecycleState, RoboReference, RoboUnit};
