//! Message Bus Module
//!
//! This module provides the queue that carries commands between a producer
//! unit and a consumer unit.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────┐  transfer()  ┌──────────────────────┐  peek()/take()  ┌─────────────┐
//! │  Producer   │─────────────>│   TransferBusQueue   │────────────────>│  Consumer   │
//! │ (sensor)    │              │ overflow │ priority  │                 │ (motor)     │
//! └─────────────┘              └──────────────────────┘                 └─────────────┘
//! ```
//!
//! Items transferred while no consumer is blocked wait in the overflow heap
//! and are drained first by the next consumer. Items transferred while a
//! consumer is blocked in `take()` go to the priority heap and wake it.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use std::thread;
//! use robobus::bus::{Command, TransferBusQueue};
//!
//! let queue = Arc::new(TransferBusQueue::new());
//! let consumer = {
//!     let queue = Arc::clone(&queue);
//!     thread::spawn(move || queue.take())
//! };
//!
//! queue.transfer(Command::new("forward", 120u32));
//! let received = consumer.join().unwrap().unwrap();
//! assert_eq!(*received.payload(), 120);
//! ```

pub mod message;
pub mod queue;

pub use message::{BusMessage, Command, DEFAULT_PRIORITY};
pub use queue::{TransferBusQueue, DEFAULT_AWAIT_TIMEOUT};
