// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 ReifyDB

//! Bi-directional message-passing worker threads.
//!
//! Offloads work (logging, file I/O, post-processing) from a latency-critical
//! main thread onto worker threads. Each [`MsgThread`] owns a child OS thread
//! and a pair of batched single-producer/single-consumer queues: input
//! messages flow main to child, output messages and marshalled diagnostics
//! flow child to main. A main-thread [`Manager`] drains child output, applies
//! the heartbeat cadence and coordinates shutdown.
//!
//! The queues ([`queue`]) amortize their one mutex over whole batches, so
//! sustained rates of tens of thousands of messages per second leave the lock
//! almost uncontended. Child threads never touch main-thread state: errors,
//! warnings and debug output travel as ordinary out-queue elements and are
//! dispatched to the [`Reporter`] and [`DebugLog`] sinks during a drain,
//! linearized with all other main-thread work.
//!
//! # Example
//!
//! ```
//! use std::sync::{Arc, Mutex};
//!
//! use msgthread::{ClosureInput, ClosureOutput, Manager, Worker, WorkerContext};
//!
//! struct Counter {
//! 	total: u64,
//! 	result: Arc<Mutex<u64>>,
//! }
//!
//! impl Worker for Counter {
//! 	fn on_stop(&mut self, ctx: &mut WorkerContext) {
//! 		let total = self.total;
//! 		let result = self.result.clone();
//! 		ctx.send_out(Box::new(ClosureOutput::new("total", move || {
//! 			*result.lock().unwrap() = total;
//! 			true
//! 		})));
//! 	}
//! }
//!
//! let result = Arc::new(Mutex::new(0));
//! let mut manager = Manager::new();
//!
//! let thread = manager.create("counter", Counter { total: 0, result: result.clone() });
//! thread.borrow_mut().start().unwrap();
//!
//! for i in 0..100u64 {
//! 	let add = ClosureInput::new("add", move |worker: &mut Counter, _: &mut WorkerContext| {
//! 		worker.total += i;
//! 		true
//! 	});
//! 	thread.borrow_mut().send_in(Box::new(add));
//! }
//!
//! thread.borrow_mut().request_stop();
//! manager.terminate_all();
//! assert_eq!(*result.lock().unwrap(), 4950);
//! ```

pub mod error;
pub mod manager;
pub mod message;
pub mod msg_thread;
pub mod queue;
pub mod report;
pub mod thread;

pub use error::ThreadError;
pub use manager::{ManagedThread, Manager, ManagerConfig};
pub use message::{ClosureInput, ClosureOutput, InputMessage, OutputMessage};
pub use msg_thread::{MsgThread, ThreadConfig, ThreadState, ThreadStats, Worker, WorkerContext};
pub use queue::{QueueConfig, QueueStats};
pub use report::{DebugLog, Reporter, Severity, TracingDebugLog, TracingReporter};
pub use thread::{BasicThread, CancellationToken};
