// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 ReifyDB

//! Main-thread registry driving drains, the heartbeat cadence and shutdown.
//!
//! The manager keeps only weak back-references to the threads it created; the
//! caller owns the handle returned by [`Manager::create`], and dropping it
//! unregisters the thread the next time the registry is walked. Threads are
//! visited in registration order, which makes the periodic drain round-robin
//! fair.

use std::{
	cell::RefCell,
	rc::{Rc, Weak},
	sync::Arc,
	thread,
	time::{Duration, Instant, SystemTime},
};

use tracing::debug;

use crate::{
	error::ThreadError,
	msg_thread::{MsgThread, ThreadConfig, ThreadState, ThreadStats, Worker},
	report::{DebugLog, Reporter, TracingDebugLog, TracingReporter},
};

/// Manager tuning.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
	/// Queue tuning applied to every created thread.
	pub thread: ThreadConfig,
	/// Cadence applied by [`Manager::tick`].
	pub heartbeat_interval: Duration,
}

impl Default for ManagerConfig {
	fn default() -> Self {
		Self {
			thread: ThreadConfig::default(),
			heartbeat_interval: Duration::from_secs(1),
		}
	}
}

/// Object-safe surface the manager drives on every registered thread.
pub trait ManagedThread {
	fn name(&self) -> &str;

	fn state(&self) -> ThreadState;

	/// True once the OS thread has exited, cleanly or not.
	fn is_finished(&self) -> bool;

	fn request_stop(&mut self);

	fn heartbeat(&mut self, network_time: f64, wall_time: f64);

	/// Processes all currently-ready output of this thread on the calling
	/// (main) thread.
	fn drain_once(&mut self) -> usize;

	fn join(&mut self) -> Result<(), ThreadError>;

	fn stats(&self) -> ThreadStats;
}

impl<W: Worker> ManagedThread for MsgThread<W> {
	fn name(&self) -> &str {
		self.name()
	}

	fn state(&self) -> ThreadState {
		self.state()
	}

	fn is_finished(&self) -> bool {
		self.is_finished()
	}

	fn request_stop(&mut self) {
		self.request_stop();
	}

	fn heartbeat(&mut self, network_time: f64, wall_time: f64) {
		self.heartbeat(network_time, wall_time);
	}

	fn drain_once(&mut self) -> usize {
		self.drain_once()
	}

	fn join(&mut self) -> Result<(), ThreadError> {
		self.join()
	}

	fn stats(&self) -> ThreadStats {
		self.stats()
	}
}

/// Main-thread-only registry of message threads.
///
/// Deliberately not `Send`: draining dispatches output messages and
/// diagnostics, which belong on the engine's main thread.
pub struct Manager {
	registry: Vec<Weak<RefCell<dyn ManagedThread>>>,
	reporter: Arc<dyn Reporter>,
	debug_log: Arc<dyn DebugLog>,
	config: ManagerConfig,
	last_heartbeat: Option<Instant>,
}

impl Manager {
	pub fn new() -> Self {
		Self {
			registry: Vec::new(),
			reporter: Arc::new(TracingReporter),
			debug_log: Arc::new(TracingDebugLog),
			config: ManagerConfig::default(),
			last_heartbeat: None,
		}
	}

	/// Replaces the reporter injected into every thread created afterwards.
	pub fn with_reporter(mut self, reporter: Arc<dyn Reporter>) -> Self {
		self.reporter = reporter;
		self
	}

	/// Replaces the debug log injected into every thread created afterwards.
	pub fn with_debug_log(mut self, debug_log: Arc<dyn DebugLog>) -> Self {
		self.debug_log = debug_log;
		self
	}

	pub fn with_config(mut self, config: ManagerConfig) -> Self {
		self.config = config;
		self
	}

	/// Creates and registers a new message thread around `worker`.
	///
	/// The returned handle is the owning reference; the registry keeps a weak
	/// back-reference and reaps it once the handle is dropped. The thread
	/// still has to be started explicitly.
	pub fn create<W: Worker>(&mut self, name: impl Into<String>, worker: W) -> Rc<RefCell<MsgThread<W>>> {
		let thread = MsgThread::new(
			name,
			worker,
			&self.config.thread,
			Arc::clone(&self.reporter),
			Arc::clone(&self.debug_log),
		);
		debug!(thread = %thread.name(), "registering message thread");

		let thread = Rc::new(RefCell::new(thread));
		let erased: Rc<RefCell<dyn ManagedThread>> = thread.clone();
		self.registry.push(Rc::downgrade(&erased));
		thread
	}

	/// Number of live registered threads.
	pub fn len(&self) -> usize {
		self.registry.iter().filter(|weak| weak.strong_count() > 0).count()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	/// Visits every live thread in registration order, reaping dead entries.
	fn for_each_live(&mut self, mut f: impl FnMut(&mut dyn ManagedThread)) {
		self.registry.retain(|weak| match weak.upgrade() {
			Some(thread) => {
				f(&mut *thread.borrow_mut());
				true
			}
			None => false,
		});
	}

	/// Drains all currently-ready output of every thread. Returns the number
	/// of elements processed.
	pub fn drain_all(&mut self) -> usize {
		let mut processed = 0;
		self.for_each_live(|thread| processed += thread.drain_once());
		processed
	}

	/// Sends a heartbeat to every thread.
	pub fn heartbeat_all(&mut self, network_time: f64, wall_time: f64) {
		self.for_each_live(|thread| thread.heartbeat(network_time, wall_time));
	}

	/// Applies the configured heartbeat cadence: when the interval has
	/// elapsed, forwards `network_time` together with the current wall clock
	/// to every thread. Call once per main-loop iteration.
	pub fn tick(&mut self, network_time: f64) {
		let now = Instant::now();
		if let Some(last) = self.last_heartbeat {
			if now.duration_since(last) < self.config.heartbeat_interval {
				return;
			}
		}
		self.last_heartbeat = Some(now);

		let wall_time = SystemTime::now()
			.duration_since(SystemTime::UNIX_EPOCH)
			.map(|elapsed| elapsed.as_secs_f64())
			.unwrap_or(0.0);
		self.heartbeat_all(network_time, wall_time);
	}

	/// Stops every thread, drains remaining output, joins, and clears the
	/// registry. Join failures are reported as internal warnings.
	pub fn terminate_all(&mut self) {
		debug!(threads = self.len(), "terminating all message threads");

		self.for_each_live(|thread| thread.request_stop());

		// Drain until every thread has delivered its shutdown sentinel or its
		// OS thread is gone (a panicked child never sends one).
		loop {
			self.drain_all();

			let mut pending = false;
			self.for_each_live(|thread| {
				if thread.state() < ThreadState::Exited && !thread.is_finished() {
					pending = true;
				}
			});
			if !pending {
				break;
			}
			thread::sleep(Duration::from_millis(1));
		}
		// Pick up anything flushed between the last drain and loop exit.
		self.drain_all();

		let reporter = Arc::clone(&self.reporter);
		self.for_each_live(|thread| {
			if let Err(err) = thread.join() {
				reporter.internal_warning(&err.to_string());
			}
		});
		self.registry.clear();
	}

	/// Snapshot of per-thread statistics, in registration order.
	pub fn stats(&mut self) -> Vec<(String, ThreadStats)> {
		let mut stats = Vec::new();
		self.for_each_live(|thread| stats.push((thread.name().to_string(), thread.stats())));
		stats
	}
}

impl Default for Manager {
	fn default() -> Self {
		Self::new()
	}
}

impl Drop for Manager {
	fn drop(&mut self) {
		// Threads still registered would otherwise keep running detached.
		self.terminate_all();
	}
}

#[cfg(test)]
mod tests {
	use std::{
		sync::Mutex,
		time::{Duration, Instant},
	};

	use super::*;
	use crate::message::{ClosureInput, ClosureOutput};
	use crate::msg_thread::WorkerContext;
	use crate::report::tests_support::RecordingSink;

	struct Noop;

	impl Worker for Noop {}

	fn recording_manager() -> (Manager, Arc<RecordingSink>) {
		let sink = Arc::new(RecordingSink::default());
		let manager = Manager::new().with_reporter(sink.clone()).with_debug_log(sink.clone());
		(manager, sink)
	}

	#[test]
	fn test_create_registers_and_drop_unregisters() {
		let (mut manager, _sink) = recording_manager();
		let a = manager.create("a", Noop);
		let b = manager.create("b", Noop);
		assert_eq!(manager.len(), 2);

		drop(b);
		assert_eq!(manager.len(), 1);
		// The dead entry is reaped on the next walk.
		manager.drain_all();
		assert_eq!(manager.registry.len(), 1);

		drop(a);
		assert!(manager.is_empty());
	}

	#[test]
	fn test_drain_all_processes_output_in_registration_order() {
		let (mut manager, _sink) = recording_manager();
		let seen = Arc::new(Mutex::new(Vec::new()));

		let threads = ["first", "second"].map(|name| {
			let thread = manager.create(name, Noop);
			thread.borrow_mut().start().unwrap();
			let seen = seen.clone();
			thread.borrow_mut().send_in(Box::new(ClosureInput::new(
				"announce",
				move |_: &mut Noop, ctx: &mut WorkerContext| {
					let seen = seen.clone();
					let name = ctx.name().to_string();
					ctx.send_out(Box::new(ClosureOutput::new("announced", move || {
						seen.lock().unwrap().push(name.clone());
						true
					})));
					true
				},
			)));
			thread
		});

		// Wait until both children have published their output, then a single
		// drain pass must visit the registry in registration order.
		let start = Instant::now();
		while threads.iter().any(|thread| thread.borrow().stats().sent_out == 0) {
			assert!(start.elapsed() < Duration::from_secs(5));
			std::thread::sleep(Duration::from_millis(1));
		}
		manager.drain_all();
		assert_eq!(*seen.lock().unwrap(), vec!["first", "second"]);

		manager.terminate_all();
		drop(threads);
	}

	#[test]
	fn test_terminate_all_joins_every_thread() {
		let (mut manager, _sink) = recording_manager();
		let threads: Vec<_> = (0..4).map(|i| {
			let thread = manager.create(format!("worker-{i}"), Noop);
			thread.borrow_mut().start().unwrap();
			thread
		}).collect();

		manager.terminate_all();
		assert!(manager.is_empty());
		for thread in threads {
			assert_eq!(thread.borrow().state(), ThreadState::Joined);
		}
	}

	#[test]
	fn test_terminate_all_copes_with_unstarted_threads() {
		let (mut manager, _sink) = recording_manager();
		let thread = manager.create("never-started", Noop);
		manager.terminate_all();
		assert_eq!(thread.borrow().state(), ThreadState::Joined);
	}

	#[test]
	fn test_tick_applies_cadence() {
		let (manager, _sink) = recording_manager();
		let mut manager = manager.with_config(ManagerConfig {
			thread: ThreadConfig::default(),
			heartbeat_interval: Duration::from_millis(200),
		});

		let thread = manager.create("pulse", Noop);
		thread.borrow_mut().start().unwrap();

		manager.tick(0.0);
		// Within the interval: suppressed.
		manager.tick(0.5);

		let start = Instant::now();
		while thread.borrow().heartbeats_acked() < 1 {
			manager.drain_all();
			assert!(start.elapsed() < Duration::from_secs(5));
			std::thread::sleep(Duration::from_millis(1));
		}
		assert_eq!(thread.borrow().stats().sent_in, 1);

		std::thread::sleep(Duration::from_millis(250));
		manager.tick(1.0);
		let start = Instant::now();
		while thread.borrow().heartbeats_acked() < 2 {
			manager.drain_all();
			assert!(start.elapsed() < Duration::from_secs(5));
			std::thread::sleep(Duration::from_millis(1));
		}

		manager.terminate_all();
	}

	#[test]
	fn test_stats_reports_all_threads() {
		let (mut manager, _sink) = recording_manager();
		let a = manager.create("a", Noop);
		let _b = manager.create("b", Noop);

		a.borrow_mut().send_in(Box::new(ClosureInput::new("work", |_: &mut Noop, _: &mut WorkerContext| true)));

		let stats = manager.stats();
		assert_eq!(stats.len(), 2);
		assert_eq!(stats[0].0, "a");
		assert_eq!(stats[0].1.sent_in, 1);
		assert_eq!(stats[1].0, "b");
		assert_eq!(stats[1].1.sent_in, 0);

		manager.terminate_all();
	}
}
