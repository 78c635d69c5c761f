// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 ReifyDB

//! Bi-directional message-passing threads.
//!
//! A [`MsgThread`] pairs a child OS thread with two batched SPSC queues: the
//! in-queue carries [`InputMessage`]s from the main thread to the child, the
//! out-queue carries [`OutputMessage`]s and marshalled diagnostics back. The
//! child's run loop processes input until termination is requested and the
//! queue has drained, then runs the worker's teardown hook and delivers a
//! shutdown sentinel so the main thread observes a clean exit.
//!
//! Heartbeats ride in-band in the in-queue: the child runs its
//! [`Worker::do_heartbeat`] hook and acknowledges with an out-queue element
//! that fires the main-side hook during the next drain.

use std::sync::{
	Arc,
	atomic::{AtomicU64, Ordering},
};

use tracing::debug;

use crate::{
	error::ThreadError,
	message::{InEnvelope, InPayload, InputMessage, OutPayload, OutputMessage},
	queue::{self, QueueConfig, QueueReader, QueueStats, QueueWriter},
	report::{DebugLog, Report, Reporter, Severity},
	thread::{BasicThread, CancellationToken},
};

/// Tuning for both queues of a message thread.
#[derive(Debug, Clone, Default)]
pub struct ThreadConfig {
	pub in_queue: QueueConfig,
	pub out_queue: QueueConfig,
}

/// Lifecycle states of a message thread. Transitions are strictly monotonic;
/// re-entry is prohibited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ThreadState {
	/// Created, not yet started.
	New,
	/// The child run loop is processing input.
	Running,
	/// Termination requested; the child is finishing its backlog.
	Draining,
	/// The child delivered its shutdown sentinel.
	Exited,
	/// The OS thread has been joined.
	Joined,
}

/// Inter-thread communication counters.
#[derive(Debug, Clone, Copy)]
pub struct ThreadStats {
	/// Messages sent to the child thread.
	pub sent_in: u64,
	/// Messages sent by the child thread.
	pub sent_out: u64,
	/// Sent to the child but not yet processed.
	pub pending_in: u64,
	/// Sent by the child but not yet processed on the main thread.
	pub pending_out: u64,
	pub queue_in: QueueStats,
	pub queue_out: QueueStats,
}

/// Child-side behavior of a message thread.
///
/// Implementations own the child-local state; ordinary work arrives as
/// [`InputMessage`]s that mutate it through [`InputMessage::process`].
pub trait Worker: Send + 'static {
	/// Periodic child-side maintenance, driven by the main thread's heartbeat
	/// cadence. `network_time` and `wall_time` are the engine clocks at the
	/// instant the heartbeat was injected. Returning `false` terminates the
	/// thread, exactly as an input message would.
	fn do_heartbeat(&mut self, ctx: &mut WorkerContext, network_time: f64, wall_time: f64) -> bool {
		let _ = (ctx, network_time, wall_time);
		true
	}

	/// Child-side teardown, run after the loop exits and before the shutdown
	/// sentinel. Output sent from here is delivered even though the thread is
	/// already terminating; it is the worker's last word.
	fn on_stop(&mut self, ctx: &mut WorkerContext) {
		let _ = ctx;
	}
}

/// Child-side capability handed to message processing and worker hooks.
///
/// Everything a message may do on the child goes through here: sending
/// output, and raising diagnostics that the main thread dispatches to its
/// sinks in issue order.
pub struct WorkerContext {
	name: Arc<str>,
	out: QueueWriter<OutPayload>,
	token: CancellationToken,
	sent_out: Arc<AtomicU64>,
	/// Set by the run loop for the teardown phase; suspends the
	/// terminating-state drop rule so final results are not lost.
	teardown: bool,
}

impl WorkerContext {
	/// Thread name; diagnostics are prefixed with it.
	pub fn name(&self) -> &str {
		&self.name
	}

	/// True once termination has been requested by either side.
	pub fn terminating(&self) -> bool {
		self.token.is_cancelled()
	}

	/// Sends a message to the main thread, where the next drain will process
	/// it. Dropped without execution when the thread is already terminating,
	/// except during teardown.
	pub fn send_out(&mut self, msg: Box<dyn OutputMessage>) {
		self.send_raw(OutPayload::Work(msg), false);
	}

	pub(crate) fn send_raw(&mut self, payload: OutPayload, forced: bool) {
		if self.token.is_cancelled() && !forced && !self.teardown {
			debug!(thread = %self.name, "discarding output message sent while terminating");
			return;
		}
		self.out.put(payload);
		self.sent_out.fetch_add(1, Ordering::Relaxed);
		if forced || self.teardown {
			self.out.flush();
		}
	}

	fn report(&mut self, severity: Severity, text: &str) {
		let report = Report {
			severity,
			text: format!("{}: {}", self.name, text),
		};
		// Diagnostics survive shutdown and flush immediately so a fatal
		// report cannot sit behind a batch.
		self.send_raw(OutPayload::Report(report), true);
	}

	/// Reports an informational message through the main-thread reporter.
	pub fn info(&mut self, text: &str) {
		self.report(Severity::Info, text);
	}

	/// Reports a condition that may indicate a problem.
	pub fn warning(&mut self, text: &str) {
		self.report(Severity::Warning, text);
	}

	/// Reports a recoverable error; processing continues.
	pub fn error(&mut self, text: &str) {
		self.report(Severity::Error, text);
	}

	/// Reports an unrecoverable error. The engine terminates once the report
	/// is dispatched on the main thread; callers should also return `false`
	/// from the current message.
	pub fn fatal_error(&mut self, text: &str) {
		self.report(Severity::FatalError, text);
	}

	/// Like [`fatal_error`](Self::fatal_error), but the engine produces a
	/// core dump.
	pub fn fatal_error_with_core(&mut self, text: &str) {
		self.report(Severity::FatalErrorWithCore, text);
	}

	/// Reports a potential internal problem; the engine continues.
	pub fn internal_warning(&mut self, text: &str) {
		self.report(Severity::InternalWarning, text);
	}

	/// Reports an internal invariant failure. The engine terminates with a
	/// core dump once dispatched.
	pub fn internal_error(&mut self, text: &str) {
		self.report(Severity::InternalError, text);
	}

	/// Records a debug message for the given stream. Compiled to a no-op in
	/// release builds.
	pub fn debug(&mut self, stream: &'static str, text: &str) {
		if cfg!(debug_assertions) {
			self.report(Severity::Debug { stream }, text);
		}
	}
}

/// The parts that move onto the child thread at start.
struct ChildParts<W> {
	worker: W,
	in_rx: QueueReader<InEnvelope<W>>,
	ctx: WorkerContext,
}

/// Main-thread handle to a bi-directional message-passing child thread.
///
/// Created through [`Manager::create`](crate::manager::Manager::create),
/// which registers the thread for draining and heartbeats. All methods are
/// main-thread-only; the handle is deliberately not `Send`.
pub struct MsgThread<W: Worker> {
	base: BasicThread,
	state: ThreadState,
	in_tx: QueueWriter<InEnvelope<W>>,
	out_rx: QueueReader<OutPayload>,
	child: Option<ChildParts<W>>,
	reporter: Arc<dyn Reporter>,
	debug_log: Arc<dyn DebugLog>,
	sent_in: u64,
	sent_out: Arc<AtomicU64>,
	heartbeats_acked: u64,
	on_heartbeat: Option<Box<dyn FnMut()>>,
}

impl<W: Worker> MsgThread<W> {
	pub(crate) fn new(
		name: impl Into<String>,
		worker: W,
		config: &ThreadConfig,
		reporter: Arc<dyn Reporter>,
		debug_log: Arc<dyn DebugLog>,
	) -> Self {
		let base = BasicThread::new(name);
		let (in_tx, in_rx) = queue::spsc(&config.in_queue);
		let (out_tx, out_rx) = queue::spsc(&config.out_queue);
		let sent_out = Arc::new(AtomicU64::new(0));

		let ctx = WorkerContext {
			name: Arc::from(base.name()),
			out: out_tx,
			token: base.token(),
			sent_out: Arc::clone(&sent_out),
			teardown: false,
		};

		Self {
			base,
			state: ThreadState::New,
			in_tx,
			out_rx,
			child: Some(ChildParts { worker, in_rx, ctx }),
			reporter,
			debug_log,
			sent_in: 0,
			sent_out,
			heartbeats_acked: 0,
			on_heartbeat: None,
		}
	}

	pub fn name(&self) -> &str {
		self.base.name()
	}

	pub fn state(&self) -> ThreadState {
		self.state
	}

	/// True once termination has been requested by either side.
	pub fn terminating(&self) -> bool {
		self.base.is_cancelled()
	}

	/// True once the child OS thread has exited, cleanly or not. Used as the
	/// shutdown fallback for children that died without their sentinel.
	pub fn is_finished(&self) -> bool {
		self.base.is_finished()
	}

	/// Installs the main-side heartbeat hook, invoked during a drain once per
	/// child acknowledgment. The hook must not re-enter this handle.
	pub fn set_on_heartbeat(&mut self, hook: impl FnMut() + 'static) {
		self.on_heartbeat = Some(Box::new(hook));
	}

	/// Heartbeats acknowledged by the child so far.
	pub fn heartbeats_acked(&self) -> u64 {
		self.heartbeats_acked
	}

	/// Starts the child thread.
	pub fn start(&mut self) -> Result<(), ThreadError> {
		let Some(parts) = self.child.take() else {
			return Err(ThreadError::AlreadyStarted {
				name: self.base.name().to_string(),
			});
		};
		self.base.start(move |token| run(parts, token))?;
		self.advance(ThreadState::Running);
		Ok(())
	}

	/// Sends a message to the child thread.
	///
	/// Once the thread is terminating the message is dropped without
	/// execution and without counting towards `sent_in`.
	pub fn send_in(&mut self, msg: Box<dyn InputMessage<W>>) {
		self.send_in_raw(InPayload::Work(msg), false);
	}

	fn send_in_raw(&mut self, payload: InPayload<W>, forced: bool) {
		if (self.terminating() || self.state >= ThreadState::Draining) && !forced {
			debug!(thread = %self.base.name(), "discarding input message sent while terminating");
			return;
		}
		self.in_tx.put(InEnvelope { payload, forced });
		self.sent_in += 1;
		if forced {
			// Control messages must not linger behind the batch threshold.
			self.in_tx.flush();
		}
	}

	/// Injects a heartbeat carrying the engine's network and wall clocks. It
	/// rides in-band with ordinary input work, so the child observes it after
	/// everything sent before this call.
	pub fn heartbeat(&mut self, network_time: f64, wall_time: f64) {
		if self.state >= ThreadState::Exited {
			return;
		}
		self.send_in_raw(InPayload::Heartbeat { network_time, wall_time }, true);
	}

	/// Requests termination: latches the flag and wakes the child with a
	/// forced shutdown sentinel. Everything already enqueued is still
	/// processed; later non-forced sends are dropped.
	pub fn request_stop(&mut self) {
		if self.state >= ThreadState::Draining {
			return;
		}
		if self.state == ThreadState::New {
			// Never started: no child to signal, nothing to drain.
			self.base.request_stop();
			self.advance(ThreadState::Exited);
			return;
		}
		self.advance(ThreadState::Draining);
		self.base.request_stop();
		self.send_in_raw(InPayload::Finish, true);
	}

	/// Drains all currently-ready output, dispatching each element on the
	/// calling (main) thread. Returns the number of elements processed.
	pub fn drain_once(&mut self) -> usize {
		// Lock-free fast path for the common idle case.
		if !self.out_rx.maybe_ready() {
			return 0;
		}

		let mut processed = 0;
		while let Some(payload) = self.out_rx.try_get() {
			processed += 1;
			match payload {
				OutPayload::Work(mut msg) => {
					if !msg.process() {
						self.request_stop();
					}
				}
				OutPayload::Report(report) => {
					report.dispatch(self.reporter.as_ref(), self.debug_log.as_ref());
				}
				OutPayload::HeartbeatAck => {
					self.heartbeats_acked += 1;
					if let Some(hook) = self.on_heartbeat.as_mut() {
						hook();
					}
				}
				OutPayload::Finished => {
					debug!(thread = %self.base.name(), "child finished");
					self.advance(ThreadState::Exited);
				}
			}
		}
		processed
	}

	/// Joins the child thread, surfacing a panic as
	/// [`ThreadError::Panicked`].
	pub fn join(&mut self) -> Result<(), ThreadError> {
		if self.child.is_some() {
			// Never started; nothing to join.
			self.advance(ThreadState::Joined);
			return Ok(());
		}
		self.base.join()?;
		self.advance(ThreadState::Joined);
		Ok(())
	}

	/// Snapshot of the inter-thread communication counters.
	pub fn stats(&self) -> ThreadStats {
		let queue_in = self.in_tx.stats();
		let queue_out = self.out_rx.stats();
		let sent_out = self.sent_out.load(Ordering::Relaxed);
		ThreadStats {
			sent_in: self.sent_in,
			sent_out,
			pending_in: self.sent_in.saturating_sub(queue_in.dequeued),
			pending_out: sent_out.saturating_sub(queue_out.dequeued),
			queue_in,
			queue_out,
		}
	}

	/// One-way state ratchet; regressions are ignored.
	fn advance(&mut self, next: ThreadState) {
		if next > self.state {
			self.state = next;
		}
	}
}

/// The child's run loop.
///
/// Processes input until termination has been requested and the in-queue is
/// empty; a message returning `false` latches the termination flag itself.
/// The bounded queue wait guarantees the latch is observed within one
/// interval even when no input arrives.
fn run<W: Worker>(parts: ChildParts<W>, token: CancellationToken) {
	let ChildParts {
		mut worker,
		mut in_rx,
		mut ctx,
	} = parts;

	debug!(thread = %ctx.name, "message loop started");

	loop {
		if token.is_cancelled() && !in_rx.ready() {
			break;
		}

		let Some(envelope) = in_rx.get() else {
			// Bounded wait elapsed; re-check the latch.
			continue;
		};

		let keep_going = match envelope.payload {
			InPayload::Work(mut msg) => msg.process(&mut worker, &mut ctx),
			InPayload::Heartbeat { network_time, wall_time } => {
				let keep_going = worker.do_heartbeat(&mut ctx, network_time, wall_time);
				ctx.send_raw(OutPayload::HeartbeatAck, true);
				keep_going
			}
			InPayload::Finish => false,
		};

		if !keep_going {
			token.cancel();
		}
	}

	// Residual drain: forced sends still execute, the rest is dropped
	// unprocessed.
	while let Some(envelope) = in_rx.try_get() {
		if !envelope.forced {
			continue;
		}
		match envelope.payload {
			InPayload::Work(mut msg) => {
				msg.process(&mut worker, &mut ctx);
			}
			InPayload::Heartbeat { network_time, wall_time } => {
				worker.do_heartbeat(&mut ctx, network_time, wall_time);
				ctx.send_raw(OutPayload::HeartbeatAck, true);
			}
			InPayload::Finish => {}
		}
	}

	ctx.teardown = true;
	worker.on_stop(&mut ctx);
	ctx.send_raw(OutPayload::Finished, true);

	debug!(thread = %ctx.name, "message loop stopped");
}

#[cfg(test)]
mod tests {
	use std::{
		sync::Mutex,
		time::{Duration, Instant},
	};

	use super::*;
	use crate::message::{ClosureInput, ClosureOutput};
	use crate::report::tests_support::RecordingSink;

	struct Echo;

	impl Worker for Echo {}

	fn test_thread(name: &str) -> (MsgThread<Echo>, Arc<RecordingSink>) {
		let sink = Arc::new(RecordingSink::default());
		let thread = MsgThread::new(name, Echo, &ThreadConfig::default(), sink.clone(), sink.clone());
		(thread, sink)
	}

	fn drain_until<W: Worker>(
		thread: &mut MsgThread<W>,
		deadline: Duration,
		mut done: impl FnMut(&MsgThread<W>) -> bool,
	) {
		let start = Instant::now();
		while !done(thread) {
			thread.drain_once();
			assert!(start.elapsed() < deadline, "timed out waiting for thread condition");
			std::thread::sleep(Duration::from_millis(1));
		}
	}

	#[test]
	fn test_state_machine_is_monotonic() {
		let (mut thread, _sink) = test_thread("states");
		assert_eq!(thread.state(), ThreadState::New);

		thread.start().unwrap();
		assert_eq!(thread.state(), ThreadState::Running);

		thread.request_stop();
		assert_eq!(thread.state(), ThreadState::Draining);

		drain_until(&mut thread, Duration::from_secs(5), |t| t.state() == ThreadState::Exited);

		thread.join().unwrap();
		assert_eq!(thread.state(), ThreadState::Joined);
	}

	#[test]
	fn test_input_reaches_worker_and_output_returns() {
		let (mut thread, _sink) = test_thread("echo");
		let received = Arc::new(Mutex::new(Vec::new()));
		thread.start().unwrap();

		for i in 0..10u64 {
			let received = received.clone();
			thread.send_in(Box::new(ClosureInput::new("echo", move |_: &mut Echo, ctx: &mut WorkerContext| {
				let received = received.clone();
				ctx.send_out(Box::new(ClosureOutput::new("echoed", move || {
					received.lock().unwrap().push(i);
					true
				})));
				true
			})));
		}

		drain_until(&mut thread, Duration::from_secs(5), |_| received.lock().unwrap().len() == 10);
		assert!(received.lock().unwrap().iter().copied().eq(0..10));

		thread.request_stop();
		drain_until(&mut thread, Duration::from_secs(5), |t| t.state() == ThreadState::Exited);
		thread.join().unwrap();
	}

	#[test]
	fn test_send_after_stop_is_dropped() {
		let (mut thread, _sink) = test_thread("dropper");
		thread.start().unwrap();
		thread.request_stop();

		let sent_before = thread.stats().sent_in;
		thread.send_in(Box::new(ClosureInput::new("late", |_: &mut Echo, _: &mut WorkerContext| true)));
		assert_eq!(thread.stats().sent_in, sent_before);

		drain_until(&mut thread, Duration::from_secs(5), |t| t.state() == ThreadState::Exited);
		thread.join().unwrap();
	}

	#[test]
	fn test_diagnostics_are_prefixed_and_ordered() {
		let (mut thread, sink) = test_thread("loggy");
		thread.start().unwrap();

		thread.send_in(Box::new(ClosureInput::new("diagnose", |_: &mut Echo, ctx: &mut WorkerContext| {
			ctx.info("a");
			ctx.warning("b");
			ctx.info("c");
			ctx.debug("wire", "d");
			true
		})));

		drain_until(&mut thread, Duration::from_secs(5), |_| sink.len() == 4);
		assert_eq!(
			sink.take(),
			vec!["info:loggy: a", "warn:loggy: b", "info:loggy: c", "debug[wire]:loggy: d"]
		);

		thread.request_stop();
		drain_until(&mut thread, Duration::from_secs(5), |t| t.state() == ThreadState::Exited);
		thread.join().unwrap();
	}

	#[test]
	fn test_process_false_terminates_thread() {
		let (mut thread, _sink) = test_thread("selfstop");
		thread.start().unwrap();

		thread.send_in(Box::new(ClosureInput::new("stop", |_: &mut Echo, _: &mut WorkerContext| false)));

		drain_until(&mut thread, Duration::from_secs(5), |t| t.state() == ThreadState::Exited);
		assert!(thread.terminating());
		thread.join().unwrap();
	}

	#[test]
	fn test_heartbeat_round_trip() {
		struct Beats {
			ticks: Arc<Mutex<Vec<(f64, f64)>>>,
		}
		impl Worker for Beats {
			fn do_heartbeat(&mut self, _ctx: &mut WorkerContext, network_time: f64, wall_time: f64) -> bool {
				self.ticks.lock().unwrap().push((network_time, wall_time));
				true
			}
		}

		let ticks = Arc::new(Mutex::new(Vec::new()));
		let sink = Arc::new(RecordingSink::default());
		let mut thread = MsgThread::new(
			"pulse",
			Beats { ticks: ticks.clone() },
			&ThreadConfig::default(),
			sink.clone(),
			sink,
		);

		let acks = Arc::new(Mutex::new(0u32));
		let hook_acks = acks.clone();
		thread.set_on_heartbeat(move || *hook_acks.lock().unwrap() += 1);

		thread.start().unwrap();
		thread.heartbeat(1.0, 10.0);
		thread.heartbeat(2.0, 20.0);

		drain_until(&mut thread, Duration::from_secs(5), |t| t.heartbeats_acked() == 2);
		assert_eq!(*ticks.lock().unwrap(), vec![(1.0, 10.0), (2.0, 20.0)]);
		assert_eq!(*acks.lock().unwrap(), 2);

		thread.request_stop();
		drain_until(&mut thread, Duration::from_secs(5), |t| t.state() == ThreadState::Exited);
		thread.join().unwrap();
	}

	#[test]
	fn test_on_stop_output_is_delivered() {
		struct Parting;
		impl Worker for Parting {
			fn on_stop(&mut self, ctx: &mut WorkerContext) {
				ctx.send_out(Box::new(ClosureOutput::new("goodbye", || true)));
				ctx.info("done");
			}
		}

		let sink = Arc::new(RecordingSink::default());
		let mut thread = MsgThread::new("parting", Parting, &ThreadConfig::default(), sink.clone(), sink.clone());
		thread.start().unwrap();
		thread.request_stop();

		let start = Instant::now();
		while thread.state() != ThreadState::Exited {
			thread.drain_once();
			assert!(start.elapsed() < Duration::from_secs(5));
			std::thread::sleep(Duration::from_millis(1));
		}
		assert_eq!(sink.take(), vec!["info:parting: done"]);
		thread.join().unwrap();
	}

	#[test]
	fn test_stats_track_pending_work() {
		let (mut thread, _sink) = test_thread("stats");
		// Not started: everything sent stays pending.
		for _ in 0..4 {
			thread.send_in(Box::new(ClosureInput::new("work", |_: &mut Echo, _: &mut WorkerContext| true)));
		}
		let stats = thread.stats();
		assert_eq!(stats.sent_in, 4);
		assert_eq!(stats.pending_in, 4);
		assert_eq!(stats.sent_out, 0);

		thread.start().unwrap();
		drain_until(&mut thread, Duration::from_secs(5), |t| t.stats().pending_in == 0);

		thread.request_stop();
		drain_until(&mut thread, Duration::from_secs(5), |t| t.state() == ThreadState::Exited);
		thread.join().unwrap();
	}
}
