// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 ReifyDB

//! Batched single-producer/single-consumer queue.
//!
//! Designed for high message rates with infrequent lock acquisition: the
//! writer accumulates elements in a local buffer and splices whole batches
//! onto a shared staging buffer under one mutex; the reader swaps the staging
//! buffer into its own local buffer and pops lock-free from there. The mutex
//! is held only for splices.
//!
//! The writer/reader split makes the single-producer/single-consumer
//! restriction structural: each half moves to its thread and cannot be
//! cloned.

use std::{
	collections::VecDeque,
	sync::{
		Arc,
		atomic::{AtomicU64, Ordering},
	},
	time::Duration,
};

use parking_lot::{Condvar, Mutex};

/// Tuning knobs for one queue.
#[derive(Debug, Clone)]
pub struct QueueConfig {
	/// Writer-local elements that trigger a splice into staging.
	pub batch_size: usize,
	/// Upper bound on a single blocking [`QueueReader::get`].
	pub wait_timeout: Duration,
}

impl QueueConfig {
	pub fn with_batch_size(mut self, batch_size: usize) -> Self {
		self.batch_size = batch_size;
		self
	}

	pub fn with_wait_timeout(mut self, wait_timeout: Duration) -> Self {
		self.wait_timeout = wait_timeout;
		self
	}
}

impl Default for QueueConfig {
	fn default() -> Self {
		Self {
			batch_size: 10,
			wait_timeout: Duration::from_millis(50),
		}
	}
}

/// Monotonic counters of one queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
	/// Elements handed to [`QueueWriter::put`].
	pub enqueued: u64,
	/// Elements returned from [`QueueReader::get`] / [`QueueReader::try_get`].
	pub dequeued: u64,
}

impl QueueStats {
	/// Elements put but not yet taken, including any still in the
	/// writer-local buffer.
	pub fn pending(&self) -> u64 {
		self.enqueued.saturating_sub(self.dequeued)
	}
}

struct Shared<T> {
	staging: Mutex<VecDeque<T>>,
	available: Condvar,
	enqueued: AtomicU64,
	dequeued: AtomicU64,
	/// Elements moved from staging into the reader-local buffer. Written by
	/// the reader under the staging lock, read lock-free by the writer to
	/// detect a dry consumer.
	spliced: AtomicU64,
}

impl<T> Shared<T> {
	fn maybe_ready(&self) -> bool {
		self.enqueued.load(Ordering::Relaxed) != self.dequeued.load(Ordering::Relaxed)
	}

	fn stats(&self) -> QueueStats {
		QueueStats {
			enqueued: self.enqueued.load(Ordering::Relaxed),
			dequeued: self.dequeued.load(Ordering::Relaxed),
		}
	}
}

/// Creates a connected writer/reader pair.
pub fn spsc<T>(config: &QueueConfig) -> (QueueWriter<T>, QueueReader<T>) {
	let shared = Arc::new(Shared {
		staging: Mutex::new(VecDeque::new()),
		available: Condvar::new(),
		enqueued: AtomicU64::new(0),
		dequeued: AtomicU64::new(0),
		spliced: AtomicU64::new(0),
	});

	let writer = QueueWriter {
		local: VecDeque::new(),
		batch_size: config.batch_size.max(1),
		shared: Arc::clone(&shared),
	};
	let reader = QueueReader {
		local: VecDeque::new(),
		wait_timeout: config.wait_timeout,
		shared,
	};
	(writer, reader)
}

/// Producer half. Owned by exactly one thread.
pub struct QueueWriter<T> {
	local: VecDeque<T>,
	batch_size: usize,
	shared: Arc<Shared<T>>,
}

impl<T> QueueWriter<T> {
	/// Appends to the writer-local buffer, splicing into the shared staging
	/// buffer once a batch has accumulated or the consumer side has run dry.
	pub fn put(&mut self, value: T) {
		self.local.push_back(value);
		self.shared.enqueued.fetch_add(1, Ordering::Relaxed);

		let consumer_dry =
			self.shared.spliced.load(Ordering::Relaxed) == self.shared.dequeued.load(Ordering::Relaxed);
		if self.local.len() >= self.batch_size || consumer_dry {
			self.flush();
		}
	}

	/// Unconditionally splices the writer-local buffer onto staging and wakes
	/// the reader. Called by the thread layer after control messages so they
	/// never linger behind the batch threshold.
	pub fn flush(&mut self) {
		if self.local.is_empty() {
			return;
		}
		let mut staging = self.shared.staging.lock();
		staging.append(&mut self.local);
		drop(staging);
		self.shared.available.notify_one();
	}

	/// Lock-free hint that the reader may have elements pending. May be
	/// spuriously true, never false once a flush has completed.
	pub fn maybe_ready(&self) -> bool {
		self.shared.maybe_ready()
	}

	pub fn stats(&self) -> QueueStats {
		self.shared.stats()
	}
}

impl<T> Drop for QueueWriter<T> {
	fn drop(&mut self) {
		// Publish whatever is still local so the reader can drain it.
		self.flush();
	}
}

/// Consumer half. Owned by exactly one thread.
pub struct QueueReader<T> {
	local: VecDeque<T>,
	wait_timeout: Duration,
	shared: Arc<Shared<T>>,
}

impl<T> QueueReader<T> {
	/// Pops the next element, blocking for at most the configured timeout.
	///
	/// The bounded wait keeps termination observable: a caller looping on
	/// `get` re-checks its stop condition at least once per interval.
	pub fn get(&mut self) -> Option<T> {
		if let Some(value) = self.pop_local() {
			return Some(value);
		}

		let mut staging = self.shared.staging.lock();
		if staging.is_empty() {
			let _ = self.shared.available.wait_for(&mut staging, self.wait_timeout);
		}
		Self::take_staged(&self.shared, &mut self.local, &mut staging);
		drop(staging);

		self.pop_local()
	}

	/// Non-blocking pop. Used by the main-thread drain, which must never
	/// stall the event loop.
	pub fn try_get(&mut self) -> Option<T> {
		if let Some(value) = self.pop_local() {
			return Some(value);
		}

		let mut staging = self.shared.staging.lock();
		Self::take_staged(&self.shared, &mut self.local, &mut staging);
		drop(staging);

		self.pop_local()
	}

	/// True when a `get` would succeed without waiting.
	pub fn ready(&self) -> bool {
		!self.local.is_empty() || !self.shared.staging.lock().is_empty()
	}

	/// Lock-free hint; may be spuriously true while elements sit in the
	/// writer-local buffer.
	pub fn maybe_ready(&self) -> bool {
		self.shared.maybe_ready()
	}

	pub fn stats(&self) -> QueueStats {
		self.shared.stats()
	}

	fn pop_local(&mut self) -> Option<T> {
		let value = self.local.pop_front();
		if value.is_some() {
			self.shared.dequeued.fetch_add(1, Ordering::Relaxed);
		}
		value
	}

	fn take_staged(shared: &Shared<T>, local: &mut VecDeque<T>, staging: &mut VecDeque<T>) {
		if !staging.is_empty() {
			shared.spliced.fetch_add(staging.len() as u64, Ordering::Relaxed);
			local.append(staging);
		}
	}
}
