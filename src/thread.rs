// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 ReifyDB

//! OS-thread lifecycle: named spawn, stop latch, join.

use std::{
	any::Any,
	sync::{
		Arc,
		atomic::{AtomicBool, Ordering},
	},
	thread::{self, JoinHandle},
};

use tracing::debug;

use crate::error::ThreadError;

/// One-way termination latch shared between the main and child threads.
///
/// Set with release semantics, read with acquire semantics; once latched it
/// never resets.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
	flag: Arc<AtomicBool>,
}

impl CancellationToken {
	pub fn new() -> Self {
		Self::default()
	}

	/// Latches the token. Idempotent.
	pub fn cancel(&self) {
		self.flag.store(true, Ordering::Release);
	}

	pub fn is_cancelled(&self) -> bool {
		self.flag.load(Ordering::Acquire)
	}
}

/// A named OS thread with an explicit start/stop/join lifecycle.
pub struct BasicThread {
	name: String,
	token: CancellationToken,
	handle: Option<JoinHandle<()>>,
	started: bool,
}

impl BasicThread {
	pub fn new(name: impl Into<String>) -> Self {
		Self {
			name: name.into(),
			token: CancellationToken::new(),
			handle: None,
			started: false,
		}
	}

	pub fn name(&self) -> &str {
		&self.name
	}

	/// The termination latch observed by the child.
	pub fn token(&self) -> CancellationToken {
		self.token.clone()
	}

	/// Spawns the OS thread running `body`, handing it the termination latch.
	pub fn start<F>(&mut self, body: F) -> Result<(), ThreadError>
	where
		F: FnOnce(CancellationToken) + Send + 'static,
	{
		if self.started {
			return Err(ThreadError::AlreadyStarted {
				name: self.name.clone(),
			});
		}

		let token = self.token.clone();
		let name = self.name.clone();
		let handle = thread::Builder::new()
			.name(self.name.clone())
			.spawn(move || {
				debug!(thread = %name, "thread started");
				body(token);
				debug!(thread = %name, "thread exiting");
			})
			.map_err(|source| ThreadError::Spawn {
				name: self.name.clone(),
				source,
			})?;

		self.handle = Some(handle);
		self.started = true;
		Ok(())
	}

	/// Latches the termination flag. The child observes it within one bounded
	/// wait interval of its queue.
	pub fn request_stop(&self) {
		self.token.cancel();
	}

	pub fn is_cancelled(&self) -> bool {
		self.token.is_cancelled()
	}

	/// True once the OS thread has exited, whether cleanly or by panic.
	pub fn is_finished(&self) -> bool {
		match &self.handle {
			Some(handle) => handle.is_finished(),
			None => self.started,
		}
	}

	/// Joins the OS thread, mapping a panic into [`ThreadError::Panicked`].
	/// Idempotent once joined.
	pub fn join(&mut self) -> Result<(), ThreadError> {
		let Some(handle) = self.handle.take() else {
			if self.started {
				return Ok(());
			}
			return Err(ThreadError::NotStarted {
				name: self.name.clone(),
			});
		};

		handle.join().map_err(|payload| ThreadError::Panicked {
			name: self.name.clone(),
			payload: panic_message(payload),
		})?;
		debug!(thread = %self.name, "thread joined");
		Ok(())
	}
}

impl Drop for BasicThread {
	fn drop(&mut self) {
		// A dropped handle must not leave a detached child running.
		self.request_stop();
		if let Some(handle) = self.handle.take() {
			let _ = handle.join();
		}
	}
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
	if let Some(text) = payload.downcast_ref::<&'static str>() {
		(*text).to_string()
	} else if let Some(text) = payload.downcast_ref::<String>() {
		text.clone()
	} else {
		format!("{:?}", payload)
	}
}
