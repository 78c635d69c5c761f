// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 ReifyDB

//! Error types for thread lifecycle operations.

use std::io;

/// Errors surfaced by thread lifecycle operations.
#[derive(Debug, thiserror::Error)]
pub enum ThreadError {
	/// The OS refused to spawn the thread.
	#[error("failed to spawn thread `{name}`: {source}")]
	Spawn {
		name: String,
		#[source]
		source: io::Error,
	},

	/// The thread panicked; the payload is the stringified panic value.
	#[error("thread `{name}` panicked: {payload}")]
	Panicked { name: String, payload: String },

	/// `start` was called on a thread that is already running.
	#[error("thread `{name}` already started")]
	AlreadyStarted { name: String },

	/// `join` was called on a thread that was never started.
	#[error("thread `{name}` not started")]
	NotStarted { name: String },
}
