// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 ReifyDB

//! Diagnostic severities and the main-thread sinks they dispatch to.
//!
//! Child threads never call a sink directly; they enqueue a [`Report`] on
//! their out-queue and the main-thread drain dispatches it here, linearized
//! with all other main-thread work.

use std::process;

use tracing::{debug, error, info, warn};

/// Severity classes for child-thread diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
	Info,
	Warning,
	/// Recoverable; processing continues after the report.
	Error,
	/// Terminates the engine after dispatch.
	FatalError,
	/// Terminates the engine with a core dump after dispatch.
	FatalErrorWithCore,
	/// Potential internal problem; the engine continues.
	InternalWarning,
	/// Internal invariant failure; terminates with a core dump.
	InternalError,
	/// Debug-build-only diagnostic, routed to the debug log.
	Debug { stream: &'static str },
}

/// A diagnostic marshalled from a child thread, its text already prefixed
/// with the thread name.
#[derive(Debug)]
pub(crate) struct Report {
	pub severity: Severity,
	pub text: String,
}

impl Report {
	pub(crate) fn dispatch(&self, reporter: &dyn Reporter, debug_log: &dyn DebugLog) {
		match self.severity {
			Severity::Info => reporter.info(&self.text),
			Severity::Warning => reporter.warning(&self.text),
			Severity::Error => reporter.error(&self.text),
			Severity::FatalError => reporter.fatal_error(&self.text),
			Severity::FatalErrorWithCore => reporter.fatal_error_with_core(&self.text),
			Severity::InternalWarning => reporter.internal_warning(&self.text),
			Severity::InternalError => reporter.internal_error(&self.text),
			Severity::Debug { stream } => debug_log.log(stream, &self.text),
		}
	}
}

/// Main-thread sink for child diagnostics.
///
/// The fatal methods are expected to end the process; a recording double may
/// return instead, in which case draining simply continues.
pub trait Reporter: Send + Sync {
	fn info(&self, text: &str);

	fn warning(&self, text: &str);

	/// A recoverable error; the thread keeps running.
	fn error(&self, text: &str);

	/// Expected to terminate the process with a nonzero exit code.
	fn fatal_error(&self, text: &str);

	/// Expected to terminate the process with a core dump.
	fn fatal_error_with_core(&self, text: &str);

	fn internal_warning(&self, text: &str);

	/// Internal invariant failure; expected to terminate with a core dump.
	fn internal_error(&self, text: &str);
}

/// Main-thread sink for debug-build diagnostics.
pub trait DebugLog: Send + Sync {
	fn log(&self, stream: &str, text: &str);
}

/// Default reporter dispatching to `tracing`, terminating the process on the
/// fatal severities.
#[derive(Debug, Default)]
pub struct TracingReporter;

impl Reporter for TracingReporter {
	fn info(&self, text: &str) {
		info!("{text}");
	}

	fn warning(&self, text: &str) {
		warn!("{text}");
	}

	fn error(&self, text: &str) {
		error!("{text}");
	}

	fn fatal_error(&self, text: &str) {
		error!("fatal error: {text}");
		process::exit(1);
	}

	fn fatal_error_with_core(&self, text: &str) {
		error!("fatal error: {text}");
		process::abort();
	}

	fn internal_warning(&self, text: &str) {
		warn!("internal warning: {text}");
	}

	fn internal_error(&self, text: &str) {
		error!("internal error: {text}");
		process::abort();
	}
}

/// Default debug log dispatching to `tracing` at debug level.
#[derive(Debug, Default)]
pub struct TracingDebugLog;

impl DebugLog for TracingDebugLog {
	fn log(&self, stream: &str, text: &str) {
		debug!(stream, "{text}");
	}
}

#[cfg(test)]
pub(crate) mod tests_support {
	use std::sync::Mutex;

	use super::{DebugLog, Reporter};

	/// Records every sink call with a routing prefix, for assertions.
	#[derive(Default)]
	pub(crate) struct RecordingSink {
		calls: Mutex<Vec<String>>,
	}

	impl RecordingSink {
		pub(crate) fn len(&self) -> usize {
			self.calls.lock().unwrap().len()
		}

		pub(crate) fn take(&self) -> Vec<String> {
			std::mem::take(&mut *self.calls.lock().unwrap())
		}

		fn push(&self, entry: String) {
			self.calls.lock().unwrap().push(entry);
		}
	}

	impl Reporter for RecordingSink {
		fn info(&self, text: &str) {
			self.push(format!("info:{text}"));
		}
		fn warning(&self, text: &str) {
			self.push(format!("warn:{text}"));
		}
		fn error(&self, text: &str) {
			self.push(format!("error:{text}"));
		}
		fn fatal_error(&self, text: &str) {
			self.push(format!("fatal:{text}"));
		}
		fn fatal_error_with_core(&self, text: &str) {
			self.push(format!("fatal-core:{text}"));
		}
		fn internal_warning(&self, text: &str) {
			self.push(format!("internal-warn:{text}"));
		}
		fn internal_error(&self, text: &str) {
			self.push(format!("internal-error:{text}"));
		}
	}

	impl DebugLog for RecordingSink {
		fn log(&self, stream: &str, text: &str) {
			self.push(format!("debug[{stream}]:{text}"));
		}
	}
}
