//! Stack-usage monitoring for the worker/connection event loops.
//!
//! Grammers' TL deserialization recurses with the shape of the wire data; a pathological update
//! can nest deep enough to threaten the default thread stack, so workers periodically check
//! usage and force a reconnect before that happens.

/// Returns (stack_used, stack_remaining) in bytes, measured against a per-thread baseline
/// captured on first call.
pub fn stack_usage() -> (usize, usize) {
	let remaining = psm::stack_pointer() as usize;
	thread_local! {
		static STACK_BASE: std::cell::Cell<usize> = const { std::cell::Cell::new(0) };
	}

	STACK_BASE.with(|base| {
		if base.get() == 0 {
			base.set(remaining);
		}
		let used = base.get().saturating_sub(remaining);
		(used, remaining)
	})
}

/// Logs current stack usage at a level scaled to severity, for diagnosing stack overflows.
#[inline(never)]
pub fn log_stack_usage(context: &str) {
	let (used, _remaining) = stack_usage();
	if used > 2 * 1024 * 1024 {
		tracing::error!("[STACK] {context}: used {:.2}MB", used as f64 / (1024.0 * 1024.0));
	} else if used > 1024 * 1024 {
		tracing::warn!("[STACK] {context}: used {:.2}MB", used as f64 / (1024.0 * 1024.0));
	} else if used > 256 * 1024 {
		tracing::info!("[STACK] {context}: used {:.0}KB", used as f64 / 1024.0);
	} else if used > 64 * 1024 {
		tracing::debug!("[STACK] {context}: used {:.0}KB", used as f64 / 1024.0);
	}
}

/// Logs a critical-severity stack warning immediately before a forced reconnect.
pub fn log_stack_critical(context: &str, used: usize) {
	tracing::error!("[STACK CRITICAL] {context}: used {:.2}MB, forcing reconnect", used as f64 / (1024.0 * 1024.0));
}

pub fn should_reconnect_for_stack() -> bool {
	let (used, _) = stack_usage();
	if used > 6 * 1024 * 1024 {
		log_stack_critical("worker event loop", used);
		return true;
	}
	false
}
