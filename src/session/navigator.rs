//! Navigation capability invoked when a session ends.

/// Moves the application to another location.
///
/// Injected into the client at construction so session termination stays testable outside a
/// real browser or UI shell.
pub trait Navigator: Send + Sync {
	/// Navigate to `path`.
	fn redirect(&self, path: &str);
}
impl<F> Navigator for F
where
	F: Fn(&str) + Send + Sync,
{
	fn redirect(&self, path: &str) {
		self(path)
	}
}

/// Navigator that only records the redirect in the log.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogNavigator;
impl Navigator for LogNavigator {
	fn redirect(&self, path: &str) {
		tracing::info!(path, "session ended; redirect requested");
	}
}
