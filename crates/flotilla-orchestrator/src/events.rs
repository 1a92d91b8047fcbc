//! App event log.

use std::fmt::Display;

use tracing::info;

/// Log a human-readable event for an app (`"{app}: {message}"`).
///
/// Events go to the `flotilla::events` target so operators can route
/// them separately. Logging never fails the caller.
pub fn log_event(app: &str, message: impl Display) {
    info!(target: "flotilla::events", app, "{app}: {message}");
}
