//! Stable process exit codes.

use mtconnect_bridge::BridgeError;

/// Exit code: invalid configuration input.
pub const EXIT_INVALID_CONFIG: i32 = 10;
/// Exit code: agent unreachable or answered with a non-200 status.
pub const EXIT_TRANSPORT: i32 = 11;
/// Exit code: unexpected/internal failure.
pub const EXIT_INTERNAL: i32 = 20;

/// Map a failed command to its exit code.
#[must_use]
pub fn classify_error(err: &anyhow::Error) -> i32 {
    match err.downcast_ref::<BridgeError>() {
        Some(BridgeError::InvalidConfig(_)) => EXIT_INVALID_CONFIG,
        Some(BridgeError::Transport(_)) => EXIT_TRANSPORT,
        _ => EXIT_INTERNAL,
    }
}
