//! Process exit codes.

use ilias_core::AuthError;
use ilias_sync::{SyncError, SyncReport};

pub const SUCCESS: u8 = 0;
/// Any fatal error not covered below
pub const FATAL: u8 = 1;
/// The run finished, but items failed, conflicted, or it was cancelled
pub const PROBLEMS: u8 = 2;
pub const INVALID_CREDENTIALS: u8 = 77;

pub fn for_report(report: &SyncReport) -> u8 {
    if report.has_problems() {
        PROBLEMS
    } else {
        SUCCESS
    }
}

pub fn for_error(error: &anyhow::Error) -> u8 {
    let bad_credentials = error
        .downcast_ref::<AuthError>()
        .is_some_and(|e| *e == AuthError::InvalidCredentials)
        || error
            .downcast_ref::<SyncError>()
            .is_some_and(SyncError::is_invalid_credentials);
    if bad_credentials {
        INVALID_CREDENTIALS
    } else {
        FATAL
    }
}
