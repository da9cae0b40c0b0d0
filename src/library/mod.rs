//! Independent and project agnostic helpers
//!
//! Nothing in here knows about subjects, envelopes or brokers. The aliases below are used
//! wherever errors have to cross a trait boundary without being known to the caller.

pub mod helpers;

/// Generic error type
pub type BoxedError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result with no value and a [`BoxedError`]
pub type EmptyResult = Result<(), BoxedError>;
