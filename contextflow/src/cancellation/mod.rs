//! Cooperative cancellation of runs.
//!
//! Cancelling a run stops further setups and interrupts the benchmarked
//! action; cleanup of every plugin that was set up still runs.

mod token;

pub use token::CancellationToken;
