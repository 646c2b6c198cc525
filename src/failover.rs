//! Provider failover selectors.
//!
//! Each selector owns an ordered list of interchangeable providers and is a
//! [`Provider`](crate::provider::Provider) itself, so the dispatcher and the
//! workshop never need to know which policy is in use.
//!
//! | Selector                | Shared state                 | Switches when                      |
//! |-------------------------|------------------------------|------------------------------------|
//! | [`SequentialFailover`]  | none                         | every call walks the list in order |
//! | [`RoundRobinFailover`]  | index                        | every call, regardless of outcome  |
//! | [`TimeoutFailover`]     | index, consecutive timeouts  | timeouts exceed a threshold        |
//! | [`FailureRateFailover`] | index, successes, failures   | timeout ratio reaches a rate       |
//!
//! All shared state is mutated with atomic read-modify-write or
//! compare-and-swap. A caller that loses a switch race sleeps for
//! [`SWITCH_BACKOFF`] and re-reads the index instead of retrying the swap.

use std::time::Duration;

use crate::error::Error;

mod failure_rate;
mod round_robin;
mod sequential;
mod timeout;

pub use failure_rate::FailureRateFailover;
pub use round_robin::RoundRobinFailover;
pub use sequential::SequentialFailover;
pub use timeout::TimeoutFailover;

/// How long a caller that lost the index swap waits for the winner to finish
/// resetting the counters.
pub const SWITCH_BACKOFF: Duration = Duration::from_millis(1);

fn ensure_providers<P>(providers: &[P]) -> Result<(), Error> {
    if providers.is_empty() {
        return Err(Error::invalid_parameter(
            "at least one provider is required",
        ));
    }
    Ok(())
}
