//! Receive status information.

use crate::Rank;

/// Information about a received message.
///
/// Returned by [`Communicator::recv`](crate::Communicator::recv) so callers
/// can confirm who the data came from and how much of the buffer was filled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Status {
    /// Source rank of the message, in the receiving communicator.
    pub source: Rank,
    /// Tag of the message.
    pub tag: i32,
    /// Number of elements received.
    pub count: usize,
}
