//! Cooperative session contract.
//!
//! A conductor drives every active session with repeated `do_work` ticks on
//! one thread; each tick performs a bounded amount of work and returns.
//! Errors are fatal to their session: the session transitions itself toward
//! teardown before surfacing the error, stays driveable so the next tick
//! runs its cleanup, and other sessions are unaffected.

use crate::error::Result;

pub trait Session {
    /// Perform one bounded unit of work, returning a work count (bytes or
    /// fragments moved, or 1 for a state transition).
    fn do_work(&mut self) -> Result<usize>;

    /// Request termination; honoured at the next tick.
    fn abort(&mut self);

    /// True once the session reached its terminal state and can be removed.
    fn is_done(&self) -> bool;
}
