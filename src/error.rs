use crate::timer::TimerList;
use thiserror::Error;

/// A type alias for handling `Result`s with `Error`
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the transaction table and its timer lists.
///
/// No-match on a lookup is *not* an error (a retransmitted response for a
/// finalized transaction is an everyday event); lookups return `Option`
/// instead. The variants here are either caller mistakes around timer-list
/// scheduling or invalid table parameters, and none of them leaves a list
/// in a corrupt state.
#[derive(Error, Debug)]
pub enum Error {
    /// The table was asked for zero hash buckets.
    #[error("transaction table needs at least one bucket")]
    EmptyTable,

    /// A cell was appended to a timer list while still scheduled somewhere.
    #[error("cell {ident} is already scheduled on the {scheduled_on} timer list")]
    AlreadyScheduled {
        /// Compact identifier of the offending cell.
        ident: String,
        /// The list the cell currently sits on.
        scheduled_on: TimerList,
    },

    /// A cell was removed from a timer list it is not scheduled on.
    #[error("cell {ident} is not scheduled on the {list} timer list")]
    NotScheduled {
        /// Compact identifier of the offending cell.
        ident: String,
        /// The list the caller named.
        list: TimerList,
    },

    /// `check_and_split` was invoked on an empty timer list.
    #[error("timer list {0} is empty, nothing to split")]
    EmptyTimerList(TimerList),
}
