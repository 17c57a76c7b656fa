//! SIP transaction hash table for proxy/server cores
//!
//! This crate is the transaction-table subsystem of a SIP proxy: the shared,
//! lock-striped structure that correlates incoming requests, ACKs, CANCELs
//! and responses to the transaction state created when the original request
//! first arrived. It consumes already-parsed header fields (From, To, tags,
//! Call-ID, CSeq, Request-URI) and owns no SIP syntax, no sockets and no
//! retransmission payloads.
//!
//! ```text
//! +---------------------------+
//! |  Routing / forwarding     |  <- decides where messages go
//! +---------------------------+
//!              | add / match / ref
//!              v
//! +---------------------------+
//! |  Transaction table        |  <- this crate
//! |  buckets + timer lists    |
//! +---------------------------+
//!              ^
//!              | parsed header fields
//! +---------------------------+
//! |  Parser / transport       |
//! +---------------------------+
//! ```
//!
//! ## Pieces
//!
//! - [`Table`]: the bucket array (hash of Call-ID + CSeq number), one lock
//!   and one label counter per bucket, plus the four timer lists and the
//!   logical clock its maintenance pass advances.
//! - [`Cell`]: one transaction's state; owned field copies, bucket
//!   coordinates, atomic reference counter, embedded timer link.
//! - [`TransactionRef`]: the counted handle every insertion and lookup
//!   returns; drop releases the reference, and a cell is only freed once
//!   unreachable and unreferenced.
//! - [`BranchId`]: the compact `"<hash_index> a <label>"` identifier a
//!   proxy embeds in its Via branch; responses echoing it back get matched
//!   by a label-only scan of a single bucket.
//! - Matching: [`Table::match_request`], [`Table::match_ack`],
//!   [`Table::match_cancel`], [`Table::match_response`] — one strategy per
//!   message shape, each a single-bucket scan.
//! - [`TimerQueue`]/[`TimerList`]: lock-protected, insertion-ordered lists
//!   scheduling retransmission, final-response, wait and delete actions.
//!
//! ## Locking
//!
//! One lock per bucket, one per timer list, an atomic counter per cell.
//! No operation takes two bucket locks, holds a bucket lock while
//! acquiring a timer-list lock, or holds any lock across a whole-table
//! walk. Worst-case contention is one bucket.

mod cell;
mod error;
mod ident;
mod matching;
mod table;
mod timer;

pub use cell::{Cell, TransactionRef};
pub use error::{Error, Result};
pub use ident::BranchId;
pub use matching::{AckProbe, CancelProbe, RequestProbe, ResponseProbe};
pub use table::{NewTransaction, Table, TABLE_ENTRIES};
pub use timer::{TimerList, TimerQueue, NR_OF_TIMER_LISTS};

/// Re-export of common types and functions
pub mod prelude {
    pub use crate::{
        AckProbe, BranchId, CancelProbe, Cell, Error, NewTransaction, RequestProbe,
        ResponseProbe, Result, Table, TimerList, TimerQueue, TransactionRef,
        NR_OF_TIMER_LISTS, TABLE_ENTRIES,
    };
}
