//! Timer lists: lock-protected, insertion-ordered queues of cells awaiting
//! a time-driven action.
//!
//! Four named lists cover the lifecycle of a server-side transaction:
//! retransmission, final-response supervision, the post-completion wait
//! period, and the deferred-delete queue. A cell sits on at most one list
//! at a time; the embedded [`TimerLink`] in the cell is the authoritative
//! record of that membership and is only ever mutated while the owning
//! list's lock is held.
//!
//! Lock ordering: a list lock may be taken while no other lock is held, and
//! a cell's timer link lock is only taken *inside* a list lock. Bucket locks
//! are never held while acquiring a list lock.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::trace;

use crate::cell::{Cell, TransactionRef};
use crate::error::{Error, Result};

/// Number of timer lists a table carries.
pub const NR_OF_TIMER_LISTS: usize = 4;

/// The named timer lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerList {
    /// Pending retransmission of the last outbound message.
    Retransmission,
    /// Waiting for a final response; expiry means the transaction timed out.
    FinalResponse,
    /// Completed transaction absorbing late retransmissions before teardown.
    Wait,
    /// Finalized cells pending physical deletion once unreferenced.
    Delete,
}

impl TimerList {
    /// All lists, in maintenance-pass order.
    pub const ALL: [TimerList; NR_OF_TIMER_LISTS] = [
        TimerList::Retransmission,
        TimerList::FinalResponse,
        TimerList::Wait,
        TimerList::Delete,
    ];

    /// Default timeout for this list, in table clock ticks.
    pub fn default_timeout(self) -> u64 {
        match self {
            TimerList::Retransmission => 1,
            TimerList::FinalResponse => 30,
            TimerList::Wait => 5,
            TimerList::Delete => 2,
        }
    }

    pub(crate) fn index(self) -> usize {
        match self {
            TimerList::Retransmission => 0,
            TimerList::FinalResponse => 1,
            TimerList::Wait => 2,
            TimerList::Delete => 3,
        }
    }
}

impl fmt::Display for TimerList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TimerList::Retransmission => "retransmission",
            TimerList::FinalResponse => "final-response",
            TimerList::Wait => "wait",
            TimerList::Delete => "delete",
        };
        f.write_str(name)
    }
}

/// Per-cell timer membership, embedded in every [`Cell`].
#[derive(Debug, Default)]
pub(crate) struct TimerLink {
    /// The list the cell is scheduled on, if any. At most one.
    pub(crate) scheduled_on: Option<TimerList>,
    /// Expiry, in table clock ticks.
    pub(crate) deadline: u64,
    /// Set when the scheduling expired and was detached by a split.
    pub(crate) fired: bool,
}

/// One timer list: an insertion-ordered queue behind its own lock.
///
/// Deadlines within a list are non-decreasing in practice because callers
/// always schedule relative to "now", which lets the expiry check walk from
/// the head and stop at the first unexpired entry.
pub struct TimerQueue {
    list: TimerList,
    cells: Mutex<VecDeque<Arc<Cell>>>,
}

impl TimerQueue {
    pub(crate) fn new(list: TimerList) -> Self {
        Self {
            list,
            cells: Mutex::new(VecDeque::new()),
        }
    }

    /// Which of the named lists this queue is.
    pub fn list(&self) -> TimerList {
        self.list
    }

    /// Number of cells currently scheduled on this list.
    pub fn len(&self) -> usize {
        self.cells.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.lock().is_empty()
    }

    /// Appends `cell` to the tail of this list, expiring at `deadline`.
    ///
    /// A cell may sit on at most one list; scheduling a cell that is already
    /// scheduled anywhere is a caller error and leaves both lists untouched.
    pub fn append(&self, cell: &TransactionRef, deadline: u64) -> Result<()> {
        self.append_arc(cell.cell_arc(), deadline)
    }

    pub(crate) fn append_arc(&self, cell: &Arc<Cell>, deadline: u64) -> Result<()> {
        let mut cells = self.cells.lock();
        let mut link = cell.timer_link.lock();
        if let Some(scheduled_on) = link.scheduled_on {
            return Err(Error::AlreadyScheduled {
                ident: cell.branch().to_owned(),
                scheduled_on,
            });
        }
        link.scheduled_on = Some(self.list);
        link.deadline = deadline;
        link.fired = false;
        drop(link);
        cells.push_back(Arc::clone(cell));
        trace!(cell = cell.branch(), list = %self.list, deadline, "timer: appended");
        Ok(())
    }

    /// Unlinks `cell` from this list.
    ///
    /// The cell must currently be scheduled on *this* list.
    pub fn remove(&self, cell: &TransactionRef) -> Result<()> {
        self.remove_arc(cell.cell_arc())
    }

    pub(crate) fn remove_arc(&self, cell: &Arc<Cell>) -> Result<()> {
        let mut cells = self.cells.lock();
        let mut link = cell.timer_link.lock();
        if link.scheduled_on != Some(self.list) {
            return Err(Error::NotScheduled {
                ident: cell.branch().to_owned(),
                list: self.list,
            });
        }
        link.scheduled_on = None;
        drop(link);
        let pos = cells
            .iter()
            .position(|c| Arc::ptr_eq(c, cell))
            .expect("timer link said scheduled here, list disagrees");
        cells.remove(pos);
        trace!(cell = cell.branch(), list = %self.list, "timer: removed");
        Ok(())
    }

    /// Reschedules `cell` on this list with a fresh `deadline`: the remove +
    /// append pair, done under one lock so the cell never transiently leaves
    /// the list.
    pub fn update(&self, cell: &TransactionRef, deadline: u64) -> Result<()> {
        let arc = cell.cell_arc();
        let mut cells = self.cells.lock();
        let mut link = arc.timer_link.lock();
        if link.scheduled_on != Some(self.list) {
            return Err(Error::NotScheduled {
                ident: arc.branch().to_owned(),
                list: self.list,
            });
        }
        link.deadline = deadline;
        link.fired = false;
        drop(link);
        let pos = cells
            .iter()
            .position(|c| Arc::ptr_eq(c, arc))
            .expect("timer link said scheduled here, list disagrees");
        let moved = cells.remove(pos).unwrap();
        cells.push_back(moved);
        trace!(cell = arc.branch(), list = %self.list, deadline, "timer: rescheduled");
        Ok(())
    }

    /// Detaches every cell whose deadline is `<= now` from the head of the
    /// list and returns them, in list order, as counted references.
    ///
    /// The split marks each detached cell fired and no longer scheduled.
    /// Calling this on an empty list is a caller error (the maintenance pass
    /// checks first); the non-empty requirement keeps "nothing expired" and
    /// "nothing scheduled" distinguishable.
    pub fn check_and_split(&self, now: u64) -> Result<Vec<TransactionRef>> {
        let mut cells = self.cells.lock();
        if cells.is_empty() {
            return Err(Error::EmptyTimerList(self.list));
        }
        Ok(Self::split_locked(&mut cells, now)
            .iter()
            .map(TransactionRef::adopt)
            .collect())
    }

    /// Like [`check_and_split`](Self::check_and_split) but tolerant of an
    /// empty list and handing back raw ownership, for the maintenance pass.
    pub(crate) fn split_expired(&self, now: u64) -> Vec<Arc<Cell>> {
        let mut cells = self.cells.lock();
        Self::split_locked(&mut cells, now)
    }

    fn split_locked(cells: &mut VecDeque<Arc<Cell>>, now: u64) -> Vec<Arc<Cell>> {
        let mut split = Vec::new();
        while let Some(front) = cells.front() {
            let mut link = front.timer_link.lock();
            if link.deadline > now {
                break;
            }
            link.scheduled_on = None;
            link.fired = true;
            drop(link);
            split.push(cells.pop_front().unwrap());
        }
        split
    }

    /// Snapshot of the list contents, head first. Debugging/statistics aid;
    /// the list may change the moment the lock is released.
    pub fn snapshot(&self) -> Vec<TransactionRef> {
        self.cells
            .lock()
            .iter()
            .map(TransactionRef::adopt)
            .collect()
    }
}

impl fmt::Debug for TimerQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimerQueue")
            .field("list", &self.list)
            .field("len", &self.len())
            .finish()
    }
}
