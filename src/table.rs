//! The transaction hash table.
//!
//! A [`Table`] owns a fixed array of buckets plus the four timer lists. Each
//! bucket is an insertion-ordered list of cells behind its own lock,
//! together with the `next_label` counter that numbers insertions; the
//! bucket index comes from hashing Call-ID and CSeq number. Workers on
//! different buckets never contend, and no operation holds a bucket lock
//! for longer than one single-bucket pass.
//!
//! The table is an explicit handle: every operation takes `&Table`, there
//! is no process-global instance, and independent tables (one per test,
//! say) coexist freely. Teardown is `Drop`: the buckets own their cells, so
//! releasing the table releases every transaction that no handle still
//! references, partially torn-down states included.

use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::cell::{Cell, CellFields, TransactionRef};
use crate::error::{Error, Result};
use crate::timer::{TimerList, TimerQueue, NR_OF_TIMER_LISTS};

/// Default number of hash buckets.
pub const TABLE_ENTRIES: usize = 4096;

/// The correlating fields of a new request, borrowed from the parser.
///
/// [`Table::add_transaction`] deep-copies every field into the cell it
/// builds; nothing here outlives the call.
#[derive(Debug, Clone, Copy)]
pub struct NewTransaction<'a> {
    /// Request-URI of the inbound request.
    pub inbound_uri: &'a str,
    /// From header field value.
    pub from: &'a str,
    /// To header field value, without its tag.
    pub to: &'a str,
    /// To-tag of the request ("" if none).
    pub tag: &'a str,
    /// Call-ID header field value.
    pub call_id: &'a str,
    /// CSeq sequence number, as its decimal string.
    pub cseq_nr: &'a str,
    /// CSeq method name.
    pub cseq_method: &'a str,
}

/// One hash slot: the cell list plus the label counter, one lock for both.
pub(crate) struct Bucket {
    inner: Mutex<BucketInner>,
}

struct BucketInner {
    /// Cells in insertion order. The stored `Arc` is the structural
    /// reference the bucket linkage owns, distinct from reader refs.
    cells: Vec<Arc<Cell>>,
    /// Next label to assign. Starts at 1, strictly increasing.
    next_label: u64,
}

impl Bucket {
    fn new() -> Self {
        Self {
            inner: Mutex::new(BucketInner {
                cells: Vec::new(),
                next_label: 1,
            }),
        }
    }
}

/// The transaction hash table: bucket array, timer lists, and the logical
/// clock the maintenance pass advances.
pub struct Table {
    entries: Box<[Bucket]>,
    timers: [TimerQueue; NR_OF_TIMER_LISTS],
    time: AtomicU64,
}

impl Table {
    /// Creates a table with the default [`TABLE_ENTRIES`] buckets.
    pub fn new() -> Self {
        Self::build(TABLE_ENTRIES)
    }

    /// Creates a table with `entries` buckets. Small tables are handy in
    /// tests where bucket collisions should be easy to provoke.
    pub fn with_entries(entries: usize) -> Result<Self> {
        if entries == 0 {
            return Err(Error::EmptyTable);
        }
        Ok(Self::build(entries))
    }

    fn build(entries: usize) -> Self {
        let buckets: Vec<Bucket> = (0..entries).map(|_| Bucket::new()).collect();
        Self {
            entries: buckets.into_boxed_slice(),
            timers: TimerList::ALL.map(TimerQueue::new),
            time: AtomicU64::new(0),
        }
    }

    /// Number of hash buckets.
    pub fn entries(&self) -> usize {
        self.entries.len()
    }

    /// Current value of the table clock, in ticks.
    pub fn time(&self) -> u64 {
        self.time.load(Ordering::Acquire)
    }

    /// The bucket index `call_id`/`cseq_nr` hash to in this table.
    pub fn hash(&self, call_id: &str, cseq_nr: &str) -> usize {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        call_id.hash(&mut hasher);
        cseq_nr.hash(&mut hasher);
        (hasher.finish() as usize) % self.entries.len()
    }

    /// Inserts a new transaction built from `fields`.
    ///
    /// The field deep copies are made before the bucket lock is taken; the
    /// critical section is the label bump and the tail append, so labels
    /// within a bucket are strictly increasing in insertion order.
    /// Construction is all-or-nothing: the cell owns deep copies of every
    /// field, and nothing is linked anywhere until the fully built cell is
    /// appended. Returns a counted reference to the new cell; the bucket
    /// linkage keeps its own structural reference.
    pub fn add_transaction(&self, fields: NewTransaction<'_>) -> TransactionRef {
        let hash_index = self.hash(fields.call_id, fields.cseq_nr);
        let copies = CellFields::copy_from(&fields);

        let mut inner = self.entries[hash_index].inner.lock();
        let label = inner.next_label;
        inner.next_label += 1;
        let cell = Arc::new(Cell::new(hash_index, label, copies));
        inner.cells.push(Arc::clone(&cell));
        drop(inner);

        debug!(cell = cell.branch(), method = fields.cseq_method, "new transaction");
        TransactionRef::adopt(&cell)
    }

    /// Unlinks `cell` from its bucket. Returns whether it was still linked.
    ///
    /// After this the cell is unreachable from any lookup; it stays alive
    /// until its timer-list scheduling and outstanding references are gone.
    pub fn remove_from_table(&self, cell: &TransactionRef) -> bool {
        self.remove_arc(cell.cell_arc())
    }

    fn remove_arc(&self, cell: &Arc<Cell>) -> bool {
        let mut inner = self.entries[cell.hash_index()].inner.lock();
        match inner.cells.iter().position(|c| Arc::ptr_eq(c, cell)) {
            Some(pos) => {
                inner.cells.remove(pos);
                trace!(cell = cell.branch(), "unlinked from bucket");
                true
            }
            None => false,
        }
    }

    /// The timer queue for `list`.
    pub fn timer(&self, list: TimerList) -> &TimerQueue {
        &self.timers[list.index()]
    }

    /// Schedules `cell` on `list` with the list's default timeout, measured
    /// from the current table clock.
    pub fn schedule(&self, cell: &TransactionRef, list: TimerList) -> Result<()> {
        self.timer(list)
            .append(cell, self.time() + list.default_timeout())
    }

    /// Walks a bucket under its lock, returning a counted reference to the
    /// first cell `pred` accepts.
    pub(crate) fn scan_bucket<F>(&self, hash_index: usize, pred: F) -> Option<TransactionRef>
    where
        F: FnMut(&Cell) -> bool,
    {
        let mut pred = pred;
        let inner = self.entries[hash_index].inner.lock();
        inner
            .cells
            .iter()
            .find(|c| pred(c))
            .map(TransactionRef::adopt)
    }

    /// Cells currently linked in bucket `hash_index`, in insertion order.
    pub fn bucket_snapshot(&self, hash_index: usize) -> Vec<TransactionRef> {
        let inner = self.entries[hash_index].inner.lock();
        inner.cells.iter().map(TransactionRef::adopt).collect()
    }

    /// Advances the table clock one tick and runs the maintenance pass at
    /// the new time. Returns the cells whose retransmission timer fired.
    pub fn timer_routine(&self) -> Vec<TransactionRef> {
        let now = self.time.fetch_add(1, Ordering::AcqRel) + 1;
        self.process_timers(now)
    }

    /// The maintenance pass at time `now`:
    ///
    /// - retransmission expiries are handed back to the caller, which owns
    ///   the actual resend;
    /// - a final-response expiry marks the transaction timed out (408) and
    ///   moves it to the wait list;
    /// - a wait expiry unlinks the cell from its bucket and schedules it
    ///   for deletion;
    /// - a delete expiry frees the cell if nothing references it anymore,
    ///   otherwise puts it back on the delete list for a later pass.
    ///
    /// Expired batches are detached from each list first (splitting holds
    /// the list lock only for the unlink), then acted on lock-free. A caller
    /// scheduling a just-detached cell can therefore take the slot before
    /// the pass re-appends it; the pass logs that and leaves the caller's
    /// scheduling in place.
    pub fn process_timers(&self, now: u64) -> Vec<TransactionRef> {
        let fired: Vec<Arc<Cell>> = self.timer(TimerList::Retransmission).split_expired(now);
        let retransmit: Vec<TransactionRef> = fired.iter().map(TransactionRef::adopt).collect();

        for cell in self.timer(TimerList::FinalResponse).split_expired(now) {
            debug!(cell = cell.branch(), "final response timeout");
            cell.set_status(408);
            let deadline = now + TimerList::Wait.default_timeout();
            // A caller may grab the freshly unscheduled cell first; its
            // scheduling then stands and ours is skipped.
            if let Err(err) = self.timer(TimerList::Wait).append_arc(&cell, deadline) {
                warn!(cell = cell.branch(), %err, "wait scheduling lost to a caller");
            }
        }

        for cell in self.timer(TimerList::Wait).split_expired(now) {
            trace!(cell = cell.branch(), "wait period over");
            self.remove_arc(&cell);
            let deadline = now + TimerList::Delete.default_timeout();
            if let Err(err) = self.timer(TimerList::Delete).append_arc(&cell, deadline) {
                warn!(cell = cell.branch(), %err, "delete scheduling lost to a caller");
            }
        }

        for cell in self.timer(TimerList::Delete).split_expired(now) {
            if cell.ref_count() == 0 {
                debug!(cell = cell.branch(), "freeing transaction");
                // Dropping the last Arc frees the cell; it left its bucket
                // on the wait expiry and the delete list just released it.
            } else {
                trace!(cell = cell.branch(), refs = cell.ref_count(), "still referenced, delete deferred");
                let deadline = now + TimerList::Delete.default_timeout();
                if let Err(err) = self.timer(TimerList::Delete).append_arc(&cell, deadline) {
                    warn!(cell = cell.branch(), %err, "delete requeue lost to a caller");
                }
            }
        }

        retransmit
    }
}

impl Default for Table {
    fn default() -> Self {
        Self::new()
    }
}
