//! The transaction cell and its reference-counted handle.
//!
//! A [`Cell`] is the unit of state for one SIP transaction: owned copies of
//! the correlating header fields, the bucket coordinates it was inserted
//! under, an atomic reference counter, and an embedded timer link recording
//! which (single) timer list the cell currently sits on.
//!
//! Callers never hold a bare `Cell`; every cell that leaves the table is
//! wrapped in a [`TransactionRef`], which bumps the reference counter on
//! creation and releases it on drop. The delete maintenance pass only frees
//! a cell once that counter has returned to zero, so a worker still reading
//! a matched transaction can never race a concurrent finalization.

use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{AtomicU16, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::ident::BranchId;
use crate::table::NewTransaction;
use crate::timer::TimerLink;

/// One SIP transaction's state, as stored in the hash table.
///
/// The correlating fields are deep copies of the triggering request's
/// headers, made at insertion time; the cell never borrows from parser
/// buffers. Fields fixed at creation (`hash_index`, `label`, the request
/// copies) are plain; fields that settle later in the transaction's life
/// (response To-tag, outbound Request-URI, status) live behind their own
/// small locks.
pub struct Cell {
    hash_index: usize,
    label: u64,
    ident: BranchId,
    branch: String,

    from: String,
    to: String,
    req_tag: String,
    res_tag: RwLock<Option<String>>,
    call_id: String,
    cseq_nr: String,
    cseq_method: String,
    inbound_uri: String,
    outbound_uri: RwLock<Option<String>>,

    /// Last response status sent/seen for this transaction, 0 if none.
    status: AtomicU16,

    /// Outstanding reader references, excluding the bucket linkage itself.
    refs: AtomicUsize,

    pub(crate) timer_link: Mutex<TimerLink>,
}

/// Deep copies of a [`NewTransaction`]'s fields, made *before* the bucket
/// lock is taken; [`Cell::new`] only pairs them with the bucket coordinates.
/// Keeps the insert critical section down to the label bump and the push.
pub(crate) struct CellFields {
    from: String,
    to: String,
    req_tag: String,
    call_id: String,
    cseq_nr: String,
    cseq_method: String,
    inbound_uri: String,
}

impl CellFields {
    pub(crate) fn copy_from(fields: &NewTransaction<'_>) -> Self {
        Self {
            from: fields.from.to_owned(),
            to: fields.to.to_owned(),
            req_tag: fields.tag.to_owned(),
            call_id: fields.call_id.to_owned(),
            cseq_nr: fields.cseq_nr.to_owned(),
            cseq_method: fields.cseq_method.to_owned(),
            inbound_uri: fields.inbound_uri.to_owned(),
        }
    }
}

impl Cell {
    pub(crate) fn new(hash_index: usize, label: u64, fields: CellFields) -> Self {
        let ident = BranchId::new(hash_index, label);
        Self {
            hash_index,
            label,
            ident,
            branch: ident.to_string(),
            from: fields.from,
            to: fields.to,
            req_tag: fields.req_tag,
            res_tag: RwLock::new(None),
            call_id: fields.call_id,
            cseq_nr: fields.cseq_nr,
            cseq_method: fields.cseq_method,
            inbound_uri: fields.inbound_uri,
            outbound_uri: RwLock::new(None),
            status: AtomicU16::new(0),
            refs: AtomicUsize::new(0),
            timer_link: Mutex::new(TimerLink::default()),
        }
    }

    /// Index of the bucket this cell was inserted into. Never changes.
    pub fn hash_index(&self) -> usize {
        self.hash_index
    }

    /// Per-bucket sequence number assigned at insertion.
    pub fn label(&self) -> u64 {
        self.label
    }

    /// The compact `hash_index`/`label` pair identifying this cell.
    pub fn ident(&self) -> BranchId {
        self.ident
    }

    /// The wire-visible `"<hash_index> a <label>"` string, prebuilt at
    /// insertion. This is what callers embed into a Via branch parameter.
    pub fn branch(&self) -> &str {
        &self.branch
    }

    pub fn from(&self) -> &str {
        &self.from
    }

    pub fn to(&self) -> &str {
        &self.to
    }

    /// To-tag copied from the original request.
    pub fn request_tag(&self) -> &str {
        &self.req_tag
    }

    /// To-tag of the response this transaction settled on, if any.
    pub fn response_tag(&self) -> Option<String> {
        self.res_tag.read().clone()
    }

    /// Records the To-tag the transaction answered with. ACK correlation
    /// compares against this tag once it is set.
    pub fn set_response_tag(&self, tag: &str) {
        *self.res_tag.write() = Some(tag.to_owned());
    }

    pub fn call_id(&self) -> &str {
        &self.call_id
    }

    pub fn cseq_nr(&self) -> &str {
        &self.cseq_nr
    }

    pub fn cseq_method(&self) -> &str {
        &self.cseq_method
    }

    /// Request-URI of the inbound request, as received.
    pub fn inbound_uri(&self) -> &str {
        &self.inbound_uri
    }

    /// Request-URI the request was forwarded with, once routing decided it.
    pub fn outbound_uri(&self) -> Option<String> {
        self.outbound_uri.read().clone()
    }

    pub fn set_outbound_uri(&self, uri: &str) {
        *self.outbound_uri.write() = Some(uri.to_owned());
    }

    /// Last response status recorded for this transaction, 0 if none yet.
    pub fn status(&self) -> u16 {
        self.status.load(Ordering::Acquire)
    }

    pub fn set_status(&self, status: u16) {
        self.status.store(status, Ordering::Release);
    }

    /// Number of outstanding [`TransactionRef`] handles.
    pub fn ref_count(&self) -> usize {
        self.refs.load(Ordering::Acquire)
    }

    /// Tag an ACK carries for this transaction: the response tag if one was
    /// recorded, otherwise the original request tag.
    pub(crate) fn dialog_tag_matches(&self, probe_tag: &str) -> bool {
        match &*self.res_tag.read() {
            Some(res_tag) => res_tag == probe_tag,
            None => self.req_tag == probe_tag,
        }
    }

    /// Timer list this cell is currently scheduled on, if any.
    pub fn scheduled_on(&self) -> Option<crate::timer::TimerList> {
        self.timer_link.lock().scheduled_on
    }

    /// Deadline of the current (or most recent) timer scheduling.
    pub fn timer_deadline(&self) -> u64 {
        self.timer_link.lock().deadline
    }

    /// Whether the cell's last timer scheduling expired and was detached by
    /// [`check_and_split`](crate::timer::TimerQueue::check_and_split).
    pub fn has_fired(&self) -> bool {
        self.timer_link.lock().fired
    }
}

impl fmt::Debug for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cell")
            .field("ident", &self.branch)
            .field("call_id", &self.call_id)
            .field("cseq_nr", &self.cseq_nr)
            .field("cseq_method", &self.cseq_method)
            .field("refs", &self.ref_count())
            .finish()
    }
}

/// Format: the compact identifier, e.g. `"312 a 7"`.
impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.branch)
    }
}

/// A counted reference to a [`Cell`].
///
/// Every lookup or insertion that hands a cell out of the table hands it out
/// as a `TransactionRef`. Creating or cloning one increments the cell's
/// reference counter; dropping it decrements. The delete maintenance pass
/// refuses to free any cell whose counter is non-zero and re-queues it
/// instead, so "caller must eventually unref" is no longer a comment
/// convention: releasing happens on drop, always.
pub struct TransactionRef {
    cell: Arc<Cell>,
}

impl TransactionRef {
    /// Takes a counted reference on `cell`.
    pub(crate) fn adopt(cell: &Arc<Cell>) -> Self {
        cell.refs.fetch_add(1, Ordering::AcqRel);
        Self {
            cell: Arc::clone(cell),
        }
    }

    pub(crate) fn cell_arc(&self) -> &Arc<Cell> {
        &self.cell
    }

    /// Whether two handles point at the same transaction cell.
    pub fn same_cell(&self, other: &TransactionRef) -> bool {
        Arc::ptr_eq(&self.cell, &other.cell)
    }
}

impl Clone for TransactionRef {
    fn clone(&self) -> Self {
        Self::adopt(&self.cell)
    }
}

impl Drop for TransactionRef {
    fn drop(&mut self) {
        self.cell.refs.fetch_sub(1, Ordering::AcqRel);
    }
}

impl Deref for TransactionRef {
    type Target = Cell;

    fn deref(&self) -> &Cell {
        &self.cell
    }
}

impl fmt::Debug for TransactionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.cell, f)
    }
}
