//! Transaction matching: correlating an incoming message's header fields to
//! a cell in the table.
//!
//! Four strategies, one per message shape. Requests, ACKs and CANCELs never
//! carry our compact identifier and always run the full-field comparison
//! over the bucket their Call-ID/CSeq hash to. Responses echo back whatever
//! we put in the Via branch, so when that parses as a [`BranchId`] the
//! matcher goes straight to the named bucket and compares labels only,
//! falling through to the full-field scan when the identifier is absent,
//! malformed, out of bounds for this table, or simply unmatched.
//!
//! Every lookup returns a counted [`TransactionRef`] (or `None`); releasing
//! the match is the handle's drop, not a convention the caller has to
//! remember. The bucket lock is held for one single-bucket scan at most.

use tracing::{debug, trace};

use crate::cell::TransactionRef;
use crate::ident::BranchId;
use crate::table::Table;

/// Correlating fields of a non-ACK request.
#[derive(Debug, Clone, Copy)]
pub struct RequestProbe<'a> {
    pub from: &'a str,
    pub to: &'a str,
    /// To-tag of the request ("" if none).
    pub tag: &'a str,
    pub call_id: &'a str,
    pub cseq_nr: &'a str,
    pub cseq_method: &'a str,
}

/// Correlating fields of an ACK. The CSeq method is implicitly `ACK`;
/// ACKs correlate to the INVITE transaction they acknowledge.
#[derive(Debug, Clone, Copy)]
pub struct AckProbe<'a> {
    pub from: &'a str,
    pub to: &'a str,
    /// To-tag the ACK carries: the tag the dialog settled on.
    pub tag: &'a str,
    pub call_id: &'a str,
    pub cseq_nr: &'a str,
}

/// Correlating fields of a CANCEL. The CSeq method is implicitly `CANCEL`;
/// the probe targets the transaction being cancelled, never another CANCEL.
#[derive(Debug, Clone, Copy)]
pub struct CancelProbe<'a> {
    /// Request-URI of the CANCEL; must equal the cancelled request's exactly.
    pub request_uri: &'a str,
    pub from: &'a str,
    pub to: &'a str,
    pub tag: &'a str,
    pub call_id: &'a str,
    pub cseq_nr: &'a str,
}

/// Correlating fields of a response.
#[derive(Debug, Clone, Copy)]
pub struct ResponseProbe<'a> {
    /// The Via branch parameter echoed back by the downstream hop, if the
    /// response carried one. Fast-path fuel when it parses as a [`BranchId`].
    pub branch: Option<&'a str>,
    pub from: &'a str,
    pub to: &'a str,
    pub tag: &'a str,
    pub call_id: &'a str,
    pub cseq_nr: &'a str,
    pub cseq_method: &'a str,
}

/// First `probe_tag.len()` bytes of the stored tag must equal the probe tag.
/// This is the request matcher's tag rule; a stored tag shorter than the
/// probe never matches.
fn tag_prefix_matches(stored_tag: &str, probe_tag: &str) -> bool {
    stored_tag.as_bytes().starts_with(probe_tag.as_bytes())
}

impl Table {
    /// Looks up the transaction a non-ACK request retransmits.
    ///
    /// Matches on from, to, request To-tag (prefix rule), Call-ID, CSeq
    /// number and exact CSeq method. An ACK handed to this function finds
    /// nothing, since no cell stores `ACK` as its method.
    pub fn match_request(&self, probe: &RequestProbe<'_>) -> Option<TransactionRef> {
        let hash_index = self.hash(probe.call_id, probe.cseq_nr);
        trace!(hash_index, method = probe.cseq_method, "request matching");
        let found = self.scan_bucket(hash_index, |c| {
            c.cseq_method() == probe.cseq_method
                && c.call_id() == probe.call_id
                && c.cseq_nr() == probe.cseq_nr
                && c.from() == probe.from
                && c.to() == probe.to
                && tag_prefix_matches(c.request_tag(), probe.tag)
        });
        match &found {
            Some(t) => debug!(cell = t.branch(), "request matched"),
            None => trace!(hash_index, "request matching failed"),
        }
        found
    }

    /// Looks up the INVITE transaction an ACK acknowledges.
    ///
    /// Matches on from, to, Call-ID and CSeq number against INVITE cells
    /// only. The To-tag compared is the tag the transaction settled on:
    /// the response tag once one was recorded, the original request tag
    /// before that.
    pub fn match_ack(&self, probe: &AckProbe<'_>) -> Option<TransactionRef> {
        let hash_index = self.hash(probe.call_id, probe.cseq_nr);
        trace!(hash_index, "ACK matching");
        let found = self.scan_bucket(hash_index, |c| {
            c.cseq_method() == "INVITE"
                && c.call_id() == probe.call_id
                && c.cseq_nr() == probe.cseq_nr
                && c.from() == probe.from
                && c.to() == probe.to
                && c.dialog_tag_matches(probe.tag)
        });
        match &found {
            Some(t) => debug!(cell = t.branch(), "ACK matched"),
            None => trace!(hash_index, "ACK matching failed"),
        }
        found
    }

    /// Looks up the transaction a CANCEL cancels.
    ///
    /// A CANCEL targets the exact request line it is cancelling, so the
    /// Request-URI must match in addition to the usual tuple; and a CANCEL
    /// never matches another CANCEL's transaction (a retransmitted CANCEL
    /// goes through [`match_request`](Self::match_request) instead).
    pub fn match_cancel(&self, probe: &CancelProbe<'_>) -> Option<TransactionRef> {
        let hash_index = self.hash(probe.call_id, probe.cseq_nr);
        trace!(hash_index, "CANCEL matching");
        let found = self.scan_bucket(hash_index, |c| {
            c.cseq_method() != "CANCEL"
                && c.inbound_uri() == probe.request_uri
                && c.call_id() == probe.call_id
                && c.cseq_nr() == probe.cseq_nr
                && c.from() == probe.from
                && c.to() == probe.to
                && c.request_tag() == probe.tag
        });
        match &found {
            Some(t) => debug!(cell = t.branch(), "CANCEL matched"),
            None => trace!(hash_index, "CANCEL matching failed"),
        }
        found
    }

    /// Looks up the transaction a response belongs to.
    ///
    /// When the probe's branch parses as a [`BranchId`] whose bucket index
    /// is in range for this table, only that bucket is scanned and only
    /// labels are compared. A parsed-but-unmatched identifier (or one whose
    /// bucket index is out of range) falls through to the full-field path
    /// rather than failing outright; an out-of-range index is never used
    /// to address the bucket array.
    pub fn match_response(&self, probe: &ResponseProbe<'_>) -> Option<TransactionRef> {
        if let Some(branch) = probe.branch {
            if let Ok(ident) = branch.parse::<BranchId>() {
                if ident.hash_index < self.entries() {
                    trace!(hash_index = ident.hash_index, label = ident.label,
                        "response matching, label fast path");
                    let found =
                        self.scan_bucket(ident.hash_index, |c| c.label() == ident.label);
                    if let Some(t) = found {
                        debug!(cell = t.branch(), "response matched by label");
                        return Some(t);
                    }
                    trace!("label unmatched, falling through to full-field matching");
                } else {
                    trace!(hash_index = ident.hash_index, entries = self.entries(),
                        "label bucket index out of range, falling through");
                }
            }
        }

        let hash_index = self.hash(probe.call_id, probe.cseq_nr);
        trace!(hash_index, "response matching, full-field path");
        let found = self.scan_bucket(hash_index, |c| {
            c.cseq_method() == probe.cseq_method
                && c.call_id() == probe.call_id
                && c.cseq_nr() == probe.cseq_nr
                && c.from() == probe.from
                && c.to() == probe.to
                && c.request_tag() == probe.tag
        });
        match &found {
            Some(t) => debug!(cell = t.branch(), "response matched by fields"),
            None => trace!(hash_index, "response matching failed"),
        }
        found
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::{NewTransaction, Table};

    fn invite<'a>(call_id: &'a str, cseq_nr: &'a str) -> NewTransaction<'a> {
        NewTransaction {
            inbound_uri: "sip:bob@biloxi.com",
            from: "sip:alice@atlanta.com",
            to: "sip:bob@biloxi.com",
            tag: "tag-req",
            call_id,
            cseq_nr,
            cseq_method: "INVITE",
        }
    }

    #[test]
    fn tag_prefix_rule() {
        assert!(tag_prefix_matches("abcdef", "abc"));
        assert!(tag_prefix_matches("abc", "abc"));
        assert!(tag_prefix_matches("abc", ""));
        assert!(!tag_prefix_matches("abc", "abcd"));
        assert!(!tag_prefix_matches("abd", "abc"));
    }

    #[test]
    fn fast_path_returns_the_inserted_cell() {
        let table = Table::with_entries(16).unwrap();
        let t = table.add_transaction(invite("abc", "1"));
        let probe = ResponseProbe {
            branch: Some(t.branch()),
            from: "sip:alice@atlanta.com",
            to: "sip:bob@biloxi.com",
            tag: "tag-req",
            call_id: "abc",
            cseq_nr: "1",
            cseq_method: "INVITE",
        };
        let got = table.match_response(&probe).unwrap();
        assert!(got.same_cell(&t));
    }

    #[test]
    fn garbage_branch_still_matches_by_fields() {
        let table = Table::with_entries(16).unwrap();
        let t = table.add_transaction(invite("abc", "1"));
        let probe = ResponseProbe {
            branch: Some("z9hG4bK776asdhds"),
            from: "sip:alice@atlanta.com",
            to: "sip:bob@biloxi.com",
            tag: "tag-req",
            call_id: "abc",
            cseq_nr: "1",
            cseq_method: "INVITE",
        };
        let got = table.match_response(&probe).unwrap();
        assert!(got.same_cell(&t));
    }

    #[test]
    fn unmatched_label_falls_through() {
        let table = Table::with_entries(16).unwrap();
        let t = table.add_transaction(invite("abc", "1"));
        // Right bucket, wrong label: the fast path declines, fields match.
        let bogus = format!("{} a {}", t.hash_index(), t.label() + 100);
        let probe = ResponseProbe {
            branch: Some(&bogus),
            from: "sip:alice@atlanta.com",
            to: "sip:bob@biloxi.com",
            tag: "tag-req",
            call_id: "abc",
            cseq_nr: "1",
            cseq_method: "INVITE",
        };
        let got = table.match_response(&probe).unwrap();
        assert!(got.same_cell(&t));
    }

    #[test]
    fn out_of_range_bucket_index_never_panics() {
        let table = Table::with_entries(2).unwrap();
        let probe = ResponseProbe {
            branch: Some("3 a 7"),
            from: "f",
            to: "t",
            tag: "",
            call_id: "nope",
            cseq_nr: "1",
            cseq_method: "INVITE",
        };
        assert!(table.match_response(&probe).is_none());
    }
}
