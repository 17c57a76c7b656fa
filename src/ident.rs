use std::fmt;
use std::str::FromStr;

/// Compact identifier of a transaction within one table instance.
///
/// Every cell inserted into the table is addressable by the pair of its
/// bucket index and the per-bucket sequence number (*label*) it was handed
/// at insertion. Rendered as text the pair reads `"<hash_index> a <label>"`,
/// e.g. `"312 a 7"`, and that string is what a proxy embeds into the branch
/// parameter of the Via header it pushes onto a forwarded request. When the
/// response comes back carrying the same branch, the response matcher parses
/// the identifier back and can go straight to bucket 312 and compare labels
/// only, instead of re-running the full header-field comparison.
///
/// Two things this type deliberately does *not* do:
///
/// - It knows nothing about any particular table's size. `hash_index` is
///   validated against the live bucket array by the response matcher, never
///   here; an identifier such as `"3 a 7"` parses fine even though a
///   two-bucket table can not contain it.
/// - It accepts only the exact mini-grammar `digits SP 'a' SP digits`.
///   Anything else (missing separator, signs, hex, trailing bytes) is
///   rejected, so a foreign branch parameter that merely resembles our
///   format falls through to full-field matching instead of being
///   misinterpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BranchId {
    /// Index of the bucket the cell lives in.
    pub hash_index: usize,
    /// Per-bucket sequence number assigned at insertion, starting at 1.
    pub label: u64,
}

impl BranchId {
    /// Creates a new `BranchId` from a bucket index and a label.
    pub fn new(hash_index: usize, label: u64) -> Self {
        Self { hash_index, label }
    }
}

/// Renders the identifier in its wire-visible `"<hash_index> a <label>"`
/// form. This is the round-trippable representation: feeding the output
/// back into [`BranchId::from_str`] yields an equal value.
impl fmt::Display for BranchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} a {}", self.hash_index, self.label)
    }
}

impl FromStr for BranchId {
    type Err = ();

    /// Parses `digits SP 'a' SP digits`, strictly.
    ///
    /// Returns `Err(())` on any deviation; callers treat a parse failure as
    /// "no fast path" rather than as an error condition.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split(' ');
        let index_part = parts.next().ok_or(())?;
        let sep = parts.next().ok_or(())?;
        let label_part = parts.next().ok_or(())?;
        if sep != "a" || parts.next().is_some() {
            return Err(());
        }
        if index_part.is_empty() || !index_part.bytes().all(|b| b.is_ascii_digit()) {
            return Err(());
        }
        if label_part.is_empty() || !label_part.bytes().all(|b| b.is_ascii_digit()) {
            return Err(());
        }
        let hash_index = index_part.parse::<usize>().map_err(|_| ())?;
        let label = label_part.parse::<u64>().map_err(|_| ())?;
        Ok(Self { hash_index, label })
    }
}
