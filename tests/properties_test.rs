use proptest::prelude::*;
use sip_txtable::prelude::*;

fn fields<'a>(call_id: &'a str, cseq_nr: &'a str) -> NewTransaction<'a> {
    NewTransaction {
        inbound_uri: "sip:bob@biloxi.com",
        from: "sip:alice@atlanta.com",
        to: "sip:bob@biloxi.com",
        tag: "tag-1",
        call_id,
        cseq_nr,
        cseq_method: "INVITE",
    }
}

proptest! {
    /// Any identifier the table hands out resolves back to its own cell
    /// through the by-response fast path of the same table.
    #[test]
    fn identifier_round_trips(
        entries in 1usize..64,
        call_ids in prop::collection::vec("[a-z0-9.@-]{1,24}", 1..40),
        cseq_nr in "[0-9]{1,6}",
    ) {
        let table = Table::with_entries(entries).unwrap();
        for call_id in &call_ids {
            let t = table.add_transaction(fields(call_id, &cseq_nr));
            let ident = format!("{} a {}", t.hash_index(), t.label());
            prop_assert_eq!(ident.as_str(), t.branch());

            let got = table.match_response(&ResponseProbe {
                branch: Some(&ident),
                from: "",
                to: "",
                tag: "",
                call_id: "",
                cseq_nr: "",
                cseq_method: "",
            });
            prop_assert!(got.expect("fast path must resolve").same_cell(&t));
        }
    }

    /// The grammar round-trips for any bucket/label pair, table or not.
    #[test]
    fn branch_grammar_round_trips(hash_index in any::<usize>(), label in any::<u64>()) {
        let id = BranchId::new(hash_index, label);
        let parsed: BranchId = id.to_string().parse().unwrap();
        prop_assert_eq!(parsed, id);
    }

    /// check_and_split partitions a list into an expired prefix and an
    /// unexpired remainder whose concatenation is the original list.
    #[test]
    fn split_is_an_ordered_partition(
        deadlines in prop::collection::vec(0u64..100, 1..50),
        now in 0u64..120,
    ) {
        // Schedule with non-decreasing deadlines, as "now"-relative
        // scheduling produces in practice.
        let mut deadlines = deadlines;
        deadlines.sort_unstable();

        let table = Table::new();
        let q = table.timer(TimerList::Retransmission);
        let mut cells = Vec::new();
        for (i, d) in deadlines.iter().enumerate() {
            let call_id = format!("c{i}");
            let t = table.add_transaction(fields(&call_id, "1"));
            q.append(&t, *d).unwrap();
            cells.push(t);
        }

        let split = q.check_and_split(now).unwrap();
        let remaining = q.snapshot();

        prop_assert_eq!(split.len() + remaining.len(), cells.len());
        for (i, got) in split.iter().chain(remaining.iter()).enumerate() {
            prop_assert!(got.same_cell(&cells[i]));
        }
        for s in &split {
            prop_assert!(s.timer_deadline() <= now);
            prop_assert!(s.has_fired());
            prop_assert_eq!(s.scheduled_on(), None);
        }
        for r in &remaining {
            prop_assert!(r.timer_deadline() > now);
            prop_assert!(!r.has_fired());
            prop_assert_eq!(r.scheduled_on(), Some(TimerList::Retransmission));
        }
    }

    /// Insertion order within one bucket is preserved and labels strictly
    /// increase, for any batch of additions.
    #[test]
    fn bucket_order_and_labels(count in 1usize..100) {
        let table = Table::with_entries(1).unwrap();
        let mut cells = Vec::new();
        for i in 0..count {
            let call_id = format!("c{i}");
            cells.push(table.add_transaction(fields(&call_id, "1")));
        }
        let snap = table.bucket_snapshot(0);
        prop_assert_eq!(snap.len(), count);
        let mut last = 0u64;
        for (i, got) in snap.iter().enumerate() {
            prop_assert!(got.same_cell(&cells[i]));
            prop_assert!(got.label() > last);
            last = got.label();
        }
    }
}
