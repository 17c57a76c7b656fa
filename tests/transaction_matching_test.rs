use sip_txtable::prelude::*;

fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("sip_txtable=debug")
        .with_test_writer()
        .try_init();
}

fn invite_fields() -> NewTransaction<'static> {
    NewTransaction {
        inbound_uri: "sip:a@x",
        from: "sip:alice@atlanta.com;tag=1928301774",
        to: "sip:bob@biloxi.com",
        tag: "totag-1",
        call_id: "abc",
        cseq_nr: "1",
        cseq_method: "INVITE",
    }
}

fn request_probe(method: &'static str) -> RequestProbe<'static> {
    RequestProbe {
        from: "sip:alice@atlanta.com;tag=1928301774",
        to: "sip:bob@biloxi.com",
        tag: "totag-1",
        call_id: "abc",
        cseq_nr: "1",
        cseq_method: method,
    }
}

#[test]
fn request_matching_is_method_exact() {
    init_logging();
    let table = Table::new();
    let t = table.add_transaction(invite_fields());

    let got = table.match_request(&request_probe("INVITE")).unwrap();
    assert!(got.same_cell(&t));

    // Same tuple but method ACK: not found. ACKs have their own matcher.
    assert!(table.match_request(&request_probe("ACK")).is_none());
}

#[test]
fn request_matching_compares_every_field() {
    init_logging();
    let table = Table::new();
    let _t = table.add_transaction(invite_fields());

    let mut p = request_probe("INVITE");
    p.from = "sip:mallory@evil.example";
    assert!(table.match_request(&p).is_none());

    let mut p = request_probe("INVITE");
    p.cseq_nr = "2";
    assert!(table.match_request(&p).is_none());
}

#[test]
fn request_tag_uses_prefix_rule() {
    init_logging();
    let table = Table::new();
    let mut fields = invite_fields();
    fields.tag = "totag-1-and-more";
    let t = table.add_transaction(fields);

    // Probe tag is a prefix of the stored tag: matches.
    let got = table.match_request(&request_probe("INVITE")).unwrap();
    assert!(got.same_cell(&t));

    // Probe tag longer than the stored tag: no match.
    let table2 = Table::new();
    let _t2 = table2.add_transaction(invite_fields());
    let mut p = request_probe("INVITE");
    p.tag = "totag-1-and-more";
    assert!(table2.match_request(&p).is_none());
}

#[test]
fn ack_matches_request_tag_before_any_response() {
    init_logging();
    let table = Table::new();
    let t = table.add_transaction(invite_fields());

    // No response tag recorded yet: the ACK carries the request's tag.
    let got = table
        .match_ack(&AckProbe {
            from: "sip:alice@atlanta.com;tag=1928301774",
            to: "sip:bob@biloxi.com",
            tag: "totag-1",
            call_id: "abc",
            cseq_nr: "1",
        })
        .unwrap();
    assert!(got.same_cell(&t));
}

#[test]
fn ack_matches_response_tag_once_set() {
    init_logging();
    let table = Table::new();
    let t = table.add_transaction(invite_fields());
    t.set_response_tag("as83kd9bs");

    let mut probe = AckProbe {
        from: "sip:alice@atlanta.com;tag=1928301774",
        to: "sip:bob@biloxi.com",
        tag: "as83kd9bs",
        call_id: "abc",
        cseq_nr: "1",
    };
    assert!(table.match_ack(&probe).unwrap().same_cell(&t));

    // The request tag no longer correlates once the dialog settled.
    probe.tag = "totag-1";
    assert!(table.match_ack(&probe).is_none());
}

#[test]
fn ack_only_correlates_to_invites() {
    init_logging();
    let table = Table::new();
    let mut fields = invite_fields();
    fields.cseq_method = "BYE";
    let _t = table.add_transaction(fields);

    assert!(table
        .match_ack(&AckProbe {
            from: "sip:alice@atlanta.com;tag=1928301774",
            to: "sip:bob@biloxi.com",
            tag: "totag-1",
            call_id: "abc",
            cseq_nr: "1",
        })
        .is_none());
}

#[test]
fn cancel_requires_exact_request_uri() {
    init_logging();
    let table = Table::new();
    let t = table.add_transaction(invite_fields()); // inbound_uri = "sip:a@x"

    let mut probe = CancelProbe {
        request_uri: "sip:a@x",
        from: "sip:alice@atlanta.com;tag=1928301774",
        to: "sip:bob@biloxi.com",
        tag: "totag-1",
        call_id: "abc",
        cseq_nr: "1",
    };
    assert!(table.match_cancel(&probe).unwrap().same_cell(&t));

    // Different request line: a CANCEL must target the exact same one.
    probe.request_uri = "sip:b@x";
    assert!(table.match_cancel(&probe).is_none());
}

#[test]
fn cancel_never_matches_a_cancel_cell() {
    init_logging();
    let table = Table::new();
    let mut fields = invite_fields();
    fields.cseq_method = "CANCEL";
    let _cancel_cell = table.add_transaction(fields);

    assert!(table
        .match_cancel(&CancelProbe {
            request_uri: "sip:a@x",
            from: "sip:alice@atlanta.com;tag=1928301774",
            to: "sip:bob@biloxi.com",
            tag: "totag-1",
            call_id: "abc",
            cseq_nr: "1",
        })
        .is_none());
}

#[test]
fn response_identifier_round_trips() {
    init_logging();
    let table = Table::new();
    let t = table.add_transaction(invite_fields());

    // The branch string a proxy would embed comes straight off the cell,
    // and the same table's fast path resolves it.
    let branch = format!("{} a {}", t.hash_index(), t.label());
    assert_eq!(branch, t.branch());

    let got = table
        .match_response(&ResponseProbe {
            branch: Some(&branch),
            from: "wrong-on-purpose",
            to: "wrong-on-purpose",
            tag: "",
            call_id: "wrong",
            cseq_nr: "0",
            cseq_method: "INVITE",
        })
        .unwrap();
    assert!(got.same_cell(&t));
}

#[test]
fn response_out_of_range_label_declines_to_full_fields() {
    init_logging();
    let table = Table::with_entries(2).unwrap();
    let t = table.add_transaction(invite_fields());

    // "3 a 7" cannot exist in a two-bucket table; the fast path must bound
    // check and fall through rather than index out of range.
    let got = table.match_response(&ResponseProbe {
        branch: Some("3 a 7"),
        from: "sip:alice@atlanta.com;tag=1928301774",
        to: "sip:bob@biloxi.com",
        tag: "totag-1",
        call_id: "abc",
        cseq_nr: "1",
        cseq_method: "INVITE",
    });
    assert!(got.unwrap().same_cell(&t));

    // And with fields that match nothing either, the lookup just misses.
    assert!(table
        .match_response(&ResponseProbe {
            branch: Some("3 a 7"),
            from: "f",
            to: "t",
            tag: "",
            call_id: "nothing",
            cseq_nr: "9",
            cseq_method: "OPTIONS",
        })
        .is_none());
}

#[test]
fn colliding_transactions_stay_distinguishable() {
    init_logging();
    // One bucket: every transaction collides, labels do the work.
    let table = Table::with_entries(1).unwrap();
    let mut cells = Vec::new();
    for i in 0..10 {
        let call_id = format!("call-{i}");
        cells.push((
            call_id.clone(),
            table.add_transaction(NewTransaction {
                inbound_uri: "sip:a@x",
                from: "sip:alice@atlanta.com",
                to: "sip:bob@biloxi.com",
                tag: "",
                call_id: &call_id,
                cseq_nr: "1",
                cseq_method: "MESSAGE",
            }),
        ));
    }
    for (call_id, cell) in &cells {
        let got = table
            .match_response(&ResponseProbe {
                branch: Some(cell.branch()),
                from: "sip:alice@atlanta.com",
                to: "sip:bob@biloxi.com",
                tag: "",
                call_id,
                cseq_nr: "1",
                cseq_method: "MESSAGE",
            })
            .unwrap();
        assert!(got.same_cell(cell));
        assert_eq!(got.call_id(), call_id);
    }
}
