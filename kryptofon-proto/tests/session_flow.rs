use kryptofon_proto::{
    list_matches, should_handle, CallContext, ControlMessage, Pdu, PduType, RendezvousLine, Subclass,
};

#[test]
fn invite_ring_accept_sequence_parses_and_routes() {
    let lines = [
        "alice :: [$] INVITE bob 10.0.0.5 40010 c2lnbmVkLWtleQ==",
        "bob :: [$] RING alice 10.0.0.9 40020",
        "bob :: [$] ACCEPT alice 10.0.0.9 40020 ZW52ZWxvcGU=",
    ];

    let parsed: Vec<_> = lines
        .iter()
        .map(|l| RendezvousLine::parse(l))
        .map(|l| (l.user.clone(), ControlMessage::parse(&l.body).unwrap()))
        .collect();

    match &parsed[0] {
        (sender, ControlMessage::Invite { local_name, .. }) => {
            assert_eq!(sender, "alice");
            assert!(should_handle(Some(local_name), sender, "bob"));
        }
        _ => panic!("expected INVITE"),
    }

    match &parsed[2] {
        (_, ControlMessage::Accept {
            encrypted_signed_key_b64,
            ..
        }) => assert_eq!(encrypted_signed_key_b64.as_deref(), Some("ZW52ZWxvcGU=")),
        _ => panic!("expected ACCEPT"),
    }
}

#[test]
fn self_echo_is_dropped_before_reaching_call_logic() {
    let line = RendezvousLine::parse("alice :: [$] BYE alice");
    assert!(!should_handle(Some("alice"), &line.user, "alice"));
}

#[test]
fn list_verb_replies_with_alive_only_on_match() {
    let line = RendezvousLine::parse("carol :: [$] LIST ^bob");
    let msg = ControlMessage::parse(&line.body).unwrap();
    let username_regex = match msg {
        ControlMessage::List { username_regex } => username_regex,
        _ => panic!("expected LIST"),
    };
    assert!(list_matches(username_regex.as_deref(), "bob-the-builder"));
    assert!(!list_matches(username_regex.as_deref(), "alice"));
}

#[test]
fn established_call_exchanges_voice_pdus_over_fixed_call_numbers() {
    let mut caller = CallContext::new(0);
    caller.dial();
    caller.alert();
    caller.establish(100);

    let outbound = Pdu::for_send(&mut caller, PduType::Voice, Subclass::Lin16, 100, vec![1, 2, 3]);
    let bytes = outbound.encode().unwrap();

    let mut callee = CallContext::new(0);
    callee.establish(100);
    let inbound = Pdu::parse(&bytes).unwrap();
    assert!(inbound.matches_fixed_call());
    assert!(callee.accept_in_seq(inbound.out_seq));
    assert!(callee.note_voice_received());
    assert_eq!(inbound.voice_sample(3), Some(&[1u8, 2, 3][..]));
}
