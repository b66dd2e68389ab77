#![cfg(feature = "tls")]

//! A client that doesn't trust the server's certificate must see exactly
//! one ERROR event and never a CONNECTED one,
//! with `get_error_string()` mentioning the certificate problem — driven
//! through the full `EventLoop`/`IoObject`/`TlsLeaf` stack, unlike
//! `adapters/tls.rs`'s own unit tests, which pump `TlsLeaf` directly.

mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use rcgen::{generate_simple_self_signed, CertifiedKey};
use rustls_pki_types::ServerName;

use nexio::adapters::tls::{build_client_config, build_server_config, TlsConfig, TlsLeaf};
use nexio::event::{Event, EventKind};
use nexio::object::{IoObject, ObjectKind};

#[test]
fn untrusted_server_certificate_surfaces_as_a_single_error_event() {
    let CertifiedKey { cert, key_pair } =
        generate_simple_self_signed(vec!["localhost".into()]).expect("self-signed cert generation");
    let server_cert_pem = cert.pem();
    let server_key_pem = key_pair.serialize_pem();

    // The client is given an unrelated CA to trust, not the one the server
    // actually presents.
    let unrelated = generate_simple_self_signed(vec!["localhost".into()])
        .expect("second self-signed cert generation");
    let unrelated_ca_pem = unrelated.cert.pem();

    let mut lp = nexio::EventLoop::new().expect("event loop should construct in a test sandbox");

    let common::ConnectedPair { client, server } = common::connected_pair();
    let client_registerable = common::registerable_of(&client);
    let server_registerable = common::registerable_of(&server);

    let server_cfg = build_server_config(
        server_cert_pem.as_bytes(),
        server_key_pem.as_bytes(),
        &TlsConfig::new(),
    )
    .expect("server tls config should build in a test sandbox");
    let server_tls =
        TlsLeaf::server(Box::new(server), server_cfg).expect("server tls leaf should construct");
    let server_object = IoObject::new(ObjectKind::Stream, vec![Box::new(server_tls)]);
    let server_cb = Box::new(move |event: &Event, obj: &mut IoObject| {
        if matches!(event.kind(), EventKind::Error) {
            return;
        }
        let mut buf = [0u8; 256];
        while obj.read(&mut buf).is_ok() {}
    });
    lp.add(server_object, &server_registerable, server_cb)
        .expect("server registration should succeed in a test sandbox");

    let client_cfg = build_client_config(Some(unrelated_ca_pem.as_bytes()), &TlsConfig::new())
        .expect("client tls config should build in a test sandbox");
    let client_tls = TlsLeaf::client(
        Box::new(client),
        client_cfg,
        ServerName::try_from("localhost").unwrap(),
    )
    .expect("client tls leaf should construct");
    let client_object = IoObject::new(ObjectKind::Stream, vec![Box::new(client_tls)]);

    let observed_kinds: Arc<Mutex<Vec<EventKind>>> = Arc::new(Mutex::new(Vec::new()));
    let observed_kinds_cb = observed_kinds.clone();
    let error_string: Arc<Mutex<Option<String>>> = Arc::new(Mutex::new(None));
    let error_string_cb = error_string.clone();
    let handle = lp.handle();

    let client_cb = Box::new(move |event: &Event, obj: &mut IoObject| {
        observed_kinds_cb.lock().unwrap().push(event.kind());
        if matches!(event.kind(), EventKind::Error) {
            *error_string_cb.lock().unwrap() = obj.get_error_string().map(str::to_string);
            handle.done();
            return;
        }
        let mut buf = [0u8; 256];
        while obj.read(&mut buf).is_ok() {}
    });
    lp.add(client_object, &client_registerable, client_cb)
        .expect("client registration should succeed in a test sandbox");

    let result = lp.run(Some(5_000));
    assert_eq!(result, nexio::loop_::RunResult::Done, "the handshake failure should stop the loop");

    let kinds = observed_kinds.lock().unwrap();
    assert!(
        !kinds.iter().any(|k| matches!(k, EventKind::Connected)),
        "a failed handshake should never deliver CONNECTED, saw {kinds:?}"
    );
    assert_eq!(
        kinds.iter().filter(|k| matches!(k, EventKind::Error)).count(),
        1,
        "exactly one ERROR event should be delivered, saw {kinds:?}"
    );

    let msg = error_string.lock().unwrap().clone();
    let msg = msg.expect("get_error_string should be populated once the ERROR event is delivered");
    assert!(msg.contains("certificate"), "error string should mention the certificate, got: {msg}");
}
