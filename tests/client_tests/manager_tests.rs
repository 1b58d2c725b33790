//! Tests for ConnectionManager
//!
//! These tests verify:
//! - Connect, auth and ready-check handshakes
//! - FIFO reply correlation across arbitrary chunking
//! - Offline queueing and replay
//! - Teardown, retry scheduling and backoff reset
//! - Backpressure (should-buffer / drain)

use std::time::Duration;

use bytes::Bytes;
use memwire::client::{ClientEvent, Command};
use memwire::network::TransportEvent;
use memwire::protocol::{decode_frame, Arg, CommandName, Opcode, Request};
use memwire::{ClientError, Config, ConnectionState};

use crate::common::*;

// =============================================================================
// Helper Functions
// =============================================================================

fn request(name: CommandName, args: Vec<Arg>) -> Request {
    Request::parse(name, args).unwrap()
}

fn get(key: &str) -> Request {
    request(CommandName::Get, vec![key.into()])
}

fn tracked(request: Request, replies: &Replies, tag: u32) -> Command {
    Command::new(request, Some(replies.callback(tag)))
}

fn concat(chunks: &[Bytes]) -> Vec<u8> {
    chunks.iter().flat_map(|c| c.to_vec()).collect()
}

// =============================================================================
// Handshake Tests
// =============================================================================

#[test]
fn test_start_connects_to_configured_address() {
    let (mut manager, handle, _events) = manager(test_config());
    assert_eq!(manager.state(), ConnectionState::Disconnected);

    manager.start();

    assert_eq!(manager.state(), ConnectionState::Connecting);
    assert_eq!(handle.connects(), vec![("cache.local".to_string(), 11211)]);
}

#[test]
fn test_connect_runs_ready_check() {
    let (mut manager, handle, events) = manager(test_config());
    manager.start();
    handle.set_writable(true);

    manager.handle_event(TransportEvent::Connect);

    assert_eq!(manager.state(), ConnectionState::ReadyChecking);
    assert_eq!(manager.connection_id(), 1);
    assert_eq!(handle.configured(), 1);
    assert_eq!(handle.written_opcodes(), vec![Opcode::Noop as u8]);
    assert!(matches!(drain_events(&events)[..], [ClientEvent::Connect]));

    manager.handle_event(TransportEvent::Data(ok_reply(Opcode::Noop)));

    assert!(manager.is_ready());
    let after = drain_events(&events);
    assert!(matches!(after.last(), Some(ClientEvent::Ready)));
}

#[test]
fn test_auth_precedes_ready_check() {
    let config = Config::builder()
        .host("cache.local")
        .credentials("user", "secret")
        .build();
    let (mut manager, handle, events) = manager(config);
    manager.start();
    handle.set_writable(true);

    manager.handle_event(TransportEvent::Connect);

    assert_eq!(manager.state(), ConnectionState::Authenticating);
    let frames = handle.written_frames();
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].header.opcode, Opcode::SaslAuth as u8);
    assert_eq!(frames[0].key.as_ref(), b"PLAIN");
    assert_eq!(frames[0].value.as_ref(), b"\0user\0secret");
    assert!(drain_events(&events).is_empty());

    manager.handle_event(TransportEvent::Data(ok_reply(Opcode::SaslAuth)));

    assert_eq!(manager.state(), ConnectionState::ReadyChecking);
    assert!(matches!(drain_events(&events)[..], [ClientEvent::Connect]));

    manager.handle_event(TransportEvent::Data(ok_reply(Opcode::Noop)));
    assert!(manager.is_ready());
}

#[test]
fn test_auth_failure_surfaces_error_without_retry() {
    let config = Config::builder()
        .host("cache.local")
        .credentials("user", "wrong")
        .build();
    let (mut manager, handle, events) = manager(config);
    manager.start();
    handle.set_writable(true);
    manager.handle_event(TransportEvent::Connect);

    manager.handle_event(TransportEvent::Data(reply(Opcode::SaslAuth, 0x08, b"Auth failure")));

    assert_eq!(manager.state(), ConnectionState::Authenticating);
    assert!(manager.retry_deadline().is_none());
    match &drain_events(&events)[..] {
        [ClientEvent::Error(ClientError::AuthFailed(message))] => {
            assert_eq!(message, "Authentication error");
        }
        other => panic!("Expected auth error, got {:?}", other),
    }
}

#[test]
fn test_failed_ready_check_is_reported() {
    let (mut manager, handle, events) = manager(test_config());
    manager.start();
    handle.set_writable(true);
    manager.handle_event(TransportEvent::Connect);
    drain_events(&events);

    manager.handle_event(TransportEvent::Data(reply(Opcode::Noop, 0x85, b"")));

    assert!(!manager.is_ready());
    assert!(matches!(
        drain_events(&events)[..],
        [ClientEvent::Error(ClientError::ReadyCheckFailed(_))]
    ));
}

// =============================================================================
// Reply Correlation Tests
// =============================================================================

#[test]
fn test_replies_resolve_in_send_order() {
    let (mut manager, handle, _events) = ready_manager(test_config());
    let replies = Replies::new();

    manager.send(tracked(get("a"), &replies, 1)).unwrap();
    manager
        .send(tracked(request(CommandName::Set, vec!["b".into(), "v".into()]), &replies, 2))
        .unwrap();
    manager.send(tracked(get("c"), &replies, 3)).unwrap();
    assert_eq!(handle.written_opcodes(), vec![0x00, 0x01, 0x00]);
    assert_eq!(manager.command_queue_len(), 3);

    let stream = concat(&[
        get_hit(b"first"),
        ok_reply(Opcode::Set),
        reply(Opcode::Get, 0x01, b"Not found"),
    ]);
    for byte in stream {
        manager.handle_event(TransportEvent::Data(Bytes::copy_from_slice(&[byte])));
    }
    run_completions(&mut manager);

    assert_eq!(replies.tags(), vec![1, 2, 3]);
    let results = replies.take();
    assert_eq!(results[0].1.as_ref().unwrap().as_deref(), Some(&b"first"[..]));
    assert_eq!(results[1].1.as_ref().unwrap().as_deref(), Some(&b""[..]));
    assert!(matches!(results[2].1, Ok(None)));
    assert_eq!(manager.command_queue_len(), 0);
}

#[test]
fn test_large_and_small_replies_in_one_chunk() {
    let (mut manager, _handle, _events) = ready_manager(test_config());
    let replies = Replies::new();
    let big = vec![b'z'; 100_000];

    manager.send(tracked(get("big"), &replies, 1)).unwrap();
    manager.send(tracked(get("small"), &replies, 2)).unwrap();

    let stream = concat(&[get_hit(&big), get_hit(b"s")]);
    let (head, tail) = stream.split_at(50_000);
    manager.handle_event(TransportEvent::Data(Bytes::copy_from_slice(head)));
    assert_eq!(manager.command_queue_len(), 2);
    manager.handle_event(TransportEvent::Data(Bytes::copy_from_slice(tail)));
    run_completions(&mut manager);

    let results = replies.take();
    assert_eq!(results[0].1.as_ref().unwrap().as_ref().unwrap().len(), 100_000);
    assert_eq!(results[1].1.as_ref().unwrap().as_deref(), Some(&b"s"[..]));
}

#[test]
fn test_server_error_only_affects_its_command() {
    let (mut manager, _handle, _events) = ready_manager(test_config());
    let replies = Replies::new();

    manager
        .send(tracked(request(CommandName::Delete, vec!["gone".into()]), &replies, 1))
        .unwrap();
    manager.send(tracked(get("kept"), &replies, 2)).unwrap();

    let stream = concat(&[reply(Opcode::Delete, 0x01, b"Not found"), get_hit(b"v")]);
    manager.handle_event(TransportEvent::Data(Bytes::from(stream)));
    run_completions(&mut manager);

    let results = replies.take();
    match &results[0].1 {
        Err(ClientError::Server { status, message }) => {
            assert_eq!(*status, 0x01);
            assert_eq!(message, "Key not found");
        }
        other => panic!("Expected server error, got {:?}", other),
    }
    assert!(results[1].1.is_ok());
    assert!(manager.is_ready());
}

#[test]
fn test_requests_carry_incrementing_opaque() {
    let (mut manager, handle, _events) = ready_manager(test_config());

    manager.send(Command::new(get("a"), None)).unwrap();
    manager.send(Command::new(get("b"), None)).unwrap();

    let opaques: Vec<u32> = handle.written_frames().iter().map(|f| f.header.opaque).collect();
    assert_eq!(opaques, vec![1, 2]);
}

#[test]
fn test_default_expiration_applies_to_stores() {
    let config = Config::builder().host("cache.local").default_expiration(60).build();
    let (mut manager, handle, _events) = ready_manager(config);

    manager
        .send(Command::new(request(CommandName::Set, vec!["k".into(), "v".into()]), None))
        .unwrap();

    let written = handle.writes();
    let (frame, _) = decode_frame(&written[0], u32::MAX).unwrap().unwrap();
    assert_eq!(frame.extras.as_ref(), &[0, 0, 0, 0, 0, 0, 0, 60]);
}

#[test]
fn test_reply_without_pending_command_is_ignored() {
    let (mut manager, _handle, events) = ready_manager(test_config());

    manager.handle_event(TransportEvent::Data(ok_reply(Opcode::Noop)));

    assert!(manager.is_ready());
    assert!(manager.take_completions().is_empty());
    assert!(drain_events(&events).is_empty());
}

// =============================================================================
// Offline Queue Tests
// =============================================================================

#[test]
fn test_commands_before_ready_are_queued_and_replayed() {
    let (mut manager, handle, events) = manager(test_config());
    let replies = Replies::new();
    manager.start();

    assert!(!manager.send(tracked(get("a"), &replies, 1)).unwrap());
    assert!(!manager
        .send(tracked(request(CommandName::Set, vec!["b".into(), "v".into()]), &replies, 2))
        .unwrap());
    assert_eq!(manager.offline_queue_len(), 2);
    assert!(manager.should_buffer());
    assert!(handle.writes().is_empty());

    connect_and_ready(&mut manager, &handle);

    assert_eq!(manager.offline_queue_len(), 0);
    assert_eq!(handle.written_opcodes(), vec![Opcode::Noop as u8, 0x00, 0x01]);
    assert!(!manager.should_buffer());
    let emitted = drain_events(&events);
    assert!(emitted.iter().any(|e| matches!(e, ClientEvent::Drain)));

    let stream = concat(&[get_hit(b"A"), ok_reply(Opcode::Set)]);
    manager.handle_event(TransportEvent::Data(Bytes::from(stream)));
    run_completions(&mut manager);
    assert_eq!(replies.tags(), vec![1, 2]);
}

#[test]
fn test_commands_queue_while_handshake_is_pending() {
    let (mut manager, handle, _events) = manager(test_config());
    manager.start();
    handle.set_writable(true);
    manager.handle_event(TransportEvent::Connect);

    manager.send(Command::new(get("early"), None)).unwrap();

    assert_eq!(manager.offline_queue_len(), 1);
    assert_eq!(handle.written_opcodes(), vec![Opcode::Noop as u8]);
}

#[test]
fn test_unwritable_transport_queues_even_when_ready() {
    let (mut manager, handle, _events) = ready_manager(test_config());
    handle.set_writable(false);

    assert!(!manager.send(Command::new(get("a"), None)).unwrap());
    assert_eq!(manager.offline_queue_len(), 1);
    assert!(handle.writes().is_empty());
}

#[test]
fn test_partial_replay_keeps_rest_queued_in_order() {
    let (mut manager, handle, events) = manager(test_config());
    let replies = Replies::new();
    manager.start();

    for (tag, key) in [(1, "a"), (2, "b"), (3, "c")] {
        assert!(!manager.send(tracked(get(key), &replies, tag)).unwrap());
    }

    handle.set_writable(true);
    manager.handle_event(TransportEvent::Connect);
    handle.clear_writes();
    drain_events(&events);

    // The socket stops accepting after the first replayed command
    handle.set_writable_for(1);
    manager.handle_event(TransportEvent::Data(ok_reply(Opcode::Noop)));

    assert!(manager.is_ready());
    let keys: Vec<Bytes> = handle.written_frames().into_iter().map(|f| f.key).collect();
    assert_eq!(keys, vec![Bytes::from_static(b"a")]);
    assert_eq!(manager.command_queue_len(), 1);
    assert_eq!(manager.offline_queue_len(), 2);
    assert!(manager.should_buffer());

    let emitted = drain_events(&events);
    assert!(emitted.iter().any(|e| matches!(e, ClientEvent::Ready)));
    assert!(!emitted.iter().any(|e| matches!(e, ClientEvent::Drain)));

    // New work lines up behind the commands that were pushed back
    assert!(!manager.send(tracked(get("d"), &replies, 4)).unwrap());
    assert_eq!(manager.offline_queue_len(), 3);

    manager.close();
    run_completions(&mut manager);
    assert_eq!(replies.tags(), vec![2, 3, 4, 1]);
}

#[test]
fn test_offline_queue_disabled() {
    let config = Config::builder()
        .host("cache.local")
        .enable_offline_queue(false)
        .build();
    let (mut manager, _handle, _events) = manager(config);
    let replies = Replies::new();
    manager.start();

    assert!(!manager.send(tracked(get("a"), &replies, 1)).unwrap());
    run_completions(&mut manager);
    assert!(matches!(replies.take()[0].1, Err(ClientError::NotWritable)));

    let err = manager.send(Command::new(get("b"), None)).unwrap_err();
    assert!(matches!(err, ClientError::NotWritable));
    assert_eq!(manager.offline_queue_len(), 0);
}

// =============================================================================
// Teardown and Retry Tests
// =============================================================================

#[test]
fn test_connection_loss_fails_everything_once() {
    let (mut manager, handle, events) = ready_manager(test_config());
    let replies = Replies::new();

    manager.send(tracked(get("in-flight"), &replies, 1)).unwrap();
    handle.set_writable(false);
    manager.send(tracked(get("offline"), &replies, 2)).unwrap();

    manager.handle_event(TransportEvent::Close);
    manager.handle_event(TransportEvent::End);
    run_completions(&mut manager);

    // Offline queue is flushed before the in-flight queue
    assert_eq!(replies.tags(), vec![2, 1]);
    for (_, result) in replies.take() {
        match result {
            Err(ClientError::ConnectionGone(message)) => {
                assert_eq!(message, "Memcached connection gone from close event.");
            }
            other => panic!("Expected ConnectionGone, got {:?}", other),
        }
    }

    let emitted = drain_events(&events);
    assert_eq!(emitted.iter().filter(|e| matches!(e, ClientEvent::End)).count(), 1);
    let reconnects: Vec<_> = emitted
        .iter()
        .filter_map(|e| match e {
            ClientEvent::Reconnecting { delay, attempt } => Some((*delay, *attempt)),
            _ => None,
        })
        .collect();
    assert_eq!(reconnects, vec![(Duration::from_millis(255), 2)]);

    assert_eq!(manager.state(), ConnectionState::Disconnected);
    assert_eq!(manager.command_queue_len(), 0);
    assert_eq!(manager.offline_queue_len(), 0);
}

#[test]
fn test_transport_error_reports_failure() {
    let (mut manager, _handle, events) = ready_manager(test_config());
    let replies = Replies::new();
    manager.send(tracked(get("a"), &replies, 1)).unwrap();

    manager.handle_event(TransportEvent::Error("connection reset by peer".to_string()));
    run_completions(&mut manager);

    let expected = "Memcached connection to cache.local:11211 failed - connection reset by peer";
    match &replies.take()[0].1 {
        Err(ClientError::ConnectionFailed(message)) => assert_eq!(message, expected),
        other => panic!("Expected ConnectionFailed, got {:?}", other),
    }

    let emitted = drain_events(&events);
    assert!(matches!(
        &emitted[0],
        ClientEvent::Error(ClientError::ConnectionFailed(m)) if m == expected
    ));
    assert!(matches!(emitted[1], ClientEvent::End));
    assert!(matches!(emitted[2], ClientEvent::Reconnecting { .. }));
}

#[test]
fn test_retry_timer_reconnects_when_due() {
    let (mut manager, handle, _events) = ready_manager(test_config());
    manager.handle_event(TransportEvent::Close);

    let deadline = manager.retry_deadline().unwrap();
    manager.poll_retry(deadline - Duration::from_millis(1));
    assert_eq!(handle.connects().len(), 1);
    assert_eq!(manager.state(), ConnectionState::Disconnected);

    manager.poll_retry(deadline);
    assert_eq!(handle.connects().len(), 2);
    assert_eq!(manager.state(), ConnectionState::Connecting);
    assert!(manager.retry_deadline().is_none());
}

#[test]
fn test_backoff_grows_until_ready_then_resets() {
    let (mut manager, handle, events) = ready_manager(test_config());

    manager.handle_event(TransportEvent::Close);
    assert_eq!(manager.retry_delay(), Duration::from_millis(255));

    // Reconnect attempt refused
    manager.poll_retry(manager.retry_deadline().unwrap());
    manager.handle_event(TransportEvent::Error("connection refused".to_string()));
    manager.handle_event(TransportEvent::Close);
    assert_eq!(manager.retry_delay(), Duration::from_millis(433));
    assert_eq!(manager.retry_attempts(), 3);

    // End is reported once for the lost connection, not per failed attempt
    let ends = drain_events(&events)
        .iter()
        .filter(|e| matches!(e, ClientEvent::End))
        .count();
    assert_eq!(ends, 1);

    manager.poll_retry(manager.retry_deadline().unwrap());
    connect_and_ready(&mut manager, &handle);
    assert!(manager.is_ready());
    assert_eq!(manager.retry_delay(), Duration::from_millis(150));
    assert_eq!(manager.retry_attempts(), 1);
    assert_eq!(manager.connection_id(), 2);

    manager.handle_event(TransportEvent::End);
    assert_eq!(manager.retry_delay(), Duration::from_millis(255));
}

#[test]
fn test_quit_suppresses_reconnect() {
    let (mut manager, _handle, events) = ready_manager(test_config());
    let replies = Replies::new();

    manager.send(tracked(Request::Quit, &replies, 1)).unwrap();
    assert!(manager.is_closing());

    manager.handle_event(TransportEvent::Data(ok_reply(Opcode::Quit)));
    manager.handle_event(TransportEvent::End);
    manager.handle_event(TransportEvent::Error("late error".to_string()));
    manager.handle_event(TransportEvent::Close);
    run_completions(&mut manager);

    assert!(matches!(replies.take()[0].1, Ok(_)));
    assert_eq!(manager.state(), ConnectionState::Closing);
    assert!(manager.retry_deadline().is_none());

    let emitted = drain_events(&events);
    assert_eq!(emitted.iter().filter(|e| matches!(e, ClientEvent::End)).count(), 1);
    assert!(!emitted
        .iter()
        .any(|e| matches!(e, ClientEvent::Reconnecting { .. } | ClientEvent::Error(_))));
}

#[test]
fn test_close_fails_pending_and_rejects_new_commands() {
    let (mut manager, handle, _events) = ready_manager(test_config());
    let replies = Replies::new();
    manager.send(tracked(get("a"), &replies, 1)).unwrap();

    manager.close();
    run_completions(&mut manager);

    assert_eq!(manager.state(), ConnectionState::Closing);
    assert_eq!(handle.closed(), 1);
    assert!(matches!(replies.take()[0].1, Err(ClientError::Closed)));

    assert!(!manager.send(tracked(get("b"), &replies, 2)).unwrap());
    run_completions(&mut manager);
    assert!(matches!(replies.take()[0].1, Err(ClientError::Closed)));

    let err = manager.send(Command::new(get("c"), None)).unwrap_err();
    assert!(matches!(err, ClientError::Closed));

    manager.handle_event(TransportEvent::Close);
    assert!(manager.retry_deadline().is_none());
}

#[test]
fn test_decode_error_tears_down_connection() {
    let (mut manager, handle, events) = ready_manager(test_config());
    let replies = Replies::new();
    manager.send(tracked(get("a"), &replies, 1)).unwrap();

    manager.handle_event(TransportEvent::Data(Bytes::from(vec![0xff; 24])));
    run_completions(&mut manager);

    assert_eq!(handle.closed(), 1);
    assert_eq!(manager.state(), ConnectionState::Disconnected);
    assert!(manager.retry_deadline().is_some());

    match &replies.take()[0].1 {
        Err(ClientError::ConnectionFailed(message)) => assert!(message.contains("invalid magic")),
        other => panic!("Expected ConnectionFailed, got {:?}", other),
    }

    let emitted = drain_events(&events);
    assert!(matches!(emitted[0], ClientEvent::Error(ClientError::Decode(_))));
    assert!(matches!(emitted[1], ClientEvent::End));
}

// =============================================================================
// Backpressure Tests
// =============================================================================

#[test]
fn test_high_water_then_low_water_drain() {
    let config = Config::builder()
        .host("cache.local")
        .command_queue_high_water(2)
        .build();
    let (mut manager, _handle, events) = ready_manager(config);

    assert!(manager.send(Command::new(get("a"), None)).unwrap());
    assert!(!manager.send(Command::new(get("b"), None)).unwrap());
    assert!(manager.should_buffer());

    manager.handle_event(TransportEvent::Data(get_hit(b"1")));
    assert!(manager.should_buffer());
    assert!(drain_events(&events).is_empty());

    manager.handle_event(TransportEvent::Data(get_hit(b"2")));
    assert!(!manager.should_buffer());
    assert!(matches!(drain_events(&events)[..], [ClientEvent::Drain]));
}

#[test]
fn test_buffered_write_waits_for_transport_drain() {
    let (mut manager, handle, events) = ready_manager(test_config());
    handle.set_buffer_writes(true);

    assert!(!manager.send(Command::new(get("a"), None)).unwrap());
    assert!(manager.should_buffer());

    // The reply alone does not clear pressure while the socket is backlogged
    manager.handle_event(TransportEvent::Data(get_hit(b"1")));
    assert!(manager.should_buffer());

    manager.handle_event(TransportEvent::Drain);
    assert!(!manager.should_buffer());
    assert!(matches!(drain_events(&events)[..], [ClientEvent::Drain]));
}

#[test]
fn test_leftover_in_flight_commands_fail_on_new_connection() {
    let (mut manager, _handle, _events) = ready_manager(test_config());
    let replies = Replies::new();
    manager.send(tracked(get("a"), &replies, 1)).unwrap();

    manager.handle_event(TransportEvent::Connect);
    run_completions(&mut manager);

    assert!(matches!(replies.take()[0].1, Err(ClientError::ConnectionGone(_))));
}
