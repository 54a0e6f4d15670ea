//! Link manager integration tests over real sockets on localhost.

use std::thread;
use std::time::{Duration, Instant};

use comms_if::{
    eqpt::motor::{FrameAccumulator, MotorMessage},
    net::zmq,
};
use ctrl_lib::link::{
    Candidate, CloseReason, LinkError, LinkMgr, LinkNotice, LinkParams,
};

/// Spawn a stand-in motor board data socket which answers pings with pongs
/// for a bounded time, returning its endpoint.
fn spawn_fake_board() -> String {
    let ctx = zmq::Context::new();
    let socket = ctx.socket(zmq::PAIR).unwrap();
    socket.set_rcvtimeo(50).unwrap();
    socket.bind("tcp://127.0.0.1:*").unwrap();

    let endpoint = socket.get_last_endpoint().unwrap().unwrap();

    thread::spawn(move || {
        let mut accum = FrameAccumulator::new();
        let start = Instant::now();

        while start.elapsed() < Duration::from_secs(20) {
            let bytes = match socket.recv_bytes(0) {
                Ok(b) => b,
                Err(_) => continue,
            };

            accum.extend(&bytes);
            while let Some(result) = accum.next_frame() {
                if let Ok(MotorMessage::Ping { timestamp_s }) = result {
                    socket
                        .send(MotorMessage::Pong { timestamp_s }.encode(), 0)
                        .ok();
                }
            }
        }
    });

    endpoint
}

fn test_params() -> LinkParams {
    LinkParams {
        // The SUB socket connects lazily, a dead beacon endpoint is fine
        // for tests that drive connect() directly
        beacon_endpoints: vec!["tcp://127.0.0.1:59999".into()],
        candidate_timeout_s: 5.0,
        scan_republish_s: 0.2,
        connect_timeout_s: 2.0,
        handshake_timeout_s: 2.0,
        reconnect_backoff_s: 0.1,
        scan_poll_ms: 20,
        data_poll_ms: 20,
    }
}

fn candidate_for(name: &str, endpoint: String) -> Candidate {
    Candidate {
        name: name.into(),
        rssi_dbm: -40,
        max_write_len: 20,
        data_endpoint: endpoint,
        last_seen: Instant::now(),
    }
}

#[test]
fn test_connect_replaces_prior_connection() {
    let board_a = spawn_fake_board();
    let board_b = spawn_fake_board();

    let mgr = LinkMgr::start(test_params()).unwrap();

    // First session
    let mut conn_a = mgr.connect(&candidate_for("a", board_a)).unwrap();
    let notices_a = conn_a.take_notices().unwrap();

    conn_a
        .send(&MotorMessage::Motor {
            left_throttle: 0.1,
            right_throttle: 0.1,
        })
        .unwrap();

    // Second connect must close the first session with reason "replaced"
    // before the new one is exposed
    let mut conn_b = mgr.connect(&candidate_for("b", board_b)).unwrap();
    let notices_b = conn_b.take_notices().unwrap();

    // The first session's receive stream ends with the close reason
    let mut close_reason = None;
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        match notices_a.recv_timeout(Duration::from_millis(100)) {
            Ok(LinkNotice::Closed(reason)) => {
                close_reason = Some(reason);
                break;
            }
            Ok(_) => continue,
            Err(_) => continue,
        }
    }
    assert_eq!(close_reason, Some(CloseReason::Replaced));

    // The stale handle reports the original close reason, not a generic
    // failure
    match conn_a.send(&MotorMessage::Ping { timestamp_s: 0.0 }) {
        Err(LinkError::Closed(CloseReason::Replaced)) => (),
        other => panic!("Expected Closed(Replaced), got {:?}", other),
    }

    // The new session is fully usable: an acknowledged ping comes back as
    // a pong on the receive stream
    conn_b
        .send_acked(&MotorMessage::Ping { timestamp_s: 42.0 })
        .unwrap();

    let mut saw_pong = false;
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        match notices_b.recv_timeout(Duration::from_millis(100)) {
            Ok(LinkNotice::Message(MotorMessage::Pong { timestamp_s })) => {
                assert_eq!(timestamp_s, 42.0);
                saw_pong = true;
                break;
            }
            Ok(_) => continue,
            Err(_) => continue,
        }
    }
    assert!(saw_pong, "never saw the pong on the new session");
}

#[test]
fn test_intentional_close_reports_closed() {
    let board = spawn_fake_board();

    let mgr = LinkMgr::start(test_params()).unwrap();

    let mut conn = mgr.connect(&candidate_for("board", board)).unwrap();
    let notices = conn.take_notices().unwrap();

    conn.close();

    let mut close_reason = None;
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        match notices.recv_timeout(Duration::from_millis(100)) {
            Ok(LinkNotice::Closed(reason)) => {
                close_reason = Some(reason);
                break;
            }
            Ok(_) => continue,
            Err(_) => continue,
        }
    }
    assert_eq!(close_reason, Some(CloseReason::Closed));
}

#[test]
fn test_connect_to_dead_endpoint_fails() {
    let mgr = LinkMgr::start(test_params()).unwrap();

    // Nothing listens here; the attempt must resolve as a failure rather
    // than hang
    let result = mgr.connect(&candidate_for("ghost", "tcp://127.0.0.1:59998".into()));
    assert!(result.is_err());
}
