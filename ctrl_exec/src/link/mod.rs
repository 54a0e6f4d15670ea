//! # Wireless link manager
//!
//! A single-consumer state machine guaranteeing at most one active
//! connection to a motor board. While unconnected the manager scans for
//! advertisement beacons and republishes a de-duplicated, signal-strength
//! ordered candidate list on a bounded interval. `connect` closes any
//! existing session (reason: replaced), then attempts a transport connect
//! followed by a service handshake (a ping answered by a pong) before the
//! session counts as established. After any close, scanning resumes
//! automatically, with a fixed backoff after failures so a flapping link
//! cannot starve the radio.
//!
//! All of this runs on one background thread; the rest of the system talks
//! to it through channels and the [`Connection`] handle.

// ---------------------------------------------------------------------------
// MODULES
// ---------------------------------------------------------------------------

pub mod connection;
pub mod scan;

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use log::{debug, info, warn};
use serde::Deserialize;
use std::sync::mpsc::{channel, sync_channel, Receiver, Sender, SyncSender};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use comms_if::{
    eqpt::motor::{Advertisement, FrameAccumulator, MotorMessage},
    net::{zmq, MonitoredSocket, NetEvent, SocketOptions},
};

// Internal
pub use connection::{CloseReason, Connection, LinkError, LinkNotice};
pub use scan::{Candidate, CandidateList};

use connection::{ConnShared, Outbound};

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Parameters for the link manager.
#[derive(Debug, Clone, Deserialize)]
pub struct LinkParams {
    /// Beacon endpoints watched during scanning
    pub beacon_endpoints: Vec<String>,

    /// Candidates unseen for this long are evicted, in seconds
    pub candidate_timeout_s: f64,

    /// Interval between candidate list publications, in seconds
    pub scan_republish_s: f64,

    /// Transport connect timeout, in seconds
    pub connect_timeout_s: f64,

    /// Time allowed for the post-connect handshake, in seconds
    pub handshake_timeout_s: f64,

    /// Fixed delay after a failed or lost connection before scanning
    /// resumes, in seconds
    pub reconnect_backoff_s: f64,

    /// Receive timeout while scanning, in milliseconds
    pub scan_poll_ms: i32,

    /// Receive timeout on the data socket, in milliseconds
    pub data_poll_ms: i32,
}

/// Handle to the link manager thread.
pub struct LinkMgr {
    cmd_tx: Sender<LinkCmd>,
    discovery_rx: Option<Receiver<Vec<Candidate>>>,
    join_handle: Option<thread::JoinHandle<()>>,
}

/// The manager thread's side of an active session.
struct ActiveConn {
    socket: MonitoredSocket,
    events: Receiver<NetEvent>,
    accum: FrameAccumulator,
    out_rx: Receiver<Outbound>,
    notice_tx: Sender<LinkNotice>,
    shared: Arc<ConnShared>,
    epoch: u64,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// Commands accepted by the manager thread.
#[derive(Debug)]
pub(crate) enum LinkCmd {
    Connect {
        candidate: Candidate,
        result_tx: SyncSender<Result<Connection, LinkError>>,
    },

    Disconnect {
        epoch: u64,
    },

    Shutdown,
}

/// Outcome of servicing the active session for one loop iteration.
#[derive(PartialEq)]
enum Service {
    Continue,
    Lost,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl LinkMgr {
    /// Initialise the link manager from a parameter file and start its
    /// thread.
    pub fn init(params_path: &str) -> Result<Self, LinkError> {
        let params = util::params::load(params_path).map_err(LinkError::ParamLoadError)?;
        Self::start(params)
    }

    /// Start the link manager thread with the given parameters.
    pub fn start(params: LinkParams) -> Result<Self, LinkError> {
        if params.beacon_endpoints.is_empty() {
            return Err(LinkError::ConnectFailed(
                "no beacon endpoints to scan".into(),
            ));
        }

        let ctx = zmq::Context::new();

        // One SUB socket watches every beacon endpoint
        let scan_options = SocketOptions {
            recv_timeout: params.scan_poll_ms,
            ..Default::default()
        };
        let scan = MonitoredSocket::new(
            &ctx,
            zmq::SUB,
            scan_options,
            &params.beacon_endpoints[0],
        )
        .map_err(LinkError::SocketError)?;

        for endpoint in params.beacon_endpoints.iter().skip(1) {
            scan.connect(endpoint)
                .map_err(|e| LinkError::ConnectFailed(format!("{}: {}", endpoint, e)))?;
        }

        let (cmd_tx, cmd_rx) = channel();
        let (discovery_tx, discovery_rx) = channel();

        let thread_cmd_tx = cmd_tx.clone();
        let join_handle = thread::spawn(move || {
            link_thread(params, ctx, scan, thread_cmd_tx, cmd_rx, discovery_tx)
        });

        Ok(Self {
            cmd_tx,
            discovery_rx: Some(discovery_rx),
            join_handle: Some(join_handle),
        })
    }

    /// Claim the discovery channel, on which the manager republishes the
    /// candidate list while scanning. Can only be claimed once.
    pub fn take_discovery(&mut self) -> Option<Receiver<Vec<Candidate>>> {
        self.discovery_rx.take()
    }

    /// Connect to a candidate, blocking until the session is established
    /// or the attempt fails.
    ///
    /// Any existing session is closed first with reason
    /// [`CloseReason::Replaced`]. Only one attempt runs at a time; attempts
    /// issued concurrently queue behind it.
    pub fn connect(&self, candidate: &Candidate) -> Result<Connection, LinkError> {
        let (result_tx, result_rx) = sync_channel(1);

        self.cmd_tx
            .send(LinkCmd::Connect {
                candidate: candidate.clone(),
                result_tx,
            })
            .map_err(|_| LinkError::MgrUnavailable)?;

        result_rx.recv().map_err(|_| LinkError::MgrUnavailable)?
    }
}

impl Drop for LinkMgr {
    fn drop(&mut self) {
        self.cmd_tx.send(LinkCmd::Shutdown).ok();

        if let Some(jh) = self.join_handle.take() {
            jh.join().ok();
        }
    }
}

// ---------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ---------------------------------------------------------------------------

/// Main loop of the link manager thread.
fn link_thread(
    params: LinkParams,
    ctx: zmq::Context,
    scan: MonitoredSocket,
    cmd_tx: Sender<LinkCmd>,
    cmd_rx: Receiver<LinkCmd>,
    discovery_tx: Sender<Vec<Candidate>>,
) {
    let mut candidates = CandidateList::new(Duration::from_secs_f64(params.candidate_timeout_s));
    let republish = Duration::from_secs_f64(params.scan_republish_s);
    let backoff = Duration::from_secs_f64(params.reconnect_backoff_s);

    let mut last_publish: Option<Instant> = None;
    let mut active: Option<ActiveConn> = None;
    let mut next_epoch: u64 = 0;

    loop {
        // ---- COMMANDS ----

        let mut shutdown = false;

        while let Ok(cmd) = cmd_rx.try_recv() {
            match cmd {
                LinkCmd::Connect {
                    candidate,
                    result_tx,
                } => {
                    // A prior session is closed as replaced before the new
                    // attempt begins, so two valid handles never coexist
                    if let Some(old) = active.take() {
                        close_active(old, CloseReason::Replaced);
                    }

                    next_epoch += 1;

                    match attempt_connect(&ctx, &params, &candidate, &cmd_tx, next_epoch) {
                        Ok((act, handle)) => {
                            info!(
                                "Connected to \"{}\" ({})",
                                candidate.name, candidate.data_endpoint
                            );
                            active = Some(act);
                            result_tx.try_send(Ok(handle)).ok();
                        }
                        Err(e) => {
                            warn!("Connect attempt to \"{}\" failed: {}", candidate.name, e);
                            result_tx.try_send(Err(e)).ok();
                            thread::sleep(backoff);
                        }
                    }
                }
                LinkCmd::Disconnect { epoch } => {
                    // Stale handles (from an already-replaced session) must
                    // not tear down the current one
                    if active.as_ref().map(|a| a.epoch) == Some(epoch) {
                        if let Some(act) = active.take() {
                            close_active(act, CloseReason::Closed);
                        }
                    }
                }
                LinkCmd::Shutdown => shutdown = true,
            }
        }

        if shutdown {
            if let Some(act) = active.take() {
                close_active(act, CloseReason::Closed);
            }
            break;
        }

        // ---- ACTIVE SESSION ----

        if let Some(act) = active.as_mut() {
            // Scanning is paused while connected; discard any beacon
            // traffic so it doesn't pile up
            while scan.recv_bytes(zmq::DONTWAIT).is_ok() {}

            if service_active(act) == Service::Lost {
                if let Some(act) = active.take() {
                    close_active(act, CloseReason::Lost);
                }

                warn!(
                    "Link lost, resuming scanning in {:.1} s",
                    backoff.as_secs_f64()
                );
                thread::sleep(backoff);
            }

            continue;
        }

        // ---- SCANNING ----

        match scan.recv_string(0) {
            Ok(Ok(json)) => match serde_json::from_str::<Advertisement>(&json) {
                Ok(advert) => candidates.observe(advert, Instant::now()),
                Err(e) => debug!("Dropping malformed advertisement: {}", e),
            },
            Ok(Err(_)) => debug!("Dropping non-UTF8 advertisement"),
            Err(zmq::Error::EAGAIN) => (),
            Err(e) => warn!("Couldn't read from beacon socket: {}", e),
        }

        let publish_due = match last_publish {
            Some(t) => t.elapsed() >= republish,
            None => true,
        };

        if publish_due {
            candidates.evict_stale(Instant::now());
            discovery_tx.send(candidates.snapshot()).ok();
            last_publish = Some(Instant::now());
        }
    }
}

/// Attempt a full connect: transport, then service handshake.
fn attempt_connect(
    ctx: &zmq::Context,
    params: &LinkParams,
    candidate: &Candidate,
    cmd_tx: &Sender<LinkCmd>,
    epoch: u64,
) -> Result<(ActiveConn, Connection), LinkError> {
    let options = SocketOptions {
        block_on_first_connect: true,
        connect_timeout: (params.connect_timeout_s * 1000.0) as i32,
        recv_timeout: params.data_poll_ms,
        send_timeout: 100,
        heartbeat_ivl: 500,
        heartbeat_timeout: 1000,
        heartbeat_ttl: 1000,
        ..Default::default()
    };

    let mut socket = MonitoredSocket::new(ctx, zmq::PAIR, options, &candidate.data_endpoint)
        .map_err(|e| LinkError::ConnectFailed(e.to_string()))?;

    let events = socket
        .take_events()
        .ok_or_else(|| LinkError::ConnectFailed("event channel unavailable".into()))?;

    // Service handshake: the session is only established once the board
    // answers a ping, proving the message service is up behind the
    // transport
    let timestamp_s = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0);

    socket
        .send(MotorMessage::Ping { timestamp_s }.encode(), 0)
        .map_err(LinkError::SendFailed)?;

    let deadline = Instant::now() + Duration::from_secs_f64(params.handshake_timeout_s);
    let mut accum = FrameAccumulator::new();

    'handshake: loop {
        // A transport drop before the handshake resolves the attempt as a
        // failure rather than hanging it
        while let Ok(event) = events.try_recv() {
            if event == NetEvent::Disconnected {
                return Err(LinkError::ConnectFailed(
                    "transport lost before handshake completed".into(),
                ));
            }
        }

        match socket.recv_bytes(0) {
            Ok(bytes) => {
                accum.extend(&bytes);
                while let Some(result) = accum.next_frame() {
                    match result {
                        Ok(MotorMessage::Pong { .. }) => break 'handshake,
                        Ok(other) => debug!("Ignoring pre-handshake frame {:?}", other),
                        Err(e) => warn!("Dropping malformed frame during handshake: {}", e),
                    }
                }
            }
            Err(zmq::Error::EAGAIN) => (),
            Err(e) => return Err(LinkError::ConnectFailed(format!("read failed: {}", e))),
        }

        if Instant::now() > deadline {
            return Err(LinkError::HandshakeTimeout);
        }
    }

    // Build the session: the manager-side state and the consumer handle
    let (out_tx, out_rx) = channel();
    let (notice_tx, notice_rx) = channel();
    let shared = Arc::new(ConnShared::default());

    let handle = Connection {
        cmd_tx: cmd_tx.clone(),
        out_tx,
        notices: Some(notice_rx),
        shared: shared.clone(),
        max_write_len: candidate.max_write_len,
        epoch,
    };

    let act = ActiveConn {
        socket,
        events,
        accum,
        out_rx,
        notice_tx,
        shared,
        epoch,
    };

    Ok((act, handle))
}

/// Service the active session for one loop iteration: flush outbound
/// frames, watch transport events, and forward inbound frames.
fn service_active(act: &mut ActiveConn) -> Service {
    // Outbound frames, chunked by the handle
    while let Ok(out) = act.out_rx.try_recv() {
        let mut result = Ok(());

        for chunk in out.chunks {
            if let Err(e) = act.socket.send(chunk, 0) {
                result = Err(LinkError::SendFailed(e));
                break;
            }
        }

        if let Some(ack) = out.ack {
            ack.try_send(result).ok();
        }
    }

    // Transport events
    let mut lost = false;
    while let Ok(event) = act.events.try_recv() {
        if event == NetEvent::Disconnected {
            lost = true;
        }
    }
    if lost {
        return Service::Lost;
    }

    // Inbound frames; blocks for at most the data poll timeout
    match act.socket.recv_bytes(0) {
        Ok(bytes) => {
            act.accum.extend(&bytes);
            while let Some(result) = act.accum.next_frame() {
                match result {
                    Ok(msg) => {
                        act.notice_tx.send(LinkNotice::Message(msg)).ok();
                    }
                    Err(e) => warn!("Dropping malformed frame: {}", e),
                }
            }
        }
        Err(zmq::Error::EAGAIN) => (),
        Err(e) => warn!("Couldn't read from data socket: {}", e),
    }

    Service::Continue
}

/// Tear down an active session.
///
/// The close notice is delivered into the receive stream before any
/// resources are released, so a consumer iterating the stream observes the
/// close reason before the stream ends.
fn close_active(act: ActiveConn, reason: CloseReason) {
    let final_reason = {
        let mut closed = act.shared.closed.lock().unwrap_or_else(|e| e.into_inner());
        if closed.is_none() {
            *closed = Some(reason);
        }
        closed.unwrap_or(reason)
    };

    act.notice_tx.send(LinkNotice::Closed(final_reason)).ok();

    info!("Connection closed ({})", final_reason);

    // The socket and channels drop here, after the notice is already in
    // the stream
}
