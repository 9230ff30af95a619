// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! A single bounded resolve attempt.
//!
//! One attempt is bound to one protocol stack and one endpoint list. It
//! opens a UDP socket on an ephemeral port, sends one probe to every
//! endpoint, then collects replies until its RTT budget elapses or a stop
//! is requested. Decoded descriptors go straight into the shared
//! [`ResultStore`]; the attempt never holds a handle to the resolver
//! itself.

use crate::clock::local_clock;
use crate::config::{CANCEL_POLL_INTERVAL, MAX_MESSAGE_SIZE};
use crate::discovery::endpoints::ProtocolStack;
use crate::discovery::protocol::{self, encode_probe};
use crate::discovery::resolver::ResolveSignals;
use crate::discovery::results::ResultStore;
use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, UdpSocket};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Handle to a running resolve attempt.
///
/// The scheduler keeps these in its attempt registry, reaps finished ones
/// between waves, and joins the remainder on teardown. Dropping the handle
/// without joining leaves the worker to finish on its own RTT budget; the
/// socket is closed when the worker returns, on every exit path.
pub struct ResolveAttempt {
    handle: JoinHandle<()>,
}

impl ResolveAttempt {
    /// Open the attempt socket and start the probe/receive worker.
    ///
    /// Socket setup happens on the caller's thread, so a stack that cannot
    /// be opened reports synchronously (the scheduler counts such failures
    /// per burst). The worker thread owns the socket from then on.
    pub fn spawn(
        stack: ProtocolStack,
        endpoints: Vec<SocketAddr>,
        query: &str,
        store: Arc<ResultStore>,
        signals: Arc<ResolveSignals>,
        max_rtt: f64,
        multicast_ttl: u32,
    ) -> io::Result<Self> {
        let socket = open_probe_socket(stack, multicast_ttl)?;
        let reply_port = socket.local_addr()?.port();
        let query_id = make_query_id(reply_port);
        let probe = encode_probe(query, reply_port, query_id);
        let deadline = Instant::now() + Duration::from_secs_f64(max_rtt.max(0.0));

        let handle = thread::Builder::new()
            .name("labstream-probe".into())
            .spawn(move || {
                run_attempt(&socket, &endpoints, &probe, query_id, &store, &signals, deadline);
            })?;
        Ok(Self { handle })
    }

    /// Whether the worker has run to completion.
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the worker to finish. Panics in the worker are logged and
    /// suppressed.
    pub fn join(self) {
        if self.handle.join().is_err() {
            log::warn!("[resolve-attempt] worker terminated abnormally");
        }
    }
}

fn open_probe_socket(stack: ProtocolStack, multicast_ttl: u32) -> io::Result<UdpSocket> {
    let (domain, bind_addr) = match stack {
        ProtocolStack::V4 => (
            Domain::IPV4,
            SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0),
        ),
        ProtocolStack::V6 => (
            Domain::IPV6,
            SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), 0),
        ),
    };
    let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;
    match stack {
        ProtocolStack::V4 => {
            socket.set_broadcast(true)?;
            socket.set_multicast_ttl_v4(multicast_ttl)?;
        }
        ProtocolStack::V6 => {
            socket.set_only_v6(true)?;
            socket.set_multicast_hops_v6(multicast_ttl)?;
        }
    }
    socket.bind(&bind_addr.into())?;
    let socket: UdpSocket = socket.into();
    // Short receive timeout so stop requests are observed between datagrams.
    socket.set_read_timeout(Some(CANCEL_POLL_INTERVAL))?;
    Ok(socket)
}

/// Derive a query id from the bound port and the current time (FNV-1a).
/// Distinguishes replies meant for this attempt from late replies to
/// earlier waves and from other resolvers on the same host.
fn make_query_id(reply_port: u16) -> u32 {
    let mut hash: u32 = 0x811c_9dc5;
    let time_bits = local_clock().to_bits().to_le_bytes();
    for byte in time_bits.iter().chain(reply_port.to_le_bytes().iter()) {
        hash ^= u32::from(*byte);
        hash = hash.wrapping_mul(0x0100_0193);
    }
    hash
}

fn run_attempt(
    socket: &UdpSocket,
    endpoints: &[SocketAddr],
    probe: &[u8],
    query_id: u32,
    store: &ResultStore,
    signals: &ResolveSignals,
    deadline: Instant,
) {
    let mut send_failures = 0usize;
    for endpoint in endpoints {
        if let Err(e) = socket.send_to(probe, endpoint) {
            send_failures += 1;
            log::debug!("[resolve-attempt] probe to {} failed: {}", endpoint, e);
        }
    }
    if !endpoints.is_empty() && send_failures == endpoints.len() {
        log::debug!(
            "[resolve-attempt] all {} probe sends failed on this stack",
            endpoints.len()
        );
    }

    let mut buf = vec![0u8; MAX_MESSAGE_SIZE];
    while Instant::now() < deadline && !signals.stop_requested() {
        match socket.recv_from(&mut buf) {
            Ok((len, src)) => match protocol::decode_reply(&buf[..len]) {
                Ok(reply) if reply.query_id == query_id => {
                    log::debug!("[resolve-attempt] reply from {}: uid={}", src, reply.info.uid);
                    let key = reply.info.uid.clone();
                    store.upsert(key, reply.info, local_clock());
                }
                Ok(_) => {} // answers a different probe
                Err(_) => {} // undecodable datagram, dropped
            },
            Err(e)
                if e.kind() == io::ErrorKind::WouldBlock
                    || e.kind() == io::ErrorKind::TimedOut => {}
            Err(e) => {
                log::debug!("[resolve-attempt] recv error: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::protocol::{decode_probe, encode_reply};
    use crate::discovery::stream_info::test_stream;

    fn loopback_responder(uid: &'static str, answer: bool) -> (SocketAddr, JoinHandle<()>) {
        let socket = UdpSocket::bind("127.0.0.1:0").expect("bind responder");
        let addr = socket.local_addr().unwrap();
        socket
            .set_read_timeout(Some(Duration::from_millis(500)))
            .unwrap();
        let handle = thread::spawn(move || {
            let mut buf = [0u8; MAX_MESSAGE_SIZE];
            if let Ok((len, src)) = socket.recv_from(&mut buf) {
                let probe = decode_probe(&buf[..len]).expect("well-formed probe");
                if answer {
                    let reply = encode_reply(probe.query_id, &test_stream(uid)).unwrap();
                    let target = SocketAddr::new(src.ip(), probe.reply_port);
                    socket.send_to(&reply, target).unwrap();
                }
            }
        });
        (addr, handle)
    }

    #[test]
    fn test_attempt_deposits_reply_into_store() {
        let (addr, responder) = loopback_responder("uid-attempt-1", true);
        let store = Arc::new(ResultStore::new());
        let signals = Arc::new(ResolveSignals::new());
        let attempt = ResolveAttempt::spawn(
            ProtocolStack::V4,
            vec![addr],
            "type='EEG'",
            Arc::clone(&store),
            signals,
            0.5,
            0,
        )
        .expect("spawn attempt");
        attempt.join();
        responder.join().unwrap();
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_attempt_times_out_without_responder() {
        let store = Arc::new(ResultStore::new());
        let signals = Arc::new(ResolveSignals::new());
        let start = Instant::now();
        let attempt = ResolveAttempt::spawn(
            ProtocolStack::V4,
            vec!["127.0.0.1:9".parse().unwrap()],
            "type='EEG'",
            Arc::clone(&store),
            signals,
            0.2,
            0,
        )
        .expect("spawn attempt");
        attempt.join();
        let elapsed = start.elapsed();
        assert!(store.is_empty());
        assert!(elapsed >= Duration::from_millis(150), "ran {:?}", elapsed);
        assert!(elapsed < Duration::from_secs(1), "ran {:?}", elapsed);
    }

    #[test]
    fn test_attempt_unwinds_on_stop_request() {
        let store = Arc::new(ResultStore::new());
        let signals = Arc::new(ResolveSignals::new());
        let attempt = ResolveAttempt::spawn(
            ProtocolStack::V4,
            vec![],
            "type='EEG'",
            Arc::clone(&store),
            Arc::clone(&signals),
            10.0,
            0,
        )
        .expect("spawn attempt");
        let start = Instant::now();
        signals.request_stop();
        attempt.join();
        assert!(start.elapsed() < Duration::from_millis(500));
    }

    #[test]
    fn test_probe_not_answered_when_query_unmatched() {
        // Responder that never answers: the store stays empty.
        let (addr, responder) = loopback_responder("uid-unused", false);
        let store = Arc::new(ResultStore::new());
        let signals = Arc::new(ResolveSignals::new());
        let attempt = ResolveAttempt::spawn(
            ProtocolStack::V4,
            vec![addr],
            "type='Markers'",
            Arc::clone(&store),
            signals,
            0.2,
            0,
        )
        .expect("spawn attempt");
        attempt.join();
        responder.join().unwrap();
        assert!(store.is_empty());
    }
}
