use std::{
    fmt,
    future::poll_fn,
    io::Write,
    task::{Context, Poll},
    time::Duration,
};

use bytes::Bytes;
use futures::{stream::FuturesUnordered, StreamExt};
use rand::RngCore;
use tokio::time::{interval_at, sleep_until, Instant, MissedTickBehavior};

use crate::{
    error::{ConnectionError, NetError},
    logging::NetLogger,
    order::{arrange_items, OrderStrategy},
    port::PortScheme,
    rendezvous::PeerEntry,
    sock::{Activity, Dial, Fault, PeerConnection, Role, Transfer},
    topology::TopologyMask,
};

pub const DEFAULT_PAYLOAD_BYTES: usize = 128 * 1024;
pub const DEFAULT_SCRATCH_BYTES: usize = 1024 * 1024;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub own_id: u32,
    pub duration: Duration,
    pub log_interval: Duration,
    pub payload_bytes: usize,
    pub scratch_bytes: usize,
    pub ports: PortScheme,
}

impl EngineConfig {
    pub fn new(own_id: u32, duration: Duration) -> Self {
        Self {
            own_id,
            duration,
            log_interval: Duration::from_secs(1),
            payload_bytes: DEFAULT_PAYLOAD_BYTES,
            scratch_bytes: DEFAULT_SCRATCH_BYTES,
            ports: PortScheme::default(),
        }
    }
}

/// One progress line: `own_id,elapsed_seconds,bytes_sent,bytes_received`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressRecord {
    pub own_id: u32,
    pub elapsed_secs: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
}

impl fmt::Display for ProgressRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{},{},{},{}",
            self.own_id, self.elapsed_secs, self.bytes_sent, self.bytes_received
        )
    }
}

impl ProgressRecord {
    pub fn parse(line: &str) -> Option<Self> {
        let mut fields = line.trim().split(',');
        let record = Self {
            own_id: fields.next()?.parse().ok()?,
            elapsed_secs: fields.next()?.parse().ok()?,
            bytes_sent: fields.next()?.parse().ok()?,
            bytes_received: fields.next()?.parse().ok()?,
        };
        fields.next().is_none().then_some(record)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub elapsed: Duration,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    /// Connections that completed their active open.
    pub established: usize,
    /// Connections lost at bind, connect or during transfer.
    pub failed: usize,
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "time={} total_bytes_sent={} total_bytes_recv={}",
            self.elapsed.as_millis(),
            self.bytes_sent,
            self.bytes_received
        )
    }
}

impl RunSummary {
    pub fn parse(line: &str) -> Option<Self> {
        let mut elapsed = None;
        let mut sent = None;
        let mut received = None;
        for field in line.split_whitespace() {
            let (key, value) = field.split_once('=')?;
            match key {
                "time" => elapsed = Some(Duration::from_millis(value.parse().ok()?)),
                "total_bytes_sent" => sent = Some(value.parse().ok()?),
                "total_bytes_recv" => received = Some(value.parse().ok()?),
                _ => {}
            }
        }
        Some(Self {
            elapsed: elapsed?,
            bytes_sent: sent?,
            bytes_received: received?,
            established: 0,
            failed: 0,
        })
    }
}

/// Drives every connection of one worker until the run duration elapses.
///
/// Owns the connection table and both counters; everything runs on the task
/// that awaits [`DataPlaneEngine::run`], so nothing is shared.
pub struct DataPlaneEngine<W: Write> {
    config: EngineConfig,
    peers: Vec<PeerEntry>,
    mask: TopologyMask,
    sink: W,
    connections: Vec<PeerConnection>,
    /// Where the next I/O scan starts. Advanced past the last connection
    /// that moved bytes, so a scan cut short by the task's cooperative
    /// budget resumes with the connections it never reached.
    cursor: usize,
    payload: Bytes,
    scratch: Vec<u8>,
    bytes_sent: u64,
    bytes_received: u64,
    established: usize,
    failed: usize,
}

impl<W: Write> DataPlaneEngine<W> {
    pub fn new(config: EngineConfig, peers: Vec<PeerEntry>, mask: TopologyMask, sink: W) -> Self {
        let mut payload = vec![0u8; config.payload_bytes.max(1)];
        rand::thread_rng().fill_bytes(&mut payload);
        let scratch = vec![0u8; config.scratch_bytes.max(1)];
        Self {
            connections: Vec::with_capacity(peers.len() * Role::ALL.len()),
            cursor: 0,
            config,
            peers,
            mask,
            sink,
            payload: Bytes::from(payload),
            scratch,
            bytes_sent: 0,
            bytes_received: 0,
            established: 0,
            failed: 0,
        }
    }

    /// Opens both directions to every peer in the order given by `order`,
    /// then moves bytes until the duration timer fires.
    ///
    /// Returns an error only for reactor-wide or sink failures. A lost peer
    /// connection is logged and dropped.
    pub async fn run(mut self, order: &dyn OrderStrategy) -> Result<RunSummary, NetError> {
        let start = Instant::now();
        let deadline = sleep_until(start + self.config.duration);
        tokio::pin!(deadline);
        let mut ticker = interval_at(start + self.config.log_interval, self.config.log_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut pending: FuturesUnordered<_> = self
            .bind_all(order)
            .into_iter()
            .map(Dial::connect)
            .collect();

        loop {
            tokio::select! {
                biased;
                _ = &mut deadline => break,
                _ = ticker.tick() => self.report(start)?,
                Some(opened) = pending.next(), if !pending.is_empty() => self.admit(opened),
                fault = poll_fn(|cx| self.poll_io(cx)) => return Err(fault),
            }
        }

        // Outstanding opens and the connection table close here.
        drop(pending);
        self.connections.clear();

        let summary = RunSummary {
            elapsed: start.elapsed(),
            bytes_sent: self.bytes_sent,
            bytes_received: self.bytes_received,
            established: self.established,
            failed: self.failed,
        };
        NetLogger::run_finished(
            self.config.own_id,
            summary.elapsed,
            summary.established,
            summary.failed,
        );
        Ok(summary)
    }

    fn bind_all(&mut self, order: &dyn OrderStrategy) -> Vec<Dial> {
        let own_id = self.config.own_id;
        let peers = arrange_items(order, self.peers.clone());
        let mut dials = Vec::with_capacity(peers.len() * Role::ALL.len());
        for peer in &peers {
            for role in Role::ALL {
                match Dial::bind(peer, role, own_id, &self.config.ports, &self.mask) {
                    Ok(dial) => dials.push(dial),
                    Err(err) => self.lose(err),
                }
            }
        }
        NetLogger::opens_issued(own_id, dials.len());
        dials
    }

    fn admit(&mut self, opened: Result<PeerConnection, ConnectionError>) {
        match opened {
            Ok(connection) => {
                NetLogger::established(
                    self.config.own_id,
                    connection.peer(),
                    connection.role(),
                    connection.activity(),
                );
                self.established += 1;
                self.connections.push(connection);
            }
            Err(err) => self.lose(err),
        }
    }

    fn lose(&mut self, err: ConnectionError) {
        NetLogger::connection_lost(self.config.own_id, &err);
        self.failed += 1;
    }

    fn report(&mut self, start: Instant) -> Result<(), NetError> {
        let record = ProgressRecord {
            own_id: self.config.own_id,
            elapsed_secs: start.elapsed().as_secs(),
            bytes_sent: self.bytes_sent,
            bytes_received: self.bytes_received,
        };
        writeln!(self.sink, "{record}")
            .and_then(|()| self.sink.flush())
            .map_err(NetError::Sink)
    }

    /// Gives every armed connection one I/O action, starting at the cursor
    /// and wrapping around. Only resolves on a reactor fault; progress
    /// reschedules the task so the timers stay responsive.
    fn poll_io(&mut self, cx: &mut Context<'_>) -> Poll<NetError> {
        let len = self.connections.len();
        if len == 0 {
            return Poll::Pending;
        }
        let start = self.cursor % len;
        let mut resume = None;
        let mut dead = Vec::new();
        for offset in 0..len {
            let index = (start + offset) % len;
            let connection = &mut self.connections[index];
            if connection.activity() == Activity::Idle {
                continue;
            }
            match connection.poll_transfer(cx, &mut self.scratch, &self.payload) {
                Poll::Ready(Ok(Transfer::Sent(n))) => {
                    self.bytes_sent += n as u64;
                    resume = Some(index + 1);
                }
                Poll::Ready(Ok(Transfer::Received(n))) => {
                    self.bytes_received += n as u64;
                    resume = Some(index + 1);
                }
                Poll::Ready(Err(Fault::Peer(err))) => {
                    dead.push(index);
                    self.lose(err);
                }
                Poll::Ready(Err(Fault::Reactor(err))) => {
                    return Poll::Ready(NetError::Multiplexer(err));
                }
                Poll::Pending => {}
            }
        }

        if let Some(next) = resume {
            self.cursor = next;
        }
        if !dead.is_empty() {
            dead.sort_unstable_by(|a, b| b.cmp(a));
            for index in dead {
                self.connections.remove(index);
                if index < self.cursor {
                    self.cursor -= 1;
                }
            }
        }
        if resume.is_some() {
            cx.waker().wake_by_ref();
        }
        Poll::Pending
    }
}
