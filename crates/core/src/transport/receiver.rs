//! RTP receive service with jitter buffering and FEC repair.
//!
//! A background thread reads datagrams, decodes them and feeds a bounded
//! [`JitterQueue`]. The consumer pulls packets in presentation order with
//! [`RtpReceiver::next`], which paces delivery by media timestamp:
//!
//! ```text
//! UDP ─> decode ─> stats ─┬─> regular ──────────────> queue ─> next()
//!                         └─> FEC ─> recover(queue) ─┘
//! ```
//!
//! The queue has three watermarks, all derived from the largest FEC group
//! so that a whole group plus its parity packet can be resident at once:
//!
//! | Watermark | Default | Meaning |
//! |-----------|---------|---------|
//! | minimum fill | 16 | below this, `next()` stops and rebuffers |
//! | buffered | 32 | rebuffering ends once this many are queued |
//! | capacity | 48 | the receive thread blocks while the queue is full |

use std::io;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::{Condvar, Mutex, MutexGuard};

use super::jitter::JitterQueue;
use crate::error::{Error, Result};
use crate::media::fec::{FEC_MAX_GROUP, FecPacket};
use crate::media::pacing::RateLimiter;
use crate::media::rtp::{RegularPacket, RtpPacket};
use crate::service::{ServiceHandle, ServiceState};

const RECEIVE_BUFFER_SIZE: usize = 64 * 1024;

/// Jitter buffer sizing and shutdown polling.
#[derive(Debug, Clone)]
pub struct ReceiverConfig {
    pub min_fill: usize,
    pub buffered_fill: usize,
    pub capacity: usize,
    /// Upper bound of one rebuffering wait before the fill is re-checked.
    pub buffering_timeout: Duration,
    /// Socket read timeout; bounds how long shutdown takes to be noticed.
    pub poll_interval: Duration,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            min_fill: FEC_MAX_GROUP,
            buffered_fill: 2 * FEC_MAX_GROUP,
            capacity: 3 * FEC_MAX_GROUP,
            buffering_timeout: Duration::from_secs(3),
            poll_interval: Duration::from_millis(100),
        }
    }
}

impl ReceiverConfig {
    pub fn validate(&self) -> Result<()> {
        if self.min_fill == 0 {
            return Err(Error::InvalidConfig("min_fill must be at least 1".into()));
        }
        if self.buffered_fill < self.min_fill {
            return Err(Error::InvalidConfig(format!(
                "buffered_fill {} is below min_fill {}",
                self.buffered_fill, self.min_fill
            )));
        }
        if self.capacity <= self.buffered_fill {
            return Err(Error::InvalidConfig(format!(
                "capacity {} must exceed buffered_fill {}",
                self.capacity, self.buffered_fill
            )));
        }
        if self.poll_interval.is_zero() {
            return Err(Error::InvalidConfig("poll_interval must be non-zero".into()));
        }
        Ok(())
    }
}

/// Loss and recovery counters.
///
/// `lost` is derived from sequence-number gaps and can momentarily go
/// negative when duplicates or reordered packets arrive.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReceiverStats {
    pub expected: i64,
    pub lost: i64,
    pub recovered: i64,
}

impl ReceiverStats {
    /// Losses that FEC could not repair.
    pub fn skipped(&self) -> i64 {
        self.lost - self.recovered
    }

    pub fn relative_lost(&self) -> f64 {
        fraction(self.lost, self.expected)
    }

    pub fn relative_recovered(&self) -> f64 {
        fraction(self.recovered, self.expected)
    }

    pub fn relative_skipped(&self) -> f64 {
        fraction(self.skipped(), self.expected)
    }
}

fn fraction(count: i64, expected: i64) -> f64 {
    if expected == 0 {
        0.0
    } else {
        count as f64 / expected as f64
    }
}

/// Gap-based loss accounting over 16-bit sequence numbers.
#[derive(Debug, Default)]
pub(crate) struct SequenceTracker {
    previous: Option<u16>,
}

impl SequenceTracker {
    /// Record an arrival, returning the `(expected, lost)` increments.
    pub(crate) fn record(&mut self, sequence_number: u16) -> (i64, i64) {
        let increments = match self.previous {
            None => (1, 0),
            Some(previous) => {
                let delta = sequence_number.wrapping_sub(previous) as i16 as i64;
                (delta, delta - 1)
            }
        };
        self.previous = Some(sequence_number);
        increments
    }
}

struct Shared {
    config: ReceiverConfig,
    service: ServiceHandle,
    queue: Mutex<JitterQueue>,
    /// Signalled on every insertion, removal and on shutdown.
    changed: Condvar,
    limiter: RateLimiter,
    buffering: AtomicBool,
    /// Insertion count at which an idle stream started draining.
    drain_mark: Mutex<Option<u64>>,
    expected: AtomicI64,
    lost: AtomicI64,
    recovered: AtomicI64,
}

impl Shared {
    fn wake(&self) {
        let _queue = self.queue.lock();
        self.changed.notify_all();
    }
}

/// Receiving end of one RTP stream.
pub struct RtpReceiver {
    socket: UdpSocket,
    local_addr: SocketAddr,
    shared: Arc<Shared>,
}

impl RtpReceiver {
    /// Bind the receive socket. Use port 0 for an ephemeral port.
    pub fn bind(addr: impl ToSocketAddrs, config: ReceiverConfig) -> Result<Self> {
        config.validate()?;

        let socket = UdpSocket::bind(addr)?;
        socket.set_read_timeout(Some(config.poll_interval))?;
        let local_addr = socket.local_addr()?;

        tracing::debug!(%local_addr, "RTP receiver bound");

        Ok(Self {
            socket,
            local_addr,
            shared: Arc::new(Shared {
                config,
                service: ServiceHandle::new(format!("rtp-receiver-{}", local_addr.port())),
                queue: Mutex::new(JitterQueue::new()),
                changed: Condvar::new(),
                limiter: RateLimiter::new(),
                buffering: AtomicBool::new(false),
                drain_mark: Mutex::new(None),
                expected: AtomicI64::new(0),
                lost: AtomicI64::new(0),
                recovered: AtomicI64::new(0),
            }),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn service(&self) -> &ServiceHandle {
        &self.shared.service
    }

    /// Start the receive thread.
    pub fn start(&self) -> Result<()> {
        let socket = self.socket.try_clone()?;
        let shared = self.shared.clone();
        self.shared
            .service
            .spawn(move || receive_loop(&socket, &shared))?;
        Ok(())
    }

    /// Stop the receive thread and wake a blocked consumer.
    pub fn stop(&self) {
        if self.shared.service.request_stop() {
            tracing::debug!(local_addr = %self.local_addr, "stopping RTP receiver");
        }
        self.shared.wake();
    }

    pub fn stats(&self) -> ReceiverStats {
        ReceiverStats {
            expected: self.shared.expected.load(Ordering::Relaxed),
            lost: self.shared.lost.load(Ordering::Relaxed),
            recovered: self.shared.recovered.load(Ordering::Relaxed),
        }
    }

    /// Whether [`next`](Self::next) is currently waiting for the buffer
    /// to refill.
    pub fn is_buffering(&self) -> bool {
        self.shared.buffering.load(Ordering::Relaxed)
    }

    /// Block until the next packet is due and return it.
    ///
    /// Packets come out in presentation order, spaced by their
    /// timestamps. Intended for a single consumer. Fails with
    /// [`Error::ServiceStopped`] once the receiver is shutting down.
    pub fn next(&self) -> Result<RegularPacket> {
        if self.shared.service.state() == ServiceState::Created {
            return Err(Error::NotStarted);
        }

        let shared = &*self.shared;
        let mut queue = shared.queue.lock();

        loop {
            self.await_fill(&mut queue)?;

            let (head_id, timestamp) = match (queue.head_id(), queue.peek()) {
                (Some(id), Some(head)) => (id, head.timestamp()),
                _ => continue,
            };

            let sleep = shared.limiter.sleep_time(timestamp);
            if !sleep.is_zero() {
                tracing::trace!(?sleep, "waiting to present queue head");
                if self.await_head_change(&mut queue, head_id, Instant::now() + sleep)? {
                    tracing::trace!("queue head changed");
                    continue;
                }
            }

            let Some(packet) = queue.pop() else {
                continue;
            };
            shared.limiter.present(packet.timestamp());
            shared.changed.notify_all();

            tracing::trace!(seq = packet.sequence_number(), "delivering packet");
            return Ok(packet);
        }
    }

    /// Rebuffer while the queue is below its minimum fill.
    ///
    /// Each round waits up to the buffering timeout for the buffered
    /// watermark. A round in which nothing arrived at all releases
    /// whatever is left, so the tail of a finished stream is delivered.
    /// The queue keeps draining until a new packet arrives.
    fn await_fill(&self, queue: &mut MutexGuard<'_, JitterQueue>) -> Result<()> {
        let shared = &*self.shared;
        let config = &shared.config;

        {
            let mut drain_mark = shared.drain_mark.lock();
            if queue.len() >= config.min_fill {
                *drain_mark = None;
                return Ok(());
            }
            if !queue.is_empty() && *drain_mark == Some(queue.inserted()) {
                return Ok(());
            }
            *drain_mark = None;
        }

        tracing::info!(queued = queue.len(), "waiting for jitter buffer to fill");
        shared.limiter.reset();
        shared.buffering.store(true, Ordering::Relaxed);

        loop {
            let inserted = queue.inserted();
            let deadline = Instant::now() + config.buffering_timeout;

            while queue.len() < config.buffered_fill && shared.service.is_running() {
                if shared.changed.wait_until(queue, deadline).timed_out() {
                    break;
                }
            }

            if !shared.service.is_running() {
                shared.buffering.store(false, Ordering::Relaxed);
                return Err(Error::ServiceStopped);
            }
            if queue.len() >= config.min_fill {
                break;
            }
            if !queue.is_empty() && queue.inserted() == inserted {
                tracing::debug!(queued = queue.len(), "stream idle, draining jitter buffer");
                *shared.drain_mark.lock() = Some(queue.inserted());
                break;
            }
        }

        shared.buffering.store(false, Ordering::Relaxed);
        tracing::info!(queued = queue.len(), "jitter buffer filled");
        Ok(())
    }

    /// Wait until `deadline` or until a different packet becomes the head.
    /// Returns whether the head changed.
    fn await_head_change(
        &self,
        queue: &mut MutexGuard<'_, JitterQueue>,
        head_id: u64,
        deadline: Instant,
    ) -> Result<bool> {
        let shared = &*self.shared;
        loop {
            if !shared.service.is_running() {
                return Err(Error::ServiceStopped);
            }
            if queue.head_id() != Some(head_id) {
                return Ok(true);
            }
            if shared.changed.wait_until(queue, deadline).timed_out() {
                return Ok(queue.head_id().is_some_and(|id| id != head_id));
            }
        }
    }
}

impl Drop for RtpReceiver {
    fn drop(&mut self) {
        self.stop();
    }
}

fn receive_loop(socket: &UdpSocket, shared: &Shared) -> Result<()> {
    let mut buf = vec![0u8; RECEIVE_BUFFER_SIZE];
    let mut tracker = SequenceTracker::default();

    while shared.service.is_running() {
        let len = match socket.recv_from(&mut buf) {
            Ok((len, _)) => len,
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                continue;
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                if shared.service.is_running() {
                    return Err(e.into());
                }
                break;
            }
        };

        // A datagram that fills the whole buffer may have been truncated.
        if len == buf.len() {
            tracing::debug!(len, "discarding oversized datagram");
            continue;
        }

        let packet = match RtpPacket::parse(Bytes::copy_from_slice(&buf[..len])) {
            Ok(packet) => packet,
            Err(e) => {
                tracing::debug!(error = %e, len, "discarding datagram");
                continue;
            }
        };

        tracing::trace!(seq = packet.sequence_number(), len, "received packet");

        let (expected, lost) = tracker.record(packet.sequence_number());
        shared.expected.fetch_add(expected, Ordering::Relaxed);
        shared.lost.fetch_add(lost, Ordering::Relaxed);

        let mut queue = shared.queue.lock();
        while queue.len() >= shared.config.capacity && shared.service.is_running() {
            shared
                .changed
                .wait_for(&mut queue, shared.config.poll_interval);
        }
        if !shared.service.is_running() {
            break;
        }

        match packet {
            RtpPacket::Regular(packet) => accept(&mut queue, packet),
            RtpPacket::Fec(fec) => recover(shared, &mut queue, &fec),
        }
        shared.changed.notify_all();
    }

    Ok(())
}

fn recover(shared: &Shared, queue: &mut JitterQueue, fec: &FecPacket) {
    let Some(packet) = fec.recover(queue.iter()) else {
        return;
    };

    if queue.is_played_out(packet.sequence_number()) {
        tracing::debug!(seq = packet.sequence_number(), "recovered packet already played out");
        return;
    }

    tracing::info!(seq = packet.sequence_number(), "recovered packet");
    shared.recovered.fetch_add(1, Ordering::Relaxed);
    accept(queue, packet);
}

fn accept(queue: &mut JitterQueue, packet: RegularPacket) {
    let seq = packet.sequence_number();
    if queue.is_played_out(seq) {
        tracing::debug!(seq, "dropping late packet");
        return;
    }
    if queue.push(packet) {
        tracing::trace!(seq, queued = queue.len(), "queued packet");
    } else {
        tracing::debug!(seq, "dropping duplicate packet");
    }
}
