//! RTP send service.
//!
//! Pulls frames from a [`FrameSource`], paces them by timestamp, wraps each
//! in one RTP packet and sends it over UDP. With FEC enabled, every `g`
//! transmitted media packets are followed by one parity packet covering
//! them. Both kinds of packet can be dropped at random to simulate a lossy
//! network.
//!
//! Transmission only advances while the sender is playing; it starts
//! paused, as after an RTSP SETUP.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use super::udp::UdpTransport;
use crate::error::{Error, Result};
use crate::media::fec::{FEC_MAX_GROUP, FEC_MIN_GROUP, FecPacket};
use crate::media::pacing::RateLimiter;
use crate::media::rtp::{RegularPacket, RtpHeader};
use crate::media::{FrameSource, VideoFrame};
use crate::service::ServiceHandle;

/// Loss simulation and FEC settings for one sender.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SenderConfig {
    /// Probability in `[0, 1]` that any single packet is silently dropped.
    pub loss_rate: f64,
    /// Media packets per FEC packet: 0 disables FEC, otherwise 2–16.
    pub fec_group_size: usize,
}

impl SenderConfig {
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.loss_rate) {
            return Err(Error::InvalidConfig(format!(
                "loss rate {} outside [0, 1]",
                self.loss_rate
            )));
        }
        if self.fec_group_size != 0
            && !(FEC_MIN_GROUP..=FEC_MAX_GROUP).contains(&self.fec_group_size)
        {
            return Err(Error::InvalidConfig(format!(
                "FEC group size {} is neither 0 nor in [{}, {}]",
                self.fec_group_size, FEC_MIN_GROUP, FEC_MAX_GROUP
            )));
        }
        Ok(())
    }
}

/// Play/pause gate, also used to interrupt pacing sleeps on shutdown.
struct Gate {
    playing: Mutex<bool>,
    changed: Condvar,
}

impl Gate {
    /// Block until playing. Returns `false` if the service stopped first.
    fn await_playing(&self, service: &ServiceHandle) -> bool {
        let mut playing = self.playing.lock();
        while !*playing && service.is_running() {
            self.changed.wait(&mut playing);
        }
        service.is_running()
    }

    /// Sleep for `duration` unless the service stops. Returns `false` if
    /// interrupted.
    fn sleep(&self, service: &ServiceHandle, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        let mut playing = self.playing.lock();
        while service.is_running() {
            if self.changed.wait_until(&mut playing, deadline).timed_out() {
                break;
            }
        }
        service.is_running()
    }

    fn wake(&self) {
        let _playing = self.playing.lock();
        self.changed.notify_all();
    }
}

/// State owned by the sending thread.
struct Stream {
    transport: UdpTransport,
    source: Box<dyn FrameSource>,
    config: SenderConfig,
    limiter: RateLimiter,
    ssrc: u32,
    sequence_number: u16,
    group: Vec<RegularPacket>,
}

impl Stream {
    fn run(&mut self, service: &ServiceHandle, gate: &Gate) -> Result<()> {
        loop {
            if !gate.await_playing(service) {
                return Ok(());
            }

            let Some(frame) = self.source.next_frame()? else {
                tracing::info!(dest = %self.transport.target(), "stream exhausted");
                return Ok(());
            };

            let sleep = self.limiter.sleep_time(frame.timestamp);
            if !sleep.is_zero() && !gate.sleep(service, sleep) {
                return Ok(());
            }
            self.limiter.present(frame.timestamp);

            self.send_frame(frame)?;
        }
    }

    fn send_frame(&mut self, frame: VideoFrame) -> Result<()> {
        let header = RtpHeader::new(
            frame.payload_type,
            self.next_sequence_number(),
            frame.timestamp,
            self.ssrc,
        );
        let packet = RegularPacket::new(header, frame.payload);
        self.transmit(&packet.serialize(), packet.sequence_number())?;

        if self.config.fec_group_size == 0 {
            return Ok(());
        }

        self.group.push(packet);
        if self.group.len() < self.config.fec_group_size {
            return Ok(());
        }

        let seq = self.next_sequence_number();
        let fec = FecPacket::build(&self.group, seq, self.ssrc)?;
        self.group.clear();

        tracing::trace!(
            seq = fec.sequence_number(),
            base = fec.sequence_number_base,
            "built FEC packet"
        );
        self.transmit(&fec.serialize(), fec.sequence_number())
    }

    fn next_sequence_number(&mut self) -> u16 {
        self.sequence_number = self.sequence_number.wrapping_add(1);
        self.sequence_number
    }

    fn transmit(&self, data: &[u8], seq: u16) -> Result<()> {
        if self.config.loss_rate > 0.0 && rand::random::<f64>() < self.config.loss_rate {
            tracing::trace!(seq, "simulating packet loss");
            return Ok(());
        }

        tracing::trace!(seq, len = data.len(), "sending packet");
        match self.transport.send(data) {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::ConnectionRefused => {
                tracing::debug!(seq, error = %e, "receiver unreachable");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Sending end of one RTP stream.
pub struct RtpSender {
    service: ServiceHandle,
    gate: Arc<Gate>,
    target: SocketAddr,
    ssrc: u32,
    pending: Mutex<Option<Stream>>,
}

impl RtpSender {
    /// Prepare a sender streaming `source` to `target`. Nothing is sent
    /// until [`start`](Self::start) and [`set_playing`](Self::set_playing).
    pub fn new(
        target: SocketAddr,
        source: Box<dyn FrameSource>,
        config: SenderConfig,
    ) -> Result<Self> {
        config.validate()?;

        let transport = UdpTransport::bind(target)?;
        let ssrc = rand::random::<u32>();

        Ok(Self {
            service: ServiceHandle::new(format!("rtp-sender-{}", target)),
            gate: Arc::new(Gate {
                playing: Mutex::new(false),
                changed: Condvar::new(),
            }),
            target,
            ssrc,
            pending: Mutex::new(Some(Stream {
                transport,
                source,
                config,
                limiter: RateLimiter::new(),
                ssrc,
                sequence_number: rand::random::<u16>(),
                group: Vec::with_capacity(config.fec_group_size),
            })),
        })
    }

    pub fn target(&self) -> SocketAddr {
        self.target
    }

    pub fn ssrc(&self) -> u32 {
        self.ssrc
    }

    pub fn service(&self) -> &ServiceHandle {
        &self.service
    }

    /// Start the sending thread. The frame source is closed when it exits.
    pub fn start(&self) -> Result<()> {
        let mut stream = self.pending.lock().take().ok_or(Error::AlreadyRunning)?;
        let service = self.service.clone();
        let gate = self.gate.clone();

        tracing::debug!(dest = %self.target, ssrc = self.ssrc, "starting RTP sender");

        self.service.spawn(move || {
            let result = stream.run(&service, &gate);
            stream.source.close();
            result
        })?;
        Ok(())
    }

    /// Open or close the play gate.
    pub fn set_playing(&self, playing: bool) {
        *self.gate.playing.lock() = playing;
        self.gate.changed.notify_all();
        tracing::debug!(dest = %self.target, playing, "sender gate changed");
    }

    pub fn is_playing(&self) -> bool {
        *self.gate.playing.lock()
    }

    /// Stop sending. Safe to call from any thread, any number of times.
    pub fn stop(&self) {
        if self.service.request_stop() {
            tracing::debug!(dest = %self.target, "stopping RTP sender");
        }
        self.gate.wake();
        if let Some(mut stream) = self.pending.lock().take() {
            stream.source.close();
        }
    }
}

impl std::fmt::Debug for RtpSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RtpSender")
            .field("target", &self.target)
            .field("ssrc", &self.ssrc)
            .field("state", &self.service.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::rtp::{PayloadType, RtpPacket};
    use crate::service::ServiceState;
    use bytes::Bytes;
    use std::net::UdpSocket;

    struct Frames {
        remaining: u32,
        next: u32,
    }

    impl FrameSource for Frames {
        fn next_frame(&mut self) -> Result<Option<VideoFrame>> {
            if self.next == self.remaining {
                return Ok(None);
            }
            let timestamp = self.next;
            self.next += 1;
            Ok(Some(VideoFrame {
                payload_type: PayloadType::Jpeg,
                payload: Bytes::from(vec![timestamp as u8; 10 + timestamp as usize]),
                timestamp,
            }))
        }

        fn close(&mut self) {}
    }

    fn listener() -> UdpSocket {
        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        socket
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        socket
    }

    fn receive(socket: &UdpSocket) -> RtpPacket {
        let mut buf = [0u8; 2048];
        let (len, _) = socket.recv_from(&mut buf).unwrap();
        RtpPacket::parse(Bytes::copy_from_slice(&buf[..len])).unwrap()
    }

    #[test]
    fn config_validation() {
        assert!(SenderConfig::default().validate().is_ok());
        assert!(
            SenderConfig {
                loss_rate: 1.5,
                fec_group_size: 0
            }
            .validate()
            .is_err()
        );
        assert!(
            SenderConfig {
                loss_rate: 0.1,
                fec_group_size: 1
            }
            .validate()
            .is_err()
        );
        assert!(
            SenderConfig {
                loss_rate: 0.1,
                fec_group_size: 16
            }
            .validate()
            .is_ok()
        );
    }

    #[test]
    fn sends_frames_with_consecutive_sequence_numbers() {
        let socket = listener();
        let source = Frames {
            remaining: 3,
            next: 0,
        };
        let sender = RtpSender::new(
            socket.local_addr().unwrap(),
            Box::new(source),
            SenderConfig::default(),
        )
        .unwrap();
        sender.start().unwrap();
        sender.set_playing(true);

        let packets: Vec<RtpPacket> = (0..3).map(|_| receive(&socket)).collect();
        let first = packets[0].sequence_number();
        for (i, packet) in packets.iter().enumerate() {
            let RtpPacket::Regular(packet) = packet else {
                panic!("expected media packet");
            };
            assert_eq!(packet.sequence_number(), first.wrapping_add(i as u16));
            assert_eq!(packet.timestamp(), i as u32);
            assert_eq!(packet.header.ssrc, sender.ssrc());
        }

        let state = sender.service().await_terminated(Some(Duration::from_secs(2)));
        assert_eq!(state, ServiceState::Terminated);
    }

    #[test]
    fn emits_fec_after_each_group() {
        let socket = listener();
        let source = Frames {
            remaining: 4,
            next: 0,
        };
        let config = SenderConfig {
            loss_rate: 0.0,
            fec_group_size: 2,
        };
        let sender = RtpSender::new(socket.local_addr().unwrap(), Box::new(source), config).unwrap();
        sender.start().unwrap();
        sender.set_playing(true);

        let kinds: Vec<bool> = (0..6)
            .map(|_| matches!(receive(&socket), RtpPacket::Fec(_)))
            .collect();
        assert_eq!(kinds, vec![false, false, true, false, false, true]);
    }

    #[test]
    fn fec_follows_its_group_and_rebuilds_a_member() {
        let socket = listener();
        let source = Frames {
            remaining: 3,
            next: 0,
        };
        let config = SenderConfig {
            loss_rate: 0.0,
            fec_group_size: 3,
        };
        let sender = RtpSender::new(socket.local_addr().unwrap(), Box::new(source), config).unwrap();
        sender.start().unwrap();
        sender.set_playing(true);

        let group: Vec<RegularPacket> = (0..3)
            .map(|_| match receive(&socket) {
                RtpPacket::Regular(packet) => packet,
                RtpPacket::Fec(_) => panic!("FEC before end of group"),
            })
            .collect();
        let RtpPacket::Fec(fec) = receive(&socket) else {
            panic!("expected FEC packet");
        };

        assert_eq!(
            fec.sequence_number(),
            group[2].sequence_number().wrapping_add(1)
        );
        assert!(group.iter().all(|p| fec.protects(p.sequence_number())));

        let rebuilt = fec.recover([&group[0], &group[2]]).expect("one missing");
        assert_eq!(rebuilt.sequence_number(), group[1].sequence_number());
        assert_eq!(rebuilt.timestamp(), group[1].timestamp());
        assert_eq!(rebuilt.payload, group[1].payload);
    }

    #[test]
    fn total_loss_sends_nothing() {
        let socket = listener();
        socket
            .set_read_timeout(Some(Duration::from_millis(200)))
            .unwrap();
        let config = SenderConfig {
            loss_rate: 1.0,
            fec_group_size: 2,
        };
        let source = Frames {
            remaining: 4,
            next: 0,
        };
        let sender = RtpSender::new(socket.local_addr().unwrap(), Box::new(source), config).unwrap();
        sender.start().unwrap();
        sender.set_playing(true);

        let mut buf = [0u8; 64];
        assert!(socket.recv_from(&mut buf).is_err());
    }

    #[test]
    fn paused_sender_stops_promptly() {
        let socket = listener();
        let source = Frames {
            remaining: u32::MAX,
            next: 0,
        };
        let sender = RtpSender::new(
            socket.local_addr().unwrap(),
            Box::new(source),
            SenderConfig::default(),
        )
        .unwrap();
        sender.start().unwrap();
        assert!(!sender.is_playing());

        sender.stop();
        let state = sender.service().await_terminated(Some(Duration::from_secs(2)));
        assert_eq!(state, ServiceState::Terminated);
    }

    #[test]
    fn start_twice_fails() {
        let socket = listener();
        let source = Frames {
            remaining: 0,
            next: 0,
        };
        let sender = RtpSender::new(
            socket.local_addr().unwrap(),
            Box::new(source),
            SenderConfig::default(),
        )
        .unwrap();
        sender.start().unwrap();
        assert!(matches!(sender.start(), Err(Error::AlreadyRunning)));
    }
}
