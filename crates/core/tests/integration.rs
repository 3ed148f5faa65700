//! Integration tests: RTSP handshake over TCP, RTP delivery over UDP and
//! client-side playback, all on loopback.

use std::io::{BufReader, Write};
use std::net::{SocketAddr, TcpStream, UdpSocket};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::Mutex;
use rtsp_fec::media::rtp::{PayloadType, RtpPacket};
use rtsp_fec::protocol::{RtspHeader, RtspMethod, RtspRequest, RtspResponse, RtspStatus};
use rtsp_fec::{
    Error, Player, ReceiverConfig, RtspClient, SenderConfig, Server, ServerConfig, ServiceState,
};

fn start_server(config: ServerConfig) -> (Server, SocketAddr) {
    let server = Server::new(config).expect("server config");
    let addr = server.start("127.0.0.1:0").expect("server start");
    (server, addr)
}

fn connect(addr: SocketAddr) -> (TcpStream, BufReader<TcpStream>) {
    let stream = TcpStream::connect_timeout(&addr, Duration::from_secs(2)).expect("connect to server");
    stream
        .set_read_timeout(Some(Duration::from_secs(2)))
        .unwrap();
    let reader = BufReader::new(stream.try_clone().unwrap());
    (stream, reader)
}

fn rtsp_request(
    stream: &mut TcpStream,
    reader: &mut BufReader<TcpStream>,
    request: &str,
) -> RtspResponse {
    stream.write_all(request.as_bytes()).unwrap();
    stream.flush().unwrap();
    RtspResponse::read_from(reader)
        .expect("readable response")
        .expect("response before EOF")
}

fn fast_receiver() -> ReceiverConfig {
    ReceiverConfig {
        min_fill: 2,
        buffered_fill: 4,
        capacity: 16,
        buffering_timeout: Duration::from_millis(300),
        poll_interval: Duration::from_millis(20),
    }
}

fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    condition()
}

#[test]
fn full_handshake_setup_play_teardown() {
    let (server, addr) = start_server(ServerConfig::default());
    let (mut stream, mut reader) = connect(addr);

    let rtp = UdpSocket::bind("127.0.0.1:0").unwrap();
    rtp.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
    let rtp_port = rtp.local_addr().unwrap().port();
    let base_uri = format!("rtsp://{}/sample.mjpeg", addr);

    // OPTIONS
    let response = rtsp_request(
        &mut stream,
        &mut reader,
        "OPTIONS * RTSP/1.0\r\nCSeq: 1\r\n\r\n",
    );
    assert_eq!(response.status, RtspStatus::Ok);
    assert_eq!(response.cseq(), Some("1"));
    assert!(response.header(RtspHeader::Public).unwrap().contains("SETUP"));

    // DESCRIBE
    let response = rtsp_request(
        &mut stream,
        &mut reader,
        &format!("DESCRIBE {} RTSP/1.0\r\nCSeq: 2\r\nAccept: application/sdp\r\n\r\n", base_uri),
    );
    assert_eq!(response.status, RtspStatus::Ok);
    assert_eq!(response.header(RtspHeader::ContentType), Some("application/sdp"));
    let sdp = response.body_text().unwrap();
    assert!(sdp.starts_with("v=0\r\n"), "{}", sdp);
    assert!(sdp.contains("m=video 1024/2 RTP/AVP 26"), "{}", sdp);

    // SETUP
    let transport = format!("RTP/AVP/UDP;client_port={}", rtp_port);
    let response = rtsp_request(
        &mut stream,
        &mut reader,
        &format!("SETUP {} RTSP/1.0\r\nCSeq: 3\r\nTransport: {}\r\n\r\n", base_uri, transport),
    );
    assert_eq!(response.status, RtspStatus::Ok);
    assert_eq!(response.header(RtspHeader::Transport), Some(transport.as_str()));
    let session = response.session().expect("Session header").to_string();
    assert!(session.bytes().all(|b| b.is_ascii_digit()), "{}", session);
    assert_eq!(server.sessions().len(), 1);

    // PLAY
    let response = rtsp_request(
        &mut stream,
        &mut reader,
        &format!("PLAY {} RTSP/1.0\r\nCSeq: 4\r\nSession: {}\r\n\r\n", base_uri, session),
    );
    assert_eq!(response.status, RtspStatus::Ok);

    let mut buf = [0u8; 2048];
    let mut last_seq = None;
    for _ in 0..3 {
        let (len, _) = rtp.recv_from(&mut buf).expect("RTP packet after PLAY");
        let RtpPacket::Regular(packet) = RtpPacket::parse(Bytes::copy_from_slice(&buf[..len])).unwrap()
        else {
            panic!("FEC is disabled by default");
        };
        assert_eq!(packet.payload_type(), PayloadType::Jpeg);
        assert!(packet.payload.starts_with(&[0xFF, 0xD8]));
        if let Some(last) = last_seq {
            assert_eq!(packet.sequence_number(), u16::wrapping_add(last, 1));
        }
        last_seq = Some(packet.sequence_number());
    }

    // TEARDOWN, twice
    let teardown = format!("TEARDOWN {} RTSP/1.0\r\nCSeq: 5\r\nSession: {}\r\n\r\n", base_uri, session);
    let response = rtsp_request(&mut stream, &mut reader, &teardown);
    assert_eq!(response.status, RtspStatus::Ok);
    assert!(server.sessions().is_empty());

    let teardown = teardown.replace("CSeq: 5", "CSeq: 6");
    let response = rtsp_request(&mut stream, &mut reader, &teardown);
    assert_eq!(response.status, RtspStatus::SessionNotFound);
    assert_eq!(response.cseq(), Some("6"));

    server.stop();
}

#[test]
fn malformed_request_gets_response_then_close() {
    let (server, addr) = start_server(ServerConfig::default());
    let (mut stream, mut reader) = connect(addr);

    let response = rtsp_request(&mut stream, &mut reader, "FETCH /x RTSP/1.0\r\nCSeq: 1\r\n\r\n");
    assert_eq!(response.status, RtspStatus::BadRequest);
    assert!(RtspResponse::read_from(&mut reader).unwrap().is_none());

    server.stop();
}

#[test]
fn client_reports_protocol_errors() {
    let (server, addr) = start_server(ServerConfig::default());
    let client = RtspClient::connect(addr).unwrap();

    let response = client.request(RtspMethod::Options, "*").unwrap();
    assert!(response.header(RtspHeader::Public).is_some());

    let mut play = RtspRequest::new(RtspMethod::Play, "/sample.mjpeg");
    play.headers.set(RtspHeader::Session, "12345");
    match client.fetch(play) {
        Err(Error::Protocol(e)) => {
            assert_eq!(e.status(), RtspStatus::SessionNotFound);
            assert_eq!(e.response().body_text(), Some("session not found"));
        }
        other => panic!("expected 454, got {:?}", other),
    }

    let mut setup = RtspRequest::new(RtspMethod::Setup, "/sample.mjpeg");
    setup
        .headers
        .set(RtspHeader::Transport, "RTP/AVP/TCP;interleaved=0-1");
    match client.fetch(setup) {
        Err(Error::Protocol(e)) => assert_eq!(e.status(), RtspStatus::UnsupportedTransport),
        other => panic!("expected 461, got {:?}", other),
    }

    // The connection survives rejected requests.
    client.request(RtspMethod::GetParameter, "/sample.mjpeg").unwrap();
    server.stop();
}

#[test]
fn player_receives_jpeg_frames() {
    let (server, addr) = start_server(ServerConfig::default());

    let frames = Arc::new(Mutex::new(Vec::<Bytes>::new()));
    let sink_frames = frames.clone();
    let player = Player::open_with_config(addr, "/sample.mjpeg", fast_receiver(), move |frame| {
        sink_frames.lock().push(frame);
    })
    .unwrap();
    assert_eq!(server.sessions().len(), 1);

    player.play().unwrap();
    assert!(
        wait_until(Duration::from_secs(5), || frames.lock().len() >= 5),
        "received {} frames",
        frames.lock().len()
    );
    for frame in frames.lock().iter() {
        assert!(frame.starts_with(&[0xFF, 0xD8]));
        assert!(frame.ends_with(&[0xFF, 0xD9]));
    }

    player.pause().unwrap();
    player.stop().unwrap();
    assert_eq!(player.service().state(), ServiceState::Terminated);
    assert!(wait_until(Duration::from_secs(2), || server.sessions().is_empty()));

    let stats = player.stats();
    assert!(stats.expected >= 5);
    assert_eq!(stats.recovered, 0);

    server.stop();
}

#[test]
fn simulated_loss_is_partly_recovered() {
    let config = ServerConfig {
        sender: SenderConfig {
            loss_rate: 0.15,
            fec_group_size: 4,
        },
        ..ServerConfig::default()
    };
    let (server, addr) = start_server(config);

    // Deep enough that a whole FEC group is still queued when its parity
    // packet arrives.
    let receiver = ReceiverConfig {
        min_fill: 8,
        buffered_fill: 12,
        capacity: 24,
        ..fast_receiver()
    };

    let delivered = Arc::new(AtomicUsize::new(0));
    let counter = delivered.clone();
    let player = Player::open_with_config(addr, "/sample.mjpeg", receiver, move |_| {
        counter.fetch_add(1, Ordering::Relaxed);
    })
    .unwrap();
    player.play().unwrap();

    assert!(wait_until(Duration::from_secs(10), || player.stats().recovered > 0
        && delivered.load(Ordering::Relaxed) >= 40));
    player.stop().unwrap();

    let stats = player.stats();
    assert!(stats.expected > 40, "{:?}", stats);
    assert!(stats.recovered > 0, "{:?}", stats);
    assert!(stats.recovered <= stats.lost, "{:?}", stats);
    assert_eq!(stats.skipped(), stats.lost - stats.recovered);

    server.stop();
}

#[test]
fn server_stop_ends_sessions_and_connections() {
    let (server, addr) = start_server(ServerConfig::default());
    let rtp = UdpSocket::bind("127.0.0.1:0").unwrap();

    let client = RtspClient::connect(addr).unwrap();
    let mut setup = RtspRequest::new(RtspMethod::Setup, "/sample.mjpeg");
    setup.headers.set(
        RtspHeader::Transport,
        format!("RTP/AVP;unicast;client_port={}-{}", rtp.local_addr().unwrap().port(), 0),
    );
    let response = client.fetch(setup).unwrap();
    let id: u64 = response.session().unwrap().parse().unwrap();
    let sender = server.sessions().get(id).unwrap();

    server.stop();
    assert!(server.sessions().is_empty());
    assert!(wait_until(Duration::from_secs(2), || sender
        .service()
        .state()
        .is_terminal()));
    assert!(client.request(RtspMethod::Options, "*").is_err());
}
