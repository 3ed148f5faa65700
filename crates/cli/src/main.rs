use std::io;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::Duration;

use clap::Parser;
use rtsp_fec::{Player, SenderConfig, Server, ServerConfig};
use tracing::Level;

#[derive(Parser)]
#[command(
    name = "rtsp-fec",
    about = "RTSP/RTP MJPEG streaming with XOR forward error correction"
)]
struct Args {
    /// Run the server instead of the client
    #[arg(long, short)]
    server: bool,

    /// Server: bind address. Client: server to connect to (host:port)
    #[arg(long, short, default_value = "127.0.0.1:8554")]
    address: String,

    /// Server: probability in [0, 1] of dropping each outgoing packet
    #[arg(long, default_value_t = 0.0)]
    loss: f64,

    /// Server: media packets per FEC packet (0 disables FEC, else 2-16)
    #[arg(long, default_value_t = 0)]
    fec: usize,

    /// Server: directory other .mjpeg paths are served from
    #[arg(long)]
    media_root: Option<PathBuf>,

    /// Client: stream to play
    #[arg(long, short, default_value = "/sample.mjpeg")]
    path: String,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn log_level(verbose: u8) -> Level {
    match verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    }
}

fn main() -> ExitCode {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_max_level(log_level(args.verbose))
        .init();

    let result = if args.server {
        run_server(&args)
    } else {
        run_client(&args)
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run_server(args: &Args) -> rtsp_fec::Result<()> {
    let config = ServerConfig {
        media_root: args.media_root.clone(),
        sender: SenderConfig {
            loss_rate: args.loss,
            fec_group_size: args.fec,
        },
        ..ServerConfig::default()
    };

    let server = Server::new(config)?;
    let addr = server.start(args.address.as_str())?;

    println!("RTSP server on {} (press Enter to stop)", addr);
    let mut input = String::new();
    io::stdin().read_line(&mut input)?;

    server.stop();
    Ok(())
}

fn run_client(args: &Args) -> rtsp_fec::Result<()> {
    let frames = Arc::new(AtomicU64::new(0));
    let counter = frames.clone();
    let player = Player::open(args.address.as_str(), &args.path, move |_| {
        counter.fetch_add(1, Ordering::Relaxed);
    })?;
    player.play()?;

    println!(
        "playing {} from {} as session {} (press Enter to stop)",
        args.path,
        args.address,
        player.session_id()
    );

    let (enter_tx, enter_rx) = mpsc::channel();
    thread::spawn(move || {
        let mut input = String::new();
        let _ = io::stdin().read_line(&mut input);
        let _ = enter_tx.send(());
    });

    loop {
        match enter_rx.recv_timeout(Duration::from_secs(1)) {
            Err(RecvTimeoutError::Timeout) => {}
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
        }
        if player.service().state().is_terminal() {
            println!("stream ended");
            break;
        }

        let stats = player.stats();
        tracing::info!(
            frames = frames.load(Ordering::Relaxed),
            buffering = player.is_buffering(),
            expected = stats.expected,
            lost = stats.lost,
            recovered = stats.recovered,
            skipped = stats.skipped(),
            "playback statistics"
        );
        println!(
            "frames {:>6}  lost {:>5.1}%  recovered {:>5.1}%  skipped {:>5.1}%",
            frames.load(Ordering::Relaxed),
            stats.relative_lost() * 100.0,
            stats.relative_recovered() * 100.0,
            stats.relative_skipped() * 100.0
        );
    }

    player.stop()
}
