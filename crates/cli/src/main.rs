use std::io::BufRead;
use std::net::Ipv4Addr;
use std::time::Duration;

use clap::Parser;
use streamcore::groupsock::GroupSocket;
use streamcore::rtp::RtpSource;
use streamcore::rtsp::{MediaSubsession, RtspClient, SessionDescription};
use streamcore::{Environment, ShutdownFlag};

#[derive(Parser)]
#[command(name = "rtsp-play", about = "Minimal RTSP/RTP playback client")]
struct Args {
    /// rtsp://host[:port]/path to DESCRIBE and PLAY
    url: String,

    /// Optional Digest auth username
    #[arg(long)]
    username: Option<String>,

    /// Optional Digest auth password
    #[arg(long)]
    password: Option<String>,

    /// How long to run before tearing down, in seconds
    #[arg(long, default_value_t = 5)]
    duration_secs: u64,
}

fn main() {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    if let Err(e) = run(&args) {
        eprintln!("rtsp-play: {e}");
        std::process::exit(1);
    }
}

fn run(args: &Args) -> streamcore::rtsp::RtspResult<()> {
    let mut env = Environment::new().map_err(streamcore::rtsp::RtspError::Io)?;
    let mut client = RtspClient::open_connection(&args.url)?;

    let sdp_body = match client.describe(&args.url) {
        Ok(body) => body,
        Err(streamcore::rtsp::RtspError::AuthChallenge { .. }) => {
            let (username, password) = match (&args.username, &args.password) {
                (Some(u), Some(p)) => (u.as_str(), p.as_str()),
                _ => return Err(streamcore::rtsp::RtspError::AuthFailed),
            };
            client.set_credentials(username, password);
            client.describe(&args.url)?
        }
        Err(e) => return Err(e),
    };

    let description = SessionDescription::parse(&sdp_body);
    tracing::info!(tracks = description.media.len(), "described session");

    let mut subsessions: Vec<MediaSubsession> = description
        .media
        .iter()
        .map(MediaSubsession::from_sdp)
        .collect();

    // Each track's `RtpSource` is registered into the environment's medium
    // registry under a per-track name (§4.2) rather than held directly, so
    // the playback loop below looks sources up by name through the
    // registry instead of keeping its own parallel handle table.
    let mut source_names: Vec<String> = Vec::with_capacity(subsessions.len());

    for (index, subsession) in subsessions.iter_mut().enumerate() {
        let socket = GroupSocket::bind(Ipv4Addr::UNSPECIFIED, 0)
            .map_err(|e| streamcore::rtsp::RtspError::Io(std::io::Error::other(e.to_string())))?;
        let client_port = socket
            .local_port()
            .map_err(|e| streamcore::rtsp::RtspError::Io(std::io::Error::other(e.to_string())))?;

        let track_uri = match &subsession.control {
            Some(control) if control.contains("://") => control.clone(),
            Some(control) => format!("{}/{}", args.url.trim_end_matches('/'), control),
            None => args.url.clone(),
        };

        let transport = client.setup_udp(&track_uri, client_port, client_port + 1)?;
        subsession.apply_transport_response(&transport);
        subsession.initiate(socket);

        let name = format!("{}{index}", subsession.medium);
        let source = subsession.take_source().expect("initiate() just set it");
        env.registry.register("RtpSource", Some(name.clone()), source);
        source_names.push(name);

        tracing::info!(
            medium = %subsession.medium,
            codec = ?subsession.codec_name,
            server_port = ?subsession.server_rtp_port,
            "track set up"
        );
    }

    let play_uri = args.url.clone();
    client.play(&play_uri)?;

    // A dedicated thread watches stdin for an early "q\n" and sets a
    // flag the playback loop below consumes each iteration, the same
    // signal-to-loop handoff §5 requires of a SIGHUP/SIGUSR1 handler —
    // neither this thread nor a real signal handler may touch a medium
    // directly.
    let shutdown = ShutdownFlag::new();
    let stdin_watcher = shutdown.clone();
    std::thread::spawn(move || {
        let mut line = String::new();
        if std::io::stdin().lock().read_line(&mut line).is_ok() && line.trim() == "q" {
            stdin_watcher.request();
        }
    });

    let deadline = std::time::Instant::now() + Duration::from_secs(args.duration_secs);
    while std::time::Instant::now() < deadline && !shutdown.is_requested() {
        env.scheduler.borrow_mut().single_step(Duration::from_millis(200)).ok();
        for name in &source_names {
            match env.registry.lookup_mut::<RtpSource>(name) {
                Ok(source) => source.on_socket_readable(),
                Err(e) => tracing::warn!(%name, error = %e, "registered subsession source missing"),
            }
        }
    }

    for subsession in &subsessions {
        tracing::info!(medium = %subsession.medium, "playback stopped");
    }
    client.teardown(&play_uri);
    Ok(())
}
