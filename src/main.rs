//! Emotion Sensor Agent CLI
//!
//! Real-time facial expression sensing with a rolling emotion distribution.

use clap::{Parser, Subcommand};
use crossbeam_channel::RecvTimeoutError;
use emotion_sensor_agent::{
    capture::{probe_camera, FrameSource, SyntheticCamera},
    config::{Config, DetectionMode},
    core::DistributionSnapshot,
    detection::RemoteClient,
    session::{Session, SessionState},
    text::{LexiconTextAnalyzer, RemoteTextAnalyzer, TextAnalyzer, TextChannel},
    PRIVACY_DECLARATION, VERSION,
};
use std::time::{Duration, Instant};
use tokio::runtime::Runtime;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "emotion-sensor")]
#[command(version = VERSION)]
#[command(about = "Real-time facial expression sensor with a rolling emotion distribution", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a detection session and stream observations
    Start {
        /// Detection topology (local or remote)
        #[arg(long)]
        mode: Option<DetectionMode>,

        /// Base URL of the remote detection service
        #[arg(long)]
        remote_url: Option<String>,

        /// Sampling period in milliseconds
        #[arg(long)]
        period_ms: Option<u64>,

        /// Minimum interval between observations in milliseconds
        #[arg(long)]
        throttle_ms: Option<u64>,

        /// Stop after this many seconds (runs until Ctrl+C otherwise)
        #[arg(long)]
        duration: Option<u64>,

        /// Seconds between distribution summaries
        #[arg(long, default_value = "5")]
        summary_interval: u64,
    },

    /// Check that the video source can be opened and delivers a frame
    Probe {
        /// Probe the remote detection service instead of the local camera
        #[arg(long)]
        remote: bool,

        /// Seconds to wait for the first frame
        #[arg(long, default_value = "3")]
        timeout: u64,
    },

    /// Analyse the emotion of a piece of text
    AnalyzeText {
        /// Text to analyse
        text: String,

        /// Use the remote detection service's text analysis
        #[arg(long)]
        remote: bool,
    },

    /// Run the HTTP detection service (requires server feature)
    Serve {
        /// Port to bind to
        #[arg(long, default_value = "8000")]
        port: u16,
    },

    /// Display privacy declaration
    Privacy,

    /// Show configuration
    Config,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Start {
            mode,
            remote_url,
            period_ms,
            throttle_ms,
            duration,
            summary_interval,
        } => cmd_start(
            mode,
            remote_url,
            period_ms,
            throttle_ms,
            duration,
            summary_interval,
        ),
        Commands::Probe { remote, timeout } => cmd_probe(remote, timeout),
        Commands::AnalyzeText { text, remote } => cmd_analyze_text(&text, remote),
        Commands::Serve { port } => cmd_serve(port),
        Commands::Privacy => {
            cmd_privacy();
            Ok(())
        }
        Commands::Config => {
            cmd_config();
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

fn load_config() -> Config {
    match Config::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Warning: {e}. Using defaults.");
            Config::default()
        }
    }
}

fn cmd_start(
    mode: Option<DetectionMode>,
    remote_url: Option<String>,
    period_ms: Option<u64>,
    throttle_ms: Option<u64>,
    duration: Option<u64>,
    summary_interval: u64,
) -> anyhow::Result<()> {
    println!("Emotion Sensor Agent v{VERSION}");
    println!();

    let mut config = load_config();
    if let Some(mode) = mode {
        config.detection.mode = mode;
    }
    if let Some(url) = remote_url {
        config.detection.remote_url = url;
    }
    if let Some(ms) = period_ms {
        config.sampling_period = Duration::from_millis(ms);
    }
    if let Some(ms) = throttle_ms {
        config.throttle_interval = Duration::from_millis(ms);
    }
    config.validate()?;

    println!("Starting detection...");
    println!("  Mode: {:?}", config.detection.mode);
    match config.detection.mode {
        DetectionMode::Remote => println!("  Service: {}", config.detection.remote_url),
        DetectionMode::Local => {
            println!("  Labels: simulated (synthetic camera, stand-in expression model)")
        }
    }
    println!("  Sampling period: {}ms", config.sampling_period.as_millis());
    println!("  Throttle: {}ms", config.throttle_interval.as_millis());
    println!("  History capacity: {}", config.history_capacity);

    let runtime = Runtime::new()?;
    let session = Session::from_config(config)?;

    let session_id = match runtime.block_on(session.start()) {
        Ok(id) => id,
        Err(e) => {
            match session.state() {
                SessionState::PermissionDenied(_) => {
                    eprintln!("Camera permission was refused.");
                    eprintln!("Grant camera access to this application and try again.");
                }
                SessionState::CannotStart(_) => {
                    eprintln!("Detection could not be started.");
                    eprintln!("Check that the camera is connected or the service is running.");
                }
                _ => {}
            }
            return Err(e.into());
        }
    };
    println!("  Session ID: {session_id}");
    println!();
    println!("Press Ctrl+C to stop");
    println!();

    let cancel = CancellationToken::new();
    ctrlc_handler(cancel.clone())?;

    let receiver = session.observations();
    let state = session.subscribe_state();
    let started = Instant::now();
    let mut last_summary = Instant::now();

    while !cancel.is_cancelled() {
        if duration.is_some_and(|secs| started.elapsed() >= Duration::from_secs(secs)) {
            break;
        }

        if let SessionState::Disconnected(reason) = &*state.borrow() {
            eprintln!("Detection service lost: {reason}");
            break;
        }

        match receiver.recv_timeout(Duration::from_millis(100)) {
            Ok(observation) => {
                println!(
                    "[{}] {} ({:.2})",
                    observation.timestamp.format("%H:%M:%S%.3f"),
                    observation.emotion,
                    observation.score
                );
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                eprintln!("Observation channel closed unexpectedly");
                break;
            }
        }

        if last_summary.elapsed() >= Duration::from_secs(summary_interval.max(1)) {
            print_snapshot(&runtime.block_on(session.get_snapshot()));
            last_summary = Instant::now();
        }
    }

    println!();
    println!("Stopping detection...");
    let snapshot = runtime.block_on(session.get_snapshot());
    runtime.block_on(session.stop())?;

    print_snapshot(&snapshot);
    println!();
    println!("{}", session.transparency_log().summary());
    Ok(())
}

fn print_snapshot(snapshot: &DistributionSnapshot) {
    if snapshot.is_empty() {
        println!("-- no observations yet --");
        return;
    }

    println!("-- distribution over last {} observations --", snapshot.total_frames);
    for (label, fraction) in &snapshot.distribution {
        let bar = "#".repeat((fraction * 40.0).round() as usize);
        println!("  {:<9} {:>5.1}% {bar}", label.as_str(), fraction * 100.0);
    }
    let recent: Vec<&str> = snapshot.recent.iter().map(|l| l.as_str()).collect();
    println!("  recent: {}", recent.join(" "));
}

fn cmd_probe(remote: bool, timeout: u64) -> anyhow::Result<()> {
    let config = load_config();

    if remote {
        let client = RemoteClient::new(
            &config.detection.remote_url,
            config.detection.request_timeout,
        )?;
        let runtime = Runtime::new()?;
        let healthy = runtime.block_on(client.test_connection())?;
        println!(
            "Detection service at {}: {}",
            client.base_url(),
            if healthy { "OK ✓" } else { "unhealthy ✗" }
        );
        if !healthy {
            anyhow::bail!("health check failed");
        }
        return Ok(());
    }

    let camera = SyntheticCamera::new(config.camera.clone());
    let frame = probe_camera(&camera, Duration::from_secs(timeout))?;
    println!(
        "Camera {}: OK ✓ ({}x{}, frame #{}, mean luma {:.0})",
        config.camera.device_index,
        frame.width,
        frame.height,
        frame.sequence,
        frame.mean_luma()
    );
    println!("Camera state after probe: {:?}", camera.state());
    Ok(())
}

fn cmd_analyze_text(text: &str, remote: bool) -> anyhow::Result<()> {
    let config = load_config();

    let analyzer: Box<dyn TextAnalyzer> = if remote {
        let client = RemoteClient::new(
            &config.detection.remote_url,
            config.detection.request_timeout,
        )?;
        Box::new(RemoteTextAnalyzer::new(client))
    } else {
        Box::new(LexiconTextAnalyzer::new())
    };
    let channel = TextChannel::new(analyzer);

    let runtime = Runtime::new()?;
    let analysis = runtime.block_on(channel.analyze(text))?;

    println!("Emotion: {} ({:.2})", analysis.emotion, analysis.score);
    if !analysis.breakdown.is_empty() {
        println!("Breakdown:");
        for (label, score) in &analysis.breakdown {
            println!("  {:<9} {:.2}", label.as_str(), score);
        }
    }
    if let Some(note) = &analysis.note {
        println!("Note: {note}");
    }
    Ok(())
}

#[cfg(feature = "server")]
fn cmd_serve(port: u16) -> anyhow::Result<()> {
    use emotion_sensor_agent::server::{run, ServerConfig};

    let config = ServerConfig::new(port, load_config());
    let runtime = Runtime::new()?;
    let (addr, shutdown_tx) = runtime.block_on(run(config))?;

    println!("Emotion Sensor Agent v{VERSION}");
    println!("Detection service listening on http://{addr}");
    println!("Press Ctrl+C to stop");

    let cancel = CancellationToken::new();
    ctrlc_handler(cancel.clone())?;
    runtime.block_on(cancel.cancelled());

    println!("Shutting down...");
    let _ = shutdown_tx.send(());
    // Let the server stop its session and release the camera.
    std::thread::sleep(Duration::from_millis(300));
    Ok(())
}

#[cfg(not(feature = "server"))]
fn cmd_serve(_port: u16) -> anyhow::Result<()> {
    anyhow::bail!("the serve command requires the server feature (cargo build --features server)")
}

fn cmd_privacy() {
    println!("{PRIVACY_DECLARATION}");
}

fn cmd_config() {
    let config = load_config();

    println!("Configuration");
    println!("=============");
    println!();
    println!("Config file: {:?}", Config::config_path());
    println!();
    println!(
        "{}",
        serde_json::to_string_pretty(&config).unwrap_or_else(|_| "Error".to_string())
    );
}

/// Set up Ctrl+C handler.
fn ctrlc_handler(cancel: CancellationToken) -> anyhow::Result<()> {
    ctrlc::set_handler(move || cancel.cancel())?;
    Ok(())
}
