//! Demonstration of the Emotion Sensor Agent detection loop.
//!
//! This example shows how to:
//! 1. Probe the camera
//! 2. Build a local-inference session
//! 3. Receive throttled observations
//! 4. Read the rolling distribution
//! 5. Cover the lens and watch detection go quiet
//!
//! Run with: cargo run --example capture_demo

use std::sync::Arc;
use std::time::{Duration, Instant};

use emotion_sensor_agent::{
    capture::{probe_camera, SyntheticCamera},
    config::Config,
    detection::{LocalInference, SimulatedExpressionModel},
    session::Session,
    PRIVACY_DECLARATION,
};
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    println!("Emotion Sensor Agent - Capture Demo");
    println!("===================================");
    println!();

    // Display privacy declaration
    println!("{PRIVACY_DECLARATION}");
    println!();

    let config = Config::default();

    // Check the camera
    print!("Probing camera... ");
    let probe = SyntheticCamera::new(config.camera.clone());
    let frame = tokio::task::spawn_blocking(move || probe_camera(&probe, Duration::from_secs(3)))
        .await?;
    match frame {
        Ok(frame) => println!("OK ✓ ({}x{})", frame.width, frame.height),
        Err(e) => {
            println!("FAILED ✗");
            eprintln!("{e}");
            return Ok(());
        }
    }
    println!();

    // Create components
    let camera = Arc::new(SyntheticCamera::new(config.camera.clone()));
    let model = Arc::new(SimulatedExpressionModel::new());
    let source = Arc::new(LocalInference::new(camera.clone(), model));
    let session = Session::new(config, source);

    println!("Starting detection for 20 seconds...");
    println!("The lens is covered between 8s and 12s.");
    println!();

    let session_id = session.start().await?;
    println!("Session ID: {session_id}");

    // Set up Ctrl+C handler
    let cancel = CancellationToken::new();
    let c = cancel.clone();
    ctrlc::set_handler(move || c.cancel())?;

    let observations = session.observations();
    let start = Instant::now();
    let mut last_summary = Instant::now();

    while !cancel.is_cancelled() && start.elapsed() < Duration::from_secs(20) {
        let elapsed = start.elapsed();
        camera.set_covered(elapsed >= Duration::from_secs(8) && elapsed < Duration::from_secs(12));

        while let Ok(observation) = observations.try_recv() {
            println!(
                "[{:>5.1}s] {:<9} {:.2}",
                elapsed.as_secs_f64(),
                observation.emotion.as_str(),
                observation.score
            );
        }

        if last_summary.elapsed() >= Duration::from_secs(5) {
            let snapshot = session.get_snapshot().await;
            if let Some((label, fraction)) = snapshot.dominant() {
                println!(
                    "--- dominant over {} observations: {} ({:.0}%)",
                    snapshot.total_frames,
                    label,
                    fraction * 100.0
                );
            }
            last_summary = Instant::now();
        }

        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    session.stop().await?;

    // Final distribution
    let snapshot = session.get_snapshot().await;
    println!();
    println!("Final distribution ({} observations):", snapshot.total_frames);
    for (label, fraction) in &snapshot.distribution {
        println!("  {:<9} {:>5.1}%", label.as_str(), fraction * 100.0);
    }

    println!();
    println!("{}", session.transparency_log().summary());

    Ok(())
}
