use anyhow::Result;
use clap::Parser;
use std::net::IpAddr;
use std::time::Instant;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio::time::{interval, Duration};

use rotation_server_rs::{
    DeviceKind, LiveStatus, LoggingDirector, PosePipeline, PoseStore, SensorLink, SessionEngine,
    SharedPipeline, Trigger,
};

#[derive(Parser, Debug)]
#[command(name = "rotation_server")]
#[command(about = "TCP rotation server - streams handset pose into a timed duel session", long_about = None)]
struct Args {
    /// TCP port the handset connects to
    #[arg(long, default_value_t = 25005)]
    port: u16,

    /// Address to bind the listener to
    #[arg(long, default_value = "0.0.0.0")]
    bind: IpAddr,

    /// Handset kind, selects the heading-correction preset
    #[arg(long, value_enum, default_value = "android")]
    device: DeviceKind,

    /// Where the periodic status snapshot is written
    #[arg(long, default_value = "live_status.json")]
    status_path: String,

    /// Session tick rate in Hz
    #[arg(long, default_value_t = 50)]
    tick_hz: u32,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    log::info!(
        "rotation server starting on {}:{} ({} preset, {} Hz tick)",
        args.bind,
        args.port,
        args.device.name(),
        args.tick_hz
    );

    let pipeline = PosePipeline::shared(args.device);
    let pose = PoseStore::new();
    let link = SensorLink::new(args.bind, args.port, pose.clone(), pipeline.clone());
    let mut engine = SessionEngine::new(
        LoggingDirector,
        pose,
        link.commands(),
        pipeline.clone(),
    );

    let (trigger_tx, mut trigger_rx) = mpsc::unbounded_channel();
    tokio::spawn(read_operator_input(trigger_tx));

    let tick = Duration::from_micros(1_000_000 / u64::from(args.tick_hz.max(1)));
    let mut ticker = interval(tick);
    let started = Instant::now();
    let mut last_tick = Instant::now();
    let mut last_status = Instant::now();

    loop {
        ticker.tick().await;
        let now = Instant::now();
        let dt = now.duration_since(last_tick).as_secs_f64();
        last_tick = now;

        while let Ok(trigger) = trigger_rx.try_recv() {
            engine.handle(trigger);
        }

        // Reconnect is polled, not event-driven: a dropped or failed
        // connection is picked up here on the next tick.
        link.start_listening();

        engine.tick(dt);

        if now.duration_since(last_status) >= Duration::from_secs(2) {
            let status = snapshot(&engine, &link, &pipeline, started);
            if let Err(err) = status.save(&args.status_path) {
                log::warn!("failed to write status snapshot: {}", err);
            }
            last_status = now;
        }
    }
}

fn snapshot(
    engine: &SessionEngine<LoggingDirector>,
    link: &SensorLink,
    pipeline: &SharedPipeline,
    started: Instant,
) -> LiveStatus {
    let stats = link.stats();
    let device = pipeline
        .lock()
        .map(|p| p.device())
        .unwrap_or(DeviceKind::Android);

    LiveStatus {
        timestamp: chrono::Utc::now().to_rfc3339(),
        uptime_seconds: started.elapsed().as_secs(),
        phase: engine.phase().name().to_string(),
        score: engine.score(),
        high_score: engine.high_score(),
        time_remaining: engine.time_remaining(),
        device: device.name().to_string(),
        connected: link.commands().is_connected(),
        samples_decoded: stats.samples_decoded,
        records_dropped: stats.records_dropped,
        connections_accepted: stats.connections_accepted,
    }
}

/// Translate operator input lines on stdin into trigger events.
async fn read_operator_input(tx: mpsc::UnboundedSender<Trigger>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let line = line.trim();
                if let Some(trigger) = parse_operator_line(line) {
                    if tx.send(trigger).is_err() {
                        break;
                    }
                } else if !line.is_empty() {
                    log::info!(
                        "unknown input {:?} (h/c/r/i/a/k/s/v, t <deg>, android, iphone)",
                        line
                    );
                }
            }
            Ok(None) => break,
            Err(err) => {
                log::warn!("stdin error: {}", err);
                break;
            }
        }
    }
}

fn parse_operator_line(line: &str) -> Option<Trigger> {
    // "t <degrees>" nudges the heading trim, everything else is a bare word.
    if let Some(value) = line.strip_prefix("t ") {
        return value.trim().parse().ok().map(Trigger::AdjustTrim);
    }
    match line {
        "h" => Some(Trigger::HostStart),
        "c" => Some(Trigger::ClientStart),
        "r" => Some(Trigger::ForceRestart),
        "i" => Some(Trigger::ForceIntro),
        "a" => Some(Trigger::SpawnRequest),
        "k" => Some(Trigger::KillAll),
        "s" => Some(Trigger::ScoreHit),
        "v" => Some(Trigger::Calibrate),
        "android" => Some(Trigger::SelectDevice(DeviceKind::Android)),
        "iphone" => Some(Trigger::SelectDevice(DeviceKind::Iphone)),
        _ => None,
    }
}
