use beatline::{EngineCommand, EngineUpdate, LogTarget, Project, TargetRegistry, spawn_engine};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn main() -> beatline::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let path = PathBuf::from(args.next().unwrap_or_else(|| "demos/basic.ron".to_string()));
    let seconds: f64 = args
        .next()
        .and_then(|arg| arg.parse().ok())
        .unwrap_or(8.0);

    let project = Project::load(&path)?;
    let mut targets = TargetRegistry::new();
    for id in project.target_ids() {
        targets.insert(id.clone(), LogTarget::new(id));
    }

    let engine = spawn_engine(targets);
    engine.send(EngineCommand::LoadProject(path));
    engine.send(EngineCommand::Play { at: None });

    let deadline = Instant::now() + Duration::from_secs_f64(seconds.max(0.0));
    let mut started = false;
    let mut finished = false;
    while !finished {
        let timeout = deadline.saturating_duration_since(Instant::now());
        match engine.update_rx.recv_timeout(timeout) {
            Ok(EngineUpdate::ProjectLoaded { project }) => info!(name = %project.name, "loaded"),
            Ok(EngineUpdate::PlaybackState { playing }) => {
                info!(playing, "playback");
                finished = started && !playing;
                started |= playing;
            }
            Ok(EngineUpdate::Frame { .. }) => {}
            Ok(EngineUpdate::Error { message }) => error!("{message}"),
            Err(_) => finished = true,
        }
    }

    engine.send(EngineCommand::Stop { at: None });
    engine.shutdown();
    Ok(())
}
