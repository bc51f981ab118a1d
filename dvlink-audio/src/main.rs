//! dvlink Audio Manager

mod args;

use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use clap::Parser;
use dvlink_audio::channel::{bind_inbound, spawn_reader};
use dvlink_audio::{
    AudioBackend, AudioConfig, AudioManager, Destination, LoopbackVocoder, Signal,
    SyntheticBackend, UnixSink,
};
use tokio::runtime::Runtime;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use args::{Args, BackendKind, Command};

fn main() {
    let args = Args::parse();

    // RUST_LOG wins over --debug
    let default_level = if args.debug { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("dvaudio {}", env!("CARGO_PKG_VERSION"));

    if let Err(e) = run(args) {
        error!("{}", e);
        process::exit(1);
    }
}

fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    if matches!(args.command, Command::Devices) {
        return list_devices();
    }

    // Signals only; every pipeline stage runs on its own thread
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    let config = args.to_config();
    let backend = open_backend(&args)?;
    let vocoder = Arc::new(LoopbackVocoder::new(args.vocoder_timeout()));
    let mut manager = AudioManager::new(config.clone(), backend, vocoder);
    attach_sinks(&mut manager, &config)?;

    match args.command {
        Command::Echo { seconds } => {
            manager.start_transmit(Destination::Loopback, "")?;
            info!(seconds, "recording");
            wait_or_signal(&runtime, Duration::from_secs(seconds));
            manager.start_playback()?;
            manager.wait_playback();
        }
        Command::Transmit {
            destination,
            seconds,
            target,
        } => {
            manager.start_transmit(destination, &target)?;
            wait_or_signal(&runtime, Duration::from_secs(seconds));
            if !manager.stop_transmit() {
                warn!("transmission ended early");
            }
        }
        Command::QuickKey {
            destination,
            target,
        } => manager.quick_key(destination, &target)?,
        Command::Play { path } => {
            manager.play_file(&path)?;
            manager.wait_playback();
        }
        Command::Listen => listen(&runtime, manager, &config)?,
        Command::Devices => {}
    }

    Ok(())
}

fn open_backend(args: &Args) -> Result<Arc<dyn AudioBackend>, Box<dyn std::error::Error>> {
    match args.backend {
        BackendKind::Synthetic => Ok(Arc::new(
            SyntheticBackend::new(Signal::Silence).paced().discarding(),
        )),
        #[cfg(feature = "cpal")]
        BackendKind::Cpal => Ok(Arc::new(dvlink_audio::cpal_backend::CpalBackend::new(
            &args.input_device,
            &args.output_device,
        ))),
        #[cfg(not(feature = "cpal"))]
        BackendKind::Cpal => Err("built without the cpal feature".into()),
    }
}

fn list_devices() -> Result<(), Box<dyn std::error::Error>> {
    #[cfg(feature = "cpal")]
    {
        let (inputs, outputs) = dvlink_audio::cpal_backend::list_devices();
        println!("Input devices:");
        for name in inputs {
            println!("  {}", name);
        }
        println!("Output devices:");
        for name in outputs {
            println!("  {}", name);
        }
        Ok(())
    }

    #[cfg(not(feature = "cpal"))]
    {
        Err("built without the cpal feature".into())
    }
}

/// Point gateway and link transmissions at their services' channels
fn attach_sinks(manager: &mut AudioManager, config: &AudioConfig) -> dvlink_audio::Result<()> {
    for destination in [Destination::Gateway, Destination::Link] {
        if let Some(path) = config.outbound_channel(destination) {
            manager.set_sink(destination, Arc::new(UnixSink::new(path)?))?;
        }
    }
    Ok(())
}

/// Serve both inbound channels until a shutdown signal arrives
fn listen(
    runtime: &Runtime,
    manager: AudioManager,
    config: &AudioConfig,
) -> Result<(), Box<dyn std::error::Error>> {
    let manager = Arc::new(Mutex::new(manager));
    let running = Arc::new(AtomicBool::new(true));
    let mut readers = Vec::new();

    for source in [Destination::Gateway, Destination::Link] {
        let Some(path) = config.inbound_channel(source) else {
            continue;
        };
        let socket = bind_inbound(&path)?;
        info!(?source, path = %path.display(), "channel bound");
        readers.push(spawn_reader(
            source,
            socket,
            manager.clone(),
            running.clone(),
        )?);
    }

    runtime.block_on(setup_shutdown_signal());
    info!("shutting down");

    running.store(false, Ordering::SeqCst);
    for reader in readers {
        if reader.join().is_err() {
            error!("channel reader panicked");
        }
    }
    manager
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .wait_playback();
    Ok(())
}

/// Sleep for `duration`, returning early on a shutdown signal
fn wait_or_signal(runtime: &Runtime, duration: Duration) {
    runtime.block_on(async {
        tokio::select! {
            _ = tokio::time::sleep(duration) => {},
            _ = setup_shutdown_signal() => info!("interrupted"),
        }
    });
}

/// Wait for SIGTERM or SIGINT (Ctrl-C elsewhere)
async fn setup_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match (
            signal(SignalKind::terminate()),
            signal(SignalKind::interrupt()),
        ) {
            (Ok(mut sigterm), Ok(mut sigint)) => {
                tokio::select! {
                    _ = sigterm.recv() => {},
                    _ = sigint.recv() => {},
                }
            }
            _ => {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    error!("failed to listen for shutdown signal: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("failed to listen for shutdown signal: {}", e);
            std::future::pending::<()>().await;
        }
    }
}
