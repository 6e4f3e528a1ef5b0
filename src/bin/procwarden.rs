use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use crossbeam::channel::{bounded, Sender};
use procwarden::cli::Cli;
use procwarden::config::loader::YamlConfigLoader;
use procwarden::config::ConfigLoader;
use procwarden::logging::Logging;
use procwarden::probe::factory::DefaultProberFactory;
use procwarden::process::spawn::StdSpawnAdapter;
use procwarden::reaper::{is_pid1, Reaper};
use procwarden::supervisor::Supervisor;
use tracing::{error, info, Level};

fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse_args();

    let default_level = if cli.verbose() { Level::DEBUG } else { Level::INFO };
    Logging::try_init_at(default_level)?;

    if cli.print_debug_info() {
        println!("Printing debug info");
        println!("CLI: {:#?}", cli);
        return Ok(());
    }

    let loader = YamlConfigLoader::new();
    let config = loader.load(&cli.config_path())?;

    let reaper = if is_pid1() {
        info!("running as pid 1, enabling the zombie reaper");
        Some(Reaper::new(Duration::from_secs(1)))
    } else {
        None
    };

    let supervisor = Supervisor::new(
        config,
        cli.config_path(),
        Arc::new(loader),
        Arc::new(StdSpawnAdapter::new()),
        reaper,
    );
    supervisor.set_prober_factory(Arc::new(DefaultProberFactory));
    supervisor.set_event_handler(|name, event, stats| {
        info!(service = name, kind = ?event.kind, stats = ?stats, "service event");
    });
    supervisor.set_error_handler(|operation, service, error| {
        error!(operation, service, error, "recoverable supervisor error");
    });

    info!("creating the shutdown signal handler");
    let (shutdown_sender, shutdown_receiver) = bounded::<()>(1);
    create_shutdown_signal_handler(shutdown_sender)?;

    info!("starting the supervisor");
    supervisor.start()?;

    let _ = shutdown_receiver.recv();

    info!("shutdown requested, stopping the supervisor");
    supervisor.stop()?;

    Ok(())
}

fn create_shutdown_signal_handler(sender: Sender<()>) -> Result<(), ctrlc::Error> {
    ctrlc::set_handler(move || {
        let _ = sender.send(());
    })
    .map_err(|e| {
        error!("could not set signal handler: {}", e);
        e
    })
}
