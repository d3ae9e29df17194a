//! `koruza` – KORUZA link terminal daemon
//!
//! Startup order:
//!
//! 1. Tracing, then `/etc/koruza/daemon.toml` (see [`settings`]).
//! 2. The message bus and an IO runtime serving the two publish sockets and
//!    the command socket.
//! 3. The persisted node configuration, the I2C bus registry and the
//!    controller; the configured host name is applied.
//! 4. The slow loop on its own thread.
//! 5. The fast loop on this thread until SIGINT/SIGTERM.

mod settings;

use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::time::Duration;

use koruza_hal::BusRegistry;
use koruza_middleware::{CommandSocket, Lane, MessageBus, PubSocket, command_channel};
use koruza_runtime::{
    BusFaultReporter, ConfigStore, Controller, FastLoop, NetmeasureClient, SlowLoop, init_tracing,
};
use tracing::{error, info, warn};

fn main() -> ExitCode {
    let _tracing = init_tracing("koruza");

    let settings = match settings::load() {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "cannot load daemon settings");
            return ExitCode::FAILURE;
        }
    };
    info!(?settings, "koruza daemon starting");

    let bus = MessageBus::default();
    let (commands, command_rx) = command_channel();

    // ── IO runtime ───────────────────────────────────────────────────────
    // Sockets only; the loops below never run inside it.
    let io = match tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .thread_name("koruza-io")
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            error!(error = %e, "cannot start IO runtime");
            return ExitCode::FAILURE;
        }
    };
    for (lane, addr) in [
        (Lane::Local, settings.local_publish_addr),
        (Lane::Remote, settings.remote_publish_addr),
    ] {
        let socket = PubSocket::new(bus.clone(), lane);
        io.spawn(async move {
            if let Err(e) = socket.run(addr).await {
                error!(?lane, error = %e, "publish socket stopped");
            }
        });
    }
    let command_addr = settings.command_addr;
    io.spawn(async move {
        if let Err(e) = CommandSocket::new(commands).run(command_addr).await {
            error!(error = %e, "command socket stopped");
        }
    });

    // ── Controller ───────────────────────────────────────────────────────
    let config = match ConfigStore::open(&settings.config_path) {
        Ok(c) => c,
        Err(e) => {
            error!(path = %settings.config_path.display(), error = %e, "cannot load node configuration");
            return ExitCode::FAILURE;
        }
    };
    let registry = BusRegistry::linux(Arc::new(BusFaultReporter::new(bus.clone())));
    let controller = Controller::new(
        settings.layout(),
        config,
        registry,
        bus.clone(),
        Box::new(settings.system()),
    );
    controller.publish_started();
    controller.apply_hostname();

    // ── Shutdown ─────────────────────────────────────────────────────────
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_flag = Arc::clone(&shutdown);
    if let Err(e) = ctrlc::set_handler(move || {
        info!("termination signal received, stopping");
        shutdown_flag.store(true, Ordering::Relaxed);
    }) {
        warn!(error = %e, "could not install termination handler");
    }

    // ── Slow loop ────────────────────────────────────────────────────────
    let netmeasure =
        match NetmeasureClient::new(Duration::from_secs(settings.netmeasure_timeout_secs)) {
            Ok(client) => client,
            Err(e) => {
                error!(error = %e, "cannot build link-measurement client");
                return ExitCode::FAILURE;
            }
        };
    let (probe_tx, probe_rx) = mpsc::channel();
    let slow = SlowLoop::new(
        settings.onewire_dir.clone(),
        Box::new(netmeasure),
        bus,
        controller.measurement_host(),
        probe_tx,
        Arc::clone(&shutdown),
    );
    let slow_handle = match slow.spawn() {
        Ok(handle) => Some(handle),
        Err(e) => {
            error!(error = %e, "cannot start slow loop, running without it");
            None
        }
    };

    // ── Fast loop ────────────────────────────────────────────────────────
    FastLoop::new(controller, command_rx, probe_rx, Arc::clone(&shutdown)).run();

    if let Some(Err(_)) = slow_handle.map(|h| h.join()) {
        warn!("slow loop thread panicked");
    }
    io.shutdown_timeout(Duration::from_secs(1));
    info!("koruza daemon stopped");
    ExitCode::SUCCESS
}
