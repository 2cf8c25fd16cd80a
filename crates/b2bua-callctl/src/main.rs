use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use b2bua_callctl::call_map::CallMap;
use b2bua_callctl::{Cli, Config};
use b2bua_reactor::Dispatcher;
use clap::Parser;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,b2bua_callctl=debug".into()),
        )
        .init();

    let cli = Cli::parse();
    let config = match Config::load(&cli) {
        Ok(cfg) => cfg,
        Err(err) => {
            tracing::error!(%err, "failed to load configuration");
            std::process::exit(1);
        }
    };

    tracing::info!(listen = %config.listen, "starting");

    let mut dispatcher = Dispatcher::new(config.default_poll_freq_hz, 256);
    let mut call_map_inner = CallMap::new(config.drain_ticks);
    call_map_inner.configure_request_handling(
        config.accept_ips.clone(),
        config.auth_enable,
        config.digest_auth_enable,
        config.to_controller_options(),
    );
    let call_map = Rc::new(RefCell::new(call_map_inner));

    if let Err(err) = CallMap::install_signal_handlers(call_map.clone(), &dispatcher) {
        tracing::error!(%err, "failed to install signal handlers");
        std::process::exit(1);
    }

    let timers = dispatcher.timer_service();
    let gc_map = call_map.clone();
    let gc_stop = dispatcher.stop_handle();
    timers.schedule_periodic(Duration::from_secs(60), None, move |_| {
        if gc_map.borrow_mut().collect_garbage() == b2bua_callctl::CallMapEvent::ReadyForRestart {
            // All calls drained and a SIGPROF safe-restart was requested:
            // re-exec in place rather than just exiting, per the
            // original's `os.execv` restart path.
            tracing::info!("re-executing for safe restart");
            gc_stop.stop();
            let exe = std::env::current_exe().expect("current_exe");
            let args: Vec<String> = std::env::args().skip(1).collect();
            let err = std::os::unix::process::CommandExt::exec(
                std::process::Command::new(exe).args(args),
            );
            tracing::error!(%err, "exec failed, exiting instead");
            std::process::exit(1);
        }
    });

    let stop = dispatcher.stop_handle();
    let drain_map = call_map.clone();
    timers.schedule_periodic(Duration::from_millis(500), None, move |_| {
        if drain_map.borrow_mut().poll_drain() == b2bua_callctl::CallMapEvent::StopLoop {
            stop.stop();
        }
    });

    dispatcher.run(None, None);
    tracing::info!("shut down cleanly");
}
