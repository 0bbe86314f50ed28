use std::fs;
use std::net::TcpListener;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::sleep;
use std::time::Duration;

use clap::Parser;
use log::{error, info, warn};

use xtensa_rsp_stub::libs::dispatcher::{CommandDispatcher, SessionEnd};
use xtensa_rsp_stub::libs::ingest;

/// GDB's documented example stub port; used here as the default rather
/// than hardcoded, since nothing in the protocol ties the stub to it.
const DEFAULT_PORT: u16 = 1234;

fn existing_file(s: &str) -> Result<PathBuf, String> {
    let path = PathBuf::from(s);
    if path.is_file() {
        Ok(path)
    } else {
        Err(format!("no such file: {}", s))
    }
}

/// Serve a post-mortem Xtensa crash dump over the GDB Remote Serial
/// Protocol.
#[derive(Parser, Debug)]
#[command(
    about = "Serve a captured Xtensa crash state to a GDB client over RSP.",
    long_about = None,
    after_help = "Example usage: xtensa-rsp-stub --log crash.log --elf firmware.elf --port 1234"
)]
struct Cli {
    /// Post-mortem register+memory dump to ingest.
    #[arg(long = "log", value_parser = existing_file)]
    log: PathBuf,

    /// ELF binary whose loadable segments become memory regions.
    #[arg(long = "elf", value_parser = existing_file)]
    elf: Option<PathBuf>,

    /// TCP port to listen on.
    #[arg(long = "port", default_value_t = DEFAULT_PORT)]
    port: u16,
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();

    let log_text = match fs::read_to_string(&cli.log) {
        Ok(text) => text,
        Err(e) => {
            error!("reading log file {}: {}", cli.log.display(), e);
            return ExitCode::FAILURE;
        }
    };

    let elf_bytes = match &cli.elf {
        Some(path) => match fs::read(path) {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                error!("reading ELF file {}: {}", path.display(), e);
                return ExitCode::FAILURE;
            }
        },
        None => None,
    };

    let state = match ingest::build_debug_state(&log_text, elf_bytes.as_deref()) {
        Ok(state) => state,
        Err(e) => {
            error!("ingesting crash state: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let listener = match TcpListener::bind(("127.0.0.1", cli.port)) {
        Ok(listener) => listener,
        Err(e) => {
            error!("binding 127.0.0.1:{}: {}", cli.port, e);
            return ExitCode::FAILURE;
        }
    };
    // Non-blocking so the accept loop can notice `running` go false
    // while idle, instead of sitting inside a blocking accept() call.
    if let Err(e) = listener.set_nonblocking(true) {
        error!("setting listener non-blocking: {}", e);
        return ExitCode::FAILURE;
    }
    info!("listening on 127.0.0.1:{}", cli.port);

    let running = Arc::new(AtomicBool::new(true));
    ctrlc::set_handler({
        let running = running.clone();
        move || {
            info!("keyboard interrupt received, shutting down");
            running.store(false, Ordering::SeqCst);
        }
    })
    .expect("error setting Ctrl-C handler");

    const POLL_INTERVAL: Duration = Duration::from_millis(100);

    while running.load(Ordering::SeqCst) {
        let mut stream = match listener.accept() {
            Ok((stream, addr)) => {
                info!("client connected: {:?}", addr);
                stream
            }
            Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                sleep(POLL_INTERVAL);
                continue;
            }
            Err(e) => {
                warn!("accept failed: {}", e);
                continue;
            }
        };

        let mut dispatcher = CommandDispatcher::new(state.clone());
        match dispatcher.run_with_shutdown(&mut stream, &running) {
            Ok(SessionEnd::Detached) => {
                info!("client detached cleanly");
                return ExitCode::SUCCESS;
            }
            Ok(end) => info!("session ended: {:?}", end),
            Err(e) => warn!("session error: {}", e),
        }
    }

    ExitCode::SUCCESS
}
