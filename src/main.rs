#[macro_use]
extern crate log;

#[macro_use]
extern crate nom;

#[macro_use]
extern crate serde_derive;

extern crate byteorder;
extern crate chrono;
extern crate daemonize;
extern crate fern;
extern crate libc;
extern crate toml;

use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};

#[macro_use]
mod macros;

mod config;
mod daesock;
mod ntp;

const DEFAULT_CONFIG: &'static str = "config.toml";

/// Set by the signal handler, polled by the main thread.
static SHUTDOWN: AtomicBool = AtomicBool::new(false);

/// Initialize Logging Subsystem
fn logging(cfg: config::Log) -> Result<(), fern::InitError> {
  let mut output = vec![fern::OutputConfig::stderr()];

  // If specified, log to a file
  if let Some(ref filename) = cfg.file {
    output.push(fern::OutputConfig::file(filename));
  }

  let level = log::LogLevelFilter::from_str(cfg.level.as_ref()).unwrap_or_else(|_| {
    println!("\"{}\" isn't a valid loglevel. Valid loglevels are {}.",
             cfg.level,
             "OFF, ERROR, WARN, INFO, DEBUG and TRACE");
    std::process::exit(1);
  });

  fern::init_global_logger(fern::DispatchConfig {
                             format: Box::new(|msg, level, _location| {
                               format!("[{}] {} {}", chrono::Local::now().to_rfc3339(), level, msg)
                             }),
                             output: output,
                             level: level,
                           },
                           log::LogLevelFilter::Trace)
}

#[cfg(unix)]
extern "C" fn on_signal(_signal: libc::c_int) {
  SHUTDOWN.store(true, Ordering::SeqCst);
}

#[cfg(unix)]
fn install_signal_handlers() {
  let handler = on_signal as extern "C" fn(libc::c_int);
  unsafe {
    libc::signal(libc::SIGINT, handler as libc::sighandler_t);
    libc::signal(libc::SIGTERM, handler as libc::sighandler_t);
  }
}

#[cfg(not(unix))]
fn install_signal_handlers() {}

fn main() {
  // Apply configuration
  let config_file = std::env::args().nth(1).unwrap_or_else(|| DEFAULT_CONFIG.to_owned());
  let cfg = config::Config::read(config_file).unwrap_or_else(|err| {
    println!("{}", err);
    std::process::exit(1);
  });

  // Init logging
  logging(cfg.log).unwrap();

  // daemonize if supported and enabled
  // we get the lock on udp port 123 here, while we're still root
  let network = cfg.network;
  let socket = if let Some(daemon) = cfg.daemon {
    debug!("Daemonizing");
    daesock::daemonize(daemon, network.clone()).unwrap_or_else(|err| fatal!("{}", err))
  } else {
    if cfg!(unix) && unsafe { libc::geteuid() } == 0 {
      warn!("Running as root without daemonization. This is a bad idea!");
      warn!("Enable daemonization in the configuration by adding a [daemon] section.");
    }
    daesock::get_socket(&network).unwrap_or_else(|err| fatal!("Couldn't bind to port: {}", err))
  };

  trace!("Bound to {}",
         socket.local_addr().unwrap_or_else(|err| fatal!("{}", err)));

  let mut server = ntp::Server::new(network);
  server.start_with(socket).unwrap_or_else(|err| fatal!("{}", err));
  info!("Now listening for clients...");

  install_signal_handlers();
  while !SHUTDOWN.load(Ordering::SeqCst) {
    std::thread::sleep(std::time::Duration::from_millis(250));
  }

  info!("Shutting down");
  server.stop().unwrap_or_else(|err| fatal!("{}", err));
}
