use config::Network;
use daesock;
use nom::IResult;
use std::net::{SocketAddr, UdpSocket};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use std::{error, fmt, io};
use super::PACKET_LENGTH;
use super::pkt::{self, XMT_OFFSET};
use super::timestamp::NTPTimestamp;

/// How long a blocked receive waits before rechecking the stop flag.
/// Bounds the time `stop()` spends joining the dispatcher.
const SOCKET_TIMEOUT: Duration = Duration::from_millis(250);

#[derive(Debug)]
/// Lifecycle and socket errors raised by the control surface.
pub enum ServerError {
  /// `start()` was called while already Running.
  AlreadyRunning,
  /// `stop()` was called while already Stopped.
  NotRunning,
  Io(io::Error),
}

impl fmt::Display for ServerError {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    match *self {
      ServerError::AlreadyRunning => write!(f, "Server already started"),
      ServerError::NotRunning => write!(f, "Server already stopped"),
      ServerError::Io(ref err) => write!(f, "Couldn't serve: {}", err),
    }
  }
}

impl error::Error for ServerError {
  fn description(&self) -> &str {
    match *self {
      ServerError::AlreadyRunning => "server already started",
      ServerError::NotRunning => "server already stopped",
      ServerError::Io(ref err) => err.description(),
    }
  }

  fn cause(&self) -> Option<&error::Error> {
    match *self {
      ServerError::Io(ref err) => Some(err),
      _ => None,
    }
  }
}

impl From<io::Error> for ServerError {
  fn from(err: io::Error) -> ServerError {
    ServerError::Io(err)
  }
}

/// The request responder: Stopped until `start()`, then a single
/// dispatcher thread answers one datagram at a time until `stop()`.
pub struct Server {
  network: Network,
  running: Option<Running>,
}

/// Everything owned by the Running state. The socket itself lives on the
/// dispatcher thread, so its lifetime ends with the loop.
struct Running {
  addr: SocketAddr,
  finished: Arc<AtomicBool>,
  handle: JoinHandle<()>,
}

impl Server {
  /// Creates a server in the Stopped state.
  pub fn new(network: Network) -> Server {
    Server {
      network: network,
      running: None,
    }
  }

  /// Binds the configured address and starts answering requests.
  pub fn start(&mut self) -> Result<(), ServerError> {
    if self.running.is_some() {
      return Err(ServerError::AlreadyRunning);
    }
    let socket = daesock::get_socket(&self.network)?;
    self.start_with(socket)
  }

  /// Starts answering requests on an already-bound socket, as handed
  /// over by the privileged daemonization path.
  pub fn start_with(&mut self, socket: UdpSocket) -> Result<(), ServerError> {
    if self.running.is_some() {
      return Err(ServerError::AlreadyRunning);
    }

    socket.set_read_timeout(Some(SOCKET_TIMEOUT))?;
    let addr = socket.local_addr()?;
    let finished = Arc::new(AtomicBool::new(false));
    let flag = finished.clone();
    let handle = thread::Builder::new()
      .name("dispatcher".to_owned())
      .spawn(move || dispatch(socket, flag))?;

    self.running = Some(Running {
      addr: addr,
      finished: finished,
      handle: handle,
    });
    info!("Server started on {}", addr);
    Ok(())
  }

  /// Signals the dispatcher to finish and waits for it to exit. The
  /// dispatcher observes the flag within one receive-timeout tick.
  pub fn stop(&mut self) -> Result<(), ServerError> {
    let running = match self.running.take() {
      Some(running) => running,
      None => return Err(ServerError::NotRunning),
    };

    running.finished.store(true, Ordering::SeqCst);
    if running.handle.join().is_err() {
      error!("The dispatcher panicked before shutdown");
    }
    info!("Server stopped");
    Ok(())
  }

  pub fn is_running(&self) -> bool {
    self.running.is_some()
  }

  /// The bound address while Running.
  pub fn local_addr(&self) -> Option<SocketAddr> {
    self.running.as_ref().map(|running| running.addr)
  }
}

impl Drop for Server {
  fn drop(&mut self) {
    if let Some(running) = self.running.take() {
      running.finished.store(true, Ordering::SeqCst);
      let _ = running.handle.join();
    }
  }
}

/// The receive loop. Timeout wakeups are silent; everything else that
/// fails is logged and the loop moves on to the next request.
fn dispatch(socket: UdpSocket, finished: Arc<AtomicBool>) {
  while !finished.load(Ordering::SeqCst) {
    match serve_one(&socket) {
      Ok(()) => {}
      Err(ref err) if err.kind() == io::ErrorKind::WouldBlock ||
                      err.kind() == io::ErrorKind::TimedOut => {}
      Err(err) => error!("Dropped a request on I/O failure: {}", err),
    }
  }
}

/// Receives a single datagram and answers it.
fn serve_one(socket: &UdpSocket) -> io::Result<()> {
  let mut buf = [0u8; PACKET_LENGTH];
  let (bytes, from) = socket.recv_from(&mut buf)?;
  let rec = NTPTimestamp::now();

  if bytes < PACKET_LENGTH {
    warn!("Dropping a {} byte datagram from {}", bytes, from);
    return Ok(());
  }

  let request = match pkt::parse(&buf) {
    IResult::Done(_, request) => request,
    _ => {
      warn!("Dropping an unparseable datagram from {}", from);
      return Ok(());
    }
  };
  debug!("{} -> {:?} (refid {})", from, request, request.refid());

  if !request.validate(from) {
    return Ok(());
  }

  let reply = request.reply(rec);
  debug!("{} <- {:?}", from, reply);

  // the transmit timestamp goes into the wire buffer last, as close to
  // the send as possible
  let mut out = reply.to_bytes();
  NTPTimestamp::now().write(&mut out, XMT_OFFSET);
  socket.send_to(&out, from)?;
  Ok(())
}

#[cfg(test)]
mod tests {
  use config::Network;
  use nom::IResult;
  use std::net::UdpSocket;
  use std::time::Duration;
  use super::*;
  use super::super::PACKET_LENGTH;
  use super::super::pkt::{self, NTPMode};

  fn loopback() -> Network {
    Network {
      ip: "127.0.0.1".to_owned(),
      port: Some(0),
    }
  }

  fn start_server() -> Server {
    let mut server = Server::new(loopback());
    server.start().unwrap();
    server
  }

  fn client_request() -> [u8; PACKET_LENGTH] {
    let mut request = [0u8; PACKET_LENGTH];
    request[0] = 0x23; // no leap warning, version 4, client
    request[40..48].copy_from_slice(&[0xde, 0xad, 0xbe, 0xef, 0x01, 0x23, 0x45, 0x67]);
    request
  }

  #[test]
  fn double_start_is_a_precondition_violation() {
    let mut server = start_server();
    match server.start() {
      Err(ServerError::AlreadyRunning) => {}
      other => panic!("expected AlreadyRunning, got {:?}", other),
    }
    assert!(server.is_running());
    server.stop().unwrap();
  }

  #[test]
  fn stop_without_start_is_a_precondition_violation() {
    let mut server = Server::new(loopback());
    match server.stop() {
      Err(ServerError::NotRunning) => {}
      other => panic!("expected NotRunning, got {:?}", other),
    }
  }

  #[test]
  fn lifecycle_is_restartable() {
    let mut server = start_server();
    assert!(server.is_running());
    server.stop().unwrap();
    assert!(!server.is_running());
    server.start().unwrap();
    server.stop().unwrap();
  }

  #[test]
  fn replies_echo_the_client_transmit_bytes_verbatim() {
    let mut server = start_server();
    let addr = server.local_addr().unwrap();
    let request = client_request();

    let client = UdpSocket::bind("127.0.0.1:0").unwrap();
    client.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
    client.send_to(&request, addr).unwrap();

    let mut reply = [0u8; 64];
    let (bytes, from) = client.recv_from(&mut reply).unwrap();
    assert_eq!(bytes, PACKET_LENGTH);
    assert_eq!(from, addr);
    // the origin timestamp is the request's transmit field, byte for byte
    assert_eq!(&reply[24..32], &request[40..48]);

    match pkt::parse(&reply[..bytes]) {
      IResult::Done(_, parsed) => {
        assert_eq!(parsed.mode, NTPMode::Server);
        assert_eq!(parsed.stratum, 1);
        assert!(parsed.rec <= parsed.xmt);
        assert!(parsed.xmt.to_unix() > 1.7e9);
      }
      other => panic!("reply failed to parse: {:?}", other),
    }
    server.stop().unwrap();
  }

  #[test]
  fn short_datagrams_are_dropped_without_stalling_the_loop() {
    let mut server = start_server();
    let addr = server.local_addr().unwrap();

    let client = UdpSocket::bind("127.0.0.1:0").unwrap();
    client.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
    client.send_to(&[0u8; 10], addr).unwrap();
    client.send_to(&client_request(), addr).unwrap();

    let mut reply = [0u8; PACKET_LENGTH];
    let (bytes, _) = client.recv_from(&mut reply).unwrap();
    assert_eq!(bytes, PACKET_LENGTH);
    server.stop().unwrap();
  }
}
