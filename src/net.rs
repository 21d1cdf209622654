use crate::app::App;
use crate::common::InterStub;
use crate::inter_service;
use crate::model::message as msg;
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use log::{debug, error, warn};
use std::io::{self, ErrorKind, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

#[cfg(test)]
#[path = "test/net_test.rs"]
mod net_test;

// -----------------------------------------------------------------------------------------------
//  Framing
// -----------------------------------------------------------------------------------------------
// We use simple 4 byte header that holds the length of the real message.

/// Frames announcing a larger body are rejected before anything is allocated.
pub const MAX_FRAME_SIZE: u32 = 64 << 20;

pub fn send_bytes<W: Write>(data: &[u8], stream: &mut W) -> io::Result<()> {
  stream.write_u32::<BigEndian>(data.len() as u32)?;
  stream.write_all(data)?;
  stream.flush()
}

pub fn recv<R: Read>(stream: &mut R) -> io::Result<Vec<u8>> {
  let size = stream.read_u32::<BigEndian>()?;
  if size > MAX_FRAME_SIZE {
    return Err(io::Error::new(
      ErrorKind::InvalidData,
      format!("frame of {} bytes exceeds the limit of {}", size, MAX_FRAME_SIZE),
    ));
  }
  let mut buf = vec![0; size as usize];
  stream.read_exact(&mut buf)?;
  Ok(buf)
}

fn to_io_err<E: ToString>(err: E) -> io::Error {
  io::Error::new(ErrorKind::InvalidData, err.to_string())
}

// -----------------------------------------------------------------------------------------------
//  TcpInterStub
// -----------------------------------------------------------------------------------------------

/// Sends each inter-party request over a fresh connection to the peer's broker url
/// (`host:port`) and waits for the single framed response.
#[derive(Debug, Clone)]
pub struct TcpInterStub {
  pub timeout: Duration,
}

impl Default for TcpInterStub {
  fn default() -> Self {
    TcpInterStub { timeout: Duration::from_secs(10) }
  }
}

impl TcpInterStub {
  fn call(&self, url: &str, req: msg::InterRequest) -> io::Result<msg::InterResponse> {
    let mut stream = TcpStream::connect(url)?;
    stream.set_read_timeout(Some(self.timeout))?;
    stream.set_write_timeout(Some(self.timeout))?;
    send_bytes(&rmp_serde::to_vec(&req).map_err(to_io_err)?, &mut stream)?;
    let data = recv(&mut stream)?;
    rmp_serde::from_slice(&data).map_err(to_io_err)
  }
}

impl InterStub for TcpInterStub {
  fn exchange_job_info(
    &self,
    url: &str,
    req: &msg::ExchangeJobInfoRequest,
  ) -> Result<msg::ExchangeJobInfoResponse, String> {
    let resp = self
      .call(url, msg::InterRequest::ExchangeJobInfo(req.clone()))
      .map_err(|e| format!("exchange job info with {}: {}", url, e))?;
    cast!(msg::InterResponse::ExchangeJobInfo, resp).map_err(|e| e.to_string())
  }

  fn ask_info(&self, url: &str, req: &msg::AskInfoRequest) -> Result<msg::AskInfoResponse, String> {
    let resp = self
      .call(url, msg::InterRequest::AskInfo(req.clone()))
      .map_err(|e| format!("ask info from {}: {}", url, e))?;
    cast!(msg::InterResponse::AskInfo, resp).map_err(|e| e.to_string())
  }

  fn sync_info(
    &self,
    url: &str,
    req: &msg::SyncInfoRequest,
  ) -> Result<msg::SyncInfoResponse, String> {
    let resp = self
      .call(url, msg::InterRequest::SyncInfo(req.clone()))
      .map_err(|e| format!("sync info to {}: {}", url, e))?;
    cast!(msg::InterResponse::SyncInfo, resp).map_err(|e| e.to_string())
  }
}

// -----------------------------------------------------------------------------------------------
//  Inter-Party Server
// -----------------------------------------------------------------------------------------------

/// Serves requests on one connection until the peer closes it.
pub fn handle_conn<S: Read + Write>(app: &App, stream: &mut S) -> io::Result<()> {
  loop {
    let data = match recv(stream) {
      Ok(data) => data,
      Err(err) if err.kind() == ErrorKind::UnexpectedEof => return Ok(()),
      Err(err) => return Err(err),
    };
    let req: msg::InterRequest = rmp_serde::from_slice(&data).map_err(to_io_err)?;
    debug!("inter request: {:?}", req);
    let resp = inter_service::handle(app, req);
    send_bytes(&rmp_serde::to_vec(&resp).map_err(to_io_err)?, stream)?;
  }
}

/// Binds `addr` and serves every accepted connection on its own thread.
pub fn start_inter_server(app: Arc<App>, addr: &str) -> io::Result<thread::JoinHandle<()>> {
  let listener = TcpListener::bind(addr)?;
  Ok(serve(app, listener))
}

/// Starts the accepting thread on an already bound `listener`.
pub fn serve(app: Arc<App>, listener: TcpListener) -> thread::JoinHandle<()> {
  thread::spawn(move || {
    for stream in listener.incoming() {
      let mut stream = match stream {
        Ok(stream) => stream,
        Err(err) => {
          warn!("failed to accept connection: {}", err);
          continue;
        }
      };
      let app = app.clone();
      thread::spawn(move || {
        if let Err(err) = handle_conn(&app, &mut stream) {
          error!("inter connection closed with error: {}", err);
        }
      });
    }
  })
}
