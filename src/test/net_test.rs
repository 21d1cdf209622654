use super::{handle_conn, recv, send_bytes, serve, TcpInterStub, MAX_FRAME_SIZE};
use crate::common::InterStub;
use crate::model::message as msg;
use crate::test_utils::{mk_execute_info, mk_jid, mk_party, mk_project, TestNet};
use std::collections::BTreeMap;
use std::io::{self, Cursor, ErrorKind, Read, Write};
use std::net::TcpListener;

/// Reads from `input`, writes to `output`.
struct Duplex {
  input: Cursor<Vec<u8>>,
  output: Vec<u8>,
}

impl Read for Duplex {
  fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
    self.input.read(buf)
  }
}

impl Write for Duplex {
  fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
    self.output.write(buf)
  }

  fn flush(&mut self) -> io::Result<()> {
    Ok(())
  }
}

fn mk_req(job: &str) -> msg::ExchangeJobInfoRequest {
  msg::ExchangeJobInfoRequest {
    project_id: mk_project("p1"),
    job_id: mk_jid(job),
    client_id: mk_party("alice"),
    server_checksum: None,
    client_checksum: None,
  }
}

#[test]
fn framing_test() {
  let mut out = Vec::<u8>::new();
  send_bytes(b"hello", &mut out).unwrap();
  send_bytes(b"", &mut out).unwrap();
  assert_eq!(&out[..4], &[0, 0, 0, 5]);

  let mut input = Cursor::new(out);
  assert_eq!(recv(&mut input).unwrap(), b"hello".to_vec());
  assert_eq!(recv(&mut input).unwrap(), Vec::<u8>::new());
  assert_eq!(recv(&mut input).unwrap_err().kind(), ErrorKind::UnexpectedEof);

  // A frame shorter than its header says.
  let mut input = Cursor::new(vec![0, 0, 0, 9, 1, 2]);
  assert_eq!(recv(&mut input).unwrap_err().kind(), ErrorKind::UnexpectedEof);
}

#[test]
fn oversized_frame_test() {
  let mut input = Cursor::new(vec![0xff; 4]);
  assert_eq!(recv(&mut input).unwrap_err().kind(), ErrorKind::InvalidData);

  // The limit itself is accepted; only the missing body fails.
  let mut input = Cursor::new(MAX_FRAME_SIZE.to_be_bytes().to_vec());
  assert_eq!(recv(&mut input).unwrap_err().kind(), ErrorKind::UnexpectedEof);
  let mut input = Cursor::new((MAX_FRAME_SIZE + 1).to_be_bytes().to_vec());
  assert_eq!(recv(&mut input).unwrap_err().kind(), ErrorKind::InvalidData);
}

#[test]
fn handle_conn_test() {
  let net = TestNet::new("p1", &["alice", "bob"]);
  let info = mk_execute_info("p1", "j1", "alice", "SELECT 1");
  let session = net.app("bob").create_session(info, false, String::new()).unwrap();
  session.save_local_checksums(BTreeMap::new()).unwrap();

  let mut input = Vec::<u8>::new();
  for job in &["j1", "j2"] {
    let req = msg::InterRequest::ExchangeJobInfo(mk_req(job));
    send_bytes(&rmp_serde::to_vec(&req).unwrap(), &mut input).unwrap();
  }
  let mut conn = Duplex { input: Cursor::new(input), output: vec![] };
  handle_conn(net.app("bob"), &mut conn).unwrap();

  let mut output = Cursor::new(conn.output);
  let mut codes = Vec::new();
  for _ in 0..2 {
    let resp: msg::InterResponse = rmp_serde::from_slice(&recv(&mut output).unwrap()).unwrap();
    let resp = cast!(msg::InterResponse::ExchangeJobInfo, resp).unwrap();
    codes.push(resp.status.unwrap().code);
  }
  assert_eq!(codes, vec![msg::CODE_OK, msg::CODE_SESSION_NOT_FOUND]);
}

#[test]
fn garbage_request_test() {
  let net = TestNet::new("p1", &["alice", "bob"]);
  let mut input = Vec::<u8>::new();
  send_bytes(&[0xc1, 0xc1], &mut input).unwrap();
  let mut conn = Duplex { input: Cursor::new(input), output: vec![] };
  let err = handle_conn(net.app("bob"), &mut conn).unwrap_err();
  assert_eq!(err.kind(), ErrorKind::InvalidData);
  assert!(conn.output.is_empty());
}

#[test]
fn tcp_stub_test() {
  let net = TestNet::new("p1", &["alice", "bob"]);
  let listener = TcpListener::bind("127.0.0.1:0").unwrap();
  let addr = listener.local_addr().unwrap().to_string();
  serve(net.app("bob").clone(), listener);

  let stub = TcpInterStub::default();
  let resp = stub.exchange_job_info(&addr, &mk_req("j1")).unwrap();
  assert_eq!(resp.status.unwrap().code, msg::CODE_SESSION_NOT_FOUND);

  let req = msg::AskInfoRequest {
    project_id: mk_project("p1"),
    table_names: vec![],
    requester: mk_party("alice"),
  };
  let resp = stub.ask_info(&addr, &req).unwrap();
  assert_eq!(resp.status, Some(msg::Status::ok()));

  // The listener behind this port is already dropped.
  let closed = TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap().to_string();
  assert!(stub.exchange_job_info(&closed, &mk_req("j1")).is_err());
}
