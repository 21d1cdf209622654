use super::{
  check_checksum, exchange_job_info, get_checksum_from_issuer, get_checksum_from_other_parties,
  ExchangeOutcome,
};
use crate::error::BrokerError;
use crate::model::common::{Checksum, ChecksumCompareResult, PartyCode};
use crate::model::message as msg;
use crate::session::Session;
use crate::test_utils::{broker_url, mk_execute_info, mk_party, mk_status_response, TestNet};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

fn checksum(schema: u8, ccl: u8) -> Checksum {
  Checksum { table_schema: vec![schema], ccl: vec![ccl] }
}

/// Creates the Session of job `j1` at `party` with the given data parties, without
/// computing any checksums yet.
fn setup_unprepared(
  net: &TestNet,
  party: &str,
  issuer: &str,
  data_parties: &[&str],
) -> Arc<Session> {
  let app = net.app(party);
  let info = mk_execute_info("p1", "j1", issuer, "SELECT * FROM ta");
  let session = app.create_session(info, false, String::new()).unwrap();
  let data_parties: Vec<PartyCode> = data_parties.iter().map(|p| mk_party(p)).collect();
  session.state().unwrap().data_parties = data_parties;
  session
}

fn local_map(local: &[(&str, Checksum)]) -> BTreeMap<PartyCode, Checksum> {
  local.iter().map(|(p, c)| (mk_party(p), c.clone())).collect()
}

/// Creates the Session of job `j1` at `party` with the given data parties, and stores
/// `local` as the checksum `party` computed for each of them.
fn setup(
  net: &TestNet,
  party: &str,
  issuer: &str,
  local: &[(&str, Checksum)],
) -> Arc<Session> {
  let parties: Vec<&str> = local.iter().map(|(p, _)| *p).collect();
  let session = setup_unprepared(net, party, issuer, &parties);
  session.save_local_checksums(local_map(local)).unwrap();
  session
}

fn ok_response(expected: Checksum) -> msg::ExchangeJobInfoResponse {
  msg::ExchangeJobInfoResponse {
    status: Some(msg::Status::ok()),
    expected_server_checksum: Some(expected),
  }
}

#[test]
fn retry_on_session_not_found_test() {
  let net = TestNet::new("p1", &["alice", "bob"]);
  let session =
    setup(&net, "alice", "alice", &[("alice", checksum(1, 1)), ("bob", checksum(2, 2))]);
  net.stub.script_exchange(Ok(mk_status_response(msg::CODE_SESSION_NOT_FOUND)));
  net.stub.script_exchange(Ok(mk_status_response(msg::CODE_SESSION_NOT_FOUND)));
  net.stub.script_exchange(Ok(ok_response(checksum(2, 2))));

  let outcome = exchange_job_info(net.app("alice"), &session, &mk_party("bob")).unwrap();
  assert_eq!(outcome, ExchangeOutcome::Agreed(ok_response(checksum(2, 2))));
  let interval = Duration::from_millis(200);
  assert_eq!(net.clock.sleeps(), vec![interval, interval]);

  let calls = net.stub.exchange_calls();
  assert_eq!(calls.len(), 3);
  for (url, req) in calls {
    assert_eq!(url, broker_url("bob"));
    assert_eq!(req.client_id, mk_party("alice"));
    assert_eq!(req.server_checksum, Some(checksum(2, 2)));
    assert_eq!(req.client_checksum, Some(checksum(1, 1)));
  }
}

#[test]
fn retries_exhausted_test() {
  let net = TestNet::new("p1", &["alice", "bob"]);
  let session =
    setup(&net, "alice", "alice", &[("alice", checksum(1, 1)), ("bob", checksum(2, 2))]);
  for _ in 0..3 {
    net.stub.script_exchange(Ok(mk_status_response(msg::CODE_SESSION_NOT_FOUND)));
  }

  match exchange_job_info(net.app("alice"), &session, &mk_party("bob")) {
    Err(BrokerError::Transport(_)) => {}
    other => panic!("unexpected {:?}", other),
  }
  assert_eq!(net.stub.exchange_calls().len(), 3);
  assert_eq!(net.clock.sleeps().len(), 2);
}

#[test]
fn no_retry_on_other_errors_test() {
  let net = TestNet::new("p1", &["alice", "bob"]);
  let session =
    setup(&net, "alice", "alice", &[("alice", checksum(1, 1)), ("bob", checksum(2, 2))]);
  let app = net.app("alice");

  // An error status.
  net.stub.script_exchange(Ok(mk_status_response(msg::CODE_INTERNAL)));
  assert!(exchange_job_info(app, &session, &mk_party("bob")).is_err());
  assert_eq!(net.stub.exchange_calls().len(), 1);

  // A transport error.
  net.stub.script_exchange(Err("connection reset".to_string()));
  match exchange_job_info(app, &session, &mk_party("bob")) {
    Err(BrokerError::Transport(_)) => {}
    other => panic!("unexpected {:?}", other),
  }
  assert_eq!(net.stub.exchange_calls().len(), 2);

  // A response without a status.
  net.stub.script_exchange(Ok(msg::ExchangeJobInfoResponse::default()));
  assert!(exchange_job_info(app, &session, &mk_party("bob")).is_err());
  assert_eq!(net.stub.exchange_calls().len(), 3);
  assert!(net.clock.sleeps().is_empty());
}

#[test]
fn data_inconsistency_is_returned_test() {
  let net = TestNet::new("p1", &["alice", "bob"]);
  let session =
    setup(&net, "alice", "alice", &[("alice", checksum(1, 1)), ("bob", checksum(2, 2))]);
  let resp = msg::ExchangeJobInfoResponse {
    status: Some(msg::Status::new(msg::CODE_DATA_INCONSISTENCY, String::new())),
    expected_server_checksum: Some(checksum(3, 2)),
  };
  net.stub.script_exchange(Ok(resp.clone()));

  let outcome = exchange_job_info(net.app("alice"), &session, &mk_party("bob")).unwrap();
  assert_eq!(outcome, ExchangeOutcome::DataInconsistency(resp));
  assert_eq!(net.stub.exchange_calls().len(), 1);
}

#[test]
fn retry_times_at_least_one_test() {
  let net = TestNet::with_conf("p1", &["alice", "bob"], |conf| {
    conf.exchange_job_info_retry_times = 0;
  });
  let session =
    setup(&net, "alice", "alice", &[("alice", checksum(1, 1)), ("bob", checksum(2, 2))]);
  net.stub.script_exchange(Ok(ok_response(checksum(2, 2))));
  assert!(exchange_job_info(net.app("alice"), &session, &mk_party("bob")).is_ok());
  assert_eq!(net.stub.exchange_calls().len(), 1);
}

#[test]
fn checksum_only_sent_to_data_parties_test() {
  let net = TestNet::new("p1", &["alice", "bob", "carol"]);
  let session =
    setup(&net, "alice", "carol", &[("alice", checksum(1, 1)), ("bob", checksum(2, 2))]);
  net.stub.script_exchange(Ok(ok_response(checksum(9, 9))));
  exchange_job_info(net.app("alice"), &session, &mk_party("carol")).unwrap();
  let calls = net.stub.exchange_calls();
  assert_eq!(calls[0].1.server_checksum, None);
  assert_eq!(calls[0].1.client_checksum, Some(checksum(1, 1)));
}

#[test]
fn get_checksum_from_other_parties_test() {
  let net = TestNet::new("p1", &["alice", "bob", "carol"]);
  let local = [("alice", checksum(1, 1)), ("bob", checksum(2, 2)), ("carol", checksum(3, 3))];
  // bob's own view agrees with alice's, and so does carol's.
  let bob_session = setup(&net, "bob", "alice", &local);
  setup(&net, "carol", "alice", &local);
  let session = setup(&net, "alice", "alice", &local);

  get_checksum_from_other_parties(net.app("alice"), &session, &mk_party("alice")).unwrap();
  assert!(!session.resync_pending());
  check_checksum(&session).unwrap();
  let contacted: Vec<String> = net.stub.exchange_calls().into_iter().map(|(url, _)| url).collect();
  assert_eq!(contacted, vec![broker_url("bob"), broker_url("carol")]);

  // bob learned alice's own checksum from the request.
  assert_eq!(
    bob_session.compare_checksum_for(&mk_party("alice")).unwrap(),
    ChecksumCompareResult::Equal
  );
}

#[test]
fn skip_issuer_and_self_test() {
  let net = TestNet::new("p1", &["alice", "bob", "carol"]);
  let local = [("alice", checksum(1, 1)), ("bob", checksum(2, 2)), ("carol", checksum(3, 3))];
  setup(&net, "carol", "alice", &local);
  let session = setup(&net, "bob", "alice", &local);

  get_checksum_from_other_parties(net.app("bob"), &session, &mk_party("alice")).unwrap();
  let contacted: Vec<String> = net.stub.exchange_calls().into_iter().map(|(url, _)| url).collect();
  assert_eq!(contacted, vec![broker_url("carol")]);
}

#[test]
fn inconsistent_peer_test() {
  let net = TestNet::new("p1", &["alice", "bob"]);
  // bob's own view of its tables differs from what alice computed for it.
  setup(&net, "bob", "alice", &[("alice", checksum(1, 1)), ("bob", checksum(2, 7))]);
  let session =
    setup(&net, "alice", "alice", &[("alice", checksum(1, 1)), ("bob", checksum(2, 2))]);

  get_checksum_from_other_parties(net.app("alice"), &session, &mk_party("alice")).unwrap();
  assert!(session.resync_pending());
  match check_checksum(&session) {
    Err(BrokerError::ChecksumMismatch { party, result }) => {
      assert_eq!(party, mk_party("bob"));
      assert_eq!(result, ChecksumCompareResult::CclNotEqual);
    }
    other => panic!("unexpected {:?}", other),
  }
}

#[test]
fn peer_without_session_test() {
  let net = TestNet::new("p1", &["alice", "bob"]);
  let session =
    setup(&net, "alice", "alice", &[("alice", checksum(1, 1)), ("bob", checksum(2, 2))]);
  match get_checksum_from_other_parties(net.app("alice"), &session, &mk_party("alice")) {
    Err(BrokerError::Transport(_)) => {}
    other => panic!("unexpected {:?}", other),
  }
  assert_eq!(net.stub.exchange_calls().len(), 3);
  assert_eq!(net.clock.sleeps().len(), 2);
}

#[test]
fn peer_prepares_while_caller_waits_test() {
  let net = TestNet::new("p1", &["alice", "bob"]);
  let local = [("alice", checksum(1, 1)), ("bob", checksum(2, 2))];
  let bob_session = setup_unprepared(&net, "bob", "alice", &["alice", "bob"]);
  let session = setup(&net, "alice", "alice", &local);

  // bob finishes its preparation during alice's first wait.
  let bob = bob_session.clone();
  let checksums = local_map(&local);
  net.clock.on_sleep(Arc::new(move || {
    if !bob.checksums_ready().unwrap() {
      bob.save_local_checksums(checksums.clone()).unwrap();
    }
  }));

  let outcome = exchange_job_info(net.app("alice"), &session, &mk_party("bob")).unwrap();
  assert_eq!(outcome, ExchangeOutcome::Agreed(ok_response(checksum(2, 2))));
  assert_eq!(net.stub.exchange_calls().len(), 2);
  assert_eq!(net.clock.sleeps(), vec![Duration::from_millis(200)]);
  // bob kept alice's own checksum from the answered call.
  assert_eq!(
    bob_session.compare_checksum_for(&mk_party("alice")).unwrap(),
    ChecksumCompareResult::Equal
  );
}

#[test]
fn get_checksum_from_issuer_test() {
  let net = TestNet::new("p1", &["alice", "bob"]);
  let local = [("alice", checksum(1, 1)), ("bob", checksum(2, 2))];
  let alice_session = setup(&net, "alice", "alice", &local);
  let session = setup(&net, "bob", "alice", &local);

  assert!(get_checksum_from_issuer(net.app("bob"), &session).unwrap());
  check_checksum(&session).unwrap();
  let contacted: Vec<String> = net.stub.exchange_calls().into_iter().map(|(url, _)| url).collect();
  assert_eq!(contacted, vec![broker_url("alice")]);
  // alice learned bob's own checksum on the way.
  assert_eq!(
    alice_session.compare_checksum_for(&mk_party("bob")).unwrap(),
    ChecksumCompareResult::Equal
  );

  // The issuer itself has nobody to ask.
  assert!(!get_checksum_from_issuer(net.app("alice"), &alice_session).unwrap());
  assert_eq!(net.stub.exchange_calls().len(), 1);
}

#[test]
fn issuer_without_tables_test() {
  let net = TestNet::new("p1", &["alice", "bob", "carol"]);
  let local = [("bob", checksum(2, 2)), ("carol", checksum(3, 3))];
  let session = setup(&net, "bob", "alice", &local);
  assert!(!get_checksum_from_issuer(net.app("bob"), &session).unwrap());
  assert!(net.stub.exchange_calls().is_empty());
}

#[test]
fn issuer_reports_inconsistency_test() {
  let net = TestNet::new("p1", &["alice", "bob"]);
  setup(&net, "alice", "alice", &[("alice", checksum(1, 1)), ("bob", checksum(2, 2))]);
  // bob's view of alice's tables differs from alice's own.
  let session = setup(&net, "bob", "alice", &[("alice", checksum(1, 7)), ("bob", checksum(2, 2))]);

  assert!(get_checksum_from_issuer(net.app("bob"), &session).unwrap());
  assert!(session.resync_pending());
  assert_eq!(
    session.compare_checksum_for(&mk_party("alice")).unwrap(),
    ChecksumCompareResult::CclNotEqual
  );
}
