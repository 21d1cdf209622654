use super::{handle, handle_ask_info, handle_exchange_job_info, handle_sync_info};
use crate::meta_store::MetaStore;
use crate::model::common::{Checksum, PartyCode};
use crate::model::message as msg;
use crate::test_utils::{
  mk_execute_info, mk_jid, mk_party, mk_priv, mk_project, mk_tab, mk_table, TestNet,
};
use std::collections::BTreeMap;

fn checksum(schema: u8, ccl: u8) -> Checksum {
  Checksum { table_schema: vec![schema], ccl: vec![ccl] }
}

fn mk_req(server: Option<Checksum>, client: Option<Checksum>) -> msg::ExchangeJobInfoRequest {
  msg::ExchangeJobInfoRequest {
    project_id: mk_project("p1"),
    job_id: mk_jid("j1"),
    client_id: mk_party("alice"),
    server_checksum: server,
    client_checksum: client,
  }
}

/// Creates bob's Session with `bob_self` as bob's checksum of its own tables.
fn setup(net: &TestNet, bob_self: Option<Checksum>) {
  let app = net.app("bob");
  let info = mk_execute_info("p1", "j1", "alice", "SELECT * FROM tb");
  let session = app.create_session(info, false, String::new()).unwrap();
  let mut data_parties: Vec<PartyCode> = vec![mk_party("alice")];
  let mut local = BTreeMap::new();
  if let Some(c) = bob_self {
    data_parties.push(mk_party("bob"));
    local.insert(mk_party("bob"), c);
  }
  session.state().unwrap().data_parties = data_parties;
  session.save_local_checksums(local).unwrap();
}

fn code(resp: &msg::ExchangeJobInfoResponse) -> i32 {
  resp.status.as_ref().unwrap().code
}

#[test]
fn exchange_session_not_found_test() {
  let net = TestNet::new("p1", &["alice", "bob"]);
  let resp = handle_exchange_job_info(net.app("bob"), &mk_req(None, None));
  assert_eq!(code(&resp), msg::CODE_SESSION_NOT_FOUND);

  // A Session of another project doesn't count.
  setup(&net, Some(checksum(2, 2)));
  let mut req = mk_req(None, None);
  req.project_id = mk_project("p2");
  assert_eq!(code(&handle_exchange_job_info(net.app("bob"), &req)), msg::CODE_SESSION_NOT_FOUND);
}

#[test]
fn exchange_before_prepared_test() {
  let net = TestNet::new("p1", &["alice", "bob"]);
  let info = mk_execute_info("p1", "j1", "alice", "SELECT * FROM tb");
  let session = net.app("bob").create_session(info, false, String::new()).unwrap();
  session.state().unwrap().data_parties = vec![mk_party("alice"), mk_party("bob")];

  // Registered but not prepared yet, so alice is told to come back later.
  let req = mk_req(Some(checksum(2, 2)), Some(checksum(1, 1)));
  let resp = handle_exchange_job_info(net.app("bob"), &req);
  assert_eq!(code(&resp), msg::CODE_SESSION_NOT_FOUND);
  assert_eq!(resp.expected_server_checksum, None);

  session.save_local_checksums(collection!(mk_party("bob") => checksum(2, 2))).unwrap();
  let resp = handle_exchange_job_info(net.app("bob"), &req);
  assert_eq!(code(&resp), msg::CODE_OK);
  assert_eq!(resp.expected_server_checksum, Some(checksum(2, 2)));
}

#[test]
fn exchange_consistent_test() {
  let net = TestNet::new("p1", &["alice", "bob"]);
  setup(&net, Some(checksum(2, 2)));
  let resp = handle_exchange_job_info(
    net.app("bob"),
    &mk_req(Some(checksum(2, 2)), Some(checksum(1, 1))),
  );
  assert_eq!(code(&resp), msg::CODE_OK);
  assert_eq!(resp.expected_server_checksum, Some(checksum(2, 2)));

  // The caller's own checksum is kept as its remote checksum.
  let session = net.app("bob").get_session(&mk_jid("j1")).unwrap();
  session.save_local_checksum(mk_party("alice"), checksum(1, 1)).unwrap();
  assert!(session.compare_checksum_for(&mk_party("alice")).is_ok());
}

#[test]
fn exchange_inconsistent_test() {
  let net = TestNet::new("p1", &["alice", "bob"]);
  setup(&net, Some(checksum(2, 7)));
  let resp = handle_exchange_job_info(net.app("bob"), &mk_req(Some(checksum(2, 2)), None));
  assert_eq!(code(&resp), msg::CODE_DATA_INCONSISTENCY);
  assert_eq!(resp.expected_server_checksum, Some(checksum(2, 7)));
}

#[test]
fn exchange_without_checksums_test() {
  let net = TestNet::new("p1", &["alice", "bob"]);
  setup(&net, None);
  let resp = handle_exchange_job_info(net.app("bob"), &mk_req(None, None));
  assert_eq!(code(&resp), msg::CODE_OK);
  assert_eq!(resp.expected_server_checksum, None);

  // bob can't judge a checksum computed for it without its own.
  let resp = handle_exchange_job_info(net.app("bob"), &mk_req(Some(checksum(2, 2)), None));
  assert_eq!(code(&resp), msg::CODE_INTERNAL);
}

#[test]
fn ask_info_test() {
  let net = TestNet::new("p1", &["alice", "bob"]);
  net.add_meta(
    &["bob"],
    vec![
      mk_table("p1", "ta", "alice", &[("id", "int")]),
      mk_table("p1", "tb", "bob", &[("id", "int")]),
    ],
    vec![
      mk_priv("p1", "ta", "id", "bob", "PLAINTEXT"),
      mk_priv("p1", "tb", "id", "alice", "PLAINTEXT"),
    ],
  );
  let req = msg::AskInfoRequest {
    project_id: mk_project("p1"),
    table_names: vec![mk_tab("ta"), mk_tab("tb"), mk_tab("tx")],
    requester: mk_party("alice"),
  };
  let resp = handle_ask_info(net.app("bob"), &req);
  assert_eq!(resp.status, Some(msg::Status::ok()));
  assert_eq!(resp.tables, vec![mk_table("p1", "tb", "bob", &[("id", "int")])]);
  assert_eq!(resp.column_privs, vec![mk_priv("p1", "tb", "id", "alice", "PLAINTEXT")]);

  // Parties outside the project are refused.
  let mut req = req;
  req.requester = mk_party("mallory");
  let resp = handle_ask_info(net.app("bob"), &req);
  assert_eq!(resp.status.unwrap().code, msg::CODE_INTERNAL);
  assert!(resp.tables.is_empty());
}

#[test]
fn sync_info_test() {
  let net = TestNet::new("p1", &["alice", "bob"]);
  let app = net.app("alice");
  let info = mk_execute_info("p1", "j1", "alice", "SELECT * FROM tb");
  let session = app.create_session(info, false, String::new()).unwrap();

  let req = msg::SyncInfoRequest {
    project_id: mk_project("p1"),
    job_id: Some(mk_jid("j1")),
    sender: mk_party("bob"),
    // bob may not push alice's tables.
    tables: vec![
      mk_table("p1", "ta", "alice", &[("id", "string")]),
      mk_table("p1", "tb", "bob", &[("id", "int")]),
    ],
    column_privs: vec![
      mk_priv("p1", "ta", "id", "bob", "PLAINTEXT"),
      mk_priv("p1", "tb", "id", "alice", "PLAINTEXT"),
    ],
  };
  let resp = handle(app, msg::InterRequest::SyncInfo(req));
  let ok = msg::SyncInfoResponse { status: Some(msg::Status::ok()) };
  assert_eq!(resp, msg::InterResponse::SyncInfo(ok));
  assert!(session.resync_pending());

  let mut txn = net.store("alice").create_meta_transaction().unwrap();
  let (found, not_found) =
    txn.get_table_metas_by_names(&mk_project("p1"), &[mk_tab("ta"), mk_tab("tb")]).unwrap();
  assert_eq!(found, vec![mk_table("p1", "tb", "bob", &[("id", "int")])]);
  assert_eq!(not_found, vec![mk_tab("ta")]);
  let parties = vec![mk_party("alice"), mk_party("bob")];
  let privs = txn
    .list_column_constraints(&mk_project("p1"), &[mk_tab("ta"), mk_tab("tb")], &parties)
    .unwrap();
  assert_eq!(privs, vec![mk_priv("p1", "tb", "id", "alice", "PLAINTEXT")]);
  txn.finish(Ok(())).unwrap();
}
