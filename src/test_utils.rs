use crate::app::App;
use crate::common::{Clock, Compiler, EngineClient, InterStub};
use crate::config::BrokerConfig;
use crate::dispatch::EngineStub;
use crate::inter_service;
use crate::meta_store::{MemMetaStore, MetaStore};
use crate::model::common::{
  ColName, ColumnMeta, ColumnPriv, JobId, PartyCode, ProjectId, TableIdentity, TableMeta,
  TableName, Timestamp,
};
use crate::model::message as msg;
use crate::party_mgr::{PartyEntry, StaticPartyManager};
use crate::session::{CancelToken, ExecuteInfo};
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

// -----------------------------------------------------------------------------------------------
//  Constructors
// -----------------------------------------------------------------------------------------------

pub fn mk_party(code: &str) -> PartyCode {
  PartyCode(code.to_string())
}

pub fn mk_project(id: &str) -> ProjectId {
  ProjectId(id.to_string())
}

pub fn mk_tab(name: &str) -> TableName {
  TableName(name.to_string())
}

pub fn mk_jid(id: &str) -> JobId {
  JobId(id.to_string())
}

pub fn broker_url(code: &str) -> String {
  format!("broker.{}:8080", code)
}

pub fn engine_endpoint(code: &str) -> String {
  format!("engine.{}:8003", code)
}

pub fn pub_key(code: &str) -> String {
  format!("pk_{}", code)
}

/// A table of `owner` whose physical table is `db_<owner>.<name>` in MySQL.
pub fn mk_table(project: &str, name: &str, owner: &str, cols: &[(&str, &str)]) -> TableMeta {
  TableMeta {
    table: TableIdentity {
      project_id: mk_project(project),
      table_name: mk_tab(name),
      owner: mk_party(owner),
      ref_table: format!("db_{}.{}", owner, name),
      db_type: "mysql".to_string(),
    },
    columns: cols
      .iter()
      .map(|(name, dtype)| ColumnMeta { name: ColName(name.to_string()), dtype: dtype.to_string() })
      .collect(),
  }
}

pub fn mk_priv(project: &str, table: &str, col: &str, dest: &str, priv_: &str) -> ColumnPriv {
  ColumnPriv {
    project_id: mk_project(project),
    table_name: mk_tab(table),
    column_name: ColName(col.to_string()),
    dest_party: mk_party(dest),
    priv_: priv_.to_string(),
  }
}

pub fn mk_execute_info(project: &str, job: &str, issuer: &str, query: &str) -> ExecuteInfo {
  ExecuteInfo {
    project_id: mk_project(project),
    job_id: mk_jid(job),
    issuer: mk_party(issuer),
    query: query.to_string(),
    compile_opts: Default::default(),
    debug_opts: Default::default(),
  }
}

/// A plan with one sub-graph per party and the given output columns.
pub fn mk_plan(parties: &[&str], out_cols: &[&str]) -> msg::CompiledPlan {
  let mut plan = msg::CompiledPlan::default();
  for p in parties {
    plan.parties.push(mk_party(p));
    let node = msg::ExecNode { name: format!("node_{}", p), op_type: "RunSQL".to_string() };
    plan.sub_graphs.insert(mk_party(p), msg::ExecutionGraph { nodes: vec![node] });
  }
  for c in out_cols {
    plan.schema.columns.push(msg::ColumnDesc { name: c.to_string(), dtype: "int".to_string() });
  }
  plan.explain.exe_graph_dot = "digraph G {}".to_string();
  plan
}

pub fn ok_exec_response() -> msg::RunExecutionPlanResponse {
  msg::RunExecutionPlanResponse {
    status: msg::Status::ok(),
    out_columns: vec![msg::Tensor {
      name: "c".to_string(),
      dtype: "int".to_string(),
      data: vec!["1".to_string()],
    }],
    affected_rows: 0,
  }
}

pub fn mk_status_response(code: i32) -> msg::ExchangeJobInfoResponse {
  msg::ExchangeJobInfoResponse {
    status: Some(msg::Status::new(code, String::new())),
    expected_server_checksum: None,
  }
}

// -----------------------------------------------------------------------------------------------
//  MockClock
// -----------------------------------------------------------------------------------------------

pub type SleepHook = Arc<dyn Fn() + Send + Sync>;

/// A clock that only moves when slept on or advanced. Every sleep is recorded, and then
/// runs the hook if one is set, which lets a test act while a caller waits.
pub struct MockClock {
  now: Mutex<Timestamp>,
  sleeps: Mutex<Vec<Duration>>,
  hook: Mutex<Option<SleepHook>>,
}

impl MockClock {
  pub fn new(start: u128) -> MockClock {
    MockClock {
      now: Mutex::new(Timestamp(start)),
      sleeps: Mutex::new(vec![]),
      hook: Mutex::new(None),
    }
  }

  pub fn on_sleep(&self, hook: SleepHook) {
    *self.hook.lock().unwrap() = Some(hook);
  }

  pub fn advance(&self, duration: Duration) {
    let mut now = self.now.lock().unwrap();
    *now = now.add_millis(duration.as_millis());
  }

  pub fn sleeps(&self) -> Vec<Duration> {
    self.sleeps.lock().unwrap().clone()
  }
}

impl Clock for MockClock {
  fn now(&self) -> Timestamp {
    *self.now.lock().unwrap()
  }

  fn sleep(&self, duration: Duration) {
    self.sleeps.lock().unwrap().push(duration);
    self.advance(duration);
    // The lock is released before the hook runs, since the hook may sleep too.
    let hook = self.hook.lock().unwrap().clone();
    if let Some(hook) = hook {
      hook();
    }
  }
}

// -----------------------------------------------------------------------------------------------
//  MockInterStub
// -----------------------------------------------------------------------------------------------

/// Delivers inter-party requests straight to the `App` registered for the url. Scripted
/// `ExchangeJobInfo` results take precedence over routing, in order.
#[derive(Default)]
pub struct MockInterStub {
  peers: Mutex<BTreeMap<String, Weak<App>>>,
  scripted_exchange: Mutex<VecDeque<Result<msg::ExchangeJobInfoResponse, String>>>,
  calls: Mutex<Vec<(String, msg::InterRequest)>>,
}

impl MockInterStub {
  pub fn new() -> MockInterStub {
    MockInterStub::default()
  }

  pub fn register(&self, url: String, app: &Arc<App>) {
    self.peers.lock().unwrap().insert(url, Arc::downgrade(app));
  }

  pub fn script_exchange(&self, result: Result<msg::ExchangeJobInfoResponse, String>) {
    self.scripted_exchange.lock().unwrap().push_back(result);
  }

  pub fn calls(&self) -> Vec<(String, msg::InterRequest)> {
    self.calls.lock().unwrap().clone()
  }

  pub fn exchange_calls(&self) -> Vec<(String, msg::ExchangeJobInfoRequest)> {
    let mut exchanges = Vec::new();
    for (url, req) in self.calls() {
      if let msg::InterRequest::ExchangeJobInfo(req) = req {
        exchanges.push((url, req));
      }
    }
    exchanges
  }

  fn route(&self, url: &str, req: msg::InterRequest) -> Result<msg::InterResponse, String> {
    self.calls.lock().unwrap().push((url.to_string(), req.clone()));
    let peer = self.peers.lock().unwrap().get(url).and_then(|app| app.upgrade());
    match peer {
      Some(app) => Ok(inter_service::handle(&app, req)),
      None => Err(format!("connection refused: {}", url)),
    }
  }
}

impl InterStub for MockInterStub {
  fn exchange_job_info(
    &self,
    url: &str,
    req: &msg::ExchangeJobInfoRequest,
  ) -> Result<msg::ExchangeJobInfoResponse, String> {
    let scripted = self.scripted_exchange.lock().unwrap().pop_front();
    if let Some(result) = scripted {
      let req = msg::InterRequest::ExchangeJobInfo(req.clone());
      self.calls.lock().unwrap().push((url.to_string(), req));
      return result;
    }
    let resp = self.route(url, msg::InterRequest::ExchangeJobInfo(req.clone()))?;
    cast!(msg::InterResponse::ExchangeJobInfo, resp).map_err(|e| e.to_string())
  }

  fn ask_info(&self, url: &str, req: &msg::AskInfoRequest) -> Result<msg::AskInfoResponse, String> {
    let resp = self.route(url, msg::InterRequest::AskInfo(req.clone()))?;
    cast!(msg::InterResponse::AskInfo, resp).map_err(|e| e.to_string())
  }

  fn sync_info(
    &self,
    url: &str,
    req: &msg::SyncInfoRequest,
  ) -> Result<msg::SyncInfoResponse, String> {
    let resp = self.route(url, msg::InterRequest::SyncInfo(req.clone()))?;
    cast!(msg::InterResponse::SyncInfo, resp).map_err(|e| e.to_string())
  }
}

// -----------------------------------------------------------------------------------------------
//  MockCompiler
// -----------------------------------------------------------------------------------------------

/// Returns a fixed plan (or error) and records every request it was given.
pub struct MockCompiler {
  result: Mutex<Result<msg::CompiledPlan, String>>,
  requests: Mutex<Vec<msg::CompileQueryRequest>>,
}

impl MockCompiler {
  pub fn new(result: Result<msg::CompiledPlan, String>) -> MockCompiler {
    MockCompiler { result: Mutex::new(result), requests: Mutex::new(vec![]) }
  }

  pub fn requests(&self) -> Vec<msg::CompileQueryRequest> {
    self.requests.lock().unwrap().clone()
  }
}

impl Compiler for MockCompiler {
  fn compile(&self, req: &msg::CompileQueryRequest) -> Result<msg::CompiledPlan, String> {
    self.requests.lock().unwrap().push(req.clone());
    self.result.lock().unwrap().clone()
  }
}

// -----------------------------------------------------------------------------------------------
//  MockEngine
// -----------------------------------------------------------------------------------------------

pub type EngineProbe = Box<dyn Fn(&EngineStub) + Send + Sync>;

/// Returns a fixed response (or error) and records every run. An optional probe is
/// invoked at the start of every run.
pub struct MockEngine {
  result: Mutex<Result<msg::RunExecutionPlanResponse, String>>,
  runs: Mutex<Vec<(EngineStub, BTreeMap<PartyCode, msg::RunExecutionPlanRequest>)>>,
  probe: Option<EngineProbe>,
}

impl MockEngine {
  pub fn new(result: Result<msg::RunExecutionPlanResponse, String>) -> MockEngine {
    MockEngine { result: Mutex::new(result), runs: Mutex::new(vec![]), probe: None }
  }

  pub fn with_probe(mut self, probe: EngineProbe) -> MockEngine {
    self.probe = Some(probe);
    self
  }

  pub fn runs(&self) -> Vec<(EngineStub, BTreeMap<PartyCode, msg::RunExecutionPlanRequest>)> {
    self.runs.lock().unwrap().clone()
  }
}

impl EngineClient for MockEngine {
  fn run_execution_plan(
    &self,
    stub: &EngineStub,
    reqs: &BTreeMap<PartyCode, msg::RunExecutionPlanRequest>,
    _cancel: &CancelToken,
  ) -> Result<msg::RunExecutionPlanResponse, String> {
    if let Some(probe) = &self.probe {
      probe(stub);
    }
    self.runs.lock().unwrap().push((stub.clone(), reqs.clone()));
    self.result.lock().unwrap().clone()
  }

  fn endpoint_for_self(&self) -> String {
    "engine.self:8003".to_string()
  }
}

// -----------------------------------------------------------------------------------------------
//  TestNet
// -----------------------------------------------------------------------------------------------

/// Brokers of several Parties of one project, each with its own `MemMetaStore`, that
/// reach each other through a shared `MockInterStub`.
pub struct TestNet {
  pub clock: Arc<MockClock>,
  pub stub: Arc<MockInterStub>,
  pub apps: BTreeMap<PartyCode, Arc<App>>,
  pub stores: BTreeMap<PartyCode, Arc<MemMetaStore>>,
}

pub fn mk_party_mgr(parties: &[&str]) -> StaticPartyManager {
  let mut party_mgr = StaticPartyManager::new();
  for p in parties {
    party_mgr.add_party(
      mk_party(p),
      PartyEntry {
        broker_url: broker_url(p),
        engine_endpoint: engine_endpoint(p),
        pub_key: pub_key(p),
      },
    );
  }
  party_mgr
}

impl TestNet {
  pub fn new(project: &str, parties: &[&str]) -> TestNet {
    TestNet::with_conf(project, parties, |_| {})
  }

  /// Like `new`, but `adjust` can change each broker's config before it is built.
  pub fn with_conf<F: Fn(&mut BrokerConfig)>(
    project: &str,
    parties: &[&str],
    adjust: F,
  ) -> TestNet {
    let clock = Arc::new(MockClock::new(1_000_000));
    let stub = Arc::new(MockInterStub::new());
    let mut apps = BTreeMap::new();
    let mut stores = BTreeMap::new();
    for p in parties {
      let store = Arc::new(MemMetaStore::new(clock.clone()));
      for member in parties {
        store.add_project_member(&mk_project(project), &mk_party(member)).unwrap();
      }
      let mut conf = BrokerConfig::new(mk_party(p));
      adjust(&mut conf);
      let app = Arc::new(App::new(
        conf,
        store.clone(),
        Arc::new(mk_party_mgr(parties)),
        stub.clone(),
        clock.clone(),
      ));
      stub.register(broker_url(p), &app);
      apps.insert(mk_party(p), app);
      stores.insert(mk_party(p), store);
    }
    TestNet { clock, stub, apps, stores }
  }

  pub fn app(&self, party: &str) -> &Arc<App> {
    self.apps.get(&mk_party(party)).unwrap()
  }

  pub fn store(&self, party: &str) -> &Arc<MemMetaStore> {
    self.stores.get(&mk_party(party)).unwrap()
  }

  /// Stores `tables` and `privs` in the metadata store of each party in `holders`.
  pub fn add_meta(&self, holders: &[&str], tables: Vec<TableMeta>, privs: Vec<ColumnPriv>) {
    for h in holders {
      let mut txn = self.store(h).create_meta_transaction().unwrap();
      txn.upsert_tables(tables.clone()).unwrap();
      txn.upsert_column_privs(privs.clone()).unwrap();
      txn.finish(Ok(())).unwrap();
    }
  }
}
