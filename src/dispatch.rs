use crate::common::EngineClient;
use crate::config::BrokerConfig;
use crate::error::{BrokerError, Result};
use crate::model::common::{JobId, Participant, PartyCode};
use crate::model::message as msg;
use crate::party_mgr::PartyManager;
use crate::prepare::EnginesInfo;
use crate::session::{CancelToken, Session};
use std::collections::BTreeMap;

#[cfg(test)]
#[path = "test/dispatch_test.rs"]
mod dispatch_test;

// -----------------------------------------------------------------------------------------------
//  EngineStub
// -----------------------------------------------------------------------------------------------

/// Everything the engine needs to call this broker back about `session_id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineStub {
  pub session_id: JobId,
  pub callback_protocol: String,
  pub callback_host: String,
  pub callback_path: String,
  pub engine_protocol: String,
  pub content_type: String,
  pub party_info: Vec<Participant>,
}

// -----------------------------------------------------------------------------------------------
//  Executor
// -----------------------------------------------------------------------------------------------

/// The runnable job description of this Party for one compiled plan.
#[derive(Debug, Clone)]
pub struct Executor {
  /// Always a single entry, keyed by this Party's code.
  pub plan_reqs: BTreeMap<PartyCode, msg::RunExecutionPlanRequest>,
  /// Only populated for the issuer; other Parties never receive the result.
  pub output_names: Vec<String>,
  pub engine_stub: EngineStub,
  pub job_id: JobId,
}

impl Executor {
  pub fn run_execution_plan(
    &self,
    engine: &dyn EngineClient,
    cancel: &CancelToken,
    async_mode: bool,
  ) -> Result<msg::RunExecutionPlanResponse> {
    let mut plan_reqs = self.plan_reqs.clone();
    for req in plan_reqs.values_mut() {
      req.async_mode = async_mode;
    }
    engine
      .run_execution_plan(&self.engine_stub, &plan_reqs, cancel)
      .map_err(BrokerError::EngineExecution)
  }
}

// -----------------------------------------------------------------------------------------------
//  Execution Dispatcher
// -----------------------------------------------------------------------------------------------

/// Builds this Party's job from `plan`. A party's rank is its position in
/// `plan.parties`, which is what the compiler assumed.
pub fn build_job(
  conf: &BrokerConfig,
  session: &Session,
  engines_info: &EnginesInfo,
  party_mgr: &dyn PartyManager,
  engine: &dyn EngineClient,
  plan: &msg::CompiledPlan,
) -> Result<Executor> {
  let job_id = session.job_id().clone();
  let mut start_params = msg::SessionStartParams {
    party_code: conf.party_code.clone(),
    session_id: job_id.clone(),
    spu_runtime_cfg: plan.spu_runtime_conf.clone(),
    parties: vec![],
  };
  for (i, p) in plan.parties.iter().enumerate() {
    let endpoint = engines_info
      .get_endpoint(p)
      .ok_or_else(|| BrokerError::Dispatch(format!("no engine endpoint for party {}", p)))?;
    let pub_key = party_mgr.get_pub_key_by_party(p).map_err(BrokerError::Dispatch)?;
    start_params.parties.push(msg::SessionParty {
      code: p.clone(),
      name: p.0.clone(),
      rank: i as i32,
      host: endpoint.clone(),
      public_key: pub_key,
    });
  }

  let my_graph = plan
    .sub_graphs
    .get(&conf.party_code)
    .ok_or_else(|| BrokerError::Dispatch(format!("MissingSubgraph: party {}", conf.party_code)))?;

  let req = msg::RunExecutionPlanRequest {
    session_params: start_params,
    graph: my_graph.clone(),
    async_mode: false,
    debug_opts: session.execute_info.debug_opts.clone(),
  };
  let mut plan_reqs = BTreeMap::new();
  plan_reqs.insert(conf.party_code.clone(), req);

  let my_pub_key = party_mgr.get_pub_key_by_party(&conf.party_code).map_err(BrokerError::Dispatch)?;
  let myself = Participant {
    party_code: conf.party_code.clone(),
    endpoints: vec![engine.endpoint_for_self()],
    pub_key: my_pub_key,
  };
  let engine_stub = EngineStub {
    session_id: job_id.clone(),
    callback_protocol: conf.intra_protocol.clone(),
    callback_host: session.callback_host.clone(),
    callback_path: conf.engine_callback_path.clone(),
    engine_protocol: conf.engine_protocol.clone(),
    content_type: conf.engine_content_type.clone(),
    party_info: vec![myself],
  };

  let output_names = if session.is_issuer() {
    plan.schema.columns.iter().map(|c| c.name.clone()).collect()
  } else {
    vec![]
  };

  Ok(Executor { plan_reqs, output_names, engine_stub, job_id })
}
