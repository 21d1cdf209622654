use crate::app::App;
use crate::checksum;
use crate::common::{Compiler, EngineClient};
use crate::dispatch::{build_job, Executor};
use crate::error::{BrokerError, Result};
use crate::exchange::{check_checksum, get_checksum_from_issuer, get_checksum_from_other_parties};
use crate::model::common::{Checksum, PartyCode, TableMeta, TableName};
use crate::model::message as msg;
use crate::prepare::{prepare_data, EnginesInfo, PreparedData};
use crate::session::Session;
use crate::sql_refs::collect_used_tables;
use log::{info, warn};
use sqlformat::{FormatOptions, QueryParams};
use std::collections::BTreeMap;
use std::sync::Arc;

#[cfg(test)]
#[path = "test/query_coord_es_test.rs"]
mod query_coord_es_test;

// -----------------------------------------------------------------------------------------------
//  QueryCoordES
// -----------------------------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryCoordS {
  Created,
  Preparing,
  ChecksumExchange,
  Compiling,
  Dispatching,
  Executing,
  Completed,
  Failed,
}

/// Drives the lifecycle of one query at this Party: prepare, checksum, exchange,
/// compile, dispatch, execute. Steps run strictly one after the other.
pub struct QueryCoordES<'a> {
  app: &'a App,
  session: Arc<Session>,
  compiler: &'a dyn Compiler,
  engine: &'a dyn EngineClient,
  state: QueryCoordS,
  /// The snapshot from the last successful preparation.
  prepared: Option<PreparedData>,
}

impl<'a> QueryCoordES<'a> {
  pub fn new(
    app: &'a App,
    session: Arc<Session>,
    compiler: &'a dyn Compiler,
    engine: &'a dyn EngineClient,
  ) -> QueryCoordES<'a> {
    QueryCoordES { app, session, compiler, engine, state: QueryCoordS::Created, prepared: None }
  }

  pub fn state(&self) -> QueryCoordS {
    self.state
  }

  pub fn session(&self) -> &Arc<Session> {
    &self.session
  }

  pub fn engines_info(&self) -> Option<&EnginesInfo> {
    self.prepared.as_ref().map(|p| &p.engines_info)
  }

  pub fn tables(&self) -> &[TableMeta] {
    self.prepared.as_ref().map_or(&[], |p| p.tables.as_slice())
  }

  /// Makes the next `execute` prepare again and re-validate checksums first. Used when
  /// a peer signals that this Party's view of the schema may be stale.
  pub fn request_resync(&self) {
    self.session.request_resync();
  }

  fn prepared(&self) -> Result<&PreparedData> {
    self.prepared.as_ref().ok_or_else(|| BrokerError::Storage("query is not prepared".to_string()))
  }

  /// Resolves `used_tables` and replaces the cached tables, `EnginesInfo` and column
  /// controls. Only the first preparation of a Session asks peers for missing tables.
  /// On failure nothing cached is modified.
  pub fn prepare(&mut self, used_tables: &[TableName]) -> Result<(Vec<PartyCode>, Vec<PartyCode>)> {
    self.state = QueryCoordS::Preparing;
    let ask_peers = self.prepared.is_none();
    let prepared = match prepare_data(self.app, &self.session, used_tables, ask_peers) {
      Ok(prepared) => prepared,
      Err(err) => {
        self.state = QueryCoordS::Failed;
        return Err(err);
      }
    };
    {
      let mut state = self.session.state()?;
      state.data_parties = prepared.data_parties.clone();
      state.work_parties = prepared.work_parties.clone();
    }
    let parties = (prepared.data_parties.clone(), prepared.work_parties.clone());
    self.prepared = Some(prepared);
    Ok(parties)
  }

  /// Computes this Party's checksum of every data party.
  pub fn create_checksum(&self) -> Result<BTreeMap<PartyCode, Checksum>> {
    let prepared = self.prepared()?;
    Ok(checksum::create_checksums(&prepared.data_parties, &prepared.tables, &prepared.ccls))
  }

  pub fn save_local_checksums(&self) -> Result<()> {
    self.session.save_local_checksums(self.create_checksum()?)
  }

  pub fn build_compile_query_request(&self) -> Result<msg::CompileQueryRequest> {
    let prepared = self.prepared()?;
    let info = &self.session.execute_info;
    Ok(msg::CompileQueryRequest {
      query: info.query.clone(),
      db_name: info.project_id.0.clone(),
      issuer: info.issuer.clone(),
      issuer_as_participant: true,
      security_conf: msg::SecurityConfig { column_control_list: prepared.ccls.clone() },
      catalog: build_catalog(&prepared.tables),
      compile_opts: info.compile_opts.clone(),
    })
  }

  fn compile(&mut self) -> Result<msg::CompiledPlan> {
    self.state = QueryCoordS::Compiling;
    let req = self.build_compile_query_request()?;
    self.compiler.compile(&req).map_err(BrokerError::Compile)
  }

  pub fn create_executor(&self, plan: &msg::CompiledPlan) -> Result<Executor> {
    let prepared = self.prepared()?;
    build_job(
      &self.app.conf,
      &self.session,
      &prepared.engines_info,
      self.app.party_mgr.as_ref(),
      self.engine,
      plan,
    )
  }

  fn check_canceled(&self) -> Result<()> {
    if self.session.cancel.is_canceled(self.app.clock.now()) {
      return Err(BrokerError::Cancelled);
    }
    Ok(())
  }

  /// Runs the query to completion. Any error leaves the coordinator in `Failed`.
  pub fn execute(&mut self, used_tables: &[TableName]) -> Result<()> {
    let result = self.execute_inner(used_tables);
    self.state = if result.is_ok() { QueryCoordS::Completed } else { QueryCoordS::Failed };
    result
  }

  fn execute_inner(&mut self, used_tables: &[TableName]) -> Result<()> {
    self.check_canceled()?;
    if self.session.take_resync() {
      info!("ask info has been triggered, get data from storage again");
      self.prepare(used_tables)?;
      self.state = QueryCoordS::ChecksumExchange;
      self.save_local_checksums()?;
      check_checksum(&self.session)?;
    }

    self.check_canceled()?;
    let plan = self.compile()?;
    info!("Execution Plan:\n{}\n", plan.explain.exe_graph_dot);

    self.state = QueryCoordS::Dispatching;
    let executor = self.create_executor(&plan)?;
    {
      let mut state = self.session.state()?;
      state.output_names = executor.output_names.clone();
      state.warning = plan.warning.clone();
    }
    if self.session.is_issuer() {
      // The engine may report failure asynchronously, so the issuer needs a persisted
      // record before it starts.
      self.app.persist_session_info(&self.session).map_err(|e| {
        BrokerError::Storage(format!("runQuery persist session info err: {}", e))
      })?;
    }

    self.check_canceled()?;
    self.state = QueryCoordS::Executing;
    let ret = match executor.run_execution_plan(
      self.engine,
      &self.session.cancel,
      self.session.async_mode,
    ) {
      Ok(ret) => ret,
      Err(_) if self.session.cancel.is_canceled(self.app.clock.now()) => {
        return Err(BrokerError::Cancelled)
      }
      Err(err) => return Err(err),
    };
    match msg::StatusKind::from(&ret.status) {
      msg::StatusKind::Ok => {}
      status => return Err(BrokerError::EngineExecution(format!("status: {:?}", status))),
    }

    // In async mode the result is set by the engine callback.
    if !self.session.async_mode {
      let elapsed = self.app.clock.now().0.saturating_sub(self.session.created_at.0);
      let mut result = msg::QueryResponse {
        status: ret.status,
        out_columns: ret.out_columns,
        affected_rows: ret.affected_rows,
        cost_time_s: elapsed as f64 / 1000.0,
        warnings: vec![],
      };
      if plan.warning.may_affected_by_group_threshold {
        info!("{}", msg::GROUP_THRESHOLD_WARNING);
        result
          .warnings
          .push(msg::SqlWarning { reason: msg::GROUP_THRESHOLD_WARNING.to_string() });
      }
      if self.session.set_result_safely(result.clone()) && self.session.is_issuer() {
        if let Err(err) = self.app.meta_mgr.set_session_result(self.session.job_id(), result) {
          warn!("failed to persist result of job {}: {}", self.session.job_id(), err);
        }
      }
    }
    Ok(())
  }

  /// Checks consistency and compiles, without ever reaching the engine.
  pub fn dry_run(&mut self) -> Result<()> {
    let result = self.dry_run_inner();
    self.state = if result.is_ok() { QueryCoordS::Completed } else { QueryCoordS::Failed };
    result
  }

  fn dry_run_inner(&mut self) -> Result<()> {
    self.state = QueryCoordS::ChecksumExchange;
    check_checksum(&self.session)?;
    self.compile()?;
    Ok(())
  }
}

/// Builds the compiler's catalog. Tables are named `project.table`.
pub fn build_catalog(tables: &[TableMeta]) -> msg::Catalog {
  let mut catalog = msg::Catalog::default();
  for tbl in tables {
    catalog.tables.push(msg::TableEntry {
      table_name: tbl.db_table().to_string(),
      is_view: false,
      ref_table: tbl.table.ref_table.clone(),
      db_type: tbl.table.db_type.clone(),
      owner: tbl.table.owner.clone(),
      columns: tbl
        .columns
        .iter()
        .map(|c| msg::TableEntryColumn { name: c.name.0.clone(), dtype: c.dtype.clone() })
        .collect(),
    });
  }
  catalog
}

// -----------------------------------------------------------------------------------------------
//  run_query
// -----------------------------------------------------------------------------------------------

/// Runs `session` at this Party from scratch: prepare, agree on checksums with the
/// other data parties, then execute.
pub fn run_query(
  app: &App,
  session: Arc<Session>,
  compiler: &dyn Compiler,
  engine: &dyn EngineClient,
) -> Result<()> {
  let info = session.execute_info.clone();
  info!(
    "run query for job {}:\n{}",
    info.job_id,
    sqlformat::format(&info.query, &QueryParams::None, FormatOptions::default())
  );
  let used_tables = collect_used_tables(&info.query)?;

  let mut coord = QueryCoordES::new(app, session.clone(), compiler, engine);
  coord.prepare(&used_tables)?;
  coord.save_local_checksums()?;
  get_checksum_from_other_parties(app, &session, &info.issuer)?;
  get_checksum_from_issuer(app, &session)?;
  // A reported inconsistency is settled by the re-preparation inside `execute`.
  if !session.resync_pending() {
    check_checksum(&session)?;
  }
  coord.execute(&used_tables)
}
