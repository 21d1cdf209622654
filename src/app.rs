use crate::common::{Clock, InterStub};
use crate::config::BrokerConfig;
use crate::error::{BrokerError, Result};
use crate::meta_store::{MetaStore, SessionRecord};
use crate::model::common::JobId;
use crate::model::message::QueryResponse;
use crate::party_mgr::PartyManager;
use crate::session::{CancelToken, ExecuteInfo, Session, SessionRegistry};
use log::info;
use std::sync::Arc;

// -----------------------------------------------------------------------------------------------
//  App
// -----------------------------------------------------------------------------------------------

/// The state of one broker process, shared by every Session, the inter-party service
/// and both GC loops.
pub struct App {
  pub conf: BrokerConfig,
  pub meta_mgr: Arc<dyn MetaStore>,
  pub party_mgr: Arc<dyn PartyManager>,
  pub inter_stub: Arc<dyn InterStub>,
  pub clock: Arc<dyn Clock>,
  pub sessions: SessionRegistry,
}

impl App {
  pub fn new(
    conf: BrokerConfig,
    meta_mgr: Arc<dyn MetaStore>,
    party_mgr: Arc<dyn PartyManager>,
    inter_stub: Arc<dyn InterStub>,
    clock: Arc<dyn Clock>,
  ) -> App {
    App { conf, meta_mgr, party_mgr, inter_stub, clock, sessions: SessionRegistry::new() }
  }

  /// Creates and registers the Session of a submitted query.
  pub fn create_session(
    &self,
    execute_info: ExecuteInfo,
    async_mode: bool,
    callback_host: String,
  ) -> Result<Arc<Session>> {
    let cancel = match self.conf.query_timeout {
      Some(timeout) => {
        CancelToken::with_deadline(self.clock.now().add_millis(timeout.as_millis()))
      }
      None => CancelToken::new(),
    };
    let session = Arc::new(Session::new(
      execute_info,
      self.conf.party_code.clone(),
      async_mode,
      callback_host,
      cancel,
      self.clock.as_ref(),
    ));
    if !self.sessions.insert(session.clone()) {
      return Err(BrokerError::Storage(format!("session {} already exists", session.job_id())));
    }
    Ok(session)
  }

  pub fn get_session(&self, id: &JobId) -> Option<Arc<Session>> {
    self.sessions.get(id)
  }

  /// Drops the in-memory Session and cancels anything it still runs. Idempotent.
  pub fn delete_session(&self, id: &JobId) {
    if self.sessions.delete(id).is_some() {
      info!("session {} deleted", id);
    }
  }

  pub fn persist_session_info(&self, session: &Session) -> Result<()> {
    let state = session.state()?;
    let record = SessionRecord {
      job_id: session.job_id().clone(),
      project_id: session.execute_info.project_id.clone(),
      issuer: session.execute_info.issuer.clone(),
      query: session.execute_info.query.clone(),
      output_names: state.output_names.clone(),
      warning: state.warning.clone(),
      created_at: session.created_at,
      result: None,
    };
    self.meta_mgr.persist_session_info(record).map_err(BrokerError::Storage)
  }

  /// Called when the engine reports the result of an asynchronous run. Returns false if
  /// a result had already been stored for this Session.
  pub fn report_async_result(&self, id: &JobId, result: QueryResponse) -> Result<bool> {
    let session = self
      .sessions
      .get(id)
      .ok_or_else(|| BrokerError::Storage(format!("session {} not found", id)))?;
    if !session.set_result_safely(result.clone()) {
      return Ok(false);
    }
    if session.is_issuer() {
      self.meta_mgr.set_session_result(id, result).map_err(BrokerError::Storage)?;
    }
    Ok(true)
  }
}
