use crate::common::Clock;
use crate::error::{BrokerError, Result};
use crate::model::common::{
  Checksum, ChecksumCompareResult, JobId, PartyCode, ProjectId, Timestamp,
};
use crate::model::message::{CompileOptions, CompilerWarning, DebugOptions, QueryResponse};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

#[cfg(test)]
#[path = "test/session_test.rs"]
mod session_test;

// -----------------------------------------------------------------------------------------------
//  CancelToken
// -----------------------------------------------------------------------------------------------

/// A cancellation context shared between a Session, the registry that owns it, and the
/// engine call it is forwarded to. An optional deadline also counts as cancellation.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
  canceled: Arc<AtomicBool>,
  deadline: Option<Timestamp>,
}

impl CancelToken {
  pub fn new() -> CancelToken {
    CancelToken::default()
  }

  pub fn with_deadline(deadline: Timestamp) -> CancelToken {
    CancelToken { canceled: Default::default(), deadline: Some(deadline) }
  }

  pub fn cancel(&self) {
    self.canceled.store(true, Ordering::SeqCst);
  }

  pub fn is_canceled(&self, now: Timestamp) -> bool {
    self.canceled.load(Ordering::SeqCst) || self.deadline.map_or(false, |d| now >= d)
  }
}

// -----------------------------------------------------------------------------------------------
//  Checksums
// -----------------------------------------------------------------------------------------------

/// Checksums per data party. `local` holds what this Party computed for each data
/// party; `remote` holds what each data party computed for itself.
#[derive(Debug, Default)]
pub struct ChecksumCache {
  local: BTreeMap<PartyCode, Checksum>,
  remote: BTreeMap<PartyCode, Checksum>,
  /// Set once this Party computed its checksums for the query. Peers are not
  /// answered before that.
  ready: bool,
}

impl ChecksumCache {
  pub fn compare_checksum_for(&self, party: &PartyCode) -> Result<ChecksumCompareResult> {
    let local = self.local.get(party).ok_or_else(|| {
      BrokerError::Storage(format!("local checksum for party {} not found", party))
    })?;
    let remote = self.remote.get(party).ok_or_else(|| {
      BrokerError::Storage(format!("remote checksum for party {} not found", party))
    })?;
    Ok(remote.compare_with(local))
  }
}

// -----------------------------------------------------------------------------------------------
//  Session
// -----------------------------------------------------------------------------------------------

/// The immutable description of a query, fixed at submission.
#[derive(Debug, Clone)]
pub struct ExecuteInfo {
  pub project_id: ProjectId,
  pub job_id: JobId,
  pub issuer: PartyCode,
  pub query: String,
  pub compile_opts: CompileOptions,
  pub debug_opts: DebugOptions,
}

/// The mutable state a Session accumulates while it is being coordinated.
#[derive(Debug, Default)]
pub struct SessionState {
  pub data_parties: Vec<PartyCode>,
  pub work_parties: Vec<PartyCode>,
  pub checksums: ChecksumCache,
  pub output_names: Vec<String>,
  pub warning: CompilerWarning,
}

#[derive(Debug)]
pub struct Session {
  pub execute_info: ExecuteInfo,
  pub self_party: PartyCode,
  pub async_mode: bool,
  pub created_at: Timestamp,
  /// The host the engine should report asynchronous results to.
  pub callback_host: String,
  pub cancel: CancelToken,
  state: Mutex<SessionState>,
  /// Set by collaborators that detected schema drift; consumed by the coordinator.
  resync: AtomicBool,
  /// Written at most once, by whichever of sync completion or async callback comes first.
  result: Mutex<Option<QueryResponse>>,
}

impl Session {
  pub fn new(
    execute_info: ExecuteInfo,
    self_party: PartyCode,
    async_mode: bool,
    callback_host: String,
    cancel: CancelToken,
    clock: &dyn Clock,
  ) -> Session {
    Session {
      execute_info,
      self_party,
      async_mode,
      created_at: clock.now(),
      callback_host,
      cancel,
      state: Default::default(),
      resync: AtomicBool::new(false),
      result: Mutex::new(None),
    }
  }

  pub fn job_id(&self) -> &JobId {
    &self.execute_info.job_id
  }

  pub fn is_issuer(&self) -> bool {
    self.self_party == self.execute_info.issuer
  }

  pub fn state(&self) -> Result<MutexGuard<'_, SessionState>> {
    self.state.lock().map_err(|e| BrokerError::Storage(e.to_string()))
  }

  pub fn data_parties(&self) -> Result<Vec<PartyCode>> {
    Ok(self.state()?.data_parties.clone())
  }

  pub fn save_local_checksum(&self, party: PartyCode, checksum: Checksum) -> Result<()> {
    self.state()?.checksums.local.insert(party, checksum);
    Ok(())
  }

  /// Replaces this Party's checksums with those of the latest preparation, and marks the
  /// Session ready to answer its peers.
  pub fn save_local_checksums(&self, checksums: BTreeMap<PartyCode, Checksum>) -> Result<()> {
    let mut state = self.state()?;
    state.checksums.local = checksums;
    state.checksums.ready = true;
    Ok(())
  }

  pub fn checksums_ready(&self) -> Result<bool> {
    Ok(self.state()?.checksums.ready)
  }

  pub fn save_remote_checksum(&self, party: PartyCode, checksum: Checksum) -> Result<()> {
    self.state()?.checksums.remote.insert(party, checksum);
    Ok(())
  }

  pub fn get_local_checksum(&self, party: &PartyCode) -> Result<Checksum> {
    let state = self.state()?;
    state.checksums.local.get(party).cloned().ok_or_else(|| {
      BrokerError::Storage(format!("local checksum for party {} not found", party))
    })
  }

  pub fn compare_checksum_for(&self, party: &PartyCode) -> Result<ChecksumCompareResult> {
    self.state()?.checksums.compare_checksum_for(party)
  }

  /// Asks the coordinator to prepare this Session again before it continues.
  pub fn request_resync(&self) {
    self.resync.store(true, Ordering::SeqCst);
  }

  pub fn resync_pending(&self) -> bool {
    self.resync.load(Ordering::SeqCst)
  }

  /// Consumes a pending resync request.
  pub fn take_resync(&self) -> bool {
    self.resync.swap(false, Ordering::SeqCst)
  }

  /// Returns whether this call stored the result. Only the first writer wins.
  pub fn set_result_safely(&self, result: QueryResponse) -> bool {
    match self.result.lock() {
      Ok(mut slot) if slot.is_none() => {
        *slot = Some(result);
        true
      }
      _ => false,
    }
  }

  pub fn get_result(&self) -> Option<QueryResponse> {
    self.result.lock().ok().and_then(|slot| slot.clone())
  }
}

// -----------------------------------------------------------------------------------------------
//  SessionRegistry
// -----------------------------------------------------------------------------------------------

/// The in-memory Sessions of this broker. The coordinator keeps its own `Arc`, so a
/// deletion here never invalidates a Session that is still running.
#[derive(Debug, Default)]
pub struct SessionRegistry {
  sessions: Mutex<BTreeMap<JobId, Arc<Session>>>,
}

impl SessionRegistry {
  pub fn new() -> SessionRegistry {
    SessionRegistry::default()
  }

  fn sessions(&self) -> MutexGuard<'_, BTreeMap<JobId, Arc<Session>>> {
    // A poisoned map is still structurally valid.
    self.sessions.lock().unwrap_or_else(|e| e.into_inner())
  }

  /// Returns false if a Session with the same `JobId` already exists.
  pub fn insert(&self, session: Arc<Session>) -> bool {
    let mut sessions = self.sessions();
    if sessions.contains_key(session.job_id()) {
      return false;
    }
    sessions.insert(session.job_id().clone(), session);
    true
  }

  pub fn get(&self, id: &JobId) -> Option<Arc<Session>> {
    self.sessions().get(id).cloned()
  }

  /// Removes the Session and signals its cancellation. Deleting an absent id is a no-op.
  pub fn delete(&self, id: &JobId) -> Option<Arc<Session>> {
    let removed = self.sessions().remove(id);
    if let Some(session) = &removed {
      session.cancel.cancel();
    }
    removed
  }

  /// A snapshot of the current ids; the lock is not held after returning.
  pub fn ids(&self) -> Vec<JobId> {
    self.sessions().keys().cloned().collect()
  }

  pub fn len(&self) -> usize {
    self.sessions().len()
  }
}
