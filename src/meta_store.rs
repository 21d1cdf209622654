use crate::common::Clock;
use crate::model::common::{
  ColumnPriv, JobId, PartyCode, ProjectId, TableMeta, TableName, Timestamp,
};
use crate::model::message::{CompilerWarning, QueryResponse};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

#[cfg(test)]
#[path = "test/meta_store_test.rs"]
mod meta_store_test;

/// The name of the single row that holds the GC lease.
pub const GC_LOCK_NAME: &str = "gc_lock";

// -----------------------------------------------------------------------------------------------
//  MetaStore
// -----------------------------------------------------------------------------------------------

/// A transaction over project metadata. Writes only become visible once `finish` is
/// called with `Ok`; finishing with `Err` discards them.
pub trait MetaTransaction {
  /// Returns the metadata of every table found, and the names that were not found.
  fn get_table_metas_by_names(
    &mut self,
    project_id: &ProjectId,
    names: &[TableName],
  ) -> Result<(Vec<TableMeta>, Vec<TableName>), String>;

  fn get_project_members(&mut self, project_id: &ProjectId) -> Result<Vec<PartyCode>, String>;

  /// Column privileges on `names` whose destination is one of `parties`.
  fn list_column_constraints(
    &mut self,
    project_id: &ProjectId,
    names: &[TableName],
    parties: &[PartyCode],
  ) -> Result<Vec<ColumnPriv>, String>;

  fn upsert_tables(&mut self, tables: Vec<TableMeta>) -> Result<(), String>;

  fn upsert_column_privs(&mut self, privs: Vec<ColumnPriv>) -> Result<(), String>;

  fn finish(self: Box<Self>, result: Result<(), String>) -> Result<(), String>;
}

/// What the issuer persists about a Session before handing it to the engine.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionRecord {
  pub job_id: JobId,
  pub project_id: ProjectId,
  pub issuer: PartyCode,
  pub query: String,
  pub output_names: Vec<String>,
  pub warning: CompilerWarning,
  pub created_at: Timestamp,
  pub result: Option<QueryResponse>,
}

pub trait MetaStore: Send + Sync {
  fn create_meta_transaction(&self) -> Result<Box<dyn MetaTransaction + '_>, String>;

  /// Creates the GC lease row if it does not exist.
  fn init_gc_lock_if_necessary(&self) -> Result<(), String>;

  /// Acquires or renews the GC lease for `owner` until `now + ttl`. Fails if another
  /// owner holds an unexpired lease.
  fn hold_gc_lock(&self, owner: &str, ttl: Duration) -> Result<(), String>;

  /// Deletes persisted Sessions older than `expire`, returning how many were removed.
  fn clear_expired_results(&self, expire: Duration) -> Result<usize, String>;

  /// The subset of `ids` that were canceled.
  fn check_id_canceled(&self, ids: &[JobId]) -> Result<Vec<JobId>, String>;

  fn cancel_session(&self, id: &JobId) -> Result<(), String>;

  fn persist_session_info(&self, record: SessionRecord) -> Result<(), String>;

  fn set_session_result(&self, id: &JobId, result: QueryResponse) -> Result<(), String>;

  fn get_session_record(&self, id: &JobId) -> Result<Option<SessionRecord>, String>;
}

// -----------------------------------------------------------------------------------------------
//  MemMetaStore
// -----------------------------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct GcLease {
  owner: String,
  expire_at: Timestamp,
}

#[derive(Debug, Clone, Default)]
struct MetaData {
  members: BTreeMap<ProjectId, BTreeSet<PartyCode>>,
  tables: BTreeMap<(ProjectId, TableName), TableMeta>,
  column_privs: Vec<ColumnPriv>,
}

#[derive(Debug, Default)]
struct RuntimeData {
  /// Lease rows keyed by lock name.
  locks: BTreeMap<String, Option<GcLease>>,
  sessions: BTreeMap<JobId, SessionRecord>,
  canceled: BTreeSet<JobId>,
}

/// An in-memory `MetaStore`. Transactions are serialized by holding the metadata
/// lock for their whole lifetime.
pub struct MemMetaStore {
  clock: Arc<dyn Clock>,
  meta: Mutex<MetaData>,
  runtime: Mutex<RuntimeData>,
}

impl MemMetaStore {
  pub fn new(clock: Arc<dyn Clock>) -> MemMetaStore {
    MemMetaStore { clock, meta: Default::default(), runtime: Default::default() }
  }

  pub fn add_project_member(
    &self,
    project_id: &ProjectId,
    party: &PartyCode,
  ) -> Result<(), String> {
    let mut meta = self.meta.lock().map_err(|e| e.to_string())?;
    meta.members.entry(project_id.clone()).or_default().insert(party.clone());
    Ok(())
  }

  fn runtime(&self) -> Result<MutexGuard<'_, RuntimeData>, String> {
    self.runtime.lock().map_err(|e| e.to_string())
  }
}

struct MemMetaTransaction<'a> {
  committed: MutexGuard<'a, MetaData>,
  /// A copy of `committed` taken at the first write.
  staged: Option<MetaData>,
}

impl<'a> MemMetaTransaction<'a> {
  fn view(&self) -> &MetaData {
    self.staged.as_ref().unwrap_or(&*self.committed)
  }

  fn staged(&mut self) -> &mut MetaData {
    let committed = &self.committed;
    self.staged.get_or_insert_with(|| MetaData::clone(committed))
  }
}

impl<'a> MetaTransaction for MemMetaTransaction<'a> {
  fn get_table_metas_by_names(
    &mut self,
    project_id: &ProjectId,
    names: &[TableName],
  ) -> Result<(Vec<TableMeta>, Vec<TableName>), String> {
    let mut found = Vec::<TableMeta>::new();
    let mut not_found = Vec::<TableName>::new();
    for name in names {
      match self.view().tables.get(&(project_id.clone(), name.clone())) {
        Some(meta) => found.push(meta.clone()),
        None => not_found.push(name.clone()),
      }
    }
    Ok((found, not_found))
  }

  fn get_project_members(&mut self, project_id: &ProjectId) -> Result<Vec<PartyCode>, String> {
    match self.view().members.get(project_id) {
      Some(members) => Ok(members.iter().cloned().collect()),
      None => Err(format!("project {:?} not found", project_id.0)),
    }
  }

  fn list_column_constraints(
    &mut self,
    project_id: &ProjectId,
    names: &[TableName],
    parties: &[PartyCode],
  ) -> Result<Vec<ColumnPriv>, String> {
    Ok(
      self
        .view()
        .column_privs
        .iter()
        .filter(|p| {
          &p.project_id == project_id
            && names.contains(&p.table_name)
            && parties.contains(&p.dest_party)
        })
        .cloned()
        .collect(),
    )
  }

  fn upsert_tables(&mut self, tables: Vec<TableMeta>) -> Result<(), String> {
    let staged = self.staged();
    for table in tables {
      let key = (table.table.project_id.clone(), table.table.table_name.clone());
      staged.tables.insert(key, table);
    }
    Ok(())
  }

  fn upsert_column_privs(&mut self, privs: Vec<ColumnPriv>) -> Result<(), String> {
    let staged = self.staged();
    for new_priv in privs {
      staged.column_privs.retain(|p| {
        !(p.project_id == new_priv.project_id
          && p.table_name == new_priv.table_name
          && p.column_name == new_priv.column_name
          && p.dest_party == new_priv.dest_party)
      });
      staged.column_privs.push(new_priv);
    }
    Ok(())
  }

  fn finish(mut self: Box<Self>, result: Result<(), String>) -> Result<(), String> {
    if result.is_ok() {
      if let Some(staged) = self.staged.take() {
        *self.committed = staged;
      }
    }
    result
  }
}

impl MetaStore for MemMetaStore {
  fn create_meta_transaction(&self) -> Result<Box<dyn MetaTransaction + '_>, String> {
    let committed = self.meta.lock().map_err(|e| e.to_string())?;
    Ok(Box::new(MemMetaTransaction { committed, staged: None }))
  }

  fn init_gc_lock_if_necessary(&self) -> Result<(), String> {
    let mut runtime = self.runtime()?;
    runtime.locks.entry(GC_LOCK_NAME.to_string()).or_insert(None);
    Ok(())
  }

  fn hold_gc_lock(&self, owner: &str, ttl: Duration) -> Result<(), String> {
    let now = self.clock.now();
    let mut runtime = self.runtime()?;
    let row = runtime.locks.entry(GC_LOCK_NAME.to_string()).or_insert(None);
    if let Some(lease) = row {
      if lease.owner != owner && lease.expire_at > now {
        return Err(format!("gc lock is held by {} until {:?}", lease.owner, lease.expire_at));
      }
    }
    *row = Some(GcLease { owner: owner.to_string(), expire_at: now.add_millis(ttl.as_millis()) });
    Ok(())
  }

  fn clear_expired_results(&self, expire: Duration) -> Result<usize, String> {
    let now = self.clock.now();
    let mut runtime = self.runtime()?;
    let before = runtime.sessions.len();
    runtime.sessions.retain(|_, record| record.created_at.add_millis(expire.as_millis()) > now);
    Ok(before - runtime.sessions.len())
  }

  fn check_id_canceled(&self, ids: &[JobId]) -> Result<Vec<JobId>, String> {
    let runtime = self.runtime()?;
    Ok(ids.iter().filter(|id| runtime.canceled.contains(id)).cloned().collect())
  }

  fn cancel_session(&self, id: &JobId) -> Result<(), String> {
    self.runtime()?.canceled.insert(id.clone());
    Ok(())
  }

  fn persist_session_info(&self, record: SessionRecord) -> Result<(), String> {
    self.runtime()?.sessions.insert(record.job_id.clone(), record);
    Ok(())
  }

  fn set_session_result(&self, id: &JobId, result: QueryResponse) -> Result<(), String> {
    match self.runtime()?.sessions.get_mut(id) {
      Some(record) => {
        record.result = Some(result);
        Ok(())
      }
      None => Err(format!("session {} not persisted", id)),
    }
  }

  fn get_session_record(&self, id: &JobId) -> Result<Option<SessionRecord>, String> {
    Ok(self.runtime()?.sessions.get(id).cloned())
  }
}
