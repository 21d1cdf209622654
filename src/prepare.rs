use crate::app::App;
use crate::common::{slice_dedup, subtraction};
use crate::error::{BrokerError, Result};
use crate::model::common::{
  ColumnControl, ColumnPriv, DbTable, DbType, Participant, PartyCode, ProjectId, TableMeta,
  TableName,
};
use crate::model::message as msg;
use crate::session::Session;
use log::{debug, warn};
use std::collections::BTreeMap;

#[cfg(test)]
#[path = "test/prepare_test.rs"]
mod prepare_test;

// -----------------------------------------------------------------------------------------------
//  EnginesInfo
// -----------------------------------------------------------------------------------------------

/// Which tables each Party owns for one query, the physical table each one refers to,
/// and the engine identity of every work party.
#[derive(Debug, Clone, Default)]
pub struct EnginesInfo {
  participants: BTreeMap<PartyCode, Participant>,
  party_to_tables: BTreeMap<PartyCode, Vec<DbTable>>,
  table_to_refs: BTreeMap<DbTable, DbTable>,
}

impl EnginesInfo {
  pub fn new(
    participants: Vec<Participant>,
    party_to_tables: BTreeMap<PartyCode, Vec<DbTable>>,
  ) -> EnginesInfo {
    EnginesInfo {
      participants: participants.into_iter().map(|p| (p.party_code.clone(), p)).collect(),
      party_to_tables,
      table_to_refs: BTreeMap::new(),
    }
  }

  pub fn update_table_to_refs(&mut self, table_to_refs: BTreeMap<DbTable, DbTable>) {
    self.table_to_refs.extend(table_to_refs);
  }

  pub fn get_tables_by_party(&self, party: &PartyCode) -> Vec<DbTable> {
    self.party_to_tables.get(party).cloned().unwrap_or_default()
  }

  pub fn get_ref_table(&self, table: &DbTable) -> Option<&DbTable> {
    self.table_to_refs.get(table)
  }

  pub fn get_participant(&self, party: &PartyCode) -> Option<&Participant> {
    self.participants.get(party)
  }

  /// The first engine endpoint registered for `party`.
  pub fn get_endpoint(&self, party: &PartyCode) -> Option<&String> {
    self.participants.get(party).and_then(|p| p.endpoints.first())
  }
}

// -----------------------------------------------------------------------------------------------
//  Schema Preparer
// -----------------------------------------------------------------------------------------------

/// The result of a successful preparation. Nothing of it is committed to the coordinator
/// until preparation as a whole succeeded.
#[derive(Debug, Clone)]
pub struct PreparedData {
  pub tables: Vec<TableMeta>,
  pub engines_info: EnginesInfo,
  pub ccls: Vec<ColumnControl>,
  /// Sorted and deduplicated owners of `tables`.
  pub data_parties: Vec<PartyCode>,
  /// `data_parties` plus the issuer, sorted and deduplicated.
  pub work_parties: Vec<PartyCode>,
}

/// Resolves `used_tables` into full metadata. If some are missing locally and
/// `ask_peers` is set, every other project member is asked to push them first.
pub fn prepare_data(
  app: &App,
  session: &Session,
  used_tables: &[TableName],
  ask_peers: bool,
) -> Result<PreparedData> {
  let info = &session.execute_info;
  let project_id = &info.project_id;

  let mut txn = app.meta_mgr.create_meta_transaction().map_err(BrokerError::Storage)?;
  let (mut tables, mut not_found) =
    txn.get_table_metas_by_names(project_id, used_tables).map_err(BrokerError::Storage)?;
  if !not_found.is_empty() && ask_peers {
    let members = txn.get_project_members(project_id).map_err(BrokerError::Storage)?;
    // The peers' answers are written in their own transaction, so release this one.
    txn.finish(Ok(())).map_err(BrokerError::Storage)?;
    let targets = subtraction(&members, &[app.conf.party_code.clone()]);
    if let Err(err) = ask_project_info_from_parties(app, project_id, &not_found, &targets) {
      warn!("prepareData: get not found tables {:?} err: {}", not_found, err);
    }

    txn = app.meta_mgr.create_meta_transaction().map_err(BrokerError::Storage)?;
    let (retried_tables, retried_not_found) =
      txn.get_table_metas_by_names(project_id, used_tables).map_err(BrokerError::Storage)?;
    tables = retried_tables;
    not_found = retried_not_found;
  }
  if !not_found.is_empty() {
    let names = not_found.into_iter().map(|t| t.0).collect();
    return Err(BrokerError::TableNotFound(names));
  }

  let mut owners = Vec::<PartyCode>::new();
  let mut party_to_tables = BTreeMap::<PartyCode, Vec<DbTable>>::new();
  let mut table_to_refs = BTreeMap::<DbTable, DbTable>::new();
  for t in &tables {
    let owner = &t.table.owner;
    owners.push(owner.clone());
    // The project id is used as the database name.
    let db_table = t.db_table();
    party_to_tables.entry(owner.clone()).or_default().push(db_table.clone());
    let mut ref_table = DbTable::from_ref(&t.table.ref_table).map_err(BrokerError::Storage)?;
    ref_table.db_type = DbType::parse(&t.table.db_type).map_err(BrokerError::Storage)?;
    table_to_refs.insert(db_table, ref_table);
  }

  let data_parties = slice_dedup(owners);
  let mut work_parties = data_parties.clone();
  work_parties.push(info.issuer.clone());
  let work_parties = slice_dedup(work_parties);

  let participants =
    app.party_mgr.get_party_info_by_parties(&work_parties).map_err(BrokerError::Storage)?;
  let mut engines_info = EnginesInfo::new(participants, party_to_tables);
  engines_info.update_table_to_refs(table_to_refs);

  let column_privs = txn
    .list_column_constraints(project_id, used_tables, &work_parties)
    .map_err(BrokerError::Storage)?;
  let ccls = column_privs.iter().map(ColumnControl::from_priv).collect();
  txn.finish(Ok(())).map_err(BrokerError::Storage)?;

  debug!("prepared job {} with data parties {:?}", info.job_id, data_parties);
  Ok(PreparedData { tables, engines_info, ccls, data_parties, work_parties })
}

/// Asks every party in `targets` for the metadata of `tables` and stores what they
/// answer. A Party may only vouch for tables it owns; anything else in an answer is
/// dropped. Returns the number of tables stored.
pub fn ask_project_info_from_parties(
  app: &App,
  project_id: &ProjectId,
  tables: &[TableName],
  targets: &[PartyCode],
) -> Result<usize> {
  let req = msg::AskInfoRequest {
    project_id: project_id.clone(),
    table_names: tables.to_vec(),
    requester: app.conf.party_code.clone(),
  };

  let mut received_tables = Vec::<TableMeta>::new();
  let mut received_privs = Vec::<ColumnPriv>::new();
  let mut last_err = None;
  for target in targets {
    match ask_info(app, target, &req) {
      Ok(response) => {
        for table in response.tables {
          if &table.table.owner == target && &table.table.project_id == project_id {
            received_tables.push(table);
          }
        }
        received_privs.extend(response.column_privs.into_iter().filter(|p| {
          &p.project_id == project_id
            && received_tables.iter().any(|t| t.table.table_name == p.table_name)
        }));
      }
      Err(err) => {
        warn!("ask info from party {} failed: {}", target, err);
        last_err = Some(err);
      }
    }
  }

  let count = received_tables.len();
  if count > 0 {
    let mut txn = app.meta_mgr.create_meta_transaction().map_err(BrokerError::Storage)?;
    txn.upsert_tables(received_tables).map_err(BrokerError::Storage)?;
    txn.upsert_column_privs(received_privs).map_err(BrokerError::Storage)?;
    txn.finish(Ok(())).map_err(BrokerError::Storage)?;
  }
  match last_err {
    Some(err) if count == 0 => Err(err),
    _ => Ok(count),
  }
}

fn ask_info(
  app: &App,
  target: &PartyCode,
  req: &msg::AskInfoRequest,
) -> Result<msg::AskInfoResponse> {
  let url = app.party_mgr.get_broker_url_by_party(target).map_err(BrokerError::Transport)?;
  let response = app.inter_stub.ask_info(&url, req).map_err(BrokerError::Transport)?;
  match response.status.as_ref().map(msg::StatusKind::from) {
    Some(msg::StatusKind::Ok) => Ok(response),
    other => Err(BrokerError::Transport(format!(
      "ask info from party {} returned {:?}",
      target, other
    ))),
  }
}
