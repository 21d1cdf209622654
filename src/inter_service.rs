use crate::app::App;
use crate::error::BrokerError;
use crate::model::message as msg;
use log::{info, warn};

#[cfg(test)]
#[path = "test/inter_service_test.rs"]
mod inter_service_test;

// -----------------------------------------------------------------------------------------------
//  Inter-Party Service
// -----------------------------------------------------------------------------------------------

fn error_status(code: i32, err: &BrokerError) -> Option<msg::Status> {
  Some(msg::Status::new(code, err.to_string()))
}

pub fn handle(app: &App, req: msg::InterRequest) -> msg::InterResponse {
  match req {
    msg::InterRequest::ExchangeJobInfo(req) => {
      msg::InterResponse::ExchangeJobInfo(handle_exchange_job_info(app, &req))
    }
    msg::InterRequest::AskInfo(req) => msg::InterResponse::AskInfo(handle_ask_info(app, &req)),
    msg::InterRequest::SyncInfo(req) => msg::InterResponse::SyncInfo(handle_sync_info(app, req)),
  }
}

/// Answers a peer's `ExchangeJobInfo`. The checksum this Party computed for itself is
/// always returned, and compared against the one the peer computed for this Party. The
/// peer's own checksum, if sent, is kept as its remote checksum.
pub fn handle_exchange_job_info(
  app: &App,
  req: &msg::ExchangeJobInfoRequest,
) -> msg::ExchangeJobInfoResponse {
  let session =
    app.get_session(&req.job_id).filter(|s| s.execute_info.project_id == req.project_id);
  let session = match session {
    // Until it has computed its checksums, a Session is answered like a missing one so
    // that the peer retries.
    Some(session) if session.checksums_ready().unwrap_or(false) => session,
    _ => {
      return msg::ExchangeJobInfoResponse {
        status: Some(msg::Status::new(
          msg::CODE_SESSION_NOT_FOUND,
          format!("session {} not found or not prepared", req.job_id),
        )),
        expected_server_checksum: None,
      }
    }
  };

  if let Some(client_checksum) = &req.client_checksum {
    let saved = session.save_remote_checksum(req.client_id.clone(), client_checksum.clone());
    if let Err(err) = saved {
      return msg::ExchangeJobInfoResponse {
        status: error_status(msg::CODE_INTERNAL, &err),
        expected_server_checksum: None,
      };
    }
  }

  let self_party = &app.conf.party_code;
  let local = match session.get_local_checksum(self_party) {
    Ok(local) => Some(local),
    // The peer can't be judged without our own checksum.
    Err(err) if req.server_checksum.is_some() => {
      return msg::ExchangeJobInfoResponse {
        status: error_status(msg::CODE_INTERNAL, &err),
        expected_server_checksum: None,
      }
    }
    Err(_) => None,
  };

  let consistent = match (&req.server_checksum, &local) {
    (Some(server_checksum), Some(local)) => server_checksum == local,
    _ => true,
  };
  if consistent {
    msg::ExchangeJobInfoResponse {
      status: Some(msg::Status::ok()),
      expected_server_checksum: local,
    }
  } else {
    info!("checksum of party {} for job {} differs from ours", req.client_id, req.job_id);
    msg::ExchangeJobInfoResponse {
      status: Some(msg::Status::new(
        msg::CODE_DATA_INCONSISTENCY,
        format!("checksum of party {} is not consistent", self_party),
      )),
      expected_server_checksum: local,
    }
  }
}

/// Pushes the metadata of the requested tables that this Party owns.
pub fn handle_ask_info(app: &App, req: &msg::AskInfoRequest) -> msg::AskInfoResponse {
  let self_party = &app.conf.party_code;
  let result = (|| {
    let mut txn = app.meta_mgr.create_meta_transaction().map_err(BrokerError::Storage)?;
    let (tables, _) = txn
      .get_table_metas_by_names(&req.project_id, &req.table_names)
      .map_err(BrokerError::Storage)?;
    let tables: Vec<_> = tables.into_iter().filter(|t| &t.table.owner == self_party).collect();
    let owned_names: Vec<_> = tables.iter().map(|t| t.table.table_name.clone()).collect();
    let members = txn.get_project_members(&req.project_id).map_err(BrokerError::Storage)?;
    if !members.contains(&req.requester) {
      return Err(BrokerError::Storage(format!(
        "party {} is not a member of project {:?}",
        req.requester, req.project_id.0
      )));
    }
    let column_privs = txn
      .list_column_constraints(&req.project_id, &owned_names, &members)
      .map_err(BrokerError::Storage)?;
    txn.finish(Ok(())).map_err(BrokerError::Storage)?;
    Ok((tables, column_privs))
  })();

  match result {
    Ok((tables, column_privs)) => {
      msg::AskInfoResponse { status: Some(msg::Status::ok()), tables, column_privs }
    }
    Err(err) => {
      warn!("ask info from party {} failed: {}", req.requester, err);
      msg::AskInfoResponse { status: error_status(msg::CODE_INTERNAL, &err), ..Default::default() }
    }
  }
}

/// Stores metadata a peer pushed for tables it owns, and makes the named Session
/// prepare again.
pub fn handle_sync_info(app: &App, req: msg::SyncInfoRequest) -> msg::SyncInfoResponse {
  let msg::SyncInfoRequest { project_id, job_id, sender, tables, column_privs } = req;
  let tables: Vec<_> = tables
    .into_iter()
    .filter(|t| t.table.owner == sender && t.table.project_id == project_id)
    .collect();
  let column_privs: Vec<_> = column_privs
    .into_iter()
    .filter(|p| tables.iter().any(|t| t.table.table_name == p.table_name))
    .collect();

  let result = (|| {
    let mut txn = app.meta_mgr.create_meta_transaction().map_err(BrokerError::Storage)?;
    txn.upsert_tables(tables).map_err(BrokerError::Storage)?;
    txn.upsert_column_privs(column_privs).map_err(BrokerError::Storage)?;
    txn.finish(Ok(())).map_err(BrokerError::Storage)
  })();
  if let Err(err) = result {
    return msg::SyncInfoResponse { status: error_status(msg::CODE_INTERNAL, &err) };
  }

  if let Some(session) = job_id.as_ref().and_then(|id| app.get_session(id)) {
    info!("party {} synced info for job {}, prepare again", sender, session.job_id());
    session.request_resync();
  }
  msg::SyncInfoResponse { status: Some(msg::Status::ok()) }
}
