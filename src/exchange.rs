use crate::app::App;
use crate::error::{BrokerError, Result};
use crate::model::common::{ChecksumCompareResult, PartyCode};
use crate::model::message as msg;
use crate::session::Session;
use log::info;

#[cfg(test)]
#[path = "test/exchange_test.rs"]
mod exchange_test;

// -----------------------------------------------------------------------------------------------
//  Consistency Exchanger
// -----------------------------------------------------------------------------------------------

/// The outcome of `exchange_job_info` that the caller has to act on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExchangeOutcome {
  Agreed(msg::ExchangeJobInfoResponse),
  /// The target computed a different checksum for its own tables. This is data,
  /// not a failure; the response carries the target's checksum.
  DataInconsistency(msg::ExchangeJobInfoResponse),
}

impl ExchangeOutcome {
  pub fn response(&self) -> &msg::ExchangeJobInfoResponse {
    match self {
      ExchangeOutcome::Agreed(response) | ExchangeOutcome::DataInconsistency(response) => response,
    }
  }
}

/// Exchanges job info with `target_party`. While the target answers `SESSION_NOT_FOUND`
/// (it has not created its Session yet), this retries up to the configured number of
/// attempts, sleeping the configured interval between them. An RPC failure is returned
/// immediately.
pub fn exchange_job_info(
  app: &App,
  session: &Session,
  target_party: &PartyCode,
) -> Result<ExchangeOutcome> {
  let info = &session.execute_info;
  let mut req = msg::ExchangeJobInfoRequest {
    project_id: info.project_id.clone(),
    job_id: info.job_id.clone(),
    client_id: session.self_party.clone(),
    server_checksum: None,
    client_checksum: None,
  };
  let data_parties = session.data_parties()?;
  if data_parties.contains(&session.self_party) {
    req.client_checksum = Some(session.get_local_checksum(&session.self_party)?);
  }
  if data_parties.contains(target_party) {
    let server_checksum = session.get_local_checksum(target_party)?;
    req.server_checksum = Some(server_checksum);
    info!("exchange job info with party {} with request {:?}", target_party, req);
  }

  let url = app
    .party_mgr
    .get_broker_url_by_party(target_party)
    .map_err(|e| BrokerError::Transport(format!("ExchangeJobInfoStub: {}", e)))?;

  let retry_times = app.conf.exchange_job_info_retry_times.max(1);
  let mut response = msg::ExchangeJobInfoResponse::default();
  for i in 0..retry_times {
    response = app
      .inter_stub
      .exchange_job_info(&url, &req)
      .map_err(|e| BrokerError::Transport(format!("ExchangeJobInfoStub: {}", e)))?;
    match response.status.as_ref().map(msg::StatusKind::from) {
      Some(msg::StatusKind::SessionNotFound) => {
        if i + 1 < retry_times {
          app.clock.sleep(app.conf.exchange_job_info_retry_interval);
        }
      }
      Some(msg::StatusKind::Ok) => return Ok(ExchangeOutcome::Agreed(response)),
      _ => break,
    }
  }

  match response.status.as_ref().map(msg::StatusKind::from) {
    None => Err(BrokerError::Transport(format!(
      "err response from party {}; response {:?}",
      target_party, response
    ))),
    Some(msg::StatusKind::DataInconsistency) => Ok(ExchangeOutcome::DataInconsistency(response)),
    Some(status) => Err(BrokerError::Transport(format!(
      "failed to exchange job info with {} return error {:?}",
      target_party, status
    ))),
  }
}

/// Fetches the checksum of every data party other than this Party and `issuer`, and
/// stores it as that party's remote checksum. The first failure aborts. A party that
/// reports a data inconsistency gets its checksum stored all the same, and the
/// Session is asked to prepare again.
pub fn get_checksum_from_other_parties(
  app: &App,
  session: &Session,
  issuer: &PartyCode,
) -> Result<()> {
  for p in session.data_parties()? {
    if &p == issuer || p == session.self_party {
      continue;
    }
    fetch_checksum(app, session, &p)?;
  }
  Ok(())
}

/// Fetches the issuer's own checksum, when this Party is not the issuer and the issuer
/// holds tables of the query. Returns whether an exchange took place.
pub fn get_checksum_from_issuer(app: &App, session: &Session) -> Result<bool> {
  let issuer = &session.execute_info.issuer;
  if session.is_issuer() || !session.data_parties()?.contains(issuer) {
    return Ok(false);
  }
  fetch_checksum(app, session, issuer)?;
  Ok(true)
}

fn fetch_checksum(app: &App, session: &Session, party: &PartyCode) -> Result<()> {
  let outcome = exchange_job_info(app, session, party)?;
  let checksum = match &outcome.response().expected_server_checksum {
    Some(checksum) => checksum.clone(),
    None => {
      return Err(BrokerError::Transport(format!("party {} did not return its checksum", party)))
    }
  };
  session.save_remote_checksum(party.clone(), checksum)?;
  if let ExchangeOutcome::DataInconsistency(_) = outcome {
    info!("party {} reported data inconsistency for job {}", party, session.job_id());
    session.request_resync();
  }
  Ok(())
}

/// Checks data consistency with every other data party by comparing what this Party
/// computed for it with what it computed for itself.
pub fn check_checksum(session: &Session) -> Result<()> {
  for p in session.data_parties()? {
    if p == session.self_party {
      continue;
    }
    let result = session.compare_checksum_for(&p)?;
    if result != ChecksumCompareResult::Equal {
      return Err(BrokerError::ChecksumMismatch { party: p, result });
    }
  }
  Ok(())
}
