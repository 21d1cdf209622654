use crate::model::common::PartyCode;
use std::time::Duration;

// -----------------------------------------------------------------------------------------------
//  BrokerConfig
// -----------------------------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct BrokerConfig {
  /// The Party this broker runs for.
  pub party_code: PartyCode,
  /// Attempts made by `ExchangeJobInfo` while the peer answers `SESSION_NOT_FOUND`.
  /// Values below 1 are treated as 1.
  pub exchange_job_info_retry_times: u32,
  pub exchange_job_info_retry_interval: Duration,
  /// Tick of both GC loops. The GC lease is held for this long.
  pub session_check_interval: Duration,
  /// Persisted session results older than this are cleared by the storage GC.
  pub session_expire_time: Duration,
  /// A Session counts as canceled once it is this old. `None` never times out.
  pub query_timeout: Option<Duration>,
  /// Protocol the engine uses to call back into this broker.
  pub intra_protocol: String,
  pub engine_protocol: String,
  pub engine_content_type: String,
  pub engine_callback_path: String,
}

impl BrokerConfig {
  pub fn new(party_code: PartyCode) -> BrokerConfig {
    BrokerConfig { party_code, ..Default::default() }
  }
}

impl Default for BrokerConfig {
  fn default() -> Self {
    BrokerConfig {
      party_code: PartyCode(String::new()),
      exchange_job_info_retry_times: 3,
      exchange_job_info_retry_interval: Duration::from_millis(200),
      session_check_interval: Duration::from_secs(30),
      session_expire_time: Duration::from_secs(24 * 60 * 60),
      query_timeout: None,
      intra_protocol: "http".to_string(),
      engine_protocol: "http".to_string(),
      engine_content_type: "application/json".to_string(),
      engine_callback_path: "/v1/engine/report".to_string(),
    }
  }
}
