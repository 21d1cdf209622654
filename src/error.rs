use crate::model::common::{ChecksumCompareResult, PartyCode};
use thiserror::Error;

/// Every way a query's lifecycle, the inter-party exchange, or a GC tick can fail.
#[derive(Error, Debug)]
pub enum BrokerError {
  /// Tables that neither local storage nor any peer could resolve.
  #[error("table {0:?} not found")]
  TableNotFound(Vec<String>),

  #[error("transport error: {0}")]
  Transport(String),

  /// Parties disagree on the schema or column controls of `party`'s tables.
  #[error("checksum not equal with party {party}: {result:?}")]
  ChecksumMismatch { party: PartyCode, result: ChecksumCompareResult },

  #[error("failed to compile query to plan: {0}")]
  Compile(String),

  #[error("dispatch error: {0}")]
  Dispatch(String),

  #[error("engine execution error: {0}")]
  EngineExecution(String),

  #[error("gc error: {0}")]
  GcTransient(String),

  #[error("session canceled")]
  Cancelled,

  #[error("metadata store error: {0}")]
  Storage(String),

  #[error("invalid query: {0}")]
  InvalidQuery(String),

  #[error("io error: {0}")]
  Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, BrokerError>;
