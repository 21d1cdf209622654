use crate::dispatch::EngineStub;
use crate::model::common::{JobId, PartyCode, Timestamp};
use crate::model::message as msg;
use crate::session::CancelToken;
use rand::Rng;
use std::collections::{BTreeMap, BTreeSet};
use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

// -----------------------------------------------------------------------------------------------
//  IO Seams
// -----------------------------------------------------------------------------------------------

/// Time source for everything that waits or expires. Tests swap in a clock that
/// advances instantly and records every sleep.
pub trait Clock: Send + Sync {
  fn now(&self) -> Timestamp;
  fn sleep(&self, duration: Duration);
}

#[derive(Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
  fn now(&self) -> Timestamp {
    cur_timestamp()
  }

  fn sleep(&self, duration: Duration) {
    thread::sleep(duration)
  }
}

/// The inter-party RPC stub. `url` is the peer broker's registered address.
pub trait InterStub: Send + Sync {
  fn exchange_job_info(
    &self,
    url: &str,
    req: &msg::ExchangeJobInfoRequest,
  ) -> Result<msg::ExchangeJobInfoResponse, String>;

  fn ask_info(&self, url: &str, req: &msg::AskInfoRequest) -> Result<msg::AskInfoResponse, String>;

  fn sync_info(&self, url: &str, req: &msg::SyncInfoRequest)
    -> Result<msg::SyncInfoResponse, String>;
}

/// The external query compiler.
pub trait Compiler {
  fn compile(&self, req: &msg::CompileQueryRequest) -> Result<msg::CompiledPlan, String>;
}

/// The external secure-computation engine. `cancel` is forwarded so the engine can
/// abort a running plan.
pub trait EngineClient: Send + Sync {
  fn run_execution_plan(
    &self,
    stub: &EngineStub,
    reqs: &BTreeMap<PartyCode, msg::RunExecutionPlanRequest>,
    cancel: &CancelToken,
  ) -> Result<msg::RunExecutionPlanResponse, String>;

  /// The endpoint this Party's engine is reachable at.
  fn endpoint_for_self(&self) -> String;
}

// -----------------------------------------------------------------------------------------------
//  Basic Utils
// -----------------------------------------------------------------------------------------------

pub fn cur_timestamp() -> Timestamp {
  let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
  Timestamp(now.as_millis())
}

pub fn mk_t(millis: u128) -> Timestamp {
  Timestamp(millis)
}

pub fn mk_job_id<R: Rng>(rng: &mut R) -> JobId {
  let mut bytes: [u8; 8] = [0; 8];
  rng.fill(&mut bytes);
  JobId(hex::encode(bytes))
}

/// Sorts and removes duplicates, so that two Parties deriving the same set always
/// produce the same sequence.
pub fn slice_dedup<T: Ord>(items: Vec<T>) -> Vec<T> {
  items.into_iter().collect::<BTreeSet<T>>().into_iter().collect()
}

/// Elements of `items` that are not in `remove`, in their original order.
pub fn subtraction<T: Ord + Clone>(items: &[T], remove: &[T]) -> Vec<T> {
  let remove: BTreeSet<&T> = remove.iter().collect();
  items.iter().filter(|item| !remove.contains(item)).cloned().collect()
}

#[cfg(test)]
mod tests {
  use super::{slice_dedup, subtraction};

  #[test]
  fn slice_dedup_test() {
    assert_eq!(slice_dedup(vec![3, 1, 3, 2, 1]), vec![1, 2, 3]);
    assert_eq!(slice_dedup(Vec::<i32>::new()), Vec::<i32>::new());
  }

  #[test]
  fn subtraction_test() {
    assert_eq!(subtraction(&[4, 1, 2, 3], &[1, 3]), vec![4, 2]);
    assert_eq!(subtraction(&[1, 2], &[]), vec![1, 2]);
  }
}
