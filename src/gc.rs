use crate::app::App;
use crate::error::{BrokerError, Result};
use crate::model::common::JobId;
use log::{debug, error, info, warn};
use std::env;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

#[cfg(test)]
#[path = "test/gc_test.rs"]
mod gc_test;

// -----------------------------------------------------------------------------------------------
//  Lease GC
// -----------------------------------------------------------------------------------------------

/// The identity this broker holds the GC lease under: the `HOSTNAME` environment
/// variable when set, otherwise the Party code.
pub fn gc_owner(app: &App) -> String {
  pick_gc_owner(env::var("HOSTNAME").ok(), app)
}

fn pick_gc_owner(hostname: Option<String>, app: &App) -> String {
  match hostname {
    Some(host) if !host.is_empty() => host,
    _ => {
      warn!("cannot find HOSTNAME env, using party code as owner");
      app.conf.party_code.0.clone()
    }
  }
}

/// One round of the storage GC. Returns `Ok(None)` if the lease is held by another
/// owner, otherwise the number of expired results cleared.
pub fn storage_gc_tick(app: &App, owner: &str) -> Result<Option<usize>> {
  if let Err(err) = app.meta_mgr.hold_gc_lock(owner, app.conf.session_check_interval) {
    debug!("{} did not get the gc lock: {}", owner, err);
    return Ok(None);
  }
  let cleared = app
    .meta_mgr
    .clear_expired_results(app.conf.session_expire_time)
    .map_err(BrokerError::GcTransient)?;
  if cleared > 0 {
    info!("storage gc cleared {} expired results", cleared);
  }
  Ok(Some(cleared))
}

/// One round of the session GC: deletes every in-memory Session that was canceled
/// in the metadata store, and returns their ids.
pub fn session_gc_tick(app: &App) -> Result<Vec<JobId>> {
  let ids = app.sessions.ids();
  if ids.is_empty() {
    return Ok(vec![]);
  }
  let canceled = app.meta_mgr.check_id_canceled(&ids).map_err(BrokerError::GcTransient)?;
  for id in &canceled {
    app.delete_session(id);
  }
  Ok(canceled)
}

/// Runs the storage GC every `session_check_interval` until `stop` is set.
pub fn storage_gc(app: &App, stop: &AtomicBool) -> Result<()> {
  app.meta_mgr.init_gc_lock_if_necessary().map_err(|e| {
    error!("failed to check gc lock {}", e);
    BrokerError::Storage(e)
  })?;
  let owner = gc_owner(app);
  while !stop.load(Ordering::SeqCst) {
    app.clock.sleep(app.conf.session_check_interval);
    if let Err(err) = storage_gc_tick(app, &owner) {
      warn!("GC err: {}", err);
    }
  }
  Ok(())
}

/// Runs the session GC every `session_check_interval` until `stop` is set.
pub fn session_gc(app: &App, stop: &AtomicBool) {
  while !stop.load(Ordering::SeqCst) {
    app.clock.sleep(app.conf.session_check_interval);
    if let Err(err) = session_gc_tick(app) {
      error!("check canceled session failed: {}", err);
    }
  }
}

/// The two GC threads of a running broker.
pub struct GcHandle {
  stop: Arc<AtomicBool>,
  threads: Vec<thread::JoinHandle<()>>,
}

impl GcHandle {
  /// Asks both loops to exit after their current tick and waits for them.
  pub fn stop(self) {
    self.stop.store(true, Ordering::SeqCst);
    for t in self.threads {
      let _ = t.join();
    }
  }
}

pub fn start_gc(app: Arc<App>) -> GcHandle {
  let stop = Arc::new(AtomicBool::new(false));
  let mut threads = Vec::new();
  {
    let (app, stop) = (app.clone(), stop.clone());
    threads.push(thread::spawn(move || {
      if let Err(err) = storage_gc(&app, &stop) {
        error!("storage gc exited: {}", err);
      }
    }));
  }
  {
    let (app, stop) = (app.clone(), stop.clone());
    threads.push(thread::spawn(move || session_gc(&app, &stop)));
  }
  GcHandle { stop, threads }
}
