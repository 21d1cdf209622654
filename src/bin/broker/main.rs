use clap::{arg, App as Cli};
use log::info;
use p2pbroker::app::App;
use p2pbroker::common::SystemClock;
use p2pbroker::config::BrokerConfig;
use p2pbroker::gc::start_gc;
use p2pbroker::meta_store::MemMetaStore;
use p2pbroker::model::common::{PartyCode, ProjectId};
use p2pbroker::net::{start_inter_server, TcpInterStub};
use p2pbroker::party_mgr::{PartyEntry, StaticPartyManager};
use std::sync::Arc;
use std::time::Duration;

const PEER_FORMAT: &str = "CODE=HOST:PORT[,ENGINE,PUBKEY]";

/// Parses `CODE=HOST:PORT`, optionally followed by the Party's engine endpoint and
/// public key. A peer given without them cannot take part in engine execution.
fn parse_peer(peer: &str) -> Result<(PartyCode, PartyEntry), String> {
  let invalid = || format!("invalid peer {:?}, expected {}", peer, PEER_FORMAT);
  let (code, rest) = peer.split_once('=').ok_or_else(invalid)?;
  let fields: Vec<&str> = rest.split(',').collect();
  let (broker_url, engine_endpoint, pub_key) = match fields[..] {
    [url] => (url, "", ""),
    [url, engine, key] if !engine.is_empty() && !key.is_empty() => (url, engine, key),
    _ => return Err(invalid()),
  };
  if code.is_empty() || broker_url.is_empty() {
    return Err(invalid());
  }
  let entry = PartyEntry {
    broker_url: broker_url.to_string(),
    engine_endpoint: engine_endpoint.to_string(),
    pub_key: pub_key.to_string(),
  };
  Ok((PartyCode(code.to_string()), entry))
}

fn main() {
  env_logger::init();

  // Setup CLI parsing
  let matches = Cli::new("p2pbroker")
    .version("0.1")
    .arg(arg!(-p --party <CODE>).required(true).help("The code of the Party this broker serves."))
    .arg(arg!(-l --listen <ADDR>).required(true).help("The address to serve peer brokers on."))
    .arg(
      arg!(--peer <PEER>)
        .required(false)
        .multiple_occurrences(true)
        .help("A peer broker as CODE=HOST:PORT[,ENGINE,PUBKEY]. May be repeated."),
    )
    .arg(arg!(--engine <ADDR>).required(false).help("The engine endpoint of this Party."))
    .arg(arg!(--pubkey <KEY>).required(false).help("The public key of this Party."))
    .arg(arg!(--project <ID>).required(false).help("A project all configured Parties belong to."))
    .arg(arg!(--retry <TIMES>).required(false).help("ExchangeJobInfo attempts per peer."))
    .arg(arg!(--interval <MILLIS>).required(false).help("Wait between ExchangeJobInfo attempts."))
    .get_matches();

  // Get required arguments
  let party_code = PartyCode(matches.value_of("party").unwrap().to_string());
  let listen = matches.value_of("listen").unwrap().to_string();

  let mut conf = BrokerConfig::new(party_code.clone());
  if let Some(retry) = matches.value_of("retry") {
    conf.exchange_job_info_retry_times = retry.parse().expect("--retry must be an integer");
  }
  if let Some(interval) = matches.value_of("interval") {
    let millis: u64 = interval.parse().expect("--interval must be an integer");
    conf.exchange_job_info_retry_interval = Duration::from_millis(millis);
  }

  let mut party_mgr = StaticPartyManager::new();
  let self_entry = PartyEntry {
    broker_url: listen.clone(),
    engine_endpoint: matches.value_of("engine").unwrap_or_default().to_string(),
    pub_key: matches.value_of("pubkey").unwrap_or_default().to_string(),
  };
  party_mgr.add_party(party_code.clone(), self_entry);
  let mut parties = vec![party_code.clone()];
  for peer in matches.values_of("peer").into_iter().flatten() {
    let (code, entry) = parse_peer(peer).unwrap();
    party_mgr.add_party(code.clone(), entry);
    parties.push(code);
  }

  let clock = Arc::new(SystemClock);
  let meta_mgr = Arc::new(MemMetaStore::new(clock.clone()));
  if let Some(project) = matches.value_of("project") {
    let project_id = ProjectId(project.to_string());
    for party in &parties {
      meta_mgr.add_project_member(&project_id, party).unwrap();
    }
  }

  let app = Arc::new(App::new(
    conf,
    meta_mgr,
    Arc::new(party_mgr),
    Arc::new(TcpInterStub::default()),
    clock,
  ));

  let _gc = start_gc(app.clone());
  let server = start_inter_server(app, &listen).unwrap();
  info!("broker of party {} listening on {}", party_code, listen);
  let _ = server.join();
}
