use crate::model::common::{Participant, PartyCode};
use std::collections::BTreeMap;

// -----------------------------------------------------------------------------------------------
//  PartyManager
// -----------------------------------------------------------------------------------------------

/// Resolves the network identity of other Parties.
pub trait PartyManager: Send + Sync {
  fn get_broker_url_by_party(&self, party: &PartyCode) -> Result<String, String>;
  fn get_pub_key_by_party(&self, party: &PartyCode) -> Result<String, String>;
  fn get_party_info_by_parties(&self, parties: &[PartyCode]) -> Result<Vec<Participant>, String>;
}

#[derive(Debug, Clone)]
pub struct PartyEntry {
  pub broker_url: String,
  pub engine_endpoint: String,
  pub pub_key: String,
}

/// A `PartyManager` over a fixed roster, as configured at startup.
#[derive(Debug, Default)]
pub struct StaticPartyManager {
  parties: BTreeMap<PartyCode, PartyEntry>,
}

impl StaticPartyManager {
  pub fn new() -> StaticPartyManager {
    StaticPartyManager { parties: BTreeMap::new() }
  }

  pub fn add_party(&mut self, party: PartyCode, entry: PartyEntry) {
    self.parties.insert(party, entry);
  }

  fn lookup(&self, party: &PartyCode) -> Result<&PartyEntry, String> {
    self.parties.get(party).ok_or(format!("party {} not found", party))
  }
}

impl PartyManager for StaticPartyManager {
  fn get_broker_url_by_party(&self, party: &PartyCode) -> Result<String, String> {
    Ok(self.lookup(party)?.broker_url.clone())
  }

  fn get_pub_key_by_party(&self, party: &PartyCode) -> Result<String, String> {
    let pub_key = &self.lookup(party)?.pub_key;
    if pub_key.is_empty() {
      return Err(format!("public key of party {} is empty", party));
    }
    Ok(pub_key.clone())
  }

  fn get_party_info_by_parties(&self, parties: &[PartyCode]) -> Result<Vec<Participant>, String> {
    let mut participants = Vec::<Participant>::new();
    for party in parties {
      let entry = self.lookup(party)?;
      participants.push(Participant {
        party_code: party.clone(),
        endpoints: vec![entry.engine_endpoint.clone()],
        pub_key: entry.pub_key.clone(),
      });
    }
    Ok(participants)
  }
}
