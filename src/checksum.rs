use crate::model::common::{Checksum, ColumnControl, ColumnMeta, PartyCode, TableMeta};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

#[cfg(test)]
#[path = "test/checksum_test.rs"]
mod checksum_test;

// -----------------------------------------------------------------------------------------------
//  Checksum Engine
// -----------------------------------------------------------------------------------------------

/// Computes the fingerprints of `party`'s view of the tables it owns. Every input is
/// sorted before it is hashed, so two Parties holding the same metadata produce
/// byte-equal checksums no matter what order they fetched it in.
pub fn compute(party: &PartyCode, tables: &[TableMeta], ccls: &[ColumnControl]) -> Checksum {
  let mut table_schema_crypt = Sha256::new();
  let mut ccl_crypt = Sha256::new();

  let mut owned: Vec<&TableMeta> = tables.iter().filter(|t| &t.table.owner == party).collect();
  owned.sort_by_key(|t| t.db_table().to_string());
  for table in owned {
    let db_table = table.db_table();
    feed(&mut table_schema_crypt, &db_table.to_string());

    let mut columns: Vec<&ColumnMeta> = table.columns.iter().collect();
    columns.sort_by(|a, b| a.name.cmp(&b.name));
    for col in columns {
      feed(&mut table_schema_crypt, &col.name.0);
      feed(&mut table_schema_crypt, &type_desc(&col.dtype));
    }

    let mut ccls_for_table: Vec<&ColumnControl> = ccls
      .iter()
      .filter(|c| c.table_name == db_table.table_name && c.database_name == db_table.db_name)
      .collect();
    ccls_for_table.sort_by(|a, b| {
      (&a.table_name, &a.column_name, &a.party_code).cmp(&(
        &b.table_name,
        &b.column_name,
        &b.party_code,
      ))
    });
    for ccl in ccls_for_table {
      feed(&mut ccl_crypt, &ccl.table_name);
      feed(&mut ccl_crypt, &ccl.column_name);
      feed(&mut ccl_crypt, ccl.visibility.as_str());
    }
  }

  Checksum {
    table_schema: table_schema_crypt.finalize().to_vec(),
    ccl: ccl_crypt.finalize().to_vec(),
  }
}

/// Computes the checksum of every party in `data_parties`.
pub fn create_checksums(
  data_parties: &[PartyCode],
  tables: &[TableMeta],
  ccls: &[ColumnControl],
) -> BTreeMap<PartyCode, Checksum> {
  data_parties.iter().map(|p| (p.clone(), compute(p, tables, ccls))).collect()
}

/// Every field is NUL-terminated so that adjacent fields can't run into each other.
fn feed(crypt: &mut Sha256, field: &str) {
  crypt.update(field.as_bytes());
  crypt.update([0u8]);
}

/// Declared types are compared case-insensitively.
fn type_desc(dtype: &str) -> String {
  dtype.trim().to_lowercase()
}
