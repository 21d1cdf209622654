use serde::{Deserialize, Serialize};
use std::fmt;

/// These are common PODs that form the core data objects
/// of the broker.

// -------------------------------------------------------------------------------------------------
//  Identifiers
// -------------------------------------------------------------------------------------------------

/// The code of a Party. Every broker instance is run by exactly one Party.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PartyCode(pub String);

/// A Project groups Parties and the tables they share. The `ProjectId` is also
/// used as the database name when building the compiler's catalog.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProjectId(pub String);

/// Identifies a Session across all Parties participating in a query.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct JobId(pub String);

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TableName(pub String);

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ColName(pub String);

/// Milliseconds since the UNIX epoch.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(pub u128);

impl Timestamp {
  pub fn add_millis(&self, millis: u128) -> Timestamp {
    Timestamp(self.0 + millis)
  }
}

impl fmt::Display for PartyCode {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.0)
  }
}

impl fmt::Display for JobId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.0)
  }
}

// -------------------------------------------------------------------------------------------------
//  Table Metadata
// -------------------------------------------------------------------------------------------------

/// The backing database of a physical table.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DbType {
  Unknown,
  MySQL,
  Postgres,
  Sqlite,
  Csvdb,
  Odps,
  Hive,
}

impl DbType {
  /// Parses the `db_type` string kept in the metadata store. The empty string maps to
  /// `Unknown`, which the engine resolves against its default datasource.
  pub fn parse(s: &str) -> Result<DbType, String> {
    match s.to_lowercase().as_str() {
      "" => Ok(DbType::Unknown),
      "mysql" => Ok(DbType::MySQL),
      "postgresql" | "postgres" => Ok(DbType::Postgres),
      "sqlite" => Ok(DbType::Sqlite),
      "csvdb" => Ok(DbType::Csvdb),
      "odps" => Ok(DbType::Odps),
      "hive" => Ok(DbType::Hive),
      _ => Err(format!("unknown db type {:?}", s)),
    }
  }
}

/// A `db.table` pair. For tables registered in a project the `db_name` is the `ProjectId`;
/// for physical reference tables it is the database inside the Party's datasource.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DbTable {
  pub db_name: String,
  pub table_name: String,
  pub db_type: DbType,
}

impl DbTable {
  pub fn new(db_name: &str, table_name: &str) -> DbTable {
    DbTable {
      db_name: db_name.to_string(),
      table_name: table_name.to_string(),
      db_type: DbType::Unknown,
    }
  }

  /// Parses a `db.table` reference. A reference with no `.` is rejected, since physical
  /// tables must always be qualified.
  pub fn from_ref(s: &str) -> Result<DbTable, String> {
    let parts: Vec<&str> = s.splitn(2, '.').collect();
    match parts.as_slice() {
      [db, table] if !db.is_empty() && !table.is_empty() => Ok(DbTable::new(db, table)),
      _ => Err(format!("invalid table reference {:?}, expected `db.table`", s)),
    }
  }
}

impl fmt::Display for DbTable {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}.{}", self.db_name, self.table_name)
  }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ColumnMeta {
  pub name: ColName,
  /// The declared type, e.g. `int`, `string`, `float`.
  pub dtype: String,
}

/// The identity of a table registered in a Project. `ref_table` names the physical
/// table (`db.table`) inside the owner's datasource.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct TableIdentity {
  pub project_id: ProjectId,
  pub table_name: TableName,
  pub owner: PartyCode,
  pub ref_table: String,
  pub db_type: String,
}

/// An immutable snapshot of a table's metadata, taken when a query is prepared.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct TableMeta {
  pub table: TableIdentity,
  pub columns: Vec<ColumnMeta>,
}

impl TableMeta {
  /// The `project.table` name used in the catalog and in checksums.
  pub fn db_table(&self) -> DbTable {
    DbTable::new(&self.table.project_id.0, &self.table.table_name.0)
  }
}

// -------------------------------------------------------------------------------------------------
//  Column Control
// -------------------------------------------------------------------------------------------------

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Visibility {
  Unknown,
  Plaintext,
  Encrypted,
  PlaintextAfterJoin,
  PlaintextAfterGroupBy,
  PlaintextAfterCompare,
  PlaintextAfterAggregate,
  PlaintextAsJoinPayload,
  Rejected,
}

impl Visibility {
  /// Names as stored in the metadata store; lookup is case-insensitive and anything
  /// unrecognized is `Unknown`.
  pub fn from_priv(s: &str) -> Visibility {
    match s.to_uppercase().as_str() {
      "PLAINTEXT" => Visibility::Plaintext,
      "ENCRYPTED_ONLY" | "ENCRYPTED" => Visibility::Encrypted,
      "PLAINTEXT_AFTER_JOIN" => Visibility::PlaintextAfterJoin,
      "PLAINTEXT_AFTER_GROUP_BY" => Visibility::PlaintextAfterGroupBy,
      "PLAINTEXT_AFTER_COMPARE" => Visibility::PlaintextAfterCompare,
      "PLAINTEXT_AFTER_AGGREGATE" => Visibility::PlaintextAfterAggregate,
      "PLAINTEXT_AS_JOIN_PAYLOAD" => Visibility::PlaintextAsJoinPayload,
      "REJECTED" => Visibility::Rejected,
      _ => Visibility::Unknown,
    }
  }

  pub fn as_str(&self) -> &'static str {
    match self {
      Visibility::Unknown => "UNKNOWN",
      Visibility::Plaintext => "PLAINTEXT",
      Visibility::Encrypted => "ENCRYPTED_ONLY",
      Visibility::PlaintextAfterJoin => "PLAINTEXT_AFTER_JOIN",
      Visibility::PlaintextAfterGroupBy => "PLAINTEXT_AFTER_GROUP_BY",
      Visibility::PlaintextAfterCompare => "PLAINTEXT_AFTER_COMPARE",
      Visibility::PlaintextAfterAggregate => "PLAINTEXT_AFTER_AGGREGATE",
      Visibility::PlaintextAsJoinPayload => "PLAINTEXT_AS_JOIN_PAYLOAD",
      Visibility::Rejected => "REJECTED",
    }
  }
}

/// A column privilege as it is kept in the metadata store.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ColumnPriv {
  pub project_id: ProjectId,
  pub table_name: TableName,
  pub column_name: ColName,
  pub dest_party: PartyCode,
  pub priv_: String,
}

/// What `party_code` is allowed to see of `db.table.column`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ColumnControl {
  pub party_code: PartyCode,
  pub visibility: Visibility,
  pub database_name: String,
  pub table_name: String,
  pub column_name: String,
}

impl ColumnControl {
  pub fn from_priv(column_priv: &ColumnPriv) -> ColumnControl {
    ColumnControl {
      party_code: column_priv.dest_party.clone(),
      visibility: Visibility::from_priv(&column_priv.priv_),
      database_name: column_priv.project_id.0.clone(),
      table_name: column_priv.table_name.0.clone(),
      column_name: column_priv.column_name.0.clone(),
    }
  }
}

// -------------------------------------------------------------------------------------------------
//  Checksum
// -------------------------------------------------------------------------------------------------

/// The fingerprints of one Party's view of the tables it owns for a query.
#[derive(Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Checksum {
  pub table_schema: Vec<u8>,
  pub ccl: Vec<u8>,
}

impl fmt::Debug for Checksum {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Checksum")
      .field("table_schema", &hex::encode(&self.table_schema))
      .field("ccl", &hex::encode(&self.ccl))
      .finish()
  }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChecksumCompareResult {
  Equal,
  TableSchemaNotEqual,
  CclNotEqual,
  TableSchemaAndCclNotEqual,
}

impl Checksum {
  pub fn compare_with(&self, other: &Checksum) -> ChecksumCompareResult {
    let schema_eq = self.table_schema == other.table_schema;
    let ccl_eq = self.ccl == other.ccl;
    match (schema_eq, ccl_eq) {
      (true, true) => ChecksumCompareResult::Equal,
      (false, true) => ChecksumCompareResult::TableSchemaNotEqual,
      (true, false) => ChecksumCompareResult::CclNotEqual,
      (false, false) => ChecksumCompareResult::TableSchemaAndCclNotEqual,
    }
  }
}

// -------------------------------------------------------------------------------------------------
//  Party Info
// -------------------------------------------------------------------------------------------------

/// The network identity of a Party's engine.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Participant {
  pub party_code: PartyCode,
  pub endpoints: Vec<String>,
  pub pub_key: String,
}
