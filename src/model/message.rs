use crate::model::common::{
  Checksum, ColumnControl, ColumnPriv, JobId, PartyCode, ProjectId, TableMeta, TableName,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// -------------------------------------------------------------------------------------------------
//  Status
// -------------------------------------------------------------------------------------------------

pub const CODE_OK: i32 = 0;
pub const CODE_INTERNAL: i32 = 1;
pub const CODE_SESSION_NOT_FOUND: i32 = 302;
pub const CODE_DATA_INCONSISTENCY: i32 = 303;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Status {
  pub code: i32,
  pub message: String,
}

impl Status {
  pub fn ok() -> Status {
    Status { code: CODE_OK, message: String::new() }
  }

  pub fn new(code: i32, message: String) -> Status {
    Status { code, message }
  }
}

/// The closed set of outcomes a `Status` can signal to the exchange protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusKind {
  Ok,
  /// The peer has not created its Session yet. This is retryable.
  SessionNotFound,
  /// The peer computed a different checksum. This is returned as data.
  DataInconsistency,
  Other(i32, String),
}

impl From<&Status> for StatusKind {
  fn from(status: &Status) -> StatusKind {
    match status.code {
      CODE_OK => StatusKind::Ok,
      CODE_SESSION_NOT_FOUND => StatusKind::SessionNotFound,
      CODE_DATA_INCONSISTENCY => StatusKind::DataInconsistency,
      code => StatusKind::Other(code, status.message.clone()),
    }
  }
}

// -------------------------------------------------------------------------------------------------
//  Inter-Party Messages
// -------------------------------------------------------------------------------------------------

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ExchangeJobInfoRequest {
  pub project_id: ProjectId,
  pub job_id: JobId,
  pub client_id: PartyCode,
  /// What the sender computed for the receiver's tables. Only present when the
  /// receiver is a data party.
  pub server_checksum: Option<Checksum>,
  /// What the sender computed for its own tables, when the sender is a data party.
  pub client_checksum: Option<Checksum>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
pub struct ExchangeJobInfoResponse {
  pub status: Option<Status>,
  /// What the receiver computed for its own tables.
  pub expected_server_checksum: Option<Checksum>,
}

/// Asks a Party to push the metadata of `table_names` it owns in `project_id`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct AskInfoRequest {
  pub project_id: ProjectId,
  pub table_names: Vec<TableName>,
  pub requester: PartyCode,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
pub struct AskInfoResponse {
  pub status: Option<Status>,
  pub tables: Vec<TableMeta>,
  pub column_privs: Vec<ColumnPriv>,
}

/// A Party pushing metadata it believes the receiver holds stale. If `job_id` names a
/// live Session at the receiver, that Session is asked to prepare again.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct SyncInfoRequest {
  pub project_id: ProjectId,
  pub job_id: Option<JobId>,
  pub sender: PartyCode,
  pub tables: Vec<TableMeta>,
  pub column_privs: Vec<ColumnPriv>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
pub struct SyncInfoResponse {
  pub status: Option<Status>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub enum InterRequest {
  ExchangeJobInfo(ExchangeJobInfoRequest),
  AskInfo(AskInfoRequest),
  SyncInfo(SyncInfoRequest),
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub enum InterResponse {
  ExchangeJobInfo(ExchangeJobInfoResponse),
  AskInfo(AskInfoResponse),
  SyncInfo(SyncInfoResponse),
}

// -------------------------------------------------------------------------------------------------
//  Compiler Messages
// -------------------------------------------------------------------------------------------------

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
pub struct CompileOptions {
  pub batched: bool,
  pub dump_exe_graph: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
pub struct DebugOptions {
  pub enable_psi_detail_log: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
pub struct SecurityConfig {
  pub column_control_list: Vec<ColumnControl>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct TableEntryColumn {
  pub name: String,
  pub dtype: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct TableEntry {
  /// `project.table`
  pub table_name: String,
  pub is_view: bool,
  pub ref_table: String,
  pub db_type: String,
  pub owner: PartyCode,
  pub columns: Vec<TableEntryColumn>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
pub struct Catalog {
  pub tables: Vec<TableEntry>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct CompileQueryRequest {
  pub query: String,
  pub db_name: String,
  pub issuer: PartyCode,
  /// Every Party runs its own broker, so the issuer always participates.
  pub issuer_as_participant: bool,
  pub security_conf: SecurityConfig,
  pub catalog: Catalog,
  pub compile_opts: CompileOptions,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ExecNode {
  pub name: String,
  pub op_type: String,
}

/// The subgraph of the compiled plan that one Party runs. Opaque to the broker.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
pub struct ExecutionGraph {
  pub nodes: Vec<ExecNode>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
pub struct SpuRuntimeConfig {
  pub protocol: String,
  pub field: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ColumnDesc {
  pub name: String,
  pub dtype: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
pub struct PlanSchema {
  pub columns: Vec<ColumnDesc>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
pub struct CompilerWarning {
  pub may_affected_by_group_threshold: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
pub struct ExplainInfo {
  pub exe_graph_dot: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
pub struct CompiledPlan {
  /// Rank of a Party is its position here.
  pub parties: Vec<PartyCode>,
  pub sub_graphs: BTreeMap<PartyCode, ExecutionGraph>,
  pub spu_runtime_conf: SpuRuntimeConfig,
  pub schema: PlanSchema,
  pub warning: CompilerWarning,
  pub explain: ExplainInfo,
}

// -------------------------------------------------------------------------------------------------
//  Engine Messages
// -------------------------------------------------------------------------------------------------

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct SessionParty {
  pub code: PartyCode,
  pub name: String,
  pub rank: i32,
  pub host: String,
  pub public_key: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct SessionStartParams {
  pub party_code: PartyCode,
  pub session_id: JobId,
  pub spu_runtime_cfg: SpuRuntimeConfig,
  pub parties: Vec<SessionParty>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct RunExecutionPlanRequest {
  pub session_params: SessionStartParams,
  pub graph: ExecutionGraph,
  pub async_mode: bool,
  pub debug_opts: DebugOptions,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Tensor {
  pub name: String,
  pub dtype: String,
  pub data: Vec<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct RunExecutionPlanResponse {
  pub status: Status,
  pub out_columns: Vec<Tensor>,
  pub affected_rows: i64,
}

// -------------------------------------------------------------------------------------------------
//  Query Result
// -------------------------------------------------------------------------------------------------

/// Attached whenever the compiler flags possible small-group suppression.
pub const GROUP_THRESHOLD_WARNING: &str =
  "for safety, we filter the results for groups which contain less than 4 items.";

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct SqlWarning {
  pub reason: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct QueryResponse {
  pub status: Status,
  pub out_columns: Vec<Tensor>,
  pub affected_rows: i64,
  pub cost_time_s: f64,
  pub warnings: Vec<SqlWarning>,
}
