use async_trait::async_trait;
use common::config::components::orgs::OrgConnection;
use common::types::{ObjectDescribe, OrgId, Record, RecordExt, ID_FIELD};
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use regex::Regex;
use serde_json::Value as Json;
use shared_clients::{
    LoadMode, LoadRequest, OrgIdentity, PlatformApi, PlatformError, QueryResult, RowError,
    RowOutcome, Session, TokenEndpoint, TokenResponse,
};
use std::collections::{HashMap, VecDeque};
use templates::{is_blank, LoadOperation};

static QUERY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?is)^\s*SELECT\s+(?P<fields>.+?)\s+FROM\s+(?P<object>\w+)(?:\s+WHERE\s+(?P<key>\w+)\s*(?:IN\s*\((?P<list>[^)]*)\)|=\s*'(?P<single>[^']*)'))?",
    )
    .expect("query pattern")
});

/// Every call the fake platform served, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum PlatformCall {
    Identity {
        org: OrgId,
    },
    Query {
        org: OrgId,
        soql: String,
    },
    Describe {
        org: OrgId,
        object_type: String,
    },
    Load {
        org: OrgId,
        object_type: String,
        operation: LoadOperation,
        rows: usize,
        mode: LoadMode,
    },
    Refresh,
}

#[derive(Default)]
struct FakeOrg {
    id_prefix: String,
    describes: HashMap<String, ObjectDescribe>,
    records: HashMap<String, Vec<Record>>,
    row_failures: HashMap<String, VecDeque<String>>,
    /// Request-level failures keyed by object type and 1-based load call.
    load_failures: HashMap<(String, usize), PlatformError>,
    load_counts: HashMap<String, usize>,
    unreachable: bool,
    next_id: u64,
}

impl FakeOrg {
    fn new_id(&mut self) -> String {
        self.next_id += 1;
        format!("{}{:012}", self.id_prefix, self.next_id)
    }

    fn query(&self, soql: &str) -> Result<QueryResult, PlatformError> {
        let caps = QUERY
            .captures(soql)
            .ok_or_else(|| PlatformError::rejected(400, "unexpected token", Some("MALFORMED_QUERY".into())))?;
        let fields: Vec<&str> = caps["fields"].split(',').map(str::trim).collect();
        let object = &caps["object"];
        let wanted: Option<Vec<String>> = match (caps.name("list"), caps.name("single")) {
            (Some(list), _) => Some(
                list.as_str()
                    .split(',')
                    .map(|v| v.trim().trim_matches('\'').to_string())
                    .filter(|v| !v.is_empty())
                    .collect(),
            ),
            (None, Some(single)) => Some(vec![single.as_str().to_string()]),
            (None, None) => None,
        };
        let key = caps.name("key").map(|k| k.as_str());

        let records: Vec<Record> = self
            .records
            .get(object)
            .map(|rows| {
                rows.iter()
                    .filter(|row| match (key, &wanted) {
                        (Some(key), Some(wanted)) => row
                            .text_field(key)
                            .is_some_and(|v| wanted.contains(&v)),
                        _ => true,
                    })
                    .map(|row| project(row, &fields))
                    .collect()
            })
            .unwrap_or_default();
        Ok(QueryResult {
            total_size: records.len(),
            done: true,
            next_records_url: None,
            records,
        })
    }

    fn load_row(&mut self, request: &LoadRequest, row: &Record) -> RowOutcome {
        let object = request.object_type.as_str();
        let ext_field = request.external_id_field.as_deref().unwrap_or_default();
        let key = match request.operation {
            LoadOperation::Upsert => row.text_field(ext_field),
            _ => row.id().map(str::to_string),
        };
        if let Some(key) = &key {
            let scripted = self
                .row_failures
                .get_mut(&failure_key(object, key))
                .and_then(VecDeque::pop_front);
            if let Some(code) = scripted {
                return RowOutcome::failed(code, "scripted failure");
            }
        }

        if request.operation != LoadOperation::Update {
            if let Some(describe) = self.describes.get(object) {
                let missing: Vec<String> = describe
                    .fields
                    .iter()
                    .filter(|f| f.is_required_on_create() && f.name != ID_FIELD)
                    .filter(|f| row.get(&f.name).map_or(true, is_blank))
                    .map(|f| f.name.clone())
                    .collect();
                if !missing.is_empty() {
                    return RowOutcome {
                        success: false,
                        id: None,
                        created: false,
                        errors: vec![RowError {
                            code: "REQUIRED_FIELD_MISSING".to_string(),
                            message: format!("Required fields are missing: [{}]", missing.join(", ")),
                            fields: missing,
                        }],
                    };
                }
            }
        }

        let existing = match request.operation {
            LoadOperation::Insert => None,
            LoadOperation::Update => key.as_deref().and_then(|id| self.position(object, ID_FIELD, id)),
            LoadOperation::Upsert => key.as_deref().and_then(|v| self.position(object, ext_field, v)),
        };
        match (existing, request.operation) {
            (Some(pos), _) => {
                let rows = self.records.entry(object.to_string()).or_default();
                let target = &mut rows[pos];
                for (field, value) in row {
                    if field != ID_FIELD {
                        target.insert(field.clone(), value.clone());
                    }
                }
                let id = target.id().unwrap_or_default().to_string();
                RowOutcome::ok(id, false)
            }
            (None, LoadOperation::Update) => {
                RowOutcome::failed("INVALID_CROSS_REFERENCE_KEY", "invalid cross reference id")
            }
            (None, _) => {
                let id = self.new_id();
                let mut stored = row.clone();
                stored.insert(ID_FIELD.to_string(), Json::String(id.clone()));
                self.records.entry(object.to_string()).or_default().push(stored);
                RowOutcome::ok(id, true)
            }
        }
    }

    fn position(&self, object: &str, field: &str, value: &str) -> Option<usize> {
        self.records
            .get(object)?
            .iter()
            .position(|r| r.text_field(field).as_deref() == Some(value))
    }
}

fn failure_key(object: &str, key: &str) -> String {
    format!("{object}/{key}")
}

fn project(row: &Record, fields: &[&str]) -> Record {
    let mut out = Record::new();
    if let Some(id) = row.get(ID_FIELD) {
        out.insert(ID_FIELD.to_string(), id.clone());
    }
    for field in fields {
        out.insert(
            field.to_string(),
            row.get(*field).cloned().unwrap_or(Json::Null),
        );
    }
    out
}

/// A multi-org platform held in memory.
///
/// Queries understand `SELECT .. FROM .. [WHERE field IN (..) | field = '..']`
/// and ignore any further conditions. Loads enforce the describe's required
/// fields and honour failures scripted with [`FakePlatform::fail_row`] and
/// [`FakePlatform::fail_load`].
#[derive(Default)]
pub struct FakePlatform {
    orgs: Mutex<HashMap<OrgId, FakeOrg>>,
    calls: Mutex<Vec<PlatformCall>>,
    refresh_count: Mutex<usize>,
}

impl FakePlatform {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_org(&self, org: &str, id_prefix: &str) {
        self.orgs.lock().insert(
            OrgId::new(org),
            FakeOrg {
                id_prefix: id_prefix.to_string(),
                ..FakeOrg::default()
            },
        );
    }

    pub fn add_describe(&self, org: &str, describe: ObjectDescribe) {
        self.with_org(org, |o| {
            o.describes.insert(describe.name.clone(), describe);
        });
    }

    pub fn insert_records(&self, org: &str, object_type: &str, records: Vec<Record>) {
        self.with_org(org, |o| {
            o.records
                .entry(object_type.to_string())
                .or_default()
                .extend(records);
        });
    }

    /// The next `times` loads of the row keyed `key` (external id for
    /// upserts, `Id` otherwise) fail with `code`.
    pub fn fail_row(&self, org: &str, object_type: &str, key: &str, code: &str, times: usize) {
        self.with_org(org, |o| {
            o.row_failures
                .entry(failure_key(object_type, key))
                .or_default()
                .extend(std::iter::repeat(code.to_string()).take(times));
        });
    }

    /// The `nth` load call (1-based) for `object_type` in `org` fails as a
    /// whole with `error` and writes nothing.
    pub fn fail_load(&self, org: &str, object_type: &str, nth: usize, error: PlatformError) {
        self.with_org(org, |o| {
            o.load_failures.insert((object_type.to_string(), nth), error);
        });
    }

    pub fn set_unreachable(&self, org: &str, unreachable: bool) {
        self.with_org(org, |o| o.unreachable = unreachable);
    }

    pub fn records(&self, org: &str, object_type: &str) -> Vec<Record> {
        self.orgs
            .lock()
            .get(&OrgId::new(org))
            .and_then(|o| o.records.get(object_type).cloned())
            .unwrap_or_default()
    }

    pub fn calls(&self) -> Vec<PlatformCall> {
        self.calls.lock().clone()
    }

    pub fn load_calls(&self) -> Vec<PlatformCall> {
        self.calls()
            .into_iter()
            .filter(|c| matches!(c, PlatformCall::Load { .. }))
            .collect()
    }

    pub fn refreshes(&self) -> usize {
        *self.refresh_count.lock()
    }

    fn with_org<T>(&self, org: &str, f: impl FnOnce(&mut FakeOrg) -> T) -> T {
        let mut orgs = self.orgs.lock();
        let entry = orgs.entry(OrgId::new(org)).or_default();
        f(entry)
    }

    fn record_call(&self, call: PlatformCall) {
        self.calls.lock().push(call);
    }

    fn serve<T>(
        &self,
        session: &Session,
        f: impl FnOnce(&mut FakeOrg) -> Result<T, PlatformError>,
    ) -> Result<T, PlatformError> {
        let mut orgs = self.orgs.lock();
        let org = orgs
            .get_mut(&session.org_id)
            .ok_or_else(|| PlatformError::auth(format!("unknown org {}", session.org_id)))?;
        if org.unreachable {
            return Err(PlatformError::connectivity(format!(
                "connection refused by {}",
                session.org_id
            )));
        }
        f(org)
    }
}

#[async_trait]
impl PlatformApi for FakePlatform {
    async fn identity(&self, session: &Session) -> Result<OrgIdentity, PlatformError> {
        self.record_call(PlatformCall::Identity {
            org: session.org_id.clone(),
        });
        self.serve(session, |_| {
            Ok(OrgIdentity {
                organization_id: format!("00D-{}", session.org_id),
                user_id: "005000000000001".to_string(),
                preferred_username: Some(format!("admin@{}.example.com", session.org_id)),
            })
        })
    }

    async fn query(&self, session: &Session, soql: &str) -> Result<QueryResult, PlatformError> {
        self.record_call(PlatformCall::Query {
            org: session.org_id.clone(),
            soql: soql.to_string(),
        });
        self.serve(session, |org| org.query(soql))
    }

    async fn query_more(
        &self,
        session: &Session,
        _next_records_url: &str,
    ) -> Result<QueryResult, PlatformError> {
        self.serve(session, |_| {
            Ok(QueryResult {
                total_size: 0,
                done: true,
                next_records_url: None,
                records: Vec::new(),
            })
        })
    }

    async fn describe(
        &self,
        session: &Session,
        object_type: &str,
    ) -> Result<ObjectDescribe, PlatformError> {
        self.record_call(PlatformCall::Describe {
            org: session.org_id.clone(),
            object_type: object_type.to_string(),
        });
        self.serve(session, |org| {
            org.describes.get(object_type).cloned().ok_or_else(|| {
                PlatformError::rejected(
                    404,
                    format!("The requested resource does not exist: {object_type}"),
                    Some("NOT_FOUND".to_string()),
                )
            })
        })
    }

    async fn load(
        &self,
        session: &Session,
        request: &LoadRequest,
    ) -> Result<Vec<RowOutcome>, PlatformError> {
        self.record_call(PlatformCall::Load {
            org: session.org_id.clone(),
            object_type: request.object_type.clone(),
            operation: request.operation,
            rows: request.rows.len(),
            mode: request.mode,
        });
        self.serve(session, |org| {
            let count = org
                .load_counts
                .entry(request.object_type.clone())
                .or_default();
            *count += 1;
            let key = (request.object_type.clone(), *count);
            if let Some(err) = org.load_failures.remove(&key) {
                return Err(err);
            }
            Ok(request
                .rows
                .iter()
                .map(|row| org.load_row(request, row))
                .collect())
        })
    }
}

#[async_trait]
impl TokenEndpoint for FakePlatform {
    async fn refresh(
        &self,
        connection: &OrgConnection,
        _refresh_token: &str,
    ) -> Result<TokenResponse, PlatformError> {
        self.record_call(PlatformCall::Refresh);
        let n = {
            let mut count = self.refresh_count.lock();
            *count += 1;
            *count
        };
        Ok(TokenResponse {
            access_token: format!("{}-access-{n}", connection.client_id),
            refresh_token: None,
            instance_url: connection.instance_url.clone(),
            expires_in: 7_200,
        })
    }

    async fn exchange_code(
        &self,
        connection: &OrgConnection,
        code: &str,
        _code_verifier: &str,
        _redirect_uri: &str,
    ) -> Result<TokenResponse, PlatformError> {
        Ok(TokenResponse {
            access_token: format!("{}-granted-{code}", connection.client_id),
            refresh_token: Some(format!("{}-refresh", connection.client_id)),
            instance_url: connection.instance_url.clone(),
            expires_in: 7_200,
        })
    }
}
