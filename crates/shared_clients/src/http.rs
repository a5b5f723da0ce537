use crate::api::{PlatformApi, TokenEndpoint};
use crate::error::{ErrorClass, PlatformError};
use crate::types::{
    LoadMode, LoadRequest, OrgIdentity, QueryResult, RowOutcome, Session, TokenResponse,
};
use async_trait::async_trait;
use common::config::components::orgs::OrgConnection;
use common::types::{ObjectDescribe, Record, RecordExt, ID_FIELD};
use log::debug;
use reqwest::header::RETRY_AFTER;
use reqwest::{Client, Response, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde_json::{json, Value as Json};
use std::time::Duration;
use templates::LoadOperation;

/// Row ceiling of one collection request.
pub const COLLECTION_LIMIT: usize = 200;

/// reqwest implementation of [`PlatformApi`] and [`TokenEndpoint`].
#[derive(Debug, Clone)]
pub struct HttpPlatformClient {
    client: Client,
    api_version: String,
}

impl HttpPlatformClient {
    pub fn new(api_version: &str) -> Self {
        Self {
            client: Client::new(),
            api_version: api_version.to_string(),
        }
    }

    pub fn with_timeout(api_version: &str, timeout: Duration) -> Result<Self, PlatformError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PlatformError::unexpected(format!("failed to build http client: {e}")))?;
        Ok(Self {
            client,
            api_version: api_version.to_string(),
        })
    }

    fn data_url(&self, session: &Session, path: &str) -> String {
        format!(
            "{}/services/data/v{}/{}",
            session.instance_url.trim_end_matches('/'),
            self.api_version,
            path
        )
    }

    fn sobject_url(&self, session: &Session, segments: &[&str]) -> Result<Url, PlatformError> {
        let mut url = Url::parse(&self.data_url(session, "sobjects"))
            .map_err(|e| PlatformError::unexpected(format!("invalid instance url: {e}")))?;
        url.path_segments_mut()
            .map_err(|_| PlatformError::unexpected("instance url cannot carry a path"))?
            .extend(segments);
        Ok(url)
    }

    async fn load_collection(
        &self,
        session: &Session,
        request: &LoadRequest,
        rows: &[Record],
    ) -> Result<Vec<RowOutcome>, PlatformError> {
        let records: Vec<Json> = rows
            .iter()
            .map(|row| {
                let mut row = row.clone();
                row.insert(
                    "attributes".to_string(),
                    json!({ "type": request.object_type }),
                );
                Json::Object(row)
            })
            .collect();
        let body = json!({ "allOrNone": false, "records": records });

        let builder = match request.operation {
            LoadOperation::Insert => self.client.post(self.data_url(session, "composite/sobjects")),
            LoadOperation::Update => self
                .client
                .patch(self.data_url(session, "composite/sobjects")),
            LoadOperation::Upsert => {
                let field = upsert_field(request)?;
                self.client.patch(self.data_url(
                    session,
                    &format!("composite/sobjects/{}/{}", request.object_type, field),
                ))
            }
        };
        let resp = builder
            .bearer_auth(&session.access_token)
            .json(&body)
            .send()
            .await?;
        let outcomes: Vec<RowOutcome> = read_json(resp).await?;
        if outcomes.len() != rows.len() {
            return Err(PlatformError::unexpected(format!(
                "collection {} of {} rows answered with {} outcomes",
                request.operation,
                rows.len(),
                outcomes.len()
            )));
        }
        Ok(outcomes)
    }

    async fn load_one(
        &self,
        session: &Session,
        request: &LoadRequest,
        row: &Record,
    ) -> Result<RowOutcome, PlatformError> {
        let object_type = request.object_type.as_str();
        let mut body = row.clone();
        let (builder, known_id) = match request.operation {
            LoadOperation::Insert => {
                body.remove(ID_FIELD);
                let url = self.sobject_url(session, &[object_type])?;
                (self.client.post(url), None)
            }
            LoadOperation::Update => {
                let Some(id) = row.id() else {
                    return Ok(RowOutcome::failed("MISSING_ID", "update row carries no Id"));
                };
                body.remove(ID_FIELD);
                let url = self.sobject_url(session, &[object_type, id])?;
                (self.client.patch(url), Some(id.to_string()))
            }
            LoadOperation::Upsert => {
                let field = upsert_field(request)?;
                let Some(value) = row.text_field(field) else {
                    return Ok(RowOutcome::failed(
                        "MISSING_EXTERNAL_ID",
                        format!("upsert row carries no value for {field}"),
                    ));
                };
                body.remove(field);
                let url = self.sobject_url(session, &[object_type, field, value.as_str()])?;
                (self.client.patch(url), None)
            }
        };

        let resp = builder
            .bearer_auth(&session.access_token)
            .json(&body)
            .send()
            .await?;
        let status = resp.status();
        if status == StatusCode::NO_CONTENT {
            return Ok(RowOutcome {
                success: true,
                id: known_id,
                created: false,
                errors: Vec::new(),
            });
        }
        if status.is_success() {
            let mut outcome: RowOutcome = read_json(resp).await?;
            outcome.created |= status == StatusCode::CREATED;
            return Ok(outcome);
        }

        let err = error_from(resp).await;
        match err.class() {
            ErrorClass::Auth | ErrorClass::RateLimited | ErrorClass::Connectivity => Err(err),
            class => {
                let code = match (err.code(), class) {
                    (Some(code), _) => code.to_string(),
                    (None, ErrorClass::Retryable) => "SERVER_UNAVAILABLE".to_string(),
                    (None, _) => format!("HTTP_{}", status.as_u16()),
                };
                Ok(RowOutcome::failed(code, err.to_string()))
            }
        }
    }

    async fn token_request(
        &self,
        connection: &OrgConnection,
        mut params: Vec<(&str, &str)>,
    ) -> Result<TokenResponse, PlatformError> {
        params.push(("client_id", connection.client_id.as_str()));
        if let Some(secret) = connection.client_secret.as_deref() {
            params.push(("client_secret", secret));
        }
        let url = format!(
            "{}/services/oauth2/token",
            connection.login_url.trim_end_matches('/')
        );
        let resp = self.client.post(url).form(&params).send().await?;
        read_json(resp).await
    }
}

fn upsert_field(request: &LoadRequest) -> Result<&str, PlatformError> {
    request.external_id_field.as_deref().ok_or_else(|| {
        PlatformError::unexpected(format!(
            "upsert into {} requires an external id field",
            request.object_type
        ))
    })
}

async fn error_from(resp: Response) -> PlatformError {
    let status = resp.status();
    let retry_after = resp
        .headers()
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs);
    let body = resp.text().await.unwrap_or_default();
    PlatformError::from_response(status, &body, retry_after)
}

async fn read_json<T: DeserializeOwned>(resp: Response) -> Result<T, PlatformError> {
    if resp.status().is_success() {
        let bytes = resp.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    } else {
        Err(error_from(resp).await)
    }
}

fn strip_attributes(mut page: QueryResult) -> QueryResult {
    for record in &mut page.records {
        record.remove("attributes");
    }
    page
}

#[async_trait]
impl PlatformApi for HttpPlatformClient {
    async fn identity(&self, session: &Session) -> Result<OrgIdentity, PlatformError> {
        let url = format!(
            "{}/services/oauth2/userinfo",
            session.instance_url.trim_end_matches('/')
        );
        let resp = self
            .client
            .get(url)
            .bearer_auth(&session.access_token)
            .send()
            .await?;
        read_json(resp).await
    }

    async fn query(&self, session: &Session, soql: &str) -> Result<QueryResult, PlatformError> {
        debug!("org={} query={soql}", session.org_id);
        let resp = self
            .client
            .get(self.data_url(session, "query"))
            .bearer_auth(&session.access_token)
            .query(&[("q", soql)])
            .send()
            .await?;
        read_json(resp).await.map(strip_attributes)
    }

    async fn query_more(
        &self,
        session: &Session,
        next_records_url: &str,
    ) -> Result<QueryResult, PlatformError> {
        let url = format!(
            "{}{}",
            session.instance_url.trim_end_matches('/'),
            next_records_url
        );
        let resp = self
            .client
            .get(url)
            .bearer_auth(&session.access_token)
            .send()
            .await?;
        read_json(resp).await.map(strip_attributes)
    }

    async fn describe(
        &self,
        session: &Session,
        object_type: &str,
    ) -> Result<ObjectDescribe, PlatformError> {
        let url = self.sobject_url(session, &[object_type, "describe"])?;
        let resp = self
            .client
            .get(url)
            .bearer_auth(&session.access_token)
            .send()
            .await?;
        read_json(resp).await
    }

    async fn load(
        &self,
        session: &Session,
        request: &LoadRequest,
    ) -> Result<Vec<RowOutcome>, PlatformError> {
        debug!(
            "org={} load op={} object={} rows={} mode={:?}",
            session.org_id,
            request.operation,
            request.object_type,
            request.rows.len(),
            request.mode
        );
        let mut outcomes = Vec::with_capacity(request.rows.len());
        match request.mode {
            LoadMode::Bulk => {
                for chunk in request.rows.chunks(COLLECTION_LIMIT) {
                    outcomes.extend(self.load_collection(session, request, chunk).await?);
                }
            }
            LoadMode::PerRecord => {
                for row in &request.rows {
                    outcomes.push(self.load_one(session, request, row).await?);
                }
            }
        }
        Ok(outcomes)
    }
}

#[async_trait]
impl TokenEndpoint for HttpPlatformClient {
    async fn refresh(
        &self,
        connection: &OrgConnection,
        refresh_token: &str,
    ) -> Result<TokenResponse, PlatformError> {
        self.token_request(
            connection,
            vec![
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
            ],
        )
        .await
    }

    async fn exchange_code(
        &self,
        connection: &OrgConnection,
        code: &str,
        code_verifier: &str,
        redirect_uri: &str,
    ) -> Result<TokenResponse, PlatformError> {
        self.token_request(
            connection,
            vec![
                ("grant_type", "authorization_code"),
                ("code", code),
                ("code_verifier", code_verifier),
                ("redirect_uri", redirect_uri),
            ],
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::types::{OrgId, OrgType};
    use matches::assert_matches;
    use wiremock::matchers::{body_partial_json, body_string_contains, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn session(server: &MockServer) -> Session {
        Session {
            org_id: OrgId::new("source"),
            instance_url: server.uri(),
            access_token: "token-1".to_string(),
        }
    }

    fn record(value: Json) -> Record {
        serde_json::from_value(value).expect("record")
    }

    fn upsert(rows: Vec<Record>, mode: LoadMode) -> LoadRequest {
        LoadRequest {
            operation: LoadOperation::Upsert,
            object_type: "Account".to_string(),
            external_id_field: Some("External_ID__c".to_string()),
            rows,
            mode,
        }
    }

    #[tokio::test]
    async fn query_pages_and_strips_attributes() -> Result<(), PlatformError> {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/services/data/v60.0/query"))
            .and(query_param("q", "SELECT Id FROM Account"))
            .and(header("authorization", "Bearer token-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "totalSize": 2,
                "done": false,
                "nextRecordsUrl": "/services/data/v60.0/query/01gD-2000",
                "records": [{"attributes": {"type": "Account"}, "Id": "001A"}]
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/services/data/v60.0/query/01gD-2000"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "totalSize": 2,
                "done": true,
                "records": [{"attributes": {"type": "Account"}, "Id": "001B"}]
            })))
            .mount(&server)
            .await;

        let client = HttpPlatformClient::new("60.0");
        let s = session(&server);
        let first = client.query(&s, "SELECT Id FROM Account").await?;
        assert!(!first.done);
        assert!(first.records[0].get("attributes").is_none());
        let next = first.next_records_url.as_deref().unwrap_or_default();
        let second = client.query_more(&s, next).await?;
        assert!(second.done);
        assert_eq!(second.records[0].id(), Some("001B"));
        Ok(())
    }

    #[tokio::test]
    async fn describe_parses_fields() -> Result<(), PlatformError> {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/services/data/v60.0/sobjects/Account/describe"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "name": "Account",
                "fields": [
                    {"name": "Id", "type": "id", "nillable": false},
                    {"name": "dcr__External_ID__c", "type": "string", "externalId": true, "createable": true},
                    {"name": "Industry", "type": "picklist", "picklistValues": [
                        {"value": "Energy", "active": true}, {"value": "Legacy", "active": false}
                    ]}
                ]
            })))
            .mount(&server)
            .await;

        let describe = HttpPlatformClient::new("60.0")
            .describe(&session(&server), "Account")
            .await?;
        assert!(describe.has_field("DCR__EXTERNAL_ID__C"));
        assert_eq!(describe.allowed_values("Industry"), Some(vec!["Energy"]));
        Ok(())
    }

    #[tokio::test]
    async fn collection_upsert_reports_each_row() -> Result<(), PlatformError> {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .and(path("/services/data/v60.0/composite/sobjects/Account/External_ID__c"))
            .and(body_partial_json(json!({"allOrNone": false})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"id": "001T1", "success": true, "created": true, "errors": []},
                {"success": false, "errors": [
                    {"statusCode": "REQUIRED_FIELD_MISSING", "message": "Required fields are missing: [Name]", "fields": ["Name"]}
                ]}
            ])))
            .expect(1)
            .mount(&server)
            .await;

        let rows = vec![
            record(json!({"External_ID__c": "001A", "Name": "Acme"})),
            record(json!({"External_ID__c": "001B"})),
        ];
        let outcomes = HttpPlatformClient::new("60.0")
            .load(&session(&server), &upsert(rows, LoadMode::Bulk))
            .await?;
        assert_eq!(outcomes.len(), 2);
        assert_eq!(outcomes[0].id.as_deref(), Some("001T1"));
        assert_eq!(outcomes[1].first_code(), Some("REQUIRED_FIELD_MISSING"));
        Ok(())
    }

    #[tokio::test]
    async fn per_record_upsert_turns_row_errors_into_outcomes() -> Result<(), PlatformError> {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .and(path("/services/data/v60.0/sobjects/Account/External_ID__c/001A"))
            .respond_with(
                ResponseTemplate::new(201)
                    .set_body_json(json!({"id": "001T1", "success": true, "errors": []})),
            )
            .mount(&server)
            .await;
        Mock::given(method("PATCH"))
            .and(path("/services/data/v60.0/sobjects/Account/External_ID__c/001B"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!([
                {"errorCode": "UNABLE_TO_LOCK_ROW", "message": "unable to obtain exclusive access to this record"}
            ])))
            .mount(&server)
            .await;

        let rows = vec![
            record(json!({"External_ID__c": "001A", "Name": "Acme"})),
            record(json!({"External_ID__c": "001B", "Name": "Globex"})),
        ];
        let outcomes = HttpPlatformClient::new("60.0")
            .load(&session(&server), &upsert(rows, LoadMode::PerRecord))
            .await?;
        assert!(outcomes[0].success && outcomes[0].created);
        assert_eq!(outcomes[1].first_code(), Some("UNABLE_TO_LOCK_ROW"));
        Ok(())
    }

    #[tokio::test]
    async fn expired_session_is_an_auth_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/services/oauth2/userinfo"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!([
                {"errorCode": "INVALID_SESSION_ID", "message": "Session expired or invalid"}
            ])))
            .mount(&server)
            .await;

        let err = HttpPlatformClient::new("60.0")
            .identity(&session(&server))
            .await
            .expect_err("401");
        assert_eq!(err.class(), ErrorClass::Auth);
    }

    #[tokio::test]
    async fn throttled_query_carries_retry_after() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/services/data/v60.0/query"))
            .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "7"))
            .mount(&server)
            .await;

        let err = HttpPlatformClient::new("60.0")
            .query(&session(&server), "SELECT Id FROM Account")
            .await
            .expect_err("429");
        assert_matches!(
            err,
            PlatformError::RateLimited { retry_after: Some(d), .. } if d == Duration::from_secs(7)
        );
    }

    #[tokio::test]
    async fn refresh_posts_refresh_grant() -> Result<(), PlatformError> {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/services/oauth2/token"))
            .and(body_string_contains("grant_type=refresh_token"))
            .and(body_string_contains("refresh_token=r-1"))
            .and(body_string_contains("client_id=client"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "token-2",
                "instance_url": "https://acme.example.com",
                "token_type": "Bearer"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let connection = OrgConnection {
            instance_url: "https://acme.example.com".to_string(),
            login_url: server.uri(),
            client_id: "client".to_string(),
            client_secret: None,
            redirect_uri: None,
            org_type: OrgType::Sandbox,
        };
        let token = HttpPlatformClient::new("60.0")
            .refresh(&connection, "r-1")
            .await?;
        assert_eq!(token.access_token, "token-2");
        assert_eq!(token.expires_in, 7_200);
        assert!(token.refresh_token.is_none());
        Ok(())
    }
}
