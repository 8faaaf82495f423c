//! GraphQL client for the A to Z scheduling API.
//!
//! The web app talks to a single GraphQL endpoint; this client issues the two
//! operations the picker needs: `FindShiftsPage` to list opportunities in a
//! time range and `AddShift` to claim one.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, error, info, warn};

use crate::auth::Session;
use crate::models::{OpportunityRaw, ShiftOpportunity};
use crate::utils::request_id;

use super::{ApiError, Endpoints, OpportunityApi};

// ============================================================================
// Constants
// ============================================================================

/// Client id the scheduling web app identifies itself with
const CLIENT_ID: &str = "SCHEDULE_MANAGEMENT_SERVICE";

/// Only "add shift" opportunities are of interest
const OPPORTUNITY_TYPE_ADD: &str = "ADD";

const FIND_SHIFTS_QUERY: &str = r#"
query FindShiftsPage(
  $shiftOpportunitiesTimeRange: DateTimeRangeInput!
  $opportunitiesOpportunityTypes: TypeFilter
  $countTypes: TypeFilter
) {
  shiftOpportunities(timeRange: $shiftOpportunitiesTimeRange) {
    opportunities(opportunityTypes: $opportunitiesOpportunityTypes) {
      eligibility {
        isEligible
      }
      id
      skill
      unavailability {
        reasons
      }
      shift {
        duration {
          value
        }
        id
        timeRange {
          end
          start
        }
      }
    }
    counts(countTypes: $countTypes) {
      count
    }
  }
}
"#;

const ADD_SHIFT_MUTATION: &str = r#"
mutation AddShift($shiftOpportunityId: AddShiftInput!) {
  addShift(input: $shiftOpportunityId)
}
"#;

// ============================================================================
// Response types
// ============================================================================

#[derive(Debug, Deserialize)]
struct GraphQlResponse<T> {
    data: Option<T>,
    #[serde(default)]
    errors: Vec<GraphQlErrorApi>,
}

impl<T> GraphQlResponse<T> {
    /// The `data` payload, or the server's error messages when it is absent.
    fn into_data(self, body: &str) -> Result<T, ApiError> {
        match self.data {
            Some(data) => Ok(data),
            None if !self.errors.is_empty() => Err(ApiError::GraphQl(
                self.errors
                    .into_iter()
                    .map(|e| e.message)
                    .collect::<Vec<_>>()
                    .join("; "),
            )),
            None => Err(ApiError::InvalidResponse(ApiError::truncate_body(body))),
        }
    }
}

#[derive(Debug, Deserialize)]
struct GraphQlErrorApi {
    message: String,
}

#[derive(Debug, Deserialize)]
struct FindShiftsData {
    #[serde(rename = "shiftOpportunities")]
    shift_opportunities: Option<ShiftOpportunitiesPage>,
}

#[derive(Debug, Deserialize)]
struct ShiftOpportunitiesPage {
    opportunities: Vec<OpportunityRaw>,
    counts: Vec<CountApi>,
}

impl ShiftOpportunitiesPage {
    fn count(&self) -> i64 {
        self.counts.first().and_then(|c| c.count).unwrap_or(0)
    }
}

#[derive(Debug, Deserialize)]
struct CountApi {
    #[serde(default)]
    count: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct AddShiftData {
    #[serde(rename = "addShift")]
    add_shift: Option<String>,
}

// ============================================================================
// Client
// ============================================================================

/// Production `OpportunityApi`. Holds no HTTP state of its own: every request
/// goes out on the calling session's HTTP context.
#[derive(Debug, Clone)]
pub struct ApiClient {
    endpoints: Arc<Endpoints>,
}

impl ApiClient {
    pub fn new(endpoints: Arc<Endpoints>) -> Self {
        Self { endpoints }
    }

    fn find_shifts_body(start: DateTime<Utc>, end: DateTime<Utc>) -> Value {
        json!({
            "operationName": "FindShiftsPage",
            "query": FIND_SHIFTS_QUERY,
            "variables": {
                "shiftOpportunitiesTimeRange": {
                    "start": start.to_rfc3339_opts(SecondsFormat::Secs, false),
                    "end": end.to_rfc3339_opts(SecondsFormat::Secs, false),
                },
                "opportunitiesOpportunityTypes": { "types": [OPPORTUNITY_TYPE_ADD] },
                "countTypes": { "types": [OPPORTUNITY_TYPE_ADD] },
            }
        })
    }

    fn add_shift_body(opportunity_id: &str) -> Value {
        json!({
            "operationName": "AddShift",
            "query": ADD_SHIFT_MUTATION,
            "variables": {
                "shiftOpportunityId": { "shiftOpportunityId": opportunity_id }
            }
        })
    }

    /// POST a GraphQL document and return the raw body of a 200 response.
    async fn post_graphql(&self, session: &Session, body: &Value) -> Result<String, ApiError> {
        let employee_id = session.employee_id().await.ok_or(ApiError::NotReady)?;
        let url = self.endpoints.graphql_url(employee_id);

        // Captured once: a context swap mid-request does not affect this call
        let context = session.client();
        let response = context
            .http()
            .post(&url)
            .header("x-atoz-client-id", CLIENT_ID)
            .header("x-atoz-client-request-id", request_id())
            .json(body)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        if status != StatusCode::OK {
            return Err(ApiError::from_status(status, &text));
        }
        Ok(text)
    }

    async fn try_fetch(
        &self,
        session: &Session,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<ShiftOpportunity>, ApiError> {
        let text = self
            .post_graphql(session, &Self::find_shifts_body(start, end))
            .await?;

        let parsed: GraphQlResponse<FindShiftsData> = serde_json::from_str(&text).map_err(|e| {
            ApiError::InvalidResponse(format!("{}: {}", e, ApiError::truncate_body(&text)))
        })?;
        let page = parsed
            .into_data(&text)?
            .shift_opportunities
            .ok_or_else(|| ApiError::InvalidResponse(ApiError::truncate_body(&text)))?;

        if page.count() == 0 {
            debug!(%start, %end, "No shifts available");
            return Ok(vec![]);
        }

        Ok(page
            .opportunities
            .iter()
            .filter_map(|raw| match raw.to_opportunity() {
                Ok(opportunity) => Some(opportunity),
                Err(e) => {
                    warn!(id = %raw.id, error = %e, "Skipping opportunity with unparseable time range");
                    None
                }
            })
            .collect())
    }

    async fn try_claim(&self, session: &Session, opportunity_id: &str) -> Result<(), ApiError> {
        let text = self
            .post_graphql(session, &Self::add_shift_body(opportunity_id))
            .await?;

        let parsed: GraphQlResponse<AddShiftData> = serde_json::from_str(&text).map_err(|e| {
            ApiError::InvalidResponse(format!("{}: {}", e, ApiError::truncate_body(&text)))
        })?;
        match parsed.into_data(&text)?.add_shift {
            Some(echoed) if echoed == opportunity_id => Ok(()),
            got => Err(ApiError::ClaimNotConfirmed {
                expected: opportunity_id.to_string(),
                got,
            }),
        }
    }
}

#[async_trait]
impl OpportunityApi for ApiClient {
    async fn prepare(&self, session: &Session) -> bool {
        session.employee_id().await.is_some()
    }

    async fn fetch_opportunities(
        &self,
        session: &Session,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Vec<ShiftOpportunity> {
        match self.try_fetch(session, start, end).await {
            Ok(opportunities) => {
                debug!(
                    username = %session.username(),
                    %start,
                    %end,
                    count = opportunities.len(),
                    "Opportunities fetched"
                );
                opportunities
            }
            Err(e) => {
                error!(username = %session.username(), %start, %end, error = %e, "Failed to get shifts");
                vec![]
            }
        }
    }

    async fn claim_opportunity(&self, session: &Session, opportunity_id: &str) -> bool {
        match self.try_claim(session, opportunity_id).await {
            Ok(()) => {
                info!(username = %session.username(), id = %opportunity_id, "Shift claimed");
                true
            }
            Err(e) => {
                error!(username = %session.username(), id = %opportunity_id, error = %e, "Failed to pick shift");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::FakeLoginFlow;
    use crate::testing::{user_config, utc};
    use mockito::Matcher;

    const SHIFTS_PAGE: &str = r#"<script>window.__data = {"employeeId":"123456789","locale":"en-US"};</script>"#;

    async fn authenticated_session(server: &mockito::ServerGuard) -> (Session, Arc<Endpoints>) {
        let endpoints = Arc::new(Endpoints::single(&server.url()));
        let login = Arc::new(FakeLoginFlow::succeeding());
        let session = Session::new(user_config("jdoe"), login, endpoints.clone())
            .expect("Failed to create session");
        assert!(session.authenticate(false).await);
        (session, endpoints)
    }

    #[tokio::test]
    async fn test_fetch_parses_opportunities() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/shifts")
            .with_status(200)
            .with_body(SHIFTS_PAGE)
            .create_async()
            .await;
        let graphql = server
            .mock("POST", Matcher::Regex("^/graphql".to_string()))
            .match_header("x-atoz-client-id", CLIENT_ID)
            .match_body(Matcher::PartialJson(json!({
                "operationName": "FindShiftsPage",
                "variables": {
                    "shiftOpportunitiesTimeRange": {
                        "start": "2026-10-19T00:00:00+00:00",
                        "end": "2026-10-26T00:00:00+00:00"
                    }
                }
            })))
            .with_status(200)
            .with_body(
                r#"{"data":{"shiftOpportunities":{"opportunities":[
                    {"eligibility":{"isEligible":true},"id":"opp-1","skill":"Sort","unavailability":{"reasons":[]},"shift":{"id":"s1","duration":{"value":480},"timeRange":{"start":"2026-10-20T08:00:00Z","end":"2026-10-20T16:00:00Z"}}},
                    {"eligibility":{"isEligible":false},"id":"opp-2","skill":"Sort","unavailability":{"reasons":[]},"shift":{"id":"s2","timeRange":{"start":"2026-10-21T08:00:00Z","end":"2026-10-21T16:00:00Z"}}}
                ],"counts":[{"count":2}]}}}"#,
            )
            .create_async()
            .await;

        let (session, endpoints) = authenticated_session(&server).await;
        let api = ApiClient::new(endpoints);

        assert!(api.prepare(&session).await);
        let opportunities = api
            .fetch_opportunities(&session, utc("2026-10-19T00:00:00Z"), utc("2026-10-26T00:00:00Z"))
            .await;

        graphql.assert_async().await;
        assert_eq!(opportunities.len(), 2);
        assert_eq!(opportunities[0].id, "opp-1");
        assert!(opportunities[0].is_available());
        assert!(!opportunities[1].is_available());
    }

    #[tokio::test]
    async fn test_fetch_zero_count_is_empty() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/shifts")
            .with_body(SHIFTS_PAGE)
            .create_async()
            .await;
        server
            .mock("POST", Matcher::Regex("^/graphql".to_string()))
            .with_body(r#"{"data":{"shiftOpportunities":{"opportunities":[],"counts":[{"count":0}]}}}"#)
            .create_async()
            .await;

        let (session, endpoints) = authenticated_session(&server).await;
        let api = ApiClient::new(endpoints);
        let opportunities = api
            .fetch_opportunities(&session, utc("2026-10-19T00:00:00Z"), utc("2026-10-20T00:00:00Z"))
            .await;
        assert!(opportunities.is_empty());
    }

    #[tokio::test]
    async fn test_fetch_failures_yield_empty() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/shifts")
            .with_body(SHIFTS_PAGE)
            .create_async()
            .await;
        let failing = server
            .mock("POST", Matcher::Regex("^/graphql".to_string()))
            .with_status(500)
            .with_body("upstream exploded")
            .create_async()
            .await;

        let (session, endpoints) = authenticated_session(&server).await;
        let api = ApiClient::new(endpoints);
        let opportunities = api
            .fetch_opportunities(&session, utc("2026-10-19T00:00:00Z"), utc("2026-10-20T00:00:00Z"))
            .await;
        assert!(opportunities.is_empty());
        failing.assert_async().await;
    }

    #[tokio::test]
    async fn test_fetch_malformed_payload_yields_empty() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/shifts")
            .with_body(SHIFTS_PAGE)
            .create_async()
            .await;
        server
            .mock("POST", Matcher::Regex("^/graphql".to_string()))
            .with_body(r#"{"data":{"somethingElse":true}}"#)
            .create_async()
            .await;

        let (session, endpoints) = authenticated_session(&server).await;
        let api = ApiClient::new(endpoints);
        let opportunities = api
            .fetch_opportunities(&session, utc("2026-10-19T00:00:00Z"), utc("2026-10-20T00:00:00Z"))
            .await;
        assert!(opportunities.is_empty());
    }

    #[tokio::test]
    async fn test_claim_requires_matching_echo() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/shifts")
            .with_body(SHIFTS_PAGE)
            .create_async()
            .await;
        server
            .mock("POST", Matcher::Regex("^/graphql".to_string()))
            .match_body(Matcher::PartialJson(json!({
                "variables": { "shiftOpportunityId": { "shiftOpportunityId": "opp-1" } }
            })))
            .with_body(r#"{"data":{"addShift":"opp-1"}}"#)
            .create_async()
            .await;
        server
            .mock("POST", Matcher::Regex("^/graphql".to_string()))
            .match_body(Matcher::PartialJson(json!({
                "variables": { "shiftOpportunityId": { "shiftOpportunityId": "opp-2" } }
            })))
            .with_body(r#"{"data":{"addShift":"opp-somebody-else"}}"#)
            .create_async()
            .await;

        let (session, endpoints) = authenticated_session(&server).await;
        let api = ApiClient::new(endpoints);

        assert!(api.claim_opportunity(&session, "opp-1").await);
        assert!(!api.claim_opportunity(&session, "opp-2").await);
    }

    #[tokio::test]
    async fn test_calls_without_employee_id_fail_soft() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/shifts")
            .with_status(503)
            .create_async()
            .await;
        let graphql = server
            .mock("POST", Matcher::Regex("^/graphql".to_string()))
            .expect(0)
            .create_async()
            .await;

        let (session, endpoints) = authenticated_session(&server).await;
        let api = ApiClient::new(endpoints);

        assert!(!api.prepare(&session).await);
        assert!(!api.claim_opportunity(&session, "opp-1").await);
        graphql.assert_async().await;
    }

    #[tokio::test]
    async fn test_claim_surfaces_graphql_errors() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/shifts")
            .with_body(SHIFTS_PAGE)
            .create_async()
            .await;
        server
            .mock("POST", Matcher::Regex("^/graphql".to_string()))
            .with_body(r#"{"data":null,"errors":[{"message":"Shift no longer available"}]}"#)
            .create_async()
            .await;

        let (session, endpoints) = authenticated_session(&server).await;
        let api = ApiClient::new(endpoints);

        let err = api
            .try_claim(&session, "opp-1")
            .await
            .expect_err("claim should fail");
        assert!(matches!(err, ApiError::GraphQl(msg) if msg == "Shift no longer available"));
    }

    #[tokio::test]
    async fn test_claim_null_echo_not_confirmed() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/shifts")
            .with_body(SHIFTS_PAGE)
            .create_async()
            .await;
        server
            .mock("POST", Matcher::Regex("^/graphql".to_string()))
            .with_body(r#"{"data":{"addShift":null}}"#)
            .create_async()
            .await;

        let (session, endpoints) = authenticated_session(&server).await;
        let api = ApiClient::new(endpoints);

        let err = api
            .try_claim(&session, "opp-1")
            .await
            .expect_err("claim should fail");
        assert!(matches!(
            err,
            ApiError::ClaimNotConfirmed { expected, got: None } if expected == "opp-1"
        ));
    }
}
