//! Tibber GraphQL API client
//!
//! This module provides the five queries the price coordinator consumes
//! (user info, price info and the three rating resolutions) together with
//! the error taxonomy the scheduler's error handling is built on.

use std::time::Duration;

use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use super::{Home, PricePoint, RatingPeriod, RatingResolution, RatingThresholds, UserInfo};

/// Tibber GraphQL endpoint
const TIBBER_API_URL: &str = "https://api.tibber.com/v1-beta/gql";

/// Per-request timeout
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Attempts per query before giving up
const MAX_RETRIES: u32 = 3;

/// Base delay between retries
const RETRY_DELAY: Duration = Duration::from_secs(1);

const USER_INFO_QUERY: &str = "{viewer{userId name login homes{id type appNickname \
     address{address1 postalCode city country}}}}";

const PRICE_INFO_QUERY: &str = "{viewer{homes{id currentSubscription{priceInfo{\
     range(resolution:HOURLY,last:48){edges{node{startsAt total energy tax level}}} \
     today{startsAt total energy tax level} \
     tomorrow{startsAt total energy tax level}}}}}}";

const HOURLY_RATING_QUERY: &str = "{viewer{homes{id currentSubscription{priceRating{\
     thresholdPercentages{low high} \
     hourly{currency entries{time total energy tax difference level}}}}}}}";

const DAILY_RATING_QUERY: &str = "{viewer{homes{id currentSubscription{priceRating{\
     thresholdPercentages{low high} \
     daily{currency entries{time total energy tax difference level}}}}}}}";

const MONTHLY_RATING_QUERY: &str = "{viewer{homes{id currentSubscription{priceRating{\
     thresholdPercentages{low high} \
     monthly{currency entries{time total energy tax difference level}}}}}}}";

/// Errors that can occur when talking to the Tibber API
#[derive(Debug, Error)]
pub enum TibberError {
    /// Credentials rejected - fatal, never retried
    #[error("invalid access token or unauthorized access")]
    Authentication,

    /// Too many requests - caller keeps its cache and tries again later
    #[error("rate limit exceeded")]
    RateLimit,

    /// Network-level failure (connect, timeout, DNS)
    #[error("communication error with the Tibber API: {0}")]
    Communication(String),

    /// Unexpected status, malformed body or GraphQL-level error
    #[error("Tibber API error: {0}")]
    Api(String),
}

/// Account identity plus the homes it owns
#[derive(Debug, Clone)]
pub struct UserAccount {
    pub user_info: UserInfo,
    pub homes: Vec<Home>,
}

/// Price curves for one home as returned by the price-info query
///
/// Fields are `None` when the home's subscription carried no price info at
/// all; the coordinator must not overwrite cached curves in that case.
#[derive(Debug, Clone)]
pub struct HomePrices {
    pub home_id: String,
    pub today: Option<Vec<PricePoint>>,
    pub tomorrow: Option<Vec<PricePoint>>,
    pub range_prices: Option<Vec<PricePoint>>,
}

/// Rating data for one home at a single resolution
#[derive(Debug, Clone)]
pub struct HomeRating {
    pub home_id: String,
    pub thresholds: Option<RatingThresholds>,
    pub period: Option<RatingPeriod>,
}

/// The API surface the coordinator depends on
///
/// Implemented by [`TibberClient`] for production and by in-memory fakes in
/// tests, so update cycles can run without a network.
#[allow(async_fn_in_trait)]
pub trait PricesGateway {
    /// Fetches account identity and the list of homes
    async fn user_account(&self) -> Result<UserAccount, TibberError>;

    /// Fetches today/tomorrow/range price curves for all homes
    async fn price_info(&self) -> Result<Vec<HomePrices>, TibberError>;

    /// Fetches the price rating at the given resolution for all homes
    async fn price_rating(&self, resolution: RatingResolution) -> Result<Vec<HomeRating>, TibberError>;
}

/// Client for the Tibber GraphQL API
///
/// Wraps a single POST endpoint with bearer authentication, a bounded
/// per-request timeout and a small retry loop: exponential backoff on rate
/// limits, linear backoff on communication errors, authentication failures
/// surfaced immediately.
#[derive(Debug, Clone)]
pub struct TibberClient {
    client: reqwest::Client,
    access_token: String,
}

impl TibberClient {
    /// Creates a client with the default endpoint timeout
    pub fn new(access_token: impl Into<String>) -> Result<Self, TibberError> {
        let client = reqwest::Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .map_err(|err| TibberError::Api(format!("failed to build HTTP client: {err}")))?;
        Ok(Self {
            client,
            access_token: access_token.into(),
        })
    }

    async fn execute<T: DeserializeOwned>(
        &self,
        kind: &'static str,
        query: &'static str,
    ) -> Result<T, TibberError> {
        debug!(kind, "executing GraphQL query");
        let mut last_error = TibberError::Api(format!("{kind} query failed after {MAX_RETRIES} attempts"));

        for attempt in 0..MAX_RETRIES {
            match self.attempt(query).await {
                Ok(data) => return Ok(data),
                Err(TibberError::RateLimit) => {
                    let wait = RETRY_DELAY * 2u32.pow(attempt);
                    warn!(kind, attempt = attempt + 1, wait_secs = wait.as_secs(), "rate limit exceeded, backing off");
                    tokio::time::sleep(wait).await;
                    last_error = TibberError::RateLimit;
                }
                Err(TibberError::Communication(message)) => {
                    let wait = RETRY_DELAY * (attempt + 1);
                    warn!(kind, attempt = attempt + 1, %message, "communication error, retrying");
                    tokio::time::sleep(wait).await;
                    last_error = TibberError::Communication(message);
                }
                // Authentication and GraphQL-level errors are not retriable
                Err(other) => return Err(other),
            }
        }

        Err(last_error)
    }

    async fn attempt<T: DeserializeOwned>(&self, query: &str) -> Result<T, TibberError> {
        let response = self
            .client
            .post(TIBBER_API_URL)
            .bearer_auth(&self.access_token)
            .json(&GraphQlRequest { query })
            .send()
            .await
            .map_err(|err| TibberError::Communication(err.to_string()))?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(TibberError::Authentication);
        }
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(TibberError::RateLimit);
        }
        if !status.is_success() {
            return Err(TibberError::Api(format!("unexpected status {status}")));
        }

        let envelope: GraphQlEnvelope<T> = response
            .json()
            .await
            .map_err(|err| TibberError::Api(format!("malformed response body: {err}")))?;
        extract_data(envelope)
    }
}

impl PricesGateway for TibberClient {
    async fn user_account(&self) -> Result<UserAccount, TibberError> {
        let data: UserInfoData = self.execute("user info", USER_INFO_QUERY).await?;
        Ok(parse_user_account(data))
    }

    async fn price_info(&self) -> Result<Vec<HomePrices>, TibberError> {
        let data: PriceInfoData = self.execute("price info", PRICE_INFO_QUERY).await?;
        Ok(parse_price_info(data))
    }

    async fn price_rating(&self, resolution: RatingResolution) -> Result<Vec<HomeRating>, TibberError> {
        let (kind, query) = match resolution {
            RatingResolution::Hourly => ("hourly price rating", HOURLY_RATING_QUERY),
            RatingResolution::Daily => ("daily price rating", DAILY_RATING_QUERY),
            RatingResolution::Monthly => ("monthly price rating", MONTHLY_RATING_QUERY),
        };
        let data: RatingData = self.execute(kind, query).await?;
        Ok(parse_price_rating(data, resolution))
    }
}

/// Pulls the `data` payload out of a GraphQL envelope, surfacing any
/// GraphQL-level error as [`TibberError::Api`]
fn extract_data<T>(envelope: GraphQlEnvelope<T>) -> Result<T, TibberError> {
    if let Some(error) = envelope.errors.first() {
        return Err(TibberError::Api(format!("GraphQL query error: {}", error.message)));
    }
    envelope
        .data
        .ok_or_else(|| TibberError::Api("response carried no data".to_string()))
}

fn parse_user_account(data: UserInfoData) -> UserAccount {
    UserAccount {
        user_info: UserInfo {
            user_id: data.viewer.user_id,
            name: data.viewer.name,
            login: data.viewer.login,
        },
        homes: data.viewer.homes,
    }
}

fn parse_price_info(data: PriceInfoData) -> Vec<HomePrices> {
    data.viewer
        .homes
        .into_iter()
        .map(|home| {
            let payload = home.current_subscription.and_then(|sub| sub.price_info);
            match payload {
                Some(payload) => HomePrices {
                    home_id: home.id,
                    today: Some(payload.today),
                    tomorrow: Some(payload.tomorrow),
                    range_prices: payload
                        .range
                        .map(|range| range.edges.into_iter().map(|edge| edge.node).collect()),
                },
                None => HomePrices {
                    home_id: home.id,
                    today: None,
                    tomorrow: None,
                    range_prices: None,
                },
            }
        })
        .collect()
}

fn parse_price_rating(data: RatingData, resolution: RatingResolution) -> Vec<HomeRating> {
    data.viewer
        .homes
        .into_iter()
        .map(|home| {
            let payload = home.current_subscription.and_then(|sub| sub.price_rating);
            match payload {
                Some(payload) => {
                    let period = match resolution {
                        RatingResolution::Hourly => payload.hourly,
                        RatingResolution::Daily => payload.daily,
                        RatingResolution::Monthly => payload.monthly,
                    };
                    HomeRating {
                        home_id: home.id,
                        thresholds: payload.thresholds,
                        period,
                    }
                }
                None => HomeRating {
                    home_id: home.id,
                    thresholds: None,
                    period: None,
                },
            }
        })
        .collect()
}

#[derive(Serialize)]
struct GraphQlRequest<'a> {
    query: &'a str,
}

#[derive(Debug, Deserialize)]
struct GraphQlEnvelope<T> {
    #[serde(default = "Option::default")]
    data: Option<T>,
    #[serde(default)]
    errors: Vec<GraphQlErrorItem>,
}

#[derive(Debug, Deserialize)]
struct GraphQlErrorItem {
    message: String,
}

#[derive(Debug, Deserialize)]
struct UserInfoData {
    viewer: UserViewer,
}

#[derive(Debug, Deserialize)]
struct UserViewer {
    #[serde(default, rename = "userId")]
    user_id: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    login: Option<String>,
    #[serde(default)]
    homes: Vec<Home>,
}

#[derive(Debug, Deserialize)]
struct PriceInfoData {
    viewer: PriceInfoViewer,
}

#[derive(Debug, Deserialize)]
struct PriceInfoViewer {
    #[serde(default)]
    homes: Vec<PriceInfoHome>,
}

#[derive(Debug, Deserialize)]
struct PriceInfoHome {
    id: String,
    #[serde(default, rename = "currentSubscription")]
    current_subscription: Option<PriceSubscription>,
}

#[derive(Debug, Deserialize)]
struct PriceSubscription {
    #[serde(default, rename = "priceInfo")]
    price_info: Option<PriceInfoPayload>,
}

#[derive(Debug, Deserialize)]
struct PriceInfoPayload {
    #[serde(default)]
    today: Vec<PricePoint>,
    #[serde(default)]
    tomorrow: Vec<PricePoint>,
    #[serde(default)]
    range: Option<RangeConnection>,
}

#[derive(Debug, Deserialize)]
struct RangeConnection {
    #[serde(default)]
    edges: Vec<RangeEdge>,
}

#[derive(Debug, Deserialize)]
struct RangeEdge {
    node: PricePoint,
}

#[derive(Debug, Deserialize)]
struct RatingData {
    viewer: RatingViewer,
}

#[derive(Debug, Deserialize)]
struct RatingViewer {
    #[serde(default)]
    homes: Vec<RatingHome>,
}

#[derive(Debug, Deserialize)]
struct RatingHome {
    id: String,
    #[serde(default, rename = "currentSubscription")]
    current_subscription: Option<RatingSubscription>,
}

#[derive(Debug, Deserialize)]
struct RatingSubscription {
    #[serde(default, rename = "priceRating")]
    price_rating: Option<RatingPayload>,
}

#[derive(Debug, Deserialize)]
struct RatingPayload {
    #[serde(default, rename = "thresholdPercentages")]
    thresholds: Option<RatingThresholds>,
    #[serde(default)]
    hourly: Option<RatingPeriod>,
    #[serde(default)]
    daily: Option<RatingPeriod>,
    #[serde(default)]
    monthly: Option<RatingPeriod>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::PriceLevel;

    /// Sample price-info response with two homes, one of them without a
    /// subscription
    const PRICE_INFO_RESPONSE: &str = r#"{
        "data": {
            "viewer": {
                "homes": [
                    {
                        "id": "home-1",
                        "currentSubscription": {
                            "priceInfo": {
                                "range": {
                                    "edges": [
                                        {"node": {"startsAt": "2026-03-14T22:00:00+01:00", "total": 0.28, "energy": 0.22, "tax": 0.06, "level": "NORMAL"}},
                                        {"node": {"startsAt": "2026-03-14T23:00:00+01:00", "total": 0.26, "energy": 0.21, "tax": 0.05, "level": "CHEAP"}}
                                    ]
                                },
                                "today": [
                                    {"startsAt": "2026-03-15T00:00:00+01:00", "total": 0.24, "energy": 0.19, "tax": 0.05, "level": "CHEAP"},
                                    {"startsAt": "2026-03-15T01:00:00+01:00", "total": 0.22, "energy": 0.18, "tax": 0.04, "level": "VERY_CHEAP"}
                                ],
                                "tomorrow": []
                            }
                        }
                    },
                    {
                        "id": "home-2",
                        "currentSubscription": null
                    }
                ]
            }
        }
    }"#;

    const DAILY_RATING_RESPONSE: &str = r#"{
        "data": {
            "viewer": {
                "homes": [
                    {
                        "id": "home-1",
                        "currentSubscription": {
                            "priceRating": {
                                "thresholdPercentages": {"low": 10.0, "high": 15.0},
                                "daily": {
                                    "currency": "NOK",
                                    "entries": [
                                        {"time": "2026-03-15T00:00:00+01:00", "total": 0.25, "energy": 0.2, "tax": 0.05, "difference": -4.2, "level": "LOW"}
                                    ]
                                }
                            }
                        }
                    }
                ]
            }
        }
    }"#;

    const ERROR_RESPONSE: &str = r#"{
        "errors": [
            {"message": "No homes found for user"}
        ]
    }"#;

    const USER_INFO_RESPONSE: &str = r#"{
        "data": {
            "viewer": {
                "userId": "user-1",
                "name": "Ada Example",
                "login": "ada@example.com",
                "homes": [
                    {
                        "id": "home-1",
                        "type": "HOUSE",
                        "appNickname": "Cabin",
                        "address": {"address1": "Fjellveien 1", "postalCode": "0001", "city": "Oslo", "country": "NO"}
                    }
                ]
            }
        }
    }"#;

    #[test]
    fn parses_price_info_response() {
        let envelope: GraphQlEnvelope<PriceInfoData> =
            serde_json::from_str(PRICE_INFO_RESPONSE).expect("parse envelope");
        let data = extract_data(envelope).expect("extract data");
        let homes = parse_price_info(data);

        assert_eq!(homes.len(), 2);

        let first = &homes[0];
        assert_eq!(first.home_id, "home-1");
        let today = first.today.as_ref().expect("today present");
        assert_eq!(today.len(), 2);
        assert_eq!(today[1].level, PriceLevel::VeryCheap);
        assert_eq!(first.tomorrow.as_ref().expect("tomorrow present").len(), 0);
        let range = first.range_prices.as_ref().expect("range present");
        assert_eq!(range.len(), 2);
        assert_eq!(range[1].level, PriceLevel::Cheap);

        // A home without a subscription must not produce overwriting data
        let second = &homes[1];
        assert_eq!(second.home_id, "home-2");
        assert!(second.today.is_none());
        assert!(second.tomorrow.is_none());
        assert!(second.range_prices.is_none());
    }

    #[test]
    fn parses_daily_rating_response() {
        let envelope: GraphQlEnvelope<RatingData> =
            serde_json::from_str(DAILY_RATING_RESPONSE).expect("parse envelope");
        let data = extract_data(envelope).expect("extract data");
        let ratings = parse_price_rating(data, RatingResolution::Daily);

        assert_eq!(ratings.len(), 1);
        let rating = &ratings[0];
        assert_eq!(rating.home_id, "home-1");
        let thresholds = rating.thresholds.expect("thresholds");
        assert!((thresholds.low - 10.0).abs() < f64::EPSILON);
        let period = rating.period.as_ref().expect("daily period");
        assert_eq!(period.currency, "NOK");
        assert_eq!(period.entries.len(), 1);
        assert_eq!(period.entries[0].level, crate::data::RatingLevel::Low);
    }

    #[test]
    fn graphql_errors_surface_as_api_error() {
        let envelope: GraphQlEnvelope<PriceInfoData> =
            serde_json::from_str(ERROR_RESPONSE).expect("parse envelope");
        let result = extract_data(envelope);

        match result {
            Err(TibberError::Api(message)) => {
                assert!(message.contains("No homes found"), "message: {message}");
            }
            other => panic!("expected Api error, got {other:?}"),
        }
    }

    #[test]
    fn missing_data_surfaces_as_api_error() {
        let envelope: GraphQlEnvelope<PriceInfoData> =
            serde_json::from_str("{}").expect("parse envelope");
        assert!(matches!(extract_data(envelope), Err(TibberError::Api(_))));
    }

    #[test]
    fn parses_user_info_response() {
        let envelope: GraphQlEnvelope<UserInfoData> =
            serde_json::from_str(USER_INFO_RESPONSE).expect("parse envelope");
        let account = parse_user_account(extract_data(envelope).expect("extract data"));

        assert_eq!(account.user_info.user_id.as_deref(), Some("user-1"));
        assert_eq!(account.user_info.name.as_deref(), Some("Ada Example"));
        assert_eq!(account.homes.len(), 1);
        assert_eq!(account.homes[0].id, "home-1");
        assert_eq!(account.homes[0].app_nickname.as_deref(), Some("Cabin"));
        let address = account.homes[0].address.as_ref().expect("address");
        assert_eq!(address.city.as_deref(), Some("Oslo"));
    }

    #[test]
    fn rate_limit_error_is_distinct() {
        // The coordinator branches on this variant, so the mapping must hold
        let error = TibberError::RateLimit;
        assert!(matches!(error, TibberError::RateLimit));
        assert_eq!(error.to_string(), "rate limit exceeded");
    }
}
