//! Thin HTTP client for the upstream pricing oracle (spec §4.6): one POST
//! with a bearer-style token header, JSON body in, JSON body out.
//!
//! Deliberately has no retry loop of its own — retry/backoff for a single
//! upstream call belongs to the coalescing cache's leader/follower policy,
//! not duplicated underneath it.

use crate::error::PricingError;
use crate::fingerprint::AttributeRecord;
use crate::oracle_rate_limiter::OracleRateLimiter;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricedRoom {
    pub period: String,
    pub hotel: String,
    pub room: String,
    pub price: f64,
}

pub struct PricingOracleClient {
    client: Client,
    oracle_url: String,
    token: Option<String>,
    rate_limiter: OracleRateLimiter,
}

impl PricingOracleClient {
    pub fn new(oracle_url: String, token: Option<String>, rate_limiter: OracleRateLimiter) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("failed to build oracle HTTP client");

        Self {
            client,
            oracle_url,
            token,
            rate_limiter,
        }
    }

    /// One POST, no retry. The coalescing cache's leader wraps this call
    /// with its own fetch-budget timeout and retries it not at all — a
    /// single fetcher invocation per leader election is the whole point.
    pub async fn fetch_prices(&self, attrs: &[AttributeRecord]) -> Result<Vec<PricedRoom>, PricingError> {
        self.rate_limiter.acquire().await;

        let mut request = self.client.post(&self.oracle_url).json(&attrs);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|err| PricingError::UpstreamError {
            code: 0,
            body: format!("request failed: {err}"),
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PricingError::UpstreamError {
                code: status.as_u16(),
                body,
            });
        }

        response
            .json::<Vec<PricedRoom>>()
            .await
            .map_err(|err| PricingError::UpstreamError {
                code: status.as_u16(),
                body: format!("malformed response body: {err}"),
            })
    }
}
