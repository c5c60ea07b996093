//! AI Adapter - HTTP client for the external anomaly-inference service.
//!
//! Stateless and advisory: every call has a 20 s timeout and no retry in
//! the hot path. A timeout or non-2xx reply yields an empty [`MlReply`]
//! and the pipeline proceeds without the ML signal.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use thiserror::Error;
use uuid::Uuid;

use crate::config::defaults::AI_TIMEOUT_SECS;
use crate::types::{BaselineStats, MlReply};

#[derive(Debug, Error)]
pub enum AiError {
    #[error("AI service request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("AI service returned status {0}")]
    ServerError(reqwest::StatusCode),
}

/// Payload for `POST {base}/predict`.
#[derive(Debug, Clone, Serialize)]
pub struct PredictionRequest {
    pub sensor_id: Uuid,
    pub machine_id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// Primary scored value (melt pressure).
    pub value: f64,
    pub context: PredictionContext,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub material_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub baseline_stats: Option<BTreeMap<String, BaselineStats>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PredictionContext {
    pub readings: BTreeMap<String, f64>,
}

/// HTTP client for the anomaly-inference service.
#[derive(Clone)]
pub struct AiClient {
    http: reqwest::Client,
    base_url: String,
}

impl AiClient {
    /// Build a client, or None when no service URL is configured.
    pub fn from_config(base_url: &str) -> Option<Self> {
        let base_url = base_url.trim().trim_end_matches('/').to_string();
        if base_url.is_empty() {
            return None;
        }
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(AI_TIMEOUT_SECS))
            .build()
            .ok()?;
        Some(Self { http, base_url })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Score one tick. Degrades to an empty reply on any failure.
    pub async fn predict(&self, request: &PredictionRequest) -> MlReply {
        match self.try_predict(request).await {
            Ok(reply) => reply,
            Err(e) => {
                tracing::warn!(error = %e, "AI service unavailable; continuing without ML signal");
                MlReply::empty()
            }
        }
    }

    async fn try_predict(&self, request: &PredictionRequest) -> Result<MlReply, AiError> {
        let resp = self
            .http
            .post(format!("{}/predict", self.base_url))
            .json(request)
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(AiError::ServerError(resp.status()));
        }

        let value: serde_json::Value = resp.json().await?;
        Ok(MlReply::from_value(value))
    }

    /// Service health probe for the status surface.
    pub async fn health(&self) -> bool {
        match self.http.get(format!("{}/health", self.base_url)).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(_) => false,
        }
    }
}
