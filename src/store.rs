use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use reqwest::StatusCode;
use reqwest::blocking::{Client, Response};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::classify::{ExternalClassification, ZeroShotClassifier};
use crate::model::Question;

const DEFAULT_TABLE: &str = "preguntas";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const RETRY_ATTEMPTS: u32 = 3;
const RETRY_BASE_DELAY: Duration = Duration::from_millis(500);

/// Connection settings for the PostgREST-style question store. The service
/// key is used when present; the anon key only allows reads on most
/// deployments.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub base_url: String,
    pub api_key: String,
    pub table: String,
}

impl StoreConfig {
    /// Reads the store settings from the environment, loading a `.env` file
    /// first when one exists.
    pub fn from_env() -> Result<Self> {
        if let Ok(path) = dotenvy::dotenv() {
            debug!(path = %path.display(), "loaded environment file");
        }

        let base_url = std::env::var("PAES_STORE_URL")
            .context("PAES_STORE_URL is not set; point it at the store's base URL")?;
        let api_key = std::env::var("PAES_STORE_SERVICE_KEY")
            .or_else(|_| std::env::var("PAES_STORE_ANON_KEY"))
            .context("neither PAES_STORE_SERVICE_KEY nor PAES_STORE_ANON_KEY is set")?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            table: std::env::var("PAES_STORE_TABLE").unwrap_or_else(|_| DEFAULT_TABLE.to_string()),
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/rest/v1/{}", self.base_url, self.table)
    }
}

pub struct StoreClient {
    config: StoreConfig,
    client: Client,
}

impl StoreClient {
    pub fn new(config: StoreConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self { config, client })
    }

    /// Inserts one question as a new row.
    pub fn insert_one(&self, question: &Question) -> Result<()> {
        self.send_row(question, false)
    }

    /// Inserts or updates one question, matching existing rows on `id`.
    pub fn upsert_by_id(&self, question: &Question) -> Result<()> {
        self.send_row(question, true)
    }

    fn send_row(&self, question: &Question, upsert: bool) -> Result<()> {
        let id = question.id.clone();
        with_retry(&id, || {
            let mut request = self
                .client
                .post(self.config.endpoint())
                .header("apikey", &self.config.api_key)
                .bearer_auth(&self.config.api_key)
                .header("Content-Type", "application/json");

            request = if upsert {
                request
                    .header("Prefer", "resolution=merge-duplicates,return=minimal")
                    .query(&[("on_conflict", "id")])
            } else {
                request.header("Prefer", "return=minimal")
            };

            let response = request
                .json(question)
                .send()
                .with_context(|| format!("request failed for question {id}"))?;
            check_status(&id, response)
        })
    }

    /// Reads rows back, with PostgREST `column=eq.value` filters.
    pub fn query(
        &self,
        filters: &[(&str, &str)],
        select: &str,
        limit: Option<usize>,
    ) -> Result<Vec<Value>> {
        let mut params: Vec<(String, String)> = vec![("select".to_string(), select.to_string())];
        for (column, value) in filters {
            params.push(((*column).to_string(), format!("eq.{value}")));
        }
        if let Some(limit) = limit {
            params.push(("limit".to_string(), limit.to_string()));
        }

        let response = self
            .client
            .get(self.config.endpoint())
            .header("apikey", &self.config.api_key)
            .bearer_auth(&self.config.api_key)
            .query(&params)
            .send()
            .context("store query failed")?;

        if !response.status().is_success() {
            bail!("store query returned {}", response.status());
        }
        response.json().context("store query returned a non-JSON body")
    }

    /// Counts rows for one subject code, used by the status report.
    pub fn count_for_subject(&self, subject_code: &str) -> Result<usize> {
        let rows = self.query(&[("subject", subject_code)], "id", None)?;
        Ok(rows.len())
    }
}

fn check_status(id: &str, response: Response) -> Result<()> {
    let status = response.status();
    if status.is_success() {
        return Ok(());
    }

    let body = response.text().unwrap_or_default();
    if status == StatusCode::CONFLICT {
        bail!("question {id} already exists (409): {body}");
    }
    bail!("store rejected question {id} with {status}: {body}");
}

/// Retries a request a fixed number of times, doubling the delay after each
/// failure.
fn with_retry<F>(label: &str, mut operation: F) -> Result<()>
where
    F: FnMut() -> Result<()>,
{
    let mut delay = RETRY_BASE_DELAY;
    let mut last_error = None;

    for attempt in 1..=RETRY_ATTEMPTS {
        match operation() {
            Ok(()) => return Ok(()),
            Err(error) => {
                if attempt < RETRY_ATTEMPTS {
                    warn!(%label, attempt, "request failed, retrying: {error:#}");
                    thread::sleep(delay);
                    delay *= 2;
                }
                last_error = Some(error);
            }
        }
    }

    Err(last_error.unwrap_or_else(|| anyhow::anyhow!("request failed for {label}")))
}

/// Zero-shot classification over HTTP: posts the question text with the
/// candidate labels and reads back the winning label with its score.
pub struct RemoteClassifier {
    client: Client,
    url: String,
}

#[derive(Debug, Deserialize)]
struct RemoteVerdict {
    label: String,
    #[serde(default)]
    tema: Option<String>,
    #[serde(default)]
    habilidad: Option<String>,
    #[serde(default)]
    score: f32,
}

impl RemoteClassifier {
    pub fn new(url: String) -> Result<Self> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("failed to build classifier HTTP client")?;
        Ok(Self { client, url })
    }
}

impl ZeroShotClassifier for RemoteClassifier {
    fn classify(&self, text: &str, labels: &[String]) -> Result<Option<ExternalClassification>> {
        if labels.is_empty() {
            return Ok(None);
        }

        let response = self
            .client
            .post(&self.url)
            .json(&serde_json::json!({ "text": text, "labels": labels }))
            .send()
            .context("classifier request failed")?;

        if !response.status().is_success() {
            bail!("classifier returned {}", response.status());
        }

        let verdict: RemoteVerdict = response
            .json()
            .context("classifier returned a non-JSON body")?;
        if verdict.label.is_empty() {
            return Ok(None);
        }

        Ok(Some(ExternalClassification {
            area: verdict.label,
            tema: verdict.tema,
            habilidad: verdict.habilidad,
            confidence: verdict.score,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_joins_base_table_and_strips_trailing_slash() {
        let config = StoreConfig {
            base_url: "https://example.supabase.co".to_string(),
            api_key: "secret".to_string(),
            table: "preguntas".to_string(),
        };
        assert_eq!(
            config.endpoint(),
            "https://example.supabase.co/rest/v1/preguntas"
        );
    }

    #[test]
    fn retry_gives_up_after_three_attempts() {
        let mut calls = 0;
        let result = with_retry("q-1", || {
            calls += 1;
            bail!("boom")
        });
        assert!(result.is_err());
        assert_eq!(calls, 3);
    }

    #[test]
    fn retry_stops_on_first_success() {
        let mut calls = 0;
        let result = with_retry("q-1", || {
            calls += 1;
            if calls < 2 { bail!("transient") } else { Ok(()) }
        });
        assert!(result.is_ok());
        assert_eq!(calls, 2);
    }
}
