//! Thin REST client over a running `orch serve` instance, used by the
//! `queue` and `logs` subcommands.

use anyhow::{Context, Result, bail};
use serde::Deserialize;
use serde_json::Value;

pub struct ApiClient {
    base_url: String,
    client: reqwest::Client,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self { base_url: base_url.into(), client: reqwest::Client::new() }
    }

    async fn get(&self, path: &str) -> Result<Value> {
        let url = format!("{}{path}", self.base_url);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("failed to reach orch service at {url}"))?;
        Self::into_json(resp).await
    }

    async fn post(&self, path: &str, body: &Value) -> Result<Value> {
        let url = format!("{}{path}", self.base_url);
        let resp = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .with_context(|| format!("failed to reach orch service at {url}"))?;
        Self::into_json(resp).await
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let url = format!("{}{path}", self.base_url);
        let resp = self
            .client
            .delete(&url)
            .send()
            .await
            .with_context(|| format!("failed to reach orch service at {url}"))?;
        if !resp.status().is_success() {
            bail!("{} returned {}", url, resp.status());
        }
        Ok(())
    }

    async fn into_json(resp: reqwest::Response) -> Result<Value> {
        let status = resp.status();
        let url = resp.url().clone();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            bail!("{url} returned {status}: {body}");
        }
        resp.json().await.with_context(|| format!("{url} did not return valid JSON"))
    }

    pub async fn health(&self) -> Result<Value> {
        self.get("/api/health").await
    }

    pub async fn queue_status(&self) -> Result<Value> {
        self.get("/api/queue").await
    }

    pub async fn queue_stats(&self) -> Result<Value> {
        self.get("/api/queue/stats").await
    }

    pub async fn enqueue(&self, issue_number: u64) -> Result<()> {
        self.post("/api/queue", &serde_json::json!({ "issue_number": issue_number })).await?;
        Ok(())
    }

    pub async fn remove(&self, issue_number: u64) -> Result<()> {
        self.delete(&format!("/api/queue/{issue_number}")).await
    }

    pub async fn clear(&self) -> Result<()> {
        self.post("/api/queue/clear", &Value::Null).await?;
        Ok(())
    }

    pub async fn recent_logs(&self, count: usize) -> Result<Value> {
        self.get(&format!("/api/logs?count={count}")).await
    }

    pub async fn logs_by_issue(&self, issue_number: u64) -> Result<Value> {
        self.get(&format!("/api/logs/issue/{issue_number}")).await
    }

    pub async fn logs_by_agent(&self, agent: &str) -> Result<Value> {
        self.get(&format!("/api/logs/agent/{agent}")).await
    }

    pub async fn log_stats(&self) -> Result<Value> {
        self.get("/api/logs/stats").await
    }
}

#[derive(Debug, Deserialize)]
pub struct HealthView {
    pub status: String,
    pub uptime_seconds: u64,
}
