//! `orch logs` command: tail the Log Stream Hub over the running
//! service's REST surface.

use anyhow::Result;
use serde_json::Value;

use crate::api::ApiClient;

pub async fn run_recent(api: &ApiClient, count: usize) -> Result<()> {
    let logs = api.recent_logs(count).await?;
    print_logs(&logs);
    Ok(())
}

pub async fn run_by_issue(api: &ApiClient, issue_number: u64) -> Result<()> {
    let logs = api.logs_by_issue(issue_number).await?;
    print_logs(&logs);
    Ok(())
}

pub async fn run_by_agent(api: &ApiClient, agent: &str) -> Result<()> {
    let logs = api.logs_by_agent(agent).await?;
    print_logs(&logs);
    Ok(())
}

pub async fn run_stats(api: &ApiClient) -> Result<()> {
    let stats = api.log_stats().await?;
    println!("Log counts:");
    for level in ["total", "debug", "info", "warn", "error", "fatal"] {
        if let Some(n) = stats.get(level) {
            println!("  {level}: {n}");
        }
    }
    Ok(())
}

fn print_logs(logs: &Value) {
    let Some(entries) = logs.as_array() else {
        println!("(unexpected response shape)");
        return;
    };
    if entries.is_empty() {
        println!("No log events.");
        return;
    }
    for entry in entries {
        let timestamp = entry.get("timestamp").and_then(Value::as_str).unwrap_or("?");
        let level = entry.get("level").and_then(Value::as_str).unwrap_or("info");
        let message = entry.get("message").and_then(Value::as_str).unwrap_or("");
        let mut context = Vec::new();
        if let Some(ticket) = entry.get("ticket").and_then(Value::as_u64) {
            context.push(format!("ticket=#{ticket}"));
        }
        if let Some(sub_ticket) = entry.get("sub_ticket").and_then(Value::as_u64) {
            context.push(format!("sub_ticket=#{sub_ticket}"));
        }
        if let Some(agent) = entry.get("agent").and_then(Value::as_str) {
            context.push(format!("agent={agent}"));
        }
        if let Some(stage) = entry.get("stage").and_then(Value::as_str) {
            context.push(format!("stage={stage}"));
        }
        let suffix = if context.is_empty() { String::new() } else { format!(" [{}]", context.join(" ")) };
        println!("[{timestamp}] {level:>5} {message}{suffix}");
    }
}
