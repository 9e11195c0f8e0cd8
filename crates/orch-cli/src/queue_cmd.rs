//! `orch queue` command: enqueue/list/remove/clear/stats over the running
//! service's REST surface.

use anyhow::Result;
use serde_json::Value;

use crate::api::ApiClient;

pub async fn run_enqueue(api: &ApiClient, issue_number: u64) -> Result<()> {
    api.enqueue(issue_number).await?;
    println!("Enqueued issue #{issue_number}.");
    Ok(())
}

pub async fn run_list(api: &ApiClient) -> Result<()> {
    let status = api.queue_status().await?;
    print_status(&status);
    Ok(())
}

pub async fn run_remove(api: &ApiClient, issue_number: u64) -> Result<()> {
    api.remove(issue_number).await?;
    println!("Removed issue #{issue_number} from the queue.");
    Ok(())
}

pub async fn run_clear(api: &ApiClient) -> Result<()> {
    api.clear().await?;
    println!("Queue cleared.");
    Ok(())
}

pub async fn run_stats(api: &ApiClient) -> Result<()> {
    let stats = api.queue_stats().await?;
    let success_rate = stats.get("success_rate").and_then(Value::as_str).unwrap_or("?");
    let mean_duration = stats.get("mean_duration").and_then(Value::as_str).unwrap_or("?");
    println!("Success rate: {success_rate}");
    println!("Mean duration: {mean_duration}");
    Ok(())
}

fn print_status(status: &Value) {
    let running = status.get("running").and_then(Value::as_u64);
    let processing = status.get("processing").and_then(Value::as_bool).unwrap_or(false);
    match running {
        Some(id) => println!("Running: issue #{id} (processing={processing})"),
        None => println!("Running: (idle)"),
    }

    let queued = status.get("queued").and_then(Value::as_array).cloned().unwrap_or_default();
    if queued.is_empty() {
        println!("Queued: (empty)");
    } else {
        let ids: Vec<String> = queued.iter().filter_map(|v| v.as_u64()).map(|n| format!("#{n}")).collect();
        println!("Queued: {}", ids.join(", "));
    }

    let total_runs = status.get("total_runs").and_then(Value::as_u64).unwrap_or(0);
    println!("Total runs recorded: {total_runs}");
}
