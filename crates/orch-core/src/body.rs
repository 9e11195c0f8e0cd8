//! Issue Body Composer: the orchestration block is a
//! marker-delimited region of the master ticket's body; everything outside
//! it is the user's original request and is never rewritten.
//!
//! Per-sub-ticket progress is attached via single-line HTML-comment
//! key/value markers rather than free-form text injection.

use crate::plan::Plan;

const START_MARKER: &str = "<!-- ORCH:START -->";
const END_MARKER: &str = "<!-- ORCH:END -->";
const STATUS_START: &str = "<!-- ORCH:STATUS:START -->";
const STATUS_END: &str = "<!-- ORCH:STATUS:END -->";

/// A parsed master ticket body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedBody {
    pub original_request: String,
    pub orchestration_block: Option<String>,
}

/// Parse `body` into the original request and the orchestration block, if
/// present. Content outside the marker pair is returned byte-identical.
pub fn parse_body(body: &str) -> ParsedBody {
    match (body.find(START_MARKER), body.find(END_MARKER)) {
        (Some(start), Some(end)) if end > start => {
            let before = &body[..start];
            let after = &body[end + END_MARKER.len()..];
            let block = &body[start + START_MARKER.len()..end];
            ParsedBody {
                original_request: format!("{before}{after}"),
                orchestration_block: Some(block.trim().to_string()),
            }
        }
        _ => ParsedBody {
            original_request: body.to_string(),
            orchestration_block: None,
        },
    }
}

/// A single row of the live status table.
#[derive(Debug, Clone)]
pub struct StatusRow {
    pub sub_ticket: u64,
    pub title: String,
    pub status_emoji: &'static str,
    pub agent_message: Option<String>,
    pub tools_used: u32,
    pub retry_count: u32,
    pub last_retry_age: Option<String>,
    /// `Some((k, cap))` for test rows with at least one fix attempt.
    pub fix_attempts: Option<(u32, u32)>,
}

impl StatusRow {
    fn truncated_message(&self) -> String {
        match &self.agent_message {
            None => String::new(),
            Some(msg) if msg.chars().count() <= 50 => msg.clone(),
            Some(msg) => format!("{}…", msg.chars().take(49).collect::<String>()),
        }
    }

    fn attempts_cell(&self) -> String {
        match self.fix_attempts {
            None => String::new(),
            Some((k, cap)) if k >= cap => format!("🔺 {k}/{cap} (max)"),
            Some((k, cap)) if k > 0 => format!("🔁 {k}/{cap}"),
            Some(_) => String::new(),
        }
    }
}

/// Render the live status table.
pub fn render_status_table(rows: &[StatusRow]) -> String {
    let mut out = String::from(
        "| Status | Sub-ticket | Title | Message | Tools | Retries | Last retry | Fix attempts |\n\
         |---|---|---|---|---|---|---|---|\n",
    );
    for row in rows {
        out.push_str(&format!(
            "| {} | #{} | {} | {} | {} | {} | {} | {} |\n",
            row.status_emoji,
            row.sub_ticket,
            row.title,
            row.truncated_message(),
            row.tools_used,
            row.retry_count,
            row.last_retry_age.as_deref().unwrap_or(""),
            row.attempts_cell(),
        ));
    }
    out
}

/// Build the orchestration block's body from its constituent parts.
pub fn build_orchestration_block(
    plan: &Plan,
    original_request: &str,
    status_rows: &[StatusRow],
) -> String {
    let mut block = String::new();
    block.push_str("## Orchestration\n\n");

    block.push_str("### Specification\n\n");
    block.push_str(&format!("**Requirements**\n\n{}\n\n", plan.specification.requirements));
    block.push_str(&format!(
        "**Acceptance criteria**\n\n{}\n\n",
        plan.specification.acceptance_criteria
    ));
    block.push_str(&format!(
        "**Technical approach**\n\n{}\n\n",
        plan.specification.technical_approach
    ));

    block.push_str("### Original request\n\n");
    for line in original_request.lines() {
        block.push_str("> ");
        block.push_str(line);
        block.push('\n');
    }
    block.push('\n');

    block.push_str("### Plan\n\n");
    block.push_str(&format!(
        "{} implementation task(s), {} test task(s)\n\n",
        plan.implementation_tasks.len(),
        plan.test_tasks.len()
    ));
    for task in &plan.implementation_tasks {
        let ticket = task
            .sub_ticket
            .map(|n| format!("#{n}"))
            .unwrap_or_else(|| "(pending)".to_string());
        block.push_str(&format!("- [impl] {} -- {}\n", task.title, ticket));
    }
    for task in &plan.test_tasks {
        let ticket = task
            .sub_ticket
            .map(|n| format!("#{n}"))
            .unwrap_or_else(|| "(pending)".to_string());
        block.push_str(&format!("- [test] {} -- {}\n", task.title, ticket));
    }
    block.push('\n');

    block.push_str("### Status\n\n");
    block.push_str(STATUS_START);
    block.push('\n');
    block.push_str(&render_status_table(status_rows));
    block.push_str(STATUS_END);
    block.push('\n');

    block
}

/// Compose a full new body: original request preserved verbatim, the
/// orchestration block built fresh.
pub fn compose_body(plan: &Plan, original_request: &str, status_rows: &[StatusRow]) -> String {
    format!(
        "{}\n\n{}\n{}\n{}",
        original_request.trim_end(),
        START_MARKER,
        build_orchestration_block(plan, original_request, status_rows),
        END_MARKER,
    )
}

/// Surgical update: replace only the status-table subregion of an existing
/// body, leaving everything else -- including the rest of the
/// orchestration block -- byte-identical.
pub fn update_status_table(body: &str, status_rows: &[StatusRow]) -> String {
    match (body.find(STATUS_START), body.find(STATUS_END)) {
        (Some(start), Some(end)) if end > start => {
            let before = &body[..start + STATUS_START.len()];
            let after = &body[end..];
            format!("{before}\n{}{after}", render_status_table(status_rows))
        }
        _ => body.to_string(),
    }
}

/// A per-sub-ticket progress marker: agent message,
/// tools-used count, retry count, and the timestamp of the last retry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProgressMarkers {
    pub agent_message: Option<String>,
    pub tools_used: Option<u32>,
    pub retry_count: Option<u32>,
    pub last_retry_time: Option<String>,
}

impl ProgressMarkers {
    /// Merge `update` over `self`, keyed per-field.
    pub fn merge(&mut self, update: &ProgressMarkers) {
        if update.agent_message.is_some() {
            self.agent_message = update.agent_message.clone();
        }
        if update.tools_used.is_some() {
            self.tools_used = update.tools_used;
        }
        if update.retry_count.is_some() {
            self.retry_count = update.retry_count;
        }
        if update.last_retry_time.is_some() {
            self.last_retry_time = update.last_retry_time.clone();
        }
    }

    fn marker_line(key: &str, value: &str) -> String {
        format!("<!-- orch:{key}={value} -->")
    }

    /// Render as HTML-comment marker lines, one per set field.
    pub fn render(&self) -> String {
        let mut lines = Vec::new();
        if let Some(msg) = &self.agent_message {
            lines.push(Self::marker_line("agent-message", &msg.replace('\n', " ")));
        }
        if let Some(n) = self.tools_used {
            lines.push(Self::marker_line("tools-used", &n.to_string()));
        }
        if let Some(n) = self.retry_count {
            lines.push(Self::marker_line("retry-count", &n.to_string()));
        }
        if let Some(t) = &self.last_retry_time {
            lines.push(Self::marker_line("last-retry-time", t));
        }
        lines.join("\n")
    }

    /// Parse marker lines out of a sub-ticket body, ignoring anything that
    /// is not one of the four known keys.
    pub fn parse(body: &str) -> Self {
        let mut markers = Self::default();
        for line in body.lines() {
            let Some(rest) = line.trim().strip_prefix("<!-- orch:") else {
                continue;
            };
            let Some(rest) = rest.strip_suffix("-->") else {
                continue;
            };
            let rest = rest.trim();
            let Some((key, value)) = rest.split_once('=') else {
                continue;
            };
            let value = value.trim().to_string();
            match key {
                "agent-message" => markers.agent_message = Some(value),
                "tools-used" => markers.tools_used = value.parse().ok(),
                "retry-count" => markers.retry_count = value.parse().ok(),
                "last-retry-time" => markers.last_retry_time = Some(value),
                _ => {}
            }
        }
        markers
    }
}

/// Rewrite a sub-ticket body with fresh progress markers, stripping any
/// previous marker lines first so repeated calls don't accumulate stale
/// copies.
pub fn apply_markers(body: &str, markers: &ProgressMarkers) -> String {
    let stripped: String = body
        .lines()
        .filter(|line| !line.trim().starts_with("<!-- orch:"))
        .collect::<Vec<_>>()
        .join("\n");
    let rendered = markers.render();
    if rendered.is_empty() {
        stripped
    } else {
        format!("{}\n\n{}", stripped.trim_end(), rendered)
    }
}
