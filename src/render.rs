//! Human-readable lines for text mode.

use crate::model::{ExecutionRecord, NotebookMetadata, User, WatchEvent};
use serde_json::Value;
use time::macros::format_description;
use time::{OffsetDateTime, PrimitiveDateTime};

const BYTE_UNITS: [&str; 9] = ["Bytes", "KB", "MB", "GB", "TB", "PB", "EB", "ZB", "YB"];

/// Parses RFC 3339, or the backend's naive `YYYY-MM-DDTHH:MM:SS[.ffffff]`
/// which is taken as UTC.
pub(crate) fn parse_timestamp(raw: &str) -> Option<OffsetDateTime> {
    let raw = raw.trim();
    if let Ok(ts) = OffsetDateTime::parse(raw, &time::format_description::well_known::Rfc3339) {
        return Some(ts);
    }
    let normalized = raw.replacen(' ', "T", 1);
    let base = normalized.split('.').next().unwrap_or(&normalized);
    PrimitiveDateTime::parse(
        base,
        format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]"),
    )
    .ok()
    .map(PrimitiveDateTime::assume_utc)
}

pub(crate) fn format_date(raw: Option<&str>) -> String {
    let Some(raw) = raw else {
        return "N/A".to_string();
    };
    match parse_timestamp(raw) {
        Some(ts) => ts
            .format(format_description!(
                "[year]-[month]-[day] [hour]:[minute] UTC"
            ))
            .unwrap_or_else(|_| raw.to_string()),
        None => raw.to_string(),
    }
}

fn plural(n: i64, unit: &str) -> String {
    if n == 1 {
        format!("{n} {unit}")
    } else {
        format!("{n} {unit}s")
    }
}

/// Elapsed time between `start` and `end` (or `now` while still running).
pub(crate) fn format_duration(start: Option<&str>, end: Option<&str>, now: OffsetDateTime) -> String {
    let Some(start) = start.and_then(parse_timestamp) else {
        return "N/A".to_string();
    };
    let end = end.and_then(parse_timestamp).unwrap_or(now);
    let seconds = (end - start).whole_seconds();

    if seconds < 60 {
        plural(seconds, "second")
    } else if seconds < 3600 {
        plural(seconds / 60, "minute")
    } else {
        format!(
            "{} {}",
            plural(seconds / 3600, "hour"),
            plural((seconds % 3600) / 60, "minute")
        )
    }
}

pub(crate) fn format_bytes(bytes: u64, decimals: usize) -> String {
    if bytes == 0 {
        return "0 Bytes".to_string();
    }
    let mut idx = 0;
    let mut value = bytes as f64;
    while value >= 1024.0 && idx < BYTE_UNITS.len() - 1 {
        value /= 1024.0;
        idx += 1;
    }
    let fixed = format!("{value:.decimals$}");
    let trimmed = if fixed.contains('.') {
        fixed.trim_end_matches('0').trim_end_matches('.')
    } else {
        fixed.as_str()
    };
    format!("{trimmed} {}", BYTE_UNITS[idx])
}

pub(crate) fn format_value(value: &Value) -> String {
    match value {
        Value::Null => "N/A".to_string(),
        Value::Bool(true) => "Yes".to_string(),
        Value::Bool(false) => "No".to_string(),
        Value::String(s) => s.clone(),
        Value::Array(_) | Value::Object(_) => {
            serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
        }
        Value::Number(n) => n.to_string(),
    }
}

pub(crate) fn user_lines(user: &User) -> Vec<String> {
    let mut lines = vec![
        format!("User: {}", user.display_name()),
        format!("Email: {}", user.email),
        format!("ID: {}", user.id),
    ];
    if let Some(username) = user.username.as_deref() {
        lines.push(format!("Username: {username}"));
    }
    if user.is_superuser {
        lines.push("Role: administrator".to_string());
    }
    if !user.is_active {
        lines.push("Account: inactive".to_string());
    }
    if user.created_at.is_some() {
        lines.push(format!("Member since: {}", format_date(user.created_at.as_deref())));
    }
    lines
}

/// One line per account for the admin listing.
pub(crate) fn user_row(user: &User) -> String {
    let role = if user.is_superuser { "admin" } else { "user" };
    let state = if user.is_active { "active" } else { "inactive" };
    format!(
        "{:<36}  {:<32}  {:<5}  {:<8}  {}",
        user.id,
        user.email,
        role,
        state,
        user.username.as_deref().unwrap_or("-")
    )
}

/// One line per execution for listings.
pub(crate) fn execution_row(exec: &ExecutionRecord) -> String {
    let name = exec
        .notebook_name
        .as_deref()
        .or(exec.notebook_path.as_deref())
        .unwrap_or("-");
    format!(
        "{:<36}  {:<19}  {:<20}  {}",
        exec.id,
        exec.status,
        format_date(exec.created_at.as_deref()),
        name
    )
}

pub(crate) fn execution_lines(exec: &ExecutionRecord, now: OffsetDateTime) -> Vec<String> {
    let mut lines = vec![
        format!("Execution: {}", exec.id),
        format!("Status: {}", exec.status),
    ];
    if let Some(path) = exec.notebook_path.as_deref() {
        lines.push(format!("Notebook: {path}"));
    }
    if let Some(owner) = exec.user.as_ref() {
        let who = owner
            .username
            .as_deref()
            .or(owner.email.as_deref())
            .unwrap_or(&owner.id);
        lines.push(format!("Owner: {who}"));
    }
    lines.push(format!("Created: {}", format_date(exec.created_at.as_deref())));
    if exec.started_at.is_some() {
        lines.push(format!("Started: {}", format_date(exec.started_at.as_deref())));
        lines.push(format!(
            "Duration: {}",
            format_duration(exec.started_at.as_deref(), exec.completed_at.as_deref(), now)
        ));
    }
    if exec.completed_at.is_some() {
        lines.push(format!(
            "Completed: {}",
            format_date(exec.completed_at.as_deref())
        ));
    }
    match (exec.cpu_milli, exec.memory_mib) {
        (None, None) => {}
        (cpu, mem) => lines.push(format!(
            "Resources: cpu {} mCPU, memory {} MiB",
            cpu.map_or_else(|| "-".to_string(), |c| c.to_string()),
            mem.map_or_else(|| "-".to_string(), |m| m.to_string())
        )),
    }
    if let Some(py) = exec.python_version.as_deref() {
        lines.push(format!("Python: {py}"));
    }
    if !exec.parameters.is_empty() {
        lines.push("Parameters:".to_string());
        for (key, value) in &exec.parameters {
            lines.push(format!("  {key} = {}", format_value(value)));
        }
    }
    if let Some(out) = exec.output_notebook.as_deref() {
        lines.push(format!("Output notebook: {out}"));
    }
    if let Some(out) = exec.output_html.as_deref() {
        lines.push(format!("Output HTML: {out}"));
    }
    if let Some(err) = exec.error.as_deref() {
        lines.push(format!("Error: {err}"));
    }
    lines
}

pub(crate) fn notebook_row(nb: &NotebookMetadata) -> String {
    let size = nb.size.map_or_else(|| "-".to_string(), |s| format_bytes(s, 2));
    format!("{:<40}  {:<10}  {}", nb.path, size, nb.name)
}

pub(crate) fn notebook_lines(nb: &NotebookMetadata) -> Vec<String> {
    let mut lines = vec![format!("Notebook: {}", nb.name), format!("Path: {}", nb.path)];
    if !nb.description.is_empty() {
        lines.push(format!("Description: {}", nb.description));
    }
    if !nb.tags.is_empty() {
        lines.push(format!("Tags: {}", nb.tags.join(", ")));
    }
    if !nb.python_version.is_empty() {
        lines.push(format!("Python: {}", nb.python_version));
    }
    if let Some(size) = nb.size {
        lines.push(format!("Size: {}", format_bytes(size, 2)));
    }
    if nb.last_modified.is_some() {
        lines.push(format!(
            "Last modified: {}",
            format_date(nb.last_modified.as_deref())
        ));
    }
    if !nb.requirements.is_empty() {
        lines.push("Requirements:".to_string());
        for (pkg, version) in &nb.requirements {
            lines.push(format!("  {pkg} {}", format_value(version)));
        }
    }
    if !nb.parameters.is_empty() {
        lines.push("Parameters:".to_string());
        for param in &nb.parameters {
            lines.push(format!("  {}", parameter_line(param)));
        }
    }
    lines
}

fn parameter_line(param: &Value) -> String {
    let name = param.get("name").and_then(Value::as_str).unwrap_or("?");
    let mut line = name.to_string();
    if let Some(ty) = param.get("type").and_then(Value::as_str) {
        line.push_str(&format!(" ({ty})"));
    }
    if let Some(default) = param.get("default").filter(|v| !v.is_null()) {
        line.push_str(&format!(" = {}", format_value(default)));
    }
    if let Some(desc) = param
        .get("description")
        .and_then(Value::as_str)
        .filter(|d| !d.is_empty())
    {
        line.push_str(&format!("  # {desc}"));
    }
    line
}

pub(crate) fn watch_event_line(event: &WatchEvent) -> String {
    match event {
        WatchEvent::StatusChanged { id, from: None, to } => format!("{id}: {to}"),
        WatchEvent::StatusChanged {
            id,
            from: Some(from),
            to,
        } => format!("{id}: {from} -> {to}"),
        WatchEvent::PollFailed {
            message,
            consecutive,
        } => format!("Status check failed ({consecutive}): {message}"),
        WatchEvent::Finished { execution } => {
            format!("Execution {} finished: {}", execution.id, execution.status)
        }
        WatchEvent::Interrupted => {
            "Stopped watching; the execution keeps running on the server".to_string()
        }
    }
}
