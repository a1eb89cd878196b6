//! Plan exports: Markdown, JSON and a Mermaid timeline

use crate::models::{Plan, PlanProgress, Task, TaskStatus};
use chrono::{DateTime, Utc};

fn format_time(seconds: i64) -> String {
    DateTime::<Utc>::from_timestamp(seconds, 0)
        .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| seconds.to_string())
}

/// Render a ten-segment progress bar like `[███░░░░░░░] 30%`
fn progress_bar(percent: i64) -> String {
    let filled = (percent.clamp(0, 100) / 10) as usize;
    format!(
        "[{}{}] {}%",
        "█".repeat(filled),
        "░".repeat(10 - filled),
        percent
    )
}

/// Render a plan and its tasks as Markdown
pub fn export_markdown(
    plan: &Plan,
    tasks: &[Task],
    progress: &PlanProgress,
    include_timeline: bool,
) -> String {
    let mut out = String::new();
    out.push_str(&format!("# Plan: {}\n\n", plan.description));
    out.push_str(&format!("- Created: {}\n", format_time(plan.created_at)));
    out.push_str(&format!("- Status: {}\n", plan.status.as_str()));
    out.push_str(&format!("- Id: {}\n\n", plan.id));

    out.push_str(&format!("Progress: {}\n\n", progress_bar(progress.percent())));
    out.push_str(&format!(
        "Tasks: {} total — {} pending, {} in progress, {} completed, {} failed, {} blocked, {} skipped\n\n",
        progress.total,
        progress.pending,
        progress.in_progress,
        progress.completed,
        progress.failed,
        progress.blocked,
        progress.skipped
    ));

    out.push_str("## Tasks\n\n");
    for task in tasks {
        let indent = if task.parent_task_id.is_some() { "  " } else { "" };
        out.push_str(&format!(
            "{}- {} {}",
            indent,
            task.status.emoji(),
            task.description
        ));
        if let Some(agent) = &task.assigned_agent {
            out.push_str(&format!(" _(assigned: {agent})_"));
        }
        out.push('\n');
    }

    if include_timeline {
        let timeline = timeline_mermaid(plan, tasks);
        if !timeline.is_empty() {
            out.push_str("\n## Timeline\n\n```mermaid\n");
            out.push_str(&timeline);
            out.push_str("```\n");
        }
    }

    out
}

/// Render a plan and its tasks as a JSON document
///
/// Values pass through the serializer's string escaping (backslash, quote,
/// newline), so descriptions with arbitrary content stay well-formed.
pub fn export_json(plan: &Plan, tasks: &[Task], progress: &PlanProgress) -> String {
    let doc = serde_json::json!({
        "plan": {
            "id": plan.id.to_string(),
            "description": plan.description,
            "context": plan.context,
            "status": plan.status.as_str(),
            "created_at": plan.created_at,
            "updated_at": plan.updated_at,
            "completed_at": plan.completed_at,
        },
        "progress": {
            "total": progress.total,
            "completed": progress.completed,
            "failed": progress.failed,
            "percent": progress.percent(),
        },
        "tasks": tasks.iter().map(|t| serde_json::json!({
            "id": t.id.to_string(),
            "parent_task_id": t.parent_task_id.map(|p| p.to_string()),
            "description": t.description,
            "assigned_agent": t.assigned_agent,
            "status": t.status.as_str(),
            "priority": t.priority,
            "output": t.output,
            "error": t.error,
            "retry_count": t.retry_count,
        })).collect::<Vec<_>>(),
    });
    serde_json::to_string_pretty(&doc).expect("plan export is always serializable")
}

/// Mermaid gantt timeline of started tasks; empty when nothing has run
pub fn timeline_mermaid(plan: &Plan, tasks: &[Task]) -> String {
    let started: Vec<&Task> = tasks.iter().filter(|t| t.started_at.is_some()).collect();
    if started.is_empty() {
        return String::new();
    }

    let mut out = String::from("gantt\n");
    out.push_str(&format!("    title {}\n", plan.description.replace('\n', " ")));
    out.push_str("    dateFormat X\n");
    out.push_str("    axisFormat %H:%M:%S\n");
    for task in started {
        let start = task.started_at.unwrap_or(task.created_at);
        let end = task.completed_at.unwrap_or_else(|| Utc::now().timestamp());
        let marker = match task.status {
            TaskStatus::Completed => "done, ",
            TaskStatus::InProgress => "active, ",
            TaskStatus::Failed => "crit, ",
            _ => "",
        };
        out.push_str(&format!(
            "    {} : {}{}, {}\n",
            task.description.replace(':', " ").replace('\n', " "),
            marker,
            start,
            end.max(start + 1)
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PlanStatus;
    use uuid::Uuid;

    fn sample() -> (Plan, Vec<Task>, PlanProgress) {
        let plan = Plan {
            id: Uuid::new_v4(),
            description: "Ship \"v2\"".to_string(),
            context: None,
            status: PlanStatus::Active,
            created_at: 1_700_000_000,
            updated_at: 1_700_000_100,
            completed_at: None,
        };
        let done = Task {
            id: Uuid::new_v4(),
            plan_id: plan.id,
            parent_task_id: None,
            description: "design\nthe schema".to_string(),
            assigned_agent: Some("baccio".to_string()),
            status: TaskStatus::Completed,
            priority: 60,
            created_at: 1_700_000_000,
            started_at: Some(1_700_000_010),
            completed_at: Some(1_700_000_500),
            output: Some("ok".to_string()),
            error: None,
            retry_count: 0,
        };
        let pending = Task {
            id: Uuid::new_v4(),
            plan_id: plan.id,
            parent_task_id: Some(done.id),
            description: "implement".to_string(),
            assigned_agent: None,
            status: TaskStatus::Pending,
            priority: 50,
            created_at: 1_700_000_001,
            started_at: None,
            completed_at: None,
            output: None,
            error: None,
            retry_count: 0,
        };
        let progress = PlanProgress {
            total: 2,
            pending: 1,
            completed: 1,
            ..Default::default()
        };
        (plan, vec![done, pending], progress)
    }

    #[test]
    fn test_markdown_export() {
        let (plan, tasks, progress) = sample();
        let md = export_markdown(&plan, &tasks, &progress, true);

        assert!(md.contains("# Plan: Ship \"v2\""));
        assert!(md.contains(&format!("- Id: {}", plan.id)));
        assert!(md.contains("- Status: active"));
        assert!(md.contains("[█████░░░░░] 50%"));
        assert!(md.contains("✅ design"));
        assert!(md.contains("_(assigned: baccio)_"));
        assert!(md.contains("  - ⏳ implement")); // subtask indented
        assert!(md.contains("```mermaid\ngantt"));
    }

    #[test]
    fn test_json_export_escapes_values() {
        let (plan, tasks, progress) = sample();
        let json = export_json(&plan, &tasks, &progress);

        // Parses back and preserves the awkward characters
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed["plan"]["description"], "Ship \"v2\"");
        assert_eq!(parsed["tasks"][0]["description"], "design\nthe schema");
        assert_eq!(parsed["progress"]["percent"], 50);
        // Raw text carries the escape sequences
        assert!(json.contains(r#"Ship \"v2\""#));
        assert!(json.contains(r"design\nthe schema"));
    }

    #[test]
    fn test_timeline_empty_without_started_tasks() {
        let (plan, mut tasks, _) = sample();
        tasks.retain(|t| t.started_at.is_none());
        assert!(timeline_mermaid(&plan, &tasks).is_empty());
    }
}
