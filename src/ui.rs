//! Terminal output: a progress spinner fed by store polling, and coloured
//! summaries.

use std::collections::HashMap;
use std::time::Duration;

use console::Style;
use indicatif::{ProgressBar, ProgressStyle};

use coursegen::job::{AuditRecord, GenerationJob, JobStatus, StageStatus};

/// Follows a job while it runs.
///
/// Each poll updates the spinner; retries and failures seen since the last
/// poll are printed above it.
pub struct JobProgress {
    pb: ProgressBar,
    total: usize,
    seen: HashMap<String, (StageStatus, u32)>,
    green: Style,
    red: Style,
    yellow: Style,
    dim: Style,
}

impl JobProgress {
    pub fn start(course_title: &str, total: usize) -> Self {
        let pb = ProgressBar::new_spinner();
        let style = ProgressStyle::default_spinner()
            .template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner());
        pb.set_style(style);
        pb.set_message(format!("{course_title}: starting"));
        pb.enable_steady_tick(Duration::from_millis(100));

        Self {
            pb,
            total,
            seen: HashMap::new(),
            green: Style::new().green().bold(),
            red: Style::new().red().bold(),
            yellow: Style::new().yellow(),
            dim: Style::new().dim(),
        }
    }

    pub fn update(&mut self, job: &GenerationJob) {
        for result in job.stage_results.values() {
            let previous = self
                .seen
                .insert(result.node_id.clone(), (result.status, result.attempts));
            if previous == Some((result.status, result.attempts)) {
                continue;
            }
            let reason = result
                .last_error
                .as_ref()
                .map(|e| e.to_string())
                .unwrap_or_default();
            match result.status {
                StageStatus::Running if result.attempts > 0 => {
                    self.pb.println(format!(
                        "  {} {} {} attempt {} failed: {reason}",
                        self.yellow.apply_to("↻"),
                        result.node_type,
                        result.node_id,
                        result.attempts
                    ));
                }
                StageStatus::Failed => {
                    self.pb.println(format!(
                        "  {} {} {}: {reason}",
                        self.red.apply_to("✗"),
                        result.node_type,
                        result.node_id
                    ));
                }
                _ => {}
            }
        }

        let settled = job
            .stage_results
            .values()
            .filter(|r| r.status.is_terminal())
            .count();
        let running = job.count(StageStatus::Running);
        self.pb.set_message(format!(
            "{settled}/{} stages settled, {running} running",
            self.total
        ));
    }

    pub fn complete(&self, job: &GenerationJob) {
        self.pb.finish_and_clear();
        match job.status {
            JobStatus::Completed => {
                println!("  {} Course generated", self.green.apply_to("✓"));
            }
            JobStatus::PartiallyFailed => {
                println!(
                    "  {} Course partially generated ({} of {} stages failed or skipped)",
                    self.yellow.apply_to("!"),
                    job.count(StageStatus::Failed) + job.count(StageStatus::Skipped),
                    self.total
                );
            }
            _ => {
                let reason = job.error.as_ref().map(|e| e.to_string()).unwrap_or_default();
                println!("  {} Job failed: {reason}", self.red.apply_to("✗"));
            }
        }
    }

    pub fn print_audit(&self, record: &AuditRecord) {
        print_audit(record, status_style(record.status, &self.green, &self.red, &self.yellow));
    }
}

fn status_style<'a>(status: JobStatus, green: &'a Style, red: &'a Style, yellow: &'a Style) -> &'a Style {
    match status {
        JobStatus::Completed => green,
        JobStatus::Failed => red,
        _ => yellow,
    }
}

fn print_audit(record: &AuditRecord, style: &Style) {
    println!();
    println!("{}", style.apply_to("─── Audit Record ───"));
    println!(
        "{}",
        serde_json::to_string_pretty(record).unwrap_or_default()
    );
}

/// Print each required stage of a stored job in outline order.
pub fn print_job(job: &GenerationJob) {
    let green = Style::new().green();
    let red = Style::new().red();
    let yellow = Style::new().yellow();
    let dim = Style::new().dim();

    println!(
        "{} {} ({})",
        status_style(job.status, &green, &red, &yellow).apply_to(job.status),
        job.id,
        job.outline.title
    );
    if !job.has_started_stages() {
        println!("  {}", dim.apply_to("no stages recorded yet"));
    }
    for node in job.outline.required_nodes(&job.request) {
        let line = match job.stage(&node.id) {
            Some(result) => {
                let style = match result.status {
                    StageStatus::Succeeded => &green,
                    StageStatus::Failed => &red,
                    StageStatus::Skipped | StageStatus::Running => &yellow,
                };
                let detail = match (&result.artifact_ref, &result.last_error) {
                    (Some(artifact), _) => artifact.artifact_id.clone(),
                    (None, Some(err)) => err.to_string(),
                    (None, None) => String::new(),
                };
                format!(
                    "{:<10} {:<8} {:<20} {}",
                    style.apply_to(result.status.to_string()),
                    node.node_type(),
                    node.id,
                    dim.apply_to(detail)
                )
            }
            None => format!(
                "{:<10} {:<8} {}",
                dim.apply_to("pending"),
                node.node_type(),
                node.id
            ),
        };
        println!("  {line}");
    }
    if let Some(err) = &job.error {
        println!("  {} {err}", red.apply_to("error:"));
    }
    print_audit(
        &AuditRecord::from_job(job),
        status_style(job.status, &green, &red, &yellow),
    );
}

impl Drop for JobProgress {
    fn drop(&mut self) {
        if !self.pb.is_finished() {
            self.pb.finish_with_message(format!("{}", self.dim.apply_to("interrupted")));
        }
    }
}
