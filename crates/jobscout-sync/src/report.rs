use jobscout_core::PersistedJob;

use crate::CrawlRunSummary;

pub fn format_run_summary(summary: &CrawlRunSummary) -> String {
    let lines = [
        "# Crawl Run".to_string(),
        String::new(),
        format!("- Run ID: `{}`", summary.run_id),
        format!("- Started: {}", summary.started_at),
        format!("- Finished: {}", summary.finished_at),
        format!("- Pages fetched: {}", summary.pages_fetched),
        format!("- Records extracted: {}", summary.extracted),
        format!("- Unique results: {}", summary.unique_results),
        format!(
            "- Processed {} jobs, {} new",
            summary.outcome.total_count, summary.outcome.new_count
        ),
    ];
    lines.join("\n")
}

/// Markdown listing of recently discovered jobs, in the order given.
pub fn format_recent_jobs(jobs: &[PersistedJob], days: u32) -> String {
    let mut lines = vec![
        format!("# Jobs discovered in the last {days} day(s) ({})", jobs.len()),
        String::new(),
    ];
    if jobs.is_empty() {
        lines.push("No new jobs.".to_string());
        return lines.join("\n");
    }
    for job in jobs {
        let title = if job.title.is_empty() {
            "(untitled)"
        } else {
            job.title.as_str()
        };
        lines.push(format!("## {title}"));
        if !job.company.is_empty() {
            lines.push(format!("- company: {}", job.company));
        }
        if !job.description.is_empty() {
            lines.push(format!("- description: {}", job.description));
        }
        lines.push(format!("- rank: #{}", job.search_rank));
        lines.push(format!("- url: <{}>", job.url));
        lines.push(String::new());
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn job(title: &str, company: &str, description: &str) -> PersistedJob {
        let seen = Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).single().unwrap();
        PersistedJob {
            id: 1,
            url: "https://jobs.example.com/acme/1".to_string(),
            url_hash: "h".to_string(),
            title: title.to_string(),
            company: company.to_string(),
            description: description.to_string(),
            search_rank: 4,
            discovered_at: seen,
            last_seen_at: seen,
            is_active: true,
        }
    }

    #[test]
    fn recent_report_lists_each_job() {
        let text = format_recent_jobs(
            &[job("Frontend Engineer", "Acme", "Remote"), job("", "", "")],
            1,
        );
        assert!(text.starts_with("# Jobs discovered in the last 1 day(s) (2)"));
        assert!(text.contains("## Frontend Engineer\n- company: Acme\n- description: Remote\n- rank: #4"));
        assert!(text.contains("## (untitled)\n- rank: #4\n- url: <https://jobs.example.com/acme/1>"));
    }

    #[test]
    fn empty_report_says_so() {
        let text = format_recent_jobs(&[], 7);
        assert!(text.ends_with("No new jobs."));
    }
}
