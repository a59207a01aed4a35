use anyhow::{Context, Result};
use serde_json::Value;
use tracing::debug;

use crate::config::JobsConfig;
use crate::notify::{Message, escape_html};
use crate::sources::dedupe_by_key;
use crate::types::JobPosting;

fn text_field(job: &Value, name: &str) -> Option<String> {
    match job.get(name)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Salary in whole dollars; RemoteOK sends numbers, occasionally strings.
fn salary_field(job: &Value) -> Option<u64> {
    let salary = match job.get("salary_min")? {
        Value::Number(n) => n.as_u64().or_else(|| n.as_f64().map(|f| f as u64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    };
    salary.filter(|s| *s > 0)
}

/// Parse the RemoteOK API array into senior postings that pass the filters.
///
/// Only the first `max_jobs_per_scan` entries are looked at. The leading
/// legal-notice object has no `position` and drops out naturally. A URL
/// listed twice yields one posting.
pub fn parse_jobs(json: &str, config: &JobsConfig) -> Result<Vec<JobPosting>> {
    let entries: Vec<Value> = serde_json::from_str(json).context("unexpected jobs payload")?;
    let keywords: Vec<String> = config.keywords.iter().map(|k| k.to_lowercase()).collect();
    let blacklist: Vec<String> = config
        .blacklist_companies
        .iter()
        .map(|c| c.to_lowercase())
        .filter(|c| !c.is_empty())
        .collect();
    let min_salary = config.min_salary_k.saturating_mul(1000);

    let jobs: Vec<JobPosting> = entries
        .iter()
        .take(config.max_jobs_per_scan)
        .filter_map(|job| {
            let title = text_field(job, "position")?;
            let lower = title.to_lowercase();
            if !keywords.iter().any(|kw| lower.contains(kw.as_str())) {
                return None;
            }
            let salary = salary_field(job);
            if salary.is_some_and(|s| s < min_salary) {
                return None;
            }
            let company = text_field(job, "company").unwrap_or_else(|| "N/A".to_string());
            let company_lower = company.to_lowercase();
            if blacklist.iter().any(|b| company_lower.contains(b.as_str())) {
                return None;
            }
            let url = text_field(job, "url").or_else(|| {
                text_field(job, "id").map(|id| format!("https://remoteok.com/remote-jobs/{id}"))
            })?;
            Some(JobPosting {
                key: url.clone(),
                title,
                company,
                salary_min: salary.map(|s| s / 1000),
                url,
            })
        })
        .collect();
    let jobs = dedupe_by_key(jobs);
    debug!("{} of {} entries pass the job filters", jobs.len(), entries.len());
    Ok(jobs)
}

pub fn format_alert(job: &JobPosting) -> Message {
    let salary = job
        .salary_min
        .map(|k| format!("${k}k+"))
        .unwrap_or_else(|| "N/A".to_string());
    Message::html(format!(
        "🚀 <b>NEW {}</b>\n\n🏢 <b>{}</b>\n💰 <b>{salary}</b>\n📍 Remote\n\n🔗 <a href=\"{}\">Apply Now</a>",
        escape_html(&job.title.to_uppercase()),
        escape_html(&job.company),
        escape_html(&job.url),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAYLOAD: &str = r#"[
        {"legal": "API terms of service"},
        {"id": "101", "position": "Senior Python Engineer", "company": "Acme",
         "salary_min": 150000, "url": "https://remoteok.com/remote-jobs/101"},
        {"id": 102, "position": "Junior Python Dev", "company": "Acme", "salary_min": 90000},
        {"id": 103, "position": "Staff Engineer", "company": "ShadyCorp Inc", "salary_min": 200000},
        {"id": 104, "position": "Lead Backend Engineer", "company": "Small Co", "salary_min": 80000},
        {"id": 105, "position": "Principal Architect", "company": "Beta & Sons"}
    ]"#;

    fn config() -> JobsConfig {
        JobsConfig {
            min_salary_k: 100,
            blacklist_companies: vec!["shadycorp".to_string()],
            ..JobsConfig::default()
        }
    }

    #[test]
    fn filters_seniority_salary_and_blacklist() {
        let jobs = parse_jobs(PAYLOAD, &config()).unwrap();
        let keys: Vec<_> = jobs.iter().map(|j| j.key.as_str()).collect();
        assert_eq!(
            keys,
            vec![
                "https://remoteok.com/remote-jobs/101",
                "https://remoteok.com/remote-jobs/105"
            ]
        );
        assert_eq!(jobs[0].salary_min, Some(150));
        // no advertised salary is not a reason to drop
        assert_eq!(jobs[1].salary_min, None);
    }

    #[test]
    fn scan_limit_applies_before_filtering() {
        let config = JobsConfig {
            max_jobs_per_scan: 2,
            ..config()
        };
        assert_eq!(parse_jobs(PAYLOAD, &config).unwrap().len(), 1);
    }

    #[test]
    fn repeated_url_yields_one_posting() {
        let payload = r#"[
            {"id": 1, "position": "Senior Rust Engineer", "company": "A", "url": "https://remoteok.com/remote-jobs/1"},
            {"id": 1, "position": "Senior Rust Engineer", "company": "A", "url": "https://remoteok.com/remote-jobs/1"}
        ]"#;
        assert_eq!(parse_jobs(payload, &config()).unwrap().len(), 1);
    }

    #[test]
    fn non_array_payload_errors() {
        assert!(parse_jobs(r#"{"error": "rate limited"}"#, &config()).is_err());
    }

    #[test]
    fn alert_is_escaped_html() {
        let job = JobPosting {
            key: "u".to_string(),
            title: "Principal Architect".to_string(),
            company: "Beta & Sons".to_string(),
            salary_min: None,
            url: "https://remoteok.com/remote-jobs/105".to_string(),
        };
        let msg = format_alert(&job);
        assert!(msg.text.starts_with("🚀 <b>NEW PRINCIPAL ARCHITECT</b>"));
        assert!(msg.text.contains("<b>Beta &amp; Sons</b>"));
        assert!(msg.text.contains("💰 <b>N/A</b>"));
        assert!(msg.text.ends_with("<a href=\"https://remoteok.com/remote-jobs/105\">Apply Now</a>"));
    }

    #[test]
    fn quote_in_url_stays_inside_href() {
        let job = JobPosting {
            key: "u".to_string(),
            title: "Lead Engineer".to_string(),
            company: "Acme".to_string(),
            salary_min: Some(150),
            url: r#"https://remoteok.com/remote-jobs/7"x"#.to_string(),
        };
        let msg = format_alert(&job);
        assert!(msg.text.contains(r#"href="https://remoteok.com/remote-jobs/7&quot;x""#));
    }
}
