// src/queue/source.rs

//! JSON-lines job files used to seed the in-memory queue.

use std::io::BufRead;

use serde::Deserialize;

use crate::errors::{Result, TaskvisorError};
use crate::queue::job::{Job, JobPayload};

/// One line of a jobs file.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum JobLine {
    /// A job with its own id (and possibly earlier attempts).
    Job(Job),
    /// A bare payload; the queue assigns the id.
    Payload(JobPayload),
}

/// Parse a JSON-lines job source. Blank lines and `#` comments are skipped.
pub fn read_job_lines(reader: impl BufRead) -> Result<Vec<JobLine>> {
    let mut jobs = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let job = serde_json::from_str(trimmed).map_err(|e| {
            TaskvisorError::ConfigError(format!("jobs line {}: {e}", idx + 1))
        })?;
        jobs.push(job);
    }
    Ok(jobs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn accepts_full_jobs_and_bare_payloads() {
        let input = r#"
# seeded jobs
{"id":"a","payload":{"instruction":"one","workingDirectory":"/tmp"},"attemptsMade":1}
{"instruction":"two","workingDirectory":"/srv","options":{"timeoutMs":500}}
"#;
        let jobs = read_job_lines(input.as_bytes()).unwrap();
        assert_eq!(jobs.len(), 2);

        match &jobs[0] {
            JobLine::Job(job) => {
                assert_eq!(job.id, "a");
                assert_eq!(job.attempts_made, 1);
            }
            other => panic!("expected full job, got {:?}", other),
        }
        match &jobs[1] {
            JobLine::Payload(payload) => {
                assert_eq!(payload.working_directory, PathBuf::from("/srv"));
                assert_eq!(payload.options.timeout_ms, Some(500));
            }
            other => panic!("expected payload, got {:?}", other),
        }
    }

    #[test]
    fn reports_the_offending_line() {
        let input = "{\"instruction\":\"ok\",\"workingDirectory\":\".\"}\n{\"nope\":1}\n";
        let err = read_job_lines(input.as_bytes()).unwrap_err();
        assert!(err.to_string().contains("jobs line 2"), "{err}");
    }
}
