//! `status` command: print progress for one job or all jobs

use anyhow::{Context, Result};

use crate::config::Config;
use crate::dispatch::report::elapsed_secs;
use crate::models::Job;
use crate::storage::{JobRepository, Stores};

pub async fn execute(job_id: Option<String>, config: Config) -> Result<()> {
    let stores = Stores::sqlite(&config.database.sqlite_path)?;

    match job_id {
        Some(id) => {
            let job = stores
                .jobs
                .get_job(&id)?
                .with_context(|| format!("Job not found: {id}"))?;
            print_job(&job);
        }
        None => {
            let jobs = stores.jobs.list_jobs()?;
            if jobs.is_empty() {
                println!("No jobs recorded");
            }
            for job in jobs {
                print_job(&job);
            }
        }
    }

    Ok(())
}

fn print_job(job: &Job) {
    println!(
        "{}  {}  [{}]  sent {}/{} failed {}  elapsed {}s",
        job.id,
        job.name,
        job.status,
        job.sent_count,
        job.total_targets,
        job.failed_count,
        elapsed_secs(job),
    );
}
