//! `stockchat jobs`: list jobs still running on the server.

use clap::ArgMatches;

use super::build_controller;

pub async fn run(matches: &ArgMatches) {
    let session_id = matches.get_one::<String>("session").map(String::as_str);
    let controller = build_controller(matches);

    let jobs = match controller.active_jobs(session_id).await {
        Ok(jobs) => jobs,
        Err(e) => {
            eprintln!("\u{2717} Failed to list active jobs: {}", e);
            std::process::exit(1);
        }
    };

    if jobs.is_empty() {
        println!("No active jobs.");
        return;
    }

    println!("Active jobs:");
    for job in &jobs {
        let started = job
            .created_at
            .map(|ts| ts.format("%Y-%m-%d %H:%M:%S UTC").to_string())
            .unwrap_or_else(|| "-".to_string());
        let status = job
            .status
            .map(|s| s.to_string())
            .unwrap_or_else(|| "unknown".to_string());
        println!(
            "  {}  session {}  {}  started {}",
            job.job_id, job.session_id, status, started
        );
    }
    println!();
    println!("Resume one with: stockchat resume <JOB_ID> --session <SESSION_ID>");
}
