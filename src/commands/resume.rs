//! `stockchat resume`: reattach to a job that is still running.

use clap::ArgMatches;

use super::{build_controller, report_outcome, stream_to_stdout};

pub async fn run(matches: &ArgMatches) {
    let Some(job_id) = matches.get_one::<String>("job") else {
        eprintln!("Usage: stockchat resume <JOB_ID> [--session <SESSION_ID>]");
        std::process::exit(1);
    };
    let session_id = matches.get_one::<String>("session").map(String::as_str);

    let controller = build_controller(matches);
    println!("\u{1f504} Resuming job {}...\n", job_id);
    let result = stream_to_stdout(&controller, controller.resume_polling(job_id, session_id)).await;
    report_outcome(&controller, result);
}
