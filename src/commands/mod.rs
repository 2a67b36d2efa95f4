//! Subcommand implementations and the pieces they share.

pub mod jobs;
pub mod resume;
pub mod send;

use std::future::Future;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::ArgMatches;
use stockchat_stream::{
    ChatStreamConfig, ChatStreamController, ChatStreamError, ConfigError, HttpChatBackend,
    JobActivityLogger, LoginRedirect, StreamOutcome,
};
use tokio::sync::oneshot;

pub fn init_tracing(verbose: bool) {
    let default = if verbose {
        "stockchat_stream=debug,job_activity=info"
    } else {
        "warn"
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Config file from `--config` if given, then `STOCKCHAT_*` overrides.
pub fn load_config(matches: &ArgMatches) -> Result<ChatStreamConfig, ConfigError> {
    match matches.get_one::<String>("config") {
        Some(path) => {
            let mut config = ChatStreamConfig::from_file(Path::new(path))?;
            config.apply_env()?;
            Ok(config)
        }
        None => ChatStreamConfig::from_env(),
    }
}

/// Build a controller from the command line, exiting on bad configuration.
pub fn build_controller(matches: &ArgMatches) -> ChatStreamController {
    let config = match load_config(matches) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("\u{2717} {}", e);
            std::process::exit(1);
        }
    };
    let backend = match HttpChatBackend::new(&config) {
        Ok(backend) => backend,
        Err(e) => {
            eprintln!("\u{2717} {}", e);
            std::process::exit(1);
        }
    };
    let activity = JobActivityLogger::new(matches.get_one::<String>("activity-log").map(PathBuf::from));
    let redirect = CliLoginRedirect {
        base_url: config.base_url.clone(),
    };

    ChatStreamController::new(Arc::new(backend), config)
        .with_login_redirect(Arc::new(redirect))
        .with_activity_logger(Arc::new(activity))
}

/// A terminal cannot be redirected, so point the user at the login page.
struct CliLoginRedirect {
    base_url: String,
}

impl LoginRedirect for CliLoginRedirect {
    fn redirect_to_login(&self, login_url: &str) {
        let target = if login_url.starts_with("http://") || login_url.starts_with("https://") {
            login_url.to_string()
        } else {
            // The login page is served next to the API, not under it.
            let origin = self
                .base_url
                .trim_end_matches('/')
                .trim_end_matches("/api")
                .to_string();
            format!("{}{}", origin, login_url)
        };
        eprintln!();
        eprintln!("\u{26a0}\u{fe0f}  Not logged in or session expired.");
        eprintln!("   Log in at {} and set STOCKCHAT_API_TOKEN.", target);
    }
}

/// Prints only what was added to the response since the last render. A
/// response that was replaced instead of extended is printed again in full.
#[derive(Default)]
struct ResponsePrinter {
    printed: String,
}

impl ResponsePrinter {
    fn render(&mut self, response: &str) {
        if response == self.printed {
            return;
        }
        let mut stdout = std::io::stdout().lock();
        match response.strip_prefix(self.printed.as_str()) {
            Some(delta) => {
                let _ = write!(stdout, "{}", delta);
            }
            None => {
                let _ = write!(stdout, "\n\n{}", response);
            }
        }
        let _ = stdout.flush();
        self.printed = response.to_string();
    }
}

/// Drive `op` while echoing the response to stdout. Ctrl+C stops watching
/// the job; it keeps running on the server.
pub async fn stream_to_stdout<F>(
    controller: &ChatStreamController,
    op: F,
) -> Result<StreamOutcome, ChatStreamError>
where
    F: Future<Output = Result<StreamOutcome, ChatStreamError>>,
{
    let mut updates = controller.subscribe();
    let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
    let printer = tokio::spawn(async move {
        let mut printer = ResponsePrinter::default();
        loop {
            tokio::select! {
                _ = &mut stop_rx => break,
                changed = updates.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let response = updates.borrow_and_update().response.clone();
                    printer.render(&response);
                }
            }
        }
        printer
    });

    tokio::pin!(op);
    let result = tokio::select! {
        result = &mut op => result,
        _ = tokio::signal::ctrl_c() => {
            controller.disconnect();
            op.await
        }
    };

    let _ = stop_tx.send(());
    if let Ok(mut printer) = printer.await {
        printer.render(&controller.state().response);
        if !printer.printed.is_empty() {
            println!();
        }
    }
    result
}

/// Print how a streamed job ended and exit non-zero on failure.
pub fn report_outcome(
    controller: &ChatStreamController,
    result: Result<StreamOutcome, ChatStreamError>,
) {
    let state = controller.state();
    match result {
        Ok(StreamOutcome::Completed) | Ok(StreamOutcome::Recovered) => {
            if let Some(viz) = state.visualization {
                println!();
                println!("\u{1f4c8} Visualization:");
                println!(
                    "{}",
                    serde_json::to_string_pretty(&viz).unwrap_or_else(|_| viz.0.to_string())
                );
            }
        }
        Ok(StreamOutcome::Disconnected) | Ok(StreamOutcome::Superseded) => {
            if let Some(job) = state.current_job {
                println!();
                println!("Stopped watching job {}. It keeps running on the server.", job.job_id);
                if job.session_id.is_empty() {
                    println!("Resume with: stockchat resume {}", job.job_id);
                } else {
                    println!(
                        "Resume with: stockchat resume {} --session {}",
                        job.job_id, job.session_id
                    );
                }
            }
        }
        Ok(StreamOutcome::AlreadyActive) => {
            println!("Already watching this job.");
        }
        Ok(StreamOutcome::Redirected) => std::process::exit(1),
        Err(e) => {
            eprintln!("\u{2717} {}", e);
            if let ChatStreamError::DailyLimitExceeded {
                remaining: Some(0), ..
            } = e
            {
                eprintln!("   Your quota resets tomorrow.");
            }
            std::process::exit(1);
        }
    }
}
