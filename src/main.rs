use clap::{Arg, ArgAction, Command};

mod commands;

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    let matches = Command::new("stockchat")
        .version(VERSION)
        .about("Stockchat - ask about markets and stream the answer")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .global(true)
                .help("TOML config file (STOCKCHAT_* environment variables override it)"),
        )
        .arg(
            Arg::new("activity-log")
                .long("activity-log")
                .value_name("FILE")
                .global(true)
                .help("Append job activity entries as JSON lines to this file"),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Log poll loop activity to stderr"),
        )
        .subcommand(
            Command::new("send")
                .about("Send a chat message and stream the answer")
                .arg(
                    Arg::new("message")
                        .required(true)
                        .value_name("MESSAGE")
                        .help("Message to send"),
                )
                .arg(
                    Arg::new("session")
                        .short('s')
                        .long("session")
                        .value_name("SESSION_ID")
                        .help("Continue an existing chat session"),
                )
                .arg(
                    Arg::new("model")
                        .short('m')
                        .long("model")
                        .value_name("MODEL")
                        .help("Model to answer with"),
                )
                .arg(
                    Arg::new("temperature")
                        .long("temperature")
                        .value_name("TEMPERATURE")
                        .value_parser(clap::value_parser!(f32))
                        .help("Sampling temperature"),
                )
                .arg(
                    Arg::new("no-retry")
                        .long("no-retry")
                        .action(ArgAction::SetTrue)
                        .help("Fail immediately when the server is busy"),
                ),
        )
        .subcommand(
            Command::new("resume")
                .about("Resume streaming a job that is still running")
                .arg(
                    Arg::new("job")
                        .required(true)
                        .value_name("JOB_ID")
                        .help("Job to resume"),
                )
                .arg(
                    Arg::new("session")
                        .short('s')
                        .long("session")
                        .value_name("SESSION_ID")
                        .help("Session the job belongs to, used to recover a lost answer"),
                ),
        )
        .subcommand(
            Command::new("jobs")
                .about("List jobs that are still running on the server")
                .arg(
                    Arg::new("session")
                        .short('s')
                        .long("session")
                        .value_name("SESSION_ID")
                        .help("Only list jobs of this session"),
                ),
        )
        .get_matches();

    commands::init_tracing(matches.get_flag("verbose"));

    match matches.subcommand() {
        Some(("send", sub_matches)) => commands::send::run(sub_matches).await,
        Some(("resume", sub_matches)) => commands::resume::run(sub_matches).await,
        Some(("jobs", sub_matches)) => commands::jobs::run(sub_matches).await,
        _ => {
            println!("Stockchat v{}", VERSION);
            println!("Use --help for available commands");
        }
    }
}
