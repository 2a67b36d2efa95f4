//! `stockchat send`: submit a message and stream the answer.

use clap::ArgMatches;
use stockchat_stream::ModelConfig;

use super::{build_controller, report_outcome, stream_to_stdout};

pub async fn run(matches: &ArgMatches) {
    let Some(message) = matches.get_one::<String>("message") else {
        eprintln!("Usage: stockchat send <MESSAGE> [--session <SESSION_ID>]");
        std::process::exit(1);
    };
    let session_id = matches.get_one::<String>("session").map(String::as_str);
    let model_config = model_config(matches);
    let retry = !matches.get_flag("no-retry");

    let controller = build_controller(matches);
    let result = if retry {
        stream_to_stdout(
            &controller,
            controller.send_message_with_retry(message, model_config.as_ref(), session_id),
        )
        .await
    } else {
        stream_to_stdout(
            &controller,
            controller.send_message(message, model_config.as_ref(), session_id),
        )
        .await
    };

    if let Some(session) = controller.session_id() {
        tracing::debug!(session_id = %session, "Chat session");
    }
    report_outcome(&controller, result);
}

fn model_config(matches: &ArgMatches) -> Option<ModelConfig> {
    let model = matches.get_one::<String>("model").cloned();
    let temperature = matches.get_one::<f32>("temperature").copied();
    if model.is_none() && temperature.is_none() {
        return None;
    }
    Some(ModelConfig {
        model,
        temperature,
        ..ModelConfig::default()
    })
}
