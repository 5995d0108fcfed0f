use clap::Subcommand;

use crate::util::{api_request, exit_error, read_json_from_file};

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Show the active adaptive rate limit configuration
    Show,
    /// Merge a partial configuration into the active one
    Update {
        /// Partial config as JSON string, e.g. '{"emergency": {"enabled": false}}'
        #[arg(long, short = 'd')]
        data: Option<String>,
        /// Read the partial config from file (use '-' for stdin)
        #[arg(long, short = 'f', conflicts_with = "data")]
        file: Option<String>,
    },
}

pub async fn run(api_url: &str, token: &str, command: ConfigCommands, raw: bool) -> i32 {
    match command {
        ConfigCommands::Show => {
            api_request(
                api_url,
                reqwest::Method::GET,
                "/v1/admin/rate-limit/config",
                Some(token),
                None,
                &[],
                &[],
                raw,
                false,
            )
            .await
        }
        ConfigCommands::Update { data, file } => {
            let patch = resolve_patch(data.as_deref(), file.as_deref());
            api_request(
                api_url,
                reqwest::Method::PATCH,
                "/v1/admin/rate-limit/config",
                Some(token),
                Some(patch),
                &[],
                &[],
                raw,
                false,
            )
            .await
        }
    }
}

fn resolve_patch(data: Option<&str>, file: Option<&str>) -> serde_json::Value {
    let patch = match (data, file) {
        (Some(d), _) => match serde_json::from_str(d) {
            Ok(v) => v,
            Err(e) => exit_error(
                &format!("Invalid JSON in --data: {e}"),
                Some("Provide valid JSON string"),
            ),
        },
        (None, Some(f)) => match read_json_from_file(f) {
            Ok(v) => v,
            Err(e) => exit_error(&e, Some("Provide a valid JSON file or use '-' for stdin")),
        },
        (None, None) => exit_error(
            "Nothing to update",
            Some("Pass --data '<json>' or --file <path>"),
        ),
    };

    if !patch.is_object() {
        exit_error(
            "Config update must be a JSON object",
            Some("Only the tables you include are changed, e.g. {\"load\": {\"critical\": 0.2}}"),
        );
    }
    patch
}
