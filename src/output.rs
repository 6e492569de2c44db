use crate::cli::OutputFormat;
use foreman::ForemanError;
use serde_json::json;

pub fn emit_output(output: &OutputFormat, command: &str, payload: serde_json::Value) {
    match output {
        OutputFormat::Text => {
            if let Some(message) = payload.get("message").and_then(serde_json::Value::as_str) {
                println!("{}", message);
            } else {
                let pretty =
                    serde_json::to_string_pretty(&payload).unwrap_or_else(|_| payload.to_string());
                println!("{}", pretty);
            }
        }
        OutputFormat::Json => println!(
            "{}",
            json!({
                "command": command,
                "status": "ok",
                "payload": payload,
            })
        ),
    }
}

pub fn map_error_to_exit_code(error: &ForemanError) -> i32 {
    error.exit_code()
}
