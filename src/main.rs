mod cli;
mod commands;
mod output;

use foreman::Result;

#[tokio::main]
async fn main() {
    let level = if std::env::args().any(|arg| arg == "--verbose") {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt().with_max_level(level).init();

    let code = match run().await {
        Ok(()) => 0,
        Err(err) => {
            eprintln!("Error: {}", err);
            output::map_error_to_exit_code(&err)
        }
    };

    std::process::exit(code);
}

async fn run() -> Result<()> {
    commands::run().await
}
