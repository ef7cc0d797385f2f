use std::env;
use std::process::ExitCode;

const DEFAULT_PORT: u16 = 8080;

#[tokio::main]
async fn main() -> ExitCode {
    let mut args = env::args().skip(1);
    match args.next().as_deref() {
        Some("serve") => {
            let port = args
                .next()
                .and_then(|s| s.parse::<u16>().ok())
                .unwrap_or(DEFAULT_PORT);
            if let Err(e) = glidepath::api::run_http_server(port).await {
                eprintln!("Server error: {e}");
                return ExitCode::FAILURE;
            }
            ExitCode::SUCCESS
        }
        _ => {
            eprintln!("glidepath: deterministic retirement cash-flow projection");
            eprintln!();
            eprintln!("Usage:");
            eprintln!("  glidepath serve [port]   start the HTTP API (default port {DEFAULT_PORT})");
            ExitCode::FAILURE
        }
    }
}
