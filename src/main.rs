#![warn(clippy::all, clippy::pedantic)]

use std::{process::ExitCode, time::Duration};

use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::Value;
use tracing_subscriber::EnvFilter;
use wust_probe::{
    HttpProbeRequest, Method, Probe, ProbeOptions, ProbeOutcome, RequestError, WsProbeRequest,
};

#[derive(Parser)]
#[command(author, version, about)]
struct Args {
    /// Give up after this many seconds
    #[arg(short, long, global = true)]
    timeout: Option<f64>,

    #[command(subcommand)]
    mode: Mode,
}

#[derive(Subcommand)]
enum Mode {
    /// Send one HTTP request with a JSON body
    Http {
        /// Target url
        #[arg(default_value = "http://localhost:8000/create-game")]
        url: String,

        /// Request method
        #[arg(short = 'X', long, default_value = "POST")]
        method: Method,

        /// JSON request body
        #[arg(short, long, default_value = r#"{"owner":"dsch","number_people":8}"#)]
        data: String,
    },
    /// Open a WebSocket, send one message and print what comes back
    Ws {
        /// Target url
        #[arg(default_value = "ws://127.0.0.1:8000/ws")]
        url: String,

        /// Text sent right after the connection opens
        #[arg(short, long, default_value = "Hello from Node 22!")]
        message: String,

        /// Close after this many idle seconds
        #[arg(short, long)]
        linger: Option<f64>,
    },
}

fn print_json(value: &impl Serialize) {
    match serde_json::to_string(value) {
        Ok(line) => println!("{line}"),
        Err(e) => tracing::error!(error = %e, "failed to serialize output"),
    }
}

fn exit_code(outcome: &ProbeOutcome) -> ExitCode {
    if outcome.is_failure() {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

fn secs(s: Option<f64>) -> Result<Option<Duration>, String> {
    s.map(|s| Duration::try_from_secs_f64(s).map_err(|e| format!("invalid duration {s}: {e}")))
        .transpose()
}

async fn run(args: Args) -> Result<ExitCode, String> {
    let options = |linger| -> Result<ProbeOptions, String> {
        Ok(ProbeOptions {
            timeout: secs(args.timeout)?,
            linger: secs(linger)?,
        })
    };

    match args.mode {
        Mode::Http { ref url, method, ref data } => {
            let body: Value =
                serde_json::from_str(data).map_err(|e| format!("invalid JSON body: {e}"))?;
            let req = HttpProbeRequest::new(url, method, body).map_err(|e| e.to_string())?;
            let outcome = Probe::new(options(None)?).run_http(req).await;
            print_json(&outcome);
            Ok(exit_code(&outcome))
        }
        Mode::Ws {
            ref url,
            ref message,
            linger,
        } => {
            let req = WsProbeRequest::new(url, message.as_str())
                .map_err(|e: RequestError| e.to_string())?;
            let mut session = Probe::new(options(linger)?).open_ws(req);
            while let Some(event) = session.recv().await {
                print_json(&event);
            }
            let outcome = session.outcome().await;
            print_json(&outcome);
            Ok(exit_code(&outcome))
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("wust_probe=info".parse().expect("valid directive")),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .init();

    match run(Args::parse()).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::from(2)
        }
    }
}
