use clap::Parser;
use tracing_subscriber::EnvFilter;
use wust_probe::{FixtureServer, RouteHandler};

#[derive(Parser)]
#[command(author, version, about)]
struct Args {
    /// Address to listen on
    #[arg(short, long, default_value = "127.0.0.1")]
    addr: String,

    /// Port to listen on
    #[arg(short, long, default_value_t = 8000)]
    port: u16,

    /// Prepended to every echoed WebSocket message
    #[arg(long, default_value = "")]
    echo_prefix: String,
}

#[tokio::main]
async fn main() -> std::io::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("wust_probe=info".parse().expect("valid directive")),
        )
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();

    FixtureServer::bind((args.addr.as_str(), args.port))
        .await?
        .with_handler(RouteHandler::new(args.echo_prefix))
        .run()
        .await;

    Ok(())
}
