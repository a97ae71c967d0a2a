use tracing_subscriber::EnvFilter;
use upqd::daemon::{DaemonConfig, DaemonRuntime};

#[derive(Debug, Clone, PartialEq, Eq)]
enum CliMode {
    Interactive,
    Headless,
    Flush,
    Fetch(String),
    Help,
}

fn parse_cli_mode<I>(args: I) -> anyhow::Result<CliMode>
where
    I: IntoIterator<Item = String>,
{
    let mut mode = CliMode::Interactive;
    let mut args = args.into_iter().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--headless" => mode = CliMode::Headless,
            "--flush" => mode = CliMode::Flush,
            "--fetch" => {
                let Some(path) = args.next() else {
                    anyhow::bail!("--fetch requires a resource path");
                };
                mode = CliMode::Fetch(path);
            }
            "--help" | "-h" => mode = CliMode::Help,
            other => anyhow::bail!("unknown argument: {other}"),
        }
    }
    Ok(mode)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let mode = parse_cli_mode(std::env::args())?;
    if mode == CliMode::Help {
        println!("Usage: upqd [--headless | --flush | --fetch PATH]");
        println!("  (default)      Run the background sync host with an interactive session");
        println!("  --headless     Run the background sync host only, printing events as JSON");
        println!("  --flush        Send every queued file once and exit");
        println!("  --fetch PATH   Print one app-shell resource, served from cache when possible");
        return Ok(());
    }

    let config = DaemonConfig::from_env()?;
    // Logs go to stderr so they never mix with the session screen on stdout.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let daemon = DaemonRuntime::bootstrap(config).await?;
    match mode {
        CliMode::Interactive => daemon.run_interactive().await,
        CliMode::Headless => daemon.run_headless().await,
        CliMode::Flush => {
            let report = daemon.flush_once().await?;
            println!(
                "attempted={} sent={} rejected={} transport_failures={} aborted={}",
                report.attempted,
                report.sent,
                report.rejected,
                report.transport_failures,
                report.aborted
            );
            Ok(())
        }
        CliMode::Fetch(path) => {
            use std::io::Write as _;
            let body = daemon.fetch(&path).await?;
            std::io::stdout().write_all(&body)?;
            Ok(())
        }
        CliMode::Help => Ok(()),
    }
}
