use std::net::SocketAddr;

use anyhow::Context as _;
use strain_testserver::{AppState, MockConfig};
use tokio::net::TcpListener;

const USAGE: &str = "strain-testserver: mock service for strain runs

USAGE:
  strain-testserver [--bind ADDR] [--failure-rate R] [--delay-ms MS] [--no-fallback]

Serves /api/cpu, /api/db/search, /api/external and POST /admin/mock/configure.
Prints HTTP_URL=<url> to stdout once ready.";

struct Options {
    bind: SocketAddr,
    config: MockConfig,
    fallback: bool,
}

fn value_of(flag: &str, args: &mut impl Iterator<Item = String>) -> anyhow::Result<String> {
    args.next()
        .with_context(|| format!("{flag} requires a value"))
}

fn parse_options() -> anyhow::Result<Option<Options>> {
    let mut opts = Options {
        bind: SocketAddr::from(([127, 0, 0, 1], 0)),
        config: MockConfig::default(),
        fallback: true,
    };

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--bind" => {
                let v = value_of("--bind", &mut args)?;
                opts.bind = v.parse().with_context(|| format!("invalid --bind `{v}`"))?;
            }
            "--failure-rate" => {
                let v = value_of("--failure-rate", &mut args)?;
                let rate: f64 = v
                    .parse()
                    .with_context(|| format!("invalid --failure-rate `{v}`"))?;
                anyhow::ensure!((0.0..=1.0).contains(&rate), "--failure-rate must be in [0, 1]");
                opts.config.failure_rate = rate;
            }
            "--delay-ms" => {
                let v = value_of("--delay-ms", &mut args)?;
                opts.config.delay_ms = v
                    .parse()
                    .with_context(|| format!("invalid --delay-ms `{v}`"))?;
            }
            "--no-fallback" => opts.fallback = false,
            "-h" | "--help" => {
                eprintln!("{USAGE}");
                return Ok(None);
            }
            other => anyhow::bail!("unknown argument: {other}\n\n{USAGE}"),
        }
    }

    Ok(Some(opts))
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let Some(opts) = parse_options()? else {
        return Ok(());
    };

    let listener = TcpListener::bind(opts.bind)
        .await
        .with_context(|| format!("failed to bind {}", opts.bind))?;
    let addr = listener.local_addr()?;

    let state = AppState::with_config(opts.config);
    state.control.set_fallback_enabled(opts.fallback);
    let stats = state.stats.clone();

    println!("HTTP_URL=http://{addr}");
    eprintln!(
        "failureRate={} delayMs={} fallback={}",
        opts.config.failure_rate, opts.config.delay_ms, opts.fallback
    );

    axum::serve(listener, strain_testserver::router(state))
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    eprintln!(
        "served {} requests ({} external, {} injected failures, {} configure calls)",
        stats.requests_total(),
        stats.external_requests(),
        stats.external_failures(),
        stats.configure_calls()
    );
    Ok(())
}
