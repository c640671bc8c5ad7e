mod artifact;
mod chaos;
mod cli;
mod exit_codes;
mod logging;
mod output;
mod plan;
mod run;
mod run_error;

use clap::Parser;
use mimalloc::MiMalloc;
use tokio_util::sync::CancellationToken;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

const DEFAULT_LOG_DIRECTIVE: &str = "warn";

#[tokio::main]
async fn main() {
    let cli = match cli::Cli::try_parse() {
        Ok(v) => v,
        Err(err) => {
            use clap::error::ErrorKind;
            let _ = err.print();
            let code = match err.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => {
                    exit_codes::ExitCode::Success.as_i32()
                }
                _ => exit_codes::ExitCode::InvalidInput.as_i32(),
            };
            std::process::exit(code);
        }
    };

    let args = match &cli.command {
        cli::Command::Run(args) | cli::Command::Chaos(args) => args,
    };
    if let Err(err) = logging::init(args.log_level.as_deref(), DEFAULT_LOG_DIRECTIVE) {
        eprintln!("{err:#}");
        std::process::exit(exit_codes::ExitCode::InvalidInput.as_i32());
    }

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received; stopping scenarios");
            on_signal.cancel();
        }
    });

    let result = match cli.command {
        cli::Command::Run(args) => run::run(args, cancel).await,
        cli::Command::Chaos(args) => chaos::chaos(args, cancel).await,
    };

    let code = match result {
        Ok(code) => code.as_i32(),
        Err(err) => {
            eprintln!("{err}");
            err.exit_code().as_i32()
        }
    };

    std::process::exit(code);
}
