use clap::{error::ErrorKind, CommandFactory, Parser};
use console::style;
use tracing::error;

use cli::{run, Cli};
use common::{init_structured_logging, Interrupted, LoggingConfig, EX_INTERRUPTED, EX_SOFTWARE};

#[tokio::main]
async fn main() {
    // без аргументов показываем справку и завершаемся с ошибкой
    if std::env::args_os().len() <= 1 {
        eprintln!("{}", Cli::command().render_help());
        std::process::exit(EX_SOFTWARE);
    }

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => {
            e.exit()
        }
        Err(e) => {
            let _ = e.print();
            std::process::exit(EX_SOFTWARE);
        }
    };

    if let Err(e) = init_structured_logging(LoggingConfig::from_env(cli.verbose)) {
        eprintln!("Failed to initialize logging: {}", e);
    }

    if let Err(e) = run(cli).await {
        if Interrupted::is_in(&e) {
            error!("{:#}", e);
            std::process::exit(EX_INTERRUPTED);
        }
        error!("FATAL ERROR: {:#}", e);
        eprintln!("{} {:#}", style("FATAL ERROR:").red().bold(), e);
        std::process::exit(EX_SOFTWARE);
    }
}
