use clap::Parser;
use hitl_cli::{commands, display, Cli};
use hitl_common::init_tracing_with_level;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(err) = run(cli).await {
        let (message, code) = display::describe_error(&err);
        eprintln!("{}", message);
        std::process::exit(code);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = commands::load_config(&cli)?;
    if let Err(e) = init_tracing_with_level(&config.logging.level) {
        eprintln!("failed to initialize logging: {}", e);
    }

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    commands::run(cli, config, &mut out).await
}
