//! cluster-manager - edge cluster manager operator

use clap::Parser;

use ecm_operator::cli::Cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    if let Err(e) = ecm_operator::run(cli).await {
        tracing::error!(error = %e, exit_code = e.exit_code(), "startup failed");
        eprintln!("cluster-manager: {e}");
        std::process::exit(e.exit_code());
    }
    Ok(())
}
