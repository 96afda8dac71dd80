pub mod binary;
pub mod cli;
pub mod config;
pub mod derive;
pub mod error;
pub mod json;
pub mod load;
pub mod random;
pub mod shape;
pub mod value;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let command_line_interface = cli::CommandLineInterface::load();
    command_line_interface.run()
}
