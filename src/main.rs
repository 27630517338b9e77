//! layercake
//!
//! Generates a single merged configuration from a hierarchy of layered
//! YAML directories, with placeholder interpolation against the document
//! itself, secret backends and Terraform remote state.

use anyhow::Result;
use clap::Parser;
use layercake::cli::Cli;
use layercake::processor::ConfigProcessor;
use layercake::remote_state::AwsCliStateStore;
use layercake::secrets::SecretResolverRegistry;
use layercake::secrets::ssm::AwsCliSsm;
use std::fs::OpenOptions;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging based on --log option
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    match cli.log.as_str() {
        "0" | "off" => {
            // No logging
        }
        "1" | "stdout" => {
            let subscriber = FmtSubscriber::builder()
                .with_max_level(level)
                .with_writer(std::io::stdout)
                .finish();
            tracing::subscriber::set_global_default(subscriber)?;
        }
        "2" | "stderr" => {
            let subscriber = FmtSubscriber::builder()
                .with_max_level(level)
                .with_writer(std::io::stderr)
                .finish();
            tracing::subscriber::set_global_default(subscriber)?;
        }
        filename => {
            // Log to file (append mode)
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(filename)?;
            let subscriber = FmtSubscriber::builder()
                .with_max_level(level)
                .with_writer(file)
                .with_ansi(false)
                .finish();
            tracing::subscriber::set_global_default(subscriber)?;
        }
    }

    let options = cli.process_options()?;
    let registry = SecretResolverRegistry::default_chain(
        Box::new(AwsCliSsm),
        cli.default_aws_profile.clone(),
    );
    let state_store = AwsCliStateStore;

    ConfigProcessor::new(&registry, &state_store).process(&options)?;
    Ok(())
}
