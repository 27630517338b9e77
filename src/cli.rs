//! CLI definitions for layercake.
//!
//! A single command: generate the config for one hierarchy path. Defined
//! with clap's derive macros.

use crate::processor::ProcessOptions;
use crate::tree::OutputFormat;
use clap::Parser;
use std::path::PathBuf;

/// Hierarchical config generator
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Hierarchy path of key=value segments, e.g. env=dev/cluster=c1
    pub path: String,

    /// Directory the hierarchy path is resolved against (default: cwd)
    #[arg(long)]
    pub cwd: Option<PathBuf>,

    /// Keep only this top-level key (repeatable)
    #[arg(long = "filter", value_name = "KEY")]
    pub filters: Vec<String>,

    /// Drop this top-level key (repeatable, applied after --filter)
    #[arg(long = "exclude", value_name = "KEY")]
    pub exclude_keys: Vec<String>,

    /// Wrap the generated tree under one enclosing key
    #[arg(long, value_name = "KEY")]
    pub enclosing_key: Option<String>,

    /// Output format: yaml or json
    #[arg(long, default_value = "yaml")]
    pub format: String,

    /// Write the rendered output to this file
    #[arg(long, value_name = "FILE")]
    pub output_file: Option<PathBuf>,

    /// Print the rendered output to stdout
    #[arg(long)]
    pub print_data: bool,

    /// Leave placeholders unresolved; implies --skip-interpolation-validation
    #[arg(long = "skip-interpolation-resolving")]
    pub skip_interpolations: bool,

    /// Do not fail when unresolved placeholders remain
    #[arg(long)]
    pub skip_interpolation_validation: bool,

    /// AWS profile used when a secret placeholder omits aws_profile(...)
    #[arg(long, value_name = "PROFILE")]
    pub default_aws_profile: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Logging output: 0/off, 1/stdout, 2/stderr (default), or filename
    #[arg(short, long, default_value = "2")]
    pub log: String,
}

impl Cli {
    /// Translate parsed flags into processor options.
    pub fn process_options(&self) -> crate::error::Result<ProcessOptions> {
        Ok(ProcessOptions {
            cwd: self.cwd.clone(),
            path: self.path.clone(),
            filters: self.filters.clone(),
            exclude_keys: self.exclude_keys.clone(),
            enclosing_key: self.enclosing_key.clone(),
            output_format: OutputFormat::parse(&self.format)?,
            print_data: self.print_data,
            output_file: self.output_file.clone(),
            skip_interpolations: self.skip_interpolations,
            skip_interpolation_validation: self.skip_interpolation_validation,
        })
    }
}
