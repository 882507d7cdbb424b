use atomupd::{
    built_info,
    client::{
        ImageSource, UpdateClient, UpdateOptions,
        desync::Desync,
        rauc::Rauc,
    },
    config::{ClientConfig, DEFAULT_CLIENT_CONFIG},
};
use atomupd_image::BuildId;
use clap::Parser;
use std::{path::PathBuf, process::ExitCode};
use tracing::{debug, error};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[clap(author, version, about = "OS update client", long_about = None)]
struct CommandLine {
    /// Configuration file
    #[clap(short, long, value_name = "FILE", default_value = DEFAULT_CLIENT_CONFIG)]
    config: PathBuf,

    /// Hide output
    #[clap(short, long)]
    quiet: bool,

    /// Show debug messages
    #[clap(short, long)]
    debug: bool,

    /// Only query if an update is available
    #[clap(long)]
    query_only: bool,

    /// Include the estimated download size of each candidate
    #[clap(long)]
    estimate_download_size: bool,

    /// Manifest of the running image, instead of the configured one
    #[clap(long, value_name = "FILE")]
    manifest_file: Option<PathBuf>,

    /// Describe the running image from os-release instead of a manifest
    #[clap(long)]
    mk_manifest_file: bool,

    /// Update from this file instead of querying the server
    #[clap(long, value_name = "FILE")]
    update_file: Option<PathBuf>,

    /// Install this bundle
    #[clap(long, value_name = "URL")]
    update_from_url: Option<String>,

    /// Only update to this build, failing if the server does not offer it
    #[clap(long, value_name = "BUILDID")]
    update_version: Option<BuildId>,

    /// Use this variant instead of the one of the running image
    #[clap(long)]
    variant: Option<String>,
}

pub fn main() -> ExitCode {
    // Parse command line options before we configure logging so we can set the
    // default level
    let command_line = CommandLine::parse();

    let default_filter = if command_line.debug {
        "debug"
    } else if command_line.quiet {
        "warn"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .init();

    debug!(
        version = built_info::PKG_VERSION,
        built = built_info::BUILT_TIME_UTC,
        "Starting update client",
    );

    match run(command_line) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            error!("{error:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(command_line: CommandLine) -> anyhow::Result<()> {
    debug!(path = ?command_line.config, "Parsing config");
    let config = ClientConfig::load(&command_line.config)?;

    let options = UpdateOptions {
        image_source: ImageSource::choose(
            command_line.mk_manifest_file,
            command_line.manifest_file,
            &config,
        ),
        variant: command_line.variant,
        update_file: command_line.update_file,
        update_from_url: command_line.update_from_url,
        update_version: command_line.update_version,
        query_only: command_line.query_only,
        estimate_download_size: command_line.estimate_download_size,
    };

    UpdateClient::new(config, Rauc::default(), Desync, command_line.quiet).run(&options)
}
