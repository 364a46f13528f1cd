use prowl_core::adapter::AdapterRegistry;
use prowl_core::config::ProwlConfig;
use prowl_core::runner::location;
use prowl_core::testcase::TestCase;

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_CONFIG_PATH: &str = "prowl.toml";

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file. Defaults to ./prowl.toml when present.
    #[clap(short, long, value_parser, global = true)]
    config_file: Option<PathBuf>,
    /// Log debug output. `RUST_LOG` takes precedence.
    #[clap(short, long, global = true)]
    verbose: bool,
    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the URL a target is pointed at for a landing page.
    Location {
        path: String,
        #[clap(short, long)]
        port: u16,
        #[clap(long)]
        close_after: Option<u32>,
        #[clap(long)]
        forced_close: Option<bool>,
        #[clap(long)]
        timeout_secs: Option<u64>,
    },
    /// Load the adapters below a directory and list them.
    Adapters {
        dir: Option<PathBuf>,
        #[clap(long)]
        strict: bool,
    },
    /// Generate one test case with an adapter and write it out.
    Generate {
        dir: Option<PathBuf>,
        #[clap(short, long)]
        adapter: String,
        #[clap(short, long)]
        output: PathBuf,
        #[clap(short, long)]
        input: Option<PathBuf>,
    },
    /// Validate a configuration file.
    CheckConfig { file: PathBuf },
}

fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(config_file: Option<&Path>) -> Result<ProwlConfig, anyhow::Error> {
    match config_file {
        Some(path) => {
            info!(path = ?path, "Loading configuration");
            ProwlConfig::load_from_file(path)
        }
        None => {
            let default_path = Path::new(DEFAULT_CONFIG_PATH);
            if default_path.exists() {
                info!(path = ?default_path, "Loading default configuration");
                ProwlConfig::load_from_file(default_path)
            } else {
                debug!("No configuration file found, using built-in defaults");
                Ok(ProwlConfig::default())
            }
        }
    }
}

fn adapters_dir(dir: Option<PathBuf>, config: &ProwlConfig) -> Result<PathBuf, anyhow::Error> {
    dir.or_else(|| config.adapters.path.clone())
        .context("No adapters directory given and none configured under [adapters]")
}

fn load_registry(dir: &Path, strict: bool) -> Result<AdapterRegistry, anyhow::Error> {
    let mut registry = AdapterRegistry::new();
    let report = registry
        .load(dir, strict)
        .with_context(|| format!("Failed to load adapters from {dir:?}"))?;
    for failure in &report.failures {
        warn!(path = ?failure.path, reason = %failure.reason, "Skipped adapter");
    }
    Ok(registry)
}

fn main() -> Result<(), anyhow::Error> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Command::CheckConfig { file } => {
            let config = ProwlConfig::load_from_file(&file)?;
            println!("{file:?} is valid");
            println!("Effective configuration: {config:#?}");
        }
        Command::Location {
            path,
            port,
            close_after,
            forced_close,
            timeout_secs,
        } => {
            let config = load_config(cli.config_file.as_deref())?;
            let mut options = config.location.options();
            if close_after.is_some() {
                options.close_after = close_after;
            }
            if forced_close.is_some() {
                options.forced_close = forced_close;
            }
            if let Some(secs) = timeout_secs {
                options.timeout = Some(Duration::from_secs(secs));
            }
            println!("{}", location(&path, port, &options));
        }
        Command::Adapters { dir, strict } => {
            let config = load_config(cli.config_file.as_deref())?;
            let dir = adapters_dir(dir, &config)?;
            let registry = load_registry(&dir, strict || config.adapters.strict)?;
            if registry.is_empty() {
                println!("No adapters found in {dir:?}");
            }
            for name in registry.names() {
                if let Some(manifest) = registry.get(name) {
                    println!("{name}\t{}\t{:?}", manifest.landing_page, manifest.root);
                }
            }
        }
        Command::Generate {
            dir,
            adapter,
            output,
            input,
        } => {
            let config = load_config(cli.config_file.as_deref())?;
            let dir = adapters_dir(dir, &config)?;
            let registry = load_registry(&dir, config.adapters.strict)?;
            let manifest = registry
                .get(&adapter)
                .with_context(|| format!("Unknown adapter {adapter:?}"))?;
            let landing_page = manifest.landing_page.clone();
            let mut instance = registry
                .create(&adapter)
                .with_context(|| format!("Unknown adapter {adapter:?}"))?;

            instance.setup(input.as_deref())?;
            let mut testcase = TestCase::new(landing_page, instance.name());
            instance.generate(&mut testcase)?;
            std::fs::create_dir_all(&output)
                .with_context(|| format!("Failed to create output directory {output:?}"))?;
            testcase
                .dump(&output)
                .with_context(|| format!("Failed to write test case to {output:?}"))?;
            info!(
                adapter = %adapter,
                files = testcase.len(),
                output = ?output,
                "Generated test case"
            );
            println!("{}", output.join(testcase.landing_page()).display());
        }
    }

    Ok(())
}
