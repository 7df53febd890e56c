use std::io;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use clap::Subcommand;
use dynacheck::Registry;
use dynacheck_runner::config::Config;
use dynacheck_runner::error::RunnerError;
use dynacheck_runner::tokio_tools::{cancel_on_ctrl_c, run_in_tokio};
use dynacheck_runner::{run_once, validate, write_results};
use env_logger::Env;
use log::{error, info};

use dynacheck_runner::NAME;
use dynacheck_runner::VERSION;

#[derive(Subcommand)]
enum Commands {
    /// Validate the configuration and every check definition
    Validate {},
    /// Run every check once and print the results
    Run {
        /// Print the results as a JSON array
        #[arg(short, long)]
        json: bool,
    },
    /// List the check types known to this build
    Types {},
}

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Sets a custom config file
    #[arg(short, long, value_name = "FILE", default_value = "dynacheck.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Commands>,
}

pub fn main() -> ExitCode {
    let log_level = Env::default().default_filter_or("info");
    env_logger::Builder::from_env(log_level).init();

    let cli = Cli::parse();

    info!("Starting {}:{}", NAME, VERSION);
    info!("Value for config: {:?}", cli.config);

    let config: Config = match Config::figment(&cli.config).extract() {
        Ok(config) => config,
        Err(err) => {
            error!("Loading configuration failed : {}", err);
            return ExitCode::FAILURE;
        }
    };

    match cli.command {
        Some(Commands::Validate {}) => {
            let admission = validate(&config);
            for err in &admission.rejected {
                println!("{}", err);
            }
            println!(
                "{} checks valid, {} rejected",
                admission.checks.len(),
                admission.rejected.len()
            );
            if admission.rejected.is_empty() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        }
        Some(Commands::Run { json }) => {
            let outcome = run_in_tokio(async {
                let cancel = cancel_on_ctrl_c();
                let results = run_once(&config, &cancel).await?;
                write_results(io::stdout().lock(), &results, json)?;
                Ok::<_, RunnerError>(results.iter().all(|result| result.passed()))
            });
            match outcome {
                Ok(true) => ExitCode::SUCCESS,
                Ok(false) => ExitCode::FAILURE,
                Err(err) => {
                    error!("{}", err);
                    ExitCode::FAILURE
                }
            }
        }
        Some(Commands::Types {}) => {
            for check_type in Registry::builtin().types() {
                println!("{}", check_type);
            }
            ExitCode::SUCCESS
        }
        None => {
            println!("No command specified");
            ExitCode::FAILURE
        }
    }
}
