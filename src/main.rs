use std::{io, process::ExitCode};

use anyhow::{anyhow, Context};
use log::info;
use meshbench::{
    config::BenchConfig,
    error::{exit_status, ConfigurationError},
    experiment::{Experiment, ExperimentOrchestrator},
    invoke,
    logging::BenchLogger,
    telemetry::init_meter,
    utils::positional_args,
    worker::check_ports,
};
use net::RandomOrder;

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    BenchLogger::init();

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("meshbench: {err:#}");
            ExitCode::from(exit_status(&err))
        }
    }
}

async fn run() -> anyhow::Result<()> {
    let experiment = Experiment::from_args(positional_args())?;

    let config_path = BenchConfig::default_path()?;
    let config = BenchConfig::load_or_default(&config_path).map_err(ConfigurationError::from)?;
    BenchLogger::settings_loaded(&config_path);
    check_ports(&config, experiment.worker_count)?;

    let meter_provider = init_meter("meshbench").unwrap_or_else(|err| {
        BenchLogger::telemetry_failed(&err);
        None
    });

    let invoker = invoke::from_config(&config.invoke).context("could not set up invocations")?;
    let order = RandomOrder::from_entropy();
    let orchestrator = ExperimentOrchestrator::new(&*invoker, &order)
        .with_max_in_flight(config.invoke.max_in_flight);

    let mut stdout = io::stdout();
    let mut stderr = io::stderr();
    let outcome = tokio::select! {
        outcome = orchestrator.run(&experiment, &mut stdout, &mut stderr) => outcome
            .map(|report| {
                info!(
                    "{} workers sent {} bytes, received {} bytes",
                    report.completed, report.bytes_sent, report.bytes_received
                );
            })
            .map_err(anyhow::Error::from),
        _ = tokio::signal::ctrl_c() => {
            BenchLogger::interrupted();
            Err(anyhow!("interrupted"))
        }
    };

    if let Some(provider) = meter_provider {
        let _ = provider.shutdown();
    }
    outcome
}
