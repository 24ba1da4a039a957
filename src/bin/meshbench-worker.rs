use std::{io, process::ExitCode};

use meshbench::{
    config::BenchConfig,
    error::{exit_status, ConfigurationError},
    logging::BenchLogger,
    telemetry::{get_meter, init_meter, TransferMetrics},
    utils::positional_args,
    worker::{check_ports, directory_for, run_worker, WorkerArgs},
};
use net::RunSummary;

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    BenchLogger::init();

    match run().await {
        Ok(summary) => {
            eprintln!("{summary}");
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("meshbench-worker: {err:#}");
            ExitCode::from(exit_status(&err))
        }
    }
}

async fn run() -> anyhow::Result<RunSummary> {
    let args = WorkerArgs::parse(positional_args())?;
    let config = BenchConfig::load_existing(&BenchConfig::default_path()?)
        .map_err(ConfigurationError::from)?;
    check_ports(&config, args.worker_count)?;

    let meter_provider = init_meter("meshbench-worker").unwrap_or_else(|err| {
        BenchLogger::telemetry_failed(&err);
        None
    });

    let directory = directory_for(&config, args.coordinator);
    let summary = run_worker(&args, &config, &*directory, io::stdout()).await?;
    TransferMetrics::new(&get_meter()).record_summary(args.own_id, &summary);

    if let Some(provider) = meter_provider {
        let _ = provider.shutdown();
    }
    Ok(summary)
}
