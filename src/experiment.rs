use std::{
    io::{self, Write},
    net::{IpAddr, SocketAddr},
    time::{Duration, Instant},
};

use futures::{stream::FuturesUnordered, StreamExt};
use net::{OrderStrategy, RunSummary, Topology, TopologyMask};

use crate::{
    error::ConfigurationError,
    invoke::{InvocationRequest, InvocationResult, InvokeError, Invoker},
    logging::BenchLogger,
    telemetry::{get_meter, InvocationMetrics, TransferMetrics},
    worker::{parse_field, WorkerArgs},
};

pub const USAGE: &str =
    "meshbench <coordinator_ip> <coordinator_port> <worker_count> <duration_seconds> <topology>";

/// Header of the orchestrator's stdout; worker records follow unchanged.
pub const CSV_HEADER: &str = "worker,peer,time,bytes_sent,bytes_received";

#[derive(Debug, thiserror::Error)]
pub enum ExperimentError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    #[error("worker {worker} exited with status {return_code}")]
    WorkerFailed { worker: u32, return_code: i32 },
    #[error("worker {worker} invocation failed: {source}")]
    Invocation {
        worker: u32,
        #[source]
        source: InvokeError,
    },
    #[error("could not relay worker output: {0}")]
    Output(#[from] io::Error),
}

/// One benchmark run as requested on the orchestrator command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Experiment {
    pub coordinator: SocketAddr,
    pub worker_count: u32,
    pub duration: Duration,
    pub topology: Topology,
    pub block_dim: u32,
}

impl Experiment {
    pub fn new(
        coordinator: SocketAddr,
        worker_count: u32,
        duration: Duration,
        topology: Topology,
    ) -> Result<Self, ConfigurationError> {
        let block_dim = topology.block_dim(worker_count)?;
        Ok(Self {
            coordinator,
            worker_count,
            duration,
            topology,
            block_dim,
        })
    }

    /// Parses the positional arguments, program name excluded.
    pub fn from_args<I, S>(args: I) -> Result<Self, ConfigurationError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let args: Vec<S> = args.into_iter().collect();
        let [ip, port, worker_count, duration, topology] = args.as_slice() else {
            return Err(ConfigurationError::Usage(USAGE));
        };

        let ip: IpAddr = parse_field("coordinator ip", ip.as_ref())?;
        let port: u16 = parse_field("coordinator port", port.as_ref())?;
        let worker_count: u32 = parse_field("worker count", worker_count.as_ref())?;
        let duration: u64 = parse_field("duration", duration.as_ref())?;
        let topology: Topology = topology.as_ref().parse()?;

        Self::new(
            SocketAddr::new(ip, port),
            worker_count,
            Duration::from_secs(duration),
            topology,
        )
    }

    /// Arguments for worker `id`. Activation is dense; membership per block is
    /// left to each worker's rendezvous.
    pub fn worker_args(&self, id: u32) -> WorkerArgs {
        WorkerArgs {
            coordinator: self.coordinator,
            worker_count: self.worker_count,
            own_id: id,
            duration: self.duration,
            block_dim: self.block_dim,
            mask: TopologyMask::dense(self.worker_count),
        }
    }
}

/// Outcome of a run in which every worker returned 0.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExperimentReport {
    pub completed: u32,
    pub elapsed: Duration,
    /// Worker ids in the order their invocations were started.
    pub launch_order: Vec<u32>,
    pub bytes_sent: u64,
    pub bytes_received: u64,
}

/// Invokes every worker of an experiment and relays their output.
pub struct ExperimentOrchestrator<'a> {
    invoker: &'a dyn Invoker,
    order: &'a dyn OrderStrategy,
    max_in_flight: usize,
    invocations: InvocationMetrics,
    transfers: TransferMetrics,
}

impl<'a> ExperimentOrchestrator<'a> {
    pub fn new(invoker: &'a dyn Invoker, order: &'a dyn OrderStrategy) -> Self {
        let meter = get_meter();
        Self {
            invoker,
            order,
            max_in_flight: 0,
            invocations: InvocationMetrics::new(&meter),
            transfers: TransferMetrics::new(&meter),
        }
    }

    /// Caps simultaneous invocations; 0 starts every worker at once.
    #[must_use]
    pub fn with_max_in_flight(mut self, max_in_flight: usize) -> Self {
        self.max_in_flight = max_in_flight;
        self
    }

    /// Runs the experiment to completion or to its first failure.
    ///
    /// Worker stdout is concatenated onto `stdout` under [`CSV_HEADER`]; each
    /// worker's stderr goes to `stderr` after a banner. The first non-zero
    /// return or failed invocation ends the run: invocations still in flight
    /// are dropped and workers not yet started never are.
    pub async fn run<O: Write, E: Write>(
        &self,
        experiment: &Experiment,
        stdout: &mut O,
        stderr: &mut E,
    ) -> Result<ExperimentReport, ExperimentError> {
        let started = Instant::now();
        let worker_count = experiment.worker_count;
        BenchLogger::experiment_started(worker_count, &experiment.topology, experiment.block_dim);

        writeln!(stdout, "{CSV_HEADER}")?;
        stdout.flush()?;

        let launch_order: Vec<u32> = self
            .order
            .arrange(worker_count as usize)
            .into_iter()
            .map(|index| index as u32)
            .collect();
        let limit = match self.max_in_flight {
            0 => launch_order.len(),
            cap => cap,
        };

        let mut queue = launch_order.iter().copied();
        let mut in_flight = FuturesUnordered::new();
        let mut report = ExperimentReport {
            completed: 0,
            elapsed: Duration::ZERO,
            launch_order: Vec::with_capacity(launch_order.len()),
            bytes_sent: 0,
            bytes_received: 0,
        };

        loop {
            while in_flight.len() < limit {
                let Some(worker) = queue.next() else {
                    break;
                };
                report.launch_order.push(worker);
                in_flight.push(self.launch(experiment, worker));
                BenchLogger::invocation_started(worker, in_flight.len());
            }

            let Some((worker, elapsed, outcome)) = in_flight.next().await else {
                break;
            };
            self.invocations.record_duration(elapsed);

            let result = match outcome {
                Ok(result) => result,
                Err(source) => {
                    self.invocations.record_failure("invocation");
                    let err = ExperimentError::Invocation { worker, source };
                    BenchLogger::experiment_aborted(report.completed, worker_count, &err);
                    return Err(err);
                }
            };

            self.relay(worker, &result, stdout, stderr)?;
            BenchLogger::invocation_finished(worker, result.return_code, elapsed);
            if !result.succeeded() {
                self.invocations.record_failure("status");
                let err = ExperimentError::WorkerFailed {
                    worker,
                    return_code: result.return_code,
                };
                BenchLogger::experiment_aborted(report.completed, worker_count, &err);
                return Err(err);
            }

            match summary_of(&result) {
                Some(summary) => {
                    report.bytes_sent += summary.bytes_sent;
                    report.bytes_received += summary.bytes_received;
                    self.transfers.record_summary(worker, &summary);
                }
                None => BenchLogger::unparsed_summary(worker),
            }
            report.completed += 1;
        }

        report.elapsed = started.elapsed();
        BenchLogger::experiment_finished(report.completed, report.elapsed);
        Ok(report)
    }

    async fn launch(
        &self,
        experiment: &Experiment,
        worker: u32,
    ) -> (u32, Duration, Result<InvocationResult, InvokeError>) {
        self.invocations.record_invocation();
        let request = InvocationRequest {
            args: experiment.worker_args(worker).to_argv(),
        };
        let started = Instant::now();
        let outcome = self.invoker.invoke(request).await;
        if let Err(err) = &outcome {
            BenchLogger::invocation_failed(worker, err);
        }
        (worker, started.elapsed(), outcome)
    }

    fn relay<O: Write, E: Write>(
        &self,
        worker: u32,
        result: &InvocationResult,
        stdout: &mut O,
        stderr: &mut E,
    ) -> io::Result<()> {
        stdout.write_all(result.stdout.as_bytes())?;
        stdout.flush()?;
        writeln!(stderr, "=== worker {worker} (rc={}) ===", result.return_code)?;
        stderr.write_all(result.stderr.as_bytes())?;
        stderr.flush()
    }
}

/// The worker's `time=.. total_bytes_sent=.. total_bytes_recv=..` line.
fn summary_of(result: &InvocationResult) -> Option<RunSummary> {
    result.stderr.lines().rev().find_map(RunSummary::parse)
}
