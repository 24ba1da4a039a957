use std::{
    io::Write,
    net::{IpAddr, SocketAddr},
    time::Duration,
};

use net::{
    BlockLayout, CoordinatorDirectory, DataPlaneEngine, EngineConfig, IdentityOrder,
    LoopbackDirectory, NetError, OrderStrategy, RandomOrder, RendezvousDirectory, RendezvousQuery,
    RunSummary, TopologyMask,
};

use crate::{
    config::{BenchConfig, RendezvousMode},
    error::ConfigurationError,
    logging::BenchLogger,
};

pub const USAGE: &str = "meshbench-worker <coordinator_ip> <coordinator_port> <worker_count> \
                         <own_id> <duration_seconds> <block_dim> [x<id>|<id>]...";

/// Everything one worker is told on its command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerArgs {
    pub coordinator: SocketAddr,
    pub worker_count: u32,
    pub own_id: u32,
    pub duration: Duration,
    pub block_dim: u32,
    pub mask: TopologyMask,
}

impl WorkerArgs {
    /// Parses the positional arguments, program name excluded.
    pub fn parse<I, S>(args: I) -> Result<Self, ConfigurationError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let args: Vec<S> = args.into_iter().collect();
        if args.len() < 6 {
            return Err(ConfigurationError::Usage(USAGE));
        }
        let arg = |index: usize| args[index].as_ref();

        let ip: IpAddr = parse_field("coordinator ip", arg(0))?;
        let port: u16 = parse_field("coordinator port", arg(1))?;
        let worker_count: u32 = parse_field("worker count", arg(2))?;
        let own_id: u32 = parse_field("worker id", arg(3))?;
        let duration_secs: u64 = parse_field("duration", arg(4))?;
        let block_dim: u32 = parse_field("block dim", arg(5))?;

        BlockLayout::new(worker_count, block_dim)?;
        if own_id >= worker_count {
            return Err(net::TopologyError::OutOfRange {
                id: own_id,
                worker_count,
            }
            .into());
        }
        let mask = TopologyMask::from_tokens(worker_count, &args[6..])?;

        Ok(Self {
            coordinator: SocketAddr::new(ip, port),
            worker_count,
            own_id,
            duration: Duration::from_secs(duration_secs),
            block_dim,
            mask,
        })
    }

    pub fn to_argv(&self) -> Vec<String> {
        let mut argv = vec![
            self.coordinator.ip().to_string(),
            self.coordinator.port().to_string(),
            self.worker_count.to_string(),
            self.own_id.to_string(),
            self.duration.as_secs().to_string(),
            self.block_dim.to_string(),
        ];
        argv.extend(self.mask.tokens());
        argv
    }

    pub fn query(&self) -> RendezvousQuery {
        RendezvousQuery {
            own_id: self.own_id,
            worker_count: self.worker_count,
            block_dim: self.block_dim,
        }
    }
}

pub(crate) fn parse_field<T: std::str::FromStr>(
    name: &'static str,
    value: &str,
) -> Result<T, ConfigurationError> {
    value
        .parse()
        .map_err(|_| ConfigurationError::invalid(name, value))
}

/// Rejects settings whose port bases cannot address every worker.
pub fn check_ports(config: &BenchConfig, worker_count: u32) -> Result<(), ConfigurationError> {
    let ports = config.data_plane.ports();
    if ports.covers(worker_count) {
        Ok(())
    } else {
        Err(ConfigurationError::PortRange {
            send_base: ports.send_base,
            recv_base: ports.recv_base,
            worker_count,
        })
    }
}

pub fn directory_for(config: &BenchConfig, coordinator: SocketAddr) -> Box<dyn RendezvousDirectory> {
    match config.rendezvous.mode {
        RendezvousMode::Coordinator => {
            let directory = CoordinatorDirectory::new(coordinator);
            Box::new(match config.rendezvous.timeout_secs {
                Some(secs) => directory.with_timeout(Duration::from_secs(secs)),
                None => directory,
            })
        }
        RendezvousMode::Loopback => Box::new(LoopbackDirectory::default()),
    }
}

/// Resolves peers, then runs the data plane for the requested duration,
/// writing progress records to `sink`.
pub async fn run_worker<W: Write>(
    args: &WorkerArgs,
    config: &BenchConfig,
    directory: &dyn RendezvousDirectory,
    sink: W,
) -> Result<RunSummary, NetError> {
    let peers = directory.resolve(args.query()).await?;
    let coordinator =
        (config.rendezvous.mode == RendezvousMode::Coordinator).then_some(&args.coordinator);
    BenchLogger::rendezvous_resolved(args.own_id, peers.len(), coordinator);

    let data_plane = &config.data_plane;
    let engine_config = EngineConfig {
        own_id: args.own_id,
        duration: args.duration,
        log_interval: data_plane.log_interval(),
        payload_bytes: data_plane.payload_bytes,
        scratch_bytes: data_plane.scratch_bytes,
        ports: data_plane.ports(),
    };
    let order: Box<dyn OrderStrategy> = if data_plane.shuffle_peers {
        Box::new(RandomOrder::from_entropy())
    } else {
        Box::new(IdentityOrder)
    };

    DataPlaneEngine::new(engine_config, peers, args.mask.clone(), sink)
        .run(&*order)
        .await
}
