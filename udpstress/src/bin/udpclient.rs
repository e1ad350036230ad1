use std::{process::ExitCode, sync::Arc, time::Duration};

use clap::{builder::RangedU64ValueParser, Parser};
use tracing::{error, warn};
use udpstress::{
    constants::{DESCRIPTOR_MARGIN, MAX_PAYLOAD},
    drop_privileges, init_tracing, raise_nofile_limit, resolve_target, spawn_reporter,
    ClientOptions, ClientSocket, Error, Family, IcmpSocket, Reporter, Udp,
};

/// Opens many concurrent UDP flows against a server, resending requests until a
/// response arrives or the flow's wait budget runs out.
#[derive(Debug, Parser)]
#[command(name = "udpclient")]
struct Args {
    /// IPv4 only.
    #[arg(short = '4', conflicts_with = "ipv6")]
    ipv4: bool,
    /// IPv6 only.
    #[arg(short = '6')]
    ipv6: bool,
    /// Number of simultaneously open flows.
    #[arg(
        short = 'n',
        long,
        default_value_t = 1000,
        value_parser = RangedU64ValueParser::<usize>::new().range(1..=10000)
    )]
    flows: usize,
    /// Oneshot, do not reopen closed flows.
    #[arg(short, long)]
    oneshot: bool,
    /// Maximum resend timeout for a request, in seconds.
    #[arg(short, long, default_value_t = 10, value_parser = clap::value_parser!(u64).range(1..=60))]
    resend: u64,
    /// Maximum wait timeout for the response, in seconds.
    #[arg(short, long, default_value_t = 30, value_parser = clap::value_parser!(u64).range(1..=60))]
    wait: u64,
    /// Send from unconnected sockets.
    #[arg(short, long)]
    unconnected: bool,
    /// Percentage of requests replaced by a fabricated ICMP error. Needs root.
    #[arg(short, long, default_value_t = 0, value_parser = clap::value_parser!(u8).range(0..=100))]
    icmp: u8,
    /// Percentage of responses answered with another request.
    #[arg(short = 'a', long, default_value_t = 0, value_parser = clap::value_parser!(u8).range(0..=100))]
    again: u8,
    /// Use random payloads of up to this many bytes.
    #[arg(
        short,
        long,
        value_parser = RangedU64ValueParser::<usize>::new().range(0..=MAX_PAYLOAD as u64)
    )]
    payload: Option<usize>,
    /// Print statistics every second.
    #[arg(short, long)]
    statistics: bool,
    /// Verbose logging.
    #[arg(short, long)]
    verbose: bool,
    host: String,
    port: u16,
}

impl Args {
    fn family(&self) -> Family {
        match (self.ipv4, self.ipv6) {
            (true, _) => Family::V4,
            (_, true) => Family::V6,
            _ => Family::Any,
        }
    }

    fn options(&self) -> ClientOptions {
        ClientOptions::default()
            .flows(self.flows)
            .resend_bound(Duration::from_secs(self.resend))
            .wait_bound(Duration::from_secs(self.wait))
            .oneshot(self.oneshot)
            .connected(!self.unconnected)
            .icmp_percentage(self.icmp)
            .request_again_percentage(self.again)
            .payload_bound(self.payload)
    }
}

async fn run(args: Args) -> Result<(), Error> {
    raise_nofile_limit(args.flows as u64 + DESCRIPTOR_MARGIN)?;

    let target = resolve_target(&args.host, args.port, args.family()).await?;

    let mut socket = ClientSocket::with_options(Udp, args.options());
    if args.icmp > 0 {
        if args.unconnected {
            warn!("icmp injection needs connected flows, only counting icmp");
        }
        socket = socket.with_icmp(IcmpSocket::open()?);
    }

    drop_privileges()?;

    let mut reporter = Reporter::new(Arc::clone(socket.stats()), args.icmp > 0);
    let report_task = spawn_reporter(reporter.clone(), args.statistics);

    socket.run(target).await?;

    report_task.abort();
    if args.statistics {
        reporter.report_final()?;
    }

    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_tracing(args.verbose);

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}
