use std::{process::ExitCode, sync::Arc, time::Duration};

use clap::{builder::RangedU64ValueParser, Parser};
use tracing::error;
use udpstress::{
    constants::{DESCRIPTOR_MARGIN, MAX_PAYLOAD},
    drop_privileges, init_tracing, raise_nofile_limit, resolve_bind, spawn_reporter, Error,
    Family, IcmpSocket, Reporter, ServerOptions, ServerSocket, Udp,
};

/// Answers UDP requests after a random delay, from the listening socket or from a
/// connected socket per request.
#[derive(Debug, Parser)]
#[command(name = "udpserver")]
struct Args {
    /// IPv4 only.
    #[arg(short = '4', conflicts_with = "ipv6")]
    ipv4: bool,
    /// IPv6 only.
    #[arg(short = '6')]
    ipv6: bool,
    /// Bind address, all local addresses if omitted.
    #[arg(short, long)]
    bind: Option<String>,
    /// Maximum number of pending replies and bound addresses.
    #[arg(
        short = 'n',
        long,
        default_value_t = 1000,
        value_parser = RangedU64ValueParser::<usize>::new().range(1..=10000)
    )]
    flows: usize,
    /// Oneshot, stop after the last pending reply.
    #[arg(short, long)]
    oneshot: bool,
    /// Maximum reply delay, in seconds.
    #[arg(short, long, default_value_t = 10, value_parser = clap::value_parser!(u64).range(1..=60))]
    reply: u64,
    /// Reply from a connected socket per request.
    #[arg(short, long)]
    connected: bool,
    /// Percentage of replies replaced by a fabricated ICMP error. Needs root.
    #[arg(short, long, default_value_t = 0, value_parser = clap::value_parser!(u8).range(0..=100))]
    icmp: u8,
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

    fn options(&self) -> ServerOptions {
        ServerOptions::default()
            .max_flows(self.flows)
            .delay_bound(Duration::from_secs(self.reply))
            .oneshot(self.oneshot)
            .connected(self.connected)
            .icmp_percentage(self.icmp)
            .payload_bound(self.payload)
    }
}

async fn run(args: Args) -> Result<(), Error> {
    raise_nofile_limit(args.flows as u64 + DESCRIPTOR_MARGIN)?;

    let addrs = resolve_bind(args.bind.as_deref(), args.port, args.family(), args.flows).await?;

    let mut server = ServerSocket::with_options(Udp, args.options());
    if args.icmp > 0 {
        server = server.with_icmp(IcmpSocket::open()?);
    }
    server.bind(&addrs)?;

    drop_privileges()?;

    let mut reporter = Reporter::new(Arc::clone(server.stats()), args.icmp > 0);
    let report_task = spawn_reporter(reporter.clone(), args.statistics);

    server.run().await?;

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
