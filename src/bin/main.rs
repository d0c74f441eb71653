use clap::{Parser, ValueEnum};
use netbench::{
    transports, BenchmarkCoordinator, BenchmarkReport, BenchmarkSetup, ConnectPolicy, PhaseEvent,
    Transmission,
};
use std::time::Duration;

#[derive(Clone, Copy, ValueEnum)]
enum TransmissionArg {
    Reliable,
    Unreliable,
}

impl From<TransmissionArg> for Transmission {
    fn from(arg: TransmissionArg) -> Self {
        match arg {
            TransmissionArg::Reliable => Transmission::Reliable,
            TransmissionArg::Unreliable => Transmission::Unreliable,
        }
    }
}

#[derive(Parser)]
#[command(name = "netbench")]
#[command(about = "Echo throughput and latency benchmark for network transports", long_about = None)]
#[command(version)]
struct Cli {
    /// Transport to benchmark (tcp, udp, loopback)
    #[arg(long, default_value = "tcp")]
    transport: String,

    /// Number of concurrent clients
    #[arg(short, long, default_value = "100")]
    clients: usize,

    /// Benchmark duration in seconds
    #[arg(short = 't', long, default_value = "10")]
    duration: u64,

    /// Message size in bytes
    #[arg(short = 's', long, default_value = "32")]
    message_size: usize,

    /// Delivery guarantee, defaults to what the transport provides
    #[arg(long, value_enum)]
    transmission: Option<TransmissionArg>,

    /// Server ticks per second (0 = never sleep)
    #[arg(long, default_value = "60")]
    server_tick_rate: u32,

    /// Client ticks per second (0 = never sleep)
    #[arg(long, default_value = "60")]
    client_tick_rate: u32,

    /// Messages each client keeps in flight
    #[arg(short = 'P', long, default_value = "1")]
    parallel: usize,

    /// Server address
    #[arg(short, long, default_value = "127.0.0.1")]
    address: String,

    /// Server port
    #[arg(short, long, default_value = "3333")]
    port: u16,

    /// Seconds to wait for clients to connect (0 = wait forever)
    #[arg(long, default_value = "30")]
    connect_timeout: u64,

    /// Continue with the connected clients instead of aborting
    #[arg(long)]
    proceed_on_connect_failure: bool,

    /// Output in JSON format
    #[arg(short = 'J', long)]
    json: bool,
}

impl Cli {
    fn setup(&self) -> BenchmarkSetup {
        let transmission = match (self.transmission, self.transport.as_str()) {
            (Some(arg), _) => arg.into(),
            (None, "udp") => Transmission::Unreliable,
            (None, _) => Transmission::Reliable,
        };
        let connect_timeout = match self.connect_timeout {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };
        let policy = if self.proceed_on_connect_failure {
            ConnectPolicy::Proceed
        } else {
            ConnectPolicy::FailFast
        };

        BenchmarkSetup::new()
            .with_clients(self.clients)
            .with_duration(Duration::from_secs(self.duration))
            .with_message_size(self.message_size)
            .with_transmission(transmission)
            .with_tick_rate(self.server_tick_rate, self.client_tick_rate)
            .with_parallel_messages(self.parallel)
            .with_endpoint(self.address.clone(), self.port)
            .with_connect_timeout(connect_timeout)
            .with_connect_policy(policy)
    }
}

fn print_results(report: &BenchmarkReport) {
    println!("# {} benchmark", report.transport);
    println!();
    println!("```");
    println!("Transmission: {}", report.transmission);
    println!(
        "Clients: {} of {} connected, {} message(s) in flight each",
        report.clients_connected, report.clients_requested, report.parallel_messages
    );
    println!("Message size: {} bytes", report.message_size);
    println!("Duration: {:.3} s", report.duration.as_secs_f64());
    println!(
        "Messages: {} client sent, {} server received, {} server sent, {} client received",
        report.messages_client_sent,
        report.messages_server_received,
        report.messages_server_sent,
        report.messages_client_received
    );
    println!("Errors: {}", report.errors);
    println!(
        "Throughput: {:.0} msg/s, {:.2} MB/s ({:.2} MB total)",
        report.message_throughput,
        report.megabytes_per_second(),
        report.total_megabytes()
    );
    match report.mean_latency {
        Some(latency) => println!("Mean latency: {:.3} ms", latency.as_secs_f64() * 1000.0),
        None => println!("Mean latency: n/a"),
    }
    println!("```");
    println!();
    println!("{} | {}", report.run_info.version, report.run_info.system_info);
    println!("{}", report.run_info.timestamp_str);
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let transport = transports::by_name(&cli.transport)?;

    let mut coordinator = BenchmarkCoordinator::new(transport, cli.setup())?.with_callback(
        |event: PhaseEvent| {
            if let PhaseEvent::ClientsConnected {
                connected,
                requested,
            } = event
            {
                if connected < requested {
                    log::warn!("Only {} of {} clients take part", connected, requested);
                }
            }
        },
    );

    let report = coordinator.run().await?;

    if cli.json {
        println!("{}", report.to_json()?);
    } else {
        print_results(&report);
    }

    Ok(())
}
