use clap::Parser;
use pppoec::config;
use pppoec::discovery::{AcOffer, Discovery, DiscoveryConfig, DiscoveryOutcome, LcpMru};
use pppoec::protocol::MacAddr;
use pppoec::telemetry::init_logging;
use pppoec::transport::AfPacketSocket;
use pppoec::{Error, Result};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "pppoec")]
#[command(about = "A PPPoE (RFC 2516) discovery client")]
struct Cli {
    /// Ethernet interface to run discovery on
    #[arg(short = 'I', long)]
    interface: Option<String>,

    /// Path to a TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Request this service name from the AC
    #[arg(short = 'S', long)]
    service_name: Option<String>,

    /// Only accept offers from this access concentrator name
    #[arg(short = 'C', long)]
    ac_name: Option<String>,

    /// Only accept offers (and confirmations) from this MAC address
    #[arg(long)]
    ac_mac: Option<MacAddr>,

    /// Correlator sent in every packet and required in every reply
    #[arg(short = 'U', long)]
    host_uniq: Option<String>,

    /// Initial per-attempt discovery timeout in seconds
    #[arg(short = 't', long)]
    timeout: Option<u64>,

    /// Restart discovery forever instead of giving up
    #[arg(short, long)]
    persist: bool,

    /// List access concentrators on the segment and exit
    #[arg(short = 'A', long)]
    probe: bool,

    /// Advertise an RFC 4638 PPP-Max-Payload of this many bytes
    #[arg(long)]
    max_payload: Option<u16>,

    /// Skip discovery and assume --session / --ac-mac
    #[arg(long)]
    skip_discovery: bool,

    /// Terminate the session given by --session / --ac-mac with a PADT
    #[arg(short, long)]
    kill: bool,

    /// Existing session id (decimal or 0x-hex), for --skip-discovery / --kill
    #[arg(long, value_parser = parse_session_id)]
    session: Option<u16>,
}

fn main() {
    let cli = Cli::parse();

    let file_config = match &cli.config {
        Some(path) => match config::load(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("[ERROR] {}", e);
                std::process::exit(1);
            }
        },
        None => config::Config::default(),
    };
    if let Err(e) = config::validate(&file_config) {
        eprintln!("[ERROR] {}", e);
        std::process::exit(1);
    }

    init_logging(Some(&file_config.log));

    match run(cli, file_config) {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn run(cli: Cli, file: config::Config) -> Result<i32> {
    let interface = cli
        .interface
        .or(file.interface)
        .ok_or_else(|| Error::Config("no interface given (use --interface)".into()))?;

    let ac_mac = match cli.ac_mac {
        Some(mac) => Some(mac),
        None => file
            .ac_mac
            .as_deref()
            .map(|mac| {
                mac.parse()
                    .map_err(|_| Error::Config(format!("invalid ac_mac '{}'", mac)))
            })
            .transpose()?,
    };

    if (cli.kill || cli.skip_discovery) && (cli.session.is_none() || ac_mac.is_none()) {
        return Err(Error::Config(
            "--skip-discovery and --kill need --session and --ac-mac".into(),
        ));
    }

    let discovery_config = DiscoveryConfig {
        service_name: cli.service_name.or(file.service_name),
        ac_name: cli.ac_name.or(file.ac_name),
        host_uniq: cli.host_uniq.or(file.host_uniq).map(String::into_bytes),
        ac_mac,
        session: cli.session,
        timeout: Duration::from_secs(cli.timeout.or(file.timeout).unwrap_or(5)),
        persist: cli.persist || file.persist,
        skip_discovery: cli.skip_discovery || cli.kill,
        kill_session: cli.kill,
    };

    info!("starting PPPoE discovery on {}", interface);
    let socket = AfPacketSocket::bind(&interface)?;
    let local_mac = socket.mac_address();

    let mut discovery = Discovery::new(socket, local_mac, discovery_config);
    if let Some(mru) = cli.max_payload {
        discovery = discovery.with_mru_negotiator(Box::new(LcpMru {
            want: mru,
            allow: mru,
        }));
    }

    if cli.probe {
        let offers = discovery.probe().await?;
        for (i, offer) in offers.iter().enumerate() {
            if i > 0 {
                println!();
            }
            print_offer(offer);
        }
        if offers.is_empty() {
            error!("no access concentrators answered");
            return Ok(1);
        }
        return Ok(0);
    }

    match discovery.run().await? {
        DiscoveryOutcome::Established => {
            info!(
                "discovery complete: session 0x{:04x} with {}",
                discovery.session_id(),
                discovery.peer_mac()
            );
            Ok(0)
        }
        DiscoveryOutcome::SessionKilled => Ok(0),
        DiscoveryOutcome::GaveUp => {
            error!("discovery failed: no session established");
            Ok(1)
        }
    }
}

fn print_offer(offer: &AcOffer) {
    println!("Access-Concentrator: {}", offer.ac_name);
    for service in &offer.service_names {
        if !service.is_empty() {
            println!("       Service-Name: {}", service);
        }
    }
    if let Some(cookie) = &offer.cookie {
        println!("Got a cookie: {}", hex_preview(cookie));
    }
    if let Some(relay) = &offer.relay_session_id {
        println!("Got a Relay-ID: {}", hex_preview(relay));
    }
    println!("AC-Ethernet-Address: {}", offer.mac);
}

fn hex_preview(bytes: &[u8]) -> String {
    use std::fmt::Write;

    let mut out = String::new();
    for (i, byte) in bytes.iter().take(20).enumerate() {
        if i > 0 {
            out.push(' ');
        }
        let _ = write!(out, "{:02x}", byte);
    }
    if bytes.len() > 20 {
        out.push_str("...");
    }
    out
}

fn parse_session_id(s: &str) -> std::result::Result<u16, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u16::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|_| format!("invalid session id '{}'", s))
}
