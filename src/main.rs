use std::{net::SocketAddr, path::PathBuf};

use anyhow::Result;
use clap::Parser;

use avrisp_net::Config;

#[derive(clap::Parser)]
#[clap(
    name = "avrisp-net",
    about = "Program AVR MCUs over the network with avrdude, through an SPI ISP bridge"
)]
struct Cli {
    /// YAML config file
    #[clap(short, long)]
    config: Option<PathBuf>,
    /// More output, repeat for trace logging
    #[clap(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
    #[clap(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Serve avrdude clients (`avrdude -c arduino -P net:<host>:<port>`)
    Serve {
        /// Override the listen address
        #[clap(short, long)]
        listen: Option<SocketAddr>,
        /// Override the SPI clock in Hz
        #[clap(short = 'f', long)]
        spi_frequency: Option<u32>,
    },
    /// Enter programming mode and print the target's signature
    Info {},
    /// Reset the target connected
    Reset {},
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => simplelog::LevelFilter::Info,
        1 => simplelog::LevelFilter::Debug,
        _ => simplelog::LevelFilter::Trace,
    };
    let _ = simplelog::TermLogger::init(
        level,
        simplelog::Config::default(),
        simplelog::TerminalMode::Mixed,
        simplelog::ColorChoice::Auto,
    );

    let config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };

    run(cli.command, config)
}

#[cfg(target_os = "linux")]
fn run(command: Commands, mut config: Config) -> Result<()> {
    match command {
        Commands::Serve {
            listen,
            spi_frequency,
        } => {
            if let Some(listen) = listen {
                config.listen = listen;
            }
            if let Some(freq) = spi_frequency {
                config.spi.frequency = freq;
            }
            let avrisp = open(&config)?;
            log::info!(
                "Use your avrdude: avrdude -c arduino -p <device> -P net:<host>:{} -t # or -U ...",
                config.listen.port()
            );
            let mut server =
                avrisp_net::Server::bind(config.listen, avrisp, config.poll_interval())?;
            server.run()?;
        }
        Commands::Info {} => {
            let mut avrisp = open(&config)?;
            avrisp.start_pmode()?;
            let sig = avrisp.read_signature_bytes();
            avrisp.end_pmode()?;
            log::info!("Signature: {}", hex::encode(sig?));
        }
        Commands::Reset {} => {
            let mut avrisp = open(&config)?;
            avrisp.reset_target()?;
        }
    }

    Ok(())
}

#[cfg(target_os = "linux")]
fn open(config: &Config) -> Result<avrisp_net::AvrIsp<avrisp_net::bus::linux::LinuxBus>> {
    let bus = avrisp_net::bus::linux::open(&config.spi, &config.reset)?;
    avrisp_net::AvrIsp::new(bus, config.spi.frequency, config.reset.clone())
}

#[cfg(not(target_os = "linux"))]
fn run(_command: Commands, _config: Config) -> Result<()> {
    anyhow::bail!("no SPI backend for this platform, only Linux spidev is supported")
}
