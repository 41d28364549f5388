//! See `lib.rs` for documentation.

use clap::Parser;
use load_bank::link::{self, LinkSettings, DEFAULT_BAUD_RATE};

use std::error::Error;

/// Control panel for the relay load bank.
#[derive(Debug, Parser)]
#[command(version)]
struct Args {
    /// The serial port the load bank is connected to, e.g. /dev/ttyACM0 or COM7
    #[arg(required_unless_present = "list_ports")]
    port: Option<String>,
    /// The serial baud rate
    #[arg(short, long, default_value_t = DEFAULT_BAUD_RATE)]
    baud: u32,
    /// List the available serial ports and exit
    #[arg(long)]
    list_ports: bool,
    /// Log debug messages
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    load_bank::logger::init(args.verbose);

    if args.list_ports {
        for port in link::available_ports()? {
            println!("{}", port);
        }
        return Ok(());
    }

    let port = args.port.ok_or("a serial port is required")?;
    load_bank::launch(LinkSettings::new(port, args.baud)).await?;

    Ok(())
}
