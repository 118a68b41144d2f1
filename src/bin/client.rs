//! Interactive linecache client.
//!
//! Opens one connection, retrying establishment with linearly increasing
//! backoff, then sends one line per request from stdin and prints one
//! line per response. Connection loss is terminal for the session; type
//! `exit` to quit.

use clap::Parser;
use std::io::{self, BufRead, BufReader, Write};
use std::net::TcpStream;
use std::thread;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "linecache-client")]
#[command(version = "0.1.0")]
#[command(about = "Interactive client for the linecache server", long_about = None)]
struct CliArgs {
    /// Server address
    #[arg(short, long, default_value = "127.0.0.1:9090")]
    addr: String,

    /// Connection attempts before giving up
    #[arg(long, default_value_t = 3)]
    max_retries: u32,

    /// Base backoff delay in milliseconds; attempt n waits n times this
    #[arg(long, default_value_t = 1000)]
    backoff_ms: u64,

    /// Response read timeout in milliseconds
    #[arg(long, default_value_t = 1000)]
    read_timeout_ms: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn main() -> io::Result<()> {
    let args = CliArgs::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let stream = match connect_with_retries(&args) {
        Some(stream) => stream,
        None => {
            error!(
                attempts = args.max_retries,
                "Unable to connect to the server"
            );
            return Ok(());
        }
    };
    stream.set_read_timeout(Some(Duration::from_millis(args.read_timeout_ms)))?;

    let mut writer = stream.try_clone()?;
    let mut reader = BufReader::new(stream);

    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let command = line?;
        if command.eq_ignore_ascii_case("exit") {
            break;
        }

        writer.write_all(command.as_bytes())?;
        writer.write_all(b"\n")?;
        writer.flush()?;

        let mut response = String::new();
        match reader.read_line(&mut response) {
            Ok(0) => {
                // Server closed the connection; the session is over
                error!("Connection closed by server");
                break;
            }
            Ok(_) => println!("{}", response.trim_end_matches('\n')),
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                error!("Timed out waiting for response");
            }
            Err(e) => {
                error!(error = %e, "Failed to read response");
                break;
            }
        }
    }

    Ok(())
}

/// Connect with bounded retries; attempt n sleeps n times the base delay.
fn connect_with_retries(args: &CliArgs) -> Option<TcpStream> {
    for attempt in 0..args.max_retries {
        if attempt > 0 {
            let backoff = Duration::from_millis(args.backoff_ms * u64::from(attempt));
            info!(attempt, backoff_ms = backoff.as_millis() as u64, "Retrying connection");
            thread::sleep(backoff);
        }

        match TcpStream::connect(&args.addr) {
            Ok(stream) => {
                info!(addr = %args.addr, "Connected to server");
                return Some(stream);
            }
            Err(e) => {
                info!(addr = %args.addr, attempt, error = %e, "Connection attempt failed");
            }
        }
    }
    None
}
