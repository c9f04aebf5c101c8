//! Wyze Sense dongle operator CLI.
//!
//! A thin command-line front end over the `wyzesense` session controller:
//! list paired sensors, pair a new one, unpair, watch live events, or poke
//! the dongle with an arbitrary command for debugging.

use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::info;

mod cli;
use cli::{Cli, Commands};

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("wyzesense=debug".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> Result<(), Box<dyn std::error::Error>> {
    match &cli.command {
        Commands::List => {
            let handle = wyzesense::open(&cli.device, |_, _| {})?;
            let macs = handle.list()?;
            if macs.is_empty() {
                println!("no paired sensors");
            }
            for mac in macs {
                println!("{}", format_mac(&mac));
            }
            handle.stop();
        }

        Commands::Scan { timeout } => {
            let handle = wyzesense::open(&cli.device, |_, _| {})?;
            info!(timeout, "scanning for a new sensor");
            match handle.scan(Duration::from_secs(*timeout))? {
                Some(result) => println!(
                    "paired {} (type={}, version={})",
                    format_mac(&result.mac),
                    result.sensor_type,
                    result.version
                ),
                None => println!("no sensor found within {timeout}s"),
            }
            handle.stop();
        }

        Commands::Delete { mac } => {
            let mac = parse_mac(mac)?;
            let handle = wyzesense::open(&cli.device, |_, _| {})?;
            if handle.delete(mac)? {
                println!("deleted {}", format_mac(&mac));
            } else {
                println!("delete failed for {}", format_mac(&mac));
            }
            handle.stop();
        }

        Commands::Watch => {
            let running = setup_interrupt_handler();
            let handle = wyzesense::open(&cli.device, |_, event| {
                print_event(&event);
            })?;
            println!("watching for sensor events, Ctrl-C to stop");
            while running.load(Ordering::SeqCst) {
                std::thread::sleep(Duration::from_millis(200));
            }
            handle.stop();
        }

        Commands::Raw { cmd_hex, payload_hex } => {
            let command = u16::from_str_radix(cmd_hex.trim_start_matches("0x"), 16)?;
            let payload = hex_to_bytes(payload_hex)?;
            let handle = wyzesense::open(&cli.device, |_, _| {})?;
            let reply = handle.send_raw(command, payload)?;
            println!("{}", bytes_to_hex(&reply));
            handle.stop();
        }
    }

    Ok(())
}

fn print_event(event: &wyzesense::SensorEvent) {
    match event {
        wyzesense::SensorEvent::State(e) => {
            println!(
                "{} mac={} {} state={} battery={}% signal={}",
                e.timestamp_ms,
                format_mac(&e.mac),
                e.sensor_kind,
                e.state,
                e.battery_percent,
                e.signal
            );
        }
        wyzesense::SensorEvent::RawAlarm(e) => {
            println!(
                "{} mac={} {} raw-alarm type={} battery={}% signal={}",
                e.timestamp_ms,
                format_mac(&e.mac),
                e.sensor_kind,
                e.alarm_type,
                e.battery_percent,
                e.signal
            );
        }
    }
}

/// Set up a Ctrl-C handler that flips the returned flag to false when
/// triggered, so `watch` can unwind its loop instead of exiting mid-read.
fn setup_interrupt_handler() -> Arc<AtomicBool> {
    let running = Arc::new(AtomicBool::new(true));
    let running_clone = Arc::clone(&running);
    ctrlc::set_handler(move || {
        running_clone.store(false, Ordering::SeqCst);
    })
    .ok();
    running
}

fn format_mac(mac: &[u8; 8]) -> String {
    bytes_to_hex(mac)
}

fn bytes_to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn parse_mac(s: &str) -> Result<[u8; 8], Box<dyn std::error::Error>> {
    let bytes = hex_to_bytes(s)?;
    bytes
        .as_slice()
        .try_into()
        .map_err(|_| format!("MAC must be 8 bytes (16 hex chars), got {} bytes", bytes.len()).into())
}

fn hex_to_bytes(s: &str) -> Result<Vec<u8>, Box<dyn std::error::Error>> {
    let s = s.trim();
    if s.is_empty() {
        return Ok(Vec::new());
    }
    if s.len() % 2 != 0 {
        return Err("hex string must have an even number of digits".into());
    }
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&s[i..i + 2], 16).map_err(|e| e.into()))
        .collect()
}
