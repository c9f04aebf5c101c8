//! CLI definitions using clap.

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "wyzesense-cli")]
#[command(author, version, about = "Operator tool for the Wyze Sense dongle protocol engine")]
#[command(propagate_version = true)]
pub struct Cli {
    /// hidraw character device the dongle is attached to
    #[arg(short = 'd', long = "device", default_value = "/dev/hidraw0")]
    pub device: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List paired sensor MACs
    #[command(visible_alias = "ls")]
    List,

    /// Enable pairing mode and wait for a new sensor
    Scan {
        /// Seconds to wait for a pairing notification
        #[arg(short, long, default_value_t = 60)]
        timeout: u64,
    },

    /// Unpair a sensor by MAC (16 hex characters, e.g. 7778000000000001)
    Delete {
        mac: String,
    },

    /// Open the session and print sensor events as they arrive, until Ctrl-C
    Watch,

    /// Send a raw command and print whatever single reply arrives
    Raw {
        /// 16-bit command code, hex, e.g. 4327
        cmd_hex: String,
        /// Payload bytes, hex, e.g. 3030303030303030
        #[arg(default_value = "")]
        payload_hex: String,
    },
}
