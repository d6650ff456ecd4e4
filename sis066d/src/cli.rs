//! Command-line surface.

use std::path::PathBuf;

use clap::Parser;

use sis066_core::listener::{ListenerSpec, PeerSpec};

#[derive(Parser, Debug)]
#[command(author, version, about = "STANAG 5066 subnetwork daemon")]
pub struct Cli {
    /// Path to a configuration TOML file. Merged with any `-p`/peer
    /// arguments, which take precedence.
    #[arg(short = 'c', long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Additional listener, `<proto>:<iface>:<port>`. May be repeated.
    #[arg(short = 'p', long = "listen", value_name = "PROTO:IFACE:PORT")]
    pub listen: Vec<ListenerSpec>,

    /// Drop privileges to `<uid>:<gid>` after binding listeners.
    #[arg(long, value_name = "UID:GID")]
    pub uid_gid: Option<String>,

    /// Write the daemon's PID to this file after startup.
    #[arg(long, value_name = "FILE")]
    pub pid_file: Option<PathBuf>,

    /// Increase log verbosity; repeatable (-v, -vv, -vvv).
    #[arg(short = 'v', action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Outbound DTS peers to dial at startup, `dts:<host>:<port>`.
    pub peers: Vec<PeerSpec>,
}

impl Cli {
    /// Translate `-v` repeats into a `tracing_subscriber::EnvFilter`
    /// directive, used only when `RUST_LOG` is not already set.
    pub fn default_log_directive(&self) -> &'static str {
        match self.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_repeated_listen_and_positional_peers() {
        let cli = Cli::parse_from([
            "sis066d",
            "-p",
            "sis:0.0.0.0:5066",
            "-p",
            "dts:0.0.0.0:5067",
            "-vv",
            "dts:192.0.2.10:6066",
        ]);
        assert_eq!(cli.listen.len(), 2);
        assert_eq!(cli.peers.len(), 1);
        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.default_log_directive(), "trace");
    }
}
