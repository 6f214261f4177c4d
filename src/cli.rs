//! Command-line argument definitions for the two binaries.

use clap::{ArgAction, Parser};

use crate::config::DEFAULT_PORT;

/// `bytekv-server` arguments.
#[derive(Parser, Debug)]
#[command(name = "bytekv-server", version, about = "In-memory key-value server")]
pub struct ServerArgs {
    /// TCP port to listen on (0 picks an ephemeral port).
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Increase verbosity (repeatable).
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,

    /// Log errors only.
    #[arg(short, long, conflicts_with = "verbose")]
    pub quiet: bool,
}

/// `bytekv-cli` arguments.
#[derive(Parser, Debug)]
#[command(name = "bytekv-cli", version, about = "Send one command to a bytekv server")]
pub struct ClientArgs {
    /// Server host.
    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,

    /// Server port.
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Command words, e.g. `set name value`.
    #[arg(required = true, num_args = 1..)]
    pub command: Vec<String>,
}

/// Map the `-v`/`-q` flags onto a notification level.
pub fn notice_level_for(verbose: u8, quiet: bool) -> u32 {
    if quiet {
        1
    } else {
        2 + u32::from(verbose)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_level_is_lifecycle() {
        assert_eq!(notice_level_for(0, false), 2);
    }

    #[test]
    fn verbose_raises_quiet_lowers() {
        assert_eq!(notice_level_for(2, false), 4);
        assert_eq!(notice_level_for(0, true), 1);
    }

    #[test]
    fn server_args_parse() {
        let args = ServerArgs::parse_from(["bytekv-server", "-p", "9000", "-vv"]);
        assert_eq!(args.port, 9000);
        assert_eq!(args.verbose, 2);
        assert!(!args.quiet);
    }

    #[test]
    fn client_args_collect_command_words() {
        let args = ClientArgs::parse_from(["bytekv-cli", "set", "name", "value"]);
        assert_eq!(args.command, vec!["set", "name", "value"]);
        assert_eq!(args.port, DEFAULT_PORT);
    }
}
