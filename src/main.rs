//! Binary entry point for `bytekv-server`.
//!
//! Wires the CLI onto the engine: set the notification level, install the
//! SIGINT handler, bind, run. The store and every connection drop on the way
//! out of `run`, so a signal-initiated exit releases everything.

use anyhow::Context;
use clap::Parser;

use bytekv::cli::{notice_level_for, ServerArgs};
use bytekv::cmd::Store;
use bytekv::server::{install_sigint_handler, Server};
use bytekv::verbose::set_notice_level;

fn main() -> anyhow::Result<()> {
    let args = ServerArgs::parse();
    set_notice_level(notice_level_for(args.verbose, args.quiet));

    install_sigint_handler().context("failed to install SIGINT handler")?;

    let mut server = Server::bind(args.port)
        .with_context(|| format!("failed to bind 0.0.0.0:{}", args.port))?;
    bytekv::verbose!(1, "listening on 0.0.0.0:{}", server.local_port());

    let mut store = Store::new();
    server.run(&mut store).context("event loop failed")?;

    bytekv::verbose!(1, "bye ({} key(s) dropped)", store.len());
    Ok(())
}
