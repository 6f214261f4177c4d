//! Binary entry point for `bytekv-cli`: one command in, one decoded
//! response out. Exits 1 when the server answers with an ERR value.

use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;

use bytekv::cli::ClientArgs;
use bytekv::client::{connect, read_response, render, send_request};
use bytekv::wire::Value;

fn main() -> anyhow::Result<ExitCode> {
    let args = ClientArgs::parse();

    let mut stream = connect(&args.host, args.port)
        .with_context(|| format!("failed to connect to {}:{}", args.host, args.port))?;

    let cmd: Vec<&[u8]> = args.command.iter().map(|word| word.as_bytes()).collect();
    send_request(&mut stream, &cmd).context("failed to send request")?;
    let value = read_response(&mut stream).context("failed to read response")?;

    print!("{}", render(&value));
    Ok(if matches!(value, Value::Err { .. }) {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}
