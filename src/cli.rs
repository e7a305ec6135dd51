use std::net::SocketAddr;

use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the relay server, accepting TCP connections
    Serve(ServeArgs),
    /// Connect to a relay and chat from the terminal
    Client(ClientArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ServeArgs {
    /// Socket address to bind; use port 0 for an ephemeral port
    #[arg(long, default_value = "127.0.0.1:8080")]
    pub listen: SocketAddr,

    /// Also deliver each chat line back to its sender
    #[arg(long)]
    pub self_echo: bool,
}

#[derive(Args, Debug, Clone)]
pub struct ClientArgs {
    /// Display name announced to the chat
    #[arg(long)]
    pub name: String,

    /// Address of the relay to connect to
    #[arg(long, default_value = "127.0.0.1:8080")]
    pub server: SocketAddr,
}
