//! memwire CLI Client
//!
//! Command-line interface for issuing single commands to a memcached server.

use std::process;
use std::time::Duration;

use bytes::Bytes;
use clap::{Parser, Subcommand};
use memwire::protocol::counter_value;
use memwire::{Arg, Client, Config};
use tracing_subscriber::{fmt, EnvFilter};

/// memwire CLI
#[derive(Parser, Debug)]
#[command(name = "memwire-cli")]
#[command(about = "CLI for memcached servers speaking the binary protocol")]
#[command(version)]
struct Args {
    /// Server host
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Server port
    #[arg(short, long, default_value = "11211")]
    port: u16,

    /// SASL username
    #[arg(short, long)]
    username: Option<String>,

    /// SASL password
    #[arg(long)]
    password: Option<String>,

    /// How long to wait for the reply (milliseconds)
    #[arg(short, long, default_value = "5000")]
    timeout_ms: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Get a value by key
    Get {
        /// The key to get
        key: String,
    },

    /// Set a key-value pair
    Set {
        key: String,
        value: String,
        /// Expiration in seconds
        #[arg(long)]
        ttl: Option<u32>,
    },

    /// Store only if the key does not exist
    Add {
        key: String,
        value: String,
        #[arg(long)]
        ttl: Option<u32>,
    },

    /// Store only if the key exists
    Replace {
        key: String,
        value: String,
        #[arg(long)]
        ttl: Option<u32>,
    },

    /// Delete a key
    Delete { key: String },

    /// Increment a counter
    Incr {
        key: String,
        #[arg(default_value = "1")]
        amount: u64,
    },

    /// Decrement a counter
    Decr {
        key: String,
        #[arg(default_value = "1")]
        amount: u64,
    },

    /// Append to an existing value
    Append { key: String, value: String },

    /// Prepend to an existing value
    Prepend { key: String, value: String },

    /// Print the server version
    Version,

    /// Round-trip a no-op
    Noop,
}

impl Commands {
    /// Command name and positional arguments
    fn into_call(self) -> (&'static str, Vec<Arg>) {
        match self {
            Commands::Get { key } => ("get", vec![key.into()]),
            Commands::Set { key, value, ttl } => ("set", vec![key.into(), value.into(), ttl.into()]),
            Commands::Add { key, value, ttl } => ("add", vec![key.into(), value.into(), ttl.into()]),
            Commands::Replace { key, value, ttl } => {
                ("replace", vec![key.into(), value.into(), ttl.into()])
            }
            Commands::Delete { key } => ("delete", vec![key.into()]),
            Commands::Incr { key, amount } => ("increment", vec![key.into(), amount.into()]),
            Commands::Decr { key, amount } => ("decrement", vec![key.into(), amount.into()]),
            Commands::Append { key, value } => ("append", vec![key.into(), value.into()]),
            Commands::Prepend { key, value } => ("prepend", vec![key.into(), value.into()]),
            Commands::Version => ("version", Vec::new()),
            Commands::Noop => ("noop", Vec::new()),
        }
    }
}

fn main() {
    // Initialize tracing/logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    fmt().with_env_filter(filter).with_target(true).init();

    let args = Args::parse();

    let mut builder = Config::builder().host(&args.host).port(args.port);
    if let (Some(user), Some(pass)) = (&args.username, &args.password) {
        builder = builder.credentials(user, pass);
    }
    let config = builder.build();

    let client = match Client::connect(config) {
        Ok(client) => client,
        Err(e) => {
            eprintln!("error: {}", e);
            process::exit(1);
        }
    };

    let is_counter = matches!(args.command, Commands::Incr { .. } | Commands::Decr { .. });
    let (name, call_args) = args.command.into_call();

    match client.call(name, call_args, Duration::from_millis(args.timeout_ms)) {
        Ok(Some(value)) => println!("{}", render(&value, is_counter)),
        Ok(None) => println!("(nil)"),
        Err(e) => {
            eprintln!("error: {}", e);
            process::exit(1);
        }
    }
}

fn render(value: &Bytes, is_counter: bool) -> String {
    if is_counter {
        if let Some(count) = counter_value(value) {
            return count.to_string();
        }
    }
    if value.is_empty() {
        return "OK".to_string();
    }
    String::from_utf8_lossy(value).into_owned()
}
