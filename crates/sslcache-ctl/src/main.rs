//! sslcache-ctl - Inspect and purge the Schannel TLS session cache.
//!
//! Talks to the Windows security authority over its administrative
//! channel. Read-only queries work from any account; purging needs the
//! TCB privilege (run as SYSTEM).
//!
//! # Usage
//!
//! ```bash
//! # Show client, server and total cache counters (default)
//! sslcache-ctl list
//!
//! # Counters as JSON
//! sslcache-ctl list --json
//!
//! # Redraw every half second
//! sslcache-ctl watch --interval 500
//!
//! # Purge client-side entries
//! sslcache-ctl purge --client
//!
//! # Purge server entries for one host, including IIS-mapped entries
//! sslcache-ctl purge --mapped --server-name host1
//! ```

use std::io::{self, Write};
use std::process::ExitCode;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use crossterm::{
    cursor, execute,
    terminal::{Clear, ClearType},
};
use serde::Serialize;
use sslcache_core::{AuthorityChannel, CacheControl, CacheInfo, PurgeScope};
use tracing::debug;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Inspect and purge the Schannel TLS session cache.
#[derive(Parser)]
#[command(name = "sslcache-ctl")]
#[command(about = "Inspect and purge the Schannel TLS session cache")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// List session-cache counters (default)
    #[command(alias = "ls")]
    List {
        #[command(flatten)]
        scope: ScopeArgs,

        /// Emit the counters as JSON
        #[arg(long)]
        json: bool,
    },

    /// Redraw the counters periodically
    Watch {
        #[command(flatten)]
        scope: ScopeArgs,

        /// Refresh interval in milliseconds
        #[arg(long, default_value_t = 2000, value_name = "MS")]
        interval: u64,
    },

    /// Purge cached sessions
    Purge {
        #[command(flatten)]
        scope: ScopeArgs,

        /// Also drop IIS-mapped server-name entries (implies --server)
        #[arg(long, short = 'm')]
        mapped: bool,

        /// Purge only sessions for this server name (implies --server)
        #[arg(long, value_name = "NAME")]
        server_name: Option<String>,
    },
}

#[derive(Args, Clone, Copy, Default)]
struct ScopeArgs {
    /// Include client-side entries
    #[arg(long, short = 'c')]
    client: bool,

    /// Include server-side entries
    #[arg(long, short = 's')]
    server: bool,
}

/// Apply the defaulting rule: with no explicit flags, queries cover both
/// sides while purge touches client entries only.
fn resolve_scope(args: ScopeArgs, purge: bool) -> (bool, bool) {
    if args.client || args.server {
        (args.client, args.server)
    } else if purge {
        (true, false)
    } else {
        (true, true)
    }
}

/// Counters grouped the way the authority reports them: per side, plus
/// the combined view when both sides were requested.
#[derive(Serialize)]
struct CacheReport {
    #[serde(skip_serializing_if = "Option::is_none")]
    client: Option<CacheInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    server: Option<CacheInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    total: Option<CacheInfo>,
}

fn collect<C: AuthorityChannel>(
    control: &mut CacheControl<C>,
    client: bool,
    server: bool,
) -> Result<CacheReport> {
    let client_info = if client {
        Some(control.query_cache_info(true, false)?)
    } else {
        None
    };
    let server_info = if server {
        Some(control.query_cache_info(false, true)?)
    } else {
        None
    };
    let total = if client && server {
        Some(control.query_cache_info(true, true)?)
    } else {
        None
    };

    Ok(CacheReport {
        client: client_info,
        server: server_info,
        total,
    })
}

fn print_cache_info(info: &CacheInfo) {
    println!("CacheSize:      {}", info.cache_size);
    println!("Entries:        {}", info.entries);
    println!("ActiveEntries:  {}", info.active_entries);
    println!("Zombies:        {}", info.zombies);
    println!("ExpiredZombies: {}", info.expired_zombies);
    println!("AbortedZombies: {}", info.aborted_zombies);
    println!("DeletedZombies: {}", info.deleted_zombies);
}

fn print_report(report: &CacheReport) {
    if let Some(info) = &report.client {
        println!("--CLIENT--");
        print_cache_info(info);
    }
    if let Some(info) = &report.server {
        println!("--SERVER--");
        print_cache_info(info);
    }
    if let Some(info) = &report.total {
        println!("--TOTAL--");
        print_cache_info(info);
    }
}

fn cmd_list<C: AuthorityChannel>(
    control: &mut CacheControl<C>,
    scope: ScopeArgs,
    json: bool,
) -> Result<ExitCode> {
    let (client, server) = resolve_scope(scope, false);
    let report =
        collect(control, client, server).context("failed to query the session cache")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }

    Ok(ExitCode::SUCCESS)
}

fn cmd_watch<C: AuthorityChannel>(
    control: &mut CacheControl<C>,
    scope: ScopeArgs,
    interval: u64,
) -> Result<ExitCode> {
    let (client, server) = resolve_scope(scope, false);
    let mut stdout = io::stdout();
    execute!(stdout, Clear(ClearType::All))?;

    loop {
        let report =
            collect(control, client, server).context("failed to query the session cache")?;

        execute!(stdout, cursor::MoveTo(0, 0), Clear(ClearType::FromCursorDown))?;
        print_report(&report);
        stdout.flush()?;

        thread::sleep(Duration::from_millis(interval));
    }
}

fn cmd_purge<C: AuthorityChannel>(
    control: &mut CacheControl<C>,
    args: ScopeArgs,
    mapped: bool,
    server_name: Option<String>,
) -> Result<ExitCode> {
    let scope = purge_scope(args, mapped, server_name);
    control
        .purge(&scope)
        .context("failed to purge the session cache")?;

    println!(
        "Purged session cache entries (client: {}, server: {}).",
        if scope.client { "yes" } else { "no" },
        if scope.server { "yes" } else { "no" },
    );
    Ok(ExitCode::SUCCESS)
}

fn purge_scope(args: ScopeArgs, mapped: bool, server_name: Option<String>) -> PurgeScope {
    let named = server_name.as_deref().is_some_and(|name| !name.is_empty());
    let args = ScopeArgs {
        client: args.client,
        server: args.server || mapped || named,
    };
    let (client, server) = resolve_scope(args, true);

    PurgeScope {
        client,
        server,
        mapped,
        server_name,
    }
}

fn dispatch<C: AuthorityChannel>(cli: Cli, control: &mut CacheControl<C>) -> Result<ExitCode> {
    let command = cli.command.unwrap_or(Commands::List {
        scope: ScopeArgs::default(),
        json: false,
    });

    match command {
        Commands::List { scope, json } => cmd_list(control, scope, json),
        Commands::Watch { scope, interval } => cmd_watch(control, scope, interval),
        Commands::Purge {
            scope,
            mapped,
            server_name,
        } => cmd_purge(control, scope, mapped, server_name),
    }
}

#[cfg(windows)]
fn run(cli: Cli) -> Result<ExitCode> {
    let mut control = CacheControl::new(sslcache_core::LsaSession::new());
    dispatch(cli, &mut control)
}

#[cfg(not(windows))]
fn run(cli: Cli) -> Result<ExitCode> {
    // The session cache lives inside the Windows security authority;
    // elsewhere every call reports STATUS_NOT_IMPLEMENTED through the
    // normal error path.
    let mut control = CacheControl::new(UnsupportedChannel);
    dispatch(cli, &mut control)
}

#[cfg(not(windows))]
struct UnsupportedChannel;

#[cfg(not(windows))]
impl AuthorityChannel for UnsupportedChannel {
    fn call(
        &mut self,
        _request: &[u8],
    ) -> Result<sslcache_core::CallReply, sslcache_core::ChannelError> {
        Err(sslcache_core::ChannelError {
            call: "LsaCallAuthenticationPackage",
            status: sslcache_core::channel::STATUS_NOT_IMPLEMENTED,
        })
    }
}

fn setup_logging() {
    // RUST_LOG=debug for verbose output.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_writer(io::stderr))
        .with(filter)
        .init();
}

fn main() -> ExitCode {
    setup_logging();

    let cli = Cli::parse();
    debug!(version = env!("CARGO_PKG_VERSION"), "starting sslcache-ctl");

    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
