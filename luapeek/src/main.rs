use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use luapeek_core::{BindState, Dumper, Seen, Session, Value, DEFAULT_MAX_DEPTH};
use luapeek_pine::{Pine, Stream};

use crate::config::{Config, Connection};

mod config;

type Target = Pine<Box<dyn Stream>>;

const MAX_BACKOFF: Duration = Duration::from_secs(30);

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// TOML file with connection, layout and session settings
    #[clap(short, long)]
    config: Option<PathBuf>,
    /// PINE Unix socket
    #[clap(long)]
    socket: Option<PathBuf>,
    /// PINE TCP endpoint, `host:port`
    #[clap(long, conflicts_with = "socket")]
    tcp: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the identification strings of the running game
    Info,
    /// Dump the execution context, or the object tree under one global
    Dump {
        global: Option<String>,
        /// Nesting below which objects print as `...`
        #[clap(long, default_value_t = DEFAULT_MAX_DEPTH)]
        max_depth: usize,
    },
    /// Disassemble a global function
    Disasm { global: String },
    /// Print a global every time its value changes
    Watch {
        global: String,
        /// Seconds between polls
        #[clap(short, long, default_value_t = 1.0)]
        interval: f64,
    },
}

fn connect(connection: &Connection) -> Result<Target> {
    if let Some(addr) = &connection.tcp {
        let pine = Pine::connect_tcp(addr.as_str()).with_context(|| format!("connecting to {}", addr))?;
        let stream: Box<dyn Stream> = Box::new(pine.into_inner());
        return Ok(Pine::new(stream));
    }
    connect_socket(connection)
}

#[cfg(unix)]
fn connect_socket(connection: &Connection) -> Result<Target> {
    let path = connection.socket_path();
    let pine = Pine::connect_unix(&path).with_context(|| format!("connecting to {}", path.display()))?;
    let stream: Box<dyn Stream> = Box::new(pine.into_inner());
    Ok(Pine::new(stream))
}

#[cfg(not(unix))]
fn connect_socket(_connection: &Connection) -> Result<Target> {
    bail!("Unix sockets are unavailable here; pass --tcp")
}

fn bound_state(session: &mut Session<Target>) -> Result<u32> {
    session.validate().context("target is not ready")?;
    match session.state() {
        BindState::Bound { state } => Ok(state),
        BindState::Uninitialized => bail!("session did not bind"),
    }
}

fn dump(session: &mut Session<Target>, global: Option<&str>, max_depth: usize) -> Result<()> {
    let state = bound_state(session)?;
    let mut snap = session.snapshot();
    let thread_obj = snap.thread(state)?;
    let Some(thread) = thread_obj.as_thread() else {
        bail!("execution context ${:08X} is not a thread", state);
    };

    let names = thread.function_names(&mut snap)?;
    let text = match global {
        Some(name) => {
            let Some(handle) = thread.global(&mut snap, name)? else {
                bail!("no global named {:?}", name);
            };
            let value = handle.read(&mut snap)?;
            println!("{}: {}", name, value);
            let seen = thread.initial_seen(&mut snap)?;
            let mut dumper = Dumper::new(&mut snap, seen)
                .with_names(names)
                .with_max_depth(max_depth);
            dumper.value(&value, "  ")?;
            dumper.finish()
        }
        None => {
            println!("{}", Value::Object(thread_obj.clone()));
            let mut dumper = Dumper::new(&mut snap, Seen::new())
                .with_names(names)
                .with_max_depth(max_depth);
            dumper.object(&thread_obj, "  ")?;
            dumper.finish()
        }
    };
    print!("{}", text);
    Ok(())
}

fn disasm(session: &mut Session<Target>, name: &str) -> Result<()> {
    let handle = session.global(name).with_context(|| format!("looking up {}", name))?;
    let mut snap = session.snapshot();
    let value = handle.read(&mut snap)?;
    let Some(closure) = value.as_closure() else {
        bail!("{} is {}, not a function", name, value);
    };

    let lines = closure.disassemble(&mut snap)?;
    println!("{} ({} instructions)", value, lines.len());
    for (pc, line) in lines.iter().enumerate() {
        println!("  {:03} {}", pc, line);
    }
    Ok(())
}

fn poll(session: &mut Session<Target>, name: &str) -> luapeek_core::Result<String> {
    let handle = session.global(name)?;
    let mut snap = session.snapshot();
    Ok(handle.read(&mut snap)?.to_string())
}

fn watch(config: &Config, session: &mut Session<Target>, name: &str, interval: Duration) -> Result<()> {
    let mut last: Option<String> = None;
    let mut backoff = interval;

    loop {
        match poll(session, name) {
            Ok(text) => {
                backoff = interval;
                if last.as_deref() != Some(text.as_str()) {
                    println!("{}: {}", name, text);
                    last = Some(text);
                }
                thread::sleep(interval);
            }
            Err(e) if e.is_recoverable() => {
                log::warn!("{}; retrying in {:?}", e, backoff);
                thread::sleep(backoff);
                backoff = (backoff * 2).min(MAX_BACKOFF);

                if let luapeek_core::Error::Transport(_) = e {
                    match connect(&config.connection) {
                        Ok(target) => {
                            log::info!("reconnected");
                            *session = Session::new(target, config.layout.clone(), config.session.clone());
                        }
                        Err(e) => log::warn!("reconnect failed: {:#}", e),
                    }
                }
            }
            Err(e) => return Err(e.into()),
        }
    }
}

fn run(args: Args) -> Result<()> {
    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    if let Some(socket) = args.socket {
        config.connection.socket = Some(socket);
        config.connection.tcp = None;
    }
    if let Some(tcp) = args.tcp {
        config.connection.tcp = Some(tcp);
    }

    let mut target = connect(&config.connection)?;
    if let Command::Info = args.command {
        let info = target.identify()?;
        println!("title:   {}", info.title);
        println!("id:      {}", info.id);
        println!("uuid:    {}", info.uuid);
        println!("version: {}", info.version);
        return Ok(());
    }

    let mut session = Session::new(target, config.layout.clone(), config.session.clone());
    match args.command {
        Command::Info => Ok(()),
        Command::Dump { global, max_depth } => dump(&mut session, global.as_deref(), max_depth),
        Command::Disasm { global } => disasm(&mut session, &global),
        Command::Watch { global, interval } => {
            if !(interval.is_finite() && interval > 0.0) {
                bail!("interval must be a positive number of seconds");
            }
            watch(&config, &mut session, &global, Duration::from_secs_f64(interval))
        }
    }
}

fn main() {
    env_logger::init();
    let args = Args::parse();
    if let Err(e) = run(args) {
        log::error!("Error: {:#}", e);
        std::process::exit(1);
    }
}
