use anyhow::{Context, Result};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;
use tracerec::archive::ContainerWriter;
use tracerec::cli::{Commands, Invocation, ListArgs};
use tracerec::control::{Listing, TraceControl, Tracefs};
use tracerec::error::RecordError;
use tracerec::recorder::PerCpuPipes;
use tracerec::session::{self, CaptureSummary, EventSelection, Mode, SessionConfig};
use tracerec::worker::ForkSpawner;
use tracerec::{cpus, signals};
use tracing_subscriber::EnvFilter;

/// Initialize tracing subscriber for debug output
fn init_tracing(debug: bool) {
    if debug {
        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::from_default_env().add_directive(tracing::Level::TRACE.into()),
            )
            .with_writer(std::io::stderr)
            .init();
    }
}

/// Exit status for a fatal error: the underlying errno, or -1
fn exit_code_for(err: &anyhow::Error) -> i32 {
    for cause in err.chain() {
        if let Some(record) = cause.downcast_ref::<RecordError>() {
            if let Some(errno) = record.errno() {
                return errno;
            }
        }
        if let Some(io) = cause.downcast_ref::<std::io::Error>() {
            if let Some(errno) = io.raw_os_error() {
                return errno;
            }
        }
    }
    -1
}

fn open_tracefs(dir: Option<std::path::PathBuf>) -> Result<Tracefs> {
    let tracefs = match dir {
        Some(dir) => Tracefs::at(dir),
        None => Tracefs::discover()?,
    };
    tracing::debug!(root = %tracefs.root().display(), "using tracing dir");
    Ok(tracefs)
}

/// Print one catalogue, or all three with headings when none was requested
fn list(tracefs: &Tracefs, args: &ListArgs) -> Result<()> {
    let requested: Vec<Listing> = [
        (args.events, Listing::Events),
        (args.plugins, Listing::Plugins),
        (args.options, Listing::Options),
    ]
    .into_iter()
    .filter_map(|(wanted, listing)| wanted.then_some(listing))
    .collect();

    if requested.is_empty() {
        println!("events:");
        print!("{}", tracefs.read_listing(Listing::Events)?);
        println!("\nplugins:");
        print!("{}", tracefs.read_listing(Listing::Plugins)?);
        println!("\noptions:");
        print!("{}", tracefs.read_listing(Listing::Options)?);
    } else {
        for listing in requested {
            print!("{}", tracefs.read_listing(listing)?);
        }
    }
    Ok(())
}

fn print_buffer_stats(summary: &CaptureSummary) {
    println!("Buffer statistics:\n");
    for stats in &summary.stats {
        println!("CPU: {}", stats.cpu);
        if let Some(text) = &stats.text {
            print!("{}", text);
        }
        println!();
    }
}

fn capture(
    tracefs: Tracefs,
    mut config: SessionConfig,
    events: Vec<EventSelection>,
    plugin: Option<String>,
    options: Vec<String>,
) -> Result<()> {
    config.events = events;
    config.plugin = plugin;
    config.options = options;

    if config.mode != Mode::Extract && config.events.is_empty() && config.plugin.is_none() {
        anyhow::bail!("no event or plugin was specified... aborting");
    }
    if let Some(plugin) = &config.plugin {
        eprintln!("  plugin {}", plugin);
    }

    let finished = Arc::new(AtomicBool::new(false));
    signals::install_interrupt_handler(Arc::clone(&finished))
        .context("Failed to install interrupt handler")?;

    let spawner = ForkSpawner::new(PerCpuPipes::new(tracefs.clone()), config.poll_interval);
    let writer = ContainerWriter::new(tracefs.clone());

    let summary = session::run_session(&config, &tracefs, spawner, &writer, finished)?;
    if let Some(summary) = summary {
        for cpu in &summary.incomplete {
            eprintln!("[tracerec: CPU {} recorder failed, its capture may be incomplete]", cpu);
        }
        print_buffer_stats(&summary);
    }
    Ok(())
}

fn run(invocation: Invocation) -> Result<()> {
    let Invocation { cli, events } = invocation;
    let tracefs = open_tracefs(cli.tracing_dir)?;

    match cli.command {
        Commands::Record(args) => {
            let cpu_count = cpus::count_cpus()?;
            let mut config = SessionConfig::new(Mode::Record { command: args.command }, cpu_count);
            config.disable_function_tracer = args.disable_function_tracer;
            config.output = args.output;
            config.poll_interval = Duration::from_micros(args.sleep_usecs);
            capture(tracefs, config, events, args.plugin.plugin, args.plugin.options)
        }
        Commands::Start(args) => {
            let mut config = SessionConfig::new(Mode::Start, cpus::count_cpus()?);
            config.disable_function_tracer = args.disable_function_tracer;
            capture(tracefs, config, events, args.plugin.plugin, args.plugin.options)
        }
        Commands::Extract(args) => {
            let mut config = SessionConfig::new(Mode::Extract, cpus::count_cpus()?);
            config.output = args.output;
            capture(tracefs, config, Vec::new(), args.plugin.plugin, args.plugin.options)
        }
        Commands::Stop => Ok(tracefs.tracing_off()?),
        Commands::Reset => Ok(tracefs.disable_all()?),
        Commands::List(args) => list(&tracefs, &args),
    }
}

fn main() {
    let invocation = Invocation::parse();
    init_tracing(invocation.cli.debug);

    std::process::exit(match run(invocation) {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("tracerec: {:#}", e);
            exit_code_for(&e)
        }
    });
}
