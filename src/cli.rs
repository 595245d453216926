//! CLI argument parsing for tracerec

use crate::session::{EventSelection, DEFAULT_OUTPUT, DEFAULT_POLL_USECS};
use clap::{ArgMatches, Args, CommandFactory, FromArgMatches, Parser, Subcommand};
use std::ffi::OsString;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "tracerec")]
#[command(version)]
#[command(about = "Record kernel trace buffers from every CPU into one archive", long_about = None)]
pub struct Cli {
    /// Enable debug tracing output (to stderr)
    #[arg(long = "debug", global = true)]
    pub debug: bool,

    /// Tracing directory to use instead of the discovered tracefs mount
    #[arg(long = "tracing-dir", value_name = "DIR", global = true)]
    pub tracing_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Record a trace, optionally while running a command
    Record(RecordArgs),
    /// Configure and enable tracing, then exit
    Start(StartArgs),
    /// Save the data of an already running trace
    Extract(ExtractArgs),
    /// Stop the tracer from recording more data
    Stop,
    /// Disable the tracer (may reset the trace)
    Reset,
    /// List available events, plugins and options
    List(ListArgs),
}

/// Event selection shared by `record` and `start`
#[derive(Args, Debug, Clone)]
pub struct EventArgs {
    /// Enable an event (repeatable; "all" selects every event)
    #[arg(short = 'e', value_name = "EVENT")]
    pub events: Vec<String>,

    /// Negate every -e that follows
    #[arg(short = 'v', action = clap::ArgAction::Count)]
    pub negate: u8,
}

/// Tracer selection shared by every capture command
#[derive(Args, Debug, Clone)]
pub struct PluginArgs {
    /// Tracer plugin to run
    #[arg(short = 'p', value_name = "PLUGIN")]
    pub plugin: Option<String>,

    /// Trace option to enable (or disable with a "no" prefix); repeatable
    #[arg(short = 'O', value_name = "OPTION")]
    pub options: Vec<String>,
}

#[derive(Args, Debug, Clone)]
pub struct RecordArgs {
    #[command(flatten)]
    pub events: EventArgs,

    #[command(flatten)]
    pub plugin: PluginArgs,

    /// Disable the function tracer while running
    #[arg(short = 'd')]
    pub disable_function_tracer: bool,

    /// Data output file
    #[arg(short = 'o', value_name = "FILE", default_value = DEFAULT_OUTPUT)]
    pub output: PathBuf,

    /// Sleep interval between recording passes, in microseconds
    #[arg(short = 's', value_name = "USECS", default_value_t = DEFAULT_POLL_USECS)]
    pub sleep_usecs: u64,

    /// Command to run while recording
    #[arg(trailing_var_arg = true, value_name = "COMMAND")]
    pub command: Vec<String>,
}

#[derive(Args, Debug, Clone)]
pub struct StartArgs {
    #[command(flatten)]
    pub events: EventArgs,

    #[command(flatten)]
    pub plugin: PluginArgs,

    /// Disable the function tracer while running
    #[arg(short = 'd')]
    pub disable_function_tracer: bool,
}

#[derive(Args, Debug, Clone)]
pub struct ExtractArgs {
    #[command(flatten)]
    pub plugin: PluginArgs,

    /// Data output file
    #[arg(short = 'o', value_name = "FILE", default_value = DEFAULT_OUTPUT)]
    pub output: PathBuf,
}

#[derive(Args, Debug, Clone)]
pub struct ListArgs {
    /// List available events
    #[arg(short = 'e')]
    pub events: bool,

    /// List available plugins
    #[arg(short = 'p')]
    pub plugins: bool,

    /// List available options
    #[arg(short = 'o')]
    pub options: bool,
}

/// Parsed command line plus the ordered event selections
#[derive(Debug)]
pub struct Invocation {
    pub cli: Cli,
    pub events: Vec<EventSelection>,
}

/// Resolve `-e` values against the position of the first `-v`
///
/// Every `-e` after the first `-v` is negated, regardless of how many `-v`
/// were given.
fn ordered_events(matches: &ArgMatches) -> Vec<EventSelection> {
    let Ok(Some(names)) = matches.try_get_many::<String>("events") else {
        return Vec::new();
    };
    let negate_from = matches
        .indices_of("negate")
        .and_then(|mut indices| indices.next())
        .unwrap_or(usize::MAX);
    let positions = matches.indices_of("events").into_iter().flatten();

    names
        .zip(positions)
        .map(|(name, position)| EventSelection {
            name: name.clone(),
            negated: position > negate_from,
        })
        .collect()
}

impl Invocation {
    pub fn try_parse_from<I, T>(args: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        let matches = Cli::command().try_get_matches_from(args)?;
        let cli = Cli::from_arg_matches(&matches)?;
        let events = match matches.subcommand() {
            Some(("record", sub)) | Some(("start", sub)) => ordered_events(sub),
            _ => Vec::new(),
        };
        Ok(Self { cli, events })
    }

    /// Parse `std::env::args_os`, exiting with usage on error
    pub fn parse() -> Self {
        Self::try_parse_from(std::env::args_os()).unwrap_or_else(|e| e.exit())
    }
}
