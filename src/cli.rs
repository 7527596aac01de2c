//! Command-line interface definitions using clap.

use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use std::time::Duration;
use transpool::config::{
    DEFAULT_LATENCY_WINDOW, DEFAULT_MAX_CPU_PERCENT, DEFAULT_MAX_RAM_PERCENT,
    DEFAULT_QUEUE_CAPACITY, SchedulerConfig,
};
use transpool::error::TranspoolError;
use transpool::logging::{LogConfig, LogFormat, parse_level};
use transpool::translate::TranslatorSpec;
use transpool::version;

/// Route translation jobs onto CPU-pinned worker processes.
#[derive(Parser, Debug)]
#[command(name = "transpool")]
#[command(author, about, long_about = None)]
#[command(version = version::clap_version(), long_version = version::long_version())]
pub struct Cli {
    /// More log output (-v for debug, -vv for trace).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Only log errors.
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Log level: error, warn, info, debug, trace.
    #[arg(long, global = true, value_parser = parse_level_arg)]
    pub log_level: Option<tracing::Level>,

    /// Log format: pretty, compact, json.
    #[arg(long, global = true)]
    pub log_format: Option<LogFormat>,

    /// Disable colored output.
    #[arg(long, global = true, env = "NO_COLOR")]
    pub no_color: bool,

    #[command(subcommand)]
    pub command: Commands,
}

fn parse_level_arg(s: &str) -> Result<tracing::Level, String> {
    parse_level(s).ok_or_else(|| format!("unknown log level '{}'", s))
}

/// Available subcommands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Read jobs from stdin, one per line, and write replies to stdout.
    Run(RunArgs),

    /// Print one resource snapshot.
    Probe(ProbeArgs),

    /// Generate shell completions.
    Completions(CompletionsArgs),

    /// Worker process entry point (spawned by `run`).
    #[command(hide = true)]
    Worker(WorkerArgs),
}

/// Arguments for shell completions.
#[derive(Parser, Debug)]
pub struct CompletionsArgs {
    /// Shell to generate completions for.
    #[arg(value_enum)]
    pub shell: Shell,
}

impl CompletionsArgs {
    /// Generate and print completions to stdout.
    pub fn generate(&self) {
        clap_complete::generate(
            self.shell,
            &mut Cli::command(),
            "transpool",
            &mut std::io::stdout(),
        );
    }
}

/// How workers are run.
#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum WorkerMode {
    /// One `transpool worker` subprocess per queue.
    #[default]
    Process,
    /// One thread per queue inside this process.
    Thread,
}

/// Which translation engine workers use.
#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TranslatorKind {
    /// Return the input unchanged.
    #[default]
    Echo,
    /// Pipe each job through an external program.
    Command,
}

/// Translator selection, shared by `run` and `worker`.
#[derive(clap::Args, Debug, Clone)]
pub struct TranslatorArgs {
    /// Translation engine.
    #[arg(long, value_enum, env = "TRANSPOOL_TRANSLATOR", default_value_t = TranslatorKind::Echo)]
    pub translator: TranslatorKind,

    /// Program run by the command translator, e.g. argos-translate.
    #[arg(long, env = "TRANSPOOL_TRANSLATOR_PROGRAM")]
    pub translator_program: Option<String>,

    /// Argument for the translator program (repeatable).
    #[arg(long = "translator-arg", allow_hyphen_values = true)]
    pub translator_args: Vec<String>,
}

impl TranslatorArgs {
    pub fn to_spec(&self) -> Result<TranslatorSpec, TranspoolError> {
        match self.translator {
            TranslatorKind::Echo => Ok(TranslatorSpec::Echo),
            TranslatorKind::Command => {
                let program = self.translator_program.clone().ok_or_else(|| {
                    TranspoolError::Config(
                        "--translator command requires --translator-program".into(),
                    )
                })?;
                Ok(TranslatorSpec::Command {
                    program,
                    args: self.translator_args.clone(),
                })
            }
        }
    }
}

/// Arguments for the run command.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Per-core CPU percent at or above which a queue gets no new jobs.
    #[arg(long, env = "TRANSPOOL_MAX_CPU_PERCENT", default_value_t = DEFAULT_MAX_CPU_PERCENT)]
    pub max_cpu_percent: f64,

    /// System memory percent at or above which jobs are rejected.
    #[arg(long, env = "TRANSPOOL_MAX_RAM_PERCENT", default_value_t = DEFAULT_MAX_RAM_PERCENT)]
    pub max_ram_percent: f64,

    /// Completions kept for the rolling latency mean.
    #[arg(long, env = "TRANSPOOL_LATENCY_WINDOW", default_value_t = DEFAULT_LATENCY_WINDOW)]
    pub latency_window: usize,

    /// In-flight jobs per queue.
    #[arg(long, env = "TRANSPOOL_QUEUE_CAPACITY", default_value_t = DEFAULT_QUEUE_CAPACITY)]
    pub queue_capacity: u32,

    /// Cores available for queues [default: detected].
    #[arg(long, env = "TRANSPOOL_CORES")]
    pub cores: Option<usize>,

    /// Seconds before an unanswered job is failed [default: never].
    #[arg(long, env = "TRANSPOOL_JOB_TIMEOUT")]
    pub job_timeout: Option<u64>,

    /// Seconds to wait before health checks start.
    #[arg(long, env = "TRANSPOOL_STARTUP_DELAY", default_value_t = 25)]
    pub startup_delay: u64,

    /// Milliseconds between health checks.
    #[arg(long, env = "TRANSPOOL_HEALTH_CHECK_INTERVAL_MS", default_value_t = 1000)]
    pub health_check_interval_ms: u64,

    /// Milliseconds between CPU/RAM samples for the metrics.
    #[arg(long, env = "TRANSPOOL_STATS_INTERVAL_MS", default_value_t = 500)]
    pub stats_interval_ms: u64,

    /// Milliseconds a worker sleeps when it has nothing to do.
    #[arg(long, env = "TRANSPOOL_WORKER_IDLE_MS", default_value_t = 100)]
    pub worker_idle_ms: u64,

    /// Seconds to wait for outstanding jobs after stdin closes.
    #[arg(long, default_value_t = 30)]
    pub drain_timeout: u64,

    /// Run workers as subprocesses or threads.
    #[arg(long, value_enum, env = "TRANSPOOL_WORKER_MODE", default_value_t = WorkerMode::Process)]
    pub worker_mode: WorkerMode,

    #[command(flatten)]
    pub translator: TranslatorArgs,
}

impl RunArgs {
    /// Build the scheduler configuration. Validation happens in the coordinator.
    pub fn to_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            max_cpu_percent: self.max_cpu_percent,
            max_ram_percent: self.max_ram_percent,
            latency_window: self.latency_window,
            queue_capacity: self.queue_capacity,
            cores: self.cores,
            job_timeout: self.job_timeout.map(Duration::from_secs),
            startup_delay: Duration::from_secs(self.startup_delay),
            health_check_interval: Duration::from_millis(self.health_check_interval_ms),
            stats_interval: Duration::from_millis(self.stats_interval_ms),
            worker_idle: Duration::from_millis(self.worker_idle_ms),
        }
    }
}

/// Arguments for the probe command.
#[derive(Parser, Debug)]
pub struct ProbeArgs {
    /// Print JSON instead of text.
    #[arg(long)]
    pub json: bool,

    /// CPU sampling window in milliseconds.
    #[arg(long, default_value_t = 200)]
    pub sample_ms: u64,
}

/// Arguments for the hidden worker command.
#[derive(Parser, Debug)]
pub struct WorkerArgs {
    /// Core to pin to.
    #[arg(long)]
    pub core: usize,

    /// Milliseconds to sleep when idle.
    #[arg(long, default_value_t = 100)]
    pub idle_ms: u64,

    #[command(flatten)]
    pub translator: TranslatorArgs,
}

impl Cli {
    /// Logging configuration from flags, then the environment.
    ///
    /// Flags win over environment variables.
    pub fn log_config(&self) -> LogConfig {
        let mut config = if matches!(self.command, Commands::Worker(_)) {
            LogConfig::for_worker()
        } else {
            LogConfig::default()
        };

        let level = if let Some(level) = self.log_level {
            Some(level)
        } else if self.quiet {
            Some(tracing::Level::ERROR)
        } else {
            match self.verbose {
                0 => None,
                1 => Some(tracing::Level::DEBUG),
                _ => Some(tracing::Level::TRACE),
            }
        };
        if let Some(level) = level {
            // Setting a filter keeps env vars from overriding the flag
            config = config.with_filter(level.to_string().to_lowercase());
        }

        config = config.with_env_overrides();
        if let Some(format) = self.log_format {
            config = config.with_format(format);
        }
        config
    }
}
