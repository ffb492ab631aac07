//! One probe invocation from argv to the plugin line and exit code.

use color_eyre::{eyre::WrapErr, Report};
use tracing_subscriber::EnvFilter;

use crate::check::{Check, Mode};
use crate::cli::{self, Command, Invocation};
use crate::config_file::{parse_config, Config};
use crate::error::ProbeError;
use crate::metric::Family;
use crate::mssql::MssqlProbe;
use crate::status::UNKNOWN_EXIT_CODE;
use crate::store::{MemoryStore, SampleStore, SqliteStore};

pub const LOG_ENV: &str = "CHECK_MSSQL_LOG";

/// What to print on stdout and how to exit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub text: String,
    pub exit_code: i32,
}

/// Log to stderr; stdout carries the plugin line.
pub fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(default));
    // a second init (tests) keeps the first subscriber
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

pub fn run(family: Family, args: impl IntoIterator<Item = String>) -> Result<Verdict, Report> {
    let args = match cli::parse(family, args)? {
        Command::Help => {
            return Ok(Verdict {
                text: cli::usage(family),
                exit_code: UNKNOWN_EXIT_CODE,
            })
        }
        Command::Version => {
            return Ok(Verdict {
                text: format!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION")),
                exit_code: UNKNOWN_EXIT_CODE,
            })
        }
        Command::Run(args) => args,
    };
    init_tracing(args.verbose);

    let config = match &args.config {
        Some(path) => parse_config(path)?,
        None => Config::default(),
    };
    let invocation = args.resolve(family, config)?;
    tracing::debug!(mode = ?invocation.mode, target = %invocation.connection.target(), "resolved invocation");

    let store: Box<dyn SampleStore> = if invocation.mode.needs_state() {
        Box::new(SqliteStore::open_dir(&invocation.state_dir).map_err(ProbeError::from)?)
    } else {
        Box::new(MemoryStore::new())
    };

    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .wrap_err("building tokio runtime")?;
    rt.block_on(run_mode(invocation, store))
}

/// Connect and run the invocation's mode.
pub async fn run_mode<S: SampleStore>(invocation: Invocation, store: S) -> Result<Verdict, Report> {
    let mut probe = MssqlProbe::connect(&invocation.connection, &invocation.database).await?;
    let mut check = Check::new(
        probe.target(),
        invocation.scope,
        invocation.thresholds,
        store,
    );

    match invocation.mode {
        Mode::Metric(metric) => {
            let outcome = check.run(&mut probe, metric).await?;
            Ok(Verdict {
                text: outcome.to_string(),
                exit_code: outcome.exit_code(),
            })
        }
        Mode::Test => {
            let report = check.run_all(&mut probe, invocation.family).await;
            Ok(Verdict {
                text: report.to_string(),
                exit_code: report.exit_code(),
            })
        }
    }
}

/// Entry point shared by the binaries. Every error becomes an UNKNOWN line.
pub fn main_for(family: Family) -> i32 {
    let verdict = run(family, std::env::args().skip(1)).unwrap_or_else(|err| Verdict {
        text: format!("UNKNOWN: {err:#}"),
        exit_code: UNKNOWN_EXIT_CODE,
    });
    println!("{}", verdict.text);
    verdict.exit_code
}
