//! Nagios-style command line of the probe binaries.
//!
//! The fixed flags are a clap derive; the `--<mode>` flags come from the
//! metric catalog of the probe's family.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Arg, ArgAction, ArgGroup, CommandFactory, FromArgMatches, Parser};
use color_eyre::{
    eyre::{bail, eyre},
    Report,
};

use crate::check::Mode;
use crate::config_file::Config;
use crate::metric::{Family, TIME_TO_CONNECT};
use crate::mssql::{ConnectionSettings, DEFAULT_TIMEOUT};
use crate::range::Thresholds;
use crate::rate::Scope;

const STATE_DIR_ENV: &str = "CHECK_MSSQL_STATE_DIR";
const TEST_MODE: &str = "test";

#[derive(Parser, Debug, Clone, Default, PartialEq)]
#[command(disable_help_flag = true, disable_version_flag = true)]
pub struct Args {
    #[arg(short = 'H', long, value_name = "HOST", help = "SQL Server address")]
    pub hostname: Option<String>,
    #[arg(short = 'U', long, help = "SQL Server login")]
    pub user: Option<String>,
    #[arg(short = 'P', long, help = "SQL Server password")]
    pub password: Option<String>,
    #[arg(short = 'I', long, help = "Named instance (not with --port)")]
    pub instance: Option<String>,
    #[arg(short, long, help = "TCP port (not with --instance)")]
    pub port: Option<u16>,
    #[arg(short = 'T', long, value_name = "DATABASE", help = "Database to check")]
    pub table: Option<String>,
    #[arg(short, long, value_name = "RANGE", allow_hyphen_values = true, help = "Warning range (N, N:, ~:N, N:M or @N:M)")]
    pub warning: Option<String>,
    #[arg(short, long, value_name = "RANGE", allow_hyphen_values = true, help = "Critical range")]
    pub critical: Option<String>,
    #[arg(long, help = "Lower values are worse")]
    pub invert: bool,
    #[arg(short, long, value_name = "SECONDS", value_parser = parse_timeout, help = "Connect and query timeout")]
    pub timeout: Option<Duration>,
    #[arg(short = 'C', long, value_name = "FILE", help = "TOML file with connection defaults")]
    pub config: Option<PathBuf>,
    #[arg(long, value_name = "DIR", help = "Where rate metrics keep their previous samples")]
    pub state_dir: Option<PathBuf>,
    #[arg(long, help = "Accept the server certificate without validation")]
    pub trust_cert: bool,
    #[arg(short, long, action = ArgAction::Count, help = "Log to stderr (repeat for more)")]
    pub verbose: u8,
    #[arg(short, long, help = "Print this help")]
    pub help: bool,
    #[arg(short = 'V', long, help = "Print the version")]
    pub version: bool,
    #[arg(skip)]
    pub mode: Option<String>,
}

fn parse_timeout(secs: &str) -> Result<Duration, String> {
    match secs.parse::<u64>() {
        Ok(0) => Err("timeout must be at least one second".to_owned()),
        Ok(secs) => Ok(Duration::from_secs(secs)),
        Err(e) => Err(format!("expected whole seconds: {e}")),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Help,
    Version,
    Run(Args),
}

fn program(family: Family) -> &'static str {
    match family {
        Family::Server => "check_mssql_server",
        Family::Database => "check_mssql_database",
    }
}

fn mode_ids(family: Family) -> impl Iterator<Item = &'static str> {
    family
        .metrics()
        .iter()
        .map(|metric| metric.id)
        .chain([TEST_MODE])
}

/// The clap command of a probe of `family`.
pub fn command(family: Family) -> clap::Command {
    let name = program(family);
    let table = match family {
        Family::Server => "",
        Family::Database => " -T <DATABASE>",
    };
    let mut cmd = Args::command()
        .name(name)
        .about("Nagios plugin checking SQL Server health")
        .override_usage(format!(
            "{name} -H <HOST> -U <USER> -P <PASS>{table} [OPTIONS] --<MODE>"
        ))
        .group(ArgGroup::new("mode").multiple(false))
        .next_help_heading("Modes");
    if family == Family::Server {
        cmd = cmd.mut_arg("table", |arg| arg.hide(true));
    }
    for metric in family.metrics() {
        cmd = cmd.arg(
            Arg::new(metric.id)
                .long(metric.id)
                .help(metric.help)
                .action(ArgAction::SetTrue)
                .group("mode"),
        );
    }
    cmd.arg(
        Arg::new(TEST_MODE)
            .long(TEST_MODE)
            .help("Run every query once")
            .action(ArgAction::SetTrue)
            .group("mode"),
    )
}

/// Parse `args` (without the program name) for a probe of `family`.
pub fn parse(family: Family, args: impl IntoIterator<Item = String>) -> Result<Command, Report> {
    let argv = std::iter::once(program(family).to_owned()).chain(args);
    let matches = command(family).try_get_matches_from(argv)?;
    let mut parsed = Args::from_arg_matches(&matches)?;

    if parsed.help {
        return Ok(Command::Help);
    }
    if parsed.version {
        return Ok(Command::Version);
    }
    if family == Family::Server && parsed.table.is_some() {
        bail!("--table only applies to {} checks", Family::Database);
    }
    parsed.mode = mode_ids(family)
        .find(|id| matches.get_flag(id))
        .map(str::to_owned);
    Ok(Command::Run(parsed))
}

pub fn usage(family: Family) -> String {
    command(family).render_help().to_string()
}

/// A fully resolved probe run.
#[derive(Debug, Clone, PartialEq)]
pub struct Invocation {
    pub family: Family,
    pub connection: ConnectionSettings,
    pub database: String,
    pub scope: Scope,
    pub thresholds: Thresholds,
    pub mode: Mode,
    pub state_dir: PathBuf,
    pub verbose: u8,
}

impl Args {
    /// Merge with the config file and validate. Threshold specs are parsed
    /// here so a bad one fails before any connection is attempted.
    pub fn resolve(self, family: Family, config: Config) -> Result<Invocation, Report> {
        let thresholds = Thresholds::parse(self.warning.as_deref(), self.critical.as_deref())?
            .with_invert(self.invert);

        let conn = config.connection;
        let timeout = match self.timeout {
            Some(timeout) => timeout,
            None => conn.timeout()?.unwrap_or(DEFAULT_TIMEOUT),
        };
        if timeout.is_zero() {
            bail!("timeout must be greater than zero");
        }

        let host = self.hostname.or(conn.host);
        let user = self.user.or(conn.user);
        let password = self.password.or(conn.password);
        let (Some(host), Some(user), Some(password)) = (host, user, password) else {
            bail!("hostname, user and password are required options");
        };

        // an instance or port given on the command line replaces both from the file
        let (instance, port) = if self.instance.is_some() || self.port.is_some() {
            (self.instance, self.port)
        } else {
            (conn.instance, conn.port)
        };
        if instance.is_some() && port.is_some() {
            bail!("cannot specify both instance and port");
        }

        let (database, scope) = match family {
            Family::Server => ("master".to_owned(), Scope::Server),
            Family::Database => {
                let Some(table) = self.table.filter(|t| !t.is_empty()) else {
                    bail!("table is a required option");
                };
                (table.clone(), Scope::Database(table))
            }
        };

        let mode = match self.mode.as_deref() {
            None => Mode::Metric(&TIME_TO_CONNECT),
            Some(TEST_MODE) => Mode::Test,
            Some(id) => Mode::Metric(
                family
                    .find(id)
                    .ok_or_else(|| eyre!("unknown {family} mode {id:?}"))?,
            ),
        };

        let state_dir = self
            .state_dir
            .or_else(|| std::env::var_os(STATE_DIR_ENV).map(PathBuf::from))
            .or(config.state.dir)
            .unwrap_or_else(|| std::env::temp_dir().join("check-mssql"));

        Ok(Invocation {
            family,
            connection: ConnectionSettings {
                host,
                port,
                instance,
                user,
                password,
                trust_cert: self.trust_cert || conn.trust_cert.unwrap_or(false),
                timeout,
            },
            database,
            scope,
            thresholds,
            mode,
            state_dir,
            verbose: self.verbose,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metric::Kind;

    fn args(line: &str) -> Vec<String> {
        line.split_whitespace().map(str::to_owned).collect()
    }

    fn run_args(family: Family, line: &str) -> Args {
        match parse(family, args(line)).unwrap() {
            Command::Run(a) => a,
            other => panic!("expected Run, got: {other:?}"),
        }
    }

    #[test]
    fn command_is_well_formed() {
        command(Family::Server).debug_assert();
        command(Family::Database).debug_assert();
    }

    #[test]
    fn parses_server_flags() {
        let a = run_args(
            Family::Server,
            "-H db01 -U nagios -P secret -p 1433 -w 80 -c 90 -t 5 --pagereads -v -v",
        );
        assert_eq!(a.hostname.as_deref(), Some("db01"));
        assert_eq!(a.port, Some(1433));
        assert_eq!(a.warning.as_deref(), Some("80"));
        assert_eq!(a.critical.as_deref(), Some("90"));
        assert_eq!(a.timeout, Some(Duration::from_secs(5)));
        assert_eq!(a.mode.as_deref(), Some("pagereads"));
        assert_eq!(a.verbose, 2);
    }

    #[test]
    fn negative_ranges_are_values() {
        let a = run_args(Family::Server, "-w -5:10 -c @-1:1 --connections");
        assert_eq!(a.warning.as_deref(), Some("-5:10"));
        assert_eq!(a.critical.as_deref(), Some("@-1:1"));
    }

    #[test]
    fn help_and_version() {
        assert_eq!(parse(Family::Server, args("-H x --help")).unwrap(), Command::Help);
        assert_eq!(parse(Family::Database, args("-V")).unwrap(), Command::Version);
        let help = usage(Family::Database);
        assert!(help.contains("--logflushes"), "{help}");
        assert!(help.contains("--table"), "{help}");
        assert!(!usage(Family::Server).contains("--table"));
    }

    #[test]
    fn rejects_bad_arguments() {
        assert!(parse(Family::Server, args("--pagereads --cachehit")).is_err());
        assert!(parse(Family::Server, args("--logflushes")).is_err());
        assert!(parse(Family::Server, args("-T sales")).is_err());
        assert!(parse(Family::Server, args("-H")).is_err());
        assert!(parse(Family::Server, args("-p 99999")).is_err());
        assert!(parse(Family::Server, args("-t soon")).is_err());
        assert!(parse(Family::Server, args("stray")).is_err());
    }

    #[test]
    fn rejects_zero_timeout() {
        assert!(parse(Family::Server, args("-t 0")).is_err());

        let config = crate::parse_config_str("[connection]\ntimeout = \"0s\"").unwrap();
        let err = run_args(Family::Server, "-H db01 -U u -P p")
            .resolve(Family::Server, config)
            .unwrap_err();
        assert!(err.to_string().contains("timeout"), "{err}");
    }

    #[test]
    fn resolves_defaults() {
        let inv = run_args(Family::Server, "-H db01 -U nagios -P secret")
            .resolve(Family::Server, Config::default())
            .unwrap();
        assert_eq!(inv.mode, Mode::Metric(&TIME_TO_CONNECT));
        assert_eq!(inv.scope, Scope::Server);
        assert_eq!(inv.database, "master");
        assert_eq!(inv.connection.timeout, DEFAULT_TIMEOUT);
        assert_eq!(inv.thresholds, Thresholds::default());
    }

    #[test]
    fn resolves_database_scope() {
        let inv = run_args(Family::Database, "-H db01 -U u -P p -T sales --logflushes --invert")
            .resolve(Family::Database, Config::default())
            .unwrap();
        assert_eq!(inv.scope, Scope::Database("sales".into()));
        assert_eq!(inv.database, "sales");
        assert!(inv.thresholds.invert);
        match inv.mode {
            Mode::Metric(m) => assert!(matches!(m.kind, Kind::Rate(_))),
            Mode::Test => panic!("expected a metric mode"),
        }
        assert!(inv.mode.needs_state());
    }

    #[test]
    fn database_probe_requires_table() {
        let err = run_args(Family::Database, "-H db01 -U u -P p --logflushes")
            .resolve(Family::Database, Config::default())
            .unwrap_err();
        assert!(err.to_string().contains("table"));
    }

    #[test]
    fn config_fills_in_and_flags_win() {
        let config = crate::parse_config_str(
            r#"
[connection]
host = "db01"
user = "nagios"
password = "from-file"
instance = "SQLEXPRESS"
timeout = "30s"
"#,
        )
        .unwrap();
        let inv = run_args(Family::Server, "-P from-flag --test")
            .resolve(Family::Server, config.clone())
            .unwrap();
        assert_eq!(inv.connection.host, "db01");
        assert_eq!(inv.connection.password, "from-flag");
        assert_eq!(inv.connection.instance.as_deref(), Some("SQLEXPRESS"));
        assert_eq!(inv.connection.timeout, Duration::from_secs(30));
        assert_eq!(inv.mode, Mode::Test);

        let inv = run_args(Family::Server, "-p 1500")
            .resolve(Family::Server, config)
            .unwrap();
        assert_eq!(inv.connection.instance, None);
        assert_eq!(inv.connection.port, Some(1500));
    }

    #[test]
    fn rejects_instance_and_port() {
        let err = run_args(Family::Server, "-H a -U b -P c -I X -p 1")
            .resolve(Family::Server, Config::default())
            .unwrap_err();
        assert!(err.to_string().contains("instance and port"));
    }

    #[test]
    fn missing_credentials() {
        assert!(run_args(Family::Server, "-H db01")
            .resolve(Family::Server, Config::default())
            .is_err());
    }

    #[test]
    fn bad_threshold_fails_before_anything_else() {
        let err = run_args(Family::Server, "-w nope")
            .resolve(Family::Server, Config::default())
            .unwrap_err();
        assert!(err.to_string().contains("nope"), "{err}");
    }
}
