//! pgprobe - PostgreSQL health checks for Nagios-compatible pollers.
//!
//! Runs one check against a server and prints a single status line
//! (`POSTGRES_<CHECK> <SEVERITY>: <message> | <perfdata>`). The exit code is
//! the severity (0 OK, 1 WARNING, 2 CRITICAL, 3 UNKNOWN), or 127 for usage
//! errors.

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;
#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

use std::path::PathBuf;
use std::process::ExitCode;

use chrono::Utc;
use clap::Parser;
use tracing::{Level, debug, error};
use tracing_subscriber::EnvFilter;

use pgprobe_core::check::{self, Capabilities, USAGE_EXIT_CODE};
use pgprobe_core::query::{ConnectionSettings, PgExecutor};
use pgprobe_core::{CheckError, CheckId, CheckResult, CheckSettings, Severity};

/// PostgreSQL health checks.
#[derive(Parser)]
#[command(name = "pgprobe", about = "PostgreSQL health checks", version)]
struct Args {
    /// Check to run (see --list).
    #[arg(short, long, value_parser = parse_check, required_unless_present = "list")]
    service: Option<CheckId>,

    /// Warning threshold (e.g. "90%", "5m", "1GB", "1MB,5MB").
    #[arg(short, long)]
    warning: Option<String>,

    /// Critical threshold.
    #[arg(short, long)]
    critical: Option<String>,

    /// Status file keeping observations between runs (delta/rate checks).
    #[arg(long, value_name = "PATH", env = "PGPROBE_STATUS_FILE")]
    status_file: Option<PathBuf>,

    /// WAL archive directory (archive_folder).
    #[arg(long, value_name = "DIR")]
    path: Option<PathBuf>,

    /// Suffix of archived WAL files, e.g. ".gz" (archive_folder).
    #[arg(long)]
    suffix: Option<String>,

    /// Comma-separated standbys that must be connected, as application names or
    /// `name@client_addr` (streaming_delta).
    #[arg(long, value_delimiter = ',')]
    slave: Vec<String>,

    /// Regex of standby names to ignore when --slave is not given (streaming_delta).
    #[arg(long, value_name = "REGEX")]
    exclude: Option<String>,

    /// Database server host. Overrides PGHOST.
    #[arg(short = 'H', long)]
    host: Option<String>,

    /// Database server port. Overrides PGPORT.
    #[arg(short, long)]
    port: Option<u16>,

    /// Database user. Overrides PGUSER.
    #[arg(short = 'U', long)]
    username: Option<String>,

    /// Database name. Overrides PGDATABASE.
    #[arg(short, long)]
    dbname: Option<String>,

    /// List the checks supported by the server and exit.
    #[arg(long)]
    list: bool,

    /// Increase logging verbosity (-v for info, -vv for debug, -vvv for trace).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode - only show errors.
    #[arg(short, long)]
    quiet: bool,
}

fn parse_check(s: &str) -> Result<CheckId, String> {
    s.parse::<CheckId>().map_err(|e| {
        let names: Vec<&str> = CheckId::ALL.iter().map(|c| c.name()).collect();
        format!("{} (available: {})", e, names.join(", "))
    })
}

/// Initializes the tracing subscriber on stderr; stdout carries the status line only.
fn init_logging(verbose: u8, quiet: bool) {
    let level = if quiet {
        Level::ERROR
    } else {
        match verbose {
            0 => Level::WARN,
            1 => Level::INFO,
            2 => Level::DEBUG,
            _ => Level::TRACE,
        }
    };

    let mut filter = EnvFilter::from_default_env();
    for target in ["pgprobe", "pgprobe_core"] {
        if let Ok(directive) = format!("{}={}", target, level).parse() {
            filter = filter.add_directive(directive);
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

impl Args {
    fn check_settings(&self) -> CheckSettings {
        CheckSettings {
            warning: self.warning.clone(),
            critical: self.critical.clone(),
            status_file: self.status_file.clone(),
            archive_path: self.path.clone(),
            archive_suffix: self.suffix.clone(),
            standbys: self.slave.clone(),
            exclude: self.exclude.clone(),
        }
    }

    fn connection_settings(&self) -> Result<ConnectionSettings, CheckError> {
        let mut settings = ConnectionSettings::from_env()?;
        if let Some(host) = &self.host {
            settings.host = host.clone();
        }
        if let Some(port) = self.port {
            settings.port = port;
        }
        if let Some(user) = &self.username {
            settings.user = user.clone();
        }
        if let Some(dbname) = &self.dbname {
            settings.dbname = dbname.clone();
        }
        Ok(settings)
    }
}

fn exit_code(code: i32) -> ExitCode {
    ExitCode::from(u8::try_from(code).unwrap_or(3))
}

/// Reports a failure as an UNKNOWN status line, or as a usage error.
fn fail(check: Option<CheckId>, err: &CheckError) -> ExitCode {
    if err.is_usage() {
        eprintln!("pgprobe: {}", err);
        return exit_code(USAGE_EXIT_CODE);
    }
    error!(error = %err, "check failed");
    match check {
        Some(id) => println!("{}", CheckResult::new(id, Severity::Unknown, err.to_string())),
        None => println!("POSTGRES UNKNOWN: {}", err),
    }
    exit_code(err.exit_code())
}

fn list_checks(args: &Args) -> ExitCode {
    let connected = args
        .connection_settings()
        .and_then(|s| PgExecutor::connect(&s).map_err(CheckError::from));
    let mut executor = match connected {
        Ok(e) => e,
        Err(e) => return fail(None, &e),
    };
    match Capabilities::negotiate(&mut executor) {
        Ok(caps) => {
            for id in &caps.supported {
                println!("{}", id);
            }
            ExitCode::SUCCESS
        }
        Err(e) => fail(None, &e),
    }
}

fn main() -> ExitCode {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) => {
            let code = if e.use_stderr() { USAGE_EXIT_CODE } else { 0 };
            let _ = e.print();
            return exit_code(code);
        }
    };

    init_logging(args.verbose, args.quiet);

    if args.list {
        return list_checks(&args);
    }
    let Some(id) = args.service else {
        return fail(None, &CheckError::Config("--service is required".to_string()));
    };

    let settings = args.check_settings();
    let prepared = match check::prepare(id, &settings) {
        Ok(p) => p,
        Err(e) => return fail(Some(id), &e),
    };
    debug!(check = %id, thresholds = ?prepared.thresholds(), "check prepared");

    let connected = args
        .connection_settings()
        .and_then(|s| PgExecutor::connect(&s).map_err(CheckError::from));
    let mut executor = match connected {
        Ok(e) => e,
        Err(e) => return fail(Some(id), &e),
    };

    let outcome = Capabilities::negotiate(&mut executor)
        .and_then(|caps| prepared.run(&mut executor, &caps, &settings, Utc::now()));
    match outcome {
        Ok(result) => {
            println!("{}", result);
            exit_code(result.exit_code())
        }
        Err(e) => fail(Some(id), &e),
    }
}
