use clap::Parser;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use querylens::config::{Config, LoggingConfig};
use querylens::services::query_analyzer::{
    DetectorEngine, ExecutionPlan, Severity, load_plan_file,
};
use querylens::utils::{AnalyzerError, AnalyzerResult};

/// Detect and rank performance anti-patterns in a SQL query
#[derive(Debug, Parser)]
#[command(name = "querylens", version, about)]
struct Cli {
    /// SQL file to analyze, or `-` to read from stdin
    #[arg(long)]
    sql: String,

    /// Execution plan as JSON; without it every finding is priced heuristically
    #[arg(long)]
    plan: Option<PathBuf>,

    /// Configuration file (defaults to conf/querylens.toml when present)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Least severe finding to report: critical, warning or info
    #[arg(long)]
    min_severity: Option<Severity>,

    /// Print single-line JSON
    #[arg(long)]
    compact: bool,
}

fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => return fail(&AnalyzerError::config(format!("{:#}", e))),
    };

    // Flushes the file layer on drop, so it lives until main returns.
    let _guard = match init_logging(&config.logging) {
        Ok(guard) => guard,
        Err(e) => return fail(&e),
    };
    tracing::debug!("Configuration loaded successfully");

    match run(&cli, &config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("Analysis failed: {}", e);
            fail(&e)
        },
    }
}

fn run(cli: &Cli, config: &Config) -> AnalyzerResult<()> {
    let sql = read_sql(&cli.sql)?;

    let plan = match &cli.plan {
        Some(path) => load_plan_file(path)?,
        None => {
            tracing::info!("No execution plan given, findings use heuristic costs");
            ExecutionPlan::new()
        },
    };

    let mut engine_config = config.engine_config();
    if let Some(severity) = cli.min_severity {
        engine_config.min_severity = severity;
    }

    let result = DetectorEngine::with_config(engine_config).analyze(&sql, &plan);

    let json = if cli.compact || !config.output.pretty {
        serde_json::to_string(&result)?
    } else {
        serde_json::to_string_pretty(&result)?
    };

    let mut stdout = std::io::stdout().lock();
    writeln!(stdout, "{}", json).map_err(|e| AnalyzerError::io("<stdout>", e))?;
    Ok(())
}

fn read_sql(source: &str) -> AnalyzerResult<String> {
    let sql = if source == "-" {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .map_err(|e| AnalyzerError::io("<stdin>", e))?;
        buf
    } else {
        std::fs::read_to_string(source).map_err(|e| AnalyzerError::io(source, e))?
    };

    if sql.trim().is_empty() {
        let name = if source == "-" { "<stdin>" } else { source };
        return Err(AnalyzerError::empty_sql(name));
    }
    Ok(sql)
}

fn fail(err: &AnalyzerError) -> ExitCode {
    match serde_json::to_string(&err.to_report()) {
        Ok(report) => eprintln!("{}", report),
        Err(_) => eprintln!("{}", err),
    }
    ExitCode::FAILURE
}

/// Console output goes to stderr so stdout carries only the JSON result.
fn init_logging(logging: &LoggingConfig) -> AnalyzerResult<Option<WorkerGuard>> {
    let log_filter = tracing_subscriber::EnvFilter::new(&logging.level);
    let registry = tracing_subscriber::registry().with(log_filter);

    let Some(log_file) = &logging.file else {
        registry.with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr)).init();
        return Ok(None);
    };

    let log_path = Path::new(log_file);
    let log_dir = log_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(log_dir)
        .map_err(|e| AnalyzerError::io(log_dir.display().to_string(), e))?;

    let file_name = log_path.file_name().and_then(|n| n.to_str()).unwrap_or("querylens.log");
    // Rolling appender adds a date suffix
    let file_prefix = file_name.strip_suffix(".log").unwrap_or(file_name);

    let file_appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(file_prefix)
        .build(log_dir)
        .map_err(|e| AnalyzerError::config(format!("cannot open log file {}: {}", log_file, e)))?;
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    registry
        .with(tracing_subscriber::fmt::layer().with_ansi(false).with_writer(non_blocking))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
    Ok(Some(guard))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("querylens-{}-{}", name, std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_unusable_log_dir_is_an_error() {
        let dir = scratch_dir("blocked");
        let blocker = dir.join("not-a-dir");
        std::fs::write(&blocker, "x").unwrap();

        let logging = LoggingConfig {
            level: "info".to_string(),
            file: Some(blocker.join("logs/querylens.log").display().to_string()),
        };
        let err = init_logging(&logging).unwrap_err();
        assert!(matches!(err, AnalyzerError::Io { .. }));
        assert_eq!(err.error_code(), 1001);
    }

    // Installs the global subscriber; keep this the only test that succeeds in init_logging.
    #[test]
    fn test_file_logging_initializes_with_console() {
        let dir = scratch_dir("logs");
        let logging = LoggingConfig {
            level: "warn,querylens=info".to_string(),
            file: Some(dir.join("nested/querylens.log").display().to_string()),
        };
        let guard = init_logging(&logging).unwrap();
        assert!(guard.is_some());
        assert!(dir.join("nested").is_dir());
    }

    #[test]
    fn test_read_sql_rejects_blank_file() {
        let dir = scratch_dir("sql");
        let path = dir.join("blank.sql");
        std::fs::write(&path, "  \n\t\n").unwrap();
        let err = read_sql(&path.display().to_string()).unwrap_err();
        assert!(matches!(err, AnalyzerError::EmptySql(_)));
    }
}
