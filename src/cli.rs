use crate::{
    config::Config,
    engine::{external::ExternalEngine, Engine},
    pipeline::{Pipeline, Submission},
    report::RunReport,
    util::{ensure_dir, hash_file, now_rfc3339},
};
use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

#[derive(Parser, Debug)]
#[command(name = "dpi-normalize")]
#[command(about = "Normalize embedded image resolution in PDF documents to a target DPI")]
pub struct Args {
    #[command(subcommand)]
    pub cmd: Command,

    /// Path to config TOML. If omitted, uses ./dpi-normalize.toml if present.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Override log level (trace/debug/info/warn/error).
    #[arg(long)]
    pub log_level: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Check that the external tools can be started.
    Doctor {},
    /// Print the per-image resolution report.
    Inspect {
        #[arg(long)]
        input: PathBuf,
    },
    /// Print the report together with the strategy that would be used.
    Plan {
        #[arg(long)]
        input: PathBuf,
    },
    /// Normalize a PDF and write the accepted result.
    Run {
        #[arg(long)]
        input: PathBuf,
        /// Output PDF. Defaults to <out_dir>/<filename_prefix><input name>.
        #[arg(long)]
        output: Option<PathBuf>,
        #[arg(long)]
        out_dir: Option<PathBuf>,
    },
}

pub fn dispatch(args: Args) -> Result<()> {
    let cfg = match resolve_config_path(args.config.as_deref())? {
        Some(path) => Config::load(&path)?,
        None => Config::default(),
    };

    match &args.cmd {
        Command::Doctor {} => {
            let _guard = init_logging(&args, &cfg, resolve_log_path(&cfg).as_deref())?;
            doctor(&cfg)
        }
        Command::Inspect { input } => {
            let _guard = init_logging(&args, &cfg, resolve_log_path(&cfg).as_deref())?;
            inspect(&cfg, input)
        }
        Command::Plan { input } => {
            let _guard = init_logging(&args, &cfg, resolve_log_path(&cfg).as_deref())?;
            plan(&cfg, input)
        }
        Command::Run {
            input,
            output,
            out_dir,
        } => {
            let _guard = init_logging(&args, &cfg, resolve_log_path(&cfg).as_deref())?;
            run(&cfg, input, output.as_deref(), out_dir.as_deref())
        }
    }
}

fn resolve_config_path(user: Option<&Path>) -> Result<Option<PathBuf>> {
    if let Some(p) = user {
        if !p.exists() {
            bail!("config file not found: {}", p.display());
        }
        return Ok(Some(p.to_path_buf()));
    }
    for candidate in ["dpi-normalize.toml", "dpi-normalize.example.toml"] {
        let p = PathBuf::from(candidate);
        if p.exists() {
            return Ok(Some(p));
        }
    }
    Ok(None)
}

fn init_logging(args: &Args, cfg: &Config, file_path: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let level = args
        .log_level
        .as_deref()
        .unwrap_or(cfg.logging.level.as_str());

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let stdout_layer = if cfg.logging.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_target(true)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .boxed()
    };

    let (file_layer, guard) = if let Some(path) = file_path {
        let parent = path.parent().unwrap_or_else(|| Path::new("."));
        ensure_dir(parent)?;
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("open log file: {}", path.display()))?;
        let (non_blocking, guard) = tracing_appender::non_blocking(file);
        let layer = tracing_subscriber::fmt::layer()
            .with_writer(non_blocking)
            .with_ansi(false)
            .with_target(true)
            .boxed();
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stdout_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| anyhow!("failed to init logging: {e}"))?;

    Ok(guard)
}

fn resolve_log_path(cfg: &Config) -> Option<PathBuf> {
    if !cfg.logging.write_to_file {
        return None;
    }
    if !cfg.logging.file_path.is_empty() {
        return Some(PathBuf::from(&cfg.logging.file_path));
    }
    Some(PathBuf::from(&cfg.paths.out_dir).join("dpi-normalize.log"))
}

fn doctor(cfg: &Config) -> Result<()> {
    let engine = ExternalEngine::new(cfg);
    let diag = engine.doctor();
    println!("{}", serde_json::to_string_pretty(&diag)?);
    if diag.iter().any(|d| !d.ok) {
        bail!("one or more external tools are unavailable");
    }
    Ok(())
}

fn inspect(cfg: &Config, input: &Path) -> Result<()> {
    validate_input(cfg, input)?;
    let engine = ExternalEngine::new(cfg);
    let report = crate::inspect::inspect(cfg, &engine, input)?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn plan(cfg: &Config, input: &Path) -> Result<()> {
    validate_input(cfg, input)?;
    let window = cfg.window()?;
    let engine = ExternalEngine::new(cfg);
    let report = crate::inspect::inspect(cfg, &engine, input)?;
    let decision = crate::policy::decide(cfg, &window, &report);
    println!(
        "{}",
        serde_json::to_string_pretty(&serde_json::json!({
            "input": input,
            "window": window,
            "report": report,
            "decision": decision,
        }))?
    );
    Ok(())
}

fn run(
    cfg: &Config,
    input: &Path,
    output: Option<&Path>,
    out_dir: Option<&Path>,
) -> Result<()> {
    validate_input(cfg, input)?;

    let out_root = out_dir
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(&cfg.paths.out_dir));
    let output = match output {
        Some(p) => p.to_path_buf(),
        None => {
            let name = input
                .file_name()
                .ok_or_else(|| anyhow!("input has no file name: {}", input.display()))?
                .to_string_lossy();
            out_root.join(format!("{}{}", cfg.output.filename_prefix, name))
        }
    };
    if same_file(&output, input) {
        bail!("output would overwrite the input: {}", output.display());
    }
    ensure_dir(&out_root)?;

    if cfg.debug.dump_effective_config {
        let raw = toml::to_string(cfg).unwrap_or_default();
        std::fs::write(out_root.join("effective-config.toml"), raw)?;
    }

    let input_sha256 = hash_file(input).with_context(|| format!("hashing input: {}", input.display()))?;
    info!("input={} sha256={input_sha256}", input.display());

    let engine = ExternalEngine::new(cfg);
    let pipeline = Pipeline::new(cfg, engine)?;

    let started = now_rfc3339();
    let result = pipeline.run(&Submission::borrowed(input), &output)?;
    let report = RunReport::new(
        input.to_path_buf(),
        input_sha256,
        started,
        now_rfc3339(),
        &result,
    );

    if cfg.output.write_report_json {
        let stem = output
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "run".to_string());
        let report_path = out_root.join(format!("{stem}.report.json"));
        std::fs::write(&report_path, serde_json::to_string_pretty(&report)?)
            .with_context(|| format!("writing report: {}", report_path.display()))?;
    }

    if cfg.global.print_summary {
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "input": input,
                "output": result.final_artifact,
                "strategy": report.strategy,
                "accepted": result.accepted,
                "diagnostics": result.diagnostics,
            }))?
        );
    }

    if !result.accepted {
        bail!(
            "normalization rejected: {}",
            result
                .diagnostics
                .last()
                .map(String::as_str)
                .unwrap_or("no detail")
        );
    }
    Ok(())
}

fn validate_input(cfg: &Config, input: &Path) -> Result<()> {
    let input_str = input.display().to_string();

    if cfg.security.reject_url_inputs && looks_like_url(&input_str) {
        return Err(anyhow!("URL inputs are disabled: {input_str}"));
    }

    let meta = std::fs::metadata(input)
        .with_context(|| format!("input does not exist: {}", input.display()))?;
    if meta.len() > cfg.limits.max_input_file_bytes {
        bail!(
            "input exceeds max_input_file_bytes ({} > {})",
            meta.len(),
            cfg.limits.max_input_file_bytes
        );
    }

    if let Some(ext) = input.extension().and_then(|s| s.to_str()) {
        if !ext.eq_ignore_ascii_case("pdf") {
            return Err(anyhow!("input is not a PDF: {}", input.display()));
        }
    } else {
        warn!("input has no extension; assuming PDF: {}", input.display());
    }

    if cfg.security.check_pdf_magic {
        let mut magic = [0u8; 5];
        let mut f = std::fs::File::open(input)
            .with_context(|| format!("open input: {}", input.display()))?;
        let n = f.read(&mut magic)?;
        if &magic[..n] != b"%PDF-" {
            bail!("input does not start with a PDF header: {}", input.display());
        }
    }

    Ok(())
}

/// Compares two paths after resolving `.`/`..` and symlinks. A path that does
/// not exist yet is resolved through its parent directory.
fn same_file(a: &Path, b: &Path) -> bool {
    fn resolve(p: &Path) -> Option<PathBuf> {
        if let Ok(c) = std::fs::canonicalize(p) {
            return Some(c);
        }
        let name = p.file_name()?;
        let parent = match p.parent() {
            Some(d) if !d.as_os_str().is_empty() => d,
            _ => Path::new("."),
        };
        Some(std::fs::canonicalize(parent).ok()?.join(name))
    }
    match (resolve(a), resolve(b)) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

fn looks_like_url(s: &str) -> bool {
    let s = s.to_ascii_lowercase();
    s.starts_with("http://") || s.starts_with("https://") || s.starts_with("file://")
}
