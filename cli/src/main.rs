use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::Parser;
use ompmap_core::ast::TranslationUnit;
use ompmap_core::driver::{AnalyzerOptions, analyze_unit};


const DEFAULT_TRACE_FILTER: &str = "ompmap_core=info,ompmap=info";

#[derive(Debug, Parser)]
#[command(
    name = "ompmap",
    author,
    version,
    about = "Insert OpenMP target data-movement directives into annotated C/C++ sources",
    long_about = None
)]
struct CliArgs {
    /// Translation-unit dump exported by the AST walker (JSON)
    #[arg(value_name = "DUMP")]
    dump: PathBuf,

    /// Destination for the rewritten source; defaults to /tmp/<basename of the analyzed file>
    #[arg(short = 'o', long = "output", value_name = "PATH")]
    output: Option<PathBuf>,

    /// Leave data that callees only touch on the device to their callers
    #[arg(short = 'a', long = "aggressive-cross-function")]
    aggressive: bool,
}

fn env_toggle_enabled(raw: &str) -> bool {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return false;
    }
    !(trimmed.eq_ignore_ascii_case("0") || trimmed.eq_ignore_ascii_case("false") || trimmed.eq_ignore_ascii_case("off"))
}

fn filter_expr_from(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.eq_ignore_ascii_case("1") || trimmed.eq_ignore_ascii_case("true") || trimmed.eq_ignore_ascii_case("on") {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn maybe_init_tracing() {
    let Ok(raw) = std::env::var("OMPMAP_TRACE") else { return };
    if !env_toggle_enabled(&raw) {
        return;
    }

    use tracing_subscriber::EnvFilter;
    use tracing_subscriber::fmt;

    let filter_expr = filter_expr_from(&raw).or_else(|| std::env::var("RUST_LOG").ok());
    let builder = fmt().with_writer(std::io::stderr);
    let builder = match filter_expr.and_then(|expr| EnvFilter::try_new(expr).ok()) {
        Some(filter) => builder.with_env_filter(filter),
        None => builder.with_env_filter(DEFAULT_TRACE_FILTER),
    };
    let _ = builder.try_init();
}

fn default_output(analyzed_file: &str) -> PathBuf {
    let base = Path::new(analyzed_file)
        .file_name()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("out.c"));
    Path::new("/tmp").join(base)
}

fn load_unit(path: &Path) -> anyhow::Result<TranslationUnit> {
    let text = std::fs::read_to_string(path).with_context(|| format!("failed to read dump '{}'", path.display()))?;
    TranslationUnit::from_json(&text).with_context(|| format!("in dump '{}'", path.display()))
}

fn main() -> anyhow::Result<()> {
    maybe_init_tracing();
    let args = CliArgs::parse();

    let tu = load_unit(&args.dump)?;
    let opts = AnalyzerOptions {
        aggressive_cross_function: args.aggressive,
        ..AnalyzerOptions::default()
    };
    let outcome = analyze_unit(&tu, &opts);

    for diag in &outcome.diagnostics {
        eprintln!("{}:{}", tu.file, diag);
    }

    let out_path = args.output.unwrap_or_else(|| default_output(&tu.file));
    std::fs::write(&out_path, &outcome.source)
        .with_context(|| format!("failed to write output '{}'", out_path.display()))?;
    println!("Modified file at {}", out_path.display());
    Ok(())
}
