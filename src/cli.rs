use crate::config::{Config, load_config};
use crate::protocol::{Request, Response, dispatch};
use anyhow::{Context, Result, anyhow};
use clap::{Parser, ValueEnum};
use std::io::{self, BufRead, Read, Write};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "layerflow",
    version,
    about = "Layered graph layout with ILP ranking and obstacle-avoiding edge routes"
)]
pub struct Args {
    /// Input JSON file or '-' for stdin
    #[arg(short = 'i', long = "input")]
    pub input: Option<PathBuf>,

    /// Output file. Defaults to stdout if omitted.
    #[arg(short = 'o', long = "output")]
    pub output: Option<PathBuf>,

    /// Config file (JSON5)
    #[arg(short = 'c', long = "config")]
    pub config: Option<PathBuf>,

    /// Stage the input is a request for
    #[arg(short = 's', long = "stage", value_enum, default_value = "full")]
    pub stage: StageArg,

    /// Answer one stage-tagged JSON request per stdin line until EOF
    #[arg(long = "serve")]
    pub serve: bool,

    /// Log debug output to stderr (otherwise RUST_LOG, defaulting to warn)
    #[arg(short = 'v', long = "verbose")]
    pub verbose: bool,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageArg {
    Full,
    Rank,
    Order,
    Solve,
    Finalize,
    Route,
}

pub fn run() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);
    let config = load_config(args.config.as_deref())
        .with_context(|| format!("failed to load config {:?}", args.config))?;

    if args.serve {
        let stdin = io::stdin();
        let stdout = io::stdout();
        return serve(&config, stdin.lock(), stdout.lock());
    }

    let input = read_input(args.input.as_deref())?;
    let request = parse_request(&input, args.stage)?;
    let response = dispatch(request, &config);
    let json = serde_json::to_string_pretty(&response)?;
    write_output(&json, args.output.as_deref())?;

    if let Response::Failed { kind, message } = response {
        return Err(anyhow!("{kind}: {message}"));
    }
    Ok(())
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();
}

/// Parses an untagged request body for the given stage.
fn parse_request(input: &str, stage: StageArg) -> Result<Request> {
    let request = match stage {
        StageArg::Full => serde_json::from_str(input).map(Request::Layout),
        StageArg::Rank => serde_json::from_str(input).map(Request::Rank),
        StageArg::Order => serde_json::from_str(input).map(Request::Order),
        StageArg::Solve => serde_json::from_str(input).map(Request::Solve),
        StageArg::Finalize => serde_json::from_str(input).map(Request::Finalize),
        StageArg::Route => serde_json::from_str(input).map(Request::Route),
    };
    request.with_context(|| format!("input is not a valid {stage:?} request"))
}

/// Worker loop: each input line is a tagged request, each output line its response.
pub fn serve<R: BufRead, W: Write>(config: &Config, reader: R, mut writer: W) -> Result<()> {
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let response = match serde_json::from_str::<Request>(&line) {
            Ok(request) => dispatch(request, config),
            Err(err) => Response::Failed {
                kind: "malformed_input".to_string(),
                message: err.to_string(),
            },
        };
        serde_json::to_writer(&mut writer, &response)?;
        writeln!(writer)?;
        writer.flush()?;
    }
    Ok(())
}

fn read_input(path: Option<&Path>) -> Result<String> {
    if let Some(path) = path {
        if path != Path::new("-") {
            return std::fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()));
        }
    }
    let mut buf = String::new();
    io::stdin().read_to_string(&mut buf)?;
    Ok(buf)
}

fn write_output(json: &str, path: Option<&Path>) -> Result<()> {
    match path {
        Some(path) => std::fs::write(path, json)
            .with_context(|| format!("failed to write {}", path.display()))?,
        None => {
            let mut stdout = io::stdout().lock();
            stdout.write_all(json.as_bytes())?;
            writeln!(stdout)?;
        }
    }
    Ok(())
}
