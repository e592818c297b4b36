use std::{
    fs::File,
    io::{self, BufWriter, Write},
    path::PathBuf,
    sync::Arc,
    thread,
};

use clap::Parser;
use httpsrc::{
    FlowError, HttpSrc, PushSource, SourceEvent,
    common::{AnyResult, logger},
    configs::Config,
};
use tracing::{debug, info, warn};

const VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (",
    env!("GIT_BRANCH"),
    "@",
    env!("GIT_COMMIT"),
    ")"
);

/// Pulls an HTTP resource through the source state machine.
#[derive(Debug, Parser)]
#[command(name = "httpsrc", version = VERSION)]
struct Args {
    /// TOML configuration; defaults to ./httpsrc.toml when present.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Write the body here instead of stdout.
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// First byte to request.
    #[arg(long)]
    start_offset: Option<u64>,

    /// Last byte to request (inclusive).
    #[arg(long)]
    end_offset: Option<u64>,

    /// Overrides the configured location.
    location: Option<String>,
}

fn main() -> AnyResult<()> {
    let args = Args::parse();
    let mut config = Config::load(args.config.as_deref())?;
    logger::init(&config);

    if let Some(location) = args.location {
        config.source.location = Some(location);
    }
    if let Some(start) = args.start_offset {
        config.source.start_offset = start;
    }
    if let Some(end) = args.end_offset {
        config.source.end_offset = end;
    }

    let (tx, rx) = flume::unbounded::<SourceEvent>();
    let src = Arc::new(HttpSrc::builder(config.source).event_sink(Arc::new(tx)).build()?);

    thread::Builder::new()
        .name("httpsrc-events".to_string())
        .spawn(move || {
            for event in rx.iter() {
                match serde_json::to_string(&event) {
                    Ok(json) => debug!("{}", json),
                    Err(e) => warn!("Unserializable event {:?}: {}", event, e),
                }
            }
        })?;

    let signals = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    {
        let src = src.clone();
        thread::Builder::new()
            .name("httpsrc-signals".to_string())
            .spawn(move || {
                signals.block_on(async {
                    if tokio::signal::ctrl_c().await.is_ok() {
                        warn!("Interrupted, cancelling transfer");
                        src.unlock();
                    }
                })
            })?;
    }

    let mut out: Box<dyn Write> = match &args.output {
        Some(path) => Box::new(BufWriter::new(File::create(path)?)),
        None => Box::new(BufWriter::new(io::stdout().lock())),
    };

    src.start()?;

    let mut total = 0u64;
    let result = loop {
        match src.create() {
            Ok(buffer) => {
                total += buffer.len() as u64;
                out.write_all(&buffer.data)?;
            }
            Err(FlowError::Eos) => break Ok(()),
            Err(FlowError::Flushing) => break Err("transfer cancelled".into()),
            Err(FlowError::Error) => break Err("transfer failed".into()),
        }
    };

    out.flush()?;
    src.stop()?;
    info!("Received {} bytes", total);
    result
}
