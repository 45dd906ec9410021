use chunk_downloader::core::model::{DownloadOptions, SinkMode};
use chunk_downloader::plugins::driver::DriverContext;
use chunk_downloader::plugins::http::cli::HttpCliPlugin;
use chunk_downloader::plugins::http::driver::HttpDriver;
use chunk_downloader::plugins::http::resolver::HttpResolver;
use chunk_downloader::{Engine, EngineEvent};
use clap::{Arg, ArgMatches, Command};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

fn build_cli(http: &HttpCliPlugin) -> Command {
    let download = Command::new("download")
        .about("Download one file in concurrent byte-range chunks")
        .arg(Arg::new("url").help("HTTP(S) link to download").required(true).num_args(1))
        .arg(
            Arg::new("output")
                .short('o')
                .long("output")
                .help("Destination file (default: name taken from the URL, inside --out-dir)")
                .num_args(1),
        )
        .arg(
            Arg::new("out_dir")
                .long("out-dir")
                .help("Output directory when --output is not given")
                .default_value(".")
                .num_args(1),
        )
        .arg(
            Arg::new("chunks")
                .short('n')
                .long("chunks")
                .help("Number of byte-range chunks")
                .default_value("10")
                .num_args(1),
        )
        .arg(
            Arg::new("max_workers")
                .long("max-workers")
                .help("Max chunks fetched at the same time")
                .default_value("32")
                .num_args(1),
        )
        .arg(
            Arg::new("sub_chunk_kb")
                .long("sub-chunk-kb")
                .help("Split chunks into requests of at most this many KiB (0 disables)")
                .default_value("2048")
                .num_args(1),
        )
        .arg(
            Arg::new("sub_parallelism")
                .long("sub-parallelism")
                .help("Concurrent sub-requests per chunk")
                .default_value("4")
                .num_args(1),
        )
        .arg(
            Arg::new("mode")
                .long("mode")
                .help("Where chunks are written: temp-files or in-place")
                .default_value("temp-files")
                .num_args(1),
        )
        .arg(
            Arg::new("temp_dir")
                .long("temp-dir")
                .help("Directory for temporary chunk files (default: next to the output)")
                .num_args(1),
        )
        .arg(
            Arg::new("report_ms")
                .long("report-ms")
                .help("Progress refresh interval in milliseconds")
                .default_value("200")
                .num_args(1),
        );

    let download = http.augment_download_command(download);

    Command::new("chunk-downloader")
        .about("Parallel chunked HTTP downloader")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .subcommand(download)
}

fn options_from_matches(m: &ArgMatches) -> anyhow::Result<DownloadOptions> {
    let num_chunks: u32 = parse_arg(m, "chunks")?;
    if num_chunks == 0 {
        anyhow::bail!("--chunks must be at least 1");
    }
    let sub_chunk_kb: u64 = parse_arg(m, "sub_chunk_kb")?;
    let mode: SinkMode = parse_arg::<String>(m, "mode")?.parse().map_err(anyhow::Error::msg)?;

    Ok(DownloadOptions {
        num_chunks,
        max_workers: parse_arg::<usize>(m, "max_workers")?.max(1),
        sub_chunk_size: (sub_chunk_kb > 0).then(|| sub_chunk_kb * 1024),
        sub_parallelism: parse_arg::<usize>(m, "sub_parallelism")?.max(1),
        mode,
        temp_dir: m.get_one::<String>("temp_dir").map(PathBuf::from),
        report_interval: Duration::from_millis(parse_arg::<u64>(m, "report_ms")?.max(1)),
    })
}

fn parse_arg<T>(m: &ArgMatches, id: &str) -> anyhow::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    let raw = m
        .get_one::<String>(id)
        .ok_or_else(|| anyhow::anyhow!("missing argument {}", id))?;
    raw.parse::<T>().map_err(|e| anyhow::anyhow!("invalid value {:?} for {}: {}", raw, id, e))
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let http = HttpCliPlugin::new();
    let matches = build_cli(&http).get_matches();

    let Some(("download", m)) = matches.subcommand() else {
        return Ok(());
    };

    let url = parse_arg::<String>(m, "url")?;
    let resolver = HttpResolver::new();
    let dest = match m.get_one::<String>("output") {
        Some(p) => {
            if !resolver.can_handle(&url) {
                anyhow::bail!("not an http(s) link: {}", url);
            }
            PathBuf::from(p)
        }
        None => {
            let out_dir = PathBuf::from(parse_arg::<String>(m, "out_dir")?);
            tokio::fs::create_dir_all(&out_dir).await?;
            resolver.resolve_target(&url, &out_dir)?
        }
    };

    let options = options_from_matches(m)?;
    let mut driver_ctx = DriverContext::default();
    http.apply_download_matches(m, &mut driver_ctx)?;

    let engine = Engine::new(Arc::new(HttpDriver::new()?), options, driver_ctx);

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\ninterrupted, cleaning up...");
            ctrl_c.cancel();
        }
    });

    let ui_task = tokio::spawn(render_events(engine.subscribe()));

    let result = engine.download(&url, &dest, cancel).await;
    drop(engine);
    let _ = ui_task.await;

    let outcome = result?;
    println!(
        "Downloaded {} ({}) in {:.2}s -> {}",
        outcome.url,
        fmt_bytes(outcome.bytes),
        outcome.elapsed.as_secs_f64(),
        outcome.path.display()
    );
    Ok(())
}

/// Drive a progress bar from engine events until the sender is dropped.
async fn render_events(mut rx: broadcast::Receiver<EngineEvent>) {
    let sty_spin = ProgressStyle::with_template("{spinner:.green} {wide_msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
        .tick_chars("|/-\\ ");
    let sty_bar = ProgressStyle::with_template(
        "{bar:40.cyan/blue} {percent:>3}% {bytes}/{total_bytes} ({bytes_per_sec}, eta {eta}) {wide_msg}",
    )
    .unwrap_or_else(|_| ProgressStyle::default_bar());

    let pb = ProgressBar::new_spinner();
    pb.set_style(sty_spin);
    pb.enable_steady_tick(Duration::from_millis(120));
    pb.set_message("probing...");

    loop {
        let evt = match rx.recv().await {
            Ok(e) => e,
            Err(broadcast::error::RecvError::Lagged(_)) => continue,
            Err(broadcast::error::RecvError::Closed) => break,
        };

        match evt {
            EngineEvent::Probed { total, accepts_ranges, content_type, .. } => {
                pb.set_style(sty_bar.clone());
                pb.set_length(total);
                pb.println(format!(
                    "[INFO] size={} ranges={} type={}",
                    fmt_bytes(total),
                    accepts_ranges,
                    content_type.as_deref().unwrap_or("?")
                ));
            }
            EngineEvent::Planned { chunks, workers, mode } => {
                pb.set_message(format!("chunks 0/{} (workers={}, {})", chunks, workers, mode));
            }
            EngineEvent::SegmentStarted { .. } => {}
            EngineEvent::SegmentDone { completed, total, .. } => {
                pb.set_message(format!("chunks {}/{}", completed, total));
            }
            EngineEvent::Progress { downloaded, total, .. } => {
                pb.set_position(downloaded.min(total));
            }
            EngineEvent::Assembling { parts } => {
                pb.set_message(format!("merging {} chunk files", parts));
            }
            EngineEvent::Finished { .. } => {
                pb.finish_with_message("done");
            }
            EngineEvent::Failed { message } => {
                pb.abandon_with_message("failed");
                pb.println(format!("[ERR] {}", message));
            }
        }
    }
}

fn fmt_bytes(n: u64) -> String {
    const KB: f64 = 1024.0;
    const MB: f64 = 1024.0 * 1024.0;
    const GB: f64 = 1024.0 * 1024.0 * 1024.0;
    let f = n as f64;
    if f >= GB {
        format!("{:.2}GiB", f / GB)
    } else if f >= MB {
        format!("{:.2}MiB", f / MB)
    } else if f >= KB {
        format!("{:.2}KiB", f / KB)
    } else {
        format!("{}B", n)
    }
}
