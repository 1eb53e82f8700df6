use std::env;
use std::path::PathBuf;
use std::time::Duration;

use tokio::sync::broadcast::error::RecvError;

use dadaloader::{
    AppConfig, DownloadEvent, DownloadStatus, Orchestrator, format_bytes, format_eta,
    format_percent, format_speed,
};

/// How often running downloads are summarized in the log.
const PROGRESS_LOG_INTERVAL: Duration = Duration::from_secs(5);

fn print_usage() {
    eprintln!("Usage: dada [OPTIONS] [URL[=PATH]]...");
    eprintln!();
    eprintln!("Adds and starts each URL, then logs progress until every download");
    eprintln!("has finished. SIGINT/SIGTERM pause running downloads so the next run");
    eprintln!("can resume them with --resume.");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  -c, --config <PATH>  Configuration file (created if missing)");
    eprintln!("  -l, --list           List stored downloads and exit");
    eprintln!("  -r, --resume         Resume paused downloads");
    eprintln!("      --retry          Retry failed downloads");
    eprintln!("  -h, --help           Show this help");
    eprintln!();
    eprintln!("PATH defaults to the URL's file name inside the configured download directory.");
}

#[derive(Debug, Default)]
struct Options {
    config: Option<PathBuf>,
    list: bool,
    resume: bool,
    retry: bool,
    targets: Vec<(String, Option<PathBuf>)>,
}

fn parse_args(args: &[String]) -> Options {
    let mut options = Options::default();
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "-c" | "--config" => {
                i += 1;
                if i < args.len() {
                    options.config = Some(PathBuf::from(&args[i]));
                } else {
                    eprintln!("Error: --config requires a value");
                    std::process::exit(1);
                }
            }
            "-l" | "--list" => options.list = true,
            "-r" | "--resume" => options.resume = true,
            "--retry" => options.retry = true,
            "-h" | "--help" => {
                print_usage();
                std::process::exit(0);
            }
            flag if flag.starts_with('-') => {
                eprintln!("Error: unknown option {flag}");
                print_usage();
                std::process::exit(1);
            }
            target => {
                let (url, path) = split_target(target);
                options.targets.push((url.to_string(), path.map(PathBuf::from)));
            }
        }
        i += 1;
    }
    options
}

/// Splits `URL=PATH`. Only a final `=` followed by a path-looking value
/// separates the two, so query strings stay intact.
fn split_target(arg: &str) -> (&str, Option<&str>) {
    match arg.rsplit_once('=') {
        Some((url, path)) if path.starts_with('/') || path.starts_with('.') => (url, Some(path)),
        _ => (arg, None),
    }
}

fn print_list(items: &[dadaloader::DownloadItem]) {
    if items.is_empty() {
        println!("No downloads.");
        return;
    }
    for item in items {
        let size = item
            .total_bytes
            .map_or_else(|| "?".to_string(), format_bytes);
        println!(
            "{:>4}  {:<11}  {:>6}  {:>10} / {:<10}  {}",
            item.id.to_string(),
            item.status.to_string(),
            format_percent(item.percent()),
            format_bytes(item.downloaded_bytes),
            size,
            item.save_path.display()
        );
        if let Some(failure) = item.failure() {
            println!("      {failure}");
        }
    }
}

#[tokio::main]
#[allow(clippy::too_many_lines, clippy::missing_panics_doc)]
async fn main() -> dadaloader::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args: Vec<String> = env::args().skip(1).collect();
    let options = parse_args(&args);
    if args.is_empty() {
        print_usage();
        std::process::exit(0);
    }

    let config_path = options.config.clone().unwrap_or_else(AppConfig::default_path);
    let config = AppConfig::load_or_create(&config_path)?;
    log::info!("Loaded config from {}", config_path.display());

    let orchestrator = Orchestrator::new(config);
    orchestrator.restore_from_store().await?;

    if options.list {
        print_list(&orchestrator.list());
        return Ok(());
    }

    let mut events = orchestrator.subscribe();

    for (url, path) in &options.targets {
        let added = match path {
            Some(path) => orchestrator.add(url, path).await,
            None => orchestrator.add_to_default_dir(url).await,
        };
        match added {
            Ok(id) => {
                if let Err(e) = orchestrator.start(id).await {
                    log::error!("Could not start {url}: {e}");
                }
            }
            Err(e) => log::error!("Skipping {url}: {e}"),
        }
    }

    for item in orchestrator.list() {
        let result = match item.status {
            DownloadStatus::Paused if options.resume => orchestrator.resume(item.id).await,
            DownloadStatus::Error if options.retry => match orchestrator.retry(item.id).await {
                Ok(()) => orchestrator.start(item.id).await,
                Err(e) => Err(e),
            },
            _ => Ok(()),
        };
        if let Err(e) = result {
            log::error!("Download {}: {e}", item.id);
        }
    }

    if orchestrator.active_count() == 0 {
        log::info!("Nothing to download");
        return Ok(());
    }

    let mut progress_interval = tokio::time::interval(PROGRESS_LOG_INTERVAL);
    progress_interval.tick().await; // consume the immediate first tick

    // Shutdown future: resolves on SIGINT or SIGTERM
    #[cfg(unix)]
    let shutdown = async {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to register SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => log::info!("Received SIGINT"),
            _ = sigterm.recv() => log::info!("Received SIGTERM"),
        }
    };

    #[cfg(not(unix))]
    let shutdown = async {
        tokio::signal::ctrl_c().await.ok();
        log::info!("Received SIGINT");
    };

    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            () = &mut shutdown => {
                let paused = orchestrator.pause_all().await;
                log::info!("Paused {paused} downloads; run with --resume to continue");
                break;
            }
            event = events.recv() => {
                match event {
                    Ok(DownloadEvent::DurabilityDegraded) => {
                        log::warn!("State is no longer being saved; progress may be lost on exit");
                    }
                    Ok(DownloadEvent::Updated(update)) if update.status == DownloadStatus::Completed => {
                        log::info!("[done] download {}", update.id);
                    }
                    Ok(DownloadEvent::Updated(update)) if update.status == DownloadStatus::Error => {
                        log::error!(
                            "[failed] download {}: {}",
                            update.id,
                            update.last_error.as_deref().unwrap_or("unknown error")
                        );
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => log::debug!("Skipped {skipped} events"),
                    Err(RecvError::Closed) => break,
                }
                if orchestrator.active_count() == 0 {
                    log::info!("All downloads finished");
                    break;
                }
            }
            _ = progress_interval.tick() => {
                for item in orchestrator.list() {
                    if item.status != DownloadStatus::Downloading {
                        continue;
                    }
                    log::info!(
                        "[progress] {} {} / {} ({}), {}, ETA {}",
                        item.id,
                        format_bytes(item.downloaded_bytes),
                        item.total_bytes.map_or_else(|| "?".to_string(), format_bytes),
                        format_percent(item.percent()),
                        format_speed(item.speed_bytes_per_sec),
                        format_eta(item.eta_seconds),
                    );
                }
            }
        }
    }

    Ok(())
}
