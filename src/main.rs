//! Command line entrypoint.
//!
//! ```bash
//! clearframe setup <project> <card> <folder>   # create a card with a watch folder
//! clearframe scan <watch_folder_id>            # one-shot folder scan
//! clearframe monitor <watch_folder_id>         # monitor until inactivity timeout
//! clearframe process <card_id>                 # run the processing pipeline
//! clearframe stop <task_id>                    # request cancellation of a run
//! clearframe status <card_id>                  # show card and task state
//! ```

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use tracing::info;

use clearframe::config::Config;
use clearframe::db::{ClipStatus, Database};
use clearframe::engine::ffmpeg::FfmpegSampler;
use clearframe::engine::onnx::OnnxEngine;
use clearframe::monitor::{MonitorRegistry, MonitorSettings};
use clearframe::pipeline::{start_processing, Engines};
use clearframe::scanner::scan_watch_folder;
use clearframe::tasks::BackgroundTaskManager;
use clearframe::logging;

fn main() -> Result<()> {
    logging::init(None)?;

    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 {
        print_help();
        std::process::exit(1);
    }

    match args[1].as_str() {
        "--help" | "-h" | "help" => {
            print_help();
            Ok(())
        }
        "--version" | "-V" => {
            println!("clearframe {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        "setup" => cmd_setup(&args[2..]),
        "scan" => cmd_scan(&args[2..]),
        "monitor" => cmd_monitor(&args[2..]),
        "process" => cmd_process(&args[2..]),
        "stop" => cmd_stop(&args[2..]),
        "status" => cmd_status(&args[2..]),
        other => {
            eprintln!("Unknown command: {other}");
            print_help();
            std::process::exit(1);
        }
    }
}

fn print_help() {
    println!("clearframe - consent-aware footage processing");
    println!();
    println!("Usage:");
    println!("  clearframe setup <project> <card> <folder>   Create a card with a watch folder");
    println!("  clearframe scan <watch_folder_id>            Scan a watch folder once");
    println!("  clearframe monitor <watch_folder_id>         Monitor a folder until idle");
    println!("  clearframe process <card_id>                 Process a card's queued clips");
    println!("  clearframe stop <task_id>                    Cancel a running task");
    println!("  clearframe status <card_id>                  Show card and task state");
    println!();
    println!("Set CLEARFRAME_LOG=debug for verbose logging.");
}

fn open_db(config: &Config) -> Result<Database> {
    let db = Database::open(&config.db_path)?;
    db.initialize()?;
    // No worker survives a restart; settle leftover task rows first.
    let settled = db.resolve_stale_tasks()?;
    if settled > 0 {
        info!(settled, "Resolved stale task rows");
    }
    Ok(db)
}

fn parse_id(args: &[String], what: &str) -> Result<i64> {
    args.first()
        .ok_or_else(|| anyhow!("missing {what} argument"))?
        .parse()
        .map_err(|_| anyhow!("{what} must be an integer"))
}

fn cmd_setup(args: &[String]) -> Result<()> {
    let [project_name, card_name, folder] = args else {
        return Err(anyhow!("usage: clearframe setup <project> <card> <folder>"));
    };
    let config = Config::load()?;
    let db = open_db(&config)?;

    let project = db.create_project(project_name)?;
    let card = db.create_card(project, card_name)?;
    let card_config = db.create_card_config(card)?;
    let watch_folder = db.create_watch_folder(card_config, folder)?;

    println!("project {project}  card {card}  watch folder {watch_folder}");
    Ok(())
}

fn cmd_scan(args: &[String]) -> Result<()> {
    let watch_folder_id = parse_id(args, "watch_folder_id")?;
    let config = Config::load()?;
    let db = open_db(&config)?;

    let result = scan_watch_folder(&db, watch_folder_id, &config.scanner.video_extensions)?;
    println!(
        "found {}  created {}  updated {}",
        result.found, result.created, result.updated
    );
    for name in &result.duplicates_skipped {
        println!("skipped duplicate filename: {name}");
    }
    if result.failed > 0 {
        println!("failed to reconcile {} file(s), see the log", result.failed);
    }
    Ok(())
}

fn cmd_monitor(args: &[String]) -> Result<()> {
    let watch_folder_id = parse_id(args, "watch_folder_id")?;
    let config = Config::load()?;
    // Validate the folder exists before spawning.
    let db = open_db(&config)?;
    db.get_watch_folder(watch_folder_id)?
        .ok_or_else(|| anyhow!("watch folder {watch_folder_id} not found"))?;
    drop(db);

    let registry = MonitorRegistry::new(config.db_path.clone());
    let settings = MonitorSettings {
        poll_interval: Duration::from_secs(config.monitor.poll_interval_secs),
        inactivity_timeout: Duration::from_secs(config.monitor.inactivity_timeout_minutes * 60),
        video_extensions: config.scanner.video_extensions.clone(),
    };
    registry.start(watch_folder_id, settings)?;
    println!("monitoring watch folder {watch_folder_id} (stops after inactivity)");

    while registry.is_running(watch_folder_id) {
        std::thread::sleep(Duration::from_millis(500));
    }
    registry.stop_all()?;
    println!("monitor finished");
    Ok(())
}

fn cmd_process(args: &[String]) -> Result<()> {
    let card_id = parse_id(args, "card_id")?;
    let config = Config::load()?;
    let db = open_db(&config)?;

    // Queue every pending clip on the card; explicit deselection survives.
    queue_pending_clips(&db, card_id)?;

    FfmpegSampler::check_available()
        .map_err(|e| anyhow!("ffmpeg is required for frame extraction: {e}"))?;

    let onnx = Arc::new(OnnxEngine::new(config.processing.detector_backend));
    let engines = Engines {
        sampler: Arc::new(FfmpegSampler::new(config.luts_dir.clone())),
        detector: onnx.clone(),
        embedder: onnx,
    };

    let mut manager = BackgroundTaskManager::new();
    let (db_task_id, _runtime_id) = start_processing(
        &db,
        config.db_path.clone(),
        card_id,
        engines,
        config.frames_root.clone(),
        config.processing.clone(),
        &mut manager,
    )?;
    println!("processing card {card_id} (task {db_task_id})");

    loop {
        let completed = manager.poll_updates();
        if let Some(info) = completed.first() {
            if info.success {
                println!("done: {}", info.message);
            } else {
                println!("stopped: {}", info.message);
            }
            break;
        }
        if let Some(task) = db.get_task(db_task_id)? {
            let stage = task.stage.as_deref().unwrap_or("starting");
            print!("\r{stage}: {:>3.0}%   ", task.progress * 100.0);
            use std::io::Write;
            let _ = std::io::stdout().flush();
        }
        std::thread::sleep(Duration::from_millis(500));
    }
    println!();
    Ok(())
}

/// Move the card's `pending` clips to `queued` so a plain `process` run
/// picks up everything that was not explicitly deselected.
fn queue_pending_clips(db: &Database, card_id: i64) -> Result<()> {
    let mut queued = 0;
    for id in db.clip_ids_with_status(card_id, ClipStatus::Pending)? {
        if db.set_clip_selection(id, ClipStatus::Queued)? {
            queued += 1;
        }
    }
    if queued > 0 {
        info!(card_id, queued, "Queued pending clips");
    }
    Ok(())
}

fn cmd_stop(args: &[String]) -> Result<()> {
    let task_id = parse_id(args, "task_id")?;
    let config = Config::load()?;
    let db = Database::open(&config.db_path)?;

    if db.request_task_cancel(task_id)? {
        println!("cancellation requested for task {task_id}");
    } else {
        println!("task {task_id} is not running");
    }
    Ok(())
}

fn cmd_status(args: &[String]) -> Result<()> {
    let card_id = parse_id(args, "card_id")?;
    let config = Config::load()?;
    let db = Database::open(&config.db_path)?;

    println!("card {card_id}: {} clips", db.count_clips_for_card(card_id)?);
    println!("  clips awaiting extraction: {}", db.count_clips_to_extract(card_id)?);
    println!("  frames awaiting detection: {}", db.count_frames_to_detect(card_id)?);
    println!("  faces awaiting matching:   {}", db.count_faces_to_match(card_id)?);

    match db.latest_task_for_card(card_id)? {
        Some(task) => {
            let stage = task.stage.as_deref().unwrap_or("-");
            println!(
                "  latest task {}: {} (stage {stage}, {:.0}%)",
                task.id,
                task.status,
                task.progress * 100.0
            );
            if let Some(message) = &task.message {
                println!("    {message}");
            }
        }
        None => println!("  no processing tasks yet"),
    }
    Ok(())
}
