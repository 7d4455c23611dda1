//! `mnemos` – inspection shell for a Mnemos memory store.
//!
//! 1. Loads `~/.mnemos/config.toml`, writing defaults on first run.
//! 2. Opens the episode store (reconciling the saved indexes with the records)
//!    and starts the abandoned-transaction sweeper on a tokio runtime.
//! 3. Drops the user into an interactive REPL (`/help` for commands).
//! 4. Saves the indexes on exit, Ctrl-C included, unless `save_on_exit` is off.

mod config;
mod repl;
mod telemetry;

use std::io::Write;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use colored::Colorize;
use mnemos_memory::{EpisodeStore, Services};
use tracing::{error, info, warn};

fn main() {
    let _telemetry = telemetry::init_tracing("mnemos");

    print_banner();

    let (cfg, created) = match config::load_or_init() {
        Ok(loaded) => loaded,
        Err(e) => {
            println!("{}: {}", "Config error".red(), e);
            std::process::exit(1);
        }
    };
    if created {
        println!(
            "  {} Wrote default config to {}",
            "✓".green().bold(),
            config::config_path().display().to_string().bold()
        );
    } else {
        println!(
            "  Config loaded from {}",
            config::config_path().display().to_string().bold()
        );
    }

    // The sweeper needs a runtime; the REPL itself stays on the main thread.
    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .worker_threads(1)
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            println!("{}: {}", "Failed to start runtime".red(), e);
            std::process::exit(1);
        }
    };
    let _rt_guard = runtime.enter();

    print!("  Opening store … ");
    std::io::stdout().flush().ok();
    let store = match EpisodeStore::open(cfg.memory.clone()) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            println!("{}", "FAILED".red());
            error!(error = %e, "failed to open episode store");
            std::process::exit(1);
        }
    };
    println!("{}", "OK".green());

    let backend = store.backend_info();
    println!(
        "  Vector backend: {} ({})",
        format!("{:?}", backend.kind).to_lowercase().bold(),
        backend.description.dimmed()
    );
    match &cfg.memory.data_dir {
        Some(dir) => println!("  Data directory: {}", dir.display().to_string().bold()),
        None => println!("  Data directory: {}", "in memory".yellow()),
    }

    let services = match Services::new(Arc::clone(&store)) {
        Ok(s) => Arc::new(s),
        Err(e) => {
            error!(error = %e, "failed to build services");
            std::process::exit(1);
        }
    };
    let sweeper = store.spawn_sweeper();

    // ── Ctrl-C handler ────────────────────────────────────────────────────
    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let shutdown = Arc::clone(&shutdown);
        let services = Arc::clone(&services);
        let save_on_exit = cfg.save_on_exit;
        if let Err(e) = ctrlc::set_handler(move || {
            println!();
            println!("{}", "⚠  Ctrl-C received – shutting down …".yellow().bold());
            shutdown.store(true, Ordering::SeqCst);
            if save_on_exit {
                save(&services);
            }
            // The REPL is blocked on stdin and would not notice the flag.
            std::process::exit(130);
        }) {
            warn!(error = %e, "failed to install Ctrl-C handler; indexes will not be saved on Ctrl-C");
        }
    }

    println!();
    println!("  Type {} for a list of commands.\n", "/help".bold().cyan());

    repl::run(Arc::clone(&shutdown), &services, cfg.default_k);

    sweeper.abort();
    if cfg.save_on_exit {
        save(&services);
    }
    info!("mnemos shell exited");
}

fn save(services: &Services) {
    match services.save() {
        Ok(()) => println!("{}", "  ✓ Indexes saved.".green()),
        Err(e) => {
            error!(error = %e, "failed to save indexes on exit");
            println!("{}: {}", "  Save failed".red(), e);
        }
    }
}

fn print_banner() {
    println!();
    println!("{}", r#"   __  ___                          "#.bold().cyan());
    println!("{}", r#"  /  |/  /__  ___ __ _  ___  ___    "#.bold().cyan());
    println!("{}", r#" / /|_/ / _ \/ -_)  ' \/ _ \(_-<    "#.bold().cyan());
    println!("{}", r#"/_/  /_/_//_/\__/_/_/_/\___/___/    "#.bold().cyan());
    println!();
    println!(
        "  {} {}",
        "Mnemos".bold(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    println!("  Episodic memory and knowledge graph store");
    println!();
}
