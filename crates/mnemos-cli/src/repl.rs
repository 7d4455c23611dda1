//! REPL for inspecting a memory store.
//!
//! Supported slash-commands:
//!   /help                       – show this list
//!   /stats                      – episode, graph and hyperedge counters
//!   /backend                    – active vector backend
//!   /get <id>                   – one episode
//!   /recent <minutes>           – episodes started in the last N minutes
//!   /range <startMs> <endMs>    – episodes started inside a time range
//!   /similar <id> [k]           – episodes nearest to an existing one
//!   /traverse <id> [depth]      – graph neighbourhood of a node
//!   /hyperedges [nodeId]        – hyperedges, optionally for one node
//!   /validate <chainId>         – run the causal loop detector
//!   /call <method> [json]       – raw service dispatch, e.g. `graph.stats`
//!   /save                       – persist the indexes
//!   /quit | /exit               – exit the shell

use std::io::{self, BufRead, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use colored::Colorize;
use mnemos_memory::{ServiceResult, Services};
use mnemos_types::MnemosError;
use serde_json::{Value, json};

/// A parsed shell command.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Help,
    Stats,
    Backend,
    Get(String),
    Recent(i64),
    Range(i64, i64),
    Similar { id: String, k: Option<usize> },
    Traverse { id: String, depth: usize },
    Hyperedges(Option<String>),
    Validate(String),
    Call { method: String, params: Value },
    Save,
    Quit,
}

/// Parse one input line.
pub fn parse_command(line: &str) -> Result<Command, String> {
    let line = line.trim();
    let (head, rest) = match line.split_once(char::is_whitespace) {
        Some((h, r)) => (h, r.trim()),
        None => (line, ""),
    };
    let args: Vec<&str> = rest.split_whitespace().collect();

    let cmd = match head {
        "/help" => Command::Help,
        "/stats" => Command::Stats,
        "/backend" => Command::Backend,
        "/save" => Command::Save,
        "/quit" | "/exit" => Command::Quit,
        "/get" => Command::Get(required(&args, 0, "id")?.to_string()),
        "/recent" => Command::Recent(parse_num(required(&args, 0, "minutes")?)?),
        "/range" => Command::Range(
            parse_num(required(&args, 0, "startMs")?)?,
            parse_num(required(&args, 1, "endMs")?)?,
        ),
        "/similar" => Command::Similar {
            id: required(&args, 0, "id")?.to_string(),
            k: args.get(1).map(|s| parse_num(s)).transpose()?,
        },
        "/traverse" => Command::Traverse {
            id: required(&args, 0, "id")?.to_string(),
            depth: args.get(1).map(|s| parse_num(s)).transpose()?.unwrap_or(1),
        },
        "/hyperedges" => Command::Hyperedges(args.first().map(|s| s.to_string())),
        "/validate" => Command::Validate(required(&args, 0, "chainId")?.to_string()),
        "/call" => {
            let (method, params) = match rest.split_once(char::is_whitespace) {
                Some((m, p)) => (m, p.trim()),
                None => (rest, ""),
            };
            if method.is_empty() {
                return Err("usage: /call <group.operation> [json]".to_string());
            }
            let params = if params.is_empty() {
                Value::Null
            } else {
                serde_json::from_str(params).map_err(|e| format!("invalid JSON params: {e}"))?
            };
            Command::Call {
                method: method.to_string(),
                params,
            }
        }
        other => return Err(format!("unknown command '{other}'")),
    };
    Ok(cmd)
}

fn required<'a>(args: &[&'a str], i: usize, name: &str) -> Result<&'a str, String> {
    args.get(i).copied().ok_or_else(|| format!("missing argument <{name}>"))
}

fn parse_num<T: std::str::FromStr>(s: &str) -> Result<T, String> {
    s.parse().map_err(|_| format!("'{s}' is not a valid number"))
}

/// Run a data command against `services`.
///
/// `Help`, `Save` and `Quit` are handled by the loop and yield `Null` here.
pub fn execute(services: &Services, cmd: &Command, default_k: usize) -> ServiceResult<Value> {
    match cmd {
        Command::Stats => Ok(json!({
            "episodes": services.dispatch("episode.stats", Value::Null)?,
            "graph": services.dispatch("graph.stats", Value::Null)?,
            "hyperedges": services.dispatch("hyperedge.stats", Value::Null)?,
            "vectors": services.dispatch("vector.stats", Value::Null)?,
        })),
        Command::Backend => serde_json::to_value(services.episodes.store().backend_info())
            .map_err(|e| MnemosError::Storage(e.to_string())),
        Command::Get(id) => services.dispatch("episode.get", json!({ "id": id })),
        Command::Recent(minutes) => {
            let now = chrono::Utc::now().timestamp_millis();
            time_range(services, now - minutes * 60_000, now)
        }
        Command::Range(start, end) => time_range(services, *start, *end),
        Command::Similar { id, k } => {
            let Some(episode) = services.episodes.store().get(id)? else {
                return Ok(json!({ "found": false }));
            };
            services.dispatch(
                "episode.query",
                json!({
                    "queryType": "similarity",
                    "similarity": { "embedding": episode.embedding, "k": k.unwrap_or(default_k) },
                }),
            )
        }
        Command::Traverse { id, depth } => {
            services.dispatch("graph.traverse", json!({ "startNodeId": id, "depth": depth }))
        }
        Command::Hyperedges(node) => {
            let params = match node {
                Some(id) => json!({ "queryType": "byNode", "nodeId": id, "includeExpired": true }),
                None => json!({ "queryType": "all", "includeExpired": true }),
            };
            services.dispatch("hyperedge.query", params)
        }
        Command::Validate(chain) => {
            let loops = services.episodes.store().validate_causal_chain(chain)?;
            Ok(json!({ "valid": loops.is_empty(), "loops": loops }))
        }
        Command::Call { method, params } => services.dispatch(method, params.clone()),
        Command::Help | Command::Save | Command::Quit => Ok(Value::Null),
    }
}

fn time_range(services: &Services, start: i64, end: i64) -> ServiceResult<Value> {
    services.dispatch(
        "episode.query",
        json!({
            "queryType": "timeRange",
            "timeRange": { "startTime": start, "endTime": end, "includeOngoing": true },
        }),
    )
}

/// Entry point for the interactive loop.
///
/// `shutdown` is polled each iteration; when set the loop exits.
pub fn run(shutdown: Arc<AtomicBool>, services: &Services, default_k: usize) {
    let stdin = io::stdin();
    let mut stdout = io::stdout();

    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }

        print!("{} ", "mnemos>".bold().cyan());
        stdout.flush().ok();

        let mut line = String::new();
        match stdin.lock().read_line(&mut line) {
            Ok(0) => break, // EOF
            Ok(_) => {}
            Err(e) => {
                eprintln!("{}: {}", "Read error".red(), e);
                break;
            }
        }
        if line.trim().is_empty() {
            continue;
        }

        let cmd = match parse_command(&line) {
            Ok(c) => c,
            Err(msg) => {
                println!("{} {}. Type {} for available commands.", "Error:".red(), msg, "/help".bold());
                continue;
            }
        };

        match cmd {
            Command::Help => cmd_help(),
            Command::Quit => {
                println!("{}", "Goodbye.".green());
                shutdown.store(true, Ordering::SeqCst);
                break;
            }
            Command::Save => match services.save() {
                Ok(()) => println!("{}", "✓ Indexes saved.".green()),
                Err(e) => println!("{}: {}", "Save failed".red(), e),
            },
            other => match execute(services, &other, default_k) {
                Ok(value) => print_value(&value),
                Err(e) => println!("{}: {}", error_label(&e).red(), e),
            },
        }
    }
}

fn error_label(e: &MnemosError) -> &'static str {
    match e {
        MnemosError::NotFound { .. } => "Not found",
        MnemosError::Validation(_) => "Invalid request",
        MnemosError::CycleViolation { .. } => "Causal cycle",
        MnemosError::Transaction(_) => "Transaction failed",
        MnemosError::BackendUnavailable(_) => "Backend unavailable",
        MnemosError::Persistence(_) | MnemosError::Storage(_) => "Storage error",
    }
}

fn print_value(value: &Value) {
    if value.get("found") == Some(&Value::Bool(false)) {
        println!("{}", "not found".yellow());
        return;
    }
    match serde_json::to_string_pretty(value) {
        Ok(s) => println!("{s}"),
        Err(e) => println!("{}: {}", "Render error".red(), e),
    }
}

fn cmd_help() {
    println!();
    println!("{}", "Mnemos Commands".bold().underline());
    for (cmd, desc) in [
        ("/stats", "episode, graph and hyperedge counters"),
        ("/backend", "active vector backend"),
        ("/get <id>", "one episode"),
        ("/recent <minutes>", "episodes started in the last N minutes"),
        ("/range <startMs> <endMs>", "episodes started inside a time range"),
        ("/similar <id> [k]", "episodes nearest to an existing one"),
        ("/traverse <id> [depth]", "graph neighbourhood of a node"),
        ("/hyperedges [nodeId]", "hyperedges, optionally for one node"),
        ("/validate <chainId>", "run the causal loop detector"),
        ("/call <method> [json]", "raw service call, e.g. /call graph.stats"),
        ("/save", "persist the indexes"),
        ("/quit  /exit", "exit the shell"),
    ] {
        println!("  {:<26} {}", cmd.bold().cyan(), desc);
    }
    println!();
}
