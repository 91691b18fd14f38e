use anyhow::{Context, Result, anyhow, bail};
use clap::{Parser, Subcommand};
use shelltap::config::Config;
use shelltap::discovery::ScanControl;
use shelltap::logging::init_logging;
use shelltap::parser::parse_duration;
use shelltap::{
    Directive, FileStore, PromptDetector, ScanEvent, Script, ScriptRunner, Session, SpeedProfile,
    Target, Workbench, parse_script_file, parse_watch_file,
};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(
    name = "shelltap",
    about = "Discover, watch and script an interactive device shell",
    version
)]
struct Args {
    /// Raw socket link to the device, `host:port`
    #[arg(long, global = true, conflicts_with = "spawn")]
    tcp: Option<String>,

    /// Link program to run in a PTY, e.g. "picocom -b 115200 /dev/ttyACM0"
    #[arg(long, global = true)]
    spawn: Option<String>,

    /// Configuration file (defaults to the platform config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Directory for saved counters, triggers, repeats and the command registry
    #[arg(long, global = true)]
    store: Option<PathBuf>,

    /// More logging (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Detect the shell prompt
    Prompt,

    /// Discover the command tree through help probes
    Scan {
        /// Probe pacing
        #[arg(long, value_enum)]
        speed: Option<SpeedProfile>,

        /// Only deep-scan these root commands
        #[arg(long, value_delimiter = ',')]
        roots: Vec<String>,

        /// Keep scanning past soft deadlines without asking
        #[arg(short, long)]
        yes: bool,
    },

    /// Run a script file, checking each command's return code
    Run {
        /// One device command per line
        script: PathBuf,

        /// Continue after a command fails, overriding `script.stop_on_error`
        #[arg(long)]
        keep_going: bool,
    },

    /// Send a command on a fixed interval
    Repeat {
        command: String,

        /// Interval, e.g. 2s or 500ms
        #[arg(long, value_parser = parse_duration)]
        every: Duration,

        /// Stop after this long (default: until Ctrl-C)
        #[arg(long = "for", value_parser = parse_duration)]
        duration: Option<Duration>,
    },

    /// Stream device output with counters, triggers and repeats applied
    Watch {
        /// Watch files to apply
        #[arg(short, long)]
        file: Vec<PathBuf>,

        /// Stop after this long (default: until Ctrl-C)
        #[arg(long = "for", value_parser = parse_duration)]
        duration: Option<Duration>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = match args.config.clone().or_else(Config::default_path) {
        Some(path) => Config::load(&path)?,
        None => Config::default(),
    };
    init_logging(&config.log, args.verbose);

    // Input files are checked before the device is touched.
    let script = match &args.command {
        Cmd::Run { script, keep_going } => {
            let stop_on_error = config.script.stop_on_error && !*keep_going;
            Some(load_script(script, stop_on_error)?)
        },
        _ => None,
    };
    let directives = match &args.command {
        Cmd::Watch { file, .. } => load_watch_files(file)?,
        _ => Vec::new(),
    };

    let store = FileStore::new(
        args.store
            .clone()
            .unwrap_or_else(|| config.store.resolve_dir()),
    );
    let mut bench = Workbench::load(&store, &config).context("Failed to load saved state")?;
    for directive in &directives {
        directive
            .apply(&mut bench)
            .with_context(|| format!("Failed to apply '{}' directive", directive.name()))?;
    }

    let target = link_target(&args)?;
    let link = target.open().await.context("Failed to open device link")?;
    let session = Session::new("device", link.transport, bench.watchers.clone());
    let pump = session.spawn_pump(link.chunks);

    // Give the link program time to start up before probing.
    tokio::time::sleep(Duration::from_millis(100)).await;

    match args.command {
        Cmd::Prompt => {
            let detection = PromptDetector::from_config(&config.prompt)
                .detect_active(&session)
                .await?;
            if detection.is_fallback() {
                println!("{} (fallback)", detection.prompt());
            } else {
                println!("{}", detection.prompt());
            }
        }
        Cmd::Scan { speed, roots, yes } => {
            let mut config = config;
            if let Some(speed) = speed {
                config.discovery.speed = speed;
            }
            scan(&session, &mut bench, &config, &roots, yes).await?;
            bench.save(&store).context("Failed to save command registry")?;
        }
        Cmd::Run { .. } => {
            let script = script.ok_or_else(|| anyhow!("no script loaded"))?;
            echo_output(&session);
            let report = ScriptRunner::new(config.script.clone(), &config.prompt)
                .run(&session, &script)
                .await?;
            eprintln!(
                "\n{} of {} commands executed, {} failed, {} without return code",
                report.executed(),
                script.commands.len(),
                report.failures().count(),
                report.unparsed
            );
            report.ensure_success()?;
        }
        Cmd::Repeat {
            command,
            every,
            duration,
        } => {
            echo_output(&session);
            let mut scheduler = shelltap::Scheduler::new(config.repeat.clone());
            let id = scheduler.add(command.clone(), command, every)?;
            scheduler.start(&id, &session)?;
            wait_for_exit(duration, pump).await;
            scheduler.stop_all();
        }
        Cmd::Watch { duration, .. } => {
            echo_output(&session);
            let ids: Vec<String> = bench
                .scheduler
                .definitions()
                .iter()
                .map(|d| d.id.clone())
                .collect();
            for id in &ids {
                bench.scheduler.start(id, &session)?;
            }
            let keys = tokio::spawn(forward_stdin(session.clone()));
            wait_for_exit(duration, pump).await;
            keys.abort();
            bench.scheduler.stop_all();

            eprintln!();
            for counter in bench.watchers.counters().iter() {
                eprintln!("{counter}");
            }
            bench.save(&store).context("Failed to save watch state")?;
        }
    }

    Ok(())
}

fn link_target(args: &Args) -> Result<Target> {
    match (&args.tcp, &args.spawn) {
        (Some(addr), _) => Ok(Target::Tcp(addr.clone())),
        (None, Some(command)) => command.parse(),
        (None, None) => bail!("No device link given: use --tcp HOST:PORT or --spawn \"PROGRAM ARGS\""),
    }
}

fn load_script(path: &Path, stop_on_error: bool) -> Result<Script> {
    let commands = parse_script_file(path)?;
    let name = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "script".into());
    Ok(Script::new(name, commands).stop_on_error(stop_on_error))
}

fn load_watch_files(paths: &[PathBuf]) -> Result<Vec<Box<dyn Directive>>> {
    let mut directives = Vec::new();
    for path in paths {
        directives.extend(
            parse_watch_file(path)
                .with_context(|| format!("Failed to parse watch file: {}", path.display()))?,
        );
    }
    Ok(directives)
}

/// Mirror device output on stdout.
fn echo_output(session: &Session) {
    session.set_output_handler(|chunk| {
        let mut stdout = std::io::stdout();
        let _ = stdout.write_all(chunk.as_bytes());
        let _ = stdout.flush();
    });
}

/// Forward operator lines to the device as keystrokes.
async fn forward_stdin(session: Arc<Session>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if let Err(e) = session.type_keys(&format!("{line}\r")).await {
            warn!(error = %e, "input not forwarded");
            break;
        }
    }
}

/// Block until Ctrl-C, the optional time limit, or the link closing.
async fn wait_for_exit(limit: Option<Duration>, pump: tokio::task::JoinHandle<()>) {
    let limit = async {
        match limit {
            Some(limit) => tokio::time::sleep(limit).await,
            None => std::future::pending().await,
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("interrupted"),
        _ = limit => {}
        _ = pump => info!("device link closed"),
    }
}

async fn scan(
    session: &Session,
    bench: &mut Workbench,
    config: &Config,
    roots: &[String],
    yes: bool,
) -> Result<()> {
    let engine = bench.discovery(config);
    let mut scan = engine.begin(session)?.confirm_deadlines(!yes);
    let control = scan.control();
    let events = scan.events();
    let supervisor = tokio::spawn(supervise(control.clone(), events));
    let interrupt = {
        let control = control.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                control.cancel();
            }
        })
    };

    let listed = scan.list().await;
    let report = match listed {
        Ok(_) => {
            let selection = (!roots.is_empty()).then_some(roots);
            Ok(scan.deep_scan(selection).await)
        }
        Err(e) => {
            drop(scan);
            Err(e)
        }
    };
    interrupt.abort();
    let _ = supervisor.await;
    let report = report?;
    bench.mark_scanned();

    let registry = engine.snapshot();
    for node in registry.iter() {
        let depth = node.full_name.split_whitespace().count().saturating_sub(1);
        println!(
            "{:indent$}{}  {}",
            "",
            node.usage_line(),
            node.description,
            indent = depth * 2
        );
    }
    eprintln!(
        "\n{} commands ({} roots scanned, {} found, {} categories pruned) in {:.1}s{}",
        registry.len(),
        report.roots,
        report.discovered,
        report.pruned.len(),
        report.elapsed.as_secs_f64(),
        if report.cancelled { ", cancelled" } else { "" }
    );
    Ok(())
}

/// Print scan progress and ask the operator at each soft deadline.
async fn supervise(
    control: ScanControl,
    events: Option<tokio::sync::mpsc::UnboundedReceiver<ScanEvent>>,
) {
    let Some(mut events) = events else {
        return;
    };
    while let Some(event) = events.recv().await {
        match event {
            ScanEvent::Listed { roots } => eprintln!("{roots} root commands"),
            ScanEvent::Progress {
                current,
                total,
                command,
            } => eprintln!("[{current}/{total}] {command}"),
            ScanEvent::Discovered { full_name } => info!(command = %full_name, "discovered"),
            ScanEvent::DeadlineReached { elapsed } => {
                if !control.is_paused() {
                    continue;
                }
                eprint!(
                    "Still scanning after {}s. Continue? [Y/n] ",
                    elapsed.as_secs()
                );
                let answer = tokio::task::spawn_blocking(|| {
                    let mut line = String::new();
                    std::io::stdin().read_line(&mut line).map(|_| line)
                })
                .await;
                match answer {
                    Ok(Ok(line)) if line.trim().eq_ignore_ascii_case("n") => control.cancel(),
                    _ => control.resume(),
                }
            }
        }
    }
}
