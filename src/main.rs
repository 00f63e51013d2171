//! ampl-console - an interactive console for the AMPL modeling REPL
//!
//! ampl-console runs AMPL in batch-protocol mode (`ampl -b`) and gives it
//! a line-editing front end in the current terminal.
//!
//! # Features
//!
//! - **Framed protocol**: AMPL replies are parsed into typed messages
//! - **Colored output**: prompts and errors are highlighted
//! - **Command History**: Up/Down recall previous commands
//! - **Run files**: `.mod`, `.dat` and `.run` files on the command line are loaded at startup
//!
//! # Quick Start
//!
//! ```text
//! ampl-console                       # Start ampl from PATH
//! ampl-console -b /opt/ampl/ampl     # Use a specific binary
//! ampl-console diet.mod diet.dat     # Load a model and its data
//! ```

mod commands;
mod config;
mod core;
mod history;
mod protocol;
mod ui;

use std::collections::VecDeque;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use crossterm::event::{self, DisableBracketedPaste, EnableBracketedPaste, Event, KeyCode, KeyEventKind, KeyModifiers};
use crossterm::{execute, terminal};
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use crate::config::{app_dir, Config};
use crate::core::channel::ProcessChannel;
use crate::core::session::{CommandSink, ProtocolSession, SessionEvent};
use crate::core::term::TerminalEmulator;
use crate::history::CommandHistory;
use crate::ui::{KeyMapper, StdoutSurface, Surface};

/// Command line options
#[derive(Debug, Default)]
struct CliArgs {
    /// AMPL binary override
    binary: Option<String>,
    /// Binary arguments override
    args: Vec<String>,
    /// Config file override
    config: Option<PathBuf>,
    /// Don't cd into a file's directory before loading it
    no_cd: bool,
    /// Files to load at startup
    files: Vec<PathBuf>,
}

/// Version string from Cargo.toml
const VERSION: &str = env!("CARGO_PKG_VERSION");

fn print_version() {
    eprintln!("ampl-console {}", VERSION);
}

fn print_help() {
    eprintln!("ampl-console {} - An interactive console for AMPL", VERSION);
    eprintln!();
    eprintln!("Usage: ampl-console [OPTIONS] [FILE...]");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  -b, --binary <PATH>   AMPL binary (default: from config.toml or `ampl`)");
    eprintln!("  -a, --arg <ARG>       Argument for the binary, repeatable (default: -b)");
    eprintln!("  -c, --config <PATH>   Configuration file");
    eprintln!("      --no-cd           Load files by full path instead of changing directory");
    eprintln!("  -v, --version         Show version");
    eprintln!("  -h, --help            Show this help");
    eprintln!();
    eprintln!("Files:");
    eprintln!("  *.mod                 Loaded with `model`");
    eprintln!("  *.dat                 Loaded with `data`");
    eprintln!("  *.run                 Loaded with `include`");
    eprintln!();
    eprintln!("Keys:");
    eprintln!("  Enter                 Send the current line");
    eprintln!("  Up/Down               Browse command history");
    eprintln!("  Ctrl+D                Close AMPL's input (AMPL exits)");
    eprintln!("  Ctrl+C                Quit");
    eprintln!();
    eprintln!("Configuration: ~/.ampl-console/config.toml");
}

fn parse_args() -> Result<CliArgs, String> {
    let mut cli = CliArgs::default();
    let mut args = env::args().skip(1);

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-b" | "--binary" => {
                let value = args.next().ok_or("--binary requires a path")?;
                cli.binary = Some(value);
            }
            "-a" | "--arg" => {
                let value = args.next().ok_or("--arg requires a value")?;
                cli.args.push(value);
            }
            "-c" | "--config" => {
                let value = args.next().ok_or("--config requires a path")?;
                cli.config = Some(PathBuf::from(value));
            }
            "--no-cd" => cli.no_cd = true,
            "-v" | "--version" => {
                print_version();
                std::process::exit(0);
            }
            "-h" | "--help" => {
                print_help();
                std::process::exit(0);
            }
            other if other.starts_with('-') => {
                return Err(format!("Unknown option: {}", other));
            }
            file => cli.files.push(PathBuf::from(file)),
        }
    }

    Ok(cli)
}

fn init_logging(config: &Config) {
    let log_path = app_dir()
        .map(|dir| dir.join("ampl-console.log"))
        .unwrap_or_else(|| PathBuf::from("ampl-console.log"));

    // Open log file (append mode)
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .ok();

    if let Some(file) = log_file {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(&config.log_level));
        let subscriber = FmtSubscriber::builder()
            .with_env_filter(filter)
            .with_writer(std::sync::Mutex::new(file))
            .with_ansi(false)
            .finish();
        let _ = tracing::subscriber::set_global_default(subscriber);
    }
}

fn main() -> anyhow::Result<()> {
    let cli = match parse_args() {
        Ok(cli) => cli,
        Err(e) => {
            eprintln!("Error: {}", e);
            eprintln!("Use --help for usage information");
            std::process::exit(1);
        }
    };

    // Config file first, command line overrides
    let mut config = match &cli.config {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    };
    if let Some(binary) = &cli.binary {
        config.binary = binary.clone();
    }
    if !cli.args.is_empty() {
        config.args = cli.args.clone();
    }
    if cli.no_cd {
        config.change_dir_on_run = false;
    }

    init_logging(&config);
    info!("ampl-console starting...");

    run_console(config, &cli.files)
}

fn run_console(config: Config, files: &[PathBuf]) -> anyhow::Result<()> {
    let channel = ProcessChannel::new(config.binary.clone(), config.args.clone());
    let mut session = ProtocolSession::new(channel);
    session
        .start()
        .with_context(|| format!("Failed to start AMPL ({})", config.binary))?;

    let history = match (config.history.persist, CommandHistory::default_path()) {
        (true, Some(path)) => CommandHistory::persistent(path, config.history.limit),
        _ => CommandHistory::with_limit(config.history.limit),
    };
    let mut console: TerminalEmulator<StdoutSurface> =
        TerminalEmulator::new(history, config.palette());

    // Commands for startup files, sent one per prompt
    let mut startup = VecDeque::new();
    for file in files {
        match commands::run_file(file, config.change_dir_on_run) {
            Ok(cmds) => startup.extend(cmds),
            Err(e) => console.notice(format!("{}\n", e)),
        }
    }

    // Anything AMPL printed so far is queued until the surface is attached
    for event in session.poll_events() {
        dispatch(event, &mut session, &mut console, &mut startup);
    }

    terminal::enable_raw_mode().context("Failed to enable raw mode")?;
    let mut stdout = std::io::stdout();
    let _ = execute!(stdout, EnableBracketedPaste);

    console.attach(StdoutSurface::new());
    let result = run_main_loop(&mut session, &mut console, startup, config.idle_timeout());

    let _ = execute!(stdout, DisableBracketedPaste);
    let _ = terminal::disable_raw_mode();
    println!();

    if let Err(e) = &result {
        error!("Console loop failed: {}", e);
    }
    info!("ampl-console exiting");
    result
}

/// Render one session event; each prompt releases the next startup command
fn dispatch<S: Surface>(
    event: SessionEvent,
    sink: &mut dyn CommandSink,
    console: &mut TerminalEmulator<S>,
    startup: &mut VecDeque<String>,
) {
    let prompted = matches!(event, SessionEvent::PromptReady(_));
    console.handle_event(event);

    if prompted {
        if let Some(command) = startup.pop_front() {
            info!("Running startup command: {}", command);
            console.run_command(&command, sink);
        }
    }
}

/// Main event loop
fn run_main_loop(
    session: &mut ProtocolSession,
    console: &mut TerminalEmulator<StdoutSurface>,
    mut startup: VecDeque<String>,
    idle_timeout: Option<Duration>,
) -> anyhow::Result<()> {
    let poll_timeout = Duration::from_millis(10);

    loop {
        // Process AMPL output
        for event in session.poll_events() {
            dispatch(event, session, console, &mut startup);
        }

        if let Some(timeout) = idle_timeout {
            if let Some(event) = session.check_idle(timeout) {
                console.handle_event(event);
            }
        }

        if !session.is_running() {
            info!("Session ended");
            break;
        }

        // Process input events
        if !event::poll(poll_timeout)? {
            continue;
        }

        match event::read()? {
            Event::Key(key_event) => {
                // Only process key press events
                if key_event.kind != KeyEventKind::Press {
                    continue;
                }

                if key_event.modifiers.contains(KeyModifiers::CONTROL) {
                    match key_event.code {
                        KeyCode::Char('c') => {
                            info!("Interrupted by user");
                            break;
                        }
                        KeyCode::Char('d') => {
                            session.stop();
                            continue;
                        }
                        _ => {}
                    }
                }

                if let Some(unit) = KeyMapper::map(&key_event) {
                    console.handle_input(&unit, session);
                }
            }

            Event::Paste(text) => {
                for unit in KeyMapper::map_paste(&text) {
                    console.handle_input(&unit, session);
                }
            }

            _ => {}
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::session::SessionError;
    use crate::core::term::Palette;
    use crate::protocol::Message;
    use pretty_assertions::assert_eq;

    #[derive(Default)]
    struct RecordingSink {
        sent: Vec<String>,
    }

    impl CommandSink for RecordingSink {
        fn send(&mut self, command: &str) -> Result<(), SessionError> {
            self.sent.push(command.to_string());
            Ok(())
        }
    }

    fn prompt_events() -> Vec<SessionEvent> {
        vec![
            SessionEvent::Message(Message::new("prompt1", "ampl: ")),
            SessionEvent::PromptReady("ampl: ".to_string()),
        ]
    }

    #[test]
    fn test_first_prompt_before_attach_starts_files() {
        let mut console: TerminalEmulator<String> =
            TerminalEmulator::new(CommandHistory::new(), Palette::default());
        let mut sink = RecordingSink::default();
        let mut startup: VecDeque<String> =
            VecDeque::from(vec!["model \"diet.mod\";".to_string(), "data \"diet.dat\";".to_string()]);

        // The first prompt shows up while the console is not attached yet
        for event in prompt_events() {
            dispatch(event, &mut sink, &mut console, &mut startup);
        }
        assert!(!console.is_ready());
        assert_eq!(sink.sent, vec!["model \"diet.mod\";"]);

        console.attach(String::new());
        for event in prompt_events() {
            dispatch(event, &mut sink, &mut console, &mut startup);
        }
        assert_eq!(sink.sent, vec!["model \"diet.mod\";", "data \"diet.dat\";"]);
        assert!(startup.is_empty());
    }

    #[test]
    fn test_other_events_do_not_send() {
        let mut console: TerminalEmulator<String> =
            TerminalEmulator::new(CommandHistory::new(), Palette::default());
        let mut sink = RecordingSink::default();
        let mut startup = VecDeque::from(vec!["solve;".to_string()]);

        dispatch(
            SessionEvent::Message(Message::new("prompt2", "ampl? ")),
            &mut sink,
            &mut console,
            &mut startup,
        );
        dispatch(SessionEvent::Diagnostic("warn".to_string()), &mut sink, &mut console, &mut startup);
        assert!(sink.sent.is_empty());
        assert_eq!(startup.len(), 1);
    }
}
