//! `dialscroll` command-line front end.
//!
//! Starts the engine and reads control commands from stdin, one per line:
//!
//! ```text
//! set <field> <value>   change one scroll tunable
//! start | stop | restart
//! status
//! reload                re-read the settings file
//! turn <delta>          (--virtual only) feed a rotation report
//! quit
//! ```

use clap::Parser;
use dialscroll::backends::virtual_dial::VirtualDial;
use dialscroll::backends::BackendFactory;
use dialscroll::injector::{self, InjectorFactory, LogInjector};
use dialscroll::{logger, DeviceKey, EngineOptions, HidEngine, Settings};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "dialscroll", version, about = "Use a USB dial as an accelerated scroll wheel")]
struct Cli {
    /// Settings file (TOML). Missing file means defaults.
    #[arg(short, long, default_value = "dialscroll.toml")]
    config: PathBuf,

    /// Print matching HID devices and exit.
    #[arg(long)]
    list_devices: bool,

    /// With --list-devices: every HID interface, not only supported dials.
    #[arg(long, requires = "list_devices")]
    all: bool,

    /// With --list-devices: JSON output.
    #[arg(long, requires = "list_devices")]
    json: bool,

    /// Drive the engine from a scripted dial; scrolls are logged, not injected.
    #[arg(long = "virtual")]
    virtual_dial: bool,

    /// More logging (-v debug, -vv trace).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Debug, PartialEq)]
enum Command {
    Set { field: String, value: String },
    Start,
    Stop,
    Restart,
    Status,
    Reload,
    Turn(i8),
    Quit,
}

fn parse_command(line: &str) -> Result<Option<Command>, String> {
    let mut words = line.split_whitespace();
    let Some(verb) = words.next() else {
        return Ok(None);
    };
    let command = match verb {
        "set" => match (words.next(), words.next()) {
            (Some(field), Some(value)) => Command::Set {
                field: field.to_string(),
                value: value.to_string(),
            },
            _ => return Err("usage: set <field> <value>".into()),
        },
        "start" => Command::Start,
        "stop" => Command::Stop,
        "restart" => Command::Restart,
        "status" => Command::Status,
        "reload" => Command::Reload,
        "turn" => {
            let delta = words
                .next()
                .and_then(|w| w.parse::<i8>().ok())
                .ok_or("usage: turn <delta in -128..=127>")?;
            Command::Turn(delta)
        }
        "quit" | "exit" => Command::Quit,
        other => return Err(format!("unknown command `{other}`")),
    };
    if words.next().is_some() {
        return Err(format!("too many arguments for `{verb}`"));
    }
    Ok(Some(command))
}

fn list_devices(settings: &Settings, cli: &Cli) -> ExitCode {
    let filter = settings.device.filter();
    let devices = match dialscroll::backends::hid::list_devices((!cli.all).then_some(&filter)) {
        Ok(devices) => devices,
        Err(e) => {
            eprintln!("cannot enumerate HID devices: {e}");
            return ExitCode::FAILURE;
        }
    };
    if cli.json {
        match serde_json::to_string_pretty(&devices) {
            Ok(text) => println!("{text}"),
            Err(e) => {
                eprintln!("cannot encode device list: {e}");
                return ExitCode::FAILURE;
            }
        }
    } else if devices.is_empty() {
        println!("no devices found");
    } else {
        for d in &devices {
            println!(
                "{:04x}:{:04x}  {:<28} page {:#06x} usage {:#06x}  {}",
                d.vid.unwrap_or_default(),
                d.pid.unwrap_or_default(),
                d.product_string.as_deref().unwrap_or("(unnamed)"),
                d.usage_page.unwrap_or_default(),
                d.usage.unwrap_or_default(),
                d.path.as_deref().unwrap_or("-"),
            );
        }
    }
    ExitCode::SUCCESS
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Logging is not up yet; report a bad settings file on stderr.
    let mut settings = match Settings::load(&cli.config) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("{}: {e}", cli.config.display());
            return ExitCode::FAILURE;
        }
    };
    if let Err(e) = logger::init(&settings.logging, cli.verbose) {
        eprintln!("logging unavailable: {e}");
    }

    if cli.list_devices {
        return list_devices(&settings, &cli);
    }

    let (backend, scripted, injector): (BackendFactory, Option<(VirtualDial, DeviceKey)>, InjectorFactory) =
        if cli.virtual_dial {
            let dial = VirtualDial::new();
            let key = dial.plug(6);
            (dial.factory(), Some((dial, key)), LogInjector::factory())
        } else {
            (
                dialscroll::backends::default_backend(),
                None,
                injector::platform_injector(),
            )
        };

    let engine = HidEngine::new(EngineOptions::from_settings(&settings, backend, injector));
    engine.start();
    info!("{}", engine.status());

    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                error!("stdin: {e}");
                break;
            }
        };
        let command = match parse_command(&line) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(msg) => {
                eprintln!("{msg}");
                continue;
            }
        };
        match command {
            Command::Set { field, value } => match engine.config().apply(&field, &value) {
                Ok(config) => {
                    engine.update_config(config);
                    settings.scroll = config;
                }
                Err(e) => eprintln!("{e}"),
            },
            Command::Start => engine.start(),
            Command::Stop => engine.stop(),
            Command::Restart => engine.restart(),
            Command::Status => {
                println!("{}", engine.status());
                println!("{:?}", engine.config());
            }
            Command::Reload => match Settings::load(&cli.config) {
                Ok(fresh) => {
                    engine.update_config(fresh.scroll);
                    if fresh.device != settings.device {
                        warn!("device settings changed; they apply after a restart of the process");
                    }
                    settings = fresh;
                    info!("settings reloaded");
                }
                Err(e) => eprintln!("{}: {e}", cli.config.display()),
            },
            Command::Turn(delta) => match &scripted {
                Some((dial, key)) => {
                    dial.turn(*key, delta);
                    engine.poll_now();
                }
                None => eprintln!("`turn` needs --virtual"),
            },
            Command::Quit => break,
        }
        let _ = io::stdout().flush();
    }

    engine.stop();
    ExitCode::SUCCESS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_commands() {
        assert_eq!(parse_command("  "), Ok(None));
        assert_eq!(parse_command("status"), Ok(Some(Command::Status)));
        assert_eq!(
            parse_command("set sensitivity 2.5"),
            Ok(Some(Command::Set {
                field: "sensitivity".into(),
                value: "2.5".into()
            }))
        );
        assert_eq!(parse_command("turn -3"), Ok(Some(Command::Turn(-3))));
        assert_eq!(parse_command("exit"), Ok(Some(Command::Quit)));
    }

    #[test]
    fn rejects_bad_commands() {
        assert!(parse_command("set sensitivity").is_err());
        assert!(parse_command("turn 300").is_err());
        assert!(parse_command("stop now").is_err());
        assert!(parse_command("dance").is_err());
    }

    #[test]
    fn cli_parses_flags() {
        let cli = Cli::parse_from(["dialscroll", "--list-devices", "--json", "-vv"]);
        assert!(cli.list_devices && cli.json);
        assert_eq!(cli.verbose, 2);
        assert!(Cli::try_parse_from(["dialscroll", "--json"]).is_err());
    }
}
