use clap::{Args, Parser, Subcommand};
use console::config::{DEFAULT_HOST, DEFAULT_RCON_PORT};
use console::{Completion, ConnectionRegistry, ConsoleConfig, ConsoleError, Credential};
use instances::{
    parse_player_list, parse_status, suggest_assignment, validate_against_existing, validate_all,
    validate_range, PortAssignment, RangeReport, ValidationReport,
};
use log::info;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};

#[derive(Parser, Debug)]
#[command(author, version, about = "Remote console for game server instances", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Connect, run one command, print its output
    Exec {
        #[command(flatten)]
        endpoint: Endpoint,
        /// Command text; words are joined with spaces
        #[arg(required = true, trailing_var_arg = true)]
        command: Vec<String>,
    },
    /// Interactive console; `:history`, `:clear` and `:quit` are handled locally
    Shell {
        #[command(flatten)]
        endpoint: Endpoint,
    },
    /// Parse status output (file or stdin) and print it as JSON
    Status {
        file: Option<PathBuf>,
        /// Player limit to report when the output has none
        #[arg(long, default_value_t = 70)]
        max_players: u32,
    },
    /// Parse `listplayers` output (file or stdin) and print it as JSON
    Players { file: Option<PathBuf> },
    /// Check or suggest port assignments
    Ports {
        #[command(subcommand)]
        action: PortsAction,
    },
}

#[derive(Subcommand, Debug)]
enum PortsAction {
    /// Report every port bound by more than one instance
    Check {
        /// Assignments as name:game:query:rcon
        assignments: Vec<PortAssignment>,
        /// Only check this instance against the others
        #[arg(long)]
        new: Option<PortAssignment>,
    },
    /// Propose free ports for one more instance
    Suggest {
        /// Assignments as name:game:query:rcon
        assignments: Vec<PortAssignment>,
    },
}

#[derive(Args, Debug)]
struct Endpoint {
    /// Console host
    #[arg(short = 'H', long, env = "RCON_HOST", default_value = DEFAULT_HOST)]
    host: String,

    /// Console port
    #[arg(short, long, env = "RCON_PORT", default_value_t = DEFAULT_RCON_PORT)]
    port: u16,

    /// Admin password
    #[arg(short = 'P', long, env = "RCON_PASSWORD", default_value = "", hide_env_values = true)]
    password: String,

    /// Instance name used in logs and history
    #[arg(short, long, env = "RCON_INSTANCE", default_value = "default")]
    instance: String,

    /// Seconds allowed for connect plus login
    #[arg(long, default_value_t = 5)]
    connect_timeout: u64,

    /// Seconds allowed for one command
    #[arg(long, default_value_t = 10)]
    command_timeout: u64,

    /// How the end of a response is detected
    #[arg(long, value_enum, default_value_t = Completion::TrailingProbe)]
    completion: Completion,
}

#[derive(Serialize)]
struct PortsCheck {
    #[serde(flatten)]
    report: ValidationReport,
    ranges: BTreeMap<String, RangeReport>,
}

impl Endpoint {
    fn config(&self) -> ConsoleConfig {
        ConsoleConfig::default()
            .with_connect_timeout(Duration::from_secs(self.connect_timeout))
            .with_command_timeout(Duration::from_secs(self.command_timeout))
            .with_completion(self.completion)
    }

    async fn connect(&self) -> Result<ConnectionRegistry, ConsoleError> {
        let registry = ConnectionRegistry::new(self.config());
        info!("Connecting to {}:{} as {}", self.host, self.port, self.instance);
        registry
            .connect(
                &self.instance,
                &self.host,
                self.port,
                Credential::new(self.password.as_str()),
            )
            .await?;
        Ok(registry)
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let cli = Cli::parse();

    match cli.command {
        Command::Exec { endpoint, command } => {
            let registry = endpoint.connect().await?;
            let result = registry.execute(&endpoint.instance, &command.join(" ")).await;
            registry.disconnect(&endpoint.instance).await;
            print!("{}", result?);
        }
        Command::Shell { endpoint } => {
            let registry = endpoint.connect().await?;
            shell(&registry, &endpoint.instance).await?;
            registry.shutdown().await;
        }
        Command::Status { file, max_players } => {
            let text = read_input(file).await?;
            print_json(&parse_status(&text, max_players))?;
        }
        Command::Players { file } => {
            let text = read_input(file).await?;
            print_json(&parse_player_list(&text))?;
        }
        Command::Ports { action } => ports(action)?,
    }

    Ok(())
}

async fn shell(registry: &ConnectionRegistry, instance: &str) -> std::io::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    eprintln!("Connected to {}. Type :quit to leave.", instance);

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        match line {
            "" => continue,
            ":quit" | ":q" => break,
            ":history" => {
                for record in registry.history().get(instance).await {
                    let marker = if record.failed { "!" } else { ">" };
                    println!("{} {}\n{}", marker, record.command, record.response.trim_end());
                }
            }
            ":clear" => registry.history().clear(instance).await,
            command => match registry.execute(instance, command).await {
                Ok(response) => println!("{}", response.trim_end()),
                Err(err) => {
                    eprintln!("error: {}", err);
                    if err.breaks_session() || err.is_connection_fatal() {
                        break;
                    }
                }
            },
        }
    }

    Ok(())
}

fn ports(action: PortsAction) -> Result<(), Box<dyn std::error::Error>> {
    match action {
        PortsAction::Check { assignments, new } => {
            let report = match &new {
                Some(candidate) => validate_against_existing(candidate, &assignments),
                None => validate_all(&assignments),
            };
            let ranges: BTreeMap<String, RangeReport> = assignments
                .iter()
                .chain(new.iter())
                .map(|a| (a.instance.clone(), validate_range(a)))
                .collect();

            let valid = report.valid && ranges.values().all(|r| r.valid);
            print_json(&PortsCheck { report, ranges })?;
            if !valid {
                std::process::exit(1);
            }
        }
        PortsAction::Suggest { assignments } => {
            print_json(&suggest_assignment(&assignments)?)?;
        }
    }
    Ok(())
}

async fn read_input(file: Option<PathBuf>) -> std::io::Result<String> {
    match file {
        Some(path) => tokio::fs::read_to_string(path).await,
        None => {
            let mut text = String::new();
            tokio::io::stdin().read_to_string(&mut text).await?;
            Ok(text)
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> serde_json::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
