mod activity;
mod backoff;
mod channel;
mod config;
mod dialog;
mod host;
mod recognizer;
mod responses;
mod skills;
mod state;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::activity::{Activity, ChannelAccount, ConversationAccount, Entity, SemanticAction};
use crate::channel::handler::RequestHandler;
use crate::channel::{server, AppCredentials, RemoteSkill, SkillEndpoint, SkillManifest};
use crate::config::{Config, StoreConfig};
use crate::host::{ConversationHost, TurnHandler};
use crate::skills::{Services, SkillBot};
use crate::state::{FileStore, MemoryStore, StateStore};

const DEFAULT_CONFIG: &str = "config/skillbridge.toml";

/// Upper bound for one turn run by the skill listener.
const SKILL_TURN_TIMEOUT: Duration = Duration::from_secs(30);

fn print_help() {
    println!(
        "\
skillbridge v{}

Conversational skills runtime: calendar, search and phone skills served
over a duplex WebSocket stream, and a host that invokes them.

USAGE:
    skillbridge [OPTIONS] <COMMAND> [CONFIG_PATH] [ARGS]

COMMANDS:
    serve     Run the skill listener
    invoke    Act as a host: send turns to the skill named by [host].manifest_url

ARGUMENTS:
    CONFIG_PATH    Path to TOML configuration file [default: {DEFAULT_CONFIG}]

INVOKE ARGS:
    --action NAME        Start with a semantic action (CreateEvent, UpdateEvent,
                         Search, OutgoingCall)
    --slot KEY=VALUE     Slot of the semantic action (repeatable)
    --text TEXT          Text of the first turn
    --conversation ID    Conversation id [default: cli]

    After the first turn, each line read on stdin is sent as a new turn.

OPTIONS:
    -h, --help       Print this help message and exit
    -V, --version    Print version and exit

ENVIRONMENT VARIABLES:
    Variables are referenced in the config file via ${{VAR_NAME}} syntax.

    RUST_LOG              Log level filter for tracing
                          (e.g. debug, skillbridge=debug,warn)
    LUIS_KEY              Key of the NLU endpoint
    TAVILY_API_KEY        API key for Tavily web search
                          (from https://tavily.com)
    HOST_APP_PASSWORD     Password of the host app registration

EXAMPLES:
    skillbridge serve                                  # uses {DEFAULT_CONFIG}
    skillbridge invoke --action OutgoingCall --slot phoneNumber=+15550100
    RUST_LOG=debug skillbridge serve /etc/skillbridge.toml",
        env!("CARGO_PKG_VERSION"),
    );
}

/// Parsed `invoke` arguments.
#[derive(Debug, Default, PartialEq)]
struct InvokeArgs {
    action: Option<String>,
    slots: Vec<(String, String)>,
    text: Option<String>,
    conversation: Option<String>,
}

/// Splits positional config path from `invoke` flags.
fn parse_args(args: &[String]) -> Result<(Option<String>, InvokeArgs)> {
    let mut config_path = None;
    let mut invoke = InvokeArgs::default();
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        let mut value = |flag: &str| {
            iter.next()
                .cloned()
                .ok_or_else(|| anyhow!("{flag} needs a value"))
        };
        match arg.as_str() {
            "--action" => invoke.action = Some(value("--action")?),
            "--text" => invoke.text = Some(value("--text")?),
            "--conversation" => invoke.conversation = Some(value("--conversation")?),
            "--slot" => {
                let slot = value("--slot")?;
                let (key, val) = slot
                    .split_once('=')
                    .ok_or_else(|| anyhow!("--slot expects KEY=VALUE, got '{slot}'"))?;
                invoke.slots.push((key.trim().to_string(), val.trim().to_string()));
            }
            flag if flag.starts_with("--") => bail!("Unknown option {flag}"),
            path if config_path.is_none() => config_path = Some(path.to_string()),
            extra => bail!("Unexpected argument '{extra}'"),
        }
    }
    Ok((config_path, invoke))
}

#[tokio::main]
async fn main() -> Result<()> {
    // Handle --help / --version before anything else
    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--version" | "-V" => {
                println!("skillbridge v{}", env!("CARGO_PKG_VERSION"));
                std::process::exit(0);
            }
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            _ => {}
        }
    }

    // Initialize logging (RUST_LOG=debug for debug mode)
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("skillbridge=info")),
        )
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some((command, rest)) = args.split_first() else {
        print_help();
        bail!("Missing command");
    };
    let (config_path, invoke) = parse_args(rest)?;
    let config_path = config_path.unwrap_or_else(|| DEFAULT_CONFIG.to_string());

    println!(
        r#"
       _    _ _ _ _          _     _
   ___| | _(_) | | |__  _ __(_) __| | __ _  ___
  / __| |/ / | | | '_ \| '__| |/ _` |/ _` |/ _ \
  \__ \   <| | | | |_) | |  | | (_| | (_| |  __/
  |___/_|\_\_|_|_|_.__/|_|  |_|\__,_|\__, |\___|
                                     |___/   v{}
"#,
        env!("CARGO_PKG_VERSION")
    );

    info!("Loading configuration from {config_path}");
    let config = Config::load(&config_path)?;
    info!("Skill: {}", config.skill.name);
    info!("State store: {}", config.store.description());
    info!(
        "Recognizer: {}",
        config.recognizer.endpoint.as_deref().unwrap_or("none (semantic actions only)")
    );
    if let Some(search) = &config.search {
        info!("Search provider: {}", search.provider);
    }
    info!("Contacts: {} configured", config.contacts.len());

    match command.as_str() {
        "serve" => run_skill(&config).await,
        "invoke" => run_host(&config, invoke).await,
        other => {
            print_help();
            Err(anyhow!("Unknown command '{other}'"))
        }
    }
}

async fn run_skill(config: &Config) -> Result<()> {
    let services = Services::from_config(config)?;
    let bot: Arc<dyn TurnHandler> = Arc::new(SkillBot::new(services));
    let endpoint: Arc<dyn RequestHandler> = Arc::new(SkillEndpoint::new(bot, SKILL_TURN_TIMEOUT));

    tokio::select! {
        result = server::serve(&config.skill.listen, endpoint) => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received, exiting");
            Ok(())
        }
    }
}

fn open_store(config: &StoreConfig) -> Result<Arc<dyn StateStore>> {
    let store: Arc<dyn StateStore> = match config {
        StoreConfig::Memory => Arc::new(MemoryStore::new()),
        StoreConfig::File { path } => Arc::new(FileStore::open(path)?),
    };
    Ok(store)
}

async fn run_host(config: &Config, args: InvokeArgs) -> Result<()> {
    let host_config = config.host()?;

    // Manifest failure is fatal to startup.
    let manifest = SkillManifest::load(&host_config.manifest_url).await?;
    if let Some(name) = &args.action {
        match manifest.action(name) {
            Some(action) => {
                for (slot, _) in &args.slots {
                    if action.slot(slot).is_none() {
                        warn!("Action {name} does not declare slot {slot}");
                    }
                }
            }
            None if !manifest.actions.is_empty() => {
                warn!("Manifest {} does not declare action {name}", manifest.id)
            }
            None => {}
        }
    }

    let credentials = Arc::new(AppCredentials::new(
        &host_config.app_id,
        &host_config.app_password,
        host_config.token_endpoint.as_deref(),
    ));
    let timeout = Duration::from_secs(host_config.invoke_timeout_secs);
    let skill = RemoteSkill::new(manifest, credentials, host_config.reconnect.clone(), timeout)?;
    info!(
        "Host {} invoking {} as {}",
        host_config.app_id,
        skill.manifest().name,
        host_config.channel_id
    );
    let host = ConversationHost::new(open_store(&config.store)?, Arc::new(skill), timeout * 2);

    let conversation = args.conversation.clone().unwrap_or_else(|| "cli".to_string());
    let template = |text: &str| {
        let mut activity = Activity::message(text);
        activity.channel_id = host_config.channel_id.clone();
        activity.conversation = ConversationAccount {
            id: conversation.clone(),
        };
        activity.from = ChannelAccount {
            id: "user".to_string(),
            name: None,
        };
        activity.recipient = ChannelAccount {
            id: config.skill.name.clone(),
            name: None,
        };
        activity.locale = Some(config.user.locale.clone());
        activity
    };

    if args.action.is_some() || args.text.is_some() {
        let mut first = template(args.text.as_deref().unwrap_or(""));
        if let Some(action) = &args.action {
            let mut semantic = SemanticAction::new(action);
            for (key, value) in &args.slots {
                semantic = semantic.with_slot(key, Entity::text(value));
            }
            first.semantic_action = Some(semantic);
        }
        run_turn(&host, &first).await;
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received, exiting");
                return Ok(());
            }
        };
        let Some(line) = line else {
            return Ok(());
        };
        if line.trim().is_empty() {
            continue;
        }
        run_turn(&host, &template(line.trim())).await;
    }
}

async fn run_turn(host: &ConversationHost, activity: &Activity) {
    match host.process(activity).await {
        Ok(activities) => {
            for sent in activities {
                print_activity(&sent);
            }
        }
        Err(e) if e.is_conflict() => warn!("Turn dropped, another turn won the race: {e}"),
        Err(e) => error!("Turn failed: {e}"),
    }
}

fn print_activity(activity: &Activity) {
    match activity.activity_type.as_str() {
        crate::activity::MESSAGE => println!("skill> {}", activity.text()),
        crate::activity::EVENT => println!(
            "skill> [event {}] {}",
            activity.name.as_deref().unwrap_or("?"),
            activity
                .value
                .as_ref()
                .map(|v| v.to_string())
                .unwrap_or_default()
        ),
        crate::activity::END_OF_CONVERSATION => println!("skill> [end of conversation]"),
        other => println!("skill> [{other}]"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_invoke_args() {
        let (path, invoke) = parse_args(&args(&[
            "my.toml",
            "--action",
            "OutgoingCall",
            "--slot",
            "phoneNumber = +15550100",
            "--slot",
            "contactPerson=Ada",
            "--conversation",
            "c9",
        ]))
        .unwrap();
        assert_eq!(path.as_deref(), Some("my.toml"));
        assert_eq!(invoke.action.as_deref(), Some("OutgoingCall"));
        assert_eq!(
            invoke.slots,
            vec![
                ("phoneNumber".to_string(), "+15550100".to_string()),
                ("contactPerson".to_string(), "Ada".to_string())
            ]
        );
        assert_eq!(invoke.conversation.as_deref(), Some("c9"));
    }

    #[test]
    fn test_parse_defaults_and_errors() {
        let (path, invoke) = parse_args(&[]).unwrap();
        assert!(path.is_none());
        assert_eq!(invoke, InvokeArgs::default());

        assert!(parse_args(&args(&["--slot", "novalue"])).is_err());
        assert!(parse_args(&args(&["--text"])).is_err());
        assert!(parse_args(&args(&["--bogus"])).is_err());
        assert!(parse_args(&args(&["a.toml", "b.toml"])).is_err());
    }

    #[test]
    fn test_open_store_backends() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(open_store(&StoreConfig::Memory).unwrap().backend(), "memory");
        let store = open_store(&StoreConfig::File {
            path: dir.path().join("state"),
        })
        .unwrap();
        assert_eq!(store.backend(), "file");
    }
}
