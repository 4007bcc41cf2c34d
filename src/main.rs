use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use intentbridge::{
    bridge::{Courier, Incoming, LinkCategory, LocalBridge, RouteDecision, RoutingPrefs},
    config::Config,
    constants::*,
    events::{dispatcher, EventDispatcher, LogLevel},
    network::{MessageServer, SharePayload},
    role::{Role, RoleStore},
    BridgeError, TrustContext,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;

#[derive(Parser, Debug)]
#[command(author, version, about = "Loopback mutual-TLS bridge between two profiles")]
struct Args {
    /// Optional path to config file (TOML)
    #[arg(short, long)]
    config: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the message server for this context's role until Ctrl-C
    Listen,
    /// Check that the peer is reachable and still has the pinned identity
    Ping,
    /// Open a link: keep it here or hand it to the peer, per the routing preferences
    Open { uri: String },
    /// Hand a link to the peer regardless of routing
    Handoff { uri: String },
    /// Set which role opens links of CATEGORY and tell the peer
    Route { category: String, role: Role },
    /// Share text and/or files with the peer
    Share {
        #[arg(long)]
        subject: Option<String>,
        #[arg(long)]
        text: Option<String>,
        #[arg(long)]
        mime: Option<String>,
        files: Vec<PathBuf>,
    },
    /// Show role, fingerprints, pin and auth state
    Status,
    /// Forget the pinned peer identity
    ResetPin,
    /// Replace this context's identity (also clears the pin)
    Regenerate,
    /// Switch role; regenerates the identity
    SetRole { role: Role },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| "intentbridge.toml".to_string());
    let (config, found) = Config::load_or_default(&config_path)?;

    // Initialize events AFTER config is loaded so custom logging path can be applied
    intentbridge::events::init_events_from_config(config.logging.as_ref()).await;
    if found {
        dispatcher::emit_system("config", LogLevel::Info, "config_loaded", Some(config_path.clone()));
    } else {
        dispatcher::emit_system(
            "config",
            LogLevel::Warn,
            "config_default",
            Some(format!("no config file at '{}'", config_path)),
        );
    }

    let state_dir = config.state_dir();
    let mut role_store = RoleStore::open(Some(state_dir.as_path())).context("opening role state")?;
    let role = match config.role {
        Some(role) => role,
        None => role_store.role().context("reading role")?,
    };
    let ctx = TrustContext::open(Some(state_dir.as_path()), role).context("opening trust state")?;
    let routing = Arc::new(RoutingPrefs::open(Some(state_dir.as_path())).context("opening routing state")?);
    let outcome = run(args.command, &config, ctx, routing, &mut role_store).await;

    if let Some(d) = EventDispatcher::global() {
        // let queued events reach the sinks
        tokio::time::sleep(Duration::from_millis(50)).await;
        d.flush().await;
    }
    outcome
}

async fn run(
    command: Command,
    config: &Config,
    ctx: TrustContext,
    routing: Arc<RoutingPrefs>,
    role_store: &mut RoleStore,
) -> Result<()> {
    let settings = config.settings();
    let role = ctx.role();
    match command {
        Command::Listen => {
            let identity = ctx.ensure_identity().context("preparing identity")?;
            let bridge = Arc::new(LocalBridge::new(routing.clone()));
            let mut incoming = bridge.subscribe();
            let server = MessageServer::new(ctx.clone(), bridge, settings.clone());
            match server.start(role).await {
                Ok(()) => {}
                Err(BridgeError::PortInUse { port, .. }) => {
                    println!(
                        "⚠️ Port {} is already in use; another instance probably serves {}.",
                        port,
                        role.describe()
                    );
                    return Ok(());
                }
                Err(e) => return Err(e).context("starting listener"),
            }
            println!(
                "{}{} {} listening on {}:{} (fingerprint {})",
                ICON_PLACEHOLDER,
                DEFAULT_APP_NAME,
                role.describe(),
                LOOPBACK_HOST,
                server.local_port().unwrap_or_default(),
                identity.fingerprint
            );
            loop {
                tokio::select! {
                    _ = signal::ctrl_c() => break,
                    received = incoming.recv() => match received {
                        Ok(Incoming::Handoff { uri, .. }) => println!("🔗 {}", uri),
                        Ok(Incoming::Share { id, summary, items, .. }) => println!(
                            "📥 share {} ({} item(s)): {}",
                            id,
                            items,
                            summary.unwrap_or_default()
                        ),
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => {}
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                    }
                }
            }
            server.stop().await;
            println!("{}Listener stopped.", ICON_PLACEHOLDER);
        }
        Command::Ping => {
            let courier = Courier::new(ctx.clone(), settings, routing);
            let (host, port) = courier.target();
            let result = courier.ping().await;
            if result.success {
                println!("✅ Peer at {}:{} answered.", host, port);
            } else if result.auth_error {
                println!(
                    "❌ Peer identity changed. Reset the pin (`reset-pin`) if this is expected."
                );
            } else {
                println!(
                    "❌ Peer at {}:{} unreachable: {}",
                    host,
                    port,
                    result.message.unwrap_or_default()
                );
            }
        }
        Command::Open { uri } => {
            let category = LinkCategory::classify(&uri);
            let courier = Courier::new(ctx, settings, routing);
            match courier.route(&uri).await {
                RouteDecision::Local => {
                    println!("🔗 {} ({}) opens in {}", uri, category, role.describe())
                }
                RouteDecision::Forwarded(true) => println!(
                    "✅ Handed {} ({}) to {}",
                    uri,
                    category,
                    role.opposite().describe()
                ),
                RouteDecision::Forwarded(false) => anyhow::bail!("could not hand off {}", uri),
            }
        }
        Command::Handoff { uri } => {
            let courier = Courier::new(ctx, settings, routing);
            if !courier.handoff(&uri).await {
                anyhow::bail!("could not hand off {}", uri);
            }
            println!("✅ Handed off {}", uri);
        }
        Command::Route { category, role: target } => {
            let category = LinkCategory::from_key(&category)
                .with_context(|| format!("unknown link category '{}'", category))?;
            let courier = Courier::new(ctx, settings, routing);
            let synced = courier.sync_routing_preference(category, target).await?;
            println!(
                "{}{} -> {}{}",
                ICON_PLACEHOLDER,
                category,
                target,
                if synced { "" } else { " (peer not updated)" }
            );
        }
        Command::Share {
            subject,
            text,
            mime,
            files,
        } => {
            let payload = SharePayload::from_files(&files, mime, subject, text, settings.max_message_bytes)
                .await
                .context("building share payload")?;
            if payload.is_empty() {
                anyhow::bail!("nothing to share: pass --text or files");
            }
            let courier = Courier::new(ctx, settings, routing);
            if !courier.share(payload).await {
                anyhow::bail!("could not deliver share");
            }
            println!("✅ Share delivered");
        }
        Command::Status => {
            let local = ctx.local_fingerprint().context("preparing identity")?;
            println!("Role:              {} ({})", role, role.describe());
            println!("Listening port:    {}", settings.listening_port(role));
            println!("Peer port:         {}", settings.target_port(role));
            println!("Local fingerprint: {}", local);
            println!(
                "Pinned peer:       {}",
                ctx.pinned_peer_fingerprint()
                    .unwrap_or_else(|| "none (next peer will be trusted on first use)".into())
            );
            println!("Auth error:        {}", ctx.has_auth_error());
            for category in LinkCategory::ALL {
                println!("Route {:<12} {}", category.key(), routing.preferred_role(category));
            }
        }
        Command::ResetPin => {
            ctx.reset_pin().context("resetting pin")?;
            println!("✅ Pin cleared; the next peer seen will be pinned.");
        }
        Command::Regenerate => {
            let identity = ctx.regenerate_identity().context("regenerating identity")?;
            println!("✅ New fingerprint {}", identity.fingerprint);
        }
        Command::SetRole { role: new_role } => {
            role_store.set_role(new_role).context("persisting role")?;
            let identity = ctx.set_role(new_role).context("regenerating identity")?;
            println!(
                "✅ Role set to {} (port {}), new fingerprint {}",
                new_role.describe(),
                settings.listening_port(new_role),
                identity.fingerprint
            );
            if config.role.is_some() {
                println!("⚠️ The config file sets `role`, which overrides the stored role.");
            }
        }
    }
    Ok(())
}
