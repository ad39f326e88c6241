use clap::{Parser, Subcommand};
use examhub_client::{
    BellUpdate, MountedBell, NotificationBell, Session, format_notification, shared_bell,
};
use examhub_sdk::{AppConfig, ExamHubClient};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;
use tracing::debug;
use tracing_subscriber::{EnvFilter, fmt};

mod admin_commands;
mod auth_commands;

use admin_commands::fail;

#[derive(Parser)]
#[command(name = "examhub")]
#[command(about = "ExamHub notification client")]
struct Cli {
    #[arg(short, long, env = "EXAMHUB_SERVER_URL", default_value = "http://localhost:8080")]
    server: String,

    /// Where the login token is stored
    #[arg(long, env = "EXAMHUB_TOKEN_FILE")]
    token_file: Option<PathBuf>,

    /// HTTP timeout in seconds
    #[arg(long, default_value = "30")]
    timeout: u64,

    /// Do not reconnect the notification stream after it drops
    #[arg(long)]
    no_reconnect: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// User authentication
    Auth {
        #[command(subcommand)]
        action: auth_commands::AuthAction,
    },
    /// List my notifications
    Notifications,
    /// Mark one of my notifications as read
    Read {
        /// Notification ID
        id: i64,
    },
    /// Admin notification management
    Admin {
        #[command(subcommand)]
        action: admin_commands::AdminAction,
    },
    /// Listen for live notifications
    Listen {
        /// Number of bell instances sharing the stream
        #[arg(long, default_value = "1")]
        instances: usize,
    },
}

impl Cli {
    fn app_config(&self) -> AppConfig {
        AppConfig {
            server_url: self.server.clone(),
            timeout_seconds: self.timeout,
            reconnect: !self.no_reconnect,
            ..AppConfig::default()
        }
    }

    fn token_path(&self) -> PathBuf {
        if let Some(path) = &self.token_file {
            return path.clone();
        }
        match std::env::var_os("HOME") {
            Some(home) => PathBuf::from(home).join(".examhub").join("token"),
            None => PathBuf::from(".examhub-token"),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let cli = Cli::parse();
    let config = cli.app_config();
    let session = Arc::new(Session::load(cli.token_path())?);
    let client = ExamHubClient::from_config(&config);

    match cli.command {
        Commands::Auth { action } => {
            auth_commands::handle_auth_command(&client, &session, action).await?;
        }
        Commands::Notifications => {
            match session.authorized(&client).get_user_notifications().await {
                Ok(list) => {
                    let unread = list.iter().filter(|n| !n.is_read).count();
                    println!("🔔 Notifications ({} total, {} unread):", list.len(), unread);
                    if list.is_empty() {
                        println!("   📭 No notifications yet.");
                    }
                    for notification in &list {
                        println!("{}", format_notification(notification));
                    }
                }
                Err(e) => fail(&session, "get notifications", e),
            }
        }
        Commands::Read { id } => match session.authorized(&client).mark_user_as_read(id).await {
            Ok(()) => println!("✅ Notification {} marked as read", id),
            Err(e) => fail(&session, "mark notification as read", e),
        },
        Commands::Admin { action } => {
            admin_commands::handle_admin_command(&client, &session, action).await?;
        }
        Commands::Listen { instances } => {
            listen(&client, session, &config, instances.max(1)).await;
        }
    }

    Ok(())
}

async fn listen(client: &ExamHubClient, session: Arc<Session>, config: &AppConfig, instances: usize) {
    let bells: Vec<NotificationBell> = (0..instances)
        .map(|_| shared_bell(client, session.clone(), config))
        .collect();
    let holder = Arc::clone(bells[0].holder());
    let mut updates = merge_updates(&bells);

    let mounted: Vec<MountedBell> = bells.iter().filter_map(NotificationBell::mount).collect();
    debug!(requested = instances, mounted = mounted.len(), "bells mounted");
    if mounted.is_empty() {
        eprintln!("❌ Not logged in or token expired");
        eprintln!("💡 Please login first: examhub auth login <user> <pass>");
        std::process::exit(1);
    }

    println!(
        "🎧 Listening for notifications ({} bell instance(s), 1 shared stream)...",
        mounted.len()
    );
    println!("   Press Ctrl+C to stop");

    let mut watchdog = tokio::time::interval(Duration::from_secs(1));
    // 最近一次完成刷新的实例，其缓存反映完整列表
    let mut primary = 0;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = watchdog.tick() => {
                if !holder.is_open() {
                    eprintln!("🔌 Notification stream closed");
                    break;
                }
            }
            update = updates.recv() => match update {
                Some((index, BellUpdate::Refreshed(count))) => {
                    primary = index;
                    println!(
                        "📬 {} notifications loaded, {} unread",
                        count,
                        bells[index].unread_count()
                    );
                }
                // 每个实例都会收到同一条推送，只打印一次
                Some((index, BellUpdate::Pushed(notification))) if index == primary => {
                    println!("🔔 New notification:");
                    println!("{}", format_notification(&notification));
                    println!("   Unread: {}", bells[index].unread_count());
                }
                Some(_) => {}
                None => break,
            },
        }
    }

    drop(mounted);
    println!("👋 Stopped listening");
}

/// Funnels every bell's updates into one channel, tagged with the bell's index.
fn merge_updates(bells: &[NotificationBell]) -> mpsc::UnboundedReceiver<(usize, BellUpdate)> {
    let (tx, rx) = mpsc::unbounded_channel();
    for (index, bell) in bells.iter().enumerate() {
        let mut updates = bell.updates();
        let tx = tx.clone();
        tokio::spawn(async move {
            loop {
                match updates.recv().await {
                    Ok(update) => {
                        if tx.send((index, update)).is_err() {
                            break;
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        debug!(index, skipped, "listen output lagged behind bell updates");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });
    }
    rx
}
