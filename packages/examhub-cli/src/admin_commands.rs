use anyhow::Result;
use clap::Subcommand;
use examhub_client::{Session, format_notification};
use examhub_sdk::{ExamHubClient, NotificationInput, SdkError, TokenProvider};

#[derive(Subcommand)]
pub enum AdminAction {
    /// List notifications managed by this admin
    List {
        /// Include every notification on the platform
        #[arg(long)]
        all: bool,
    },
    /// Create a notification for a user, a role, or everyone
    Create {
        /// Notification message
        message: String,
        /// Recipient username
        #[arg(long)]
        user: Option<String>,
        /// Recipient role, e.g. ROLE_TEACHER
        #[arg(long)]
        role: Option<String>,
        /// Send to all users
        #[arg(long)]
        to_all: bool,
    },
    /// Mark a notification as read
    Read {
        /// Notification ID
        id: i64,
    },
}

pub async fn handle_admin_command(
    client: &ExamHubClient,
    session: &Session,
    action: AdminAction,
) -> Result<()> {
    let client = session.authorized(client);

    match action {
        AdminAction::List { all } => {
            let result = if all {
                client.get_all_notifications().await
            } else {
                client.get_notifications().await
            };
            match result {
                Ok(list) => {
                    println!("📋 Notifications ({} total):", list.len());
                    for notification in &list {
                        println!("{}", format_notification(notification));
                    }
                }
                Err(e) => fail(session, "list notifications", e),
            }
        }

        AdminAction::Create {
            message,
            user,
            role,
            to_all,
        } => {
            let input = NotificationInput {
                message,
                target_username: user,
                target_role: role,
                to_all,
            };
            match client.create_notification(&input).await {
                Ok(()) => println!("✅ Notification created"),
                Err(e) => fail(session, "create notification", e),
            }
        }

        AdminAction::Read { id } => match client.mark_as_read(id).await {
            Ok(()) => println!("✅ Notification {} marked as read", id),
            Err(e) => fail(session, "mark notification as read", e),
        },
    }

    Ok(())
}

/// Reports an API failure and exits; a rejected token is dropped first.
pub fn fail(session: &Session, what: &str, e: SdkError) -> ! {
    if e.is_unauthorized() {
        session.invalidate();
        eprintln!("❌ Failed to {}: session expired, please login again", what);
    } else {
        eprintln!("❌ Failed to {}: {}", what, e);
    }
    std::process::exit(1);
}
