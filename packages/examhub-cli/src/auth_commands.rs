use anyhow::Result;
use clap::Subcommand;
use examhub_client::Session;
use examhub_sdk::{ExamHubClient, TokenProvider};

#[derive(Subcommand)]
pub enum AuthAction {
    /// Login with username and password
    Login {
        /// Username
        username: String,
        /// Password
        password: String,
    },
    /// Register a new user
    Signup {
        /// Username
        username: String,
        /// Password
        password: String,
        /// Requested role (repeatable), e.g. ROLE_STUDENT
        #[arg(long = "role")]
        roles: Vec<String>,
    },
    /// Forget the stored token
    Logout,
    /// Show the logged-in user
    Whoami,
}

pub async fn handle_auth_command(
    client: &ExamHubClient,
    session: &Session,
    action: AuthAction,
) -> Result<()> {
    match action {
        AuthAction::Login { username, password } => {
            println!("🔑 Logging in...");

            match session.login(client, &username, &password).await {
                Ok(_) => {
                    println!("✅ Login successful!");
                    if let Some(user) = session.current_user() {
                        println!("👤 User: {}", user.username);
                        println!("🔐 Roles: {}", user.roles.join(", "));
                    }
                    if let Some(path) = session.path() {
                        println!("💾 Token saved to {}", path.display());
                    }
                }
                Err(e) => {
                    eprintln!("❌ Login failed: {}", e);
                    std::process::exit(1);
                }
            }
        }

        AuthAction::Signup {
            username,
            password,
            roles,
        } => {
            println!("🔐 Registering new user...");

            match client.signup(&username, &password, &roles).await {
                Ok(response) => {
                    println!("✅ User '{}' registered successfully!", username);
                    if let Some(text) = response.as_str() {
                        println!("   {}", text);
                    } else if !response.is_null() {
                        println!("   {}", response);
                    }
                    println!(
                        "💡 You can now login with: examhub auth login {} <password>",
                        username
                    );
                }
                Err(e) => {
                    eprintln!("❌ Registration failed: {}", e);
                    std::process::exit(1);
                }
            }
        }

        AuthAction::Logout => {
            session.logout()?;
            println!("👋 Logged out");
        }

        AuthAction::Whoami => match session.current_user() {
            Some(user) => {
                println!("👤 {}", user.username);
                println!("🔐 Roles: {}", user.roles.join(", "));
                if session.is_token_valid() {
                    println!("🟢 Token valid");
                } else {
                    println!("🔴 Token expired, please login again");
                }
            }
            None => {
                println!("❌ Not logged in");
                println!("💡 Please login first: examhub auth login <user> <pass>");
            }
        },
    }

    Ok(())
}
