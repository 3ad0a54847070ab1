use clap::{Parser, Subcommand};
use formshive_auth::models::{
    ChallengeResponse, EmailChallengeResponse, GoogleChallengeResponse, NostrChallengeResponse,
};
use formshive_auth::storage::FileStorage;
use formshive_auth::{AuthConfig, AuthError, LoginRequest, RustyAuth, Session};
use log::error;
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;

/// Command-line access to a Formshive account session.
#[derive(Debug, Parser)]
#[command(name = "formshive-auth", version, about)]
struct Cli {
    /// Directory holding the persisted session.
    #[arg(long, env = "FORMSHIVE_STORAGE_DIR", default_value = ".formshive")]
    storage_dir: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Start a login and print the challenge.
    Login {
        #[command(subcommand)]
        method: LoginCommand,
    },
    /// Answer a login challenge and store the session.
    Challenge {
        #[command(subcommand)]
        method: ChallengeCommand,
    },
    /// Print the current session state.
    Status,
    /// Refresh the token pair.
    Refresh,
    /// Print a valid access token, refreshing first if needed.
    Token,
    /// Log out and remove the stored session.
    Logout,
}

#[derive(Debug, Subcommand)]
enum LoginCommand {
    Email {
        email: String,
        #[arg(long)]
        referral: Option<String>,
    },
    Nostr {
        public_key: String,
        #[arg(long)]
        referral: Option<String>,
    },
    Google {
        #[arg(long)]
        referral: Option<String>,
    },
}

#[derive(Debug, Subcommand)]
enum ChallengeCommand {
    Email {
        #[arg(long)]
        id: String,
        #[arg(long)]
        code: String,
    },
    Nostr {
        #[arg(long)]
        id: String,
        #[arg(long)]
        public_key: String,
        /// Signed challenge event as JSON.
        #[arg(long)]
        signed_event: String,
    },
    Google {
        #[arg(long)]
        code: String,
        #[arg(long)]
        state: String,
    },
}

impl LoginCommand {
    fn into_request(self) -> LoginRequest {
        let (request, referral) = match self {
            LoginCommand::Email { email, referral } => (LoginRequest::email(email), referral),
            LoginCommand::Nostr {
                public_key,
                referral,
            } => (LoginRequest::nostr(public_key), referral),
            LoginCommand::Google { referral } => (LoginRequest::google(), referral),
        };
        match referral {
            Some(code) => request.with_referral_code(code),
            None => request,
        }
    }
}

impl ChallengeCommand {
    fn into_response(self) -> ChallengeResponse {
        match self {
            ChallengeCommand::Email { id, code } => {
                ChallengeResponse::EmailMagicLink(EmailChallengeResponse { id, code })
            }
            ChallengeCommand::Nostr {
                id,
                public_key,
                signed_event,
            } => ChallengeResponse::Nostr(NostrChallengeResponse {
                id,
                public_key,
                signed_event,
            }),
            ChallengeCommand::Google { code, state } => {
                ChallengeResponse::Google(GoogleChallengeResponse { code, state })
            }
        }
    }
}

async fn run(cli: Cli) -> Result<(), AuthError> {
    let config = AuthConfig::from_env()?;
    let storage = Arc::new(FileStorage::new(cli.storage_dir));
    let auth = RustyAuth::connect(config, storage)?;

    match cli.command {
        Command::Login { method } => {
            let challenge = auth.login(method.into_request()).await?;
            println!("{}", serde_json::to_string_pretty(&challenge)?);
        }
        Command::Challenge { method } => {
            let session = auth.login_challenge(method.into_response()).await?;
            println!(
                "Logged in as {} via {}",
                session.user_id,
                session.method.as_str()
            );
        }
        Command::Status => {
            let status = match auth.get_session() {
                Session::LoggedOut => json!({ "isLoggedIn": false }),
                Session::LoggedIn(session) => json!({
                    "isLoggedIn": true,
                    "userId": session.user_id,
                    "method": session.method.as_str(),
                    "accessTokenExpiresAt": session.access_token_expires_at,
                    "refreshTokenExpiresAt": session.refresh_token_expires_at,
                    "hasValidSession": auth.has_valid_session(None),
                    "hasValidAccessToken": auth.has_valid_access_token(None),
                    "needsRefresh": auth.needs_refresh(None),
                }),
            };
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        Command::Refresh => match auth.refresh().await? {
            Some(session) => println!(
                "Refreshed; access token valid until {}",
                session.access_token_expires_at
            ),
            None => println!("Auth service unavailable; current session kept, try again later"),
        },
        Command::Token => println!("{}", auth.access_token_with_refresh().await?),
        Command::Logout => {
            auth.logout().await?;
            println!("Logged out");
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();
    env_logger::init();

    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        error!("{}", e);
        eprintln!("{}", e);
        std::process::exit(1);
    }
}
