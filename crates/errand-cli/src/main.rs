//! errand - command-line front end for the errand task, appointment and
//! contact service.
//!
//! Every protected command goes through the shared session, so an expired
//! access token is renewed transparently and a dead session ends with a
//! request to sign in again.

use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::Local;
use errand_core::api::{AccountsApi, Ack, DashboardCounts, Registration};
use errand_core::{ApiClient, ApiError, Config, CredentialStore, SessionContext, SessionState};
use tracing::{debug, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Directory for a daily-rotated log file, in addition to stderr
const ENV_LOG_DIR: &str = "ERRAND_LOG_DIR";

/// Password for `login`, instead of prompting
const ENV_PASSWORD: &str = "ERRAND_PASSWORD";

const USAGE: &str = "\
Usage: errand <command>

Commands:
  login [email]   Sign in and remember the session
  logout          Forget the stored session
  register <email> <full name>
                  Create an account; an activation link is emailed
  activate <uid> <token>
                  Activate an account from its emailed link
  resend-activation <email>
                  Email a new activation link
  forgot-password <email>
                  Email a password reset link
  reset-password <uid> <token>
                  Choose a new password from a reset link
  whoami          Show the signed-in user
  tasks           List tasks
  appointments    List appointments
  contacts        List contacts
  summary         Show item counts

Environment:
  ERRAND_API_BASE        API base URL (default http://localhost:8000/api)
  ERRAND_TOKEN_STORAGE   keyring, file or memory
  ERRAND_PASSWORD        Password for login, register and reset-password
  ERRAND_LOG_DIR         Also write logs to this directory
  RUST_LOG               Log filter (default warn)";

/// Initialize the tracing subscriber for logging
fn init_tracing() -> Option<WorkerGuard> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let (file_layer, guard) = match std::env::var_os(ENV_LOG_DIR) {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(PathBuf::from(dir), "errand.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().with_writer(writer).with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();

    guard
}

#[tokio::main]
async fn main() -> ExitCode {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();
    let _guard = init_tracing();

    let args: Vec<String> = std::env::args().skip(1).collect();
    match run(&args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            match e.downcast_ref::<ApiError>() {
                Some(api_err) if api_err.is_session_failure() => {
                    eprintln!("{}. Run `errand login` to sign in.", api_err);
                }
                _ => eprintln!("Error: {:#}", e),
            }
            ExitCode::FAILURE
        }
    }
}

async fn run(args: &[String]) -> Result<()> {
    let command = args.first().map(String::as_str).unwrap_or("help");
    match command {
        "login" => login(args.get(1).cloned()).await,
        "logout" => logout(),
        "register" => match (args.get(1), args.get(2..).filter(|rest| !rest.is_empty())) {
            (Some(email), Some(name)) => register(email, &name.join(" ")).await,
            _ => bail!("Usage: errand register <email> <full name>"),
        },
        "activate" => match (args.get(1), args.get(2)) {
            (Some(uid), Some(token)) => activate(uid, token).await,
            _ => bail!("Usage: errand activate <uid> <token>"),
        },
        "resend-activation" => match args.get(1) {
            Some(email) => resend_activation(email).await,
            None => bail!("Usage: errand resend-activation <email>"),
        },
        "forgot-password" => match args.get(1) {
            Some(email) => forgot_password(email).await,
            None => bail!("Usage: errand forgot-password <email>"),
        },
        "reset-password" => match (args.get(1), args.get(2)) {
            (Some(uid), Some(token)) => reset_password(uid, token).await,
            _ => bail!("Usage: errand reset-password <uid> <token>"),
        },
        "whoami" => whoami().await,
        "tasks" => list_tasks().await,
        "appointments" => list_appointments().await,
        "contacts" => list_contacts().await,
        "summary" => summary().await,
        "help" | "-h" | "--help" => {
            println!("{}", USAGE);
            Ok(())
        }
        "-V" | "--version" => {
            println!("errand {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        other => bail!("Unknown command '{}'\n\n{}", other, USAGE),
    }
}

fn open_session(config: &Config) -> Result<SessionContext> {
    let store = Arc::new(CredentialStore::open(config.token_backend()?));
    debug!(backend = store.backend_name(), api_base = %config.api_base, "Opening session");
    let api = ApiClient::from_config(config, store)?;
    Ok(SessionContext::new(api))
}

/// Open the session and insist that someone is signed in.
async fn signed_in() -> Result<SessionContext> {
    let config = Config::load()?;
    let session = open_session(&config)?;
    restore(&session).await?;
    Ok(session)
}

/// Load the stored session. A server that cannot be reached is reported as
/// such, not as being signed out.
async fn restore(session: &SessionContext) -> Result<()> {
    match session.start().await? {
        SessionState::Authenticated(user) => {
            debug!(user_id = user.id, "Session restored");
            Ok(())
        }
        _ => bail!(ApiError::Unauthenticated),
    }
}

async fn login(email: Option<String>) -> Result<()> {
    let mut config = Config::load()?;
    let email = match email.or_else(|| config.last_email.clone()) {
        Some(email) => email,
        None => prompt("Email: ")?,
    };
    let password = match std::env::var(ENV_PASSWORD) {
        Ok(password) => password,
        Err(_) => rpassword::prompt_password(format!("Password for {}: ", email))
            .context("Failed to read password")?,
    };

    let session = open_session(&config)?;
    let user = match session.sign_in(&email, &password).await {
        Ok(user) => user,
        Err(ApiError::Validation(errors)) => bail!("Sign-in failed: {}", errors),
        Err(e) => return Err(e.into()),
    };

    config.last_email = Some(email);
    if let Err(e) = config.save() {
        debug!(error = %e, "Failed to remember email");
    }
    info!(user_id = user.id, "Signed in");
    println!("Signed in as {} <{}>", user.display_name(), user.email);
    Ok(())
}

fn logout() -> Result<()> {
    let config = Config::load()?;
    open_session(&config)?.sign_out();
    println!("Signed out");
    Ok(())
}

fn accounts() -> Result<AccountsApi> {
    let config = Config::load()?;
    Ok(open_session(&config)?.api().accounts())
}

/// New password and its confirmation, from the environment or prompted.
fn new_password() -> Result<(String, String)> {
    if let Ok(password) = std::env::var(ENV_PASSWORD) {
        return Ok((password.clone(), password));
    }
    let password = rpassword::prompt_password("New password: ").context("Failed to read password")?;
    let confirm = rpassword::prompt_password("Repeat password: ").context("Failed to read password")?;
    Ok((password, confirm))
}

fn print_ack(ack: Ack, fallback: &str) {
    println!("{}", ack.message.unwrap_or_else(|| fallback.to_string()));
}

async fn register(email: &str, full_name: &str) -> Result<()> {
    let (password, password_confirm) = new_password()?;
    let registered = accounts()?
        .register(&Registration {
            full_name,
            email,
            password: &password,
            password_confirm: &password_confirm,
        })
        .await?;
    info!(user_id = registered.user_id, "Account registered");
    if registered.message.is_empty() {
        println!("Registered; check {} for the activation link", email);
    } else {
        println!("{}", registered.message);
    }
    Ok(())
}

async fn activate(uid: &str, token: &str) -> Result<()> {
    print_ack(accounts()?.activate(uid, token).await?, "Account activated");
    Ok(())
}

async fn resend_activation(email: &str) -> Result<()> {
    print_ack(
        accounts()?.resend_activation(email).await?,
        "Activation link sent",
    );
    Ok(())
}

async fn forgot_password(email: &str) -> Result<()> {
    print_ack(
        accounts()?.request_password_reset(email).await?,
        "Password reset link sent",
    );
    Ok(())
}

async fn reset_password(uid: &str, token: &str) -> Result<()> {
    let (password, password_confirm) = new_password()?;
    let ack = accounts()?
        .confirm_password_reset(uid, token, &password, &password_confirm)
        .await?;
    print_ack(ack, "Password changed; sign in with `errand login`");
    Ok(())
}

async fn whoami() -> Result<()> {
    let session = signed_in().await?;
    let Some(user) = session.user() else {
        bail!(ApiError::Unauthenticated);
    };
    println!("{} <{}>", user.display_name(), user.email);

    let profile = session.api().profile().await?;
    if !profile.full_name.is_empty() && profile.full_name != user.display_name() {
        println!("Profile name: {}", profile.full_name);
    }
    Ok(())
}

async fn list_tasks() -> Result<()> {
    let session = signed_in().await?;
    let mut tasks = session.api().tasks().list().await?;
    tasks.sort_by_key(|t| (t.completed, t.date, t.priority));

    let today = Local::now().date_naive();
    for task in &tasks {
        let mark = if task.completed {
            "x"
        } else if task.is_overdue(today) {
            "!"
        } else {
            " "
        };
        println!(
            "[{}] {:>4}  {:<6}  {:<20}  {}",
            mark,
            task.id,
            task.priority.to_string(),
            task.due_display(),
            task.description
        );
    }
    if tasks.is_empty() {
        println!("No tasks");
    }
    Ok(())
}

async fn list_appointments() -> Result<()> {
    let session = signed_in().await?;
    let mut appointments = session.api().appointments().list().await?;
    appointments.sort_by_key(|a| a.starts_at());

    for appointment in &appointments {
        let place = appointment.location.as_deref().unwrap_or_default();
        println!(
            "{:>4}  {:<22}  {}  {}",
            appointment.id,
            appointment.when_display(),
            appointment.title,
            place
        );
    }
    if appointments.is_empty() {
        println!("No appointments");
    }
    Ok(())
}

async fn list_contacts() -> Result<()> {
    let session = signed_in().await?;
    let mut contacts = session.api().contacts().list().await?;
    contacts.sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase()));

    for contact in &contacts {
        println!(
            "{:>4}  {:<24}  {:<28}  {}",
            contact.id,
            contact.name,
            contact.email.as_deref().unwrap_or_default(),
            contact.affiliation().unwrap_or_default()
        );
    }
    if contacts.is_empty() {
        println!("No contacts");
    }
    Ok(())
}

async fn summary() -> Result<()> {
    let session = signed_in().await?;
    let counts = DashboardCounts::fetch(session.api()).await?;
    if let Some(user) = session.user() {
        println!("{}", user.display_name());
    }
    println!("Tasks:        {} ({} open)", counts.tasks, counts.open_tasks);
    println!("Appointments: {}", counts.appointments);
    println!("Contacts:     {}", counts.contacts);
    Ok(())
}

fn prompt(label: &str) -> Result<String> {
    print!("{}", label);
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    let line = line.trim().to_string();
    if line.is_empty() {
        bail!("No email given");
    }
    Ok(line)
}
