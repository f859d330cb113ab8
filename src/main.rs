use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use fieldcheck_client::api::eligibility::{self, Eligibility, EligibilityQuery, Prerequisite};
use fieldcheck_client::config::Config;
use fieldcheck_client::security::route_guard::Decision;
use fieldcheck_client::session::bootstrap::BootstrapOutcome;
use fieldcheck_client::transport::RequestSpec;
use fieldcheck_client::utils::logging;
use fieldcheck_client::{App, GatewayError};
use serde_json::Value;
use std::process::ExitCode;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "fieldcheck", version, about = "Field inspection checklist client")]
struct AppCli {
    /// Config file path
    #[arg(short, long, default_value = "config.json", global = true)]
    config: String,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sign in and store the session
    Login {
        #[arg(long)]
        email: String,
        #[arg(long, env = "FIELDCHECK_PASSWORD")]
        password: String,
    },
    /// End the session
    Logout,
    /// Show the current identity
    Whoami,
    /// Authenticated GET; prints the JSON body
    Get {
        path: String,
        /// key=value query parameters
        #[arg(short, long)]
        query: Vec<String>,
    },
    /// Authenticated POST of a JSON body
    Post { path: String, body: String },
    /// Check whether the current session may open a route
    Authorize { route: String },
    /// Check whether a prerequisite checklist exists
    Eligibility {
        #[arg(value_enum)]
        kind: EligibilityKind,
        #[arg(long)]
        date: String,
        #[arg(long)]
        team: String,
        #[arg(long = "member")]
        members: Vec<String>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum EligibilityKind {
    PreSite,
    SiteOffice,
}

impl From<EligibilityKind> for Prerequisite {
    fn from(kind: EligibilityKind) -> Self {
        match kind {
            EligibilityKind::PreSite => Prerequisite::PreSite,
            EligibilityKind::SiteOffice => Prerequisite::SiteChecklistOffice,
        }
    }
}

fn print_json(value: &Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn user_error(err: GatewayError) -> anyhow::Error {
    let message = err.user_message();
    anyhow::Error::new(err).context(message)
}

/// Restore the session before any protected command; signed-out users are
/// sent to `login`.
async fn require_session(app: &App) -> Result<()> {
    if app.bootstrap.run().await == BootstrapOutcome::SignedOut {
        return Err(anyhow!("Not signed in. Run `fieldcheck login` first."));
    }
    Ok(())
}

/// Not eligible exits with 2 so scripts can tell it apart from errors (1).
fn eligibility_exit_status(result: &Eligibility) -> u8 {
    if result.is_eligible() {
        0
    } else {
        2
    }
}

fn parse_query(pairs: &[String]) -> Result<Vec<(String, String)>> {
    pairs
        .iter()
        .map(|pair| {
            pair.split_once('=')
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .with_context(|| format!("query parameter {pair:?} is not key=value"))
        })
        .collect()
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = AppCli::parse();
    logging::init(args.verbose);

    let config = Config::from_file(&args.config)?;
    let app = App::from_config(&config)?;

    let outcome = run(&app, args.command).await;
    if let Err(err) = app.save_cookies() {
        warn!(error = %err, "failed to persist session cookies");
    }
    outcome
}

async fn run(app: &App, command: Commands) -> Result<ExitCode> {
    match command {
        Commands::Login { email, password } => {
            let credential = app.session.login(&email, &password).await.map_err(user_error)?;
            let name = credential
                .claims
                .as_ref()
                .and_then(|c| c.username.clone())
                .unwrap_or(email);
            info!("signed in as {name}");
            println!("Signed in as {name}");
        }
        Commands::Logout => {
            app.session.logout().await.map_err(user_error)?;
            println!("Signed out");
        }
        Commands::Whoami => {
            require_session(app).await?;
            let credential = app.credentials().read();
            print_json(&serde_json::to_value(&credential.claims)?)?;
        }
        Commands::Get { path, query } => {
            require_session(app).await?;
            let mut spec = RequestSpec::get(path);
            for (key, value) in parse_query(&query)? {
                spec = spec.query(&key, value);
            }
            let response = app.gateway.send(spec).await.map_err(user_error)?;
            match response.json::<Value>() {
                Ok(value) => print_json(&value)?,
                Err(_) => println!("{}", response.text()),
            }
        }
        Commands::Post { path, body } => {
            require_session(app).await?;
            let body: Value = serde_json::from_str(&body).context("body is not valid JSON")?;
            let value: Value = app
                .gateway
                .post_json(&path, body)
                .await
                .map_err(user_error)?;
            print_json(&value)?;
        }
        Commands::Authorize { route } => {
            let (_, decision) = app.navigate(&route).await;
            let target = decision.redirect_target().unwrap_or("/");
            match decision {
                Decision::Allow => println!("allow {route}"),
                Decision::NotFound => println!("not found {route}"),
                Decision::RedirectToLogin { from } | Decision::RedirectToUnauthorized { from } => {
                    println!("redirect {target} (from {from})");
                }
            }
        }
        Commands::Eligibility {
            kind,
            date,
            team,
            members,
        } => {
            require_session(app).await?;
            let query = EligibilityQuery {
                checklist_date: date,
                team_name: team,
                team_members: members,
            };
            let result = eligibility::check(&app.gateway, kind.into(), &query)
                .await
                .map_err(user_error)?;
            println!("{}", result.message());
            return Ok(ExitCode::from(eligibility_exit_status(&result)));
        }
    }

    Ok(ExitCode::SUCCESS)
}
