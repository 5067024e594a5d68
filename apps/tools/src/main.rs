use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use competition_api::{auth::mint_admin_token, ApiContext};
use sequence::{challenge::DEFAULT_MAX_CODE_BYTES, ProgressStore, QuestionBank};
use shared::{
    domain::{CodedRound, TeamId},
    error::{ApiError, ApiException},
    protocol::ProgressView,
};
use storage::Storage;
use tracing_subscriber::EnvFilter;

const DEFAULT_TOKEN_TTL_SECONDS: i64 = 8 * 60 * 60;
const GENERATED_CODE_LEN: usize = 8;

#[derive(Parser, Debug)]
#[command(about = "Admin tooling for the competition database")]
struct Cli {
    #[arg(
        long,
        env = "APP__DATABASE_URL",
        default_value = "sqlite://./data/competition.db"
    )]
    database_url: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    RegisterTeam {
        name: String,
    },
    DeactivateTeam {
        team_id: i64,
    },
    ListTeams,
    /// Sets (or replaces) the access code for round 2 or 3. A random code is
    /// generated when none is given.
    SetRoundCode {
        round: u8,
        code: Option<String>,
    },
    ResetRoundCode {
        round: u8,
    },
    MintAdminToken {
        #[arg(long, env = "APP__ADMIN_JWT_SECRET")]
        secret: String,
        #[arg(long, default_value = "admin")]
        subject: String,
        #[arg(long, default_value_t = DEFAULT_TOKEN_TTL_SECONDS)]
        ttl_seconds: i64,
    },
    ShowProgress {
        team_id: i64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::MintAdminToken {
            secret,
            subject,
            ttl_seconds,
        } => {
            if ttl_seconds <= 0 {
                bail!("ttl must be positive");
            }
            println!("{}", mint_admin_token(&secret, &subject, ttl_seconds)?);
        }
        Command::RegisterTeam { name } => {
            let name = name.trim();
            if name.is_empty() {
                bail!("team name is required");
            }
            let storage = open_storage(&cli.database_url).await?;
            let team_id = storage.create_team(name).await?;
            println!("registered team_id={team_id} name={name}");
        }
        Command::DeactivateTeam { team_id } => {
            let storage = open_storage(&cli.database_url).await?;
            if !storage.set_team_active(TeamId(team_id), false).await? {
                bail!("team {team_id} not found");
            }
            println!("deactivated team_id={team_id}");
        }
        Command::ListTeams => {
            let ctx = api_context(open_storage(&cli.database_url).await?);
            let teams = competition_api::list_teams(&ctx).await.map_err(api_error)?;
            for team in teams {
                println!(
                    "{}\t{}\t{}\ttotal={}",
                    team.team_id, team.team_name, team.competition_status, team.scores.total
                );
            }
        }
        Command::SetRoundCode { round, code } => {
            let round = CodedRound::try_from(round).map_err(anyhow::Error::msg)?;
            let code = code.unwrap_or_else(generate_round_code);
            let ctx = api_context(open_storage(&cli.database_url).await?);
            let (info, _) = competition_api::set_round_code(&ctx, round, &code)
                .await
                .map_err(api_error)?;
            println!(
                "round {} code={} active={}",
                round.number(),
                info.code,
                info.is_active
            );
        }
        Command::ResetRoundCode { round } => {
            let ctx = api_context(open_storage(&cli.database_url).await?);
            let (response, _) = competition_api::reset_round_code(&ctx, round)
                .await
                .map_err(api_error)?;
            println!(
                "round {} deactivated={}",
                response.round.number(),
                response.deactivated_count
            );
        }
        Command::ShowProgress { team_id } => {
            let storage = open_storage(&cli.database_url).await?;
            match storage.load_progress(TeamId(team_id)).await? {
                Some(progress) => {
                    let view = ProgressView::from(progress);
                    println!("{}", serde_json::to_string_pretty(&view)?);
                }
                None => println!("team {team_id} has no recorded progress"),
            }
        }
    }

    Ok(())
}

async fn open_storage(database_url: &str) -> Result<Storage> {
    Storage::new(database_url)
        .await
        .with_context(|| format!("opening {database_url}"))
}

fn api_context(storage: Storage) -> ApiContext {
    ApiContext::new(
        storage,
        Arc::new(QuestionBank::default()),
        DEFAULT_MAX_CODE_BYTES,
    )
}

fn generate_round_code() -> String {
    uuid::Uuid::new_v4()
        .simple()
        .to_string()
        .chars()
        .take(GENERATED_CODE_LEN)
        .collect::<String>()
        .to_ascii_uppercase()
}

fn api_error(err: ApiError) -> anyhow::Error {
    ApiException::from(err).into()
}

#[cfg(test)]
#[path = "tests/main_tests.rs"]
mod tests;
