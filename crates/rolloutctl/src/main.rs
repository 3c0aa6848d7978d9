//! rolloutctl: operator CLI for connector rollouts.
//!
//! Drives a `RolloutService` over an on-disk state store. No workflow
//! engine is attached; workflow starts and signals are logged.
//!
//! # Usage
//!
//! ```text
//! rolloutctl version add --definition <id> --repository airbyte/source-faker --tag 1.0.0 --default
//! rolloutctl create --definition <id> --repository airbyte/source-faker --tag 1.1.0 --initial-pct 10
//! rolloutctl advance --rollout <id> --repository airbyte/source-faker --pct 50
//! ```

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use uuid::Uuid;

mod commands;
mod output;

use commands::Context;

#[derive(Parser)]
#[command(
    name = "rolloutctl",
    about = "Progressive connector version rollouts",
    version,
    propagate_version = true
)]
struct Cli {
    /// Directory holding the state store.
    #[arg(long, global = true, default_value = ".rolloutctl")]
    data_dir: PathBuf,

    /// rollout.toml with timeouts and limits.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StrategyArg {
    Manual,
    Automated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutcomeArg {
    Succeeded,
    FailedRolledBack,
    Canceled,
    CanceledRolledBack,
}

#[derive(Subcommand)]
enum Command {
    /// Register actor definition versions
    Version {
        #[command(subcommand)]
        action: VersionAction,
    },
    /// Register actors
    Actor {
        #[command(subcommand)]
        action: ActorAction,
    },
    /// Register version pins made outside of a rollout
    Pin {
        #[command(subcommand)]
        action: PinAction,
    },
    /// Create (or reuse) an INITIALIZED rollout for a release candidate
    Create(CreateArgs),
    /// Start the workflow of an INITIALIZED rollout
    Start(StartArgs),
    /// Pin the release candidate to more actors
    Advance(AdvanceArgs),
    /// Pause a rollout
    Pause {
        #[arg(long)]
        rollout: Uuid,
        #[arg(long)]
        repository: String,
        #[arg(long)]
        reason: String,
        #[arg(long, value_enum)]
        strategy: Option<StrategyArg>,
    },
    /// Finish a rollout and settle its pins
    Finalize(FinalizeArgs),
    /// Show one rollout
    Show {
        #[arg(long)]
        rollout: Uuid,
    },
    /// List the rollouts of an actor definition
    List {
        #[arg(long)]
        definition: Uuid,
        /// Only rollouts of this docker image tag
        #[arg(long)]
        tag: Option<String>,
    },
    /// Compute the tag of a tier filter
    Tag {
        /// Tier to include (TIER_0, TIER_1, TIER_2 or ALL); repeatable
        #[arg(long = "tier")]
        tiers: Vec<String>,
    },
    /// Preview which actors a rollout would target at a percentage
    Select {
        #[arg(long)]
        rollout: Uuid,
        #[arg(long)]
        pct: i64,
    },
}

#[derive(Subcommand)]
enum VersionAction {
    Add {
        #[arg(long)]
        definition: Uuid,
        #[arg(long)]
        repository: String,
        #[arg(long)]
        tag: String,
        /// Make this the default version of the actor definition
        #[arg(long)]
        default: bool,
    },
}

#[derive(Subcommand)]
enum ActorAction {
    Add {
        #[arg(long)]
        definition: Uuid,
        /// Customer tier of the actor's organization
        #[arg(long)]
        tier: Option<String>,
        /// Number of actors to register
        #[arg(long, default_value = "1")]
        count: usize,
    },
}

#[derive(Subcommand)]
enum PinAction {
    Add {
        #[arg(long)]
        definition: Uuid,
        #[arg(long)]
        actor: Uuid,
        #[arg(long)]
        version_id: Uuid,
    },
}

#[derive(Args)]
struct CreateArgs {
    #[arg(long)]
    definition: Uuid,
    #[arg(long)]
    repository: String,
    /// Docker image tag of the release candidate
    #[arg(long)]
    tag: String,
    #[arg(long, value_enum)]
    strategy: Option<StrategyArg>,
    #[arg(long, allow_negative_numbers = true)]
    initial_pct: Option<i64>,
    #[arg(long, allow_negative_numbers = true)]
    final_pct: Option<i64>,
    /// Restrict eligibility to a tier; repeatable
    #[arg(long = "tier")]
    tiers: Vec<String>,
    #[arg(long)]
    breaking: bool,
    #[arg(long)]
    max_step_wait_mins: Option<u32>,
    #[arg(long)]
    user: Option<Uuid>,
}

#[derive(Args)]
struct StartArgs {
    #[arg(long)]
    rollout: Uuid,
    #[arg(long)]
    repository: String,
    #[arg(long, value_enum)]
    strategy: Option<StrategyArg>,
    #[arg(long, allow_negative_numbers = true)]
    initial_pct: Option<i64>,
    #[arg(long, allow_negative_numbers = true)]
    final_pct: Option<i64>,
    /// Move rollout pins left by earlier rollouts onto this release candidate
    #[arg(long)]
    migrate_pins: bool,
    #[arg(long)]
    user: Option<Uuid>,
}

#[derive(Args)]
struct AdvanceArgs {
    #[arg(long)]
    rollout: Uuid,
    #[arg(long)]
    repository: String,
    /// Target percentage
    #[arg(long, conflicts_with = "actors", required_unless_present = "actors")]
    pct: Option<i64>,
    /// Actor to pin; repeatable
    #[arg(long = "actor")]
    actors: Vec<Uuid>,
    #[arg(long, value_enum)]
    strategy: Option<StrategyArg>,
    #[arg(long)]
    user: Option<Uuid>,
}

#[derive(Args)]
struct FinalizeArgs {
    #[arg(long)]
    rollout: Uuid,
    #[arg(long)]
    repository: String,
    #[arg(long, value_enum)]
    state: OutcomeArg,
    /// Keep release-candidate pins on cancellation
    #[arg(long)]
    retain_pins: bool,
    #[arg(long)]
    error_msg: Option<String>,
    #[arg(long)]
    failed_reason: Option<String>,
    #[arg(long, value_enum)]
    strategy: Option<StrategyArg>,
    #[arg(long)]
    user: Option<Uuid>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().or_else(|_| {
                tracing_subscriber::EnvFilter::try_new(
                    "info,rolloutctl=debug,rollout_controller=debug",
                )
            })?,
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let ctx = Context::open(&cli.data_dir, cli.config.as_deref(), cli.format)?;

    match cli.command {
        Command::Version { action } => match action {
            VersionAction::Add {
                definition,
                repository,
                tag,
                default,
            } => commands::catalog::add_version(&ctx, definition, &repository, &tag, default),
        },
        Command::Actor { action } => match action {
            ActorAction::Add {
                definition,
                tier,
                count,
            } => commands::catalog::add_actors(&ctx, definition, tier.as_deref(), count),
        },
        Command::Pin { action } => match action {
            PinAction::Add {
                definition,
                actor,
                version_id,
            } => commands::catalog::add_pin(&ctx, definition, actor, version_id),
        },
        Command::Create(args) => commands::rollout::create(&ctx, args.into()).await,
        Command::Start(args) => commands::rollout::start(&ctx, args.into()).await,
        Command::Advance(args) => commands::rollout::advance(&ctx, args.into()).await,
        Command::Pause {
            rollout,
            repository,
            reason,
            strategy,
        } => {
            commands::rollout::pause(
                &ctx,
                rollout_controller::PauseRolloutRequest {
                    rollout_id: rollout,
                    docker_repository: repository,
                    reason,
                    rollout_strategy: strategy.map(Into::into),
                    updated_by: None,
                },
            )
            .await
        }
        Command::Finalize(args) => commands::rollout::finalize(&ctx, args.into()).await,
        Command::Show { rollout } => commands::query::show(&ctx, rollout),
        Command::List { definition, tag } => commands::query::list(&ctx, definition, tag.as_deref()),
        Command::Tag { tiers } => commands::query::tag(&ctx, tiers),
        Command::Select { rollout, pct } => commands::query::select(&ctx, rollout, pct),
    }
}

// ── Argument conversions ──────────────────────────────────────────

impl From<StrategyArg> for rollout_state::RolloutStrategy {
    fn from(arg: StrategyArg) -> Self {
        match arg {
            StrategyArg::Manual => rollout_state::RolloutStrategy::Manual,
            StrategyArg::Automated => rollout_state::RolloutStrategy::Automated,
        }
    }
}

impl From<OutcomeArg> for rollout_state::TerminalState {
    fn from(arg: OutcomeArg) -> Self {
        match arg {
            OutcomeArg::Succeeded => rollout_state::TerminalState::Succeeded,
            OutcomeArg::FailedRolledBack => rollout_state::TerminalState::FailedRolledBack,
            OutcomeArg::Canceled => rollout_state::TerminalState::Canceled,
            OutcomeArg::CanceledRolledBack => rollout_state::TerminalState::CanceledRolledBack,
        }
    }
}

impl From<CreateArgs> for rollout_controller::CreateRolloutRequest {
    fn from(args: CreateArgs) -> Self {
        let filters = if args.tiers.is_empty() {
            Vec::new()
        } else {
            vec![rollout_controller::TierFilterRequest::tiers(args.tiers)]
        };
        Self {
            actor_definition_id: args.definition,
            docker_repository: args.repository,
            docker_image_tag: args.tag,
            updated_by: args.user,
            rollout_strategy: args.strategy.map(Into::into),
            initial_rollout_pct: args.initial_pct,
            final_target_rollout_pct: args.final_pct,
            filters,
            has_breaking_changes: args.breaking,
            max_step_wait_time_mins: args.max_step_wait_mins,
        }
    }
}

impl From<StartArgs> for rollout_controller::StartRolloutRequest {
    fn from(args: StartArgs) -> Self {
        Self {
            rollout_id: args.rollout,
            docker_repository: args.repository,
            updated_by: args.user,
            rollout_strategy: args.strategy.map(Into::into),
            initial_rollout_pct: args.initial_pct,
            final_target_rollout_pct: args.final_pct,
            migrate_pins: args.migrate_pins,
        }
    }
}

impl From<AdvanceArgs> for rollout_controller::AdvanceRolloutRequest {
    fn from(args: AdvanceArgs) -> Self {
        let target = match args.pct {
            Some(pct) => rollout_controller::AdvanceTarget::Percentage(pct),
            None => rollout_controller::AdvanceTarget::Actors(args.actors),
        };
        Self {
            rollout_id: args.rollout,
            docker_repository: args.repository,
            target,
            rollout_strategy: args.strategy.map(Into::into),
            updated_by: args.user,
        }
    }
}

impl From<FinalizeArgs> for rollout_controller::FinalizeRolloutRequest {
    fn from(args: FinalizeArgs) -> Self {
        Self {
            rollout_id: args.rollout,
            docker_repository: args.repository,
            state: args.state.into(),
            error_msg: args.error_msg,
            failed_reason: args.failed_reason,
            retain_pins_on_cancellation: args.retain_pins,
            rollout_strategy: args.strategy.map(Into::into),
            updated_by: args.user,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rollout_controller::AdvanceTarget;

    #[test]
    fn cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn advance_takes_a_percentage_or_actors() {
        let id = Uuid::new_v4().to_string();
        let id = id.as_str();
        let cli = Cli::try_parse_from([
            "rolloutctl", "advance", "--rollout", id, "--repository", "r", "--pct", "50",
        ])
        .unwrap();
        let Command::Advance(args) = cli.command else {
            panic!("expected advance");
        };
        let req: rollout_controller::AdvanceRolloutRequest = args.into();
        assert_eq!(req.target, AdvanceTarget::Percentage(50));

        let actor = Uuid::new_v4();
        let actor_arg = actor.to_string();
        let cli = Cli::try_parse_from([
            "rolloutctl", "advance", "--rollout", id, "--repository", "r",
            "--actor", actor_arg.as_str(),
        ])
        .unwrap();
        let Command::Advance(args) = cli.command else {
            panic!("expected advance");
        };
        let req: rollout_controller::AdvanceRolloutRequest = args.into();
        assert_eq!(req.target, AdvanceTarget::Actors(vec![actor]));

        assert!(
            Cli::try_parse_from(["rolloutctl", "advance", "--rollout", id, "--repository", "r"])
                .is_err()
        );
    }

    #[test]
    fn finalize_parses_terminal_states() {
        let id = Uuid::new_v4().to_string();
        let cli = Cli::try_parse_from([
            "rolloutctl", "--format", "json", "finalize", "--rollout", id.as_str(), "--repository", "r",
            "--state", "canceled-rolled-back",
        ])
        .unwrap();
        assert_eq!(cli.format, OutputFormat::Json);
        let Command::Finalize(args) = cli.command else {
            panic!("expected finalize");
        };
        let req: rollout_controller::FinalizeRolloutRequest = args.into();
        assert_eq!(req.state, rollout_state::TerminalState::CanceledRolledBack);
        assert!(!req.retain_pins_on_cancellation);
    }

    #[test]
    fn create_collects_tiers_into_one_filter() {
        let def = Uuid::new_v4().to_string();
        let cli = Cli::try_parse_from([
            "rolloutctl", "create", "--definition", def.as_str(), "--repository", "r", "--tag", "1.1.0",
            "--tier", "TIER_0", "--tier", "TIER_2", "--initial-pct", "-1",
        ])
        .unwrap();
        let Command::Create(args) = cli.command else {
            panic!("expected create");
        };
        let req: rollout_controller::CreateRolloutRequest = args.into();
        assert_eq!(req.filters.len(), 1);
        assert_eq!(req.filters[0].values, vec!["TIER_0", "TIER_2"]);
        assert_eq!(req.initial_rollout_pct, Some(-1));
    }
}
