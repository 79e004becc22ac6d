use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "botflow")]
#[command(about = "Botflow - conversational flow execution engine", long_about = None)]
pub struct Cli {
    /// Path to config file (overrides default search)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Database URL (overrides config file and env vars)
    #[arg(long, global = true)]
    pub database_url: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run database migrations
    Migrate,

    /// Validate a flow file without publishing it
    Validate {
        /// Flow graph file (.json or .toml)
        file: PathBuf,
    },

    /// Publish a flow file as the next version
    Publish {
        flow_id: String,
        /// Flow graph file (.json or .toml)
        file: PathBuf,
    },

    /// Show a flow's status and latest version
    Status { flow_id: String },

    /// Stop new sessions on a flow
    Pause { flow_id: String },

    /// Accept new sessions on a paused flow again
    Resume { flow_id: String },

    /// Delete a flow; sessions bound to it fail on their next step
    Delete {
        flow_id: String,

        /// Skip confirmation prompt
        #[arg(short = 'y', long = "yes")]
        yes: bool,
    },

    /// Show one session
    Session { session_id: String },

    /// List sessions
    Sessions {
        #[arg(long)]
        contact: Option<String>,

        #[arg(long)]
        flow: Option<String>,

        /// Filter by status
        #[arg(short = 's', long = "status")]
        status: Option<String>,

        /// Number of results (default: 20)
        #[arg(short = 'l', long = "limit", default_value = "20")]
        limit: i64,
    },

    /// Cancel an active session
    Cancel {
        session_id: String,

        #[arg(long, default_value = "cancelled by operator")]
        reason: String,

        /// Skip confirmation prompt
        #[arg(short = 'y', long = "yes")]
        yes: bool,
    },

    /// Deliver an inbound message and print the resulting actions
    Inbound {
        contact_id: String,
        channel: String,
        text: String,

        /// Gateway message id used for de-duplication
        #[arg(long)]
        event_id: Option<String>,
    },

    /// Run the timer poller until interrupted
    Timers,
}

/// Run the CLI by parsing process arguments
pub async fn run_cli() -> Result<()> {
    let cli = Cli::parse();
    run_cli_with_args(cli).await
}

/// Run the CLI with provided arguments
pub async fn run_cli_from_args(args: Vec<String>) -> Result<()> {
    let cli = Cli::parse_from(args);
    run_cli_with_args(cli).await
}

async fn run_cli_with_args(cli: Cli) -> Result<()> {
    use crate::application::InitOptions;
    use crate::flow::{load_graph_file, validator::validate_graph};
    use crate::types::{InboundEvent, SessionFilter, SessionStatus};

    // Validation needs no database
    if let Commands::Validate { file } = &cli.command {
        let graph = load_graph_file(file)?;
        let findings = validate_graph(&graph);
        for finding in &findings {
            println!("{}", finding);
        }
        if findings.iter().any(|f| f.is_error()) {
            std::process::exit(1);
        }
        println!("✓ {} is valid", file.display());
        return Ok(());
    }

    let app = crate::application::initialize(InitOptions {
        database_url: cli.database_url,
        config_path: cli.config,
        auto_migrate: matches!(cli.command, Commands::Migrate),
    })
    .await?;
    let engine = app.engine();

    match cli.command {
        Commands::Validate { .. } => {}

        Commands::Migrate => {
            println!("✓ Migrations complete");
        }

        Commands::Publish { flow_id, file } => {
            let graph = load_graph_file(&file)?;
            let published = engine.flows().publish(&flow_id, &graph).await;
            match published {
                Ok(published) => {
                    for warning in &published.warnings {
                        println!("{}", warning);
                    }
                    println!("✓ Published {} v{}", published.flow_id, published.version);
                }
                Err(crate::publish::PublishError::Invalid(findings)) => {
                    for finding in &findings {
                        eprintln!("{}", finding);
                    }
                    std::process::exit(1);
                }
                Err(err) => return Err(err.into()),
            }
        }

        Commands::Status { flow_id } => {
            let status = engine.flows().get_status(&flow_id).await?;
            println!("Flow: {} ({})", status.flow_id, status.name);
            println!("Status: {}", status.status);
            match status.version {
                Some(version) => println!("Version: {}", version),
                None => println!("Version: never published"),
            }
            println!("Draft: {}", if status.has_draft { "yes" } else { "no" });
            println!("Updated: {}", status.updated_at);
        }

        Commands::Pause { flow_id } => {
            engine.flows().pause(&flow_id).await?;
            println!("✓ Flow {} paused", flow_id);
        }

        Commands::Resume { flow_id } => {
            engine.flows().resume(&flow_id).await?;
            println!("✓ Flow {} resumed", flow_id);
        }

        Commands::Delete { flow_id, yes } => {
            if !yes {
                eprintln!("Error: Confirmation required. Use --yes flag to confirm deletion.");
                std::process::exit(1);
            }
            engine.flows().delete(&flow_id).await?;
            println!("✓ Flow {} deleted", flow_id);
        }

        Commands::Session { session_id } => match engine.get_session(&session_id).await? {
            Some(session) => {
                println!("Session: {}", session.id);
                println!("Contact: {} on {}", session.contact_id, session.channel);
                println!("Flow: {} v{}", session.flow_id, session.flow_version);
                println!("Node: {}", session.current_node_id);
                println!("Status: {}", session.status);
                println!("Created: {}", session.created_at);
                if let Some(completed_at) = session.completed_at {
                    println!("Completed: {}", completed_at);
                }
                if !session.call_stack.is_empty() {
                    println!("Call depth: {}", session.call_stack.len());
                }

                println!("\nVariables:");
                println!("  {}", serde_json::to_string_pretty(&session.variables)?);

                if let Some(error) = session.error {
                    println!("\nError:");
                    println!("  {}", error);
                }
            }
            None => {
                eprintln!("Session {} not found", session_id);
                std::process::exit(1);
            }
        },

        Commands::Sessions {
            contact,
            flow,
            status,
            limit,
        } => {
            let status = status
                .map(|s| s.parse::<SessionStatus>())
                .transpose()?;
            let filter = SessionFilter {
                contact_id: contact,
                channel: None,
                flow_id: flow,
                status,
                limit: Some(limit),
            };

            let sessions = engine.list_sessions(&filter).await?;
            if sessions.is_empty() {
                println!("No sessions found");
                return Ok(());
            }

            println!("Found {} session(s):\n", sessions.len());
            for session in sessions {
                let id_short = session.id.get(..12).unwrap_or(session.id.as_str());
                println!(
                    "  {}... | {} | {} v{} | {} | {}",
                    id_short,
                    session.status,
                    session.flow_id,
                    session.flow_version,
                    session.contact_id,
                    session.channel
                );
            }
        }

        Commands::Cancel {
            session_id,
            reason,
            yes,
        } => {
            if !yes {
                eprintln!("Error: Confirmation required. Use --yes flag to confirm cancellation.");
                std::process::exit(1);
            }
            let session = engine.cancel_session(&session_id, &reason).await?;
            println!("✓ Session {} is {}", session.id, session.status);
        }

        Commands::Inbound {
            contact_id,
            channel,
            text,
            event_id,
        } => {
            let mut event = InboundEvent::message(&contact_id, &channel, &text);
            event.event_id = event_id;

            let outcome = engine.handle_inbound(event).await?;
            println!("Session: {} ({})", outcome.session_id, outcome.status);
            println!("{}", serde_json::to_string_pretty(&outcome.actions)?);
            if let Some(error) = outcome.error {
                println!("Error: {}", error);
            }
        }

        Commands::Timers => {
            let token = tokio_util::sync::CancellationToken::new();
            let scheduler = app.timer_scheduler(token.clone());
            let handle = tokio::spawn(scheduler.run());

            println!("Timer poller running, press Ctrl-C to stop");
            tokio::signal::ctrl_c().await?;
            token.cancel();
            handle.await?;
        }
    }

    Ok(())
}
