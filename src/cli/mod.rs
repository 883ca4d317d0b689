//! CLI commands for Majordomo using clap.

use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use serde_json::{json, Map};

use crate::config::{get_settings_path, load_settings};
use crate::director::{Director, Intent};
use crate::protocol::MessageKind;
use crate::runtime::AgentRuntime;
use crate::synthesis::{OllamaSynthesizer, Synthesizer};
use crate::transport::MemoryTransport;

/// Majordomo - Agent messaging substrate and orchestration core.
#[derive(Parser)]
#[command(name = "majordomo")]
#[command(version = "0.1.0")]
#[command(about = "Majordomo - Agent messaging and orchestration", long_about = None)]
pub struct Commands {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run an intent through an in-process Director with demo agents
    Demo {
        /// Intent type, e.g. calendar_query, task_management, status_query
        #[arg(long, default_value = "status_query")]
        intent: String,

        /// User text carried in the orchestration context
        #[arg(long, default_value = "What's my status?")]
        text: String,

        /// Synthesize agent responses through a local Ollama server
        #[arg(long, default_value_t = false)]
        synthesize: bool,
    },

    /// Show resolved settings and where they were loaded from
    Config,
}

impl Commands {
    /// Run the command.
    pub async fn run(&self) -> Result<()> {
        match &self.command {
            Command::Demo {
                intent,
                text,
                synthesize,
            } => cmd_demo(intent, text, *synthesize).await,
            Command::Config => cmd_config().await,
        }
    }
}

// Command implementations

/// Stand up an in-process transport, a handful of demo agents, and a
/// Director, then run one intent end to end and print the result.
async fn cmd_demo(intent: &str, text: &str, synthesize: bool) -> Result<()> {
    let settings = load_settings()?;
    settings.validate()?;

    let transport = Arc::new(MemoryTransport::new());

    let agents = vec![
        demo_agent(
            &transport,
            "Calendar",
            json!({"events": ["Standup at 09:00", "Lunch with Sam at 12:30"]}),
            &settings,
        )
        .await?,
        demo_agent(&transport, "Task", json!({"open_tasks": 3, "overdue": 1}), &settings).await?,
        demo_agent(&transport, "Email", json!({"unread": 7}), &settings).await?,
    ];

    let synthesizer: Option<Arc<dyn Synthesizer>> = if synthesize {
        Some(Arc::new(OllamaSynthesizer::new(&settings.synthesis)))
    } else {
        None
    };
    let director = Director::with_components(
        transport.clone(),
        &settings,
        Default::default(),
        synthesizer,
    );
    director.start().await?;

    // Let the first heartbeat round land before discovery runs.
    tokio::time::sleep(settings.heartbeat.interval() / 4).await;

    println!("Live agents: {}", director.discover_agents().await.join(", "));

    let mut context = Map::new();
    context.insert("user_input".to_string(), json!(text));
    let result = director.process_intent(Intent::new(intent), context).await;

    println!("\nIntent:  {}", result.intent.kind);
    println!("Success: {}", result.success);
    println!("Sources: {}", result.sources.join(", "));
    println!("\n{}", result.message);

    director.stop().await?;
    for agent in agents {
        agent.stop().await?;
    }
    Ok(())
}

/// A demo agent that answers `process` commands with canned data.
async fn demo_agent(
    transport: &Arc<MemoryTransport>,
    name: &str,
    data: serde_json::Value,
    settings: &crate::config::Settings,
) -> Result<AgentRuntime> {
    let runtime = AgentRuntime::new(name, "demo", transport.clone(), settings.heartbeat.clone());
    runtime
        .on(MessageKind::Command, move |agent, envelope| {
            let data = data.clone();
            async move {
                if envelope.payload.get("action").and_then(serde_json::Value::as_str)
                    == Some("process")
                {
                    let mut payload = Map::new();
                    payload.insert("success".to_string(), json!(true));
                    payload.insert("data".to_string(), data);
                    agent.reply(&envelope, payload).await?;
                }
                Ok(())
            }
        })
        .await;
    runtime.start().await?;
    Ok(runtime)
}

async fn cmd_config() -> Result<()> {
    let path = get_settings_path()?;
    let settings = load_settings()?;

    if path.exists() {
        println!("Settings file: {}", path.display());
    } else {
        println!(
            "Settings file: {} (not present, using defaults)",
            path.display()
        );
    }
    println!("{}", serde_json::to_string_pretty(&settings)?);

    if let Err(e) = settings.validate() {
        println!("\nWarning: {}", e);
    }
    Ok(())
}
