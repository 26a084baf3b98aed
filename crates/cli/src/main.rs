use anyhow::Context;
use clap::Parser;
use futures::StreamExt;
use std::io::Write;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use atena_core::agents;
use atena_core::config::Settings;
use atena_core::llm::intercept::ModelCall;

#[derive(Debug, Parser)]
#[command(name = "atena_cli")]
struct Args {
    /// Agent to talk to.
    #[arg(long, default_value = agents::atena::AGENT_ID)]
    agent: String,

    /// Message sent to the agent.
    #[arg(long, required_unless_present = "list")]
    message: Option<String>,

    /// Print the reply as it arrives.
    #[arg(long)]
    stream: bool,

    /// List the available agents and exit.
    #[arg(long)]
    list: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = Settings::from_env()?;
    let _sentry_guard = init_sentry(&settings);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(sentry_tracing::layer())
        .init();

    let args = Args::parse();

    if args.list {
        for id in agents::AGENT_IDS {
            if let Some(agent) = agents::get_agent(id, &settings) {
                println!("{}\t{}\t{}", agent.agent_id, agent.model.id(), agent.name);
            }
        }
        return Ok(());
    }

    let agent = agents::get_agent(&args.agent, &settings)
        .with_context(|| format!("unknown agent: {}", args.agent))?;
    let message = args.message.context("--message is required")?;

    tracing::info!(
        agent_id = %agent.agent_id,
        model = %agent.model.id(),
        stream = args.stream,
        "running agent"
    );

    let res = if args.stream {
        print_stream(&agent, &message).await
    } else {
        print_reply(&agent, &message).await
    };

    if let Err(e) = &res {
        sentry_anyhow::capture_anyhow(e);
    }
    res
}

async fn print_reply(agent: &agents::Agent, message: &str) -> anyhow::Result<()> {
    match agent.run(message).await? {
        ModelCall::Completed(content) => println!("{content}"),
        ModelCall::Degraded(failure) => {
            println!("{}", serde_json::to_string_pretty(&failure)?);
        }
    }
    Ok(())
}

async fn print_stream(agent: &agents::Agent, message: &str) -> anyhow::Result<()> {
    let mut stream = agent.run_stream(message);
    let mut stdout = std::io::stdout();
    while let Some(chunk) = stream.next().await {
        stdout.write_all(chunk?.as_bytes())?;
        stdout.flush()?;
    }
    writeln!(stdout)?;
    Ok(())
}

fn init_sentry(settings: &Settings) -> Option<sentry::ClientInitGuard> {
    let dsn = settings.sentry_dsn.as_deref()?;
    Some(sentry::init((
        dsn,
        sentry::ClientOptions {
            release: sentry::release_name!(),
            ..Default::default()
        },
    )))
}
