use std::path::Path;
use std::sync::Arc;

use recruit_assist::browser::http_driver::HttpDriver;
use recruit_assist::browser::pool::BrowserPool;
use recruit_assist::channels::{ChannelTransport, EmailConfig, EmailTransport, SmsTransport};
use recruit_assist::config::{
    GateConfig, GeneratorConfig, InterviewConfig, OrchestratorConfig,
};
use recruit_assist::escalation::EscalationGate;
use recruit_assist::llm::AnthropicGenerator;
use recruit_assist::normalizer::Normalizer;
use recruit_assist::orchestrator::Orchestrator;
use recruit_assist::profile::Profile;
use recruit_assist::session::InterviewController;
use recruit_assist::signals::KeywordDetector;
use recruit_assist::store::{LibsqlStore, Store};

const USAGE: &str = "Usage: recruit-assist <command>

Commands:
  run                Poll channels once, process everything, exit
  daemon             Poll continuously until Ctrl-C
  status             Print conversation/escalation counts
  list               List conversations, newest first
  view <thread_id>   Show one conversation with its history";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    let env_filter = || {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"))
    };
    // With RECRUIT_LOG_DIR set, logs go to a daily file instead of stderr.
    let _log_guard = match std::env::var("RECRUIT_LOG_DIR") {
        Ok(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "recruit-assist.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt()
                .with_env_filter(env_filter())
                .with_target(false)
                .with_ansi(false)
                .with_writer(writer)
                .init();
            Some(guard)
        }
        Err(_) => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter())
                .with_target(false)
                .init();
            None
        }
    };

    let args: Vec<String> = std::env::args().collect();
    let command = args.get(1).map(String::as_str).unwrap_or("run");

    let db_path = std::env::var("RECRUIT_DB_PATH")
        .unwrap_or_else(|_| "./data/recruit-assist.db".to_string());
    let store: Arc<dyn Store> = Arc::new(
        LibsqlStore::new_local(Path::new(&db_path))
            .await
            .unwrap_or_else(|e| {
                eprintln!("Error: Failed to open database at {db_path}: {e}");
                std::process::exit(1);
            }),
    );

    match command {
        "status" => {
            let conversations = store.list_conversations().await?;
            let escalations = store.open_escalations().await?;
            let dead = store.dead_letters().await?;
            println!("Conversations: {}", conversations.len());
            let mut by_stage: std::collections::BTreeMap<String, usize> =
                std::collections::BTreeMap::new();
            let mut by_channel: std::collections::BTreeMap<String, usize> =
                std::collections::BTreeMap::new();
            for conv in &conversations {
                *by_stage.entry(conv.stage.to_string()).or_default() += 1;
                *by_channel.entry(conv.channel.to_string()).or_default() += 1;
            }
            for (stage, count) in &by_stage {
                println!("  {stage}: {count}");
            }
            println!("By channel:");
            for (channel, count) in &by_channel {
                println!("  {channel}: {count}");
            }
            println!("Open escalations: {}", escalations.len());
            for esc in &escalations {
                println!("  [{}] {} — {}", esc.reason, esc.thread_id, esc.excerpt);
            }
            println!("Dead letters: {}", dead.len());
            return Ok(());
        }
        "list" => {
            for conv in store.list_conversations().await? {
                println!(
                    "{:<40} {:<22} {:>3} turns  {}",
                    conv.thread_id,
                    conv.stage.to_string(),
                    conv.history.len(),
                    conv.counterpart.company.as_deref().unwrap_or("-"),
                );
            }
            return Ok(());
        }
        "view" => {
            let thread_id = args.get(2).map(String::as_str).unwrap_or_else(|| {
                eprintln!("Usage: recruit-assist view <thread_id>");
                std::process::exit(1);
            });
            match store.get_conversation(thread_id).await? {
                Some(conv) => {
                    println!("Thread:   {}", conv.thread_id);
                    println!("Channel:  {}", conv.channel);
                    println!("Stage:    {}", conv.stage);
                    if let Some(company) = &conv.counterpart.company {
                        println!("Company:  {company}");
                    }
                    if let Some(position) = &conv.counterpart.position {
                        println!("Position: {position}");
                    }
                    if let Some(rate) = &conv.counterpart.salary_range {
                        println!("Rate:     {rate}");
                    }
                    println!();
                    for turn in &conv.history {
                        let arrow = match turn.direction {
                            recruit_assist::conversation::Direction::Inbound => "<<",
                            recruit_assist::conversation::Direction::Outbound => ">>",
                        };
                        println!(
                            "{} [{} {}] {}",
                            arrow,
                            turn.timestamp.format("%Y-%m-%d %H:%M"),
                            turn.stage_at_time,
                            turn.content.lines().next().unwrap_or(""),
                        );
                    }
                }
                None => {
                    eprintln!("No conversation with thread id '{thread_id}'");
                    std::process::exit(1);
                }
            }
            return Ok(());
        }
        "run" | "daemon" => {}
        other => {
            eprintln!("Unknown command '{other}'\n\n{USAGE}");
            std::process::exit(1);
        }
    }

    // run/daemon need the full pipeline.
    let api_key = std::env::var("ANTHROPIC_API_KEY").unwrap_or_else(|_| {
        eprintln!("Error: ANTHROPIC_API_KEY not set");
        eprintln!("  export ANTHROPIC_API_KEY=sk-ant-...");
        std::process::exit(1);
    });
    let model = std::env::var("RECRUIT_MODEL").ok();

    let email_config = EmailConfig::from_env().unwrap_or_else(|| {
        eprintln!("Error: EMAIL_IMAP_HOST not set; the email channel is required");
        std::process::exit(1);
    });
    let email = Arc::new(EmailTransport::new(email_config));
    let sms: Arc<dyn ChannelTransport> = Arc::new(SmsTransport::from_env(Arc::clone(&email)));
    let email: Arc<dyn ChannelTransport> = email;

    let profile = match std::env::var("PROFILE_PATH") {
        Ok(path) => Profile::load(Path::new(&path)).unwrap_or_else(|e| {
            eprintln!("Error: Failed to load profile from {path}: {e}");
            std::process::exit(1);
        }),
        Err(_) => Profile::anonymous(),
    };

    let orch_config = OrchestratorConfig::from_env();
    let generator_config = GeneratorConfig::from_env();
    let interview_config = InterviewConfig::from_env();

    let generator = Arc::new(AnthropicGenerator::new(
        secrecy::SecretString::from(api_key),
        model,
        &generator_config,
    ));

    let gate_config = GateConfig::from_env();
    let controller = Arc::new(InterviewController::new(
        Arc::new(HttpDriver::new(interview_config.navigation_timeout)),
        generator.clone(),
        Arc::new(KeywordDetector::new()),
        EscalationGate::new(gate_config.clone()),
        BrowserPool::new(interview_config.pool_size),
        interview_config.clone(),
    ));

    eprintln!("recruit-assist v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Database: {db_path}");
    eprintln!("   Profile:  {}", profile.name);
    eprintln!(
        "   Auto-reply: {}",
        if orch_config.auto_reply_enabled {
            "enabled"
        } else {
            "drafts held for review"
        }
    );

    let orchestrator = Arc::new(Orchestrator::new(
        store,
        Arc::new(KeywordDetector::new()),
        EscalationGate::new(gate_config),
        generator,
        email,
        sms,
        controller,
        Normalizer::from_env(),
        profile,
        orch_config,
        interview_config.headless,
    ));

    match command {
        "run" => {
            let handled = orchestrator.run_once().await?;
            eprintln!("Processed {handled} event(s)");
        }
        _ => {
            let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    eprintln!("\nShutting down...");
                    let _ = shutdown_tx.send(true);
                }
            });
            orchestrator.run(shutdown_rx).await?;
        }
    }

    Ok(())
}
