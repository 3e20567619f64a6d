use clap::Parser;
use serde::Serialize;
use std::sync::Arc;
use support_mail_agent::config::cli::{parse_category, Command, KbCommand};
use support_mail_agent::core::tasks::{ensure_completed, Task, TaskReport};
use support_mail_agent::utils::{logger, validation::Validate};
use support_mail_agent::{
    Adapters, ClaudeEmailAgent, CliConfig, ImapMailSource, LocalStorage, Result, SmtpMailSender,
    SupportConfig, SupportEngine,
};
use tokio_util::sync::CancellationToken;

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_reports(reports: &[TaskReport]) -> Result<()> {
    for report in reports {
        if report.success {
            tracing::info!("✅ {} completed (attempt {})", report.task, report.attempts);
        } else if report.retry_scheduled {
            tracing::warn!("🔁 {} failed, retrying", report.task);
        } else {
            tracing::error!("❌ {} failed", report.task);
        }
    }
    print_json(&reports)?;
    ensure_completed(reports)
}

/// 依子命令檢查需要的外部服務設定
fn require_services(config: &SupportConfig, command: &Command) -> Result<()> {
    match command {
        Command::Serve | Command::RunOnce => {
            config.require_mailbox()?;
            config.require_smtp()?;
            config.require_anthropic()
        }
        Command::Fetch => config.require_mailbox(),
        Command::Process { .. } | Command::Bulk { .. } | Command::Reprocess { .. } => {
            config.require_anthropic()?;
            config.require_smtp()
        }
        Command::Send { .. } => config.require_smtp(),
        Command::Review(args) if args.send_immediately => config.require_smtp(),
        Command::Sentiment { .. } => config.require_anthropic(),
        _ => Ok(()),
    }
}

/// 轉接器只保存設定，連線與 HTTP client 在第一次使用時才建立
async fn build_engine(config: SupportConfig) -> Result<SupportEngine<LocalStorage>> {
    let storage = LocalStorage::new(config.storage.data_dir.clone());
    let adapters = Adapters {
        source: Arc::new(ImapMailSource::new(config.mailbox.clone())),
        sender: Arc::new(SmtpMailSender::new(
            &config.smtp,
            config.smtp_username(),
            config.smtp_password(),
        )),
        agent: Arc::new(ClaudeEmailAgent::new(&config.anthropic)?),
    };
    SupportEngine::new(config, storage, adapters).await
}

async fn run(engine: &SupportEngine<LocalStorage>, command: Command) -> Result<()> {
    let review = engine.review();

    match command {
        Command::Serve => {
            let cancel = CancellationToken::new();
            let signal_cancel = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::info!("Shutdown requested");
                }
                signal_cancel.cancel();
            });
            engine.serve(cancel).await
        }
        Command::RunOnce => {
            let summary = engine.run_once().await?;
            print_json(&summary)
        }
        Command::Fetch => print_reports(&engine.run_task(Task::FetchEmails).await),
        Command::Process { email_id } => {
            print_reports(&engine.run_task(Task::ProcessEmail { email_id }).await)
        }
        Command::Bulk { email_ids } => {
            print_reports(&engine.run_task(Task::BulkProcess { email_ids }).await)
        }
        Command::Emails(args) => {
            let emails = review.list_emails(&args.to_filter()?).await;
            print_json(&emails)
        }
        Command::Show { email_id } => print_json(&review.email_detail(email_id).await?),
        Command::Assign { email_id, agent_id } => {
            print_json(&review.assign(email_id, agent_id).await?)
        }
        Command::Escalate { email_id, reason } => {
            print_json(&review.escalate(email_id, reason).await?)
        }
        Command::Spam { email_id } => print_json(&review.mark_spam(email_id).await?),
        Command::Close { email_id } => print_json(&review.close(email_id).await?),
        Command::Reprocess { email_id } => {
            review.prepare_reprocess(email_id).await?;
            print_reports(&engine.run_task(Task::ProcessEmail { email_id }).await)
        }
        Command::Reply {
            email_id,
            body,
            author,
        } => {
            let reply_id = review.create_reply(email_id, &body, author).await?;
            println!("📝 Reply {} created", reply_id);
            Ok(())
        }
        Command::Review(args) => {
            let result = review
                .review(args.reply_id, args.action()?, args.reviewer)
                .await?;
            print_json(&result)
        }
        Command::Send { reply_id, cc, bcc } => print_json(&review.send(reply_id, &cc, &bcc).await?),
        Command::Stats => print_json(&review.email_stats().await),
        Command::Metrics { date } => {
            print_reports(&engine.run_task(Task::DailyMetrics { date }).await)
        }
        Command::Dashboard { days } => print_json(&engine.analytics().dashboard(days).await),
        Command::Savings { days } => print_json(&engine.analytics().cost_savings(days).await),
        Command::Export { days } => {
            let file_name = engine.exporter().export(days).await?;
            println!(
                "📁 Metrics exported to: {}/{}",
                engine.config().storage.data_dir,
                file_name
            );
            Ok(())
        }
        Command::Cleanup => print_reports(&engine.run_task(Task::CleanupLogs).await),
        Command::Kb(kb) => match kb {
            KbCommand::Add {
                category,
                title,
                content,
                keywords,
                author,
            } => {
                let id = review
                    .add_article(parse_category(&category)?, &title, &content, keywords, author)
                    .await?;
                println!("📚 Article {} added", id);
                Ok(())
            }
            KbCommand::List { category } => {
                let category = category.as_deref().map(parse_category).transpose()?;
                print_json(&review.list_articles(category).await)
            }
            KbCommand::Search { keywords } => print_json(&review.search_by_keywords(&keywords).await),
            KbCommand::Deactivate { article_id } => {
                review.deactivate_article(article_id).await?;
                println!("Article {} deactivated", article_id);
                Ok(())
            }
        },
        Command::Sentiment { email_id } => print_json(&engine.analyze_sentiment(email_id).await?),
        Command::TestConnection => {
            let (imap, smtp) = engine.test_connections().await;
            print_json(&serde_json::json!({ "imap": imap, "smtp": smtp }))
        }
    }
}

async fn execute(cli: CliConfig) -> Result<()> {
    let mut config = SupportConfig::from_file(&cli.config)?;
    if let Some(monitor) = cli.monitor {
        config.monitoring.enabled = monitor;
    }
    if config.monitoring_enabled() {
        tracing::info!("🔍 System monitoring enabled");
    }

    config.validate()?;
    require_services(&config, &cli.command)?;

    let engine = build_engine(config).await?;
    run(&engine, cli.command).await
}

#[tokio::main]
async fn main() {
    let cli = CliConfig::parse();

    if cli.json_logs {
        logger::init_service_logger(cli.verbose);
    } else {
        logger::init_cli_logger(cli.verbose);
    }

    tracing::info!("Starting support-agent");
    if cli.verbose {
        tracing::debug!("CLI config: {:?}", cli);
    }

    if let Err(e) = execute(cli).await {
        tracing::error!(
            "❌ Command failed: {} (Category: {:?}, Severity: {:?})",
            e,
            e.category(),
            e.severity()
        );
        tracing::error!("💡 Recovery suggestion: {}", e.recovery_suggestion());

        eprintln!("❌ {}", e.user_friendly_message());
        eprintln!("💡 建議: {}", e.recovery_suggestion());

        std::process::exit(e.exit_code());
    }
}
