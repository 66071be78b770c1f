//! CLI entry point for `tbarchive`.

use std::io::Write as _;

use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};

use tbarchive::archive::ArchiveRegistry;
use tbarchive::config;
use tbarchive::index::store::SearchCriteria;
use tbarchive::service::MailService;

#[derive(Parser)]
#[command(name = "tbarchive", version, about = "Index and look up Thunderbird mail archives")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose logging (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Profile registry file (defaults to the standard location)
    #[arg(long, value_name = "PATH", global = true)]
    profiles: Option<std::path::PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Retrieve one mail by user and message id
    Get {
        #[arg(short, long)]
        user: String,
        #[arg(short, long)]
        mailid: String,
        /// Print the wiki-markup record instead of the message text
        #[arg(long)]
        wiki: bool,
        /// Write the decoded bytes of one MIME part (by index) to stdout
        #[arg(long, value_name = "N", conflicts_with = "wiki")]
        part: Option<usize>,
    },
    /// Create or update the secondary index
    Index {
        #[arg(short, long)]
        user: String,
        /// Rebuild even when the index looks up to date
        #[arg(short, long)]
        force: bool,
        /// Restrict the pass to these relative folder paths
        #[arg(long, value_name = "PATH")]
        scope: Vec<String>,
        /// Print per-mailbox outcomes, not just the summary
        #[arg(long)]
        details: bool,
    },
    /// List a user's mailboxes as the index recorded them
    Mailboxes {
        #[arg(short, long)]
        user: String,
        #[arg(long)]
        json: bool,
    },
    /// Substring search over the indexed header fields
    Search {
        #[arg(short, long)]
        user: String,
        #[arg(long)]
        subject: Option<String>,
        #[arg(long)]
        from: Option<String>,
        #[arg(long)]
        to: Option<String>,
        #[arg(long = "id")]
        message_id: Option<String>,
    },
    /// Wildcard message-id search against the gloda catalog
    Idsearch {
        #[arg(short, long)]
        user: String,
        pattern: String,
    },
    /// Show the configured archives
    Overview {
        #[arg(long)]
        json: bool,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    setup_logging(log_level);

    let profiles = match &cli.profiles {
        Some(path) => config::load_registry_from(path)?,
        None => config::load_registry()?,
    };
    let registry = ArchiveRegistry::from_profiles(&profiles);
    let service = MailService::new(registry);

    match cli.command {
        Commands::Get {
            user,
            mailid,
            wiki,
            part,
        } => cmd_get(&service, &user, &mailid, wiki, part),
        Commands::Index {
            user,
            force,
            scope,
            details,
        } => cmd_index(&service, &user, force, &scope, details),
        Commands::Mailboxes { user, json } => cmd_mailboxes(&service, &user, json),
        Commands::Search {
            user,
            subject,
            from,
            to,
            message_id,
        } => cmd_search(&service, &user, subject, from, to, message_id),
        Commands::Idsearch { user, pattern } => cmd_idsearch(&service, &user, &pattern),
        Commands::Overview { json } => cmd_overview(&service, json),
    }
}

/// Set up tracing with stderr output and optional file logging.
fn setup_logging(level: &str) {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    let log_dir = config::cache_dir();
    if std::fs::create_dir_all(&log_dir).is_ok() {
        let file_appender = tracing_appender::rolling::never(&log_dir, "tbarchive.log");
        let file_layer = tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_writer(file_appender);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(stderr_layer)
            .with(file_layer)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(stderr_layer)
            .init();
    }
}

fn cmd_get(
    service: &MailService,
    user: &str,
    mailid: &str,
    wiki: bool,
    part: Option<usize>,
) -> anyhow::Result<()> {
    let document = service.resolve(user, mailid)?;
    if let Some(index) = part {
        let content = document.message.part_content(index)?;
        std::io::stdout().write_all(content)?;
    } else if wiki {
        println!("{}", document.as_wiki_markup());
    } else {
        for (name, value) in document.message.headers() {
            println!("{name}: {value}");
        }
        println!();
        println!("{}", document.message.text());
    }
    Ok(())
}

fn cmd_index(
    service: &MailService,
    user: &str,
    force: bool,
    scope: &[String],
    details: bool,
) -> anyhow::Result<()> {
    let pb = ProgressBar::new(0);
    pb.set_style(
        ProgressStyle::default_bar()
            .template(
                "{spinner:.green} indexing [{bar:40.cyan/blue}] {pos}/{len} mailboxes ({eta})",
            )
            .expect("valid template")
            .progress_chars("#>-"),
    );

    let scope = if scope.is_empty() { None } else { Some(scope) };
    let report = service.reindex(
        user,
        force,
        scope,
        Some(&|current, total| {
            pb.set_length(total);
            pb.set_position(current);
        }),
    )?;
    pb.finish_and_clear();

    println!("{}", report.msg);
    if details {
        let detail = report.details();
        if !detail.is_empty() {
            print!("{detail}");
        }
    }
    if report.total_mailboxes > 0 {
        let summary = report.summary();
        if report.total_errors > 0 {
            writeln!(std::io::stderr(), "{summary}")?;
        } else {
            println!("{summary}");
        }
    }
    Ok(())
}

fn cmd_mailboxes(service: &MailService, user: &str, json: bool) -> anyhow::Result<()> {
    let mut mailboxes = service.list_mailboxes(user)?;
    // newest first for display
    mailboxes.sort_by(|a, b| b.folder_update_time.cmp(&a.folder_update_time));
    if json {
        let records: Vec<serde_json::Value> = mailboxes
            .iter()
            .map(|m| {
                serde_json::json!({
                    "relative_folder_path": m.relative_folder_path,
                    "folder_update_time": m.folder_update_time.map(|t| t.to_rfc3339()),
                    "message_count": m.message_count,
                    "error": m.error,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&records)?);
    } else {
        for m in &mailboxes {
            let stamp = m
                .folder_update_time
                .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_else(|| "-".to_string());
            match &m.error {
                Some(error) => println!(
                    "{} | {} | {} messages | error: {}",
                    m.relative_folder_path, stamp, m.message_count, error
                ),
                None => println!(
                    "{} | {} | {} messages",
                    m.relative_folder_path, stamp, m.message_count
                ),
            }
        }
    }
    Ok(())
}

fn cmd_search(
    service: &MailService,
    user: &str,
    subject: Option<String>,
    from: Option<String>,
    to: Option<String>,
    message_id: Option<String>,
) -> anyhow::Result<()> {
    let criteria = SearchCriteria {
        subject,
        sender: from,
        recipient: to,
        message_id,
    };
    let hits = service.search(user, &criteria)?;
    println!("{} messages found", hits.len());
    for hit in &hits {
        println!(
            "{} | {} | {} | {}",
            hit.iso_date, hit.message_id, hit.subject, hit.folder_path
        );
    }
    Ok(())
}

fn cmd_idsearch(service: &MailService, user: &str, pattern: &str) -> anyhow::Result<()> {
    let matches = service.wildcard_id_search(user, pattern)?;
    for m in &matches {
        let stamp = m
            .date
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{} | {} | {} | {}",
            stamp, m.header_message_id, m.folder_name, m.folder_uri
        );
    }
    Ok(())
}

fn cmd_overview(service: &MailService, json: bool) -> anyhow::Result<()> {
    let summaries = service.archive_summaries();
    if json {
        println!("{}", serde_json::to_string_pretty(&summaries)?);
    } else {
        for s in &summaries {
            let index = s
                .index_update_time
                .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_else(|| "no index".to_string());
            println!(
                "{} | gloda: {} | index: {} | profile: {}",
                s.user,
                s.gloda_db_path.display(),
                index,
                s.profile.display()
            );
        }
    }
    Ok(())
}
