use std::env;
use std::sync::Arc;

use mailmirror::db::Database;
use mailmirror::models::MailItem;
use mailmirror::query::{QueryService, View};
use mailmirror::status::StatusStore;
use mailmirror::Config;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("mailmirror=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        eprintln!("Usage: {} <search_query> [page]", args[0]);
        eprintln!("Full-text search over subject, sender and body; *.ext finds attachments.");
        std::process::exit(1);
    }

    let query = &args[1];
    let page: i64 = match args.get(2) {
        Some(p) => p.parse()?,
        None => 1,
    };

    let config = Config::load();
    let db = Database::open(&config.database_path())
        .await
        .map_err(|e| anyhow::anyhow!("Failed to open {}: {}", config.database_path().display(), e))?;
    db.run_migrations().await?;
    let status = StatusStore::open(&config.data_dir).await;

    let service = QueryService::new(Arc::new(db), Arc::new(status));
    let result = service.view(&View::Search(query.clone()), page).await?;

    if result.threads.is_empty() {
        println!("No messages found matching '{}'", query);
        return Ok(());
    }

    println!(
        "{} message(s), page {} of {}",
        result.total, result.page, result.total_pages
    );
    for thread in &result.threads {
        println!(
            "--------------------------------------------------------------------------------"
        );
        let marker = match (thread.unread, thread.starred) {
            (true, true) => "*!",
            (true, false) => " !",
            (false, true) => "* ",
            (false, false) => "  ",
        };
        println!("{} {} ({})", marker, thread.subject, thread.sender);
        for member in &thread.members {
            let message = &member.message;
            println!(
                "     {:>6} {:<24} {} {}",
                message.uid(),
                message.folder(),
                message.date_str(),
                member.display_sender()
            );
        }
        for attachment in &thread.attachments {
            println!("     [{}] {} bytes", attachment.filename, attachment.size);
        }
    }

    Ok(())
}
