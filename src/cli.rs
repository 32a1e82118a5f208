use clap::{Args, Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use walkbus_worker::config::{WorkerConfig, default_asset_manifest};

#[allow(clippy::large_enum_variant)]
pub(crate) enum RunOutcome {
    Serve(SocketAddr, WorkerConfig),
    Exit(i32),
}

pub(crate) fn run() -> RunOutcome {
    let cli = Cli::parse();
    if let Some(Command::Init(args)) = cli.command {
        let code = run_init(args);
        return RunOutcome::Exit(code);
    }

    let Some(upstream) = cli.upstream else {
        eprintln!("error: --upstream is required unless using a subcommand");
        return RunOutcome::Exit(2);
    };
    let Some(storage_root) = cli.storage_root else {
        eprintln!("error: --storage-root is required unless using a subcommand");
        return RunOutcome::Exit(2);
    };
    if let Err(err) = std::fs::create_dir_all(&storage_root) {
        eprintln!(
            "error: cannot create storage root {}: {err}",
            storage_root.display()
        );
        return RunOutcome::Exit(2);
    }
    let storage_root = match std::fs::canonicalize(&storage_root) {
        Ok(root) => root,
        Err(err) => {
            eprintln!("error: failed to resolve storage root: {err}");
            return RunOutcome::Exit(2);
        }
    };

    let poll_interval = match parse_interval(&cli.poll_interval) {
        Ok(interval) => interval,
        Err(err) => {
            eprintln!("error: invalid --poll-interval: {err}");
            return RunOutcome::Exit(2);
        }
    };
    let page_reply_timeout = match parse_interval(&cli.page_reply_timeout) {
        Ok(timeout) => timeout,
        Err(err) => {
            eprintln!("error: invalid --page-reply-timeout: {err}");
            return RunOutcome::Exit(2);
        }
    };

    RunOutcome::Serve(
        cli.listen,
        WorkerConfig {
            upstream: upstream.trim_end_matches('/').to_string(),
            app_name: cli.app_name,
            version_tag: cli.version_tag,
            cache_prefix: cli.cache_prefix,
            asset_manifest: default_asset_manifest(),
            api_prefix: cli.api_prefix,
            storage_root,
            flat_storage: cli.flat_storage,
            poll_interval,
            page_reply_timeout,
            notifications_allowed: cli.notifications_allowed,
            vapid_private_key: cli.vapid_private_key,
            vapid_public_key: cli.vapid_public_key,
            vapid_subject: cli.vapid_subject,
        },
    )
}

#[derive(Parser, Debug)]
#[command(
    name = "walkbus-worker",
    version,
    about = "Offline cache and notification worker for the walking bus app"
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
    /// Base URL of the walking bus server.
    #[arg(long, env = "WALKBUS_UPSTREAM")]
    upstream: Option<String>,
    #[arg(long, env = "WALKBUS_LISTEN", default_value = "127.0.0.1:8920")]
    listen: SocketAddr,
    #[arg(long, env = "WALKBUS_STORAGE_ROOT")]
    storage_root: Option<PathBuf>,
    #[arg(long, default_value = "Walking Bus")]
    app_name: String,
    #[arg(long, default_value = "v1")]
    version_tag: String,
    #[arg(long, default_value = "walking-bus")]
    cache_prefix: String,
    #[arg(long, default_value = "/api/")]
    api_prefix: String,
    /// Use the flat single-directory storage layout.
    #[arg(long, env = "WALKBUS_FLAT_STORAGE")]
    flat_storage: bool,
    /// Reminder polling cadence, `<number>[s|m|h|d]`.
    #[arg(long, env = "WALKBUS_POLL_INTERVAL", default_value = "60s")]
    poll_interval: String,
    /// Upper bound on the token round-trip to a page, `<number>[s|m|h|d]`.
    #[arg(long, env = "WALKBUS_PAGE_REPLY_TIMEOUT", default_value = "3s")]
    page_reply_timeout: String,
    /// The user has granted notification permission.
    #[arg(long, env = "WALKBUS_NOTIFICATIONS_ALLOWED")]
    notifications_allowed: bool,
    #[arg(long, env = "WALKBUS_VAPID_PRIVATE_KEY")]
    vapid_private_key: Option<String>,
    #[arg(long, env = "WALKBUS_VAPID_PUBLIC_KEY")]
    vapid_public_key: Option<String>,
    #[arg(long, env = "WALKBUS_VAPID_SUBJECT")]
    vapid_subject: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Command {
    Init(InitArgs),
}

#[derive(Args, Debug)]
struct InitArgs {
    #[arg(long)]
    subject: Option<String>,
}

fn run_init(args: InitArgs) -> i32 {
    let credentials = match walkbus_worker::generate_vapid_credentials() {
        Ok(credentials) => credentials,
        Err(err) => {
            eprintln!("failed to generate VAPID credentials: {err}");
            return 1;
        }
    };
    let (subject, show_subject_note) = match args.subject {
        Some(subject) => (subject, false),
        None => ("mailto:you@example.com".to_string(), true),
    };

    println!("VAPID credentials generated.");
    println!();
    println!("WALKBUS_VAPID_PRIVATE_KEY=\"{}\"", credentials.private_key);
    println!("WALKBUS_VAPID_PUBLIC_KEY=\"{}\"", credentials.public_key);
    println!("WALKBUS_VAPID_SUBJECT=\"{subject}\"");
    if show_subject_note {
        println!();
        println!("Note: replace WALKBUS_VAPID_SUBJECT with a contact URI you control.");
    }
    0
}

fn parse_interval(raw: &str) -> Result<Duration, String> {
    let value = raw.trim();
    if value.is_empty() {
        return Err("interval cannot be empty".to_string());
    }

    let (amount, unit) = match value.chars().last() {
        Some(ch) if ch.is_ascii_alphabetic() => {
            (&value[..value.len() - 1], ch.to_ascii_lowercase())
        }
        _ => (value, 's'),
    };

    let amount: u64 = amount
        .parse()
        .map_err(|_| format!("invalid interval '{value}'; expected <number>[s|m|h|d]"))?;

    if amount == 0 {
        return Err("interval must be greater than 0".to_string());
    }

    match unit {
        's' => Ok(Duration::from_secs(amount)),
        'm' => Ok(Duration::from_secs(amount * 60)),
        'h' => Ok(Duration::from_secs(amount * 60 * 60)),
        'd' => Ok(Duration::from_secs(amount * 60 * 60 * 24)),
        _ => Err(format!(
            "invalid interval '{value}'; expected <number>[s|m|h|d]"
        )),
    }
}
