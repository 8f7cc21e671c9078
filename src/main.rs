//! Command line interface for publishing signed events. Supports
//! initialization, publishing notes and articles with media attachments,
//! profile and relay-list lookups, and standalone uploads.

mod broadcast;
mod config;
mod event;
mod fetch;
mod identity;
mod metadata;
mod relay;
mod rewrite;
mod upload;

use std::{
    fs,
    path::Path,
    time::{SystemTime, UNIX_EPOCH},
};

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};

use config::Settings;
use event::{EventTemplate, Tag, KIND_ARTICLE, KIND_NOTE};
use identity::{decode_pubkey, Keys, Signer};
use rewrite::LinkStyle;

/// Command line interface entry point.
#[derive(Parser)]
#[command(
    name = "broadcastr",
    author,
    version,
    about = "Multi-relay Nostr publisher",
    short_flag = 'v',
    long_flag = "version"
)]
struct Cli {
    /// Path to the `.env` configuration file.
    #[arg(long, default_value = ".env")]
    env: String,
    /// Subcommand to execute.
    #[command(subcommand)]
    command: Commands,
}

/// Supported CLI subcommands.
#[derive(Subcommand)]
enum Commands {
    /// Write a default `.env` file if none exists.
    Init,
    /// Sign a file's content and broadcast it to the configured relays.
    Publish {
        /// Path to the content file (plain text or markdown).
        file: String,
        /// Event kind: `note`, `article`, or a raw kind number.
        #[arg(long, default_value = "note")]
        kind: String,
        /// Article title; also used to derive the replaceable identifier.
        #[arg(long)]
        title: Option<String>,
        /// Media files to upload before publishing; matching references in
        /// the content are rewritten to the uploaded URLs.
        #[arg(long)]
        attach: Vec<String>,
        /// Link style for rewritten references: `markdown` or `plain`.
        #[arg(long)]
        style: Option<String>,
    },
    /// Fetch a user's profile and relay list from the discovery relays.
    Fetch {
        /// Author public key, `npub1...` or 64 hex characters.
        #[arg(long)]
        pubkey: String,
    },
    /// Upload files to the configured media host and print their URLs.
    Upload {
        #[arg(required = true)]
        files: Vec<String>,
    },
}

/// Execute the selected CLI subcommand.
async fn run(cli: Cli) -> anyhow::Result<()> {
    ensure_env_file(&cli.env)?;
    let cfg = Settings::from_env(&cli.env)?;
    match cli.command {
        Commands::Init => {}
        Commands::Publish {
            file,
            kind,
            title,
            attach,
            style,
        } => publish(&cfg, &file, &kind, title, &attach, style).await?,
        Commands::Fetch { pubkey } => {
            let pubkey = decode_pubkey(&pubkey)?;
            if cfg.discovery_relays.is_empty() {
                bail!("no discovery relays configured");
            }
            let meta =
                metadata::fetch_user_metadata(&cfg.discovery_relays, &pubkey, &cfg.fetch_opts())
                    .await?;
            match meta.profile {
                Some(p) => println!("name: {}", p.name.or(p.display_name).unwrap_or_default()),
                None => println!("name: (no profile found)"),
            }
            match meta.relay_list {
                Some(list) => {
                    for entry in list {
                        println!("relay: {} ({:?})", entry.url, entry.marker);
                    }
                }
                None => println!("relay: (no relay list found)"),
            }
        }
        Commands::Upload { files } => {
            let signer = require_signer(&cfg)?;
            let host = require_media_host(&cfg)?;
            let client = reqwest::Client::new();
            let results = upload::upload_all(&client, &signer, &host, &files).await;
            for r in &results {
                match (&r.url, &r.error) {
                    (Some(url), _) => println!("{}: {}", r.source, url),
                    (None, Some(err)) => println!("{}: failed: {}", r.source, err),
                    (None, None) => {}
                }
            }
            if results.iter().all(|r| !r.success) {
                bail!("every upload failed");
            }
        }
    }
    Ok(())
}

/// Publish one file: upload attachments, rewrite references, sign, broadcast.
async fn publish(
    cfg: &Settings,
    file: &str,
    kind: &str,
    title: Option<String>,
    attach: &[String],
    style: Option<String>,
) -> anyhow::Result<()> {
    // Credentials are checked before any file or network activity.
    let signer = require_signer(cfg)?;
    if cfg.relays.is_empty() {
        bail!("no relays configured; set RELAYS in the env file");
    }
    let kind = parse_kind(kind)?;
    let mut content = fs::read_to_string(file).with_context(|| format!("reading {file}"))?;

    if !attach.is_empty() {
        let host = require_media_host(cfg)?;
        let client = reqwest::Client::new();
        let results = upload::upload_all(&client, &signer, &host, attach).await;
        for r in results.iter().filter(|r| !r.success) {
            eprintln!(
                "upload failed, reference left as-is: {}: {}",
                r.source,
                r.error.as_deref().unwrap_or("unknown")
            );
        }
        let mapping = upload::successful_mappings(&results);
        let link_style = match style.as_deref() {
            Some("plain") => LinkStyle::PlainUrl,
            Some("markdown") => LinkStyle::MarkdownImage,
            Some(other) => bail!("unknown link style: {other}"),
            None => cfg.link_style,
        };
        content = rewrite::rewrite(&content, &mapping, link_style);
    }

    let mut tags = Vec::new();
    if kind == KIND_ARTICLE {
        let title = title
            .or_else(|| first_heading(&content))
            .unwrap_or_else(|| file_stem(file));
        tags.push(Tag::new(["d", &slugify(&title)]));
        tags.push(Tag::new(["title", &title]));
        tags.push(Tag::new(["published_at", &unix_now().to_string()]));
    }
    let template = EventTemplate {
        kind,
        created_at: unix_now(),
        tags,
        content,
    };
    let ev = signer.sign(&template)?;

    let outcomes = broadcast::broadcast(&ev, &cfg.relays, &cfg.net_opts()).await;
    for o in &outcomes {
        match &o.error {
            None => println!("{}: ok", o.url),
            Some(err) => println!("{}: failed: {}", o.url, err),
        }
    }
    if outcomes.iter().all(|o| !o.success) {
        bail!("event {} was accepted by no relay", ev.id);
    }
    println!("event id: {}", ev.id);
    Ok(())
}

fn require_signer(cfg: &Settings) -> anyhow::Result<Keys> {
    let key = cfg
        .secret_key
        .as_deref()
        .ok_or_else(|| anyhow::anyhow!("no secret key configured; set SECRET_KEY"))?;
    Ok(Keys::parse(key)?)
}

fn require_media_host(cfg: &Settings) -> anyhow::Result<String> {
    cfg.media_host
        .clone()
        .ok_or_else(|| anyhow::anyhow!("no media host configured; set MEDIA_HOST"))
}

fn parse_kind(input: &str) -> anyhow::Result<u32> {
    match input {
        "note" => Ok(KIND_NOTE),
        "article" => Ok(KIND_ARTICLE),
        other => other
            .parse()
            .with_context(|| format!("unknown kind: {other}")),
    }
}

/// First markdown `#` heading of `content`, if any.
fn first_heading(content: &str) -> Option<String> {
    content.lines().find_map(|line| {
        line.strip_prefix("# ")
            .map(|rest| rest.trim().to_string())
            .filter(|s| !s.is_empty())
    })
}

fn file_stem(path: &str) -> String {
    Path::new(path)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string())
}

/// Lowercase ascii slug; runs of non-alphanumerics become single hyphens.
fn slugify(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut last_hyphen = true;
    for c in input.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
            last_hyphen = false;
        } else if !last_hyphen {
            out.push('-');
            last_hyphen = true;
        }
    }
    while out.ends_with('-') {
        out.pop();
    }
    out
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Create a default `.env` file if one is not already present at `path`.
fn ensure_env_file(path: &str) -> anyhow::Result<()> {
    let env_path = Path::new(path);
    if env_path.exists() {
        return Ok(());
    }
    if let Some(parent) = env_path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let mut content = String::new();
    content.push_str("SECRET_KEY=\n");
    content.push_str("RELAYS=\n");
    content.push_str("DISCOVERY_RELAYS=\n");
    content.push_str("MEDIA_HOST=\n");
    content.push_str("TOR_SOCKS=\n");
    content.push_str("LINK_STYLE=markdown\n");
    content.push_str("CONNECT_TIMEOUT_MS=5000\n");
    content.push_str("ACK_TIMEOUT_MS=10000\n");
    content.push_str("FETCH_SOFT_TIMEOUT_MS=4000\n");
    content.push_str("FETCH_HARD_TIMEOUT_MS=15000\n");
    fs::write(env_path, content)?;
    Ok(())
}

#[cfg(not(test))]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();
    let cli = Cli::parse();
    run(cli).await
}
