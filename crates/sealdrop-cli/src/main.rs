//! sealdrop: end-to-end encrypted file, text and image sharing
//!
//! Commands:
//!   send file|text|image   - encrypt and upload, print the share link
//!   get <url>              - download, decrypt and present (stdout, file, or viewer)
//!   list                   - uploads remembered in the local registry
//!   refresh                - ask the server which remembered uploads are still live
//!   revoke <file-id>       - delete an upload early using its owner token
//!   countries              - country list and groups for geo restrictions
//!   config show            - display the active configuration

mod save;
mod term;

use std::io::{IsTerminal, Read};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use secrecy::{ExposeSecret, SecretString};
use tracing::{info, warn};

use sealdrop_client::viewer::CloseReason;
use sealdrop_client::{
    Content, Delivery, DownloadSession, DownloadState, FileStatus, HttpShareApi, ImageDelivery,
    KeyMode, LocalRegistry, ShareApi, ShareContext, ShareLink, UploadPipeline,
};
use sealdrop_core::config::{default_config_path, expand_tilde, SealdropConfig};
use sealdrop_core::types::{GeoRestriction, UploadOptions};
use sealdrop_core::ShareError;

// ── CLI structure ──────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "sealdrop",
    version,
    about = "End-to-end encrypted sharing",
    long_about = "sealdrop: share files, text and images; the server only ever sees ciphertext"
)]
struct Cli {
    /// Path to config.toml (default: ~/.config/sealdrop/config.toml)
    #[arg(long, short = 'c', env = "SEALDROP_CONFIG")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error); overrides [logging] level
    #[arg(long, env = "SEALDROP_LOG")]
    log: Option<String>,

    /// Log format (json, text); overrides [logging] format
    #[arg(long, env = "SEALDROP_LOG_FORMAT")]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Debug, ValueEnum)]
enum LogFormat {
    Json,
    Text,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Encrypt and upload something
    Send {
        #[command(subcommand)]
        what: SendCommand,
    },

    /// Download and decrypt a share link
    Get {
        /// Share URL, e.g. https://drop.example.org/d/abc123#key
        url: String,
        /// Directory for downloaded files (default: current directory)
        #[arg(long, short = 'o')]
        output: Option<PathBuf>,
        /// Prompt for a password even if the link carries one
        #[arg(long)]
        password: bool,
    },

    /// List uploads remembered in the local registry
    List,

    /// Check remembered uploads against the server and forget expired ones
    Refresh {
        /// Keep expired entries in the registry
        #[arg(long)]
        keep_expired: bool,
    },

    /// Delete an upload before it expires
    Revoke {
        /// File id as shown by `sealdrop list`
        file_id: String,
    },

    /// Show the countries available for geo restrictions
    Countries,

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum SendCommand {
    /// Share a file
    File {
        path: PathBuf,
        #[command(flatten)]
        opts: SendArgs,
    },
    /// Share a text snippet ("-" reads stdin)
    Text {
        text: String,
        #[command(flatten)]
        opts: SendArgs,
    },
    /// Share an image (metadata is stripped before encryption)
    Image {
        path: PathBuf,
        /// Seconds the recipient may look at the image once revealed
        #[arg(long)]
        ephemeral: Option<u32>,
        #[command(flatten)]
        opts: SendArgs,
    },
}

#[derive(Args, Debug)]
struct SendArgs {
    /// Number of downloads allowed (1-15)
    #[arg(long)]
    count: Option<u8>,
    /// Days until the link expires (1-14)
    #[arg(long)]
    expiry: Option<u8>,
    /// Address notified on each download attempt (default: last one used)
    #[arg(long)]
    email: Option<String>,
    /// Where downloads are allowed from: none, eea, gdpr-aligned
    #[arg(long)]
    geo: Option<String>,
    /// Allow only these countries (ISO codes, repeatable); overrides --geo
    #[arg(long = "allow", value_name = "CC")]
    allow: Vec<String>,
    /// Minutes before the first download is possible
    #[arg(long)]
    delay: Option<u32>,
    /// Password-derived key instead of a key in the link
    #[arg(long)]
    legacy: bool,
    /// Prompt for the legacy password instead of generating one
    #[arg(long, requires = "legacy")]
    password: bool,
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the active configuration (merged defaults + config file)
    Show,
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_path = cli.config.clone().unwrap_or_else(default_config_path);
    let config = load_config(&config_path).await?;

    let level = cli.log.as_deref().unwrap_or(&config.logging.level);
    let format = cli.log_format.clone().unwrap_or(match config.logging.format.as_str() {
        "json" => LogFormat::Json,
        _ => LogFormat::Text,
    });
    init_logging(level, &format);
    if !config_path.exists() {
        warn!("config file not found: {}  (using defaults)", config_path.display());
    }

    match cli.command {
        Commands::Send { what } => cmd_send(config, what).await,
        Commands::Get {
            url,
            output,
            password,
        } => cmd_get(config, &url, output.as_deref(), password).await,
        Commands::List => cmd_list(&config),
        Commands::Refresh { keep_expired } => cmd_refresh(config, keep_expired).await,
        Commands::Revoke { file_id } => cmd_revoke(config, &file_id).await,
        Commands::Countries => cmd_countries(config).await,
        Commands::Config {
            action: ConfigAction::Show,
        } => cmd_config_show(&config, &config_path),
    }
}

/// Logs go to stderr; stdout carries shared text and links.
fn init_logging(level: &str, format: &LogFormat) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    match format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}

async fn load_config(path: &Path) -> Result<SealdropConfig> {
    if path.exists() {
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("reading config: {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("parsing config: {}", path.display()))
    } else {
        Ok(SealdropConfig::default())
    }
}

fn open_registry(config: &SealdropConfig) -> Result<LocalRegistry> {
    let path = expand_tilde(&config.registry.path);
    LocalRegistry::open(&path).with_context(|| format!("opening registry: {}", path.display()))
}

fn build_context(config: SealdropConfig, with_registry: bool) -> Result<ShareContext<HttpShareApi>> {
    let api = HttpShareApi::new(&config.server).context("configuring server connection")?;
    let registry = if with_registry && config.upload.save_files {
        Some(open_registry(&config)?)
    } else {
        None
    };
    let ctx = ShareContext::new(config, api);
    Ok(match registry {
        Some(registry) => ctx.with_registry(registry),
        None => ctx,
    })
}

// ── Progress helpers ──────────────────────────────────────────────────────────

fn make_spinner(prefix: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::with_template("{prefix:.bold} {spinner} {msg}") {
        pb.set_style(style);
    }
    pb.set_prefix(prefix.to_string());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

fn prompt_password(prompt: &str) -> Result<SecretString> {
    let password = rpassword::prompt_password(prompt).context("reading password")?;
    if password.is_empty() {
        anyhow::bail!("empty password");
    }
    Ok(SecretString::from(password))
}

// ── `sealdrop send` ───────────────────────────────────────────────────────────

async fn cmd_send(config: SealdropConfig, what: SendCommand) -> Result<()> {
    let (content, opts) = match what {
        SendCommand::File { path, opts } => {
            let bytes = tokio::fs::read(&path)
                .await
                .with_context(|| format!("reading {}", path.display()))?;
            (
                Content::File {
                    name: file_name(&path),
                    bytes,
                },
                opts,
            )
        }
        SendCommand::Text { text, opts } => {
            let text = if text == "-" {
                let mut buf = String::new();
                std::io::stdin()
                    .read_to_string(&mut buf)
                    .context("reading text from stdin")?;
                buf
            } else {
                text
            };
            (Content::Text(text), opts)
        }
        SendCommand::Image {
            path,
            ephemeral,
            opts,
        } => {
            let bytes = tokio::fs::read(&path)
                .await
                .with_context(|| format!("reading {}", path.display()))?;
            (
                Content::Image {
                    name: file_name(&path),
                    bytes,
                    ephemeral_seconds: ephemeral,
                },
                opts,
            )
        }
    };

    let ctx = build_context(config, true)?;
    let options = upload_options(&ctx, &opts).await?;
    let mode = if opts.legacy || ctx.config.upload.legacy_mode {
        let password = if opts.password {
            Some(prompt_password("Password for this share: ")?)
        } else {
            None
        };
        KeyMode::Legacy { password }
    } else {
        KeyMode::Fragment
    };

    let pipeline = UploadPipeline::new(ctx.clone());
    let pb = make_spinner("send");
    pb.set_message("encrypting and uploading");
    let result = pipeline.submit(content, &options, mode).await;
    pb.finish_and_clear();
    let receipt = result.context("upload failed")?;

    println!("{}", receipt.share_url);
    if let Some(password) = &receipt.password {
        eprintln!("password: {}", password.expose_secret());
        eprintln!("  send the password separately from the link");
    }
    eprintln!(
        "  {} · {} download(s) · expires in {} day(s) · id {}",
        receipt.filename, options.count, options.expiry_days, receipt.file_id
    );
    info!(file_id = %receipt.file_id, "shared");
    Ok(())
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "file".to_string())
}

async fn upload_options(ctx: &ShareContext<HttpShareApi>, opts: &SendArgs) -> Result<UploadOptions> {
    let defaults = &ctx.config.upload;

    let geo = if !opts.allow.is_empty() {
        let codes: Vec<String> = opts
            .allow
            .iter()
            .flat_map(|c| c.split(','))
            .map(|c| c.trim().to_ascii_uppercase())
            .filter(|c| !c.is_empty())
            .collect();
        warn_unknown_countries(ctx, &codes).await;
        GeoRestriction::Custom(codes)
    } else {
        opts.geo
            .as_deref()
            .unwrap_or(defaults.default_geo.as_str())
            .parse::<GeoRestriction>()
            .context("--geo")?
    };

    let email = match &opts.email {
        Some(email) => Some(email.clone()),
        None => match &ctx.registry {
            Some(registry) => registry.lock().await.last_email().map(str::to_string),
            None => None,
        },
    };
    if let Some(email) = &email {
        eprintln!("download notifications go to {email}");
    }

    Ok(UploadOptions {
        count: opts.count.unwrap_or(defaults.default_count),
        expiry_days: opts.expiry.unwrap_or(defaults.default_expiry_days),
        email,
        geo,
        delay_minutes: opts.delay,
        ephemeral_seconds: None,
    })
}

/// Unknown codes are passed through; the server has the final word.
async fn warn_unknown_countries(ctx: &ShareContext<HttpShareApi>, codes: &[String]) {
    match ctx.api.countries().await {
        Ok(countries) => {
            for code in codes.iter().filter(|c| !countries.knows(c)) {
                warn!(code, "country code not known to the server");
                eprintln!("warning: {code} is not in the server's country list");
            }
        }
        Err(e) => tracing::debug!("country list unavailable: {e}"),
    }
}

// ── `sealdrop get` ────────────────────────────────────────────────────────────

async fn cmd_get(
    config: SealdropConfig,
    url: &str,
    output: Option<&Path>,
    force_prompt: bool,
) -> Result<()> {
    let ctx = build_context(config, false)?;
    let link = ShareLink::parse(url)?;
    let session = DownloadSession::new(ctx, link);

    let pb = make_spinner("get");
    pb.set_message("fetching and decrypting");
    let forced = if force_prompt {
        Some(pb.suspend(|| prompt_password("Password: "))?)
    } else {
        None
    };
    let delivery = match forced {
        Some(password) => {
            // ignore whatever secret the link carries
            session.await_password();
            session.submit_password(password).await
        }
        None => match session.mount().await {
            Ok(None) if session.state() == DownloadState::AwaitingPassword => {
                let password = pb.suspend(|| prompt_password("Password: "))?;
                session.submit_password(password).await
            }
            other => other,
        },
    };
    pb.finish_and_clear();

    let delivery = delivery
        .context("download failed")?
        .context("nothing to show")?;

    match delivery {
        Delivery::Text(text) => {
            println!("{}", text.text.as_str());
            session.dismiss();
        }
        Delivery::File(file) => {
            let dir = output.map(Path::to_path_buf).unwrap_or_else(|| PathBuf::from("."));
            match save::write_unique(&dir, &file.filename, &file.bytes) {
                Ok(path) => {
                    session.finish_file(Ok(()));
                    eprintln!("saved {}", path.display());
                    info!(path = %path.display(), "file saved");
                }
                Err(e) => {
                    let context = format!("saving into {}", dir.display());
                    session.finish_file(Err(ShareError::Io(e)));
                    session.settle().await;
                    anyhow::bail!("{context}: {}", session_failure(&session));
                }
            }
        }
        Delivery::Image(image) => show_image(&session, image).await?,
    }

    session.settle().await;
    Ok(())
}

fn session_failure(session: &DownloadSession<HttpShareApi>) -> String {
    match session.state() {
        DownloadState::Failed(reason) => reason,
        other => format!("{other:?}"),
    }
}

async fn show_image(session: &DownloadSession<HttpShareApi>, image: ImageDelivery) -> Result<()> {
    if !std::io::stdout().is_terminal() {
        anyhow::bail!("images can only be shown on a terminal");
    }

    let ephemeral = image.ephemeral_seconds;
    if let Some(seconds) = ephemeral {
        eprintln!(
            "{} can be viewed once, for {seconds} second(s). Press Enter to reveal.",
            image.filename
        );
        tokio::task::spawn_blocking(|| {
            let mut line = String::new();
            std::io::stdin().read_line(&mut line).map(|_| ())
        })
        .await
        .context("waiting for Enter")?
        .context("reading stdin")?;
    }

    let guard = term::RawModeGuard::enter().context("entering raw mode")?;
    let surface = term::TerminalSurface::new(ephemeral.is_some());
    let handle = session.open_viewer(image, Box::new(surface))?;

    let stop = Arc::new(AtomicBool::new(false));
    let input = term::spawn_input(handle.controller(), Arc::clone(&stop));
    let reason = handle.closed().await;
    stop.store(true, Ordering::Release);
    let _ = input.await;
    drop(handle);
    drop(guard);

    match reason {
        CloseReason::Expired => eprintln!("viewing time is up; the image is gone"),
        CloseReason::UserClosed | CloseReason::Dropped => {}
    }
    Ok(())
}

// ── `sealdrop list` / `refresh` / `revoke` ────────────────────────────────────

fn cmd_list(config: &SealdropConfig) -> Result<()> {
    let registry = open_registry(config)?;
    if registry.is_empty() {
        println!("no uploads remembered in {}", registry.path().display());
        return Ok(());
    }
    for entry in registry.list() {
        println!(
            "{}  {}  {}",
            entry.file_id,
            entry.created_at.format("%Y-%m-%d %H:%M"),
            entry.filename
        );
        println!("    {}", entry.location);
    }
    Ok(())
}

async fn cmd_refresh(config: SealdropConfig, keep_expired: bool) -> Result<()> {
    let mut registry = open_registry(&config)?;
    let api = HttpShareApi::new(&config.server)?;

    let pb = make_spinner("refresh");
    let statuses = registry.refresh(&api, chrono::Utc::now()).await;
    pb.finish_and_clear();
    let statuses = statuses.context("validating uploads")?;

    for (entry, status) in &statuses {
        let line = match status {
            FileStatus::Active {
                downloads_left,
                expires,
            } => format!(
                "active, {downloads_left} download(s) left, expires {}",
                expires.format("%Y-%m-%d %H:%M")
            ),
            FileStatus::Expired => "expired".to_string(),
            FileStatus::Error(msg) => format!("error: {msg}"),
            FileStatus::Unknown => "unknown".to_string(),
        };
        println!("{}  {}  {line}", entry.file_id, entry.filename);
        if status.is_expired() && !keep_expired {
            registry.remove(&entry.file_id);
        }
    }
    registry.flush().context("saving registry")?;
    Ok(())
}

async fn cmd_revoke(config: SealdropConfig, file_id: &str) -> Result<()> {
    let mut registry = open_registry(&config)?;
    let api = HttpShareApi::new(&config.server)?;
    let outcome = registry
        .revoke(&api, file_id)
        .await
        .with_context(|| format!("revoking {file_id}"))?;
    println!("{file_id}: {outcome:?}");
    Ok(())
}

// ── `sealdrop countries` ──────────────────────────────────────────────────────

async fn cmd_countries(config: SealdropConfig) -> Result<()> {
    let api = HttpShareApi::new(&config.server)?;
    let countries = api.countries().await.context("fetching country list")?;

    let mark = |code: &str, group: &[String]| if group.iter().any(|c| c == code) { "x" } else { " " };
    println!("code  eea  gdpr  name");
    for country in &countries.countries {
        let you = if countries.your_country.as_deref() == Some(country.code.as_str()) {
            "  (you)"
        } else {
            ""
        };
        println!(
            "{:<4}  {:^3}  {:^4}  {}{you}",
            country.code,
            mark(&country.code, &countries.groups.eu_eea),
            mark(&country.code, &countries.groups.gdpr_aligned),
            country.name
        );
    }
    Ok(())
}

// ── `sealdrop config show` ────────────────────────────────────────────────────

fn cmd_config_show(config: &SealdropConfig, config_path: &Path) -> Result<()> {
    if config_path.exists() {
        println!("# Configuration from: {}", config_path.display());
    } else {
        println!("# Configuration: defaults (no file at {})", config_path.display());
    }
    println!();
    let rendered = toml::to_string_pretty(config).context("serializing config to TOML")?;
    print!("{rendered}");
    Ok(())
}
