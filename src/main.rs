#![cfg(feature = "cli")]
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{ArgAction, Parser, Subcommand};
use log::{error, info, LevelFilter};

use rssecmanager::config::Config;
use rssecmanager::manager::SecManager;
use rssecmanager::remote::JsonRpcTransport;
use rssecmanager::request::AcquisitionRequest;
use rssecmanager::session::{SessionHandle, SessionId};
use rssecmanager::utils::encode_buffer;

#[cfg(feature = "chrono")]
use chrono::Datelike;

#[derive(Parser)]
#[command(name = "rssecmanager", version, disable_version_flag = true, about = "rssecmanager CLI")]
struct Cli {
    #[arg(short = 'v', long = "version", action = ArgAction::SetTrue)]
    version: bool,

    #[arg(short = 'd', long = "debug", action = ArgAction::SetTrue)]
    debug: bool,

    /// YAML config file; defaults apply when omitted.
    #[arg(short = 'c', long = "config", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

/// CLI subcommands.
#[derive(Subcommand)]
enum Commands {
    /// Open a session and acquire a license.
    ///
    /// The access token, content metadata and license challenge are read
    /// from files and forwarded unchanged. The session is closed again
    /// before the command exits.
    Acquire {
        access_token: PathBuf,
        content_metadata: PathBuf,
        challenge: PathBuf,
        #[arg(short = 'k', long = "key-system", default_value = "com.widevine.alpha")]
        key_system: String,
        #[arg(short = 'u', long = "media-usage", default_value = "stream")]
        media_usage: String,
        #[arg(short = 'm', long = "muted", action = ArgAction::SetTrue)]
        muted: bool,
    },
    /// Close a session.
    Close { session_id: SessionId },
    /// Report the video window size of a session.
    Window {
        session_id: SessionId,
        width: u32,
        height: u32,
    },
    /// Report playback speed and position (ms) of a session.
    Position {
        session_id: SessionId,
        speed: f64,
        position: i64,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = if cli.debug {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    env_logger::Builder::new().filter_level(level).init();

    let version = env!("CARGO_PKG_VERSION");
    info!("rssecmanager version {} ({})", version, current_year());

    if cli.version {
        return Ok(());
    }

    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Some(Commands::Acquire {
            access_token,
            content_metadata,
            challenge,
            key_system,
            media_usage,
            muted,
        }) => run_acquire(
            config,
            &access_token,
            &content_metadata,
            &challenge,
            key_system,
            media_usage,
            muted,
        ),
        Some(Commands::Close { session_id }) => {
            let manager = connect(config)?;
            report(manager.release_session(session_id), "Closed session", session_id)
        }
        Some(Commands::Window {
            session_id,
            width,
            height,
        }) => {
            let manager = connect(config)?;
            report(
                manager.set_window_size(session_id, width, height),
                "Set window size of session",
                session_id,
            )
        }
        Some(Commands::Position {
            session_id,
            speed,
            position,
        }) => {
            let manager = connect(config)?;
            report(
                manager.set_playback_position(session_id, speed, position),
                "Set playback position of session",
                session_id,
            )
        }
        None => Ok(()),
    }
}

fn current_year() -> i64 {
    #[cfg(feature = "chrono")]
    {
        chrono::Local::now().year().into()
    }
    #[cfg(not(feature = "chrono"))]
    {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs() / 31_536_000 + 1970)
            .unwrap_or(2026) as i64
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<Config> {
    match path {
        Some(path) => Config::from_path(path)
            .with_context(|| format!("Failed to load config {}", path.display())),
        None => Ok(Config::default()),
    }
}

fn connect(config: Config) -> anyhow::Result<SecManager> {
    let transport = JsonRpcTransport::security(&config).context("Failed to create transport")?;
    info!("[+] Using {} at {}", config.security_callsign, config.endpoint);
    Ok(SecManager::new(Arc::new(transport), config))
}

fn report(ok: bool, what: &str, session_id: SessionId) -> anyhow::Result<()> {
    if !ok {
        anyhow::bail!("{} {} failed", what, session_id);
    }
    info!("[+] {} {}", what, session_id);
    Ok(())
}

fn run_acquire(
    config: Config,
    access_token: &Path,
    content_metadata: &Path,
    challenge: &Path,
    key_system: String,
    media_usage: String,
    muted: bool,
) -> anyhow::Result<()> {
    let access_token = std::fs::read(access_token).context("Failed to read access token")?;
    let content_metadata =
        std::fs::read(content_metadata).context("Failed to read content metadata")?;
    let challenge = std::fs::read(challenge).context("Failed to read license challenge")?;

    let mut request =
        AcquisitionRequest::new(key_system, access_token, content_metadata, challenge);
    request.media_usage = media_usage;
    request.video_muted = muted;
    info!("[+] Trace context {}", request.trace_context);

    let manager = connect(config)?;
    let outcome = manager.acquire(request.fingerprint(), &SessionHandle::default(), &request);
    if !outcome.success {
        error!(
            "[-] License acquisition failed: class {} reason {} business status {}",
            outcome.status_code,
            outcome.reason_code,
            outcome.business_status
        );
        anyhow::bail!("License acquisition failed");
    }

    info!("[+] Opened session {}", outcome.handle.session_id());
    info!("[+] License ({} bytes): {}", outcome.payload.len(), encode_buffer(&outcome.payload));
    info!("[+] Closing session {}", outcome.handle.session_id());
    Ok(())
}
