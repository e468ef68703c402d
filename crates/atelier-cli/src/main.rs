use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use atelier_contracts::continuation::ContinuationStore;
use atelier_contracts::credentials::{
    CredentialGate, CredentialProvider, EnvCredentialProvider, MemoryCredentialProvider,
};
use atelier_contracts::events::EventWriter;
use atelier_contracts::media::{
    decode_data_url, encode_file, extension_for_media_type, ImageAspectRatio, MediaAsset,
    ResolvedMedia, VideoAspectRatio,
};
use atelier_contracts::models::{Capability, ModelSelector};
use atelier_engine::poller::{MAX_POLL_INTERVAL, MAX_POLL_WAIT, MIN_POLL_INTERVAL};
use atelier_engine::{
    CancelToken, ChatMessage, FlowError, GenAiClient, GenAiModels, OpenRouterClient,
    OperationPoller, ReqwestTransport, Studio, StudioConfig, Transport, VideoOutcome,
    VideoRequest,
};
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "atelier", version, about = "Generative image and video studio")]
struct Cli {
    #[command(flatten)]
    session: SessionArgs,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Args)]
struct SessionArgs {
    /// Directory for results, the event log and the continuation context.
    #[arg(long, global = true, default_value = "atelier-out")]
    out: PathBuf,
    #[arg(long, global = true)]
    events: Option<PathBuf>,
    /// Use this key instead of GEMINI_API_KEY / GOOGLE_API_KEY / API_KEY.
    #[arg(long, global = true, env = "ATELIER_API_KEY", hide_env_values = true)]
    api_key: Option<String>,
    #[arg(long, global = true)]
    api_base: Option<String>,
    /// Seconds between operation status checks (0.5 to 300).
    #[arg(long, global = true, value_parser = poll_interval_seconds)]
    poll_interval: Option<Duration>,
    /// Give up after this many seconds of polling (default: wait indefinitely).
    #[arg(long, global = true, value_parser = max_wait_seconds)]
    max_wait: Option<Duration>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Generate an image from a prompt.
    Image(ImageArgs),
    /// Edit an uploaded image with a prompt.
    Edit(EditArgs),
    /// Describe an uploaded image.
    Analyze(AnalyzeArgs),
    /// Generate a video from a prompt and/or a starting image.
    Video(VideoArgs),
    /// Continue the most recent video.
    Continue(ContinueArgs),
    /// Download the most recent video again.
    Previous,
    /// Check or select the API key used for video generation.
    Key(KeyArgs),
    /// Chat through the OpenRouter gateway.
    Chat(ChatArgs),
    /// Generate an image through the OpenRouter gateway.
    OpenrouterImage(OpenRouterImageArgs),
    /// List models available on the OpenRouter gateway.
    OpenrouterModels,
}

#[derive(Debug, Args)]
struct ImageArgs {
    #[arg(long, default_value = "")]
    prompt: String,
    #[arg(long, default_value = "1:1")]
    aspect_ratio: ImageAspectRatio,
    #[arg(long)]
    model: Option<String>,
}

#[derive(Debug, Args)]
struct EditArgs {
    #[arg(long)]
    image: Option<PathBuf>,
    #[arg(long, default_value = "")]
    prompt: String,
    #[arg(long)]
    model: Option<String>,
}

#[derive(Debug, Args)]
struct AnalyzeArgs {
    #[arg(long)]
    image: Option<PathBuf>,
    #[arg(long)]
    model: Option<String>,
}

#[derive(Debug, Args)]
struct VideoArgs {
    #[arg(long, default_value = "")]
    prompt: String,
    #[arg(long)]
    image: Option<PathBuf>,
    #[arg(long, default_value = "16:9")]
    aspect_ratio: VideoAspectRatio,
    #[arg(long)]
    model: Option<String>,
}

#[derive(Debug, Args)]
struct ContinueArgs {
    #[arg(long, default_value = "")]
    prompt: String,
    #[arg(long)]
    model: Option<String>,
}

#[derive(Debug, Args)]
struct KeyArgs {
    /// Forget the current selection first.
    #[arg(long)]
    reset: bool,
}

#[derive(Debug, Args)]
struct ChatArgs {
    /// User message; repeat for several turns.
    #[arg(long = "message", required = true)]
    messages: Vec<String>,
    #[arg(long)]
    system: Option<String>,
    #[arg(long)]
    model: Option<String>,
}

#[derive(Debug, Args)]
struct OpenRouterImageArgs {
    #[arg(long)]
    prompt: String,
    #[arg(long)]
    model: Option<String>,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("atelier error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let config = session_config(&cli.session);
    let session = Session::open(&cli.session, config)?;
    match cli.command {
        Command::Image(args) => run_image(&session, args),
        Command::Edit(args) => run_edit(&session, args),
        Command::Analyze(args) => run_analyze(&session, args),
        Command::Video(args) => run_video(&session, args),
        Command::Continue(args) => run_continue(&session, args),
        Command::Previous => run_previous(&session),
        Command::Key(args) => run_key(&session, args),
        Command::Chat(args) => run_chat(&session, args),
        Command::OpenrouterImage(args) => run_openrouter_image(&session, args),
        Command::OpenrouterModels => run_openrouter_models(&session),
    }
}

fn session_config(args: &SessionArgs) -> StudioConfig {
    let mut config = StudioConfig::from_env();
    if let Some(base) = args.api_base.as_deref().map(str::trim).filter(|v| !v.is_empty()) {
        config.gemini_api_base = base.trim_end_matches('/').to_string();
    }
    if let Some(interval) = args.poll_interval {
        config.poll.interval = interval;
    }
    if let Some(max_wait) = args.max_wait {
        config.poll.max_wait = (!max_wait.is_zero()).then_some(max_wait);
    }
    config.poll = config.poll.bounded();
    config
}

fn seconds_in_range(raw: &str, min: Duration, max: Duration) -> Result<Duration, String> {
    let seconds: f64 = raw
        .trim()
        .parse()
        .map_err(|_| format!("'{raw}' is not a number of seconds"))?;
    let value = Duration::try_from_secs_f64(seconds)
        .map_err(|_| format!("'{raw}' is not a valid duration"))?;
    if value < min || value > max {
        return Err(format!(
            "expected between {} and {} seconds",
            min.as_secs_f64(),
            max.as_secs_f64()
        ));
    }
    Ok(value)
}

fn poll_interval_seconds(raw: &str) -> Result<Duration, String> {
    seconds_in_range(raw, MIN_POLL_INTERVAL, MAX_POLL_INTERVAL)
}

fn max_wait_seconds(raw: &str) -> Result<Duration, String> {
    seconds_in_range(raw, Duration::ZERO, MAX_POLL_WAIT)
}

struct Session {
    out: PathBuf,
    config: StudioConfig,
    events: EventWriter,
    transport: Arc<dyn Transport>,
    gate: Arc<CredentialGate>,
    continuation: Arc<ContinuationStore>,
}

impl Session {
    fn open(args: &SessionArgs, config: StudioConfig) -> Result<Self> {
        fs::create_dir_all(&args.out)
            .with_context(|| format!("failed to create {}", args.out.display()))?;
        let events_path = args
            .events
            .clone()
            .unwrap_or_else(|| args.out.join("events.jsonl"));
        let provider: Arc<dyn CredentialProvider> = match &args.api_key {
            Some(key) if !key.trim().is_empty() => {
                Arc::new(MemoryCredentialProvider::with_key(key.trim()))
            }
            _ => Arc::new(EnvCredentialProvider::default()),
        };
        Ok(Self {
            out: args.out.clone(),
            events: EventWriter::for_new_session(events_path),
            transport: Arc::new(ReqwestTransport::new(config.request_timeout)),
            gate: Arc::new(CredentialGate::new(provider)),
            continuation: Arc::new(ContinuationStore::persistent(
                args.out.join("continuation.json"),
            )),
            config,
        })
    }

    fn studio(&self, overrides: &[(Capability, Option<&str>)]) -> Result<Studio> {
        let selector = ModelSelector::default();
        let mut models = GenAiModels::default();
        for (capability, requested) in overrides {
            models.override_with(&selector, *capability, *requested)?;
        }
        let client = GenAiClient::new(
            self.transport.clone(),
            self.gate.clone(),
            self.config.gemini_api_base.clone(),
        )
        .with_models(models)
        .with_events(self.events.clone());
        let poller = OperationPoller::new(self.config.poll.clone()).with_events(self.events.clone());
        Ok(Studio::new(client, poller, self.gate.clone(), self.continuation.clone())
            .with_events(self.events.clone()))
    }

    fn openrouter(&self) -> OpenRouterClient {
        OpenRouterClient::from_config(self.transport.clone(), &self.config)
            .with_events(self.events.clone())
    }

    /// Shows the key gate when no key is selected; `false` if it stays closed.
    fn ensure_credential(&self) -> bool {
        if self.gate.check_credential() {
            return true;
        }
        eprintln!("An API key is required for video generation.");
        self.gate.select_credential()
    }
}

fn stamp() -> String {
    Utc::now().format("%Y%m%d-%H%M%S").to_string()
}

fn load_asset(path: Option<&Path>) -> Result<Option<MediaAsset>> {
    path.map(|path| encode_file(path).with_context(|| format!("failed to read {}", path.display())))
        .transpose()
}

fn write_data_url(out: &Path, stem: &str, data_url: &str) -> Result<PathBuf> {
    let (media_type, bytes) = decode_data_url(data_url)?;
    let path = out.join(format!("{stem}.{}", extension_for_media_type(&media_type)));
    fs::write(&path, bytes).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(path)
}

fn report(err: &FlowError) -> i32 {
    eprintln!("{}", err.message);
    if err.credential_reset {
        eprintln!("Run `atelier key` to select a key again.");
    }
    tracing::debug!(flow = err.flow.as_str(), error = ?err.error, "flow error detail");
    if err.error.is_validation() {
        2
    } else {
        1
    }
}

fn run_image(session: &Session, args: ImageArgs) -> Result<i32> {
    let studio = session.studio(&[(Capability::Image, args.model.as_deref())])?;
    match studio.generate_image(&args.prompt, args.aspect_ratio) {
        Ok(data_url) => {
            let path = write_data_url(&session.out, &format!("image-{}", stamp()), &data_url)?;
            println!("{}", path.display());
            Ok(0)
        }
        Err(err) => Ok(report(&err)),
    }
}

fn run_edit(session: &Session, args: EditArgs) -> Result<i32> {
    let studio = session.studio(&[(Capability::Edit, args.model.as_deref())])?;
    let image = load_asset(args.image.as_deref())?;
    match studio.edit_image(&args.prompt, image.as_ref()) {
        Ok(data_url) => {
            let path = write_data_url(&session.out, &format!("edit-{}", stamp()), &data_url)?;
            println!("{}", path.display());
            Ok(0)
        }
        Err(err) => Ok(report(&err)),
    }
}

fn run_analyze(session: &Session, args: AnalyzeArgs) -> Result<i32> {
    let studio = session.studio(&[(Capability::Analysis, args.model.as_deref())])?;
    let image = load_asset(args.image.as_deref())?;
    match studio.analyze_image(image.as_ref()) {
        Ok(text) => {
            println!("{text}");
            Ok(0)
        }
        Err(err) => Ok(report(&err)),
    }
}

fn cancel_on_interrupt() -> Result<CancelToken> {
    let cancel = CancelToken::new();
    let handler = cancel.clone();
    ctrlc::set_handler(move || {
        eprintln!("Cancelling; waiting for the current request to return...");
        handler.cancel();
    })
    .context("failed to install Ctrl+C handler")?;
    Ok(cancel)
}

fn finish_video(session: &Session, outcome: VideoOutcome) -> Result<i32> {
    let stem = format!("video-{}-{}", outcome.context.generation, stamp());
    let path = outcome.media.write_to(&session.out, &stem)?;
    println!("{}", path.display());
    println!("prompt: {}", outcome.context.prompt);
    Ok(0)
}

fn run_video(session: &Session, args: VideoArgs) -> Result<i32> {
    if !session.ensure_credential() {
        bail!("no API key selected; set GEMINI_API_KEY or pass --api-key");
    }
    let studio = session.studio(&[(Capability::Video, args.model.as_deref())])?;
    let request = VideoRequest {
        prompt: args.prompt,
        aspect_ratio: args.aspect_ratio,
        image: load_asset(args.image.as_deref())?,
    };
    let cancel = cancel_on_interrupt()?;
    eprintln!("Generating video; this can take several minutes...");
    match studio.generate_video(&request, &cancel) {
        Ok(outcome) => finish_video(session, outcome),
        Err(err) => Ok(report(&err)),
    }
}

fn run_continue(session: &Session, args: ContinueArgs) -> Result<i32> {
    if session.continuation.has_context() && !session.ensure_credential() {
        bail!("no API key selected; set GEMINI_API_KEY or pass --api-key");
    }
    let studio = session.studio(&[(Capability::VideoExtend, args.model.as_deref())])?;
    let cancel = cancel_on_interrupt()?;
    match studio.continue_video(&args.prompt, &cancel) {
        Ok(outcome) => finish_video(session, outcome),
        Err(err) => Ok(report(&err)),
    }
}

fn run_previous(session: &Session) -> Result<i32> {
    let studio = session.studio(&[])?;
    match studio.load_previous_video() {
        Ok(Some(media)) => {
            let generation = session
                .continuation
                .current()
                .map(|context| context.generation)
                .unwrap_or_default();
            print_resolved(session, &media, &format!("previous-{generation}"))
        }
        Ok(None) => {
            eprintln!("No previous video to continue. Please generate a video first.");
            Ok(2)
        }
        Err(err) => Ok(report(&err)),
    }
}

fn print_resolved(session: &Session, media: &ResolvedMedia, stem: &str) -> Result<i32> {
    let path = media.write_to(&session.out, stem)?;
    println!("{}", path.display());
    if let Some(context) = session.continuation.current() {
        println!("prompt: {}", context.prompt);
    }
    Ok(0)
}

fn run_key(session: &Session, args: KeyArgs) -> Result<i32> {
    if args.reset {
        session.gate.reset_credential();
    } else if session.gate.check_credential() {
        println!("API key selected.");
        return Ok(0);
    }
    if session.gate.select_credential() {
        println!("API key selected.");
        Ok(0)
    } else {
        eprintln!("No API key selected; set GEMINI_API_KEY or pass --api-key.");
        Ok(1)
    }
}

fn run_chat(session: &Session, args: ChatArgs) -> Result<i32> {
    let mut messages = Vec::new();
    if let Some(system) = args.system {
        messages.push(ChatMessage::system(system));
    }
    messages.extend(args.messages.into_iter().map(ChatMessage::user));
    let reply = session.openrouter().chat(&messages, args.model.as_deref())?;
    println!("{reply}");
    Ok(0)
}

fn run_openrouter_image(session: &Session, args: OpenRouterImageArgs) -> Result<i32> {
    let url = session
        .openrouter()
        .generate_image(&args.prompt, args.model.as_deref())?;
    println!("{url}");
    Ok(0)
}

fn run_openrouter_models(session: &Session) -> Result<i32> {
    let models = session.openrouter().list_models()?;
    println!("{}", serde_json::to_string_pretty(&models)?);
    Ok(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_parses_video_with_global_flags() -> Result<()> {
        let cli = Cli::try_parse_from([
            "atelier",
            "video",
            "--prompt",
            "a dog running",
            "--aspect-ratio",
            "9:16",
            "--out",
            "/tmp/atelier",
            "--max-wait",
            "600",
        ])?;
        assert_eq!(cli.session.out, PathBuf::from("/tmp/atelier"));
        let Command::Video(args) = cli.command else {
            bail!("expected video command");
        };
        assert_eq!(args.prompt, "a dog running");
        assert_eq!(args.aspect_ratio, VideoAspectRatio::Portrait);

        let config = session_config(&cli.session);
        assert_eq!(config.poll.max_wait, Some(Duration::from_secs(600)));
        Ok(())
    }

    #[test]
    fn poll_flags_outside_their_range_are_rejected() -> Result<()> {
        for (flag, value) in [
            ("--poll-interval", "1e30"),
            ("--poll-interval", "1e-12"),
            ("--poll-interval", "NaN"),
            ("--max-wait", "-5"),
            ("--max-wait", "inf"),
        ] {
            let parsed = Cli::try_parse_from(["atelier", "previous", flag, value]);
            assert!(parsed.is_err(), "{flag} {value} should be rejected");
        }

        let cli = Cli::try_parse_from([
            "atelier",
            "previous",
            "--poll-interval",
            "2.5",
            "--max-wait",
            "0",
        ])?;
        let config = session_config(&cli.session);
        assert_eq!(config.poll.interval, Duration::from_millis(2_500));
        assert_eq!(config.poll.max_wait, None);
        Ok(())
    }

    #[test]
    fn invalid_aspect_ratio_is_rejected_by_the_parser() {
        let parsed = Cli::try_parse_from(["atelier", "image", "--prompt", "x", "--aspect-ratio", "2:1"]);
        assert!(parsed.is_err());
    }

    #[test]
    fn data_urls_are_written_with_their_extension() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let asset = MediaAsset::from_bytes(b"jpeg", "image/jpeg");
        let path = write_data_url(temp.path(), "image-1", &asset.data_url())?;
        assert_eq!(path, temp.path().join("image-1.jpg"));
        assert_eq!(fs::read(path)?, b"jpeg");
        Ok(())
    }

    #[test]
    fn session_uses_out_dir_for_state() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let out = temp.path().join("run");
        let cli = Cli::try_parse_from([
            "atelier",
            "previous",
            "--out",
            out.to_str().unwrap_or_default(),
            "--api-key",
            "k",
        ])?;
        let session = Session::open(&cli.session, StudioConfig::default())?;
        assert!(out.is_dir());
        assert_eq!(session.events.path(), Some(out.join("events.jsonl").as_path()));
        assert_eq!(
            session.continuation.path(),
            Some(out.join("continuation.json").as_path())
        );
        assert_eq!(session.gate.active_key().as_deref(), Some("k"));
        assert_eq!(run_previous(&session)?, 2);
        Ok(())
    }
}
