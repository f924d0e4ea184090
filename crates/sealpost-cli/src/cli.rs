//! CLI command definitions and argument parsing

use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};
use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use tracing::{debug, info};

use sealpost_core::sealpost_crypto::{
    Claims, EntityIdentifier, KeyPair, KeyStore, TokenHeader, UnverifiedToken,
};
use sealpost_core::{
    Clock, EnvelopeClient, EnvelopeConfig, EnvelopeError, EnvelopeContext, HttpKeyFetcher, InboundCheck,
    KeyFetcher, KeyRecord, ReqwestTransport, StaticKeySource, SystemClock,
};

use crate::ExitCode;

/// sealpost - signed and encrypted envelopes
#[derive(Parser, Debug)]
#[command(name = "sealpost")]
#[command(version, about = "sealpost - signed and encrypted envelopes")]
pub struct Cli {
    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Debug mode (key cache and verification tracing)
    #[arg(long, global = true)]
    pub debug: bool,

    /// Config file path
    #[arg(long, global = true, env = "SEALPOST_CONFIG")]
    pub config: Option<PathBuf>,

    /// Local identity, overriding the configured one (e.g. svc:<uuid>)
    #[arg(long = "as", global = true)]
    pub identity: Option<EntityIdentifier>,

    /// Key file, overriding the configured one
    #[arg(long, global = true)]
    pub key_file: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Generate a key pair and print its publishable key record
    Keygen(KeygenArgs),
    /// Encrypt a payload for a counterparty and sign it into a token
    Seal(SealArgs),
    /// Verify a token addressed to us and decrypt its payload
    Open(OpenArgs),
    /// Decode a token without verifying it
    Inspect(InspectArgs),
    /// Verify and classify a webhook delivery
    Webhook(WebhookArgs),
    /// Send a sealed request over HTTP and open the sealed response
    Call(CallArgs),
}

impl Cli {
    /// Execute the CLI command with a pre-loaded configuration.
    /// Flags given on the command line override config values.
    pub async fn execute(self, mut config: EnvelopeConfig) -> anyhow::Result<ExitCode> {
        if let Some(identity) = self.identity {
            config.local_identity = Some(identity);
        }
        if let Some(path) = self.key_file {
            config.key_path = path;
        }

        match self.command {
            Commands::Keygen(args) => args.execute(&config),
            Commands::Seal(args) => args.execute(&config).await,
            Commands::Open(args) => args.execute(&config).await,
            Commands::Inspect(args) => args.execute(),
            Commands::Webhook(args) => args.execute(&config).await,
            Commands::Call(args) => args.execute(&config).await,
        }
    }
}

// ============================================================================
// Shared helpers
// ============================================================================

/// Read `path`, or stdin when it is absent or `-`.
fn read_input(path: Option<&Path>) -> anyhow::Result<Vec<u8>> {
    match path {
        Some(p) if p != Path::new("-") => {
            std::fs::read(p).with_context(|| format!("reading {}", p.display()))
        }
        _ => {
            let mut buf = Vec::new();
            std::io::stdin()
                .read_to_end(&mut buf)
                .context("reading stdin")?;
            Ok(buf)
        }
    }
}

fn read_token(path: Option<&Path>) -> anyhow::Result<String> {
    let raw = read_input(path)?;
    let token = String::from_utf8(raw).context("token is not utf-8")?;
    Ok(token.trim().to_string())
}

/// Load a JSON array of key records, as printed by `keygen`.
fn read_key_records(path: &Path) -> anyhow::Result<Vec<KeyRecord>> {
    let content =
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let trimmed = content.trim_start();
    // A single record is accepted as well as a listing.
    if trimmed.starts_with('{') {
        let record: KeyRecord = serde_json::from_str(trimmed)
            .with_context(|| format!("parsing key record {}", path.display()))?;
        return Ok(vec![record]);
    }
    serde_json::from_str(trimmed).with_context(|| format!("parsing key records {}", path.display()))
}

/// Offline key source publishing `records` for `entity`.
async fn offline_keys(
    entity: EntityIdentifier,
    records: &Path,
) -> anyhow::Result<Arc<StaticKeySource>> {
    let source = Arc::new(StaticKeySource::new());
    for record in read_key_records(records)? {
        debug!(entity = %entity, key_id = %record.key_id, "publishing offline key");
        source.publish(entity, record).await;
    }
    Ok(source)
}

fn context_for(
    config: &EnvelopeConfig,
    fetcher: Arc<dyn KeyFetcher>,
) -> anyhow::Result<EnvelopeContext> {
    let identity = config.require_local_identity()?;
    let keys = KeyStore::load(&config.key_path)
        .with_context(|| format!("loading key file {}", config.key_path.display()))?;
    let ctx = EnvelopeContext::new(identity, Arc::new(keys), fetcher, Arc::new(SystemClock))
        .with_policy(config.claim_policy());
    Ok(match config.counterparty {
        Some(counterparty) => ctx.with_counterparty(counterparty),
        None => ctx,
    })
}

fn counterparty(
    explicit: Option<EntityIdentifier>,
    config: &EnvelopeConfig,
) -> anyhow::Result<EntityIdentifier> {
    explicit
        .or(config.counterparty)
        .context("no counterparty given and none configured")
}

fn write_output(bytes: &[u8]) -> anyhow::Result<()> {
    use std::io::Write;
    let mut stdout = std::io::stdout().lock();
    stdout.write_all(bytes)?;
    if !bytes.ends_with(b"\n") {
        stdout.write_all(b"\n")?;
    }
    Ok(())
}

// ============================================================================
// keygen
// ============================================================================

#[derive(Args, Debug)]
pub struct KeygenArgs {
    /// Where to write the private key file (defaults to the configured key path)
    #[arg(long)]
    pub out: Option<PathBuf>,

    /// Also write the public key record to this file
    #[arg(long)]
    pub public_out: Option<PathBuf>,

    /// Overwrite an existing key file
    #[arg(long)]
    pub force: bool,
}

impl KeygenArgs {
    pub fn execute(&self, config: &EnvelopeConfig) -> anyhow::Result<ExitCode> {
        let path = self.out.as_ref().unwrap_or(&config.key_path);
        if path.exists() && !self.force {
            bail!("{} already exists, use --force to overwrite", path.display());
        }

        let pair = KeyPair::generate();
        KeyStore::save(&pair, path)?;
        info!(key_id = %pair.key_id(), path = %path.display(), "generated key pair");

        let record = KeyRecord::from_bundle(&pair.public_bundle(), SystemClock.now_secs());
        let json = serde_json::to_string_pretty(&record)?;
        if let Some(public_out) = &self.public_out {
            std::fs::write(public_out, &json)
                .with_context(|| format!("writing {}", public_out.display()))?;
        }
        write_output(json.as_bytes())?;
        Ok(ExitCode::Success)
    }
}

// ============================================================================
// seal / open
// ============================================================================

#[derive(Args, Debug)]
pub struct SealArgs {
    /// Destination entity (defaults to the configured counterparty)
    #[arg(long)]
    pub to: Option<EntityIdentifier>,

    /// Key records of the destination, as printed by `keygen`
    #[arg(long)]
    pub recipient_keys: PathBuf,

    /// Token lifetime in seconds (defaults to the configured ttl)
    #[arg(long)]
    pub ttl: Option<u64>,

    /// Payload file, stdin when omitted
    #[arg(long = "in")]
    pub input: Option<PathBuf>,
}

impl SealArgs {
    pub async fn execute(&self, config: &EnvelopeConfig) -> anyhow::Result<ExitCode> {
        let destination = counterparty(self.to, config)?;
        let source = offline_keys(destination, &self.recipient_keys).await?;
        let ctx = context_for(config, source)?;

        let payload = read_input(self.input.as_deref())?;
        let envelope = ctx
            .outbound()
            .build(&payload, destination, self.ttl.unwrap_or(config.token_ttl_secs))
            .await?;
        write_output(envelope.compact_token().as_bytes())?;
        Ok(ExitCode::Success)
    }
}

#[derive(Args, Debug)]
pub struct OpenArgs {
    /// Expected issuer (defaults to the configured counterparty)
    #[arg(long)]
    pub from: Option<EntityIdentifier>,

    /// Key records of the issuer, as printed by `keygen`
    #[arg(long)]
    pub signer_keys: PathBuf,

    /// Token file, stdin when omitted
    #[arg(long = "in")]
    pub input: Option<PathBuf>,

    /// Detached body the token is bound to
    #[arg(long)]
    pub body: Option<PathBuf>,
}

impl OpenArgs {
    pub async fn execute(&self, config: &EnvelopeConfig) -> anyhow::Result<ExitCode> {
        let issuer = counterparty(self.from, config)?;
        let source = offline_keys(issuer, &self.signer_keys).await?;
        let ctx = context_for(config, source)?;

        let token = read_token(self.input.as_deref())?;
        let body = match &self.body {
            Some(p) => Some(
                std::fs::read_to_string(p).with_context(|| format!("reading {}", p.display()))?,
            ),
            None => None,
        };

        let mut check = InboundCheck::from_issuer(issuer);
        if let Some(body) = body.as_deref() {
            check = check.with_body(body.trim());
        }
        let opened = ctx.verifier().open(&token, check).await?;
        info!(issuer = %opened.claims.iss, key_id = %opened.key_id, "envelope opened");

        match opened.plaintext {
            Some(plaintext) => write_output(&plaintext)?,
            None => eprintln!("(envelope carries no content)"),
        }
        Ok(ExitCode::Success)
    }
}

// ============================================================================
// inspect
// ============================================================================

#[derive(Args, Debug)]
pub struct InspectArgs {
    /// Token file, stdin when omitted
    #[arg(long = "in")]
    pub input: Option<PathBuf>,
}

#[derive(Serialize)]
struct Inspection<'a> {
    verified: bool,
    header: &'a TokenHeader,
    claims: &'a Claims,
    issued_at: Option<String>,
    expires_at: Option<String>,
}

fn rfc3339(secs: u64) -> Option<String> {
    let secs = i64::try_from(secs).ok()?;
    DateTime::<Utc>::from_timestamp(secs, 0).map(|t| t.to_rfc3339())
}

impl InspectArgs {
    pub fn execute(&self) -> anyhow::Result<ExitCode> {
        let token = read_token(self.input.as_deref())?;
        let parsed = UnverifiedToken::parse(&token).context("decoding token")?;
        let report = Inspection {
            verified: false,
            header: parsed.header(),
            claims: parsed.claims(),
            issued_at: rfc3339(parsed.claims().iat),
            expires_at: rfc3339(parsed.claims().exp),
        };
        write_output(serde_json::to_string_pretty(&report)?.as_bytes())?;
        Ok(ExitCode::Success)
    }
}

// ============================================================================
// webhook
// ============================================================================

#[derive(Args, Debug)]
pub struct WebhookArgs {
    /// Expected issuer (defaults to the configured counterparty)
    #[arg(long)]
    pub from: Option<EntityIdentifier>,

    /// Key records of the issuer, as printed by `keygen`
    #[arg(long)]
    pub signer_keys: PathBuf,

    /// File holding the token header value
    #[arg(long)]
    pub token: PathBuf,

    /// Delivered body, stdin when omitted
    #[arg(long = "in")]
    pub input: Option<PathBuf>,

    /// Request method the webhook arrived with
    #[arg(long, requires = "path")]
    pub method: Option<String>,

    /// Request path the webhook arrived on
    #[arg(long, requires = "method")]
    pub path: Option<String>,
}

impl WebhookArgs {
    pub async fn execute(&self, config: &EnvelopeConfig) -> anyhow::Result<ExitCode> {
        let issuer = counterparty(self.from, config)?;
        let source = offline_keys(issuer, &self.signer_keys).await?;
        let ctx = context_for(config, source)?;

        let token = read_token(Some(&self.token))?;
        let body = String::from_utf8(read_input(self.input.as_deref())?)
            .context("webhook body is not utf-8")?;
        let headers = vec![(config.token_header.clone(), token)];

        let dispatcher = ctx
            .webhook_dispatcher()
            .with_token_header(config.token_header.as_str())
            .with_expected_issuer(issuer);
        let payload = dispatcher
            .dispatch(
                &headers,
                body.trim(),
                self.method.as_deref(),
                self.path.as_deref(),
            )
            .await?;

        match payload {
            Some(payload) => write_output(serde_json::to_string_pretty(&payload)?.as_bytes())?,
            None => eprintln!("(webhook carries no content)"),
        }
        Ok(ExitCode::Success)
    }
}

// ============================================================================
// call
// ============================================================================

#[derive(Args, Debug)]
pub struct CallArgs {
    /// HTTP method
    #[arg(long, default_value = "POST")]
    pub method: String,

    /// Request path relative to the configured base URL
    pub path: String,

    /// Destination entity (defaults to the configured counterparty)
    #[arg(long)]
    pub to: Option<EntityIdentifier>,

    /// Request payload file; no body is sent when omitted
    #[arg(long = "in")]
    pub input: Option<PathBuf>,

    /// Base URL, overriding the configured one
    #[arg(long)]
    pub base_url: Option<String>,
}

impl CallArgs {
    pub async fn execute(&self, config: &EnvelopeConfig) -> anyhow::Result<ExitCode> {
        let destination = counterparty(self.to, config)?;
        let base_url = self.base_url.as_deref().unwrap_or(&config.base_url);
        let transport = Arc::new(
            ReqwestTransport::new(base_url, config.request_timeout()).map_err(EnvelopeError::from)?,
        );
        let fetcher = Arc::new(HttpKeyFetcher::new(transport.clone(), config.keys_path.as_str()));
        let ctx = context_for(config, fetcher)?;

        let client = EnvelopeClient::new(
            ctx.outbound(),
            ctx.verifier(),
            transport,
            config.token_ttl_secs,
        )
        .with_token_header(config.token_header.as_str());

        let payload = match &self.input {
            Some(p) => Some(read_input(Some(p))?),
            None => None,
        };
        let reply = client
            .call(&self.method, &self.path, destination, payload.as_deref())
            .await?;

        match reply {
            Some(plaintext) => write_output(&plaintext)?,
            None => eprintln!("(response carries no content)"),
        }
        Ok(ExitCode::Success)
    }
}
