//! Operator tool for the media staging cache.
//!
//! - `fetch`: stage one object through a cache manager and print its path
//! - `encrypt`: encrypt a file for recipients, print the key registration
//! - `decrypt`: decrypt a local file with explicit key material

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};

use media_staging::crypto::utils::hex_to_bytes;
use media_staging::crypto::{decrypt_stream, encrypt_stream, CipherFormat, KeyMaterial, RecipientKey};
use media_staging::{AwaitOutcome, CacheManager, RequestOptions, StagingConfig, StagingError};

#[derive(Parser, Debug)]
#[command(name = "media-staging", version, about = "Encrypted media staging cache")]
struct Cli {
    /// Staging root (overrides MEDIA_STAGING_ROOT)
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    /// Content store base URL (overrides MEDIA_STORE_URL)
    #[arg(long, global = true)]
    store_url: Option<String>,

    /// Accept self-signed store certificates
    #[arg(long, global = true)]
    insecure: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fetch an object into the cache and print the cached path
    Fetch {
        id: String,
        #[command(flatten)]
        key: KeyArgs,
        /// Store plaintext instead of ciphertext
        #[arg(long)]
        decrypt: bool,
        #[arg(long)]
        mimetype: Option<String>,
        /// Fetch budget in seconds
        #[arg(long)]
        timeout: Option<u64>,
    },
    /// Encrypt a file for one or more recipients
    Encrypt {
        input: PathBuf,
        output: PathBuf,
        /// Hex-encoded uncompressed secp256k1 public key (repeatable)
        #[arg(long = "recipient", required = true)]
        recipients: Vec<String>,
        #[arg(long, default_value = "chacha20-poly1305")]
        format: CipherFormat,
        /// Key service domain for the printed registration
        #[arg(long, default_value = "media")]
        domain: String,
    },
    /// Decrypt a local file
    Decrypt {
        input: PathBuf,
        output: PathBuf,
        #[command(flatten)]
        key: KeyArgs,
    },
}

/// Key material as delivered by the key service (base64, optional `m` prefix).
#[derive(Args, Debug)]
struct KeyArgs {
    #[arg(long)]
    key: Option<String>,
    #[arg(long)]
    nonce: Option<String>,
    #[arg(long)]
    tag: Option<String>,
    #[arg(long, default_value = "chacha20-poly1305")]
    format: CipherFormat,
}

impl KeyArgs {
    fn material(&self) -> Result<Option<KeyMaterial>, StagingError> {
        let (Some(key), Some(nonce)) = (&self.key, &self.nonce) else {
            return Ok(None);
        };
        KeyMaterial::from_encoded(key, nonce, self.tag.as_deref(), self.format)
            .map(Some)
            .map_err(|e| StagingError::Cipher(e.to_string()))
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    env_logger::init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{}", e);
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), StagingError> {
    let mut config = StagingConfig::from_env();
    if let Some(root) = cli.root {
        config.root = root;
    }
    if let Some(url) = cli.store_url {
        config.store_url = url.trim_end_matches('/').to_string();
    }
    config.fetch.accept_invalid_certs = cli.insecure;

    match cli.command {
        Command::Fetch {
            id,
            key,
            decrypt,
            mimetype,
            timeout,
        } => {
            let opts = RequestOptions {
                decrypt,
                mimetype,
                timeout: timeout.map(Duration::from_secs),
            };
            fetch(&config, &id, key.material()?, opts).await
        }
        Command::Encrypt {
            input,
            output,
            recipients,
            format,
            domain,
        } => encrypt(&input, &output, &recipients, format, &domain).await,
        Command::Decrypt { input, output, key } => {
            let key = key
                .material()?
                .ok_or_else(|| StagingError::MissingKey(input.display().to_string()))?;
            decrypt(&input, &output, &key).await
        }
    }
}

async fn fetch(
    config: &StagingConfig,
    id: &str,
    key: Option<KeyMaterial>,
    opts: RequestOptions,
) -> Result<(), StagingError> {
    let cache = CacheManager::start(config).await?;
    let outcome = cache.fetch(id, key, opts).await;
    cache.shutdown().await;

    match outcome? {
        AwaitOutcome::Ready(entry) => {
            if let Some(path) = entry.path {
                println!("{}", path.display());
            }
            Ok(())
        }
        AwaitOutcome::TimedOut => Err(StagingError::Fetch {
            id: id.to_string(),
            status: None,
            message: "not available within the fetch budget".to_string(),
        }),
    }
}

async fn encrypt(
    input: &Path,
    output: &Path,
    recipients: &[String],
    format: CipherFormat,
    domain: &str,
) -> Result<(), StagingError> {
    let recipients = recipients
        .iter()
        .map(|hex| {
            let public_key =
                hex_to_bytes(hex).map_err(|e| StagingError::Cipher(format!("{}: {}", hex, e)))?;
            RecipientKey::from_public_key(public_key)
                .map_err(|e| StagingError::Cipher(format!("{}: {}", hex, e)))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let mut reader = tokio::fs::File::open(input)
        .await
        .map_err(|e| StagingError::io(input, &e))?;
    let mut writer = tokio::fs::File::create(output)
        .await
        .map_err(|e| StagingError::io(output, &e))?;
    let result = match encrypt_stream(&mut reader, &mut writer, &recipients, format).await {
        Ok(result) => result,
        Err(e) => {
            let _ = tokio::fs::remove_file(output).await;
            return Err(StagingError::Cipher(e.to_string()));
        }
    };

    let registration = result.registration(domain, Default::default());
    match serde_json::to_string_pretty(&registration) {
        Ok(json) => println!("{}", json),
        Err(e) => log::warn!("Could not serialize key registration: {}", e),
    }
    Ok(())
}

async fn decrypt(input: &Path, output: &Path, key: &KeyMaterial) -> Result<(), StagingError> {
    let id = input.display().to_string();
    let mut reader = tokio::fs::File::open(input)
        .await
        .map_err(|e| StagingError::io(input, &e))?;
    let mut writer = tokio::fs::File::create(output)
        .await
        .map_err(|e| StagingError::io(output, &e))?;

    match decrypt_stream(&mut reader, &mut writer, key).await {
        Ok(size) => {
            log::info!("Decrypted {} bytes to {}", size, output.display());
            Ok(())
        }
        Err(e) => {
            // Unauthenticated plaintext must not survive.
            let _ = tokio::fs::remove_file(output).await;
            Err(StagingError::from_cipher(&id, e))
        }
    }
}
