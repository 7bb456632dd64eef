//! Dynamis security tooling: operator CLI for permission checks, sensitive
//! record encryption, key status, and bearer tokens.

use anyhow::Context;
use clap::{Parser, Subcommand};
use dynamis_core::config::AppConfig;
use dynamis_core::{EncryptionContext, Record};
use dynamis_platform::audit::{AuditService, SecurityEvent, TracingLogService};
use dynamis_platform::guard::verify_claims;
use dynamis_platform::kms::resolve_application_key;
use dynamis_platform::{
    FieldEncryptor, KeyAdministration, LocalKeyProvider, PermissionTable, Role, TokenVerifier,
};
use std::collections::BTreeMap;
use std::io::Read;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{info, warn};

const LOCAL_KEY_ID: &str = "dynamis-local";

#[derive(Parser, Debug)]
#[command(name = "dynamis")]
#[command(about = "Permission checks and field-level encryption for the Dynamis backend")]
#[command(version)]
struct Cli {
    /// Base64 key material for the local key provider (overrides config)
    #[arg(long, env = "DYNAMIS__ENCRYPTION__KEY_MATERIAL", hide_env_values = true)]
    key_material: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Check whether a role holds every listed permission
    Check {
        #[arg(long)]
        role: String,
        #[arg(long = "permission")]
        permissions: Vec<String>,
    },
    /// List the permissions granted to a role
    Permissions {
        #[arg(long)]
        role: String,
    },
    /// Encrypt the sensitive fields of a JSON record (reads stdin when --record is omitted)
    Encrypt {
        #[arg(long)]
        category: String,
        #[arg(long)]
        record: Option<String>,
    },
    /// Decrypt the sensitive fields of a JSON record (reads stdin when --record is omitted)
    Decrypt {
        #[arg(long)]
        category: String,
        #[arg(long)]
        record: Option<String>,
    },
    /// Show the status of the field-encryption key
    KeyStatus,
    /// Sign an access token with the configured JWT secret
    IssueToken {
        #[arg(long)]
        subject: String,
        #[arg(long = "permission")]
        permissions: Vec<String>,
    },
    /// Verify a bearer token and check it grants every listed permission
    VerifyToken {
        #[arg(long)]
        token: String,
        #[arg(long = "permission")]
        permissions: Vec<String>,
    },
}

fn main() -> anyhow::Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "dynamis=info,audit=info".into()),
        )
        .json()
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = AppConfig::load().unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load config, using defaults");
        AppConfig::default()
    });
    if let Some(material) = cli.key_material {
        config.encryption.key_material = Some(material);
    }

    let table = PermissionTable::standard();

    match cli.command {
        Command::Check { role, permissions } => {
            let allowed = table.has_permission(&role, permissions.as_slice())?;
            print_json(&serde_json::json!({
                "role": role,
                "required": permissions,
                "allowed": allowed,
            }))?;
            Ok(if allowed {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        Command::Permissions { role } => {
            let role: Role = role.parse()?;
            let granted = table.permissions_for(role)?;
            print_json(&serde_json::json!({ "role": role, "permissions": granted }))?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Encrypt { category, record } => {
            let (_, encryptor) = build_encryptor(&config)?;
            let audit = audit_service(&config);
            let input = read_record(record)?;
            let output = encryptor.encrypt_record(&category, &input)?;
            audit.log_security_event(
                &SecurityEvent::new("field_encryption", "encrypt_record", category),
            )?;
            print_json(&serde_json::Value::Object(output))?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Decrypt { category, record } => {
            let (_, encryptor) = build_encryptor(&config)?;
            let audit = audit_service(&config);
            let input = read_record(record)?;
            let output = encryptor.decrypt_record(&category, &input)?;
            audit.log_security_event(
                &SecurityEvent::new("field_encryption", "decrypt_record", category),
            )?;
            print_json(&serde_json::Value::Object(output))?;
            Ok(ExitCode::SUCCESS)
        }
        Command::KeyStatus => {
            let (provider, encryptor) = build_encryptor(&config)?;
            let status = provider.describe_key(encryptor.key_id())?;
            print_json(&serde_json::to_value(status)?)?;
            Ok(ExitCode::SUCCESS)
        }
        Command::IssueToken { subject, permissions } => {
            let verifier = TokenVerifier::new(&config.jwt)?;
            let token = verifier.issue(&subject, &permissions)?;
            print_json(&serde_json::json!({ "access_token": token, "token_type": "bearer" }))?;
            Ok(ExitCode::SUCCESS)
        }
        Command::VerifyToken { token, permissions } => {
            let verifier = TokenVerifier::new(&config.jwt)?;
            let claims = verifier.verify(&token)?;
            let allowed = verify_claims(claims.permissions.as_slice(), permissions.as_slice());
            print_json(&serde_json::json!({
                "sub": claims.sub,
                "required": permissions,
                "allowed": allowed,
            }))?;
            Ok(if allowed {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
    }
}

/// Set up the local key provider from configured key material, or an
/// ephemeral key tagged for the application when none is configured.
fn build_encryptor(config: &AppConfig) -> anyhow::Result<(Arc<LocalKeyProvider>, FieldEncryptor)> {
    let provider = Arc::new(LocalKeyProvider::new());
    let context = EncryptionContext::from(config.encryption.context.clone());
    let environment = context.get("environment").unwrap_or("production").to_string();

    let key_id = match &config.encryption.key_material {
        Some(material) => {
            let key_id = config
                .encryption
                .key_id
                .clone()
                .unwrap_or_else(|| LOCAL_KEY_ID.to_string());
            let tags = BTreeMap::from([
                ("Application".to_string(), config.project_name.clone()),
                ("Environment".to_string(), environment),
            ]);
            provider
                .import_key(&key_id, material, tags)
                .context("loading configured key material")?;
            key_id
        }
        None => {
            warn!("No key material configured; using an ephemeral key for this process");
            resolve_application_key(provider.as_ref(), &config.project_name, &environment)?
        }
    };

    info!(
        key_id = %key_id,
        algorithm = %config.encryption.algorithm,
        rotation_days = config.encryption.key_rotation_period_days,
        "Field encryptor ready"
    );
    let encryptor = FieldEncryptor::new(provider.clone(), key_id, context);
    Ok((provider, encryptor))
}

fn audit_service(config: &AppConfig) -> AuditService {
    AuditService::new(
        Arc::new(TracingLogService),
        config.audit.clone(),
        config.gdpr.clone(),
    )
}

fn read_record(arg: Option<String>) -> anyhow::Result<Record> {
    let raw = match arg {
        Some(raw) => raw,
        None => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("reading record from stdin")?;
            buf
        }
    };
    match serde_json::from_str::<serde_json::Value>(&raw).context("record is not valid JSON")? {
        serde_json::Value::Object(map) => Ok(map),
        other => anyhow::bail!("record must be a JSON object, got {other}"),
    }
}

fn print_json(value: &serde_json::Value) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
