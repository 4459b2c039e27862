use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use keyvault_envelope::{
    never_cancelled, InMemoryBlobService, InMemoryKms, MasterKeyProvider, Result,
    RotationScenario, Settings,
};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Run the key rotation workflow against in-memory storage and key vaults.
#[derive(Debug, Parser)]
#[command(name = "envelope-demo", version)]
struct Cli {
    /// Settings file (PascalCase JSON). Missing files fall back to defaults.
    #[arg(long, default_value = "appsettings.json")]
    config: PathBuf,

    /// Payload to encrypt instead of the timestamped greeting.
    #[arg(long)]
    message: Option<String>,

    /// Log filter used when RUST_LOG is unset.
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level)),
        )
        .init();

    if let Err(e) = run(cli).await {
        error!(error = %e, "rotation scenario failed");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let settings = Settings::load(Some(cli.config.as_path()))?;
    info!(
        vault = %settings.vault_name,
        backup_vault = %settings.vault_name_backup,
        key = %settings.key_name,
        "loaded settings"
    );

    let kms = Arc::new(InMemoryKms::new());
    let provider = MasterKeyProvider::new(kms.clone());

    // The backup vault is restored from the primary one, so both hold the same key material.
    provider
        .get_or_create(&settings.vault(), &settings.key_name, settings.key_spec)
        .await?;
    kms.replicate_key(&settings.vault(), &settings.backup_vault(), &settings.key_name)?;

    let blobs = InMemoryBlobService::new();
    let primary = blobs.account(&settings.storage_account);
    let backup = blobs.account(&settings.storage_account_backup);

    let scenario = RotationScenario::new(settings, provider, Arc::new(primary), Arc::new(backup));
    let report = scenario.run(cli.message, &never_cancelled()).await?;

    info!(
        source = %report.source,
        bytes = report.plaintext.len(),
        key = %report.metadata.wrapped_content_key.key_id,
        copies = report.verified.len(),
        "done, all copies match"
    );
    Ok(())
}
