use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use fieldstore::profile::{standard_entity_types, standard_provision};
use fieldstore::{FieldSettings, FieldSystem, SnapshotManager, Store};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "fieldstore")]
#[command(about = "Maintenance tooling for fieldstore snapshots")]
struct Cli {
    /// Snapshot file holding configuration, state and tables.
    #[arg(long, default_value = "fieldstore.snapshot")]
    snapshot: PathBuf,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Installs the standard profile into the snapshot.
    Install,
    /// Runs periodic maintenance, including one purge batch.
    Cron,
    /// Purges one batch of deleted field data.
    Purge {
        #[arg(long)]
        batch_size: Option<usize>,
    },
    /// Lists configurable fields per entity type.
    Fields,
    /// Lists deleted fields and storages awaiting purge.
    Deleted,
    /// Shows whether a module can be uninstalled.
    Info {
        #[arg(long)]
        module: String,
    },
    /// Updates field settings.
    Settings {
        #[arg(long)]
        purge_batch_size: Option<usize>,
    },
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();
    let snapshots = SnapshotManager::new(&cli.snapshot);
    let system = open_system(&snapshots)?;

    match cli.command {
        Command::Install => {
            system.install_module(&standard_provision())?;
            println!("Installed the standard profile");
        }
        Command::Cron => system.cron(),
        Command::Purge { batch_size } => {
            let batch_size = match batch_size {
                Some(size) => size,
                None => system.settings()?.purge_batch_size,
            };
            let report = system.purge_batch(batch_size)?;
            println!(
                "Purged {} entities, {} fields, {} storages",
                report.entities_purged,
                report.fields_purged.len(),
                report.storages_purged.len()
            );
        }
        Command::Fields => {
            for (entity_type, fields) in system.field_manager().field_map()? {
                for (field_name, entry) in fields {
                    let bundles: Vec<&str> = entry.bundles.iter().map(String::as_str).collect();
                    println!(
                        "{}.{} ({}): {}",
                        entity_type,
                        field_name,
                        entry.field_type,
                        bundles.join(", ")
                    );
                }
            }
        }
        Command::Deleted => {
            let repository = system.field_config_repository();
            for (uuid, entry) in repository.deleted_fields()? {
                println!(
                    "field {} {}.{}.{} deleted {} ({} purged)",
                    uuid,
                    entry.field.entity_type,
                    entry.field.bundle,
                    entry.field.field_name,
                    entry.deleted_at.to_rfc3339(),
                    entry.cursor.purged_entities
                );
            }
            for (uuid, entry) in repository.deleted_storages()? {
                println!(
                    "storage {} {} deleted {}",
                    uuid,
                    entry.field_storage.id(),
                    entry.deleted_at.to_rfc3339()
                );
            }
            return Ok(());
        }
        Command::Info { module } => {
            let info = system.module_info(&module)?;
            println!(
                "{}: {}",
                info.name,
                if info.required { "required" } else { "not required" }
            );
            if let Some(explanation) = &info.explanation {
                println!("  {}", explanation);
            }
            for line in &info.details {
                println!("  {}", line);
            }
            return Ok(());
        }
        Command::Settings { purge_batch_size } => {
            let mut settings = system.settings()?;
            if let Some(size) = purge_batch_size {
                settings = settings.purge_batch_size(size);
            }
            settings.validate()?;
            system.save_settings(&settings)?;
            println!("{}", serde_json::to_string_pretty(&settings)?);
        }
    }

    snapshots
        .save(&system.snapshot()?)
        .with_context(|| format!("Failed to write snapshot '{}'", cli.snapshot.display()))?;
    Ok(())
}

fn open_system(snapshots: &SnapshotManager) -> Result<FieldSystem> {
    let store = match snapshots
        .load()
        .with_context(|| format!("Failed to read snapshot '{}'", snapshots.path().display()))?
    {
        Some(snapshot) => Store::from_snapshot(snapshot)?,
        None => {
            log::info!("no snapshot at {}, starting empty", snapshots.path().display());
            Store::in_memory()
        }
    };
    let mut builder = FieldSystem::builder()
        .store(store)
        .entity_types(standard_entity_types());
    if !snapshots.exists() {
        builder = builder.settings(FieldSettings::new());
    }
    builder
        .build()
        .map_err(|err| anyhow!("Failed to assemble field system: {}", err))
}
