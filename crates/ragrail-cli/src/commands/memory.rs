//! Chat memory commands

use crate::app::{MemoryAction, MemoryArgs, OutputFormat};
use anyhow::Result;
use ragrail_core::config::MemoryStoreKind;
use ragrail_core::memory::{store_from_config, SqliteChatMemoryStore};
use ragrail_core::{ChatMemoryStore, Config, RagRailError};

pub async fn run(args: MemoryArgs, config: &Config, format: OutputFormat) -> Result<()> {
    if config.memory.store == MemoryStoreKind::Memory {
        eprintln!("memory.store is 'memory'; conversations are not kept between runs");
    }

    // Compression only changes writes
    let mut memory = config.memory.clone();
    memory.compression = false;
    let store = store_from_config(&memory, None)?;

    match args.action {
        MemoryAction::Show { memory_id } => {
            let messages = store.get_messages(&memory_id).await?;
            if messages.is_empty() {
                return Err(RagRailError::MemoryNotFound(memory_id).into());
            }
            match format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&messages)?),
                OutputFormat::Cli => {
                    for message in messages {
                        println!("{:>9}: {}", message.role.to_string(), message.content);
                    }
                }
            }
        }
        MemoryAction::Clear { memory_id } => {
            store.delete_messages(&memory_id).await?;
            println!("Cleared memory '{}'", memory_id);
        }
        MemoryAction::List => {
            if config.memory.store != MemoryStoreKind::Sqlite {
                return Ok(());
            }
            let ids = SqliteChatMemoryStore::open(config.memory.sqlite_path())?
                .memory_ids()
                .await?;
            match format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&ids)?),
                OutputFormat::Cli => {
                    if ids.is_empty() {
                        println!("No conversations");
                    }
                    for id in ids {
                        println!("{}", id);
                    }
                }
            }
        }
    }
    Ok(())
}
