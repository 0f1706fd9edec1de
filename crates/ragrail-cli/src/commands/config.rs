//! Configuration commands

use crate::app::{ConfigAction, ConfigArgs};
use anyhow::Result;
use ragrail_core::Config;
use std::path::Path;

const MASK: &str = "********";

pub fn run(args: ConfigArgs, config: &Config, explicit_path: Option<&Path>) -> Result<()> {
    match args.action {
        ConfigAction::Show => {
            let mut shown = config.clone();
            if shown.llm.api_key.is_some() {
                shown.llm.api_key = Some(MASK.to_string());
            }
            for model in shown.models.values_mut() {
                if model.api_key.is_some() {
                    model.api_key = Some(MASK.to_string());
                }
            }
            print!("{}", serde_yaml::to_string(&shown)?);
        }
        ConfigAction::Check => {
            config.validate()?;
            println!("Configuration is valid");
        }
        ConfigAction::Path => {
            let path = explicit_path
                .map(Path::to_path_buf)
                .unwrap_or_else(Config::default_path);
            println!("{}", path.display());
        }
    }
    Ok(())
}
