use std::path::Path;

use console::style;
use serde::Deserialize;

use operator_config::OperatorConfig;
use operator_core::{ModelConfig, ModelType, OperatorError, Result};

use super::{ModelAction, open_store, truncate_output};

/// Import file layout: a list of `[[models]]` tables.
#[derive(Debug, Deserialize)]
struct ModelFile {
    #[serde(default)]
    models: Vec<ModelConfig>,
}

pub(super) async fn cmd_models(config: &OperatorConfig, action: ModelAction) -> Result<()> {
    let store = open_store(config)?;
    match action {
        ModelAction::List {
            all,
            model_type,
            json,
        } => {
            let filter = model_type.map(|t| t.parse::<ModelType>()).transpose()?;
            let rows = if all {
                store.all_model_configs()?
            } else {
                store.active_model_configs()?
            };
            let rows: Vec<ModelConfig> = rows
                .into_iter()
                .filter(|m| filter.is_none_or(|t| m.model_type == t))
                .map(|mut m| {
                    m.api_key = Some(m.masked_key());
                    m
                })
                .collect();
            if json {
                println!("{}", serde_json::to_string_pretty(&rows)?);
            } else {
                print_models(&rows);
            }
            Ok(())
        }
        ModelAction::Import { file } => {
            let models = read_model_file(&file)?;
            for model in &models {
                store.upsert_model_config(model)?;
                let default = if model.is_default { " (default)" } else { "" };
                println!(
                    "  {} {} [{} / {}]{default}",
                    style("saved").green(),
                    model.name,
                    model.provider,
                    model.model_type
                );
            }
            println!("Imported {} model(s) from {}", models.len(), file.display());
            Ok(())
        }
        ModelAction::SetDefault { name } => {
            let model = store.set_default(&name)?;
            println!("{} is now the default {} model", style(&model.name).bold(), model.model_type);
            Ok(())
        }
        ModelAction::Remove { name } => {
            if store.soft_delete_model(&name)? {
                println!("Removed {name}");
                Ok(())
            } else {
                Err(OperatorError::NotFound(format!("model '{name}'")))
            }
        }
    }
}

fn read_model_file(path: &Path) -> Result<Vec<ModelConfig>> {
    let raw = std::fs::read_to_string(path)?;
    let file: ModelFile = toml::from_str(&raw)
        .map_err(|e| OperatorError::InvalidParameter(format!("invalid model file {}: {e}", path.display())))?;
    if file.models.is_empty() {
        return Err(OperatorError::InvalidParameter(format!(
            "{} contains no [[models]] entries",
            path.display()
        )));
    }
    Ok(file.models)
}

fn print_models(rows: &[ModelConfig]) {
    if rows.is_empty() {
        println!("No models configured. Import some with `operator models import <file>`.");
        return;
    }
    println!(
        "{}",
        style(format!(
            "{:<24} {:<10} {:<11} {:<9} {:<8} {}",
            "NAME", "PROVIDER", "TYPE", "STATUS", "DEFAULT", "ENDPOINT"
        ))
        .bold()
    );
    for m in rows {
        let default = if m.is_default { "yes" } else { "" };
        println!(
            "{:<24} {:<10} {:<11} {:<9} {:<8} {}",
            m.name,
            m.provider,
            m.model_type.as_str(),
            m.status.as_str(),
            default,
            truncate_output(&m.endpoint_url, 48)
        );
    }
}
