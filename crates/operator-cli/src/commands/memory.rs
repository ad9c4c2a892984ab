use std::str::FromStr;

use console::style;

use operator_config::OperatorConfig;
use operator_core::{OperatorError, Result};
use operator_memory::{CoreMemoryUpdate, Dimension, SixDimensionMemory};

use super::{MemoryAction, open_store, truncate_output};

pub(super) async fn cmd_memory(config: &OperatorConfig, action: MemoryAction) -> Result<()> {
    let memory = SixDimensionMemory::new(open_store(config)?, config.memory.clone());
    match action {
        MemoryAction::Show {
            subject,
            query,
            dimensions,
            json,
        } => {
            let dimensions = parse_dimensions(&dimensions)?;
            let context = memory.build_context(&subject, &dimensions, &query).await;
            if json {
                println!("{}", serde_json::to_string_pretty(&context)?);
            } else if context.is_empty() {
                println!("No memory for {subject}.");
            } else {
                println!("{}", context.render());
            }
            if !context.degraded.is_empty() {
                let names: Vec<&str> = context.degraded.iter().map(Dimension::as_str).collect();
                eprintln!("{} {}", style("unavailable:").yellow(), names.join(", "));
            }
            Ok(())
        }
        MemoryAction::Core {
            subject,
            persona,
            human,
        } => {
            if persona.is_none() && human.is_none() {
                return Err(OperatorError::InvalidParameter(
                    "pass --persona and/or --human".into(),
                ));
            }
            let update = CoreMemoryUpdate {
                persona,
                human,
                ..Default::default()
            };
            let core = memory.write_core(&subject, update).await?;
            println!("Core memory for {} updated", style(&core.subject).bold());
            println!("  persona ({}/{}): {}", core.persona.chars().count(), core.persona_limit, core.persona);
            println!("  human   ({}/{}): {}", core.human.chars().count(), core.human_limit, core.human);
            Ok(())
        }
        MemoryAction::History { subject, limit } => {
            let events = memory.read_episodic(&subject, limit).await?;
            if events.is_empty() {
                println!("No episodic events for {subject}.");
            }
            for event in events.iter().rev() {
                println!(
                    "{} {:<16} {:<9} {}",
                    style(event.occurred_at.format("%Y-%m-%d %H:%M:%S")).dim(),
                    event.event_type,
                    event.actor,
                    truncate_output(&event.summary, 100)
                );
            }
            Ok(())
        }
    }
}

/// Named dimensions, or all six when none are given.
fn parse_dimensions(names: &[String]) -> Result<Vec<Dimension>> {
    if names.is_empty() {
        return Ok(Dimension::ALL.to_vec());
    }
    names.iter().map(|n| Dimension::from_str(n)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_dimensions() {
        assert_eq!(parse_dimensions(&[]).unwrap().len(), 6);
        assert_eq!(
            parse_dimensions(&["core".into(), "episodic".into()]).unwrap(),
            vec![Dimension::Core, Dimension::Episodic]
        );
        assert!(parse_dimensions(&["dreams".into()]).is_err());
    }
}
