use console::style;

use operator_config::OperatorConfig;
use operator_core::Result;

use super::open_store;

pub(super) fn cmd_usage(config: &OperatorConfig, subject: Option<String>, limit: usize, json: bool) -> Result<()> {
    let store = open_store(config)?;
    if json {
        let records = store.recent_usage(subject.as_deref(), limit)?;
        println!("{}", serde_json::to_string_pretty(&records)?);
        return Ok(());
    }

    let totals = store.usage_by_model()?;
    if totals.is_empty() {
        println!("No usage recorded yet.");
        return Ok(());
    }
    println!("{}", style("Totals by model").bold());
    for (model, t) in &totals {
        println!(
            "  {model:<24} {:>6} calls {:>10} tokens  {:.6}",
            t.calls, t.total_tokens, t.cost
        );
    }

    let recent = store.recent_usage(subject.as_deref(), limit)?;
    println!("\n{}", style("Recent calls").bold());
    for r in &recent {
        println!(
            "  {} {:<24} {:>6}+{:<6} {:.6}  {}",
            style(r.recorded_at.format("%Y-%m-%d %H:%M:%S")).dim(),
            r.model,
            r.input_tokens,
            r.output_tokens,
            r.cost,
            r.subject.as_deref().unwrap_or("-")
        );
    }
    Ok(())
}
