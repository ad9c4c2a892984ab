use operator_config::OperatorConfig;
use operator_core::Result;
use operator_runtime::ToolSelector;

pub(super) fn cmd_select(
    config: &OperatorConfig,
    query: &str,
    role: &str,
    max_tools: Option<usize>,
    explain: bool,
    json: bool,
) -> Result<()> {
    let selector = ToolSelector::new(config.selector.clone());
    let max_tools = max_tools.unwrap_or(config.selector.max_tools);

    if explain {
        let mut explanation = selector.explain(query, role);
        explanation.selected.truncate(max_tools);
        if json {
            println!("{}", serde_json::to_string_pretty(&explanation)?);
        } else {
            println!("{explanation}");
        }
        return Ok(());
    }

    let tools = selector.select(query, role, max_tools);
    if json {
        println!("{}", serde_json::to_string(&tools)?);
    } else {
        for (i, tool) in tools.iter().enumerate() {
            println!("{}. {tool}", i + 1);
        }
    }
    Ok(())
}
