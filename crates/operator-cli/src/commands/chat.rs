use std::io::Write;

use console::style;
use tokio::io::AsyncBufReadExt;

use operator_config::OperatorConfig;
use operator_core::Result;
use operator_llm::{ChatResponse, StreamEvent};
use operator_runtime::{AiOperator, OrganizationSnapshot, PromptMode, TurnRequest};

use super::{Services, truncate_output};

pub(super) struct ChatOptions {
    pub subject: String,
    pub role: String,
    pub organization_id: Option<String>,
    pub organization_name: Option<String>,
    pub model: Option<String>,
    pub stream: bool,
    pub mode: PromptMode,
}

impl ChatOptions {
    fn organization(&self) -> OrganizationSnapshot {
        let id = self.organization_id.clone().unwrap_or_default();
        let name = self.organization_name.clone().unwrap_or_else(|| id.clone());
        OrganizationSnapshot::new(id, name)
    }

    fn turn(&self, message: &str) -> TurnRequest {
        TurnRequest {
            subject: self.subject.clone(),
            role: self.role.clone(),
            message: message.to_string(),
            organization_id: self.organization_id.clone(),
            stream: self.stream,
            model_override: self.model.clone(),
            mode: self.mode,
            ..Default::default()
        }
    }
}

pub(super) async fn cmd_chat(config: &OperatorConfig, message: Option<String>, opts: ChatOptions) -> Result<()> {
    let services = Services::open(config).await?;
    let operator = services.operator(config, opts.organization());

    let result = match message {
        Some(message) => run_turn(&operator, &opts, &message).await,
        None => interactive(&operator, &opts).await,
    };
    services.shutdown().await;
    result
}

async fn interactive(operator: &AiOperator, opts: &ChatOptions) -> Result<()> {
    println!("{}", style("Operator interactive chat").bold());
    println!("   subject {} / role {}", opts.subject, opts.role);
    println!("   Type 'exit' or Ctrl+C to quit");
    println!();

    let stdin = tokio::io::stdin();
    let mut lines = tokio::io::BufReader::new(stdin).lines();
    loop {
        eprint!("{} ", style("you>").cyan());
        std::io::stderr().flush().ok();

        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) | Err(_) => break,
        };
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if matches!(trimmed, "exit" | "quit" | "/exit") {
            break;
        }
        if let Err(e) = run_turn(operator, opts, trimmed).await {
            eprintln!("{} {e}", style("error:").red());
        }
        println!();
    }
    Ok(())
}

async fn run_turn(operator: &AiOperator, opts: &ChatOptions, message: &str) -> Result<()> {
    let outcome = operator.handle_turn(opts.turn(message)).await?;
    eprintln!(
        "{}",
        style(format!(
            "   tools: {}{}",
            outcome.tools_offered.join(", "),
            if outcome.prompt_cached { " (cached prompt)" } else { "" }
        ))
        .dim()
    );

    if let Some(response) = outcome.response {
        print_response(&response);
    } else if let Some(mut stream) = outcome.stream {
        eprint!("{} ", style("operator>").green());
        while let Some(event) = stream.next().await {
            match event {
                StreamEvent::Delta(text) => {
                    print!("{text}");
                    std::io::stdout().flush().ok();
                }
                StreamEvent::ToolCall(call) => {
                    eprintln!(
                        "\n{}",
                        style(format!(
                            "   tool call: {} {}",
                            call.tool_name,
                            truncate_output(&call.arguments.to_string(), 200)
                        ))
                        .yellow()
                    );
                }
                StreamEvent::Done { usage, .. } => {
                    println!();
                    if let Some(u) = usage {
                        eprintln!(
                            "{}",
                            style(format!("   [{} in / {} out]", u.prompt_tokens, u.completion_tokens)).dim()
                        );
                    }
                }
                StreamEvent::Error(reason) => {
                    println!();
                    eprintln!("{} {reason}", style("stream failed:").red());
                }
            }
        }
    }
    Ok(())
}

fn print_response(response: &ChatResponse) {
    eprint!("{} ", style("operator>").green());
    println!("{}", response.content);
    for call in &response.tool_calls {
        eprintln!(
            "{}",
            style(format!(
                "   tool call: {} {}",
                call.tool_name,
                truncate_output(&call.arguments.to_string(), 200)
            ))
            .yellow()
        );
    }
    if let Some(u) = response.usage {
        eprintln!(
            "{}",
            style(format!(
                "   [{}/{}: {} in / {} out]",
                response.provider, response.model, u.prompt_tokens, u.completion_tokens
            ))
            .dim()
        );
    }
}
