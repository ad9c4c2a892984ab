use std::path::Path;

use console::style;

use operator_config::OperatorConfig;
use operator_core::{OperatorError, Result};
use operator_llm::{ImageRequest, SpeechRequest, TranscriptionRequest, VideoRequest, VideoResponse};
use operator_runtime::{AiOperator, OrganizationSnapshot};

use super::Services;

pub(super) struct VideoOptions {
    pub subject: String,
    pub image_url: Option<String>,
    pub duration_secs: Option<u32>,
    pub ratio: Option<String>,
    pub model: Option<String>,
}

/// Generated media is kept as resources of `subject`.
pub(super) async fn cmd_image(
    config: &OperatorConfig,
    subject: &str,
    request: ImageRequest,
) -> Result<()> {
    let services = Services::open(config).await?;
    let operator = services.operator(config, OrganizationSnapshot::new("", ""));
    let result = operator.generate_image(subject, &request).await;
    services.shutdown().await;
    let response = result?;
    println!(
        "{}",
        style(format!("{}/{} at {}", response.provider, response.model, response.size)).dim()
    );
    for image in &response.images {
        match (&image.url, &image.b64_json) {
            (Some(url), _) => println!("{url}"),
            (None, Some(b64)) => println!("(base64, {} bytes)", b64.len()),
            (None, None) => println!("(empty image)"),
        }
    }
    Ok(())
}

pub(super) async fn cmd_video(
    config: &OperatorConfig,
    prompt: Option<String>,
    task: Option<String>,
    opts: VideoOptions,
) -> Result<()> {
    if prompt.is_none() && task.is_none() {
        return Err(OperatorError::InvalidParameter(
            "give a prompt to submit or --task to poll".into(),
        ));
    }
    let services = Services::open(config).await?;
    let operator = services.operator(config, OrganizationSnapshot::new("", ""));
    let result = run_video(&operator, prompt, task, opts).await;
    services.shutdown().await;
    let response = result?;

    println!("task:   {}", response.task_id);
    println!("status: {:?}", response.status);
    if let Some(url) = &response.video_url {
        println!("video:  {url}");
    } else if !response.status.is_finished() {
        println!(
            "{}",
            style(format!("poll with: operator video --task {}", response.task_id)).dim()
        );
    }
    Ok(())
}

async fn run_video(
    operator: &AiOperator,
    prompt: Option<String>,
    task: Option<String>,
    opts: VideoOptions,
) -> Result<VideoResponse> {
    if let Some(task_id) = task {
        return operator
            .video_status(&opts.subject, &task_id, opts.model.as_deref())
            .await;
    }
    let request = VideoRequest {
        image_url: opts.image_url,
        duration_secs: opts.duration_secs,
        ratio: opts.ratio,
        model: opts.model,
        ..VideoRequest::new(prompt.unwrap_or_default())
    };
    operator.generate_video(&opts.subject, &request).await
}

pub(super) async fn cmd_speak(config: &OperatorConfig, request: SpeechRequest, output: &Path) -> Result<()> {
    let services = Services::open(config).await?;
    let result = services.bridge.text_to_speech(&request).await;
    services.shutdown().await;
    let speech = result?;
    std::fs::write(output, &speech.audio)?;
    println!(
        "{} {} bytes of {} to {}",
        style("wrote").green(),
        speech.audio.len(),
        speech.content_type,
        output.display()
    );
    println!("{}", style(format!("{}/{}", speech.provider, speech.model)).dim());
    Ok(())
}

pub(super) async fn cmd_transcribe(
    config: &OperatorConfig,
    file: &Path,
    language: Option<String>,
    model: Option<String>,
) -> Result<()> {
    let audio = std::fs::read(file)?;
    let filename = file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let request = TranscriptionRequest {
        language,
        model,
        ..TranscriptionRequest::new(audio, filename)
    };
    let services = Services::open(config).await?;
    let result = services.bridge.speech_to_text(&request).await;
    services.shutdown().await;
    let transcript = result?;
    println!("{}", transcript.text);
    println!(
        "{}",
        style(format!("{}/{}", transcript.provider, transcript.model)).dim()
    );
    Ok(())
}
