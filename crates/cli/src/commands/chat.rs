//! `kateno chat`: send one message and stream the reply to stdout.
//!
//! Ctrl-C cancels the reply; whatever was already printed stays.

use std::io::Write;

use kateno_config::AppConfig;
use kateno_core::chat::ChatRequest;
use kateno_core::message::Message;
use kateno_pipeline::ChatPipeline;
use kateno_security::validate_and_sanitize;
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub async fn run(
    message: String,
    provider: Option<String>,
    memory: Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    let pipeline = ChatPipeline::from_config(&config);

    let mut request = ChatRequest::new(vec![Message::user(message)]);
    request.provider = provider;
    request.context_memory = memory;
    let request = validate_and_sanitize(request)?;

    let cancel = CancellationToken::new();
    let mut stream = tokio::select! {
        routed = pipeline.route(&request, cancel.clone()) => routed?,
        _ = tokio::signal::ctrl_c() => {
            cancel.cancel();
            eprintln!("\n[cancelled]");
            return Ok(());
        }
    };
    debug!(provider = %stream.provider(), "Streaming reply");

    let mut stdout = std::io::stdout();
    loop {
        tokio::select! {
            item = stream.next_fragment() => match item {
                Some(Ok(fragment)) => {
                    stdout.write_all(fragment.as_bytes())?;
                    stdout.flush()?;
                }
                Some(Err(e)) => {
                    writeln!(stdout)?;
                    return Err(format!("Reply from {} failed: {e}", stream.provider()).into());
                }
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                stream.cancel();
                writeln!(stdout)?;
                eprintln!("[cancelled]");
                return Ok(());
            }
        }
    }

    writeln!(stdout)?;
    eprintln!("[{}]", stream.provider());
    Ok(())
}
