use crate::error::Result;
use crate::model::Session;

/// Output shape for a session snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    /// Round-trippable structured form; [`parse`] reverses it.
    Json,
    /// Human-readable transcript, one block per message.
    Transcript,
}

/// Render a full textual snapshot of a session.
pub fn render(session: &Session, format: ExportFormat) -> String {
    match format {
        ExportFormat::Json => serde_json::to_string_pretty(session).unwrap_or_default(),
        ExportFormat::Transcript => render_transcript(session),
    }
}

/// Re-read a session from its [`ExportFormat::Json`] form.
pub fn parse(payload: &str) -> Result<Session> {
    Ok(serde_json::from_str(payload)?)
}

fn render_transcript(session: &Session) -> String {
    let mut out = String::new();
    out.push_str(&format!("# {}\n\n", session.title));
    for message in &session.messages {
        out.push_str(&format!(
            "### {} — {}\n\n{}\n\n",
            message.role,
            message.created_at.to_rfc3339(),
            message.content
        ));
    }
    out
}
