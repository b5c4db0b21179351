use std::path::PathBuf;

use lettre::message::header::ContentType;
use lettre::message::{Attachment, Body, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use thiserror::Error;

use crate::config::EmailConfig;

pub const EXIT_SUBJECT: &str = "Script Stopped - Action Required";
pub const EXIT_BODY: &str = "The latency monitoring script has stopped unexpectedly. Please restart the script to ensure continuous monitoring.";

const SMTP_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("invalid mailbox address: {0}")]
    Address(#[from] lettre::address::AddressError),
    #[error("failed to build message: {0}")]
    Message(#[from] lettre::error::Error),
    #[error("invalid attachment content type: {0}")]
    ContentType(#[from] lettre::message::header::ContentTypeErr),
    #[error("failed to read attachment: {0}")]
    Attachment(#[from] std::io::Error),
    #[error("smtp delivery failed: {0}")]
    Smtp(#[from] lettre::transport::smtp::Error),
}

/// A fully-formed notification: subject, plain-text body, and an optional
/// inline image attachment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub subject: String,
    pub body: String,
    pub attachment: Option<PathBuf>,
}

impl OutboundMessage {
    /// Threshold-breach alert with the latency in the subject line.
    pub fn latency_alert(
        host: &str,
        threshold_ms: f64,
        latency_ms: f64,
        graph: Option<PathBuf>,
    ) -> Self {
        Self {
            subject: format!("Latency Alert: {latency_ms:.2} ms Exceeded Threshold"),
            body: format!(
                "Alert: The latency to {host} has exceeded the threshold of {threshold_ms} ms.\n\nCurrent Latency: {latency_ms:.2} ms"
            ),
            attachment: graph,
        }
    }

    /// Sent once when the process is about to terminate, whatever the cause.
    pub fn agent_stopped() -> Self {
        Self {
            subject: EXIT_SUBJECT.to_string(),
            body: EXIT_BODY.to_string(),
            attachment: None,
        }
    }
}

/// Delivers a message to the configured recipient. Implementations are
/// expected to bound their own I/O; callers log failures and move on.
pub trait Notifier {
    fn send(&self, message: &OutboundMessage) -> Result<(), NotifyError>;
}

/// SMTP notifier. Addresses are parsed once at construction so a typo fails
/// the process at startup rather than on the first alert.
pub struct SmtpNotifier {
    sender: lettre::message::Mailbox,
    recipient: lettre::message::Mailbox,
    transport: SmtpTransport,
}

impl SmtpNotifier {
    pub fn new(config: &EmailConfig) -> Result<Self, NotifyError> {
        let transport = SmtpTransport::relay(&config.smtp_host)?
            .port(config.smtp_port)
            .credentials(Credentials::new(
                config.sender.clone(),
                config.password.clone(),
            ))
            .timeout(Some(SMTP_TIMEOUT))
            .build();

        Ok(Self {
            sender: config.sender.parse()?,
            recipient: config.recipient.parse()?,
            transport,
        })
    }
}

impl Notifier for SmtpNotifier {
    fn send(&self, message: &OutboundMessage) -> Result<(), NotifyError> {
        let builder = Message::builder()
            .from(self.sender.clone())
            .to(self.recipient.clone())
            .subject(message.subject.as_str());

        let email = match &message.attachment {
            Some(path) => {
                let bytes = std::fs::read(path)?;
                let image = Attachment::new_inline("graph".to_string())
                    .body(Body::new(bytes), ContentType::parse("image/png")?);
                builder.multipart(
                    MultiPart::related()
                        .singlepart(SinglePart::plain(message.body.clone()))
                        .singlepart(image),
                )?
            }
            None => builder.body(message.body.clone())?,
        };

        self.transport.send(&email)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alert_message_includes_latency_in_subject_and_body() {
        let msg = OutboundMessage::latency_alert(
            "8.8.8.8",
            60.0,
            73.456,
            Some(PathBuf::from("graph.png")),
        );
        assert_eq!(msg.subject, "Latency Alert: 73.46 ms Exceeded Threshold");
        assert!(msg.body.contains("8.8.8.8"));
        assert!(msg.body.contains("60"));
        assert!(msg.body.contains("73.46 ms"));
        assert!(msg.attachment.is_some());
    }

    #[test]
    fn exit_message_is_fixed_and_has_no_attachment() {
        let msg = OutboundMessage::agent_stopped();
        assert_eq!(msg.subject, EXIT_SUBJECT);
        assert_eq!(msg.body, EXIT_BODY);
        assert!(msg.attachment.is_none());
    }
}
