//! New-listing notifications: message rendering plus SMTP and log-only delivery.
//!
//! Delivery is best effort. Callers receive a [`NotifyError`] on failure and
//! decide for themselves whether it matters; the scan pipeline only logs it.

use std::fmt;

use async_trait::async_trait;
use jobwatch_core::JobRecord;
use lettre::{
    message::{header::ContentType, Mailbox},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};

pub const CRATE_NAME: &str = "jobwatch-notify";

pub const DEFAULT_SUBJECT: &str = "New Upwork Jobs Posted";
pub const DEFAULT_SMTP_HOST: &str = "smtp.gmail.com";
pub const DEFAULT_SMTP_PORT: u16 = 587;

const SIGNATURE: &str = "jobwatch";

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("invalid email address: {0}")]
    Address(String),

    #[error("send failed: {0}")]
    Send(String),
}

/// Email settings for [`SmtpNotifier`]. `sender` doubles as the SMTP login.
#[derive(Clone)]
pub struct NotifierConfig {
    pub sender: String,
    pub receiver: String,
    pub password: String,
    pub subject: String,
    pub smtp_host: String,
    pub smtp_port: u16,
}

impl NotifierConfig {
    pub fn new(
        sender: impl Into<String>,
        receiver: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            sender: sender.into(),
            receiver: receiver.into(),
            password: password.into(),
            subject: DEFAULT_SUBJECT.to_string(),
            smtp_host: DEFAULT_SMTP_HOST.to_string(),
            smtp_port: DEFAULT_SMTP_PORT,
        }
    }
}

impl fmt::Debug for NotifierConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotifierConfig")
            .field("sender", &self.sender)
            .field("receiver", &self.receiver)
            .field("password", &"[REDACTED]")
            .field("subject", &self.subject)
            .field("smtp_host", &self.smtp_host)
            .field("smtp_port", &self.smtp_port)
            .finish()
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, jobs: &[JobRecord]) -> Result<(), NotifyError>;
}

/// Plain-text body listing every new job's title, payment info and link.
pub fn render_message(jobs: &[JobRecord]) -> String {
    let mut body = format!(
        "Hello,\n\n{} new jobs have been posted on Upwork:\n",
        jobs.len()
    );
    for job in jobs {
        body.push_str(&format!(
            "\nJob title: {}\nPayment info: {}\nLink: {}\n",
            job.title.trim(),
            job.payment_info.trim(),
            job.link.trim()
        ));
    }
    body.push_str(&format!("\nBest regards,\n{SIGNATURE}\n"));
    body
}

pub struct SmtpNotifier {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    to: Mailbox,
    subject: String,
}

impl SmtpNotifier {
    /// Validate addresses and build a STARTTLS transport. No connection is
    /// made until the first send.
    #[tracing::instrument(
        name = "smtp_notifier_new",
        skip(config),
        fields(host = %config.smtp_host, port = %config.smtp_port)
    )]
    pub fn new(config: NotifierConfig) -> Result<Self, NotifyError> {
        if config.smtp_host.trim().is_empty() {
            return Err(NotifyError::Config("smtp host is empty".into()));
        }
        let from: Mailbox = config
            .sender
            .parse()
            .map_err(|e| NotifyError::Address(format!("sender: {e}")))?;
        let to: Mailbox = config
            .receiver
            .parse()
            .map_err(|e| NotifyError::Address(format!("receiver: {e}")))?;

        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.smtp_host)
            .map_err(|e| NotifyError::Config(format!("{e}")))?
            .port(config.smtp_port)
            .credentials(Credentials::new(config.sender.clone(), config.password))
            .build();

        Ok(Self {
            transport,
            from,
            to,
            subject: config.subject,
        })
    }

    fn build_message(&self, jobs: &[JobRecord]) -> Result<Message, NotifyError> {
        Message::builder()
            .from(self.from.clone())
            .to(self.to.clone())
            .subject(self.subject.clone())
            .header(ContentType::TEXT_PLAIN)
            .body(render_message(jobs))
            .map_err(|e| NotifyError::Send(format!("failed to build message: {e}")))
    }
}

#[async_trait]
impl Notifier for SmtpNotifier {
    #[tracing::instrument(name = "smtp_notify", skip(self, jobs), fields(jobs = jobs.len()))]
    async fn notify(&self, jobs: &[JobRecord]) -> Result<(), NotifyError> {
        let message = self.build_message(jobs)?;
        self.transport
            .send(message)
            .await
            .map_err(|e| NotifyError::Send(format!("{e}")))?;
        tracing::info!("notification email sent");
        Ok(())
    }
}

/// Writes the rendered message to the log instead of sending it.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, jobs: &[JobRecord]) -> Result<(), NotifyError> {
        tracing::info!(jobs = jobs.len(), message = %render_message(jobs), "new jobs (email not configured)");
        Ok(())
    }
}

/// Stands in for a notifier that could not be built; every send reports why.
#[derive(Debug, Clone)]
pub struct UnavailableNotifier {
    reason: String,
}

impl UnavailableNotifier {
    pub fn new(error: &NotifyError) -> Self {
        Self {
            reason: error.to_string(),
        }
    }
}

#[async_trait]
impl Notifier for UnavailableNotifier {
    async fn notify(&self, _jobs: &[JobRecord]) -> Result<(), NotifyError> {
        Err(NotifyError::Config(self.reason.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn jobs() -> Vec<JobRecord> {
        vec![
            JobRecord::new(" Python scraper ", "2 hours ago", "Hourly: $25 ", "https://www.upwork.com/jobs/1"),
            JobRecord::new("Selenium bot", "5 hours ago", "Fixed price", "https://www.upwork.com/jobs/2"),
        ]
    }

    fn config() -> NotifierConfig {
        NotifierConfig::new("watcher@example.com", "me@example.com", "app-password-123")
    }

    #[test]
    fn message_lists_count_and_each_job() {
        let body = render_message(&jobs());
        assert!(body.starts_with("Hello,\n\n2 new jobs have been posted on Upwork:\n"));
        assert!(body.contains("Job title: Python scraper\nPayment info: Hourly: $25\nLink: https://www.upwork.com/jobs/1\n"));
        assert!(body.contains("Job title: Selenium bot\n"));
        assert!(body.ends_with("Best regards,\njobwatch\n"));
        assert!(!body.contains("2 hours ago"));
    }

    #[test]
    fn config_defaults_match_gmail_starttls() {
        let config = config();
        assert_eq!(config.subject, DEFAULT_SUBJECT);
        assert_eq!(config.smtp_host, "smtp.gmail.com");
        assert_eq!(config.smtp_port, 587);
    }

    #[test]
    fn config_debug_does_not_leak_password() {
        let debug = format!("{:?}", config());
        assert!(!debug.contains("app-password-123"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn invalid_sender_is_rejected() {
        let mut config = config();
        config.sender = "not-an-email".into();
        assert!(matches!(SmtpNotifier::new(config), Err(NotifyError::Address(_))));
    }

    #[test]
    fn empty_host_is_rejected() {
        let mut config = config();
        config.smtp_host = " ".into();
        assert!(matches!(SmtpNotifier::new(config), Err(NotifyError::Config(_))));
    }

    #[test]
    fn message_builds_with_subject_and_recipients() {
        let notifier = SmtpNotifier::new(config()).expect("notifier");
        let message = notifier.build_message(&jobs()).expect("message");
        let raw = String::from_utf8(message.formatted()).expect("utf8");
        assert!(raw.contains("Subject: New Upwork Jobs Posted"));
        assert!(raw.contains("To: me@example.com"));
    }

    #[tokio::test]
    async fn log_notifier_always_succeeds() {
        assert!(LogNotifier.notify(&jobs()).await.is_ok());
    }

    #[tokio::test]
    async fn unavailable_notifier_reports_the_build_error() {
        let mut config = config();
        config.receiver = "nobody".into();
        let err = SmtpNotifier::new(config).err().expect("bad receiver");
        let notifier = UnavailableNotifier::new(&err);

        match notifier.notify(&jobs()).await {
            Err(NotifyError::Config(reason)) => assert!(reason.contains("receiver")),
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
