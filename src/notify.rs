//! 失敗・復旧のメール通知

use std::fmt;

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use tracing::{debug, info};

use crate::config::EmailConfig;
use crate::error::NotifyError;

const DEFAULT_SMTP_PORT: u16 = 587;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
    Info,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Severity::Error => "ERROR",
            Severity::Warning => "WARNING",
            Severity::Info => "INFO",
        };
        f.write_str(name)
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, subject: &str, body: &str, severity: Severity) -> Result<(), NotifyError>;
}

/// メール無効時。ログにだけ残す。
#[derive(Debug, Clone, Default)]
pub struct DisabledNotifier;

#[async_trait]
impl Notifier for DisabledNotifier {
    async fn notify(&self, subject: &str, body: &str, severity: Severity) -> Result<(), NotifyError> {
        debug!("Email disabled, not sending [{}] {}: {}", severity, subject, body);
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct SmtpNotifier {
    to: String,
    server: String,
    port: u16,
    username: String,
    password: String,
    subject_prefix: Option<String>,
}

impl SmtpNotifier {
    /// 検証済みの設定から作る。必須項目が欠けていればNone。
    pub fn from_config(email: &EmailConfig) -> Option<Self> {
        Some(Self {
            to: email.send_emails_to.clone()?,
            server: email.smtp_server.clone()?,
            port: email.smtp_port.unwrap_or(DEFAULT_SMTP_PORT),
            username: email.smtp_username.clone()?,
            password: email.smtp_password.clone()?,
            subject_prefix: email.subject_prefix.clone(),
        })
    }

    fn subject(&self, subject: &str, severity: Severity) -> String {
        match self.subject_prefix.as_deref().map(str::trim) {
            Some(prefix) if !prefix.is_empty() => format!("{} {}: {}", prefix, severity, subject),
            _ => format!("{}: {}", severity, subject),
        }
    }

    fn build_message(&self, subject: &str, body: &str, severity: Severity) -> Result<Message, NotifyError> {
        Ok(Message::builder()
            .from(self.username.parse()?)
            .to(self.to.parse()?)
            .subject(self.subject(subject, severity))
            .header(ContentType::TEXT_PLAIN)
            .body(body.to_string())?)
    }
}

#[async_trait]
impl Notifier for SmtpNotifier {
    async fn notify(&self, subject: &str, body: &str, severity: Severity) -> Result<(), NotifyError> {
        let message = self.build_message(subject, body, severity)?;
        let mailer = SmtpTransport::starttls_relay(&self.server)?
            .port(self.port)
            .credentials(Credentials::new(self.username.clone(), self.password.clone()))
            .build();

        // lettreの同期トランスポートはブロッキング
        tokio::task::spawn_blocking(move || mailer.send(&message)).await??;
        info!("Sent {} email to {}: {}", severity, self.to, subject);
        Ok(())
    }
}

/// 設定に応じた通知先を作る
pub fn from_config(email: &EmailConfig) -> Box<dyn Notifier> {
    if email.enable_email {
        if let Some(notifier) = SmtpNotifier::from_config(email) {
            return Box::new(notifier);
        }
    }
    Box::new(DisabledNotifier)
}
