use async_trait::async_trait;
use lettre::message::{header::ContentType, Mailbox};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Address, AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::core::config::MailConfig;
use crate::core::error::{AppError, AppResult};
use crate::core::types::{Notification, NotificationKind, Organization, Token, TokenKind, User};
use crate::executor::{Priority, PriorityExecutor};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMail {
    pub to: String,
    pub subject: String,
    pub body: String,
}

impl OutgoingMail {
    /// Mail carrying a confirmation link for an account token.
    pub fn for_token(token: &Token, user: &User, base_url: &str) -> Self {
        let base_url = base_url.trim_end_matches('/');
        let (subject, action, path) = match token.kind {
            TokenKind::Register => ("Complete your registration", "finish your registration", "register"),
            TokenKind::ChangeEmail => ("Confirm your new e-mail address", "confirm your new address", "change-email"),
            TokenKind::ResetPassword => ("Reset your password", "choose a new password", "reset-password"),
        };
        let to = match (token.kind, token.payload.as_deref()) {
            // The new address is the one that has to prove it works.
            (TokenKind::ChangeEmail, Some(new_email)) => new_email.to_string(),
            _ => user.email.clone(),
        };

        Self {
            to,
            subject: subject.to_string(),
            body: format!(
                "Hello {},\n\nplease open the following link to {}:\n{}/{}?token={}\n",
                user.username, action, base_url, path, token.value
            ),
        }
    }

    pub fn for_notification(notification: &Notification, recipient: &User, base_url: &str) -> Self {
        let base_url = base_url.trim_end_matches('/');
        let what = match notification.kind {
            NotificationKind::NewReport => "A new report was filed in a topic you follow",
            NotificationKind::NewPost => "A new post was added to a report you follow",
            NotificationKind::Answered => "Your post received an answer",
            NotificationKind::Moved => "A report you follow was moved to another topic",
            NotificationKind::Closed => "A report you follow was closed",
        };
        let link = match notification.post_id {
            Some(post_id) => format!("{}/posts/{}", base_url, post_id),
            None => format!("{}/reports/{}", base_url, notification.report_id),
        };

        Self {
            to: recipient.email.clone(),
            subject: format!("[#{}] {}", notification.report_id, what),
            body: format!("Hello {},\n\n{}:\n{}\n", recipient.username, what, link),
        }
    }

    /// Priority used when queueing this kind of mail.
    pub fn token_priority() -> Priority {
        Priority::High
    }

    pub fn notification_priority() -> Priority {
        Priority::Low
    }
}

/// Delivers a finished mail.
#[async_trait]
pub trait MailTransport: Send + Sync + 'static {
    async fn deliver(&self, from: &Mailbox, mail: &OutgoingMail) -> AppResult<()>;
}

pub struct SmtpMailTransport {
    transport: AsyncSmtpTransport<Tokio1Executor>,
}

impl SmtpMailTransport {
    pub fn new(host: &str, config: &MailConfig) -> AppResult<Self> {
        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)
            .map_err(|e| AppError::Mail(format!("Invalid SMTP relay {}: {}", host, e)))?
            .port(config.smtp_port);

        if let (Some(username), Some(password)) = (&config.smtp_username, &config.smtp_password) {
            builder = builder.credentials(Credentials::new(username.clone(), password.clone()));
        }

        Ok(Self {
            transport: builder.build(),
        })
    }
}

#[async_trait]
impl MailTransport for SmtpMailTransport {
    async fn deliver(&self, from: &Mailbox, mail: &OutgoingMail) -> AppResult<()> {
        let to: Mailbox = mail
            .to
            .parse()
            .map_err(|e| AppError::Mail(format!("Invalid recipient {}: {}", mail.to, e)))?;

        let message = Message::builder()
            .from(from.clone())
            .to(to)
            .subject(mail.subject.clone())
            .header(ContentType::TEXT_PLAIN)
            .body(mail.body.clone())
            .map_err(|e| AppError::Mail(format!("Failed to build message: {}", e)))?;

        self.transport
            .send(message)
            .await
            .map_err(|e| AppError::Mail(format!("SMTP delivery failed: {}", e)))?;
        Ok(())
    }
}

pub struct MailService {
    transport: Option<Arc<dyn MailTransport>>,
    from: Mailbox,
    executor: Arc<PriorityExecutor>,
}

impl MailService {
    pub fn new(
        config: &MailConfig,
        organization: &Organization,
        executor: Arc<PriorityExecutor>,
    ) -> AppResult<Self> {
        let transport: Option<Arc<dyn MailTransport>> = match &config.smtp_host {
            Some(host) => Some(Arc::new(SmtpMailTransport::new(host, config)?)),
            None => {
                warn!("No SMTP host configured - outgoing mail will only be logged");
                None
            }
        };
        Self::with_transport(transport, &config.from_address, organization, executor)
    }

    pub fn with_transport(
        transport: Option<Arc<dyn MailTransport>>,
        from_address: &str,
        organization: &Organization,
        executor: Arc<PriorityExecutor>,
    ) -> AppResult<Self> {
        let address: Address = from_address
            .parse()
            .map_err(|e| AppError::Mail(format!("Invalid sender {}: {}", from_address, e)))?;
        let from = Mailbox::new(Some(organization.name.clone()), address);

        Ok(Self {
            transport,
            from,
            executor,
        })
    }

    /// Queue a mail for background delivery. Delivery failures are logged
    /// and never reach the caller.
    pub fn enqueue(&self, mail: OutgoingMail, priority: Priority) -> AppResult<()> {
        let Some(transport) = self.transport.clone() else {
            info!(to = %mail.to, subject = %mail.subject, "Mail dropped (no SMTP transport)");
            return Ok(());
        };

        let from = self.from.clone();
        self.executor.submit(priority, async move {
            match transport.deliver(&from, &mail).await {
                Ok(()) => info!(to = %mail.to, subject = %mail.subject, "Mail sent"),
                Err(e) => error!(to = %mail.to, "Mail delivery failed: {}", e),
            }
        })?;
        Ok(())
    }
}
