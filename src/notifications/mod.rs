//! Outbound email.
//!
//! Everything goes through [`Mailer`]. Without an SMTP host messages are only
//! logged, which keeps development setups working.

use crate::config::EmailConfig;
use crate::db::models::user_models::{Invitation, User};
use crate::error::Error;
use anyhow::Result;
use async_trait::async_trait;
use lettre::message::{header::ContentType, Mailbox, MultiPart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use log::{error, info};
use std::sync::Arc;

pub mod emails;

pub use emails::ContactMessage;

/// A single message ready to be handed to a [`Mailer`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingEmail {
    pub to: String,
    pub subject: String,
    pub text: String,
    pub html: Option<String>,
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, email: &OutgoingEmail) -> Result<()>;
}

/// SMTP relay with STARTTLS
pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpMailer {
    pub fn new(config: &EmailConfig) -> Result<Self> {
        let from: Mailbox = config
            .from_address
            .parse()
            .map_err(|e| Error::Email(format!("Invalid sender address {}: {}", config.from_address, e)))?;

        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.smtp_host)
            .map_err(|e| Error::Email(format!("Invalid SMTP relay {}: {}", config.smtp_host, e)))?
            .port(config.smtp_port);

        if !config.smtp_username.is_empty() {
            builder = builder.credentials(Credentials::new(
                config.smtp_username.clone(),
                config.smtp_password.clone(),
            ));
        }

        info!("SMTP mailer using {}:{}", config.smtp_host, config.smtp_port);

        Ok(Self {
            transport: builder.build(),
            from,
        })
    }

    fn build_message(&self, email: &OutgoingEmail) -> Result<Message> {
        let to: Mailbox = email
            .to
            .parse()
            .map_err(|e| Error::Email(format!("Invalid recipient {}: {}", email.to, e)))?;

        let builder = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(email.subject.clone());

        let message = match &email.html {
            Some(html) => builder.multipart(MultiPart::alternative_plain_html(
                email.text.clone(),
                html.clone(),
            )),
            None => builder
                .header(ContentType::TEXT_PLAIN)
                .body(email.text.clone()),
        }
        .map_err(|e| Error::Email(format!("Failed to build email: {}", e)))?;

        Ok(message)
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, email: &OutgoingEmail) -> Result<()> {
        let message = self.build_message(email)?;
        self.transport
            .send(message)
            .await
            .map_err(|e| Error::Email(format!("Failed to send email to {}: {}", email.to, e)))?;

        info!("Email '{}' sent to {}", email.subject, email.to);
        Ok(())
    }
}

/// Writes messages to the log instead of sending them
#[derive(Default)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, email: &OutgoingEmail) -> Result<()> {
        info!(
            "Email (not sent, SMTP disabled) to {}: {}\n{}",
            email.to, email.subject, email.text
        );
        Ok(())
    }
}

/// SMTP when a host is configured, logging otherwise
pub fn create_mailer(config: &EmailConfig) -> Result<Arc<dyn Mailer>> {
    if config.smtp_host.is_empty() {
        info!("No SMTP host configured, emails will be logged only");
        return Ok(Arc::new(LogMailer));
    }
    Ok(Arc::new(SmtpMailer::new(config)?))
}

/// Account and contact emails built on top of a [`Mailer`]
#[derive(Clone)]
pub struct EmailNotifier {
    mailer: Arc<dyn Mailer>,
    public_url: String,
    contact_address: String,
}

impl EmailNotifier {
    pub fn new(mailer: Arc<dyn Mailer>, public_url: &str, contact_address: &str) -> Self {
        Self {
            mailer,
            public_url: public_url.trim_end_matches('/').to_string(),
            contact_address: contact_address.to_string(),
        }
    }

    pub fn mailer(&self) -> &Arc<dyn Mailer> {
        &self.mailer
    }

    pub fn registration_url(&self, token: &str) -> String {
        format!("{}/register/{}", self.public_url, token)
    }

    async fn deliver(&self, email: OutgoingEmail, what: &str) -> bool {
        match self.mailer.send(&email).await {
            Ok(()) => {
                info!("{} email sent to {}", what, email.to);
                true
            }
            Err(e) => {
                error!("Failed to send {} email to {}: {}", what, email.to, e);
                false
            }
        }
    }

    pub async fn send_invitation(&self, invitation: &Invitation, inviter: &User) -> bool {
        let url = self.registration_url(&invitation.token);
        let email = emails::invitation(invitation, &inviter.full_name(), &url);
        self.deliver(email, "Invitation").await
    }

    pub async fn send_welcome(&self, user: &User) -> bool {
        let email = emails::welcome(user, &format!("{}/login", self.public_url));
        self.deliver(email, "Welcome").await
    }

    pub async fn send_password_reset(&self, user: &User, token: &str) -> bool {
        let url = format!("{}/reset-password/{}", self.public_url, token);
        let email = emails::password_reset(user, &url);
        self.deliver(email, "Password reset").await
    }

    /// Forward a contact form to staff, then confirm to the sender.
    /// Only the staff message has to go through.
    pub async fn send_contact(&self, contact: &ContactMessage) -> Result<()> {
        contact.validate()?;

        let (staff, confirmation) = emails::contact(contact, &self.contact_address);
        self.mailer.send(&staff).await.map_err(|e| {
            error!("Failed to send contact form email: {}", e);
            Error::Email("Sorry, there was an error sending your message".to_string())
        })?;

        self.deliver(confirmation, "Contact confirmation").await;
        Ok(())
    }
}

#[cfg(test)]
pub mod testing {
    use super::*;
    use std::sync::Mutex;

    /// Keeps every message, optionally refusing to send
    #[derive(Default)]
    pub struct MemoryMailer {
        pub sent: Mutex<Vec<OutgoingEmail>>,
        pub fail: bool,
    }

    impl MemoryMailer {
        pub fn failing() -> Self {
            Self {
                sent: Mutex::new(Vec::new()),
                fail: true,
            }
        }

        pub fn sent(&self) -> Vec<OutgoingEmail> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Mailer for MemoryMailer {
        async fn send(&self, email: &OutgoingEmail) -> Result<()> {
            if self.fail {
                return Err(Error::Email("relay refused".to_string()).into());
            }
            self.sent.lock().unwrap().push(email.clone());
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::MemoryMailer;
    use super::*;
    use crate::db::models::user_models::UserRole;

    fn notifier(mailer: Arc<MemoryMailer>) -> EmailNotifier {
        EmailNotifier::new(mailer, "https://guard.campus.edu/", "security@campus.edu")
    }

    #[tokio::test]
    async fn invitation_links_to_registration() {
        let mailer = Arc::new(MemoryMailer::default());
        let inviter = User::new("chief@campus.edu", String::new(), UserRole::Admin);
        let invitation = Invitation::new("new@campus.edu", UserRole::Manager, inviter.id, "tok123".into(), 48);

        assert!(notifier(mailer.clone()).send_invitation(&invitation, &inviter).await);

        let sent = mailer.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, "new@campus.edu");
        assert!(sent[0].text.contains("https://guard.campus.edu/register/tok123"));
    }

    #[tokio::test]
    async fn failures_are_reported_as_false() {
        let mailer = Arc::new(MemoryMailer::failing());
        let user = User::new("someone@campus.edu", String::new(), UserRole::Viewer);
        assert!(!notifier(mailer).send_welcome(&user).await);
    }

    #[tokio::test]
    async fn contact_form_reaches_staff_and_sender() {
        let mailer = Arc::new(MemoryMailer::default());
        let contact = ContactMessage {
            name: "Ada".into(),
            email: "ada@school.edu".into(),
            phone: String::new(),
            institution: String::new(),
            message: "Do you cover dorms?".into(),
            contact_method: "email".into(),
        };

        notifier(mailer.clone()).send_contact(&contact).await.unwrap();

        let sent = mailer.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].to, "security@campus.edu");
        assert_eq!(sent[1].to, "ada@school.edu");
    }

    #[tokio::test]
    async fn contact_form_failure_is_an_email_error() {
        let mailer = Arc::new(MemoryMailer::failing());
        let contact = ContactMessage {
            name: "Ada".into(),
            email: "ada@school.edu".into(),
            phone: String::new(),
            institution: String::new(),
            message: "Hello".into(),
            contact_method: "email".into(),
        };

        let err = notifier(mailer).send_contact(&contact).await.unwrap_err();
        assert!(matches!(err.downcast_ref::<Error>(), Some(Error::Email(_))));
    }

    #[tokio::test]
    async fn smtp_mailer_builds_multipart_messages() {
        let config = EmailConfig {
            smtp_host: "smtp.campus.edu".into(),
            ..EmailConfig::default()
        };
        let mailer = SmtpMailer::new(&config).unwrap();
        let email = OutgoingEmail {
            to: "guard@campus.edu".into(),
            subject: "Test".into(),
            text: "plain".into(),
            html: Some("<p>html</p>".into()),
        };
        assert!(mailer.build_message(&email).is_ok());

        let bad = OutgoingEmail {
            to: "not an address".into(),
            ..email
        };
        assert!(mailer.build_message(&bad).is_err());
    }
}
