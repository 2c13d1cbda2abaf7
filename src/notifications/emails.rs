use crate::db::models::user_models::{Invitation, User};
use crate::error::Error;
use crate::notifications::OutgoingEmail;
use serde::{Deserialize, Serialize};

const PRODUCT: &str = "CampusGuard AI";

/// Public contact form submission
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContactMessage {
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub institution: String,
    pub message: String,
    #[serde(default = "default_contact_method")]
    pub contact_method: String,
}

fn default_contact_method() -> String {
    "email".to_string()
}

impl ContactMessage {
    pub fn validate(&self) -> Result<(), Error> {
        if self.name.trim().is_empty() || self.email.trim().is_empty() || self.message.trim().is_empty() {
            return Err(Error::Validation(
                "Please fill in all required fields.".to_string(),
            ));
        }
        if !self.email.contains('@') {
            return Err(Error::Validation(format!("Invalid email address: {}", self.email)));
        }
        Ok(())
    }
}

pub fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

fn or_not_provided(value: &str) -> &str {
    if value.trim().is_empty() {
        "Not provided"
    } else {
        value
    }
}

pub fn invitation(invitation: &Invitation, inviter: &str, registration_url: &str) -> OutgoingEmail {
    let expires = invitation.expires_at.format("%Y-%m-%d %H:%M UTC");
    let role = invitation.role.as_str();

    let text = format!(
        "Hello,\n\n{inviter} has invited you to join {PRODUCT} as a {role}.\n\n\
         Complete your registration here:\n{registration_url}\n\n\
         This invitation expires on {expires}.\n"
    );
    let html = format!(
        "<p>Hello,</p>\
         <p>{} has invited you to join <strong>{PRODUCT}</strong> as a {role}.</p>\
         <p><a href=\"{registration_url}\">Complete your registration</a></p>\
         <p>This invitation expires on {expires}.</p>",
        escape_html(inviter),
    );

    OutgoingEmail {
        to: invitation.email.clone(),
        subject: format!("Invitation to Join {}", PRODUCT),
        text,
        html: Some(html),
    }
}

pub fn welcome(user: &User, login_url: &str) -> OutgoingEmail {
    let name = user.full_name();
    OutgoingEmail {
        to: user.email.clone(),
        subject: format!("Welcome to {}!", PRODUCT),
        text: format!(
            "Hi {name},\n\nYour {PRODUCT} account is ready. Sign in at {login_url}\n"
        ),
        html: Some(format!(
            "<p>Hi {},</p><p>Your {PRODUCT} account is ready. \
             <a href=\"{login_url}\">Sign in</a></p>",
            escape_html(&name)
        )),
    }
}

pub fn password_reset(user: &User, reset_url: &str) -> OutgoingEmail {
    OutgoingEmail {
        to: user.email.clone(),
        subject: format!("{} password reset", PRODUCT),
        text: format!(
            "Hi {},\n\nA password reset was requested for your account. \
             Use this link within one hour:\n{reset_url}\n\n\
             If you did not request this, ignore this email.\n",
            user.full_name()
        ),
        html: None,
    }
}

/// Staff notification and sender confirmation
pub fn contact(contact: &ContactMessage, staff_address: &str) -> (OutgoingEmail, OutgoingEmail) {
    let institution = if contact.institution.trim().is_empty() {
        "Unknown Institution"
    } else {
        contact.institution.as_str()
    };

    let text = format!(
        "New Contact Form Submission\n\
         ----------------------------\n\
         Name: {}\n\
         Email: {}\n\
         Phone: {}\n\
         Institution: {}\n\
         Preferred Contact Method: {}\n\n\
         Message:\n{}\n",
        contact.name,
        contact.email,
        or_not_provided(&contact.phone),
        or_not_provided(&contact.institution),
        contact.contact_method,
        contact.message,
    );

    let rows = [
        ("Name", contact.name.as_str()),
        ("Email", contact.email.as_str()),
        ("Phone", or_not_provided(&contact.phone)),
        ("Institution", or_not_provided(&contact.institution)),
        ("Contact Method", contact.contact_method.as_str()),
    ]
    .iter()
    .map(|(label, value)| {
        format!(
            "<tr><td><strong>{}:</strong></td><td>{}</td></tr>",
            label,
            escape_html(value)
        )
    })
    .collect::<String>();

    let html = format!(
        "<h2>New Contact Form Submission</h2><table>{}</table>\
         <h3>Message:</h3><div>{}</div>",
        rows,
        escape_html(&contact.message).replace('\n', "<br>")
    );

    let staff = OutgoingEmail {
        to: staff_address.to_string(),
        subject: format!("{} Contact Form: {} from {}", PRODUCT, contact.name, institution),
        text,
        html: Some(html),
    };

    let confirmation = OutgoingEmail {
        to: contact.email.clone(),
        subject: format!("Thank you for contacting {}", PRODUCT),
        text: format!(
            "Dear {},\n\nThank you for reaching out to {PRODUCT}. We have received your message \
             and one of our security specialists will contact you within 24 hours.\n\n\
             Here's a copy of your message:\n{}\n",
            contact.name, contact.message
        ),
        html: None,
    };

    (staff, confirmation)
}

/// Alert email; `html` is the rule's rendered email template when it has one
pub fn alert(to: &str, title: &str, message: &str, html: Option<String>) -> OutgoingEmail {
    OutgoingEmail {
        to: to.to_string(),
        subject: format!("[Smart Surveillance] {}", title),
        text: message.to_string(),
        html: Some(html.unwrap_or_else(|| {
            format!("<p>{}</p>", escape_html(message).replace('\n', "<br>"))
        })),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::user_models::UserRole;
    use uuid::Uuid;

    fn contact_form() -> ContactMessage {
        ContactMessage {
            name: "Ada <script>".into(),
            email: "ada@school.edu".into(),
            phone: String::new(),
            institution: String::new(),
            message: "line one\nline two".into(),
            contact_method: "phone".into(),
        }
    }

    #[test]
    fn contact_form_requires_name_email_and_message() {
        assert!(contact_form().validate().is_ok());

        let mut missing = contact_form();
        missing.message = "   ".into();
        assert!(matches!(missing.validate(), Err(Error::Validation(_))));

        let mut bad_email = contact_form();
        bad_email.email = "ada".into();
        assert!(bad_email.validate().is_err());
    }

    #[test]
    fn contact_html_is_escaped() {
        let (staff, confirmation) = contact(&contact_form(), "security@campus.edu");

        assert_eq!(
            staff.subject,
            "CampusGuard AI Contact Form: Ada <script> from Unknown Institution"
        );
        let html = staff.html.unwrap();
        assert!(html.contains("Ada &lt;script&gt;"));
        assert!(html.contains("line one<br>line two"));
        assert!(staff.text.contains("Phone: Not provided"));
        assert_eq!(confirmation.to, "ada@school.edu");
    }

    #[test]
    fn invitation_mentions_role_and_link() {
        let invite = Invitation::new("Guard@Campus.edu", UserRole::Manager, Uuid::new_v4(), "abc".into(), 48);
        let email = invitation(&invite, "Chief", "http://localhost/register/abc");

        assert_eq!(email.to, "guard@campus.edu");
        assert_eq!(email.subject, "Invitation to Join CampusGuard AI");
        assert!(email.text.contains("as a manager"));
        assert!(email.text.contains("http://localhost/register/abc"));
    }

    #[test]
    fn alert_falls_back_to_escaped_message() {
        let email = alert("a@b.edu", "Weapon Detected", "Camera <3>", None);
        assert_eq!(email.subject, "[Smart Surveillance] Weapon Detected");
        assert_eq!(email.html.as_deref(), Some("<p>Camera &lt;3&gt;</p>"));

        let templated = alert("a@b.edu", "t", "m", Some("<b>custom</b>".into()));
        assert_eq!(templated.html.as_deref(), Some("<b>custom</b>"));
    }
}
