#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mail {
    pub to: String,
    pub subject: String,
    pub body: String,
}

/// Outgoing notification sink. Delivery is fire-and-forget: implementations report
/// their own failures and never fail the request that produced the mail.
pub trait Mailer {
    fn send(&self, mail: &Mail);
}

/// Default sink: records the mail in the log instead of delivering it.
#[derive(Debug, Default)]
pub struct LogMailer;

impl Mailer for LogMailer {
    fn send(&self, mail: &Mail) {
        tracing::info!(to = %mail.to, subject = %mail.subject, "mail queued");
    }
}

pub fn welcome_mail(name: &str, email: &str, password: &str) -> Mail {
    Mail {
        to: email.to_string(),
        subject: "Your teacher account".to_string(),
        body: format!(
            "Hello {name},\n\nAn account has been created for you.\nLogin: {email}\nPassword: {password}\n\nPlease change your password after signing in.\n"
        ),
    }
}
