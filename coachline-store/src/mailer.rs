use async_trait::async_trait;
use coachline_core::ports::{Notification, NotificationPort, NotificationTemplate};
use coachline_core::BoxError;
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use serde_json::Value;
use tracing::info;

use crate::app_config::SmtpConfig;

/// Sends notifications as HTML mail over SMTP.
#[derive(Clone)]
pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: String,
}

impl SmtpMailer {
    pub fn new(config: &SmtpConfig) -> Result<Self, lettre::transport::smtp::Error> {
        // Relays without credentials (local catchers) are reached over plain SMTP.
        let transport = if config.username.is_empty() {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.host)
                .port(config.port)
                .build()
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&config.host)?
                .port(config.port)
                .credentials(Credentials::new(config.username.clone(), config.password.clone()))
                .build()
        };

        Ok(Self {
            transport,
            from: format!("{} <{}>", config.from_name, config.from_email),
        })
    }
}

#[async_trait]
impl NotificationPort for SmtpMailer {
    async fn send(&self, notification: &Notification) -> Result<(), BoxError> {
        let email = Message::builder()
            .from(self.from.parse()?)
            .to(notification.to.trim().parse()?)
            .subject(notification.subject.clone())
            .header(ContentType::TEXT_HTML)
            .body(render(notification.template, &notification.data))?;

        self.transport.send(email).await?;
        info!("Mailed {:?}", notification.template);
        Ok(())
    }
}

fn field<'a>(data: &'a Value, key: &str) -> std::borrow::Cow<'a, str> {
    match data.get(key) {
        Some(Value::String(s)) => std::borrow::Cow::Borrowed(s.as_str()),
        Some(Value::Null) | None => std::borrow::Cow::Borrowed(""),
        Some(other) => std::borrow::Cow::Owned(other.to_string()),
    }
}

/// HTML body for a template. Amounts arrive in minor units.
pub fn render(template: NotificationTemplate, data: &Value) -> String {
    let greeting = format!("<p>Hi {},</p>", field(data, "firstName"));

    let content = match template {
        NotificationTemplate::CommuterVerificationOtp
        | NotificationTemplate::ETicketVerificationOtp
        | NotificationTemplate::LostParcelVerificationOtp => format!(
            "<p>Your verification code is <strong>{}</strong>.</p><p>It is valid for {} minutes.</p>",
            field(data, "otp"),
            field(data, "validMinutes")
        ),
        NotificationTemplate::PaymentSuccess => format!(
            "<p>We received your payment of {} for booking {} (seat {}).</p>",
            format_amount(data.get("price")),
            field(data, "bookingId"),
            field(data, "seatNumber")
        ),
        NotificationTemplate::ETicket => {
            let qr = match data.get("qrImageUrl").and_then(Value::as_str) {
                Some(url) => format!(r#"<p><img src="{}" alt="Ticket QR code" width="200" height="200"></p>"#, url),
                None => String::new(),
            };
            format!(
                "<p>Your e-ticket for booking {} is <strong>{}</strong>.</p><p>Seat {} on trip {}.</p>{}",
                field(data, "bookingId"),
                field(data, "eTicket"),
                field(data, "seatNumber"),
                field(data, "tripId"),
                qr
            )
        }
        NotificationTemplate::BookingCancelled => format!(
            "<p>Booking {} for seat {} has been cancelled.</p><p>{}</p>",
            field(data, "bookingId"),
            field(data, "seatNumber"),
            field(data, "cancellationPolicy")
        ),
        NotificationTemplate::Onboarded => format!(
            "<p>Welcome aboard! Booking {}, seat {}.</p>",
            field(data, "bookingId"),
            field(data, "seatNumber")
        ),
        NotificationTemplate::LostParcelRequested => format!(
            "<p>We recorded your report for \"{}\". Your reference id is <strong>{}</strong>.</p>",
            field(data, "name"),
            field(data, "referenceId")
        ),
        NotificationTemplate::LostParcelStatus => format!(
            "<p>Status of \"{}\" (reference {}): <strong>{}</strong>.</p>",
            field(data, "name"),
            field(data, "referenceId"),
            field(data, "status")
        ),
    };

    format!(
        r#"<!DOCTYPE html><html><body style="font-family: Arial, sans-serif;">{}{}</body></html>"#,
        greeting, content
    )
}

fn format_amount(value: Option<&Value>) -> String {
    match value.and_then(Value::as_i64) {
        Some(minor) => format!("LKR {}.{:02}", minor / 100, minor % 100),
        None => "LKR -".to_string(),
    }
}
