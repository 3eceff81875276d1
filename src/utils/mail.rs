use async_trait::async_trait;
use lettre::message::{Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials as SmtpCredentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use log::info;
use crate::config::MailSettings;
use crate::error::{GradeError, Result};
use crate::models::{DistributionTable, GradeSnapshot, GRADE_BUCKETS, GRADE_HEADERS};
use crate::poll::Notifier;

pub const SUBJECT: &str = "New Grade!";

// Headers and rows of the grade table as plain strings.
fn grade_table(grades: &GradeSnapshot) -> (Vec<String>, Vec<Vec<String>>) {
    let headers = GRADE_HEADERS.iter().map(|h| h.to_string()).collect();
    let rows = grades
        .rows
        .iter()
        .map(|row| row.cells().iter().map(|c| c.to_string()).collect())
        .collect();
    (headers, rows)
}

// Headers and rows of the distribution table, one count column per bucket.
fn distribution_table(distribution: &DistributionTable) -> (Vec<String>, Vec<Vec<String>>) {
    let headers = std::iter::once("Class")
        .chain(GRADE_BUCKETS)
        .map(str::to_string)
        .collect();
    let rows = distribution
        .rows
        .iter()
        .map(|row| {
            std::iter::once(row.class.clone())
                .chain(row.counts.iter().map(u32::to_string))
                .collect()
        })
        .collect();
    (headers, rows)
}

// Escapes the characters that matter inside HTML text.
fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(ch),
        }
    }
    out
}

// Renders a bordered HTML table with a header row.
fn html_table((headers, rows): (Vec<String>, Vec<Vec<String>>)) -> String {
    let mut html = String::from("<table border=\"1\">\n  <thead>\n    <tr>");
    for header in &headers {
        html.push_str(&format!("<th>{}</th>", escape_html(header)));
    }
    html.push_str("</tr>\n  </thead>\n  <tbody>\n");
    for row in &rows {
        html.push_str("    <tr>");
        for cell in row {
            html.push_str(&format!("<td>{}</td>", escape_html(cell)));
        }
        html.push_str("</tr>\n");
    }
    html.push_str("  </tbody>\n</table>");
    html
}

// Wraps a fragment in a bare HTML document, one per MIME part.
fn html_document(body: &str) -> String {
    format!("<html>\n  <head></head>\n  <body>\n{body}\n  </body>\n</html>\n")
}

// The three HTML parts of a notification: grades, a blank spacer, the distribution.
pub fn html_parts(grades: &GradeSnapshot, distribution: &DistributionTable) -> [String; 3] {
    [
        html_document(&html_table(grade_table(grades))),
        html_document(""),
        html_document(&html_table(distribution_table(distribution))),
    ]
}

// Pads every column to its widest cell for console output.
fn text_table((headers, rows): (Vec<String>, Vec<Vec<String>>)) -> String {
    let mut widths: Vec<usize> = headers.iter().map(|h| h.chars().count()).collect();
    for row in &rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.chars().count());
        }
    }

    let line = |cells: &[String]| {
        cells
            .iter()
            .zip(&widths)
            .map(|(cell, width)| format!("{cell:<width$}"))
            .collect::<Vec<_>>()
            .join("  ")
            .trim_end()
            .to_string()
    };

    std::iter::once(line(headers.as_slice()))
        .chain(rows.iter().map(|row| line(row.as_slice())))
        .collect::<Vec<_>>()
        .join("\n")
}

// Both tables as aligned plain text, for the console.
pub fn console_tables(grades: &GradeSnapshot, distribution: &DistributionTable) -> String {
    format!(
        "{}\n\n{}\n",
        text_table(grade_table(grades)),
        text_table(distribution_table(distribution))
    )
}

// Parses an address, reporting a bad one as a config error.
fn mailbox(address: &str) -> Result<Mailbox> {
    address
        .parse()
        .map_err(|e| GradeError::Config(format!("invalid email address \"{address}\": {e}")))
}

// Builds the multipart notification: grades, spacer, distribution.
pub fn build_message(
    from: &Mailbox,
    to: &Mailbox,
    grades: &GradeSnapshot,
    distribution: &DistributionTable,
) -> Result<Message> {
    let [grades_part, spacer, distribution_part] = html_parts(grades, distribution);
    Message::builder()
        .from(from.clone())
        .to(to.clone())
        .subject(SUBJECT)
        .multipart(
            MultiPart::mixed()
                .singlepart(SinglePart::html(grades_part))
                .singlepart(SinglePart::html(spacer))
                .singlepart(SinglePart::html(distribution_part)),
        )
        .map_err(|e| GradeError::Delivery(format!("failed to build message: {e}")))
}

/// Sends notifications through an authenticated STARTTLS relay.
pub struct SmtpNotifier {
    mail: MailSettings,
    from: Mailbox,
    to: Mailbox,
    password: String,
}

impl SmtpNotifier {
    // Validates both addresses up front so a typo fails at startup.
    pub fn new(mail: MailSettings, password: String) -> Result<Self> {
        Ok(SmtpNotifier {
            from: mailbox(&mail.source_email)?,
            to: mailbox(&mail.target_email)?,
            mail,
            password,
        })
    }
}

#[async_trait(?Send)]
impl Notifier for SmtpNotifier {
    // Opens a STARTTLS session to the relay and sends one message.
    async fn notify(&self, grades: &GradeSnapshot, distribution: &DistributionTable) -> Result<()> {
        let message = build_message(&self.from, &self.to, grades, distribution)?;

        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&self.mail.smtp_host)
            .map_err(|e| GradeError::Delivery(format!("relay {}: {e}", self.mail.smtp_host)))?
            .port(self.mail.smtp_port)
            .credentials(SmtpCredentials::new(self.mail.source_email.clone(), self.password.clone()))
            .build();

        let response = transport
            .send(message)
            .await
            .map_err(|e| GradeError::Delivery(e.to_string()))?;
        info!("Relay accepted message: {}", response.code());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DistributionRow, GradeRow};

    fn tables() -> (GradeSnapshot, DistributionTable) {
        let grades = GradeSnapshot {
            rows: vec![GradeRow {
                class: "COMP248".into(),
                description: "Object-Oriented <Prog> I".into(),
                units: "3".into(),
                grading: "Graded".into(),
                letter_grade: "A".into(),
                grade_points: "4.3".into(),
            }],
        };
        let mut counts = [0; 16];
        counts[0] = 12;
        counts[13] = 1;
        let distribution = DistributionTable { rows: vec![DistributionRow { class: "COMP248".into(), counts }] };
        (grades, distribution)
    }

    fn mail() -> MailSettings {
        MailSettings {
            source_email: "bot@example.com".into(),
            target_email: "me@example.com".into(),
            smtp_host: "smtp.example.com".into(),
            smtp_port: 587,
        }
    }

    #[test]
    fn html_parts_hold_both_tables_and_a_spacer() {
        let (grades, distribution) = tables();
        let [first, spacer, last] = html_parts(&grades, &distribution);

        assert!(first.contains("<th>Letter Grade</th>"));
        assert!(first.contains("<td>COMP248</td>"));
        assert!(first.contains("Object-Oriented &lt;Prog&gt; I"));
        assert!(!spacer.contains("<table"));
        assert!(spacer.contains("<body>"));
        assert!(last.contains("<th>FNS</th>"));
        assert!(last.contains("<td>12</td>"));
    }

    #[test]
    fn console_tables_are_aligned() {
        let (grades, distribution) = tables();
        let text = console_tables(&grades, &distribution);
        let lines: Vec<&str> = text.lines().collect();

        assert!(lines[0].starts_with("Class    Description"));
        assert!(lines[1].starts_with("COMP248  Object-Oriented <Prog> I"));
        assert_eq!(lines[2], "");
        assert!(lines[3].starts_with("Class    A+  A  A-"));
        assert!(lines[4].starts_with("COMP248  12  0  0"));
    }

    #[test]
    fn message_has_three_html_parts() {
        let (grades, distribution) = tables();
        let from: Mailbox = "bot@example.com".parse().unwrap();
        let to: Mailbox = "me@example.com".parse().unwrap();
        let message = build_message(&from, &to, &grades, &distribution).unwrap();
        let raw = String::from_utf8(message.formatted()).unwrap();

        assert!(raw.contains("Subject: New Grade!"));
        assert!(raw.contains("multipart/mixed"));
        assert_eq!(raw.matches("Content-Type: text/html").count(), 3);
    }

    #[test]
    fn bad_address_is_a_config_error() {
        let mut mail = mail();
        assert!(SmtpNotifier::new(mail.clone(), "secret".into()).is_ok());
        mail.target_email = "not an address".into();
        assert!(matches!(SmtpNotifier::new(mail, "secret".into()), Err(GradeError::Config(_))));
    }
}
