//! SMTP delivery tool built on `lettre`.
//!
//! Requires a complete SMTP section in the communication config. Supports
//! plain, STARTTLS, and implicit-TLS transports, multipart plain/HTML
//! bodies, and file attachments named by a JSON array of paths. The
//! blocking transport runs inside `spawn_blocking`.

use std::path::Path;

use lettre::message::header::ContentType;
use lettre::message::{Attachment, Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use serde_json::{json, Value};
use tracing::instrument;

use crate::config::{load_communication_config, resolve_smtp_config, ResolvedSmtpConfig};
use crate::kernel::context::ToolRuntimeContext;
use crate::types::JsonMap;

fn opt_str(value: Option<&Value>) -> Option<String> {
    value
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
}

/// Split a CSV recipient list into trimmed, non-empty addresses.
pub fn parse_csv_emails(raw: Option<&str>) -> Vec<String> {
    raw.map(|raw| {
        raw.split(',')
            .map(str::trim)
            .filter(|item| !item.is_empty())
            .map(str::to_owned)
            .collect()
    })
    .unwrap_or_default()
}

/// Parse a JSON array of non-empty strings; `None` input means "no
/// attachments", a malformed value returns `None` for the caller to
/// reject.
pub fn parse_string_list_json(raw: Option<&str>) -> Option<Vec<String>> {
    let Some(raw) = raw else {
        return Some(Vec::new());
    };
    let parsed: Value = serde_json::from_str(raw).ok()?;
    let items = parsed.as_array()?;
    let mut output = Vec::with_capacity(items.len());
    for item in items {
        let text = item.as_str()?.trim();
        if text.is_empty() {
            return None;
        }
        output.push(text.to_owned());
    }
    Some(output)
}

/// Send an email through the configured SMTP settings.
///
/// `args`: `to_emails` (CSV), `subject`, `body_text`, optional
/// `body_html`, `cc_emails`, `bcc_emails`, `attachment_paths_json`.
#[instrument(skip(ctx, args), fields(tool = "send_email_smtp"))]
pub async fn send_email_smtp(ctx: &ToolRuntimeContext, args: &JsonMap) -> Result<Value, String> {
    let config = load_communication_config(ctx.communication_config_path.as_deref());
    let smtp = resolve_smtp_config(&config);

    let (Some(host), Some(port), Some(from_email)) =
        (smtp.host.clone(), smtp.port, smtp.from_email.clone())
    else {
        return Ok(json!({
            "status": "not_configured",
            "reason": "smtp_config_incomplete",
        }));
    };

    let to_list = parse_csv_emails(opt_str(args.get("to_emails")).as_deref());
    let cc_list = parse_csv_emails(opt_str(args.get("cc_emails")).as_deref());
    let bcc_list = parse_csv_emails(opt_str(args.get("bcc_emails")).as_deref());
    if to_list.is_empty() && cc_list.is_empty() && bcc_list.is_empty() {
        return Ok(json!({"status": "failed", "reason": "no_recipients"}));
    }

    let raw_attachments = opt_str(args.get("attachment_paths_json"));
    let Some(attachment_paths) = parse_string_list_json(raw_attachments.as_deref()) else {
        return Ok(json!({
            "status": "failed",
            "reason": "invalid_attachment_paths_json",
        }));
    };

    let subject = opt_str(args.get("subject")).unwrap_or_default();
    let body_text = opt_str(args.get("body_text")).unwrap_or_default();
    let body_html = opt_str(args.get("body_html"));

    let outcome = tokio::task::spawn_blocking(move || {
        send_blocking(
            &smtp,
            &host,
            port,
            &from_email,
            &to_list,
            &cc_list,
            &bcc_list,
            &subject,
            &body_text,
            body_html.as_deref(),
            &attachment_paths,
        )
    })
    .await
    .map_err(|e| format!("smtp_worker_failed:{e}"))?;
    Ok(outcome)
}

#[allow(clippy::too_many_arguments)]
fn send_blocking(
    smtp: &ResolvedSmtpConfig,
    host: &str,
    port: u16,
    from_email: &str,
    to_list: &[String],
    cc_list: &[String],
    bcc_list: &[String],
    subject: &str,
    body_text: &str,
    body_html: Option<&str>,
    attachment_paths: &[String],
) -> Value {
    let from_mailbox: Mailbox = {
        let rendered = match &smtp.from_name {
            Some(name) => format!("{name} <{from_email}>"),
            None => from_email.to_owned(),
        };
        match rendered.parse() {
            Ok(mailbox) => mailbox,
            Err(_) => {
                return json!({"status": "failed", "reason": "invalid_from_address"});
            }
        }
    };

    let mut builder = Message::builder().from(from_mailbox).subject(subject);
    for (header, addresses) in [("to", to_list), ("cc", cc_list), ("bcc", bcc_list)] {
        for address in addresses {
            let Ok(mailbox) = address.parse::<Mailbox>() else {
                return json!({
                    "status": "failed",
                    "reason": format!("invalid_recipient:{address}"),
                });
            };
            builder = match header {
                "to" => builder.to(mailbox),
                "cc" => builder.cc(mailbox),
                _ => builder.bcc(mailbox),
            };
        }
    }

    let body_part = match body_html {
        Some(html) => {
            MultiPart::alternative_plain_html(body_text.to_owned(), html.to_owned())
        }
        None => MultiPart::mixed().singlepart(
            SinglePart::builder()
                .header(ContentType::TEXT_PLAIN)
                .body(body_text.to_owned()),
        ),
    };

    let mut mixed = MultiPart::mixed().multipart(body_part);
    let mut attachment_count = 0usize;
    for raw_path in attachment_paths {
        let path = Path::new(raw_path);
        if !path.is_file() {
            return json!({
                "status": "failed",
                "reason": "attachment_not_found",
                "path": raw_path,
            });
        }
        let Ok(bytes) = std::fs::read(path) else {
            return json!({
                "status": "failed",
                "reason": "attachment_not_found",
                "path": raw_path,
            });
        };
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "attachment".to_owned());
        let content_type = ContentType::parse("application/octet-stream")
            .unwrap_or(ContentType::TEXT_PLAIN);
        mixed = mixed.singlepart(Attachment::new(filename).body(bytes, content_type));
        attachment_count += 1;
    }

    let message = match builder.multipart(mixed) {
        Ok(message) => message,
        Err(error) => {
            return json!({
                "status": "failed",
                "reason": format!("smtp_send_failed:{error}"),
            });
        }
    };

    let transport = match build_transport(smtp, host, port) {
        Ok(transport) => transport,
        Err(reason) => {
            return json!({"status": "failed", "reason": reason});
        }
    };

    match transport.send(&message) {
        Ok(_) => json!({
            "status": "ok",
            "subject": subject,
            "recipient_count": to_list.len() + cc_list.len() + bcc_list.len(),
            "attachment_count": attachment_count,
        }),
        Err(error) => json!({
            "status": "failed",
            "reason": format!("smtp_send_failed:{error}"),
        }),
    }
}

fn build_transport(
    smtp: &ResolvedSmtpConfig,
    host: &str,
    port: u16,
) -> Result<SmtpTransport, String> {
    let mut builder = if smtp.use_ssl {
        SmtpTransport::relay(host).map_err(|e| format!("smtp_send_failed:{e}"))?
    } else if smtp.use_tls {
        SmtpTransport::starttls_relay(host).map_err(|e| format!("smtp_send_failed:{e}"))?
    } else {
        SmtpTransport::builder_dangerous(host)
    };
    builder = builder.port(port);
    if let Some(username) = &smtp.username {
        builder = builder.credentials(Credentials::new(
            username.clone(),
            smtp.password.clone().unwrap_or_default(),
        ));
    }
    Ok(builder.build())
}
