//! Per-type rendering of the subject, call-to-action and bodies every driver
//! sends.

use std::sync::LazyLock;

use courier_db::models::{Notification, NotificationType, Priority};
use regex::Regex;
use serde::Serialize;
use serde_json::{Map, Value};

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{([A-Za-z0-9_]+)\}").expect("valid placeholder regex"));

/// Longest SMS body sent in one segment.
pub const SMS_MAX_CHARS: usize = 160;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypeTemplate {
    pub subject: &'static str,
    pub cta_text: &'static str,
    pub cta_path: &'static str,
}

pub fn template_for(notification_type: NotificationType) -> TypeTemplate {
    let (subject, cta_text, cta_path) = match notification_type {
        NotificationType::Match => ("💕 New Match", "View Match", "/matches/{matchId}"),
        NotificationType::Like => ("❤️ Someone Likes You", "See Who Liked You", "/likes"),
        NotificationType::Message => (
            "💬 New Message",
            "Read Message",
            "/conversations/{conversationId}",
        ),
        NotificationType::System => ("📢 System Notification", "Learn More", "/notifications"),
        NotificationType::Payment => ("💳 Payment Update", "View Payment Details", "/payment/history"),
        NotificationType::Security => ("🔒 Security Alert", "Review Security", "/security"),
        NotificationType::DateRequest => ("📅 New Date Request", "Respond to Request", "/dates/{dateId}"),
        NotificationType::DateAccepted => ("🎉 Date Accepted", "View Date", "/dates/{dateId}"),
        NotificationType::DateDeclined => ("📅 Date Declined", "View Dates", "/dates"),
        NotificationType::DateCanceled => ("❌ Date Canceled", "View Dates", "/dates"),
        NotificationType::DateReminder => ("⏰ Date Reminder", "View Date Details", "/dates/{dateId}"),
    };
    TypeTemplate {
        subject,
        cta_text,
        cta_path,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallToAction {
    pub text: String,
    pub url: String,
}

/// Everything a driver needs to send one notification. Rendered once per
/// dispatch and reused unchanged by every retry.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderedPayload {
    pub notification_id: String,
    #[serde(rename = "type")]
    pub notification_type: NotificationType,
    pub priority: Priority,
    pub title: String,
    pub message: String,
    pub subject: String,
    pub cta: CallToAction,
    pub metadata: Map<String, Value>,
    #[serde(skip)]
    pub html: String,
    #[serde(skip)]
    pub text: String,
    #[serde(skip)]
    pub sms_body: String,
    /// Whether the durable record exists; the in-app channel depends on it.
    #[serde(skip)]
    pub saved: bool,
    pub created_at: String,
}

#[derive(Debug, Clone)]
pub struct TemplateRenderer {
    app_name: String,
    app_url: String,
}

impl TemplateRenderer {
    pub fn new(app_name: impl Into<String>, app_url: impl Into<String>) -> Self {
        Self {
            app_name: app_name.into(),
            app_url: app_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn render(&self, notification: &Notification, saved: bool) -> RenderedPayload {
        let template = template_for(notification.notification_type);
        let path = notification
            .metadata
            .get("action_url")
            .and_then(Value::as_str)
            .unwrap_or(template.cta_path);
        let url = self.absolute(&substitute(path, &notification.metadata));
        let cta = CallToAction {
            text: template.cta_text.to_string(),
            url,
        };
        let subject = format!("{}: {}", template.subject, notification.title);

        RenderedPayload {
            notification_id: notification.notification_id.clone(),
            notification_type: notification.notification_type,
            priority: notification.priority,
            title: notification.title.clone(),
            message: notification.message.clone(),
            html: self.html(&subject, notification, &cta),
            text: format!(
                "{}\n\n{}\n\n{}: {}\n\n{}",
                notification.title, notification.message, cta.text, cta.url, self.app_name
            ),
            sms_body: self.sms(notification),
            subject,
            cta,
            metadata: notification.metadata.clone(),
            saved,
            created_at: notification.created_at.try_to_rfc3339_string().unwrap_or_default(),
        }
    }

    fn absolute(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            path.to_string()
        } else if path.starts_with('/') {
            format!("{}{path}", self.app_url)
        } else {
            format!("{}/{path}", self.app_url)
        }
    }

    fn html(&self, subject: &str, notification: &Notification, cta: &CallToAction) -> String {
        let accent = match notification.priority {
            Priority::Urgent => "#d93025",
            Priority::High => "#e8710a",
            Priority::Normal | Priority::Low => "#e91e63",
        };
        format!(
            r#"<!DOCTYPE html>
<html>
<head><meta charset="utf-8"><title>{subject}</title></head>
<body style="margin:0;padding:0;background:#f6f6f6;font-family:Helvetica,Arial,sans-serif;">
  <div style="max-width:600px;margin:24px auto;background:#ffffff;border-radius:8px;overflow:hidden;">
    <div style="background:{accent};color:#ffffff;padding:20px 24px;font-size:20px;">{app}</div>
    <div style="padding:24px;color:#333333;">
      <h2 style="margin-top:0;">{title}</h2>
      <p style="font-size:15px;line-height:1.5;">{message}</p>
      <a href="{url}" style="display:inline-block;margin-top:16px;padding:12px 20px;background:{accent};color:#ffffff;text-decoration:none;border-radius:4px;">{cta}</a>
    </div>
    <div style="padding:16px 24px;font-size:12px;color:#999999;">You received this email because notifications are enabled for your {app} account.</div>
  </div>
</body>
</html>"#,
            subject = escape_html(subject),
            accent = accent,
            app = escape_html(&self.app_name),
            title = escape_html(&notification.title),
            message = escape_html(&notification.message),
            url = escape_html(&cta.url),
            cta = escape_html(&cta.text),
        )
    }

    fn sms(&self, notification: &Notification) -> String {
        let line = format!("{}: {} - {}", self.app_name, notification.title, notification.message)
            .replace(['\n', '\r'], " ");
        truncate_chars(&line, SMS_MAX_CHARS)
    }
}

/// Replaces `{key}` with the URL-encoded metadata value. Placeholders without
/// a value are removed and the resulting empty path segments collapsed.
pub fn substitute(template: &str, metadata: &Map<String, Value>) -> String {
    let replaced = PLACEHOLDER.replace_all(template, |caps: &regex::Captures<'_>| {
        match metadata.get(&caps[1]) {
            Some(Value::String(s)) => urlencoding::encode(s).into_owned(),
            Some(Value::Number(n)) => n.to_string(),
            Some(Value::Bool(b)) => b.to_string(),
            _ => String::new(),
        }
    });

    let (scheme, rest) = match replaced.find("://") {
        Some(idx) => replaced.split_at(idx + 3),
        None => ("", &*replaced),
    };
    let mut path = rest.to_string();
    while path.contains("//") {
        path = path.replace("//", "/");
    }
    if path.len() > 1 && path.ends_with('/') {
        path.pop();
    }
    format!("{scheme}{path}")
}

pub fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

fn truncate_chars(input: &str, max: usize) -> String {
    if input.chars().count() <= max {
        return input.to_string();
    }
    let mut out: String = input.chars().take(max - 3).collect();
    out.push_str("...");
    out
}
