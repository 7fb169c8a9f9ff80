//! Photo notifiers over HTTP.
//!
//! Both post a `multipart/form-data` body with the blocking `reqwest` client. A notifier without credentials
//! reports `is_configured() == false` and is skipped by the distributor.

use anyhow::{anyhow, Context, Result};
use reqwest::blocking::multipart::{Form, Part};
use reqwest::blocking::Client;
use std::path::Path;
use std::time::Duration;

use super::Notifier;
use crate::config::NotifySettings;

const HTTP_TIMEOUT: Duration = Duration::from_secs(15);

// ----------------------------------------------------------------------------
// Telegram
// ----------------------------------------------------------------------------

#[derive(Clone, Debug)]
pub struct TelegramNotifier {
    api_base: String,
    token: Option<String>,
    chat_id: Option<String>,
}

impl TelegramNotifier {
    pub fn new(
        api_base: impl Into<String>,
        token: Option<String>,
        chat_id: Option<String>,
    ) -> Self {
        Self {
            api_base: api_base.into().trim_end_matches('/').to_string(),
            token,
            chat_id,
        }
    }

    pub fn from_settings(settings: &NotifySettings) -> Self {
        Self::new(
            settings.telegram_api.clone(),
            settings.telegram_token.clone(),
            settings.telegram_chat_id.clone(),
        )
    }

    fn endpoint(&self, token: &str) -> String {
        format!("{}/bot{}/sendPhoto", self.api_base, token)
    }
}

impl Notifier for TelegramNotifier {
    fn name(&self) -> &str {
        "telegram"
    }

    fn is_configured(&self) -> bool {
        self.token.is_some() && self.chat_id.is_some()
    }

    fn send(&self, photo: &Path, caption: &str) -> Result<()> {
        let (Some(token), Some(chat_id)) = (&self.token, &self.chat_id) else {
            return Err(anyhow!("telegram notifier is not configured"));
        };
        let form = Form::new()
            .text("chat_id", chat_id.clone())
            .text("caption", caption.to_string())
            .part("photo", photo_part(photo)?);
        post_form(&self.endpoint(token), form).context("telegram sendPhoto")
    }
}

// ----------------------------------------------------------------------------
// Discord
// ----------------------------------------------------------------------------

#[derive(Clone, Debug)]
pub struct DiscordNotifier {
    webhook_url: Option<String>,
}

impl DiscordNotifier {
    pub fn new(webhook_url: Option<String>) -> Self {
        Self { webhook_url }
    }

    pub fn from_settings(settings: &NotifySettings) -> Self {
        Self::new(settings.discord_webhook_url.clone())
    }
}

impl Notifier for DiscordNotifier {
    fn name(&self) -> &str {
        "discord"
    }

    fn is_configured(&self) -> bool {
        self.webhook_url.is_some()
    }

    fn send(&self, photo: &Path, caption: &str) -> Result<()> {
        let Some(url) = &self.webhook_url else {
            return Err(anyhow!("discord notifier is not configured"));
        };
        let form = Form::new()
            .text("content", caption.to_string())
            .part("file", photo_part(photo)?);
        post_form(url, form).context("discord webhook")
    }
}

// ----------------------------------------------------------------------------
// HTTP
// ----------------------------------------------------------------------------

fn photo_part(path: &Path) -> Result<Part> {
    let bytes = std::fs::read(path).with_context(|| format!("read photo {}", path.display()))?;
    let part = Part::bytes(bytes)
        .file_name(file_name(path))
        .mime_str("image/jpeg")?;
    Ok(part)
}

fn post_form(url: &str, form: Form) -> Result<()> {
    let client = Client::builder()
        .timeout(HTTP_TIMEOUT)
        .build()
        .context("build http client")?;
    client
        .post(url)
        .multipart(form)
        .send()?
        .error_for_status()?;
    Ok(())
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "motion.jpg".to_string())
}
