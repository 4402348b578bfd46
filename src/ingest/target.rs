//! Effective capture target for a slot.

use crate::config::CameraSlotConfig;

/// Address value that selects the kiosk's local capture device.
pub const LOCAL_DEVICE_SENTINEL: &str = "0";

/// What a slot's configured address resolves to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SourceTarget {
    /// Slot is unconfigured; no capture, no result.
    Skip,
    /// Local default capture device (device path from config).
    LocalDevice(String),
    Url(String),
}

impl SourceTarget {
    pub fn resolve(slot: &CameraSlotConfig) -> Self {
        let address = slot.address.trim();
        if address.is_empty() {
            return Self::Skip;
        }
        if address == LOCAL_DEVICE_SENTINEL {
            return Self::LocalDevice(slot.local_device.clone());
        }
        if address.contains("://") {
            return Self::Url(address.to_string());
        }
        Self::Url(expand_template(
            &slot.url_template,
            &slot.user,
            &slot.pass,
            address,
        ))
    }
}

/// Substitute `{user}`, `{pass}` and `{host}` into `template`.
pub fn expand_template(template: &str, user: &str, pass: &str, host: &str) -> String {
    template
        .replace("{user}", user)
        .replace("{pass}", pass)
        .replace("{host}", host)
}

/// URL with any userinfo masked, for logs.
pub fn redact_url(url: &str) -> String {
    match url::Url::parse(url) {
        Ok(mut parsed) if parsed.password().is_some() => {
            let _ = parsed.set_password(Some("***"));
            parsed.to_string()
        }
        _ => url.to_string(),
    }
}
