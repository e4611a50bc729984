//! Password reset delivery.

use async_trait::async_trait;
use tracing::info;

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send_password_reset(&self, to: &str, username: &str, link: &str) -> anyhow::Result<()>;
}

/// Writes the reset link to the log instead of sending mail.
#[derive(Debug, Default, Clone)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send_password_reset(&self, to: &str, username: &str, link: &str) -> anyhow::Result<()> {
        info!(to, username, link, "Password reset requested");
        Ok(())
    }
}

/// `{app_url}/reset-password?token={token}`
pub fn reset_link(app_url: &str, token: &str) -> String {
    format!("{}/reset-password?token={}", app_url.trim_end_matches('/'), token)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reset_link() {
        assert_eq!(
            reset_link("http://localhost:3000/", "abc"),
            "http://localhost:3000/reset-password?token=abc"
        );
    }
}
