use std::time::{Duration, Instant};

use netsplit_common::RetryPolicy;

use crate::{Error, Result};

/// The default helper image. It ships `iptables`, `ip6tables` and their `-save` variants.
pub const DEFAULT_IMAGE: &str = "altinityinfra/integration-helper";

/// How much longer a sandbox must stay alive after it expires. A command issued just before
/// expiry can still complete before the container exits on its own.
pub const LIFETIME_MARGIN: Duration = Duration::from_secs(15);

#[derive(Debug, Clone)]
pub struct SandboxOptions {
    /// Image repository.
    pub image: String,
    /// Image tag.
    pub tag: String,
    /// After this long the sandbox is replaced on the next call.
    pub expire_timeout: Duration,
    /// After this long the sandbox exits by itself. Must be at least `expire_timeout` plus
    /// [`LIFETIME_MARGIN`].
    pub exit_timeout: Duration,
    /// Retries for pulling the image and creating the container.
    pub retry: RetryPolicy,
    /// Retries for removing an expired container.
    pub remove_retry: RetryPolicy,
    /// Prefix of the container names.
    pub name_prefix: String,
}

impl Default for SandboxOptions {
    fn default() -> Self {
        Self {
            image: DEFAULT_IMAGE.to_string(),
            tag: "latest".to_string(),
            expire_timeout: Duration::from_secs(600),
            exit_timeout: Duration::from_secs(660),
            retry: RetryPolicy::linear(5, Duration::from_secs(1)),
            remove_retry: RetryPolicy::linear(5, Duration::from_secs(1)),
            name_prefix: "netsplit-helper".to_string(),
        }
    }
}

impl SandboxOptions {
    /// Default options, with the image overridden by `NETSPLIT_HELPER_IMAGE` and the tag by
    /// `DOCKER_HELPER_TAG`, if set.
    pub fn from_env() -> Self {
        let mut options = Self::default();

        if let Some(image) = non_empty_var("NETSPLIT_HELPER_IMAGE") {
            options.image = image;
        }
        if let Some(tag) = non_empty_var("DOCKER_HELPER_TAG") {
            options.tag = tag;
        }

        options
    }

    pub fn with_image(mut self, image: impl Into<String>) -> Self {
        self.image = image.into();
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = tag.into();
        self
    }

    /// Sets both the expire and the exit timeout.
    pub fn with_timeouts(mut self, expire: Duration, exit: Duration) -> Self {
        self.expire_timeout = expire;
        self.exit_timeout = exit;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_remove_retry(mut self, retry: RetryPolicy) -> Self {
        self.remove_retry = retry;
        self
    }

    /// The full image reference, `image:tag`.
    pub fn image_ref(&self) -> String {
        format!("{}:{}", self.image, self.tag)
    }

    /// Checks that the sandbox outlives its expiry by at least [`LIFETIME_MARGIN`], and that both
    /// deadlines can be represented.
    pub fn validate(&self) -> Result<()> {
        let fits = self
            .expire_timeout
            .checked_add(LIFETIME_MARGIN)
            .is_some_and(|min_exit| self.exit_timeout >= min_exit) &&
            Instant::now().checked_add(self.exit_timeout).is_some();

        if !fits {
            return Err(self.invalid_lifetime());
        }

        Ok(())
    }

    /// The lifetime of the sandbox process in whole seconds, rounded up.
    pub(crate) fn exit_secs(&self) -> u64 {
        let secs = self.exit_timeout.as_secs();
        if self.exit_timeout.subsec_nanos() > 0 {
            secs.saturating_add(1)
        } else {
            secs
        }
    }

    pub(crate) fn invalid_lifetime(&self) -> Error {
        Error::InvalidLifetime {
            expire: self.expire_timeout,
            exit: self.exit_timeout,
            margin: LIFETIME_MARGIN,
        }
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}
