//! Stream identity: the `(vhost, app, stream)` tuple that names a Source.

use std::fmt;

/// Sentinel vhost name used when the publisher's connection did not
/// negotiate an explicit one. Kept out of the rendered URL, matching how
/// the original server treats its default-vhost sentinel.
pub const DEFAULT_VHOST: &str = "__defaultVhost__";

/// Identifies a single live stream: `/<app>/<stream>` resolved against a
/// vhost. Two `StreamIdentity` values are equal iff they name the same
/// Source.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamIdentity {
    pub vhost: String,
    pub app: String,
    pub stream: String,
}

impl StreamIdentity {
    pub fn new(vhost: impl Into<String>, app: impl Into<String>, stream: impl Into<String>) -> Self {
        Self {
            vhost: vhost.into(),
            app: app.into(),
            stream: stream.into(),
        }
    }

    /// Build an identity against the default vhost.
    pub fn default_vhost(app: impl Into<String>, stream: impl Into<String>) -> Self {
        Self::new(DEFAULT_VHOST, app, stream)
    }

    pub fn is_default_vhost(&self) -> bool {
        self.vhost == DEFAULT_VHOST
    }

    /// The canonical `/<app>/<stream>` URL, as used in log lines, hook
    /// payloads, and path templates.
    pub fn canonical_url(&self) -> String {
        format!("/{}/{}", self.app, self.stream)
    }
}

impl fmt::Display for StreamIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_default_vhost() {
            write!(f, "{}", self.canonical_url())
        } else {
            write!(f, "{}/{}/{}", self.vhost, self.app, self.stream)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_vhost_renders_without_vhost_segment() {
        let id = StreamIdentity::default_vhost("live", "a");
        assert_eq!(id.to_string(), "/live/a");
    }

    #[test]
    fn custom_vhost_renders_with_vhost_segment() {
        let id = StreamIdentity::new("example.com", "live", "a");
        assert_eq!(id.to_string(), "example.com/live/a");
    }

    #[test]
    fn equality_is_by_full_tuple() {
        let a = StreamIdentity::default_vhost("live", "a");
        let b = StreamIdentity::default_vhost("live", "b");
        assert_ne!(a, b);
        assert_eq!(a, StreamIdentity::default_vhost("live", "a"));
    }
}
