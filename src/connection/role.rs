//! WebSocket connection role (client or server).

use crate::config::Config;

/// WebSocket connection role.
///
/// Determines the default masking behavior per RFC 6455.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Client role - masks outgoing frames by default.
    Client,
    /// Server role - sends unmasked frames by default.
    Server,
}

impl Role {
    /// Check if this role must mask outgoing frames.
    ///
    /// Clients must mask all frames sent to servers.
    #[inline]
    #[must_use]
    pub const fn must_mask(&self) -> bool {
        matches!(self, Role::Client)
    }

    /// Whether outgoing frames are masked under `config`.
    ///
    /// [`Config::mask_frames`] wins over the role default when set.
    #[must_use]
    pub fn masks_with(&self, config: &Config) -> bool {
        config.mask_frames.unwrap_or_else(|| self.must_mask())
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Client => write!(f, "client"),
            Role::Server => write!(f, "server"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_must_mask() {
        assert!(Role::Client.must_mask());
        assert!(!Role::Server.must_mask());
    }

    #[test]
    fn test_masking_follows_role_by_default() {
        assert!(Role::Client.masks_with(&Config::client()));
        assert!(!Role::Server.masks_with(&Config::server()));
    }

    #[test]
    fn test_masking_override() {
        let config = Config::server().with_mask_frames(true);
        assert!(Role::Server.masks_with(&config));

        let config = Config::client().with_mask_frames(false);
        assert!(!Role::Client.masks_with(&config));
    }

    #[test]
    fn test_role_display() {
        assert_eq!(Role::Client.to_string(), "client");
        assert_eq!(Role::Server.to_string(), "server");
    }
}
