//! Platform permission bits.
//!
//! Only the bits the access layer reads are named; the rest of the mask is
//! carried through untouched.

use bitflags::bitflags;

bitflags! {
    /// Permission mask as reported by the platform for a member of a community.
    ///
    /// Transported as a decimal string by the platform API.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct PlatformPermissions: u64 {
        const CREATE_INSTANT_INVITE = 1 << 0;
        const KICK_MEMBERS          = 1 << 1;
        const BAN_MEMBERS           = 1 << 2;
        /// Grants every permission and bypasses channel overwrites.
        const ADMINISTRATOR         = 1 << 3;
        const MANAGE_CHANNELS       = 1 << 4;
        const MANAGE_GUILD          = 1 << 5;
        const VIEW_AUDIT_LOG        = 1 << 7;
        const MANAGE_MESSAGES       = 1 << 13;
        const MANAGE_ROLES          = 1 << 28;
        const MODERATE_MEMBERS      = 1 << 40;

        // Keep unknown bits when round-tripping masks.
        const _ = !0;
    }
}

impl PlatformPermissions {
    /// Whether the administrator bit is present.
    #[must_use]
    pub const fn is_administrator(self) -> bool {
        self.contains(Self::ADMINISTRATOR)
    }

    /// Parse the platform's decimal string encoding.
    ///
    /// Unparseable input yields an empty mask, never a privileged one.
    #[must_use]
    pub fn from_api_string(raw: &str) -> Self {
        raw.trim()
            .parse::<u64>()
            .map(Self::from_bits_retain)
            .unwrap_or_else(|_| Self::empty())
    }
}
