//! IRCv3 capability names.

use std::fmt;

/// A capability the server implements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Cap {
    /// `away-notify` - AWAY changes fan out to common channels.
    AwayNotify,
    /// `cap-notify` - CAP NEW/DEL notifications.
    CapNotify,
    /// `chghost` - user/host change notification.
    Chghost,
    /// `echo-message` - sender receives its own PRIVMSG/NOTICE.
    EchoMessage,
    /// `message-tags` - enables the 8,191-byte tag section on input.
    MessageTags,
    /// `multi-prefix` - NAMES/WHO list every prefix, not just the highest.
    MultiPrefix,
    /// `sasl` - SASL authentication during registration.
    Sasl,
    /// `server-time` - outgoing lines carry an `@time=` tag.
    ServerTime,
    /// `setname` - realname changes via SETNAME.
    Setname,
    /// `sts` - strict transport security policy.
    Sts,
}

impl Cap {
    /// Every capability, in advertisement order.
    pub const ALL: [Cap; 10] = [
        Cap::AwayNotify,
        Cap::CapNotify,
        Cap::Chghost,
        Cap::EchoMessage,
        Cap::MessageTags,
        Cap::MultiPrefix,
        Cap::Sasl,
        Cap::ServerTime,
        Cap::Setname,
        Cap::Sts,
    ];

    /// The wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            Cap::AwayNotify => "away-notify",
            Cap::CapNotify => "cap-notify",
            Cap::Chghost => "chghost",
            Cap::EchoMessage => "echo-message",
            Cap::MessageTags => "message-tags",
            Cap::MultiPrefix => "multi-prefix",
            Cap::Sasl => "sasl",
            Cap::ServerTime => "server-time",
            Cap::Setname => "setname",
            Cap::Sts => "sts",
        }
    }

    /// Look up a capability by its wire name.
    pub fn from_name(name: &str) -> Option<Cap> {
        Cap::ALL.iter().copied().find(|c| c.as_str() == name)
    }
}

impl fmt::Display for Cap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
