//! Channel state: members, modes, topic, and the ban/except/invite lists.

use murmur_proto::{irc_to_lower, matches_hostmask};
use std::collections::{HashMap, HashSet};

use crate::error::JoinError;

/// Channel prefixes ordered strongest first: founder, protected,
/// operator, halfop, voice.
pub const PREFIX_ORDER: &str = "~&@%+";

/// The channel type character.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChanKind {
    /// `#` - network-wide.
    Remote,
    /// `&` - local to this server.
    Local,
}

impl ChanKind {
    /// Recognize a channel name's leading character.
    pub fn from_leading(c: char) -> Option<Self> {
        match c {
            '#' => Some(Self::Remote),
            '&' => Some(Self::Local),
            _ => None,
        }
    }
}

/// Whether a target string names a channel.
pub fn is_channel_name(target: &str) -> bool {
    target
        .chars()
        .next()
        .is_some_and(|c| ChanKind::from_leading(c).is_some())
}

/// One channel member. The client itself is reachable through the
/// registry by nick, which keeps membership and the client table free of
/// reference cycles.
#[derive(Debug, Clone)]
pub struct Member {
    /// Display-case nick.
    pub nick: String,
    /// Channel-scoped prefixes held, strongest first (subset of `~&@%+`).
    pub prefix: String,
}

impl Member {
    /// A newly joined member with no privileges.
    pub fn new(nick: impl Into<String>) -> Self {
        Self {
            nick: nick.into(),
            prefix: String::new(),
        }
    }

    /// The strongest prefix held, if any.
    pub fn highest_prefix(&self) -> Option<char> {
        PREFIX_ORDER.chars().find(|&p| self.prefix.contains(p))
    }

    /// Whether the member holds `prefix`.
    pub fn has_prefix(&self, prefix: char) -> bool {
        self.prefix.contains(prefix)
    }

    /// Operator-or-better: founder, protected or operator.
    pub fn is_op(&self) -> bool {
        self.prefix.contains(['~', '&', '@'])
    }

    /// Halfop-or-better, the bar for topic changes under +t.
    pub fn is_halfop(&self) -> bool {
        self.prefix.contains(['~', '&', '@', '%'])
    }

    /// Grant a prefix, keeping the string ordered strongest-first.
    pub fn grant(&mut self, prefix: char) {
        if !self.prefix.contains(prefix) {
            self.prefix = PREFIX_ORDER
                .chars()
                .filter(|&p| p == prefix || self.prefix.contains(p))
                .collect();
        }
    }

    /// Revoke a prefix.
    pub fn revoke(&mut self, prefix: char) {
        self.prefix.retain(|p| p != prefix);
    }
}

/// Channel flag modes.
#[derive(Debug, Default, Clone)]
pub struct ChannelModes {
    pub invite_only: bool, // +i
    pub moderated: bool,   // +m
    pub secret: bool,      // +s
    pub topic_lock: bool,  // +t
    pub no_external: bool, // +n
}

/// An entry in a ban, ban-exception or invite-exception list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListEntry {
    pub mask: String,
    pub set_by: String,
    pub set_at: i64,
}

/// A channel and everything scoped to it.
#[derive(Debug)]
pub struct Channel {
    /// Display name, type character included.
    pub name: String,
    pub kind: ChanKind,
    pub topic: Option<String>,
    pub modes: ChannelModes,
    pub key: Option<String>,
    pub limit: Option<usize>,
    pub bans: Vec<ListEntry>,
    pub excepts: Vec<ListEntry>,
    pub invex: Vec<ListEntry>,
    /// Case-folded nicks holding a standing invitation.
    pub invited: HashSet<String>,
    /// Case-folded nick → member.
    pub members: HashMap<String, Member>,
}

impl Channel {
    /// Create a channel from its display name. `None` when the name does
    /// not start with a channel type character.
    pub fn new(name: &str) -> Option<Self> {
        let kind = ChanKind::from_leading(name.chars().next()?)?;
        Some(Self {
            name: name.to_string(),
            kind,
            topic: None,
            modes: ChannelModes::default(),
            key: None,
            limit: None,
            bans: Vec::new(),
            excepts: Vec::new(),
            invex: Vec::new(),
            invited: HashSet::new(),
            members: HashMap::new(),
        })
    }

    /// Look up a member by nick (any case).
    pub fn member(&self, nick: &str) -> Option<&Member> {
        self.members.get(&irc_to_lower(nick))
    }

    /// Mutable member lookup.
    pub fn member_mut(&mut self, nick: &str) -> Option<&mut Member> {
        self.members.get_mut(&irc_to_lower(nick))
    }

    /// Whether `nick` is on the channel.
    pub fn is_member(&self, nick: &str) -> bool {
        self.members.contains_key(&irc_to_lower(nick))
    }

    /// Run the admission checks for a joining client, in order: key,
    /// limit, invite, ban.
    pub fn check_admission(
        &self,
        nick: &str,
        hostmask: &str,
        key: Option<&str>,
    ) -> Result<(), JoinError> {
        if let Some(required) = &self.key {
            if key != Some(required.as_str()) {
                return Err(JoinError::BadKey);
            }
        }

        if let Some(limit) = self.limit {
            if self.members.len() >= limit {
                return Err(JoinError::Full);
            }
        }

        if self.modes.invite_only {
            let invited = self.invited.contains(&irc_to_lower(nick))
                || self.invex.iter().any(|e| matches_hostmask(&e.mask, hostmask));
            if !invited {
                return Err(JoinError::InviteOnly);
            }
        }

        let banned = self.bans.iter().any(|e| matches_hostmask(&e.mask, hostmask));
        if banned && !self.excepts.iter().any(|e| matches_hostmask(&e.mask, hostmask)) {
            return Err(JoinError::Banned);
        }

        Ok(())
    }

    /// The member list for RPL_NAMREPLY. Clients with `multi-prefix` see
    /// every prefix a member holds; others only the highest.
    pub fn names(&self, multi_prefix: bool) -> String {
        let mut entries: Vec<String> = self
            .members
            .values()
            .map(|m| {
                if multi_prefix {
                    format!("{}{}", m.prefix, m.nick)
                } else {
                    match m.highest_prefix() {
                        Some(p) => format!("{p}{}", m.nick),
                        None => m.nick.clone(),
                    }
                }
            })
            .collect();
        entries.sort();
        entries.join(" ")
    }

    /// The set flag modes plus key/limit, for RPL_CHANNELMODEIS.
    pub fn mode_summary(&self) -> (String, Vec<String>) {
        let mut letters = String::from("+");
        let mut params = Vec::new();

        if self.modes.invite_only {
            letters.push('i');
        }
        if self.modes.moderated {
            letters.push('m');
        }
        if self.modes.secret {
            letters.push('s');
        }
        if self.modes.topic_lock {
            letters.push('t');
        }
        if self.modes.no_external {
            letters.push('n');
        }
        if let Some(key) = &self.key {
            letters.push('k');
            params.push(key.clone());
        }
        if let Some(limit) = self.limit {
            letters.push('l');
            params.push(limit.to_string());
        }

        (letters, params)
    }

    /// Add a mask to a list, keeping entries unique per mask.
    pub fn add_list_entry(list: &mut Vec<ListEntry>, entry: ListEntry) -> bool {
        if list.iter().any(|e| e.mask == entry.mask) {
            return false;
        }
        list.push(entry);
        true
    }

    /// Remove a mask from a list.
    pub fn remove_list_entry(list: &mut Vec<ListEntry>, mask: &str) -> bool {
        let before = list.len();
        list.retain(|e| e.mask != mask);
        list.len() != before
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(mask: &str) -> ListEntry {
        ListEntry {
            mask: mask.to_string(),
            set_by: "alice".to_string(),
            set_at: 0,
        }
    }

    #[test]
    fn channel_name_requires_type_char() {
        assert!(Channel::new("#room").is_some());
        assert!(Channel::new("&local").is_some());
        assert!(Channel::new("room").is_none());
        assert!(is_channel_name("#room"));
        assert!(!is_channel_name("alice"));
    }

    #[test]
    fn prefix_ordering_and_highest() {
        let mut m = Member::new("alice");
        assert_eq!(m.highest_prefix(), None);

        m.grant('+');
        m.grant('~');
        m.grant('@');
        assert_eq!(m.prefix, "~@+");
        assert_eq!(m.highest_prefix(), Some('~'));
        assert!(m.is_op());

        m.revoke('~');
        m.revoke('@');
        assert_eq!(m.highest_prefix(), Some('+'));
        assert!(!m.is_op());
        assert!(!m.is_halfop());
    }

    #[test]
    fn admission_check_order() {
        let mut ch = Channel::new("#room").unwrap();
        ch.key = Some("sekrit".to_string());
        ch.limit = Some(1);
        ch.modes.invite_only = true;
        ch.bans.push(entry("*!*@banned.example"));

        // key first
        assert_eq!(
            ch.check_admission("bob", "bob!b@h", None),
            Err(JoinError::BadKey)
        );

        // then limit
        ch.members.insert("alice".into(), Member::new("alice"));
        assert_eq!(
            ch.check_admission("bob", "bob!b@h", Some("sekrit")),
            Err(JoinError::Full)
        );

        // then invite
        ch.limit = None;
        assert_eq!(
            ch.check_admission("bob", "bob!b@h", Some("sekrit")),
            Err(JoinError::InviteOnly)
        );

        // invited nick passes the invite gate
        ch.invited.insert("bob".into());
        assert_eq!(ch.check_admission("bob", "bob!b@h", Some("sekrit")), Ok(()));

        // then ban
        assert_eq!(
            ch.check_admission("bob", "bob!b@banned.example", Some("sekrit")),
            Err(JoinError::Banned)
        );

        // except mask overrides the ban
        ch.excepts.push(entry("bob!*@*"));
        assert_eq!(
            ch.check_admission("bob", "bob!b@banned.example", Some("sekrit")),
            Ok(())
        );
    }

    #[test]
    fn invite_exception_mask_passes_invite_only() {
        let mut ch = Channel::new("#room").unwrap();
        ch.modes.invite_only = true;
        ch.invex.push(entry("*!*@trusted.example"));

        assert_eq!(
            ch.check_admission("bob", "bob!b@trusted.example", None),
            Ok(())
        );
        assert_eq!(
            ch.check_admission("bob", "bob!b@other.example", None),
            Err(JoinError::InviteOnly)
        );
    }

    #[test]
    fn names_respects_multi_prefix() {
        let mut ch = Channel::new("#room").unwrap();
        let mut alice = Member::new("alice");
        alice.grant('@');
        alice.grant('+');
        ch.members.insert("alice".into(), alice);
        ch.members.insert("bob".into(), Member::new("bob"));

        assert_eq!(ch.names(false), "@alice bob");
        assert_eq!(ch.names(true), "@+alice bob");
    }

    #[test]
    fn list_entries_are_unique_per_mask() {
        let mut list = Vec::new();
        assert!(Channel::add_list_entry(&mut list, entry("*!*@a")));
        assert!(!Channel::add_list_entry(&mut list, entry("*!*@a")));
        assert_eq!(list.len(), 1);
        assert!(Channel::remove_list_entry(&mut list, "*!*@a"));
        assert!(!Channel::remove_list_entry(&mut list, "*!*@a"));
    }

    #[test]
    fn mode_summary_includes_key_and_limit() {
        let mut ch = Channel::new("#room").unwrap();
        ch.modes.no_external = true;
        ch.modes.topic_lock = true;
        ch.key = Some("k".to_string());
        ch.limit = Some(5);

        let (letters, params) = ch.mode_summary();
        assert_eq!(letters, "+tnkl");
        assert_eq!(params, vec!["k".to_string(), "5".to_string()]);
    }
}
