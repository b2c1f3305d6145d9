//! Mode-string parsing.
//!
//! A mode string like `+itk-b` with optional positional arguments parses
//! into an ordered list of [`ModeChange`] operations. A leading `+`/`-`
//! sets the direction; each later sign flips it; every letter inherits
//! the current direction and, when its descriptor says so, consumes the
//! next positional argument.

/// Which mode table to consult when deciding argument consumption.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeKind {
    /// User modes: `i o O r w`.
    User,
    /// Channel modes: `b e I l i k m s t n` and prefixes `q a o h v`.
    Channel,
}

/// One mode operation in wire order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModeChange {
    /// `true` for `+`, `false` for `-`.
    pub add: bool,
    /// The mode letter.
    pub mode: char,
    /// The consumed positional argument, if the mode takes one.
    pub param: Option<String>,
}

/// User mode letters the server recognizes.
pub const USER_MODES: &str = "ioOrw";

/// Channel mode letters the server recognizes (flag and parameter modes).
pub const CHANNEL_MODES: &str = "beliIkmstn";

/// Channel membership prefixes, strongest first, with their mode letters.
pub const MEMBERSHIP_PREFIXES: [(char, char); 5] =
    [('q', '~'), ('a', '&'), ('o', '@'), ('h', '%'), ('v', '+')];

/// List-backed channel modes: querying them without an argument lists the
/// respective set.
pub fn is_list_mode(mode: char) -> bool {
    matches!(mode, 'b' | 'e' | 'I')
}

/// Whether `mode` is a membership prefix mode (`q a o h v`).
pub fn is_membership_mode(mode: char) -> bool {
    MEMBERSHIP_PREFIXES.iter().any(|&(m, _)| m == mode)
}

/// The prefix character for a membership mode letter.
pub fn prefix_for_mode(mode: char) -> Option<char> {
    MEMBERSHIP_PREFIXES
        .iter()
        .find(|&&(m, _)| m == mode)
        .map(|&(_, p)| p)
}

fn takes_arg(kind: ModeKind, mode: char, add: bool) -> bool {
    match kind {
        ModeKind::User => false,
        ModeKind::Channel => match mode {
            'b' | 'e' | 'I' => true,
            'k' | 'l' => add,
            m if is_membership_mode(m) => true,
            _ => false,
        },
    }
}

/// Parse a mode string with its positional arguments.
///
/// Unknown letters parse into changes with no argument; the caller
/// decides whether to reject them. List modes (`b`, `e`, `I`) yield
/// `param: None` when no argument remains, which callers treat as a list
/// query. Required arguments that are missing also yield `param: None`
/// and are reported by the caller as `ERR_NEEDMOREPARAMS`.
pub fn parse(kind: ModeKind, mode_str: &str, args: &[String]) -> Vec<ModeChange> {
    let mut changes = Vec::new();
    let mut args = args.iter();
    let mut add = true;

    for c in mode_str.chars() {
        match c {
            '+' => add = true,
            '-' => add = false,
            _ => {
                let param = if takes_arg(kind, c, add) {
                    args.next().cloned()
                } else {
                    None
                };
                changes.push(ModeChange {
                    add,
                    mode: c,
                    param,
                });
            }
        }
    }

    changes
}

/// Render applied changes back into a mode string plus its positional
/// arguments, e.g. `+kt-b` with `["secret", "*!*@x"]`.
pub fn format(changes: &[ModeChange]) -> (String, Vec<String>) {
    let mut out = String::new();
    let mut params = Vec::new();
    let mut current: Option<bool> = None;

    for change in changes {
        if current != Some(change.add) {
            out.push(if change.add { '+' } else { '-' });
            current = Some(change.add);
        }
        out.push(change.mode);
        if let Some(param) = &change.param {
            params.push(param.clone());
        }
    }

    (out, params)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_args() -> Vec<String> {
        Vec::new()
    }

    #[test]
    fn format_groups_signs_and_collects_params() {
        let changes = vec![
            ModeChange {
                add: true,
                mode: 'k',
                param: Some("secret".to_string()),
            },
            ModeChange {
                add: true,
                mode: 't',
                param: None,
            },
            ModeChange {
                add: false,
                mode: 'b',
                param: Some("*!*@x".to_string()),
            },
        ];
        let (modes, params) = format(&changes);
        assert_eq!(modes, "+kt-b");
        assert_eq!(params, vec!["secret".to_string(), "*!*@x".to_string()]);
    }

    #[test]
    fn signs_carry_and_flip_in_order() {
        let changes = parse(ModeKind::Channel, "+a-b+cd", &no_args());
        let flat: Vec<(bool, char)> = changes.iter().map(|m| (m.add, m.mode)).collect();
        assert_eq!(
            flat,
            vec![(true, 'a'), (false, 'b'), (true, 'c'), (true, 'd')]
        );
    }

    #[test]
    fn leading_letter_defaults_to_add() {
        let changes = parse(ModeKind::Channel, "nt", &no_args());
        assert!(changes.iter().all(|m| m.add));
    }

    #[test]
    fn key_takes_arg_on_add_only() {
        let args = vec!["secret".to_string()];
        let set = parse(ModeKind::Channel, "+k", &args);
        assert_eq!(set[0].param.as_deref(), Some("secret"));

        let unset = parse(ModeKind::Channel, "-k", &args);
        assert_eq!(unset[0].param, None);
    }

    #[test]
    fn list_mode_without_arg_is_query() {
        let query = parse(ModeKind::Channel, "+b", &no_args());
        assert_eq!(query[0].param, None);

        let args = vec!["*!*@*.edu".to_string()];
        let set = parse(ModeKind::Channel, "+b", &args);
        assert_eq!(set[0].param.as_deref(), Some("*!*@*.edu"));
    }

    #[test]
    fn membership_modes_consume_nicks_in_order() {
        let args = vec!["alice".to_string(), "bob".to_string()];
        let changes = parse(ModeKind::Channel, "+ov", &args);
        assert_eq!(changes[0].param.as_deref(), Some("alice"));
        assert_eq!(changes[1].param.as_deref(), Some("bob"));
    }

    #[test]
    fn user_modes_never_take_args() {
        let args = vec!["x".to_string()];
        let changes = parse(ModeKind::User, "+iw-o", &args);
        assert!(changes.iter().all(|m| m.param.is_none()));
    }

    #[test]
    fn prefix_lookup() {
        assert_eq!(prefix_for_mode('q'), Some('~'));
        assert_eq!(prefix_for_mode('v'), Some('+'));
        assert_eq!(prefix_for_mode('x'), None);
        assert!(is_membership_mode('h'));
        assert!(!is_membership_mode('b'));
    }
}
