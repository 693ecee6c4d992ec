//! Directive recognition for one raw configuration line (§4.1).

/// The fixed set of directive keywords recognized anywhere in a main file or
/// fragment. Whether a given keyword is honored in a given context (static
/// vs. dynamic pass, bootstrap vs. not) is decided by `ConfigLoader`, not
/// here — the lexer only classifies.
pub const KEYWORDS: &[&str] = &[
    "host",
    "module",
    "mknod",
    "network",
    "runparts",
    "runlevel",
    "include",
    "shutdown",
    "halt",
    "rlimit",
    "service",
    "task",
    "run",
    "inetd",
    "tty",
];

/// One recognized `(keyword, argument)` pair lexed from a line. `keyword` is
/// always one of `KEYWORDS` (lowercased, regardless of the line's casing);
/// `argument` is the left-stripped remainder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Directive {
    pub keyword: &'static str,
    pub argument: String,
}

/// Normalize and classify a single raw line.
///
/// - Tabs become spaces.
/// - Trailing `\n`/`\r\n` is trimmed, along with leading/trailing whitespace.
/// - A line beginning with `#` after normalization is a comment: `None`.
/// - Otherwise, the line is matched case-insensitively against `KEYWORDS` as
///   a prefix followed by a space; the remainder (left-stripped) is the
///   argument. A line matching no keyword is also `None` — the caller
///   (`ConfigLoader`) is responsible for turning that into a
///   `ParseWarning::UnknownDirective` when the line is non-blank.
pub fn lex(raw: &str) -> Option<Directive> {
    let normalized = raw.replace('\t', " ");
    let trimmed = normalized.trim();

    if trimmed.is_empty() || trimmed.starts_with('#') {
        return None;
    }

    for &kw in KEYWORDS {
        if trimmed.len() < kw.len() {
            continue;
        }
        let (candidate, rest) = trimmed.split_at(kw.len());
        if !candidate.eq_ignore_ascii_case(kw) {
            continue;
        }
        // Must be followed by a space, or be the whole line, to count as a
        // prefix match rather than e.g. matching "runlevels" against
        // "runlevel".
        if rest.is_empty() {
            return Some(Directive {
                keyword: kw,
                argument: String::new(),
            });
        }
        if let Some(arg) = rest.strip_prefix(' ') {
            return Some(Directive {
                keyword: kw,
                argument: arg.trim_start().to_string(),
            });
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn comment_line_is_none() {
        assert_eq!(lex("# a comment"), None);
        assert_eq!(lex("   # indented comment"), None);
    }

    #[test]
    fn blank_line_is_none() {
        assert_eq!(lex(""), None);
        assert_eq!(lex("   \n"), None);
    }

    #[test]
    fn basic_directive() {
        let d = lex("service [234] /usr/sbin/sshd -D\n").unwrap();
        assert_eq!(d.keyword, "service");
        assert_eq!(d.argument, "[234] /usr/sbin/sshd -D");
    }

    #[test]
    fn case_insensitive_keyword() {
        let d = lex("SERVICE [234] foo").unwrap();
        assert_eq!(d.keyword, "service");
        assert_eq!(d.argument, "foo");
    }

    #[test]
    fn tabs_become_spaces() {
        let d = lex("rlimit\tsoft\tnofile\t1024").unwrap();
        assert_eq!(d.keyword, "rlimit");
        assert_eq!(d.argument, "soft nofile 1024");
    }

    #[test]
    fn unknown_keyword_is_none() {
        assert_eq!(lex("frobnicate something"), None);
    }

    #[test]
    fn argument_is_left_stripped() {
        let d = lex("host    myhostname").unwrap();
        assert_eq!(d.argument, "myhostname");
    }

    #[test]
    fn keyword_without_following_space_does_not_match() {
        // "runlevels" must not be misclassified as "runlevel" with argument "s".
        assert_eq!(lex("runlevels foo"), None);
    }

    #[test]
    fn bare_keyword_with_no_argument() {
        let d = lex("shutdown").unwrap();
        assert_eq!(d.keyword, "shutdown");
        assert_eq!(d.argument, "");
    }
}
