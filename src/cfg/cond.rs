//! Condition-expression and SIGHUP-capability parsing for service lines
//! (§4.4).

use crate::error::ParseWarning;

/// The result of parsing a service line's trailing `<cond>` marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedCondition {
    /// The condition expression with the `!` SIGHUP-capability prefix (if
    /// any) and the enclosing `<`/`>` already stripped.
    pub expression: String,
    /// Whether the declaring service supports SIGHUP-triggered reload.
    pub sighup_capable: bool,
}

/// Kind of service line this condition belongs to, needed only to resolve
/// the SIGHUP-capable default (§4.4: "For a daemon-kind service with no
/// explicit prefix, the SIGHUP-capable flag defaults to true").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceKind {
    Daemon,
    Task,
    Run,
    Inetd,
}

/// Parse the raw condition string found after the `<` marker on a service
/// line (the marker itself is assumed already stripped by the caller).
///
/// - A leading `!` means the service does *not* support SIGHUP; the prefix
///   is stripped before further parsing.
/// - The expression runs until the first `>` or end-of-string.
/// - If the expression's length exceeds `capacity`, emit
///   `ParseWarning::ConditionTooLong` and return `Ok(None)` — not an error,
///   but a no-op: the caller leaves the service's condition field
///   unmutated.
pub fn parse(raw: &str, kind: ServiceKind, capacity: usize) -> Result<Option<ParsedCondition>, ParseWarning> {
    let (sighup_explicit_false, rest) = match raw.strip_prefix('!') {
        Some(r) => (true, r),
        None => (false, raw),
    };

    let expression = rest.split('>').next().unwrap_or(rest);

    if expression.len() > capacity {
        return Err(ParseWarning::ConditionTooLong { capacity });
    }

    let sighup_capable = if sighup_explicit_false {
        false
    } else {
        matches!(kind, ServiceKind::Daemon)
    };

    Ok(Some(ParsedCondition {
        expression: expression.to_string(),
        sighup_capable,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_expression() {
        let p = parse("net/eth0/up>", ServiceKind::Daemon, 64)
            .unwrap()
            .unwrap();
        assert_eq!(p.expression, "net/eth0/up");
        assert!(p.sighup_capable);
    }

    #[test]
    fn bang_prefix_disables_sighup() {
        let p = parse("!net/eth0/up>", ServiceKind::Daemon, 64)
            .unwrap()
            .unwrap();
        assert_eq!(p.expression, "net/eth0/up");
        assert!(!p.sighup_capable);
    }

    #[test]
    fn non_daemon_defaults_to_not_sighup_capable() {
        let p = parse("net/eth0/up>", ServiceKind::Task, 64)
            .unwrap()
            .unwrap();
        assert!(!p.sighup_capable);
    }

    #[test]
    fn unterminated_expression_runs_to_end_of_string() {
        let p = parse("net/eth0/up", ServiceKind::Daemon, 64)
            .unwrap()
            .unwrap();
        assert_eq!(p.expression, "net/eth0/up");
    }

    #[test]
    fn over_long_condition_is_a_warning_and_abandons() {
        let err = parse("x".repeat(10).as_str(), ServiceKind::Daemon, 4).unwrap_err();
        assert!(matches!(err, ParseWarning::ConditionTooLong { capacity: 4 }));
    }

    #[test]
    fn exactly_at_capacity_is_accepted() {
        let p = parse("abcd>", ServiceKind::Daemon, 4).unwrap().unwrap();
        assert_eq!(p.expression, "abcd");
    }
}
