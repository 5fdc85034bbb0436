//! Replay offset reconciliation.
//!
//! Precedence: a forced configured offset, then the persisted offset, then
//! the configured offset, then [`DEFAULT_REPLAY_ID`].

use serde_json::Value;

/// Server convention for "no specific position": only new events.
pub const DEFAULT_REPLAY_ID: i64 = -1;

/// Node context key the offset is persisted under.
pub const REPLAY_CONTEXT_KEY: &str = "replayId";

/// Configured starting offset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplaySetting {
    pub offset: Option<i64>,
    /// Wins over a persisted offset.
    pub force: bool,
}

impl ReplaySetting {
    pub fn new(offset: Option<i64>, force: bool) -> Self {
        Self { offset, force }
    }

    /// Parses legacy text settings: `"242"`, or `"12!"` to force.
    pub fn parse(text: &str) -> Self {
        let trimmed = text.trim();
        let (digits, force) = match trimmed.strip_suffix('!') {
            Some(rest) => (rest, true),
            None => (trimmed, false),
        };
        Self {
            offset: digits.trim().parse::<i64>().ok(),
            force,
        }
    }
}

/// Starting offset given what was persisted and what is configured.
pub fn resolve_replay_id(persisted: Option<i64>, setting: ReplaySetting) -> i64 {
    match (setting.offset, persisted) {
        (Some(configured), None) => configured,
        (Some(configured), Some(_)) if setting.force => configured,
        (_, Some(persisted)) => persisted,
        (None, None) => DEFAULT_REPLAY_ID,
    }
}

/// Reads a stored offset, accepting numbers or numeric strings.
pub fn offset_from_value(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_resolution_table() {
        let cases: Vec<(Option<i64>, &str, i64)> = vec![
            (None, "", DEFAULT_REPLAY_ID),
            (Some(242), "", 242),
            (None, "242", 242),
            (Some(242), "12", 242),
            (Some(242), "12!", 12),
        ];

        for (persisted, configured, expected) in cases {
            let setting = ReplaySetting::parse(configured);
            assert_eq!(
                resolve_replay_id(persisted, setting),
                expected,
                "persisted={:?} configured={:?}",
                persisted,
                configured
            );
        }
    }

    #[test]
    fn test_force_without_offset_keeps_persisted() {
        assert_eq!(resolve_replay_id(Some(7), ReplaySetting::new(None, true)), 7);
        assert_eq!(
            resolve_replay_id(None, ReplaySetting::new(None, true)),
            DEFAULT_REPLAY_ID
        );
    }

    #[test]
    fn test_parse_legacy_text() {
        assert_eq!(ReplaySetting::parse("12!"), ReplaySetting::new(Some(12), true));
        assert_eq!(ReplaySetting::parse(" 12 "), ReplaySetting::new(Some(12), false));
        assert_eq!(ReplaySetting::parse("-2"), ReplaySetting::new(Some(-2), false));
        assert_eq!(ReplaySetting::parse("abc"), ReplaySetting::new(None, false));
        assert_eq!(ReplaySetting::parse(""), ReplaySetting::default());
    }

    #[test]
    fn test_parse_marker_only_at_end() {
        assert_eq!(ReplaySetting::parse("1!2"), ReplaySetting::new(None, false));
        assert_eq!(ReplaySetting::parse("!12"), ReplaySetting::new(None, false));
        assert_eq!(ReplaySetting::parse(" 12 ! "), ReplaySetting::new(Some(12), true));
        assert_eq!(
            resolve_replay_id(Some(242), ReplaySetting::parse("1!2")),
            242
        );
    }

    #[test]
    fn test_offset_from_value() {
        assert_eq!(offset_from_value(&json!(242)), Some(242));
        assert_eq!(offset_from_value(&json!("243")), Some(243));
        assert_eq!(offset_from_value(&json!(null)), None);
        assert_eq!(offset_from_value(&json!({"x": 1})), None);
    }
}
