//! Heartbeat reply handling: HEARTBEAT_OK stripping, ack caps, active
//! hours.

use chrono::{Local, NaiveTime, Timelike, Utc};

/// The sentinel token the agent returns when nothing needs attention.
pub const HEARTBEAT_OK: &str = "HEARTBEAT_OK";

/// The forced-sync prompt body for heartbeat runs.
pub const HEARTBEAT_PROMPT: &str = "HEARTBEAT";

/// Result of stripping the `HEARTBEAT_OK` token from an agent reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StripResult {
    /// The token was present (possibly repeated or wrapped).
    pub is_ok_ack: bool,
    /// Remaining text after removing every token occurrence.
    pub text: String,
}

/// Strip every `HEARTBEAT_OK` occurrence, including `**bold**` and
/// `<b>html</b>` wrappers. Repeated token tails collapse — the reply
/// `"HEARTBEAT_OK HEARTBEAT_OK"` is one plain acknowledgment.
#[must_use]
pub fn strip_heartbeat_token(text: &str) -> StripResult {
    let wrappers = [
        format!("**{HEARTBEAT_OK}**"),
        format!("<b>{HEARTBEAT_OK}</b>"),
        HEARTBEAT_OK.to_string(),
    ];
    let mut result = text.trim().to_string();
    let mut found = false;
    for pattern in &wrappers {
        if result.contains(pattern.as_str()) {
            result = result.replace(pattern.as_str(), "");
            found = true;
        }
    }
    StripResult {
        is_ok_ack: found,
        text: result.trim().to_string(),
    }
}

/// Cap an acknowledgment reply at `ack_max_chars`; 0 disables the cap.
#[must_use]
pub fn cap_ack(text: &str, ack_max_chars: usize) -> String {
    if ack_max_chars == 0 || text.chars().count() <= ack_max_chars {
        return text.to_string();
    }
    text.chars().take(ack_max_chars).collect()
}

/// Whether the current time falls inside the active-hours window.
/// Overnight windows (start > end) wrap midnight; unparseable config means
/// always active.
#[must_use]
pub fn is_within_active_hours(start: &str, end: &str, timezone: &str) -> bool {
    let (Some(start), Some(end)) = (parse_hhmm(start), parse_hhmm(end)) else {
        return true;
    };
    let start_minutes = start.hour() * 60 + start.minute();
    let end_minutes = end.hour() * 60 + end.minute();
    let now_minutes = current_minutes(timezone);

    if start_minutes <= end_minutes {
        now_minutes >= start_minutes && now_minutes < end_minutes
    } else {
        now_minutes >= start_minutes || now_minutes < end_minutes
    }
}

fn parse_hhmm(s: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(s, "%H:%M").ok()
}

fn current_minutes(timezone: &str) -> u32 {
    if timezone.is_empty() || timezone == "local" {
        let now = Local::now();
        return now.hour() * 60 + now.minute();
    }
    match timezone.parse::<chrono_tz::Tz>() {
        Ok(tz) => {
            let now = Utc::now().with_timezone(&tz);
            now.hour() * 60 + now.minute()
        },
        Err(_) => {
            let now = Local::now();
            now.hour() * 60 + now.minute()
        },
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_token_is_ack() {
        let r = strip_heartbeat_token("HEARTBEAT_OK");
        assert!(r.is_ok_ack);
        assert!(r.text.is_empty());
    }

    #[test]
    fn html_bold_wrapper_is_ack() {
        let r = strip_heartbeat_token("<b>HEARTBEAT_OK</b>");
        assert!(r.is_ok_ack);
        assert!(r.text.is_empty());
    }

    #[test]
    fn repeated_tails_collapse() {
        let r = strip_heartbeat_token("HEARTBEAT_OK\nHEARTBEAT_OK HEARTBEAT_OK");
        assert!(r.is_ok_ack);
        assert!(r.text.is_empty());
    }

    #[test]
    fn alert_text_survives_strip() {
        let r = strip_heartbeat_token("HEARTBEAT_OK\nYou have a meeting at 3pm");
        assert!(r.is_ok_ack);
        assert_eq!(r.text, "You have a meeting at 3pm");
    }

    #[test]
    fn no_token_means_alert() {
        let r = strip_heartbeat_token("Server disk is 95% full");
        assert!(!r.is_ok_ack);
        assert_eq!(r.text, "Server disk is 95% full");
    }

    #[test]
    fn ack_cap_zero_disables() {
        let long = "x".repeat(500);
        assert_eq!(cap_ack(&long, 0), long);
        assert_eq!(cap_ack(&long, 10).chars().count(), 10);
    }

    #[test]
    fn invalid_active_hours_always_active() {
        assert!(is_within_active_hours("oops", "24:00", "local"));
    }

    #[test]
    fn active_hours_do_not_panic() {
        let _ = is_within_active_hours("08:00", "22:00", "UTC");
        let _ = is_within_active_hours("22:00", "06:00", "Europe/Paris");
    }
}
