//! `${ENV_VAR}` substitution in raw config text.

/// Replace `${ENV_VAR}` placeholders in config text with process
/// environment values. Unresolvable placeholders stay verbatim so secrets
/// wiring mistakes are visible instead of silently blank.
pub fn substitute_env(input: &str) -> String {
    substitute_with(input, |name| std::env::var(name).ok())
}

fn substitute_with(input: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                let name = &after[..end];
                match lookup(name).filter(|_| !name.is_empty()) {
                    Some(value) => out.push_str(&value),
                    None => {
                        out.push_str("${");
                        out.push_str(name);
                        out.push('}');
                    },
                }
                rest = &after[end + 1..];
            },
            None => {
                // Unterminated placeholder: emit literally.
                out.push_str(rest.get(start..).unwrap_or_default());
                return out;
            },
        }
    }
    out.push_str(rest);
    out
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substitutes_known_var() {
        let lookup = |name: &str| (name == "BOT_TOKEN").then(|| "t0k".to_string());
        assert_eq!(
            substitute_with(r#"{"botToken":"${BOT_TOKEN}"}"#, lookup),
            r#"{"botToken":"t0k"}"#
        );
    }

    #[test]
    fn leaves_unknown_var_verbatim() {
        assert_eq!(
            substitute_with("${CLAWDIS_DOES_NOT_EXIST}", |_| None),
            "${CLAWDIS_DOES_NOT_EXIST}"
        );
    }

    #[test]
    fn unterminated_placeholder_is_literal() {
        assert_eq!(substitute_with("x ${OOPS", |_| None), "x ${OOPS");
    }

    #[test]
    fn plain_text_untouched() {
        assert_eq!(substitute_env("no placeholders here"), "no placeholders here");
    }
}
