//! `${VAR}` / `${VAR:-fallback}` substitution over raw config text.

/// Replace `${ENV_VAR}` placeholders with values from the process environment.
///
/// `${VAR:-fallback}` uses `fallback` when `VAR` is unset or empty.
/// Unresolvable placeholders without a fallback are left untouched so that
/// validation can point at them.
pub fn substitute_env(input: &str) -> String {
    substitute_with(input, |name| std::env::var(name).ok())
}

fn substitute_with(input: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            // Unterminated: emit the remainder verbatim.
            out.push_str(&rest[start..]);
            return out;
        };
        let inner = &after[..end];
        let (name, fallback) = match inner.split_once(":-") {
            Some((name, fallback)) => (name, Some(fallback)),
            None => (inner, None),
        };

        let value = if name.is_empty() {
            None
        } else {
            lookup(name).filter(|v| !v.is_empty() || fallback.is_none())
        };
        match (value, fallback) {
            (Some(v), _) => out.push_str(&v),
            (None, Some(f)) => out.push_str(f),
            (None, None) => {
                out.push_str("${");
                out.push_str(inner);
                out.push('}');
            },
        }
        rest = &after[end + 1..];
    }

    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup(name: &str) -> Option<String> {
        match name {
            "SB_TOKEN" => Some("s3cret".into()),
            "SB_EMPTY" => Some(String::new()),
            _ => None,
        }
    }

    #[test]
    fn substitutes_known_var() {
        assert_eq!(substitute_with("token = \"${SB_TOKEN}\"", lookup), "token = \"s3cret\"");
    }

    #[test]
    fn leaves_unknown_var() {
        assert_eq!(substitute_with("${SB_MISSING}", lookup), "${SB_MISSING}");
    }

    #[test]
    fn fallback_for_unset_and_empty() {
        assert_eq!(substitute_with("${SB_MISSING:-pairing}", lookup), "pairing");
        assert_eq!(substitute_with("${SB_EMPTY:-pairing}", lookup), "pairing");
        assert_eq!(substitute_with("${SB_TOKEN:-nope}", lookup), "s3cret");
    }

    #[test]
    fn unterminated_placeholder_is_literal() {
        assert_eq!(substitute_with("a ${SB_TOKEN", lookup), "a ${SB_TOKEN");
    }

    #[test]
    fn multiple_placeholders() {
        assert_eq!(
            substitute_with("${SB_TOKEN}/${SB_MISSING:-x}/${SB_TOKEN}", lookup),
            "s3cret/x/s3cret"
        );
    }

    #[test]
    fn no_placeholders() {
        assert_eq!(substitute_env("plain text"), "plain text");
    }
}
