use std::sync::OnceLock;

use regex::Regex;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedAddress {
    pub name: String,
    pub email: String,
}

impl ParsedAddress {
    pub fn domain(&self) -> &str {
        domain_of(&self.email)
    }
}

#[allow(clippy::unwrap_used)]
fn angle_form() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"^\s*"?([^"<]*?)"?\s*<([^<>]+)>\s*$"#).unwrap())
}

#[allow(clippy::unwrap_used)]
fn bare_form() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"^\s*(?:"([^"]*)"|([^"<>@]*?))\s+([^\s"<>]+@[^\s"<>]+)\s*$"#).unwrap()
    })
}

/// Split a raw `From` header into display name and normalized email.
///
/// Accepts `Name <email>`, `"Name" <email>`, `<email>`, `"Name" email` and
/// `Name email`; anything else is taken whole as the email.
pub fn parse_from_header(raw: &str) -> ParsedAddress {
    if let Some(caps) = angle_form().captures(raw) {
        let name = caps.get(1).map_or("", |m| m.as_str());
        let email = caps.get(2).map_or("", |m| m.as_str());
        return ParsedAddress {
            name: name.trim().to_string(),
            email: normalize_email(email),
        };
    }

    if let Some(caps) = bare_form().captures(raw) {
        let name = caps
            .get(1)
            .or_else(|| caps.get(2))
            .map_or("", |m| m.as_str());
        let email = caps.get(3).map_or("", |m| m.as_str());
        return ParsedAddress {
            name: name.trim().to_string(),
            email: normalize_email(email),
        };
    }

    ParsedAddress {
        name: String::new(),
        email: normalize_email(raw),
    }
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Everything after the last `@`, or empty.
pub fn domain_of(email: &str) -> &str {
    email.rsplit_once('@').map_or("", |(_, domain)| domain)
}

pub fn normalize_domain(domain: &str) -> String {
    let domain = domain.trim().to_lowercase();
    domain.strip_prefix('@').map(str::to_string).unwrap_or(domain)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_name_with_angle_brackets() {
        let parsed = parse_from_header("Jane Doe <jane@x.com>");
        assert_eq!(parsed.name, "Jane Doe");
        assert_eq!(parsed.email, "jane@x.com");
        assert_eq!(parsed.domain(), "x.com");
    }

    #[test]
    fn bare_address_is_lowercased() {
        let parsed = parse_from_header("bob@Y.COM");
        assert_eq!(parsed.name, "");
        assert_eq!(parsed.email, "bob@y.com");
        assert_eq!(parsed.domain(), "y.com");
    }

    #[test]
    fn quoted_name_with_comma() {
        let parsed = parse_from_header("\"Doe, Jane\" <Jane.Doe@Example.org>");
        assert_eq!(parsed.name, "Doe, Jane");
        assert_eq!(parsed.email, "jane.doe@example.org");
    }

    #[test]
    fn angle_brackets_without_name() {
        let parsed = parse_from_header("  <news@list.io>  ");
        assert_eq!(parsed.name, "");
        assert_eq!(parsed.email, "news@list.io");
    }

    #[test]
    fn quoted_name_then_bare_email() {
        let parsed = parse_from_header("\"Support Team\" help@desk.com");
        assert_eq!(parsed.name, "Support Team");
        assert_eq!(parsed.email, "help@desk.com");
    }

    #[test]
    fn unparseable_header_becomes_email() {
        let parsed = parse_from_header("  Mailer-Daemon  ");
        assert_eq!(parsed.name, "");
        assert_eq!(parsed.email, "mailer-daemon");
        assert_eq!(parsed.domain(), "");
    }

    #[test]
    fn domain_uses_last_at() {
        assert_eq!(domain_of("\"a@b\"@c.org"), "c.org");
        assert_eq!(domain_of("nobody"), "");
    }

    #[test]
    fn domain_normalization() {
        assert_eq!(normalize_domain("  @News.Example.COM "), "news.example.com");
        assert_eq!(normalize_domain("x.com"), "x.com");
    }
}
