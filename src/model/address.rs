//! Mailbox address parsing for `From:`, `To:` and `Cc:` values (RFC 5322 §3.4).

/// One parsed mailbox: optional display name plus the bare `user@domain`.
///
/// - `"Jan de Vries <jan@example.nl>"` → name `"Jan de Vries"`, address `"jan@example.nl"`
/// - `"jan@example.nl"` → name `""`, address `"jan@example.nl"`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Mailbox {
    pub name: String,
    pub address: String,
}

impl Mailbox {
    /// Parse a single mailbox. Unrecognized input is kept verbatim as the address.
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();

        if let (Some(open), Some(close)) = (trimmed.rfind('<'), trimmed.rfind('>')) {
            if close > open {
                return Self {
                    name: unquote(&trimmed[..open]),
                    address: trimmed[open + 1..close].trim().to_string(),
                };
            }
        }

        Self {
            name: String::new(),
            address: trimmed.to_string(),
        }
    }

    /// Split a header value on top-level commas and parse every mailbox.
    ///
    /// Commas inside quotes or angle brackets do not split:
    /// `"Vries, Jan" <jan@example.nl>, piet@example.nl` yields two mailboxes.
    pub fn parse_list(raw: &str) -> Vec<Self> {
        let mut out = Vec::new();
        let mut start = 0;
        let mut quoted = false;
        let mut angled = false;

        for (pos, ch) in raw.char_indices() {
            match ch {
                '"' => quoted = !quoted,
                '<' if !quoted => angled = true,
                '>' if !quoted => angled = false,
                ',' if !quoted && !angled => {
                    push_non_empty(&mut out, &raw[start..pos]);
                    start = pos + 1;
                }
                _ => {}
            }
        }
        push_non_empty(&mut out, &raw[start..]);
        out
    }
}

/// Render the bare addresses of a list as `a@x, b@y`.
pub fn join_addresses(list: &[Mailbox]) -> String {
    list.iter()
        .map(|m| m.address.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

fn push_non_empty(out: &mut Vec<Mailbox>, segment: &str) {
    let mailbox = Mailbox::parse(segment);
    if !mailbox.address.is_empty() {
        out.push(mailbox);
    }
}

fn unquote(s: &str) -> String {
    let s = s.trim();
    s.strip_prefix('"')
        .and_then(|rest| rest.strip_suffix('"'))
        .unwrap_or(s)
        .trim()
        .to_string()
}
