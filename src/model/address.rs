//! Address-list splitting for `To`/`CC`/`BCC` header values (RFC 5322 §3.4).

/// One mailbox out of an address header.
///
/// # Examples
/// - `"Juan García <juan@ejemplo.com>"` → `display_name = "Juan García"`, `address = "juan@ejemplo.com"`
/// - `"user@example.com"` → `display_name = ""`, `address = "user@example.com"`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailAddress {
    /// Human-readable display name (may be empty).
    pub display_name: String,
    /// The bare address (`user@domain`).
    pub address: String,
}

impl EmailAddress {
    /// Parse a single mailbox.
    ///
    /// Supported formats:
    /// - `"user@domain.com"`
    /// - `"<user@domain.com>"`
    /// - `"Display Name <user@domain.com>"`
    /// - `"\"Display, Name\" <user@domain.com>"`
    /// - `"user@domain.com (Display Name)"`
    ///
    /// Anything else is kept verbatim as `address`.
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();

        if let (Some(open), Some(close)) = (trimmed.rfind('<'), trimmed.rfind('>')) {
            if close > open {
                return Self {
                    display_name: unquote(&trimmed[..open]),
                    address: trimmed[open + 1..close].trim().to_string(),
                };
            }
        }

        // Old-style trailing comment carries the name.
        if let (Some(open), true) = (trimmed.find('('), trimmed.ends_with(')')) {
            let name = trimmed[open + 1..trimmed.len() - 1].trim();
            return Self {
                display_name: unquote(name),
                address: trimmed[..open].trim().to_string(),
            };
        }

        Self {
            display_name: String::new(),
            address: trimmed.to_string(),
        }
    }

    /// Split a comma-separated address list.
    ///
    /// Commas inside quotes, angle brackets, or comments do not split, and
    /// group syntax (`Team: a@b.com, c@d.com;`) is flattened into its members.
    /// Entries without an address are dropped.
    pub fn parse_list(raw: &str) -> Vec<Self> {
        let mut results = Vec::new();
        let mut current = String::new();
        let mut in_quotes = false;
        let mut escaped = false;
        let mut angle_depth = 0usize;
        let mut comment_depth = 0usize;

        let flush = |current: &mut String, results: &mut Vec<Self>| {
            let addr = Self::parse(current);
            if !addr.address.is_empty() {
                results.push(addr);
            }
            current.clear();
        };

        for ch in raw.chars() {
            if escaped {
                current.push(ch);
                escaped = false;
                continue;
            }
            match ch {
                '\\' if in_quotes => {
                    escaped = true;
                }
                '"' if comment_depth == 0 => {
                    in_quotes = !in_quotes;
                    current.push(ch);
                }
                '(' if !in_quotes => {
                    comment_depth += 1;
                    current.push(ch);
                }
                ')' if !in_quotes && comment_depth > 0 => {
                    comment_depth -= 1;
                    current.push(ch);
                }
                '<' if !in_quotes && comment_depth == 0 => {
                    angle_depth += 1;
                    current.push(ch);
                }
                '>' if !in_quotes && comment_depth == 0 => {
                    angle_depth = angle_depth.saturating_sub(1);
                    current.push(ch);
                }
                ':' if !in_quotes && angle_depth == 0 && comment_depth == 0 => {
                    // Group display name; the members follow.
                    current.clear();
                }
                ',' | ';' if !in_quotes && angle_depth == 0 && comment_depth == 0 => {
                    flush(&mut current, &mut results);
                }
                _ => current.push(ch),
            }
        }
        flush(&mut current, &mut results);

        results
    }

    /// Format for display: `"Display Name <address>"` or just `"address"`.
    pub fn display(&self) -> String {
        if self.display_name.is_empty() {
            self.address.clone()
        } else {
            format!("{} <{}>", self.display_name, self.address)
        }
    }
}

impl std::fmt::Display for EmailAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display())
    }
}

/// Split an address header and re-render every entry as `"Name <addr>"` or `addr`.
pub fn split_addresses(raw: &str) -> Vec<String> {
    EmailAddress::parse_list(raw)
        .iter()
        .map(EmailAddress::display)
        .collect()
}

/// Strip surrounding double-quotes and trim whitespace.
fn unquote(s: &str) -> String {
    let trimmed = s.trim();
    if trimmed.len() >= 2 && trimmed.starts_with('"') && trimmed.ends_with('"') {
        trimmed[1..trimmed.len() - 1].trim().to_string()
    } else {
        trimmed.to_string()
    }
}
