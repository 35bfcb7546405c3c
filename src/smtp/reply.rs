//! SMTP replies.

use std::fmt;

/// A reply code with one or more text lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    code: u16,
    lines: Vec<String>,
}

impl Reply {
    pub fn new(code: u16, text: impl Into<String>) -> Self {
        Self {
            code,
            lines: vec![text.into()],
        }
    }

    /// A reply spanning several lines (`250-first`, …, `250 last`).
    pub fn multiline(code: u16, lines: Vec<String>) -> Self {
        Self { code, lines }
    }

    pub fn code(&self) -> u16 {
        self.code
    }

    pub fn ok() -> Self {
        Self::new(250, "OK")
    }

    pub fn greeting(hostname: &str) -> Self {
        Self::new(220, format!("{hostname} mailsink ESMTP ready"))
    }

    pub fn start_data() -> Self {
        Self::new(354, "End data with <CR><LF>.<CR><LF>")
    }

    pub fn closing(hostname: &str) -> Self {
        Self::new(221, format!("{hostname} closing connection"))
    }

    pub fn queued(id: i64) -> Self {
        Self::new(250, format!("OK: queued as {id}"))
    }

    pub fn local_error() -> Self {
        Self::new(451, "Requested action aborted: local error in processing")
    }

    pub fn too_large(max: usize) -> Self {
        Self::new(552, format!("Message exceeds fixed maximum message size of {max} bytes"))
    }

    pub fn bad_sequence(text: &str) -> Self {
        Self::new(503, format!("Bad sequence of commands: {text}"))
    }

    pub fn syntax(text: &str) -> Self {
        Self::new(501, format!("Syntax error in parameters: {text}"))
    }

    pub fn unknown_command() -> Self {
        Self::new(500, "Syntax error, command unrecognized")
    }

    pub fn is_positive(&self) -> bool {
        self.code < 400
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let last = self.lines.len().saturating_sub(1);
        for (i, line) in self.lines.iter().enumerate() {
            let sep = if i == last { ' ' } else { '-' };
            write!(f, "{}{sep}{line}\r\n", self.code)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_line() {
        assert_eq!(Reply::ok().to_string(), "250 OK\r\n");
    }

    #[test]
    fn test_multiline() {
        let reply = Reply::multiline(250, vec!["host".into(), "SIZE 10".into(), "8BITMIME".into()]);
        assert_eq!(reply.to_string(), "250-host\r\n250-SIZE 10\r\n250 8BITMIME\r\n");
    }

    #[test]
    fn test_positive() {
        assert!(Reply::start_data().is_positive());
        assert!(!Reply::local_error().is_positive());
    }
}
