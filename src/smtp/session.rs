//! Per-connection SMTP command state machine.
//!
//! The session only deals in command lines and replies; reading the message
//! data and storing it is left to the server.

use tracing::trace;

use super::reply::Reply;

/// Longest accepted reverse- or forward-path.
const PATH_MAX_LENGTH: usize = 256;

/// Where a session is in the mail transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// Connected, no HELO/EHLO yet.
    Connected,
    /// Greeted, no transaction in progress.
    Greeted,
    /// `MAIL FROM` accepted.
    Mail,
    /// At least one `RCPT TO` accepted.
    Rcpt,
}

/// What the server should do after a command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Send the reply and keep reading commands.
    Reply(Reply),
    /// Send the (354) reply, then read message data.
    StartData(Reply),
    /// Send the reply and close the connection.
    Quit(Reply),
}

/// Sender and recipients of a completed transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// Empty for the null reverse-path `<>`.
    pub sender: String,
    pub recipients: Vec<String>,
}

#[derive(Debug)]
pub struct Session {
    hostname: String,
    max_message_size: usize,
    state: State,
    client: Option<String>,
    sender: Option<String>,
    recipients: Vec<String>,
}

impl Session {
    pub fn new(hostname: &str, max_message_size: usize) -> Self {
        Self {
            hostname: hostname.to_string(),
            max_message_size,
            state: State::Connected,
            client: None,
            sender: None,
            recipients: Vec::new(),
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// Domain the client announced in HELO/EHLO.
    pub fn client(&self) -> Option<&str> {
        self.client.as_deref()
    }

    pub fn greeting(&self) -> Reply {
        Reply::greeting(&self.hostname)
    }

    /// Handle one command line (without its line ending).
    pub fn handle_line(&mut self, line: &str) -> Action {
        let line = line.trim_end_matches(['\r', '\n']);
        let (verb, arg) = match line.split_once(' ') {
            Some((verb, arg)) => (verb, arg.trim()),
            None => (line, ""),
        };
        trace!(verb, state = ?self.state, "SMTP command");

        match verb.to_ascii_uppercase().as_str() {
            "HELO" => Action::Reply(self.helo(arg, false)),
            "EHLO" => Action::Reply(self.helo(arg, true)),
            "MAIL" => Action::Reply(self.mail(arg)),
            "RCPT" => Action::Reply(self.rcpt(arg)),
            "DATA" => self.data(arg),
            "RSET" => {
                self.reset();
                Action::Reply(Reply::ok())
            }
            "NOOP" => Action::Reply(Reply::ok()),
            "QUIT" => Action::Quit(Reply::closing(&self.hostname)),
            _ => Action::Reply(Reply::unknown_command()),
        }
    }

    /// Hand over the envelope once the message data has been read, and
    /// return to the greeted state.
    pub fn take_envelope(&mut self) -> Option<Envelope> {
        if self.state != State::Rcpt {
            return None;
        }
        let envelope = Envelope {
            sender: self.sender.take().unwrap_or_default(),
            recipients: std::mem::take(&mut self.recipients),
        };
        self.state = State::Greeted;
        Some(envelope)
    }

    /// Abort the current transaction, keeping the greeting.
    pub fn reset(&mut self) {
        self.sender = None;
        self.recipients.clear();
        if self.state != State::Connected {
            self.state = State::Greeted;
        }
    }

    fn helo(&mut self, arg: &str, extended: bool) -> Reply {
        if arg.is_empty() {
            return Reply::syntax("domain name required");
        }
        self.client = Some(arg.to_string());
        self.state = State::Greeted;
        self.reset();

        let greeting = format!("{} greets {arg}", self.hostname);
        if extended {
            Reply::multiline(
                250,
                vec![
                    greeting,
                    format!("SIZE {}", self.max_message_size),
                    "8BITMIME".to_string(),
                ],
            )
        } else {
            Reply::new(250, greeting)
        }
    }

    fn mail(&mut self, arg: &str) -> Reply {
        match self.state {
            State::Connected => return Reply::bad_sequence("send HELO first"),
            State::Mail | State::Rcpt => return Reply::bad_sequence("nested MAIL command"),
            State::Greeted => {}
        }
        let Some((sender, params)) = parse_path(arg, "FROM:") else {
            return Reply::syntax("expected MAIL FROM:<address>");
        };
        if let Some(size) = declared_size(params) {
            if size > self.max_message_size {
                return Reply::too_large(self.max_message_size);
            }
        }
        self.sender = Some(sender.to_string());
        self.state = State::Mail;
        Reply::ok()
    }

    fn rcpt(&mut self, arg: &str) -> Reply {
        if !matches!(self.state, State::Mail | State::Rcpt) {
            return Reply::bad_sequence("need MAIL before RCPT");
        }
        let Some((recipient, _)) = parse_path(arg, "TO:").filter(|(r, _)| !r.is_empty()) else {
            return Reply::syntax("expected RCPT TO:<address>");
        };
        self.recipients.push(recipient.to_string());
        self.state = State::Rcpt;
        Reply::ok()
    }

    fn data(&mut self, arg: &str) -> Action {
        if !arg.is_empty() {
            return Action::Reply(Reply::syntax("DATA takes no arguments"));
        }
        match self.state {
            State::Rcpt => Action::StartData(Reply::start_data()),
            _ => Action::Reply(Reply::bad_sequence("need RCPT before DATA")),
        }
    }
}

/// Parse `FROM:<path> params` / `TO:<path> params`, returning the address
/// and the remaining parameters. Bare addresses without brackets are
/// accepted too.
fn parse_path<'a>(arg: &'a str, keyword: &str) -> Option<(&'a str, &'a str)> {
    let head = arg.get(..keyword.len())?;
    if !head.eq_ignore_ascii_case(keyword) {
        return None;
    }
    let rest = arg[keyword.len()..].trim_start();

    let (path, params) = match rest.strip_prefix('<') {
        Some(inner) => {
            let close = inner.find('>')?;
            (&inner[..close], inner[close + 1..].trim())
        }
        None => match rest.split_once(char::is_whitespace) {
            Some((path, params)) => (path, params.trim()),
            None => (rest, ""),
        },
    };
    if path.len() > PATH_MAX_LENGTH || path.contains(char::is_whitespace) {
        return None;
    }
    // Drop an obsolete source route: `@a,@b:user@x`.
    let path = match path.split_once(':') {
        Some((route, mailbox)) if route.starts_with('@') => mailbox,
        _ => path,
    };
    Some((path, params))
}

/// The `SIZE=` parameter of `MAIL FROM`, if declared.
fn declared_size(params: &str) -> Option<usize> {
    params.split_whitespace().find_map(|param| {
        let (key, value) = param.split_once('=')?;
        key.eq_ignore_ascii_case("SIZE")
            .then(|| value.parse().ok())
            .flatten()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn greeted() -> Session {
        let mut session = Session::new("test.local", 1000);
        session.handle_line("HELO client.example");
        session
    }

    fn code(action: Action) -> u16 {
        match action {
            Action::Reply(r) | Action::StartData(r) | Action::Quit(r) => r.code(),
        }
    }

    #[test]
    fn test_full_transaction() {
        let mut s = greeted();
        assert_eq!(code(s.handle_line("MAIL FROM:<a@x.com>")), 250);
        assert_eq!(code(s.handle_line("RCPT TO:<b@x.com>")), 250);
        assert_eq!(code(s.handle_line("rcpt to: <c@x.com>")), 250);
        assert!(matches!(s.handle_line("DATA"), Action::StartData(_)));
        let envelope = s.take_envelope().unwrap();
        assert_eq!(envelope.sender, "a@x.com");
        assert_eq!(envelope.recipients, vec!["b@x.com", "c@x.com"]);
        assert_eq!(s.state(), State::Greeted);
    }

    #[test]
    fn test_mail_before_helo() {
        let mut s = Session::new("test.local", 1000);
        assert_eq!(code(s.handle_line("MAIL FROM:<a@x.com>")), 503);
    }

    #[test]
    fn test_sequence_errors() {
        let mut s = greeted();
        assert_eq!(code(s.handle_line("RCPT TO:<b@x.com>")), 503);
        assert_eq!(code(s.handle_line("DATA")), 503);
        s.handle_line("MAIL FROM:<a@x.com>");
        assert_eq!(code(s.handle_line("MAIL FROM:<a@x.com>")), 503);
        assert_eq!(code(s.handle_line("DATA")), 503);
    }

    #[test]
    fn test_syntax_errors() {
        let mut s = greeted();
        assert_eq!(code(s.handle_line("HELO")), 501);
        assert_eq!(code(s.handle_line("MAIL <a@x.com>")), 501);
        s.handle_line("MAIL FROM:<a@x.com>");
        assert_eq!(code(s.handle_line("RCPT TO:<>")), 501);
        assert_eq!(code(s.handle_line("RCPT TO:<b@x.com")), 501);
        s.handle_line("RCPT TO:<b@x.com>");
        assert_eq!(code(s.handle_line("DATA now")), 501);
    }

    #[test]
    fn test_unknown_and_quit() {
        let mut s = greeted();
        assert_eq!(code(s.handle_line("FROB")), 500);
        assert!(matches!(s.handle_line("QUIT"), Action::Quit(_)));
    }

    #[test]
    fn test_null_sender_and_rset() {
        let mut s = greeted();
        assert_eq!(code(s.handle_line("MAIL FROM:<>")), 250);
        s.handle_line("RCPT TO:b@x.com");
        assert_eq!(code(s.handle_line("RSET")), 250);
        assert_eq!(s.state(), State::Greeted);
        assert!(s.take_envelope().is_none());
    }

    #[test]
    fn test_ehlo_advertises_size() {
        let mut s = Session::new("test.local", 1000);
        let Action::Reply(reply) = s.handle_line("EHLO client") else {
            panic!("expected reply");
        };
        assert!(reply.to_string().contains("250-SIZE 1000\r\n"));
    }

    #[test]
    fn test_declared_size_too_large() {
        let mut s = greeted();
        assert_eq!(code(s.handle_line("MAIL FROM:<a@x.com> SIZE=5000")), 552);
        assert_eq!(code(s.handle_line("MAIL FROM:<a@x.com> SIZE=500")), 250);
    }

    #[test]
    fn test_source_route_dropped() {
        assert_eq!(
            parse_path("TO:<@relay.example:b@x.com>", "TO:"),
            Some(("b@x.com", ""))
        );
    }
}
