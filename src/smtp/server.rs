//! Blocking SMTP listener: one thread per connection.

use std::io::{self, BufRead, BufReader, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use super::reply::Reply;
use super::session::{Action, Session};
use crate::error::{Result, SinkError};
use crate::ingest::ingest;
use crate::store::MessageStore;

/// A client silent for this long is disconnected.
const IDLE_TIMEOUT: Duration = Duration::from_secs(300);

/// Outcome of reading a DATA section.
#[derive(Debug, PartialEq, Eq)]
enum Data {
    Complete(Vec<u8>),
    TooLarge,
    Disconnected,
}

/// Accepts mail and hands every completed transaction to the store.
#[derive(Clone)]
pub struct SmtpServer {
    hostname: Arc<str>,
    max_message_size: usize,
    store: Arc<MessageStore>,
}

impl SmtpServer {
    pub fn new(hostname: &str, max_message_size: usize, store: Arc<MessageStore>) -> Self {
        Self {
            hostname: hostname.into(),
            max_message_size,
            store,
        }
    }

    /// Bind the listening socket.
    pub fn bind(addr: SocketAddr) -> Result<TcpListener> {
        TcpListener::bind(addr).map_err(|e| SinkError::io(format!("binding SMTP to {addr}"), e))
    }

    /// Accept connections forever, serving each on its own thread.
    pub fn serve(&self, listener: TcpListener) -> Result<()> {
        let local = listener
            .local_addr()
            .map_err(|e| SinkError::io("reading SMTP listener address", e))?;
        info!(addr = %local, "SMTP server listening");

        for stream in listener.incoming() {
            let stream = match stream {
                Ok(stream) => stream,
                Err(e) => {
                    warn!(error = %e, "Failed to accept SMTP connection");
                    continue;
                }
            };
            let server = self.clone();
            let spawned = thread::Builder::new()
                .name("smtp-client".into())
                .spawn(move || {
                    let peer = stream.peer_addr().ok();
                    if let Err(e) = server.handle_client(stream) {
                        debug!(peer = ?peer, error = %e, "SMTP connection ended with error");
                    }
                });
            if let Err(e) = spawned {
                error!(error = %e, "Failed to spawn SMTP connection thread");
            }
        }
        Ok(())
    }

    /// Run one SMTP conversation to completion.
    pub fn handle_client(&self, stream: TcpStream) -> io::Result<()> {
        stream.set_read_timeout(Some(IDLE_TIMEOUT))?;
        let peer = stream.peer_addr()?;
        debug!(peer = %peer, "SMTP client connected");

        let mut writer = stream.try_clone()?;
        let mut reader = BufReader::new(stream);
        let mut session = Session::new(&self.hostname, self.max_message_size);
        send(&mut writer, &session.greeting())?;

        let mut line = Vec::new();
        loop {
            line.clear();
            if reader.read_until(b'\n', &mut line)? == 0 {
                break;
            }
            let command = String::from_utf8_lossy(&line);

            match session.handle_line(&command) {
                Action::Reply(reply) => send(&mut writer, &reply)?,
                Action::Quit(reply) => {
                    send(&mut writer, &reply)?;
                    break;
                }
                Action::StartData(reply) => {
                    send(&mut writer, &reply)?;
                    let reply = match read_data(&mut reader, self.max_message_size)? {
                        Data::Disconnected => break,
                        Data::TooLarge => {
                            session.reset();
                            Reply::too_large(self.max_message_size)
                        }
                        Data::Complete(body) => match session.take_envelope() {
                            Some(envelope) => self.deliver(&envelope.sender, &envelope.recipients, &body),
                            None => Reply::bad_sequence("no transaction in progress"),
                        },
                    };
                    send(&mut writer, &reply)?;
                }
            }
        }

        debug!(peer = %peer, client = ?session.client(), "SMTP client disconnected");
        Ok(())
    }

    fn deliver(&self, sender: &str, recipients: &[String], body: &[u8]) -> Reply {
        match ingest(&self.store, sender, recipients, body) {
            Ok(id) => Reply::queued(id),
            Err(e) => {
                error!(error = %e, "Failed to store message");
                Reply::local_error()
            }
        }
    }
}

fn send(writer: &mut impl Write, reply: &Reply) -> io::Result<()> {
    writer.write_all(reply.to_string().as_bytes())?;
    writer.flush()
}

/// Read message data up to the lone `.` line.
///
/// Leading dots are unstuffed and line endings kept as sent. Once the limit
/// is exceeded the rest of the data is read and discarded.
fn read_data(reader: &mut impl BufRead, max_size: usize) -> io::Result<Data> {
    let mut body = Vec::new();
    let mut too_large = false;
    let mut line = Vec::new();

    loop {
        line.clear();
        if reader.read_until(b'\n', &mut line)? == 0 {
            return Ok(Data::Disconnected);
        }
        if line == b".\r\n" || line == b".\n" {
            break;
        }
        if too_large {
            continue;
        }
        let content = line.strip_prefix(b".").unwrap_or(&line);
        if body.len() + content.len() > max_size {
            too_large = true;
            body = Vec::new();
            continue;
        }
        body.extend_from_slice(content);
    }

    Ok(if too_large {
        Data::TooLarge
    } else {
        Data::Complete(body)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_read_data_unstuffs_dots() {
        let mut input = Cursor::new(b"Subject: x\r\n\r\n..hidden\r\n.\r\nNOOP\r\n".to_vec());
        let data = read_data(&mut input, 1024).unwrap();
        assert_eq!(data, Data::Complete(b"Subject: x\r\n\r\n.hidden\r\n".to_vec()));
    }

    #[test]
    fn test_read_data_keeps_bare_lf() {
        let mut input = Cursor::new(b"a\nb\r\n.\n".to_vec());
        assert_eq!(
            read_data(&mut input, 1024).unwrap(),
            Data::Complete(b"a\nb\r\n".to_vec())
        );
    }

    #[test]
    fn test_read_data_too_large_consumes_rest() {
        let mut input = Cursor::new(b"0123456789\r\nmore\r\n.\r\nQUIT\r\n".to_vec());
        assert_eq!(read_data(&mut input, 8).unwrap(), Data::TooLarge);
        let mut rest = String::new();
        input.read_line(&mut rest).unwrap();
        assert_eq!(rest, "QUIT\r\n");
    }

    #[test]
    fn test_read_data_disconnect() {
        let mut input = Cursor::new(b"partial\r\n".to_vec());
        assert_eq!(read_data(&mut input, 1024).unwrap(), Data::Disconnected);
    }
}
