//! Entry point for messages handed over by the SMTP front-end.

use humansize::{format_size, BINARY};
use tracing::info;

use crate::error::Result;
use crate::parser::decompose;
use crate::store::MessageStore;

/// Decompose and store one received message, returning its id.
///
/// MIME problems never reject a message; only a storage failure is reported.
pub fn ingest(store: &MessageStore, sender: &str, recipients: &[String], body: &[u8]) -> Result<i64> {
    let parsed = decompose(sender, recipients, body);
    info!(
        from = %parsed.from,
        recipients = recipients.len(),
        size = %format_size(parsed.size(), BINARY),
        "Received message"
    );

    store.insert(&parsed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Projection;
    use crate::notify::{Event, NotificationBus};

    #[test]
    fn test_ingest_broadcasts_add() {
        let bus = NotificationBus::new();
        let store = MessageStore::open_in_memory(bus.clone()).unwrap();
        let mut sub = bus.subscribe();

        let raw = b"Subject: hi\r\n\r\nbody\r\n";
        let id = ingest(&store, "a@x.com", &["b@x.com".into()], raw).unwrap();

        assert_eq!(sub.try_recv(), Some(Event::Connected));
        assert_eq!(sub.try_recv(), Some(Event::AddMessage(id)));
        let stored = store.get_message(id, Projection::Full).unwrap().unwrap();
        assert_eq!(stored.source.as_deref(), Some(&raw[..]));
        assert_eq!(stored.recipients.to, vec!["b@x.com"]);
    }

    #[test]
    fn test_garbage_still_stored() {
        let store = MessageStore::open_in_memory(NotificationBus::new()).unwrap();
        let raw = b"\x00\x01\x02 not a message";
        let id = ingest(&store, "", &[], raw).unwrap();
        assert_eq!(store.parts(id).unwrap().len(), 1);
    }
}
