use callscope_types::{CallRecord, Json, POST_TYPE};
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

/// One message posted on the page bus.
///
/// The bus is shared with unrelated traffic; `message_type` tells call
/// records apart from everything else. `data` holds the record as a
/// structured value.
#[derive(Clone, Debug, PartialEq)]
pub struct PageMessage {
    pub message_type: String,
    pub data: Json,
}

impl PageMessage {
    pub fn new(message_type: impl Into<String>, data: Json) -> Self {
        Self {
            message_type: message_type.into(),
            data,
        }
    }

    pub fn is_call_record(&self) -> bool {
        self.message_type == POST_TYPE
    }
}

/// Posting side of the page bus. Never blocks.
#[derive(Clone)]
pub struct PageBusSender {
    tx: mpsc::UnboundedSender<PageMessage>,
}

impl PageBusSender {
    /// Returns false when nobody listens any more.
    pub fn post(&self, message: PageMessage) -> bool {
        self.tx.send(message).is_ok()
    }
}

pub type PageBusReceiver = mpsc::UnboundedReceiver<PageMessage>;

pub fn page_bus() -> (PageBusSender, PageBusReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (PageBusSender { tx }, rx)
}

/// Serializes call records and posts them, fire-and-forget.
#[derive(Clone, Default)]
pub struct Emitter {
    bus: Option<PageBusSender>,
}

impl Emitter {
    pub fn new(bus: Option<PageBusSender>) -> Self {
        Self { bus }
    }

    /// Posts one record. Drops it silently when the bus is absent or closed.
    pub fn emit(&self, record: &CallRecord) {
        let Some(bus) = self.bus.as_ref() else {
            trace!(method = %record.method, "no page bus; record dropped");
            return;
        };
        let data = match Json::encode(record) {
            Ok(data) => data,
            Err(e) => {
                warn!(method = %record.method, %e, "failed to encode call record");
                return;
            }
        };
        if !bus.post(PageMessage::new(POST_TYPE, data)) {
            debug!(method = %record.method, "page bus closed; record dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emitted_records_are_tagged() {
        let (tx, mut rx) = page_bus();
        let emitter = Emitter::new(Some(tx));
        emitter.emit(&CallRecord::stream_eof("Events.Watch"));

        let message = rx.try_recv().expect("record should be posted");
        assert!(message.is_call_record());
        assert_eq!(
            message.data.to_json_string().expect("data should encode"),
            r#"{"method":"Events.Watch","methodType":"server_streaming","response":"EOF"}"#
        );
        let record: CallRecord = message.data.decode().expect("data should decode");
        assert!(record.is_terminal());
    }

    #[test]
    fn missing_or_closed_bus_drops_quietly() {
        Emitter::new(None).emit(&CallRecord::stream_eof("Events.Watch"));

        let (tx, rx) = page_bus();
        drop(rx);
        Emitter::new(Some(tx)).emit(&CallRecord::stream_eof("Events.Watch"));
    }
}
