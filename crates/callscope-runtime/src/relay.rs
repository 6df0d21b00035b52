use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use callscope_wire::{ClientMessage, Init, NetworkCall, encode_client_message_default};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::emitter::PageBusReceiver;

/// Forwards call records from the page bus to the observer at `addr`.
///
/// Runs on the current Tokio runtime when there is one, otherwise on a
/// dedicated thread with its own current-thread runtime.
pub fn spawn_relay(addr: String, process_name: String, rx: PageBusReceiver) {
    if let Ok(handle) = tokio::runtime::Handle::try_current() {
        handle.spawn(run_relay(addr, process_name, rx));
        return;
    }

    std::thread::spawn(move || {
        match tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
        {
            Ok(rt) => rt.block_on(run_relay(addr, process_name, rx)),
            Err(e) => warn!(%e, "failed to start relay runtime"),
        }
    });
}

/// Relay loop. The observer connection is opened on the first call record,
/// dropped when the observer hangs up or a write fails, and reopened on the
/// next record. A record that cannot be delivered is dropped.
pub async fn run_relay(addr: String, process_name: String, mut rx: PageBusReceiver) {
    let mut link: Option<ObserverLink> = None;

    while let Some(message) = rx.recv().await {
        if !message.is_call_record() {
            continue;
        }

        if link.as_ref().is_some_and(ObserverLink::is_closed) {
            debug!(%addr, "observer disconnected");
            link = None;
        }

        if link.is_none() {
            match ObserverLink::connect(&addr, &process_name).await {
                Ok(connected) => {
                    info!(%addr, "connected to observer");
                    link = Some(connected);
                }
                Err(e) => {
                    debug!(%addr, %e, "observer unavailable; record dropped");
                    continue;
                }
            }
        }

        let Some(active) = link.as_mut() else {
            continue;
        };
        let call = ClientMessage::NetworkCall(NetworkCall::for_panel(message.data));
        if let Err(e) = active.send(&call).await {
            warn!(%addr, %e, "observer write failed; record dropped");
            link = None;
        }
    }
}

struct ObserverLink {
    writer: OwnedWriteHalf,
    closed: Arc<AtomicBool>,
    watcher: JoinHandle<()>,
}

impl ObserverLink {
    async fn connect(addr: &str, process_name: &str) -> Result<Self, String> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| format!("observer connect: {e}"))?;
        let (mut reader, mut writer) = stream.into_split();

        writer
            .write_all(&callscope_wire::encode_protocol_magic())
            .await
            .map_err(|e| format!("write protocol magic: {e}"))?;

        let closed = Arc::new(AtomicBool::new(false));
        let watcher = tokio::spawn({
            let closed = Arc::clone(&closed);
            async move {
                let mut buf = [0u8; 256];
                loop {
                    match reader.read(&mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(_) => {}
                    }
                }
                closed.store(true, Ordering::Release);
            }
        });

        let mut link = Self {
            writer,
            closed,
            watcher,
        };
        link.send(&ClientMessage::Init(Init {
            process_name: String::from(process_name),
            pid: std::process::id(),
        }))
        .await?;
        Ok(link)
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    async fn send(&mut self, message: &ClientMessage) -> Result<(), String> {
        let frame = encode_client_message_default(message)
            .map_err(|e| format!("encode client message: {e}"))?;
        self.writer
            .write_all(&frame)
            .await
            .map_err(|e| format!("write frame: {e}"))?;
        Ok(())
    }
}

impl Drop for ObserverLink {
    fn drop(&mut self) {
        self.watcher.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emitter::{PageMessage, page_bus};
    use callscope_types::{CallRecord, Json, POST_TYPE};
    use callscope_wire::{
        DEFAULT_MAX_FRAME_BYTES, decode_client_payload, decode_protocol_magic, frame_payload_len,
    };
    use tokio::net::TcpListener;

    async fn read_message(stream: &mut TcpStream) -> ClientMessage {
        let mut prefix = [0u8; 4];
        stream
            .read_exact(&mut prefix)
            .await
            .expect("frame prefix should arrive");
        let len = frame_payload_len(prefix, DEFAULT_MAX_FRAME_BYTES).expect("frame len");
        let mut payload = vec![0u8; len];
        stream
            .read_exact(&mut payload)
            .await
            .expect("frame payload should arrive");
        decode_client_payload(&payload).expect("payload should decode")
    }

    fn record_message(method: &str) -> PageMessage {
        let data = Json::encode(&CallRecord::stream_eof(method)).expect("encode");
        PageMessage::new(POST_TYPE, data)
    }

    #[tokio::test]
    async fn connects_lazily_and_forwards_only_call_records() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr").to_string();
        let (tx, rx) = page_bus();
        tokio::spawn(run_relay(addr, "storefront".into(), rx));

        tx.post(PageMessage::new("unrelated", Json::new(String::from("hello"))));
        tx.post(record_message("Events.Watch"));

        let (mut stream, _) = listener.accept().await.expect("relay should connect");
        let mut magic = [0u8; 4];
        stream.read_exact(&mut magic).await.expect("magic");
        decode_protocol_magic(magic).expect("magic should match");

        let ClientMessage::Init(init) = read_message(&mut stream).await else {
            panic!("first message must be init");
        };
        assert_eq!(init.process_name, "storefront");
        assert_eq!(init.pid, std::process::id());

        let ClientMessage::NetworkCall(call) = read_message(&mut stream).await else {
            panic!("second message must be the record");
        };
        assert_eq!(
            call.decode_record().expect("record"),
            CallRecord::stream_eof("Events.Watch")
        );
    }

    #[tokio::test]
    async fn reconnects_after_observer_hangs_up() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr").to_string();
        let (tx, rx) = page_bus();
        tokio::spawn(run_relay(addr, "storefront".into(), rx));

        tx.post(record_message("First.Call"));
        let (first, _) = listener.accept().await.expect("first connection");
        drop(first);
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        tx.post(record_message("Second.Call"));
        let (mut second, _) = listener.accept().await.expect("relay should reconnect");
        let mut magic = [0u8; 4];
        second.read_exact(&mut magic).await.expect("magic");
        assert!(matches!(read_message(&mut second).await, ClientMessage::Init(_)));
        let ClientMessage::NetworkCall(call) = read_message(&mut second).await else {
            panic!("expected the second record");
        };
        assert_eq!(call.decode_record().expect("record").method, "Second.Call");
    }
}
