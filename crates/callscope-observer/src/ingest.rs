use callscope_types::CallRecord;
use callscope_wire::{
    ClientMessage, DEFAULT_MAX_FRAME_BYTES, PANEL_TARGET, decode_client_payload,
    decode_protocol_magic, frame_payload_len,
};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// One call record received from a connected process.
#[derive(Clone, Debug)]
pub struct ObservedRecord {
    pub conn_id: u64,
    pub process_name: String,
    /// The record as one line of JSON, payloads left structured.
    pub json: String,
    pub record: CallRecord,
}

/// Reads one relay connection until EOF, forwarding each call record to `sink`.
///
/// The stream must open with the protocol magic. Messages addressed to
/// anything but the panel, and records that fail to decode, are skipped.
pub async fn ingest_connection<R>(
    mut reader: R,
    conn_id: u64,
    sink: mpsc::UnboundedSender<ObservedRecord>,
) -> Result<(), String>
where
    R: AsyncRead + Unpin,
{
    let mut magic = [0u8; 4];
    reader
        .read_exact(&mut magic)
        .await
        .map_err(|e| format!("read protocol magic: {e}"))?;
    decode_protocol_magic(magic).map_err(|e| format!("invalid protocol magic: {e}"))?;

    let mut process_name = format!("unknown-{conn_id}");
    loop {
        let mut len_buf = [0u8; 4];
        if let Err(e) = reader.read_exact(&mut len_buf).await {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                debug!(conn_id, "connection closed (EOF)");
                return Ok(());
            }
            return Err(format!("read frame len: {e}"));
        }
        let payload_len = frame_payload_len(len_buf, DEFAULT_MAX_FRAME_BYTES)
            .map_err(|e| format!("bad frame: {e}"))?;
        let mut payload = vec![0u8; payload_len];
        reader
            .read_exact(&mut payload)
            .await
            .map_err(|e| format!("read frame payload: {e}"))?;

        match decode_client_payload(&payload).map_err(|e| format!("decode message: {e}"))? {
            ClientMessage::Init(init) => {
                info!(conn_id, process_name = %init.process_name, pid = init.pid, "process connected");
                process_name = init.process_name;
            }
            ClientMessage::NetworkCall(call) if call.target != PANEL_TARGET => {
                debug!(conn_id, target = %call.target, "message for another target; skipped");
            }
            ClientMessage::NetworkCall(call) => {
                let decoded = call
                    .decode_record()
                    .map_err(|e| e.to_string())
                    .and_then(|record| call.data.to_json_string().map(|json| (json, record)));
                match decoded {
                    Ok((json, record)) => {
                        let observed = ObservedRecord {
                            conn_id,
                            process_name: process_name.clone(),
                            json,
                            record,
                        };
                        if sink.send(observed).is_err() {
                            return Ok(());
                        }
                    }
                    Err(e) => warn!(conn_id, %e, "undecodable call record; skipped"),
                }
            }
        }
    }
}
