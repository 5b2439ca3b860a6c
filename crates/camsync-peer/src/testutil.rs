//! Scripted endpoint nodes for session and coordinator tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use camsync_frame::{Frame, FrameConfig};
use futures_util::{SinkExt, StreamExt};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;

use crate::connector;
use crate::message::Message;
use crate::metadata::tests::raw_metadata;
use crate::metadata::{CaptureRequest, Completion};

pub(crate) enum Step {
    Send(Message),
    Sleep(Duration),
    /// Bytes written straight to the socket, bypassing the encoder.
    Raw(Vec<u8>),
    Close,
}

/// Start a node on loopback that answers every capture-request with the
/// steps `script` returns. The second argument counts requests across all
/// connections, starting at 0.
pub(crate) async fn scripted_endpoint<F>(script: F) -> String
where
    F: Fn(CaptureRequest, usize) -> Vec<Step> + Send + Sync + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("listener should bind");
    let addr = listener.local_addr().expect("local addr").to_string();
    let script = Arc::new(script);
    let served = Arc::new(AtomicUsize::new(0));

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let script = Arc::clone(&script);
            let served = Arc::clone(&served);
            tokio::spawn(async move {
                let mut framed = connector::wrap(stream, FrameConfig::default());
                while let Some(Ok(frame)) = framed.next().await {
                    let Ok(Message::CaptureRequest(request)) = Message::from_frame(frame) else {
                        continue;
                    };
                    let n = served.fetch_add(1, Ordering::SeqCst);
                    for step in script(request, n) {
                        match step {
                            Step::Send(message) => {
                                let frame = message.to_frame().expect("message should encode");
                                if framed.send(frame).await.is_err() {
                                    return;
                                }
                            }
                            Step::Sleep(d) => tokio::time::sleep(d).await,
                            Step::Raw(bytes) => {
                                if SinkExt::<Frame>::flush(&mut framed).await.is_err()
                                    || framed.get_mut().write_all(&bytes).await.is_err()
                                {
                                    return;
                                }
                            }
                            Step::Close => return,
                        }
                    }
                }
            });
        }
    });

    addr
}

/// Metadata, `data` split into `chunk`-byte chunks, then complete.
pub(crate) fn raw_transfer(
    request_id: u64,
    sensor_width: u32,
    sensor_height: u32,
    data: &[u8],
    chunk: usize,
) -> Vec<Step> {
    let mut meta = raw_metadata(sensor_width, sensor_height);
    meta.request_id = Some(request_id);
    meta.size = data.len() as u64;
    meta.chunk_size = chunk as u64;

    let mut steps = vec![Step::Send(Message::Metadata(meta))];
    steps.extend(
        data.chunks(chunk)
            .map(|c| Step::Send(Message::Chunk(Bytes::copy_from_slice(c)))),
    );
    steps.push(Step::Send(Message::Complete(Completion {
        request_id: Some(request_id),
    })));
    steps
}
