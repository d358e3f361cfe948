use bytes::Bytes;
use hyper::body::{Body, Frame, SizeHint};
use std::pin::Pin;
use std::task::{Context, Poll};
use storage::{ObjectBody, StorageError};
use tokio::sync::mpsc;

/// Size of each chunk copied from the object to the client.
pub const CHUNK_SIZE: usize = 4096;

/// Response body that streams an object in [`CHUNK_SIZE`] chunks.
///
/// A background task reads the object one chunk ahead of the client. If the
/// client goes away the response body is dropped, and the task closes the
/// object instead of draining it.
pub struct ObjectStream {
    rx: mpsc::Receiver<Result<Bytes, StorageError>>,
}

impl ObjectStream {
    pub fn new(body: ObjectBody) -> Self {
        let (tx, rx) = mpsc::channel(1);
        tokio::spawn(pump(body, tx));
        ObjectStream { rx }
    }
}

async fn pump(mut body: ObjectBody, tx: mpsc::Sender<Result<Bytes, StorageError>>) {
    loop {
        let next = tokio::select! {
            _ = tx.closed() => None,
            chunk = body.read(CHUNK_SIZE) => Some(chunk),
        };

        let chunk = match next {
            Some(Ok(Some(chunk))) => chunk,
            // fully drained
            Some(Ok(None)) => return,
            Some(Err(e)) => {
                tracing::warn!(error = %e, "Failed reading object body");
                let _ = tx.send(Err(e)).await;
                return;
            }
            None => break,
        };

        if tx.send(Ok(chunk)).await.is_err() {
            break;
        }
    }

    tracing::debug!("Client went away mid-stream");
    body.close();
}

impl Body for ObjectStream {
    type Data = Bytes;
    type Error = StorageError;

    fn poll_frame(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Bytes>, StorageError>>> {
        self.rx
            .poll_recv(cx)
            .map(|item| item.map(|chunk| chunk.map(Frame::data)))
    }

    fn size_hint(&self) -> SizeHint {
        SizeHint::default()
    }
}
