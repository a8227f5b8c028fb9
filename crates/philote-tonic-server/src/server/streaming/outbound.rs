use philote_tonic_core::{
    ArrayMap, Error, Jacobian, Result, Role,
    proto::{ArrayChunk, VariableRole},
    wire::encode,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tonic::Status;

/// Result of an evaluation RPC, ready to be chunked.
#[derive(Debug)]
pub enum Payload {
    Arrays { arrays: ArrayMap, role: Role },
    Partials(Jacobian),
}

impl Payload {
    /// Lazily chunks the payload in map order. Partial chunks carry the `wrt`
    /// name in `subname`.
    pub fn chunks(&self, max_chunk: usize) -> Box<dyn Iterator<Item = ArrayChunk> + Send + '_> {
        match self {
            Self::Arrays { arrays, role } => {
                let role = VariableRole::from(*role);
                Box::new(
                    arrays
                        .iter()
                        .flat_map(move |(name, a)| encode(name, "", role, a.as_slice(), max_chunk)),
                )
            }
            Self::Partials(jac) => Box::new(jac.iter().flat_map(move |(of, wrt, block)| {
                encode(of, wrt, VariableRole::Partial, block.as_slice(), max_chunk)
            })),
        }
    }
}

/// Streams `payload` to the client in chunks of at most `max_chunk` values.
///
/// Returns the number of chunks sent.
///
/// # Behavior
///
/// - Chunks are produced lazily and sent through `resp_tx` one at a time, so
///   a slow client applies backpressure through the bounded channel.
/// - If `shutdown` is cancelled mid-stream, an `UNAVAILABLE` status is
///   forwarded (best effort) and feeding stops.
/// - If the client disconnects, returns [`Error::ChannelError`].
pub async fn feed_chunks(
    payload: Payload,
    max_chunk: usize,
    resp_tx: mpsc::Sender<core::result::Result<ArrayChunk, Status>>,
    shutdown: CancellationToken,
) -> Result<usize> {
    let mut sent = 0;

    for chunk in payload.chunks(max_chunk) {
        if shutdown.is_cancelled() {
            // The client may be gone as well, in which case there is nobody
            // left to tell.
            if let Err(_e) = resp_tx.send(Err(Error::ServiceShutdown.into())).await {
                #[cfg(feature = "tracing")]
                tracing::warn!("Failed to forward shutdown: {}", _e);
            }
            return Err(Error::ServiceShutdown);
        }

        if let Err(e) = resp_tx.send(Ok(chunk)).await {
            return Err(Error::ChannelError {
                context: format!("Failed to forward chunk: {e}"),
            });
        }
        sent += 1;
    }

    Ok(sent)
}

#[cfg(test)]
mod tests {
    use super::*;
    use philote_tonic_core::{Array, Metadata};

    fn outputs() -> ArrayMap {
        [
            ("f", Array::vector((0..5).map(f64::from).collect())),
            ("g", Array::scalar(9.0)),
        ]
        .into_iter()
        .collect()
    }

    #[tokio::test]
    async fn sends_every_chunk_in_order() {
        let (tx, mut rx) = mpsc::channel(16);
        let payload = Payload::Arrays {
            arrays: outputs(),
            role: Role::Output,
        };
        let sent = feed_chunks(payload, 2, tx, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(sent, 4);

        let mut got = Vec::new();
        while let Some(chunk) = rx.recv().await {
            let chunk = chunk.unwrap();
            assert_eq!(chunk.role, VariableRole::Output as i32);
            got.push((chunk.name, chunk.start, chunk.end));
        }
        assert_eq!(
            got,
            vec![
                ("f".to_string(), 0, 2),
                ("f".to_string(), 2, 4),
                ("f".to_string(), 4, 5),
                ("g".to_string(), 0, 1),
            ]
        );
    }

    #[tokio::test]
    async fn partial_chunks_carry_wrt_in_subname() {
        let mut meta = Metadata::explicit();
        meta.add_input("x", &[3], "").unwrap();
        meta.add_output("f", &[1], "").unwrap();
        meta.declare_partials("f", "x");
        let jac = meta.allocate_jacobian().unwrap();

        let (tx, mut rx) = mpsc::channel(16);
        feed_chunks(Payload::Partials(jac), 1000, tx, CancellationToken::new())
            .await
            .unwrap();
        let chunk = rx.recv().await.unwrap().unwrap();
        assert_eq!((chunk.name.as_str(), chunk.subname.as_str()), ("f", "x"));
        assert_eq!(chunk.role, VariableRole::Partial as i32);
        assert_eq!(chunk.data.len(), 3);
    }

    #[tokio::test]
    async fn stops_on_shutdown() {
        let (tx, mut rx) = mpsc::channel(16);
        let token = CancellationToken::new();
        token.cancel();
        let payload = Payload::Arrays {
            arrays: outputs(),
            role: Role::Output,
        };
        assert_eq!(
            feed_chunks(payload, 2, tx, token).await,
            Err(Error::ServiceShutdown)
        );
        let status = rx.recv().await.unwrap().unwrap_err();
        assert_eq!(status.code(), tonic::Code::Unavailable);
    }

    #[tokio::test]
    async fn reports_disconnected_client() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let payload = Payload::Arrays {
            arrays: outputs(),
            role: Role::Output,
        };
        assert!(matches!(
            feed_chunks(payload, 2, tx, CancellationToken::new()).await,
            Err(Error::ChannelError { .. })
        ));
    }
}
