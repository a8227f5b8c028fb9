use futures::{Stream, StreamExt};
use philote_tonic_core::{
    ArrayMap, Error, Kind, Metadata, Result, Role,
    chunk::ChunkCursor,
    proto::ArrayChunk,
    wire::{ChunkRole, write_chunk},
};
use tokio_util::sync::CancellationToken;
use tonic::Status;

/// Dense buffers reassembled from a client chunk stream.
#[derive(Debug)]
pub struct Received {
    pub inputs: ArrayMap,
    /// Implicit disciplines only; empty for explicit ones.
    pub outputs: ArrayMap,
    pub chunks: usize,
}

/// Consumes `stream` to completion, scatter-writing every chunk into buffers
/// preallocated from `meta`.
///
/// Explicit disciplines accept input chunks only. Implicit disciplines also
/// accept output chunks, which seed the output buffers. Anything else aborts
/// the RPC before the discipline is invoked. Each array's chunks must arrive
/// in order and cover it exactly once; arrays with no chunks stay zero.
///
/// Gives up as soon as `shutdown` is cancelled, so a client that never closes
/// its stream cannot hold the server open.
///
/// # Errors
///
/// - [`Error::UnexpectedRole`] or [`Error::InvalidRole`] for a chunk role the
///   discipline does not accept.
/// - [`Error::UnknownVariable`] for a chunk naming an undeclared variable.
/// - [`Error::ChunkOutOfOrder`] for a repeated, overlapping or skipped range,
///   and [`Error::IncompleteArray`] if the stream ends partway through an
///   array.
/// - The chunk validation errors of [`philote_tonic_core::chunk::scatter`].
/// - [`Error::Rpc`] if the client stream itself fails.
/// - [`Error::ServiceShutdown`] once `shutdown` is cancelled.
pub async fn receive_chunks<S>(
    stream: &mut S,
    meta: &Metadata,
    shutdown: &CancellationToken,
) -> Result<Received>
where
    S: Stream<Item = core::result::Result<ArrayChunk, Status>> + Unpin,
{
    let accept_outputs = meta.kind() == Kind::Implicit;
    let mut received = Received {
        inputs: meta.allocate(Role::Input),
        outputs: if accept_outputs {
            meta.allocate(Role::Output)
        } else {
            ArrayMap::new()
        },
        chunks: 0,
    };
    let mut input_cursor = ChunkCursor::new();
    let mut output_cursor = ChunkCursor::new();

    loop {
        let next = tokio::select! {
            biased;
            _ = shutdown.cancelled() => {
                #[cfg(feature = "tracing")]
                tracing::warn!("Shutdown while receiving chunks");
                return Err(Error::ServiceShutdown);
            }
            next = stream.next() => next,
        };
        let Some(chunk) = next else {
            break;
        };
        let chunk = chunk?;
        match ChunkRole::try_from(chunk.role)? {
            ChunkRole::Variable(Role::Input) => {
                write_chunk(&mut received.inputs, Role::Input, &mut input_cursor, &chunk)?;
            }
            ChunkRole::Variable(Role::Output) if accept_outputs => {
                write_chunk(&mut received.outputs, Role::Output, &mut output_cursor, &chunk)?;
            }
            other => {
                #[cfg(feature = "tracing")]
                tracing::warn!("Rejecting {other} chunk for `{}`", chunk.name);
                return Err(Error::UnexpectedRole {
                    name: chunk.name,
                    role: other.to_string(),
                });
            }
        }
        received.chunks += 1;
    }
    input_cursor.finish()?;
    output_cursor.finish()?;

    #[cfg(feature = "tracing")]
    tracing::debug!("Received {} chunks", received.chunks);
    Ok(received)
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::time::Duration;
    use philote_tonic_core::{proto::VariableRole, wire::encode_map};

    fn quadratic_meta() -> Metadata {
        let mut meta = Metadata::implicit();
        meta.add_input("a", &[1], "").unwrap();
        meta.add_input("v", &[3], "").unwrap();
        meta.add_output("x", &[2], "").unwrap();
        meta
    }

    fn chunk(name: &str, role: VariableRole, start: u64, data: Vec<f64>) -> ArrayChunk {
        ArrayChunk {
            name: name.to_string(),
            subname: String::new(),
            role: role as i32,
            start,
            end: start + data.len() as u64,
            data,
        }
    }

    #[tokio::test]
    async fn reassembles_inputs_and_output_guesses() {
        let meta = quadratic_meta();
        let mut inputs = meta.allocate(Role::Input);
        inputs["a"][0] = 3.0;
        inputs["v"].assign("v", &[1.0, 2.0, 3.0]).unwrap();
        let mut outputs = meta.allocate(Role::Output);
        outputs["x"].assign("x", &[4.0, 5.0]).unwrap();

        let mut chunks = encode_map(&inputs, Role::Input, 2);
        chunks.extend(encode_map(&outputs, Role::Output, 1));
        let n = chunks.len();
        let mut stream = futures::stream::iter(chunks.into_iter().map(Ok));

        let received = receive_chunks(&mut stream, &meta, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(received.inputs, inputs);
        assert_eq!(received.outputs, outputs);
        assert_eq!(received.chunks, n);
    }

    #[tokio::test]
    async fn arrays_without_chunks_stay_zero() {
        let meta = quadratic_meta();
        let mut stream = futures::stream::iter(vec![
            Ok(chunk("v", VariableRole::Input, 0, vec![6.0])),
            Ok(chunk("v", VariableRole::Input, 1, vec![7.0, 8.0])),
        ]);
        let received = receive_chunks(&mut stream, &meta, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(received.inputs["v"].as_slice(), &[6.0, 7.0, 8.0]);
        assert_eq!(received.inputs["a"][0], 0.0);
        assert_eq!(received.outputs["x"].as_slice(), &[0.0, 0.0]);
    }

    #[tokio::test]
    async fn rejects_repeated_overlapping_and_truncated_arrays() {
        let meta = quadratic_meta();
        let cases = [
            (
                vec![
                    chunk("v", VariableRole::Input, 0, vec![1.0, 2.0]),
                    chunk("v", VariableRole::Input, 0, vec![1.0, 2.0]),
                ],
                "repeated",
            ),
            (
                vec![
                    chunk("v", VariableRole::Input, 0, vec![1.0, 2.0]),
                    chunk("v", VariableRole::Input, 1, vec![2.0, 3.0]),
                ],
                "overlapping",
            ),
            (
                vec![chunk("v", VariableRole::Input, 1, vec![2.0, 3.0])],
                "skipped",
            ),
        ];
        for (chunks, label) in cases {
            let mut stream = futures::stream::iter(chunks.into_iter().map(Ok));
            let err = receive_chunks(&mut stream, &meta, &CancellationToken::new())
                .await
                .unwrap_err();
            assert!(matches!(err, Error::ChunkOutOfOrder { .. }), "{label}: {err:?}");
        }

        let mut stream = futures::stream::iter(vec![Ok(chunk(
            "x",
            VariableRole::Output,
            0,
            vec![1.0],
        ))]);
        let err = receive_chunks(&mut stream, &meta, &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(
            err,
            Error::IncompleteArray {
                name: "x".to_string(),
                received: 1,
                size: 2
            }
        );
    }

    #[tokio::test]
    async fn shutdown_interrupts_an_open_stream() {
        let meta = quadratic_meta();
        let shutdown = CancellationToken::new();
        let mut stream = futures::stream::iter(vec![Ok(chunk("a", VariableRole::Input, 0, vec![1.0]))])
            .chain(futures::stream::pending());

        let cancel = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            cancel.cancel();
        });

        let err = tokio::time::timeout(
            Duration::from_secs(5),
            receive_chunks(&mut stream, &meta, &shutdown),
        )
        .await
        .unwrap()
        .unwrap_err();
        assert_eq!(err, Error::ServiceShutdown);
    }

    #[tokio::test]
    async fn rejects_protocol_violations() {
        let mut explicit = Metadata::explicit();
        explicit.add_input("x", &[2], "").unwrap();
        explicit.add_output("f", &[1], "").unwrap();

        let cases = [
            chunk("z", VariableRole::Input, 0, vec![1.0]),
            chunk("x", VariableRole::Input, 1, vec![1.0, 2.0]),
            chunk("x", VariableRole::Input, 0, vec![]),
            chunk("f", VariableRole::Output, 0, vec![1.0]),
            chunk("f", VariableRole::Residual, 0, vec![1.0]),
            chunk("f", VariableRole::Partial, 0, vec![1.0]),
        ];
        for case in cases {
            let mut stream = futures::stream::iter(vec![Ok(case.clone())]);
            let result = receive_chunks(&mut stream, &explicit, &CancellationToken::new()).await;
            assert!(result.is_err(), "accepted {case:?}");
        }
    }

    #[tokio::test]
    async fn surfaces_client_stream_failures() {
        let meta = quadratic_meta();
        let mut stream = futures::stream::iter(vec![
            Ok(chunk("a", VariableRole::Input, 0, vec![1.0])),
            Err(Status::cancelled("client went away")),
        ]);
        let err = receive_chunks(&mut stream, &meta, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Rpc {
                code: tonic::Code::Cancelled,
                ..
            }
        ));
    }
}
