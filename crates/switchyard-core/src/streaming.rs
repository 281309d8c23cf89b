//! Message streams for streaming calls.

use std::pin::Pin;

use bytes::Bytes;
use futures_util::{stream, Stream, StreamExt};
use serde::{de::DeserializeOwned, Serialize};

use crate::codec::Codec;
use crate::status::Status;

/// A stream of typed messages, as handed to and returned by handlers.
pub type Streaming<T> = Pin<Box<dyn Stream<Item = Result<T, Status>> + Send + 'static>>;

/// A stream of encoded message payloads.
pub type RawMessages = Streaming<Bytes>;

/// Wraps any `Send` stream as a [`Streaming`].
pub fn boxed<T, S>(inner: S) -> Streaming<T>
where
    S: Stream<Item = Result<T, Status>> + Send + 'static,
{
    Box::pin(inner)
}

/// Builds a [`Streaming`] that yields every item of `items` in order.
pub fn iter<T, I>(items: I) -> Streaming<T>
where
    I: IntoIterator<Item = T>,
    I::IntoIter: Send + 'static,
    T: Send + 'static,
{
    Box::pin(stream::iter(items.into_iter().map(Ok)))
}

/// Decodes each raw payload with `codec`.
///
/// Undecodable payloads surface as protocol-error items.
pub(crate) fn decode<T>(raw: RawMessages, codec: Codec) -> Streaming<T>
where
    T: DeserializeOwned + Send + 'static,
{
    Box::pin(raw.map(move |item| {
        item.and_then(|payload| codec.decode(&payload).map_err(Status::protocol_error))
    }))
}

/// Encodes each typed message with `codec`.
pub(crate) fn encode<T>(typed: Streaming<T>, codec: Codec) -> RawMessages
where
    T: Serialize + Send + 'static,
{
    Box::pin(typed.map(move |item| {
        item.and_then(|message| {
            codec
                .encode(&message)
                .map_err(|err| Status::internal(format!("failed to encode response: {err}")))
        })
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::Code;
    use futures_util::TryStreamExt;

    #[tokio::test]
    async fn test_iter_yields_in_order() {
        let items: Vec<u32> = iter(vec![1, 2, 3]).try_collect().await.unwrap();
        assert_eq!(items, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_decode_reports_bad_payload() {
        let raw = iter(vec![Bytes::from_static(b"1"), Bytes::from_static(b"nope")]);
        let mut typed = decode::<u32>(raw, Codec::Json);

        assert_eq!(typed.next().await.unwrap().unwrap(), 1);
        let err = typed.next().await.unwrap().unwrap_err();
        assert_eq!(err.code(), Code::Internal);
        assert!(err.is_protocol_error());
    }

    #[tokio::test]
    async fn test_encode_passes_statuses_through() {
        let typed: Streaming<u32> = boxed(stream::iter(vec![
            Ok(7),
            Err(Status::not_found("gone")),
        ]));
        let out: Vec<_> = encode(typed, Codec::Json).collect().await;
        assert_eq!(out[0].as_ref().unwrap(), &Bytes::from_static(b"7"));
        assert_eq!(out[1].as_ref().unwrap_err().code(), Code::NotFound);
    }
}
