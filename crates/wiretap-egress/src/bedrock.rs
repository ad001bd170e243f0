//! Cloud-transport adapter: AWS SigV4 signing and event-stream
//! decoding for `/model/{model_id}/invoke[-with-response-stream]`, sourced
//! from the AWS SDK crates rather than anything in the forwarding-client
//! path, since this is the one leg of the proxy that must speak a vendor
//! wire protocol instead of passthrough HTTP.

use aws_credential_types::Credentials;
use aws_sigv4::http_request::{sign, SignableBody, SignableRequest, SigningSettings};
use aws_sigv4::sign::v4;
use aws_smithy_eventstream::frame::{Message, MessageFrameDecoder};
use base64::engine::general_purpose::{STANDARD as BASE64_STANDARD, URL_SAFE as BASE64_URL_SAFE};
use base64::Engine;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::SystemTime;
use tokio::sync::{mpsc, oneshot, Semaphore};
use tokio_stream::wrappers::ReceiverStream;

use crate::error::{Error, Result};

static MODEL_ID: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z0-9._-]+(:[0-9]+)?$").unwrap());

/// Validates a path-supplied Bedrock model id, rejecting traversal and
/// anything that isn't plain identifier characters.
pub fn validate_model_id(candidate: &str) -> Result<()> {
    if MODEL_ID.is_match(candidate) {
        Ok(())
    } else {
        Err(Error::InvalidModelId(candidate.to_string()))
    }
}

/// Bounds concurrent cloud-transport calls. Cloned cheaply; acquiring
/// respects cancellation since dropping the acquire future releases no
/// permit it never held.
#[derive(Clone)]
pub struct ConcurrencyGate {
    semaphore: Arc<Semaphore>,
}

impl ConcurrencyGate {
    pub fn new(capacity: usize) -> Self {
        Self { semaphore: Arc::new(Semaphore::new(capacity)) }
    }

    pub async fn acquire(&self) -> tokio::sync::OwnedSemaphorePermit {
        self.semaphore.clone().acquire_owned().await.expect("semaphore never closed")
    }
}

/// Signs a Bedrock request body with a fresh SigV4 signature, whitelisting
/// only `Content-Type` and `Accept` from the inbound headers.
pub async fn sign_request(
    method: &str,
    uri: &str,
    content_type: Option<&str>,
    accept: Option<&str>,
    body: &[u8],
    region: &str,
    credentials: &Credentials,
) -> Result<Vec<(String, String)>> {
    let identity = credentials.clone().into();
    let signing_settings = SigningSettings::default();
    let signing_params = v4::SigningParams::builder()
        .identity(&identity)
        .region(region)
        .name("bedrock")
        .time(SystemTime::now())
        .settings(signing_settings)
        .build()
        .map_err(|e| Error::Signing(e.to_string()))?
        .into();

    let mut headers: Vec<(&str, &str)> = Vec::new();
    if let Some(ct) = content_type {
        headers.push(("content-type", ct));
    }
    if let Some(accept) = accept {
        headers.push(("accept", accept));
    }

    let signable = SignableRequest::new(method, uri, headers.into_iter(), SignableBody::Bytes(body))
        .map_err(|e| Error::Signing(e.to_string()))?;

    let (instructions, _signature) = sign(signable, &signing_params)
        .map_err(|e| Error::Signing(e.to_string()))?
        .into_parts();

    Ok(instructions
        .headers()
        .map(|(name, value)| (name.to_string(), value.to_string()))
        .collect())
}

/// Tees upstream bytes straight to the client while copying into a bounded
/// observation buffer. Never reports an error once full: a write error here
/// would propagate through the forwarding copy and break the client stream,
/// so overflow is recorded as a flag and a counter instead, and decoding is
/// skipped for the dropped tail.
pub struct LimitedWriter {
    buffer: Vec<u8>,
    capacity: usize,
    overflowed: bool,
    dropped_bytes: Arc<AtomicU32>,
}

impl LimitedWriter {
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(capacity.min(1 << 20)),
            capacity,
            overflowed: false,
            dropped_bytes: Arc::new(AtomicU32::new(0)),
        }
    }

    /// Always succeeds; see the struct-level invariant.
    pub fn write(&mut self, bytes: &[u8]) {
        if self.overflowed {
            self.dropped_bytes.fetch_add(bytes.len() as u32, Ordering::Relaxed);
            return;
        }
        let remaining = self.capacity.saturating_sub(self.buffer.len());
        if bytes.len() <= remaining {
            self.buffer.extend_from_slice(bytes);
            return;
        }
        self.buffer.extend_from_slice(&bytes[..remaining]);
        self.overflowed = true;
        self.dropped_bytes.fetch_add((bytes.len() - remaining) as u32, Ordering::Relaxed);
    }

    pub fn overflowed(&self) -> bool {
        self.overflowed
    }

    pub fn dropped_bytes(&self) -> u32 {
        self.dropped_bytes.load(Ordering::Relaxed)
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.buffer
    }
}

#[derive(Debug, Default)]
pub struct DecodedFrames {
    pub sse_lines: Vec<String>,
    pub truncated: bool,
}

/// Decodes Bedrock's binary event-stream framing from a fully-buffered
/// observation window, turning each JSON payload's base64 `bytes` field into
/// an SSE `data: ` line that downstream parsers accept verbatim. Exception
/// frames (non-JSON payloads) are skipped; a frame that doesn't parse at all
/// ends decoding early with whatever was already collected.
pub fn decode_event_stream(buffer: &[u8]) -> DecodedFrames {
    let mut decoder = MessageFrameDecoder::new();
    let mut remaining = bytes::Bytes::copy_from_slice(buffer);
    let mut out = DecodedFrames::default();

    loop {
        match decoder.decode_frame(&mut remaining) {
            Ok(Some(message)) => {
                if let Some(line) = decode_message(&message) {
                    out.sse_lines.push(line);
                }
            }
            Ok(None) => break,
            Err(_) => {
                out.truncated = true;
                break;
            }
        }
    }

    out
}

/// Tees the live `/invoke-with-response-stream` body to the client
/// byte-for-byte while copying bytes into a bounded observation buffer for
/// post-hoc frame decoding. Unlike `sse::tee`, nothing is split into lines:
/// Bedrock's framing is binary, not text, so whole upstream chunks are
/// forwarded untouched and decoding only happens once the stream ends, on
/// the copy, purely for the truncation/overflow diagnostics the caller logs.
pub fn tee_raw<S>(mut upstream: S, buffer_capacity: usize) -> (impl Stream<Item = std::io::Result<Bytes>>, oneshot::Receiver<DecodedFrames>)
where
    S: Stream<Item = reqwest::Result<Bytes>> + Unpin + Send + 'static,
{
    let (chunk_tx, chunk_rx) = mpsc::channel::<std::io::Result<Bytes>>(64);
    let (decoded_tx, decoded_rx) = oneshot::channel();

    tokio::spawn(async move {
        let mut observed = LimitedWriter::new(buffer_capacity);

        while let Some(next) = upstream.next().await {
            match next {
                Ok(bytes) => {
                    observed.write(&bytes);
                    if chunk_tx.send(Ok(bytes)).await.is_err() {
                        return;
                    }
                }
                Err(e) => {
                    if chunk_tx.send(Err(std::io::Error::other(e))).await.is_err() {
                        return;
                    }
                }
            }
        }

        let decoded = decode_event_stream(&observed.into_inner());
        let _ = decoded_tx.send(decoded);
    });

    (ReceiverStream::new(chunk_rx), decoded_rx)
}

fn decode_message(message: &Message) -> Option<String> {
    let payload: serde_json::Value = serde_json::from_slice(message.payload()).ok()?;
    let encoded = payload.get("bytes")?.as_str()?;
    let decoded = BASE64_STANDARD
        .decode(encoded)
        .or_else(|_| BASE64_URL_SAFE.decode(encoded))
        .ok()?;
    let text = String::from_utf8(decoded).ok()?;
    Some(format!("data: {text}"))
}
