use std::io;
use std::net::SocketAddr;

use http::Method;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::dump::Sink;
use crate::request::{body_length, ReceivedRequest};

pub const RESPONSE_OK: &[u8] =
    b"HTTP/1.1 200 OK\r\ncontent-length: 2\r\nconnection: close\r\n\r\nOK";
pub const RESPONSE_BAD_REQUEST: &[u8] =
    b"HTTP/1.1 400 Bad Request\r\ncontent-length: 0\r\nconnection: close\r\n\r\n";
pub const RESPONSE_HEADERS_TOO_LARGE: &[u8] = b"HTTP/1.1 431 Request Header Fields Too Large\r\n\
    content-length: 0\r\nconnection: close\r\n\r\n";
pub const RESPONSE_NOT_IMPLEMENTED: &[u8] = b"HTTP/1.1 501 Not Implemented\r\n\
    content-length: 18\r\nconnection: close\r\n\r\nUnsupported method";

const MAX_HEADERS: usize = 100;
const MAX_HEAD_SIZE: usize = 64 * 1024;
const READ_CHUNK: usize = 8192;

/// An owned copy of a parsed request line and header block
#[derive(Debug)]
struct Head {
    method: String,
    target: String,
    headers: Vec<(String, String)>,
    body_offset: usize,
}

/// Parse the request head at the start of `buf`. `Ok(None)` means the blank
/// line ending the head has not arrived yet.
fn parse_head(buf: &[u8]) -> Result<Option<Head>, httparse::Error> {
    let mut headers_buf = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut req = httparse::Request::new(&mut headers_buf);

    let body_offset = match req.parse(buf)? {
        httparse::Status::Complete(body_offset) => body_offset,
        httparse::Status::Partial => return Ok(None),
    };

    // Names keep the case they were sent with
    let headers = req
        .headers
        .iter()
        .map(|h| {
            (
                h.name.to_string(),
                String::from_utf8_lossy(h.value).into_owned(),
            )
        })
        .collect();

    Ok(Some(Head {
        method: req.method.unwrap_or_default().to_string(),
        target: req.path.unwrap_or_default().to_string(),
        headers,
        body_offset,
    }))
}

/// Read whatever the client has sent next onto the end of `buf`. Returns the
/// number of new bytes, `0` once the client has closed its side.
async fn read_more<S>(stream: &mut S, buf: &mut Vec<u8>) -> io::Result<usize>
where
    S: AsyncRead + Unpin,
{
    let mut chunk = [0u8; READ_CHUNK];
    let n = stream.read(&mut chunk).await?;
    buf.extend_from_slice(&chunk[..n]);
    Ok(n)
}

async fn respond<S>(stream: &mut S, response: &[u8]) -> io::Result<()>
where
    S: AsyncWrite + Unpin,
{
    stream.write_all(response).await?;
    stream.shutdown().await
}

/// Serve exactly one request on `stream`, then close it.
///
/// A POST has its body read up to the declared `Content-Length` (zero when
/// the header is absent or unparsable), is written to `sink` as one block and
/// is answered with `200 OK`. Other methods get `501`. A client that hangs up
/// before its request is complete gets nothing and nothing is logged.
pub async fn handle_connection<S>(mut stream: S, peer: SocketAddr, sink: Sink) -> io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut buf = Vec::with_capacity(READ_CHUNK);

    let head = loop {
        if read_more(&mut stream, &mut buf).await? == 0 {
            debug!("{peer} closed the connection before sending a full request head");
            return Ok(());
        }

        match parse_head(&buf) {
            Ok(Some(head)) => break head,
            Ok(None) if buf.len() >= MAX_HEAD_SIZE => {
                info!(target: "mockhook::access", "{peer} <oversized head> 431");
                return respond(&mut stream, RESPONSE_HEADERS_TOO_LARGE).await;
            }
            Ok(None) => {}
            Err(httparse::Error::TooManyHeaders) => {
                info!(target: "mockhook::access", "{peer} <too many headers> 431");
                return respond(&mut stream, RESPONSE_HEADERS_TOO_LARGE).await;
            }
            Err(e) => {
                debug!("Could not parse request from {peer}. Error: {e}");
                info!(target: "mockhook::access", "{peer} <malformed request> 400");
                return respond(&mut stream, RESPONSE_BAD_REQUEST).await;
            }
        }
    };

    let method = match Method::from_bytes(head.method.as_bytes()) {
        Ok(method) if method == Method::POST => method,
        _ => {
            info!(target: "mockhook::access", "{peer} \"{} {}\" 501", head.method, head.target);
            return respond(&mut stream, RESPONSE_NOT_IMPLEMENTED).await;
        }
    };

    let end = head.body_offset.saturating_add(body_length(&head.headers));
    while buf.len() < end {
        if read_more(&mut stream, &mut buf).await? == 0 {
            debug!("{peer} closed the connection before sending the declared body");
            return Ok(());
        }
    }

    let body = buf.split_off(head.body_offset);
    let request = ReceivedRequest::new(method, head.target, head.headers, body);
    debug!(
        "Received webhook POST to {} with a {} byte body",
        request.path(),
        request.body().len()
    );
    let line = format!("{peer} \"POST {}\" 200", request.path());

    // Writing the block takes a blocking lock and a blocking write to stdout.
    // The sender still gets its acknowledgement if stdout went away.
    match tokio::task::spawn_blocking(move || sink.emit(&request)).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!("Failed to write webhook to output: {e}"),
        Err(e) => error!("Webhook output task ended abnormally: {e}"),
    }

    info!(target: "mockhook::access", "{line}");
    respond(&mut stream, RESPONSE_OK).await
}
