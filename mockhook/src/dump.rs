use std::io::{self, Write};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::request::ReceivedRequest;

pub const START_MARKER: &str = "---- Received webhook POST ----";
pub const END_MARKER: &str = "---- End ----";

/// Render a request as the block printed for every webhook POST. Invalid
/// UTF-8 in the body is replaced with U+FFFD and never fails.
pub fn render(request: &ReceivedRequest) -> String {
    let mut block = String::new();

    block.push_str(START_MARKER);
    block.push('\n');
    block.push_str(&format!("Path: {}\n", request.path()));
    block.push_str("Headers:\n");
    for (name, value) in request.headers() {
        block.push_str(&format!("  {name}: {value}\n"));
    }
    block.push_str("Body:\n");
    block.push_str(&String::from_utf8_lossy(request.body()));
    block.push('\n');
    block.push_str(END_MARKER);
    block.push_str("\n\n");

    block
}

/// The output stream dump blocks are written to. Cloning a sink shares the
/// underlying writer; every block is written and flushed under one lock so
/// blocks from concurrent requests never interleave.
#[derive(Clone)]
pub struct Sink {
    writer: Arc<Mutex<Box<dyn Write + Send>>>,
}

impl Sink {
    pub fn new<W>(writer: W) -> Self
    where
        W: Write + Send + 'static,
    {
        Self {
            writer: Arc::new(Mutex::new(Box::new(writer))),
        }
    }

    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }

    /// Write the full block for `request`
    pub fn emit(&self, request: &ReceivedRequest) -> io::Result<()> {
        let block = render(request);

        let mut writer = lock(&self.writer);
        writer.write_all(block.as_bytes())?;
        writer.flush()
    }

    /// Write a single line that is not a webhook, such as the startup banner
    pub fn notice(&self, line: &str) -> io::Result<()> {
        let mut writer = lock(&self.writer);
        writeln!(writer, "{line}")?;
        writer.flush()
    }
}

/// A panic while holding the lock cannot leave a half written block behind
/// that matters to the next writer, so poisoning is ignored.
fn lock<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// In-memory writer that can be read back while a `Sink` holds a clone of it
#[cfg(test)]
#[derive(Clone, Default)]
pub(crate) struct SharedBuffer {
    bytes: Arc<Mutex<Vec<u8>>>,
}

#[cfg(test)]
impl SharedBuffer {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Everything written so far, decoded lossily
    pub(crate) fn contents(&self) -> String {
        String::from_utf8_lossy(&lock(&self.bytes)).into_owned()
    }
}

#[cfg(test)]
impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        lock(&self.bytes).extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use http::Method;

    fn post(path: &str, headers: &[(&str, &str)], body: &[u8]) -> ReceivedRequest {
        let headers = headers
            .iter()
            .map(|(name, value)| (name.to_string(), value.to_string()))
            .collect();
        ReceivedRequest::new(Method::POST, path, headers, body.to_vec())
    }

    #[test]
    fn test_render_full_block() {
        let request = post(
            "/hook",
            &[("Content-Length", "13"), ("Content-Type", "text/plain")],
            b"hello world!!",
        );

        assert_eq!(
            render(&request),
            "---- Received webhook POST ----\n\
             Path: /hook\n\
             Headers:\n  \
             Content-Length: 13\n  \
             Content-Type: text/plain\n\
             Body:\n\
             hello world!!\n\
             ---- End ----\n\n"
        );
    }

    #[test]
    fn test_render_headers_in_wire_order() {
        let request = post("/hook", &[("X-A", "1"), ("X-B", "2"), ("X-A", "3")], b"");

        assert!(render(&request).contains("Headers:\n  X-A: 1\n  X-B: 2\n  X-A: 3\nBody:\n"));
    }

    #[test]
    fn test_render_empty_body() {
        let request = post("/hook", &[("host", "localhost")], b"");

        let block = render(&request);
        assert!(block.contains("Body:\n\n---- End ----\n\n"));
        assert!(block.ends_with("\n\n"));
    }

    #[test]
    fn test_render_no_headers() {
        let request = post("/hook", &[], b"");
        assert!(render(&request).contains("Headers:\nBody:\n"));
    }

    #[test]
    fn test_render_invalid_utf8() {
        let request = post("/x", &[("content-length", "2")], b"\xffA");
        assert!(render(&request).contains("Body:\n\u{FFFD}A\n"));
    }

    #[test]
    fn test_emit_writes_block_to_sink() {
        let buffer = SharedBuffer::new();
        let sink = Sink::new(buffer.clone());

        let request = post("/hook", &[("content-length", "2")], b"hi");
        sink.emit(&request).unwrap();
        sink.emit(&request).unwrap();

        let expected = render(&request);
        assert_eq!(buffer.contents(), format!("{expected}{expected}"));
    }

    #[test]
    fn test_concurrent_emits_do_not_interleave() {
        let buffer = SharedBuffer::new();
        let sink = Sink::new(buffer.clone());

        let handles: Vec<_> = (0..8)
            .map(|thread| {
                let sink = sink.clone();
                std::thread::spawn(move || {
                    for i in 0..50 {
                        let headers = vec![
                            ("X-Thread".to_string(), thread.to_string()),
                            ("X-Sequence".to_string(), i.to_string()),
                        ];
                        let request = ReceivedRequest::new(
                            Method::POST,
                            format!("/thread/{thread}/{i}"),
                            headers,
                            Vec::new(),
                        );
                        sink.emit(&request).unwrap();
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        let contents = buffer.contents();
        let blocks: Vec<&str> = contents
            .split(START_MARKER)
            .filter(|block| !block.is_empty())
            .collect();
        assert_eq!(blocks.len(), 400);

        for block in blocks {
            let path = block
                .lines()
                .find_map(|line| line.strip_prefix("Path: /thread/"))
                .unwrap();
            let (thread, sequence) = path.split_once('/').unwrap();

            assert!(block.contains(&format!("  X-Thread: {thread}\n")));
            assert!(block.contains(&format!("  X-Sequence: {sequence}\n")));
            assert_eq!(block.matches(END_MARKER).count(), 1);
            assert!(block.ends_with(&format!("{END_MARKER}\n\n")));
        }
    }
}
