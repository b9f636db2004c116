use super::{Chunks, ChunksError};

#[derive(Debug, PartialEq, Eq)]
pub enum Error {
    ChunksError(ChunksError),
    InvalidPayload,
}

/// A type for reading the `data` of server-sent events from a chunk stream.
///
/// Only the subset used by chat completion streams is supported: `data`
/// fields (multiple lines are joined with `\n`), comments, and the other
/// standard fields which are ignored. Lines may end with `\n` or `\r\n`.
pub struct Sse {
    buf: Vec<u8>,
    data: Option<String>,
    chunks: Chunks,
    exhausted: bool,
}

impl Sse {
    #[inline]
    pub fn new(chunks: Chunks) -> Self {
        Self {
            buf: Vec::new(),
            data: None,
            chunks,
            exhausted: false,
        }
    }

    pub async fn next_event(&mut self) -> Result<Option<String>, Error> {
        loop {
            // Consume every complete line in the buffer before reading more,
            // so a multi-byte character split between chunks is never
            // decoded half-way.
            while let Some(eol_idx) = self.buf.iter().position(|b| *b == b'\n')
            {
                let line: Vec<u8> = self.buf.drain(..=eol_idx).collect();
                let line = &line[..eol_idx];
                let line = line.strip_suffix(b"\r").unwrap_or(line);
                let Ok(line) = str::from_utf8(line) else {
                    return Err(Error::InvalidPayload);
                };
                if let Some(event) = self.process_line(line)? {
                    return Ok(Some(event));
                }
            }

            if self.exhausted {
                // A trailing event without the blank line is incomplete.
                return Ok(None);
            }
            match self.chunks.next_chunk().await.map_err(Error::ChunksError)? {
                Some(bytes) => self.buf.extend_from_slice(&bytes),
                None => self.exhausted = true,
            }
        }
    }

    fn process_line(&mut self, line: &str) -> Result<Option<String>, Error> {
        if line.is_empty() {
            // End of an event. Events without data are not dispatched.
            return Ok(self.data.take());
        }
        if line.starts_with(':') {
            return Ok(None);
        }

        let Some((field, value)) = line.split_once(':') else {
            return Err(Error::InvalidPayload);
        };
        let value = value.strip_prefix(' ').unwrap_or(value);
        if field == "data" {
            match &mut self.data {
                Some(data) => {
                    data.push('\n');
                    data.push_str(value);
                }
                None => self.data = Some(value.to_owned()),
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_normal_events() {
        let chunks = Chunks::from_static(&[
            b"data: hello\n\n",
            b": keep-alive\n\nevent: message\ndata: bye\r\n\r\n",
        ]);
        let mut sse = Sse::new(chunks);
        assert_eq!(sse.next_event().await.unwrap().unwrap(), "hello");
        assert_eq!(sse.next_event().await.unwrap().unwrap(), "bye");
        assert_eq!(sse.next_event().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_split_chunks() {
        // "é" is split across two chunks.
        let chunks = Chunks::from_static(&[
            b"data:",
            b" caf\xc3",
            b"\xa9\n",
            b"data: au lait\n",
            b"\n",
        ]);
        let mut sse = Sse::new(chunks);
        assert_eq!(
            sse.next_event().await.unwrap().unwrap(),
            "caf\u{e9}\nau lait"
        );
        assert_eq!(sse.next_event().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_invalid_data() {
        let chunks = Chunks::from_static(&[b"xxxxxx\n\n"]);
        let mut sse = Sse::new(chunks);
        assert_eq!(sse.next_event().await.unwrap_err(), Error::InvalidPayload);

        let chunks = Chunks::from_static(&[b"data: \xff\n\n"]);
        let mut sse = Sse::new(chunks);
        assert_eq!(sse.next_event().await.unwrap_err(), Error::InvalidPayload);

        let chunks = Chunks::from_static(&[b"data: hello\n", b"data: bye\n"]);
        let mut sse = Sse::new(chunks);
        assert_eq!(sse.next_event().await.unwrap(), None);
    }
}
