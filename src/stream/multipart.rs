//! `multipart/x-mixed-replace` framing over HTTP/1.1 chunked transfer encoding.

use std::io::{self, Write};

use crate::error::{PipelineError, PipelineResult};
use crate::frame::EncodedImage;

pub const BOUNDARY: &str = "frame";
pub const STREAM_CONTENT_TYPE: &str = "multipart/x-mixed-replace; boundary=frame";

/// Header of every part. The JPEG bytes and a trailing CRLF follow it.
pub const PART_HEADER: &[u8] = b"--frame\r\nContent-Type: image/jpeg\r\n\r\n";

/// Where a stream delivers its encoded frames.
pub trait FrameSink {
    /// Deliver one frame. An error ends the session with `ClientDisconnected`.
    fn push(&mut self, image: &EncodedImage) -> PipelineResult<()>;

    /// True once nobody is reading any more. Checked before every capture,
    /// so a session whose frames all fail still notices it has no audience.
    fn is_closed(&self) -> bool {
        false
    }
}

/// Build one complete multipart part.
pub fn encode_part(image: &EncodedImage) -> Vec<u8> {
    let mut part = Vec::with_capacity(image.len() + PART_HEADER.len() + 2);
    part.extend_from_slice(PART_HEADER);
    part.extend_from_slice(image.as_bytes());
    part.extend_from_slice(b"\r\n");
    part
}

/// Writes each frame as one multipart part.
pub struct MultipartWriter<W: Write> {
    inner: W,
    parts_written: u64,
}

impl<W: Write> MultipartWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            parts_written: 0,
        }
    }

    pub fn parts_written(&self) -> u64 {
        self.parts_written
    }

    pub fn get_ref(&self) -> &W {
        &self.inner
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> FrameSink for MultipartWriter<W> {
    fn push(&mut self, image: &EncodedImage) -> PipelineResult<()> {
        let part = encode_part(image);
        self.inner
            .write_all(&part)
            .and_then(|_| self.inner.flush())
            .map_err(|err| {
                log::debug!("multipart write failed: {}", err);
                PipelineError::ClientDisconnected
            })?;
        self.parts_written += 1;
        Ok(())
    }
}

/// HTTP/1.1 chunked transfer encoding. Every `write` becomes one chunk.
pub struct ChunkedWriter<W: Write> {
    inner: W,
}

impl<W: Write> ChunkedWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    /// Write the terminating zero-length chunk.
    pub fn finish(mut self) -> io::Result<W> {
        self.inner.write_all(b"0\r\n\r\n")?;
        self.inner.flush()?;
        Ok(self.inner)
    }
}

impl<W: Write> Write for ChunkedWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let mut chunk = Vec::with_capacity(buf.len() + 12);
        chunk.extend_from_slice(format!("{:x}\r\n", buf.len()).as_bytes());
        chunk.extend_from_slice(buf);
        chunk.extend_from_slice(b"\r\n");
        self.inner.write_all(&chunk)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct BrokenPipe;

    impl Write for BrokenPipe {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::ErrorKind::BrokenPipe.into())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn part_layout() -> anyhow::Result<()> {
        let mut writer = MultipartWriter::new(Vec::new());
        writer.push(&EncodedImage::new(vec![0xFF, 0xD8, 0xFF, 0xD9], 1))?;
        let out = writer.into_inner();
        assert!(out.starts_with(b"--frame\r\nContent-Type: image/jpeg\r\n\r\n"));
        assert!(out.ends_with(&[0xFF, 0xD9, b'\r', b'\n']));
        Ok(())
    }

    #[test]
    fn write_failure_is_client_disconnect() {
        let mut writer = MultipartWriter::new(BrokenPipe);
        assert!(matches!(
            writer.push(&EncodedImage::new(vec![1, 2, 3], 1)),
            Err(PipelineError::ClientDisconnected)
        ));
        assert_eq!(writer.parts_written(), 0);
    }

    #[test]
    fn chunked_encoding() -> anyhow::Result<()> {
        let mut chunked = ChunkedWriter::new(Vec::new());
        chunked.write_all(b"hello world, multipart")?;
        let out = chunked.finish()?;
        assert_eq!(out, b"16\r\nhello world, multipart\r\n0\r\n\r\n".to_vec());
        Ok(())
    }

    #[test]
    fn multipart_inside_chunks() -> anyhow::Result<()> {
        let mut writer = MultipartWriter::new(ChunkedWriter::new(Vec::new()));
        writer.push(&EncodedImage::new(vec![9; 4], 1))?;
        writer.push(&EncodedImage::new(vec![8; 4], 2))?;
        assert_eq!(writer.parts_written(), 2);
        let out = writer.into_inner().finish()?;
        let part_len = PART_HEADER.len() + 4 + 2;
        let prefix = format!("{:x}\r\n", part_len);
        assert!(out.starts_with(prefix.as_bytes()));
        assert!(out.ends_with(b"\r\n0\r\n\r\n"));
        Ok(())
    }
}
