//! Incremental gzip framing.
//!
//! [`GzipStream`] builds one gzip member record by record while always
//! knowing exactly how many compressed bytes it holds. Every record is fed
//! to a raw deflate stream followed by a sync flush, so the committed body
//! is byte aligned and complete up to the last accepted record:
//!
//! ```text
//! +--------+------------------------------------+-------+---------+
//! | header | deflate(r1) sync | deflate(r2) sync | final | trailer |
//! | 10 B   |   committed body (compressed_len)   | 2 B   | 8 B     |
//! +--------+------------------------------------+-------+---------+
//! ```
//!
//! Because the body always ends on a sync flush boundary, sealing never
//! needs the compressor: an empty final block and the trailer complete the
//! member. The framing overhead is therefore a constant,
//! [`FRAMING_OVERHEAD`].
//!
//! Adding a record is a two step affair:
//!
//! 1. [`GzipStream::probe`] compresses the record and returns the exact
//!    byte delta as a [`Probe`]. The committed body is not touched.
//! 2. Either [`GzipStream::commit`] appends the delta, or
//!    [`GzipStream::discard`] drops it.
//!
//! A discarded probe has still advanced the compressor. Deflate cannot be
//! rewound in place, so the next probe first rebuilds the compressor by
//! replaying the committed records. In the pipeline a discard is always
//! followed by sealing the batch, so the replay is rarely paid.

use std::io;

use flate2::{Compress, Compression, Crc, FlushCompress};

/// Fixed gzip member header: magic, deflate, no flags, no mtime, unknown OS.
const GZIP_HEADER: [u8; 10] = [0x1f, 0x8b, 0x08, 0x00, 0, 0, 0, 0, 0x00, 0xff];

/// Empty fixed-Huffman block with BFINAL set, valid after a sync flush.
const FINAL_BLOCK: [u8; 2] = [0x03, 0x00];

/// CRC32 followed by ISIZE, both little endian.
const GZIP_TRAILER_LEN: usize = 8;

/// Bytes a sealed member adds on top of its committed body.
pub const FRAMING_OVERHEAD: usize = GZIP_HEADER.len() + FINAL_BLOCK.len() + GZIP_TRAILER_LEN;

/// Compressed bytes a record would add to a stream.
#[must_use = "a probe must be committed or discarded"]
#[derive(Debug)]
pub struct Probe {
    delta: Vec<u8>,
    raw_len: usize,
}

impl Probe {
    /// Bytes the committed body grows by if this probe is committed.
    pub fn delta_len(&self) -> usize {
        self.delta.len()
    }
}

/// A gzip member under construction.
pub struct GzipStream {
    level: Compression,
    compress: Compress,
    body: Vec<u8>,
    crc: Crc,
    raw: Vec<u8>,
    boundaries: Vec<usize>,
    dirty: bool,
}

impl GzipStream {
    pub fn new(level: Compression) -> Self {
        Self {
            level,
            compress: Compress::new(level, false),
            body: Vec::new(),
            crc: Crc::new(),
            raw: Vec::new(),
            boundaries: Vec::new(),
            dirty: false,
        }
    }

    /// Sealed size of a member holding only `raw`.
    pub fn standalone_len(level: Compression, raw: &[u8]) -> io::Result<usize> {
        let probe = GzipStream::new(level).probe(raw)?;
        Ok(probe.delta_len() + FRAMING_OVERHEAD)
    }

    /// Committed compressed bytes, excluding header and trailer.
    pub fn compressed_len(&self) -> usize {
        self.body.len()
    }

    /// Uncompressed bytes committed so far.
    pub fn raw_len(&self) -> usize {
        self.raw.len()
    }

    /// Number of committed records.
    pub fn records(&self) -> usize {
        self.boundaries.len()
    }

    /// Compress `raw` and report the resulting delta without committing it.
    pub fn probe(&mut self, raw: &[u8]) -> io::Result<Probe> {
        if self.dirty {
            self.rebuild()?;
        }
        self.dirty = true;
        let mut delta = Vec::with_capacity(raw.len() / 2 + 64);
        deflate(&mut self.compress, raw, FlushCompress::Sync, &mut delta)?;
        Ok(Probe {
            delta,
            raw_len: raw.len(),
        })
    }

    /// Append a probed record. `raw` must be the bytes that were probed.
    pub fn commit(&mut self, probe: Probe, raw: &[u8]) {
        debug_assert_eq!(probe.raw_len, raw.len());
        self.body.extend_from_slice(&probe.delta);
        self.crc.update(raw);
        self.raw.extend_from_slice(raw);
        self.boundaries.push(self.raw.len());
        self.dirty = false;
    }

    /// Drop a probe. The committed body is unaffected.
    pub fn discard(&mut self, probe: Probe) {
        drop(probe);
        self.dirty = true;
    }

    /// Replay every committed record through a fresh compressor.
    fn rebuild(&mut self) -> io::Result<()> {
        let mut compress = Compress::new(self.level, false);
        let mut replayed = Vec::with_capacity(self.body.len() + 64);
        let mut start = 0;
        for &end in &self.boundaries {
            deflate(
                &mut compress,
                &self.raw[start..end],
                FlushCompress::Sync,
                &mut replayed,
            )?;
            start = end;
        }
        if replayed != self.body {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "replayed deflate stream diverged from committed body",
            ));
        }
        self.compress = compress;
        self.dirty = false;
        Ok(())
    }

    /// Seal the member: header, committed body, final block, trailer.
    pub fn finish(self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.body.len() + FRAMING_OVERHEAD);
        out.extend_from_slice(&GZIP_HEADER);
        out.extend_from_slice(&self.body);
        out.extend_from_slice(&FINAL_BLOCK);
        out.extend_from_slice(&self.crc.sum().to_le_bytes());
        out.extend_from_slice(&self.crc.amount().to_le_bytes());
        out
    }
}

/// Run `input` through the compressor with the given flush, appending to `out`.
fn deflate(
    compress: &mut Compress,
    mut input: &[u8],
    flush: FlushCompress,
    out: &mut Vec<u8>,
) -> io::Result<()> {
    loop {
        out.reserve(input.len() / 2 + 64);
        let before = compress.total_in();
        compress
            .compress_vec(input, out, flush)
            .map_err(io::Error::other)?;
        let consumed = (compress.total_in() - before) as usize;
        input = &input[consumed..];
        // Spare output capacity after the call means the flush completed.
        if input.is_empty() && out.len() < out.capacity() {
            return Ok(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::MultiGzDecoder;
    use std::io::Read;

    fn gunzip(bytes: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        MultiGzDecoder::new(bytes).read_to_end(&mut out).unwrap();
        out
    }

    #[test]
    fn test_framing_overhead() {
        // The codec's own finish after a sync flush is an equivalent empty final block.
        let mut compress = Compress::new(Compression::default(), false);
        let mut out = Vec::new();
        deflate(&mut compress, b"payload", FlushCompress::Sync, &mut out).unwrap();
        let mut tail = Vec::new();
        deflate(&mut compress, &[], FlushCompress::Finish, &mut tail).unwrap();
        assert!(tail.len() <= 5);
        assert_eq!(FRAMING_OVERHEAD, 20);
    }

    #[test]
    fn test_commit_and_finish_round_trip() {
        let mut stream = GzipStream::new(Compression::default());
        for line in ["alpha\n", "beta\n", "gamma\n"] {
            let probe = stream.probe(line.as_bytes()).unwrap();
            stream.commit(probe, line.as_bytes());
        }
        assert_eq!(stream.records(), 3);
        assert_eq!(stream.raw_len(), 17);

        let body_len = stream.compressed_len();
        let member = stream.finish();
        assert_eq!(member.len(), body_len + FRAMING_OVERHEAD);
        assert_eq!(gunzip(&member), b"alpha\nbeta\ngamma\n");
    }

    #[test]
    fn test_discard_restores_committed_state() {
        let mut stream = GzipStream::new(Compression::default());
        let probe = stream.probe(b"kept\n").unwrap();
        stream.commit(probe, b"kept\n");
        let committed = stream.compressed_len();

        let probe = stream.probe(&[42u8; 4096]).unwrap();
        assert!(probe.delta_len() > 0);
        stream.discard(probe);
        assert_eq!(stream.compressed_len(), committed);

        let probe = stream.probe(b"after\n").unwrap();
        stream.commit(probe, b"after\n");
        assert_eq!(gunzip(&stream.finish()), b"kept\nafter\n");
    }

    #[test]
    fn test_probe_delta_matches_commit_growth() {
        let mut stream = GzipStream::new(Compression::default());
        let line = b"{\"id\":1,\"name\":\"widget\"}\n";
        for _ in 0..10 {
            let before = stream.compressed_len();
            let probe = stream.probe(line).unwrap();
            let delta = probe.delta_len();
            stream.commit(probe, line);
            assert_eq!(stream.compressed_len(), before + delta);
        }
    }

    #[test]
    fn test_repeated_records_compress() {
        let mut stream = GzipStream::new(Compression::default());
        let line = b"the same line over and over again\n";
        for _ in 0..200 {
            let probe = stream.probe(line).unwrap();
            stream.commit(probe, line);
        }
        assert!(stream.compressed_len() < stream.raw_len() / 2);
    }

    #[test]
    fn test_discard_then_finish() {
        let mut stream = GzipStream::new(Compression::fast());
        let probe = stream.probe(b"one\n").unwrap();
        stream.commit(probe, b"one\n");
        let probe = stream.probe(b"two\n").unwrap();
        stream.discard(probe);
        assert_eq!(gunzip(&stream.finish()), b"one\n");
    }

    #[test]
    fn test_empty_stream_is_valid_gzip() {
        let member = GzipStream::new(Compression::default()).finish();
        assert!(gunzip(&member).is_empty());
    }

    #[test]
    fn test_standalone_len() {
        let raw = vec![b'a'; 10_000];
        let len = GzipStream::standalone_len(Compression::default(), &raw).unwrap();
        assert!(len < 200);
        assert!(len > FRAMING_OVERHEAD);

        let mut stream = GzipStream::new(Compression::default());
        let probe = stream.probe(&raw).unwrap();
        stream.commit(probe, &raw);
        assert_eq!(stream.finish().len(), len);
    }
}
