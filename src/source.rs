//! Decompression adapter
//!
//! Gives every source (plain, gzip, bz2) the same "next line or end of stream" view.
//! Offsets count decoded bytes, so a compressed source resumes by re-inflating and
//! discarding the prefix that was already consumed.

use crate::encoding::{decode_line, detect_from_sample, strip_bom, EncodingInfo};
use crate::error::{ListmanError, Result};

use bzip2::read::MultiBzDecoder;
use flate2::read::MultiGzDecoder;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

/// gzip magic bytes (RFC 1952)
pub const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];
const BZIP2_MAGIC: &[u8; 3] = b"BZh";
const BZIP2_BLOCK_MAGIC: [u8; 6] = [0x31, 0x41, 0x59, 0x26, 0x53, 0x59];
const BZIP2_EOS_MAGIC: [u8; 6] = [0x17, 0x72, 0x45, 0x38, 0x50, 0x90];
const HEADER_LEN: u64 = 10;

/// Read buffer for sources (64KB)
const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Container format of a source file or of the master file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceFormat {
    Plain,
    Gzip,
    Bzip2,
}

impl SourceFormat {
    /// Declared format, from the file extension
    pub fn from_path(path: &Path) -> Self {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());

        match ext.as_deref() {
            Some("gz") | Some("gzip") => Self::Gzip,
            Some("bz2") | Some("bzip2") => Self::Bzip2,
            _ => Self::Plain,
        }
    }

    /// Actual format, from the leading bytes. `None` means no known magic.
    pub fn sniff(header: &[u8]) -> Option<Self> {
        if header.starts_with(&GZIP_MAGIC) {
            return Some(Self::Gzip);
        }
        if header.len() >= 10
            && header.starts_with(BZIP2_MAGIC)
            && (b'1'..=b'9').contains(&header[3])
            && (header[4..10] == BZIP2_BLOCK_MAGIC || header[4..10] == BZIP2_EOS_MAGIC)
        {
            return Some(Self::Bzip2);
        }
        None
    }

    /// Check that the magic bytes agree with the extension
    pub fn verify(self, path: &Path) -> Result<()> {
        let file = File::open(path).map_err(|e| ListmanError::unreadable(path, e))?;
        let mut header = Vec::with_capacity(HEADER_LEN as usize);
        file.take(HEADER_LEN)
            .read_to_end(&mut header)
            .map_err(|e| ListmanError::unreadable(path, e))?;

        match (self, Self::sniff(&header)) {
            (Self::Plain, None) => Ok(()),
            (declared, Some(actual)) if declared == actual => Ok(()),
            (declared, actual) => Err(ListmanError::format(
                path,
                format!(
                    "extension says {} but content is {}",
                    declared,
                    actual.map_or("plain text", |a| a.name())
                ),
            )),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Plain => "plain text",
            Self::Gzip => "gzip",
            Self::Bzip2 => "bzip2",
        }
    }

    /// Suffix appended to the master file name
    pub fn suffix(self) -> &'static str {
        match self {
            Self::Plain => "",
            Self::Gzip => ".gz",
            Self::Bzip2 => ".bz2",
        }
    }
}

impl fmt::Display for SourceFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Line reader over a plain or compressed source
pub struct LineReader {
    path: PathBuf,
    reader: Box<dyn BufRead + Send>,
    encoding: EncodingInfo,
    offset: u64,
    line_buffer: Vec<u8>,
    terminated: bool,
}

impl LineReader {
    /// Open `path`, verify its format and position it at `offset` decoded bytes
    pub fn open(path: &Path, format: SourceFormat, offset: u64) -> Result<Self> {
        format.verify(path)?;
        let file = File::open(path).map_err(|e| ListmanError::unreadable(path, e))?;

        let (reader, encoding): (Box<dyn BufRead + Send>, EncodingInfo) = match format {
            SourceFormat::Plain => {
                let len = file
                    .metadata()
                    .map_err(|e| ListmanError::unreadable(path, e))?
                    .len();
                if offset > len {
                    return Err(ListmanError::format(
                        path,
                        format!("file is {} bytes, shorter than resume offset {}", len, offset),
                    ));
                }

                let mut reader = BufReader::with_capacity(READ_BUFFER_SIZE, file);
                let encoding = detect_from_sample(
                    reader.fill_buf().map_err(|e| ListmanError::unreadable(path, e))?,
                );
                if offset > 0 {
                    reader
                        .seek(SeekFrom::Start(offset))
                        .map_err(|e| ListmanError::unreadable(path, e))?;
                }
                (Box::new(reader), encoding)
            }
            SourceFormat::Gzip => {
                let reader = BufReader::with_capacity(READ_BUFFER_SIZE, MultiGzDecoder::new(file));
                Self::sample_and_skip(path, Box::new(reader), offset)?
            }
            SourceFormat::Bzip2 => {
                let reader = BufReader::with_capacity(READ_BUFFER_SIZE, MultiBzDecoder::new(file));
                Self::sample_and_skip(path, Box::new(reader), offset)?
            }
        };

        log::debug!("Opened {:?} ({}, {}) at offset {}", path, format, encoding.name, offset);

        Ok(Self {
            path: path.to_path_buf(),
            reader,
            encoding,
            offset,
            line_buffer: Vec::with_capacity(256),
            terminated: true,
        })
    }

    fn sample_and_skip(
        path: &Path,
        mut reader: Box<dyn BufRead + Send>,
        offset: u64,
    ) -> Result<(Box<dyn BufRead + Send>, EncodingInfo)> {
        let encoding = detect_from_sample(reader.fill_buf().map_err(|e| stream_error(path, e))?);

        if offset > 0 {
            let skipped = io::copy(&mut reader.by_ref().take(offset), &mut io::sink())
                .map_err(|e| stream_error(path, e))?;
            if skipped < offset {
                return Err(ListmanError::format(
                    path,
                    format!("stream ends at {} bytes, before resume offset {}", skipped, offset),
                ));
            }
        }

        Ok((reader, encoding))
    }

    /// Read the next line without its terminator. `None` at end of stream.
    pub fn next_line(&mut self) -> Result<Option<String>> {
        self.line_buffer.clear();

        let read = self
            .reader
            .read_until(b'\n', &mut self.line_buffer)
            .map_err(|e| stream_error(&self.path, e))?;
        if read == 0 {
            return Ok(None);
        }

        let at_start = self.offset == 0;
        self.offset += read as u64;
        self.terminated = self.line_buffer.last() == Some(&b'\n');

        let mut bytes = &self.line_buffer[..];
        if at_start {
            bytes = strip_bom(bytes);
        }
        let bytes = bytes.strip_suffix(b"\n").unwrap_or(bytes);
        let bytes = bytes.strip_suffix(b"\r").unwrap_or(bytes);

        Ok(Some(decode_line(bytes, self.encoding.encoding)))
    }

    /// Decoded bytes consumed so far; always on a line boundary
    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn encoding(&self) -> &EncodingInfo {
        &self.encoding
    }

    /// Whether everything read so far ends with a newline (true for an empty stream)
    pub fn ends_with_newline(&self) -> bool {
        self.terminated
    }
}

impl Iterator for LineReader {
    type Item = Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_line().transpose()
    }
}

/// Decoder failures are corrupt streams; anything else is an unreadable file
fn stream_error(path: &Path, err: io::Error) -> ListmanError {
    match err.kind() {
        io::ErrorKind::InvalidData | io::ErrorKind::InvalidInput | io::ErrorKind::UnexpectedEof => {
            ListmanError::format(path, format!("corrupt stream: {}", err))
        }
        _ => ListmanError::unreadable(path, err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use std::io::Write;
    use tempfile::TempDir;

    fn write_gzip(path: &Path, content: &[u8]) {
        let mut enc = GzEncoder::new(File::create(path).unwrap(), flate2::Compression::default());
        enc.write_all(content).unwrap();
        enc.finish().unwrap();
    }

    fn write_bzip2(path: &Path, content: &[u8]) {
        let mut enc =
            bzip2::write::BzEncoder::new(File::create(path).unwrap(), bzip2::Compression::default());
        enc.write_all(content).unwrap();
        enc.finish().unwrap();
    }

    fn read_all(path: &Path, format: SourceFormat, offset: u64) -> Vec<String> {
        LineReader::open(path, format, offset)
            .unwrap()
            .collect::<Result<Vec<_>>>()
            .unwrap()
    }

    #[test]
    fn test_format_from_path() {
        assert_eq!(SourceFormat::from_path(Path::new("rockyou.txt")), SourceFormat::Plain);
        assert_eq!(SourceFormat::from_path(Path::new("rockyou.txt.gz")), SourceFormat::Gzip);
        assert_eq!(SourceFormat::from_path(Path::new("list.BZ2")), SourceFormat::Bzip2);
        assert_eq!(SourceFormat::from_path(Path::new("noext")), SourceFormat::Plain);
    }

    #[test]
    fn test_plain_lines_and_terminators() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("list.txt");
        std::fs::write(&path, b"\xEF\xBB\xBFalpha\r\nbeta\ngamma").unwrap();

        assert_eq!(read_all(&path, SourceFormat::Plain, 0), vec!["alpha", "beta", "gamma"]);
    }

    #[test]
    fn test_gzip_and_bzip2_sources() {
        let dir = TempDir::new().unwrap();
        let gz = dir.path().join("list.txt.gz");
        let bz = dir.path().join("list.txt.bz2");
        write_gzip(&gz, b"one\ntwo\n");
        write_bzip2(&bz, b"three\nfour\n");

        assert_eq!(read_all(&gz, SourceFormat::Gzip, 0), vec!["one", "two"]);
        assert_eq!(read_all(&bz, SourceFormat::Bzip2, 0), vec!["three", "four"]);
    }

    #[test]
    fn test_multi_member_gzip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("members.gz");
        let mut file = File::create(&path).unwrap();
        for chunk in [&b"a\nb\n"[..], &b"c\n"[..]] {
            let mut enc = GzEncoder::new(Vec::new(), flate2::Compression::fast());
            enc.write_all(chunk).unwrap();
            file.write_all(&enc.finish().unwrap()).unwrap();
        }
        drop(file);

        assert_eq!(read_all(&path, SourceFormat::Gzip, 0), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_resume_from_offset() {
        let dir = TempDir::new().unwrap();
        let plain = dir.path().join("list.txt");
        let gz = dir.path().join("list.gz");
        std::fs::write(&plain, b"first\nsecond\nthird\n").unwrap();
        write_gzip(&gz, b"first\nsecond\nthird\n");

        let mut reader = LineReader::open(&plain, SourceFormat::Plain, 0).unwrap();
        assert_eq!(reader.next_line().unwrap().as_deref(), Some("first"));
        let offset = reader.offset();
        assert_eq!(offset, 6);

        assert_eq!(read_all(&plain, SourceFormat::Plain, offset), vec!["second", "third"]);
        assert_eq!(read_all(&gz, SourceFormat::Gzip, offset), vec!["second", "third"]);
    }

    #[test]
    fn test_offset_beyond_stream_is_format_error() {
        let dir = TempDir::new().unwrap();
        let gz = dir.path().join("short.gz");
        write_gzip(&gz, b"x\n");

        let err = LineReader::open(&gz, SourceFormat::Gzip, 100).err().unwrap();
        assert!(matches!(err, ListmanError::Format { .. }));
    }

    #[test]
    fn test_extension_magic_mismatch() {
        let dir = TempDir::new().unwrap();
        let fake_gz = dir.path().join("fake.gz");
        std::fs::write(&fake_gz, b"not compressed\n").unwrap();
        let hidden_gz = dir.path().join("hidden.txt");
        write_gzip(&hidden_gz, b"secret\n");

        let err = LineReader::open(&fake_gz, SourceFormat::Gzip, 0).err().unwrap();
        assert!(matches!(err, ListmanError::Format { .. }));
        assert!(err.is_per_file());

        let err = SourceFormat::Plain.verify(&hidden_gz).unwrap_err();
        assert!(err.to_string().contains("gzip"));
    }

    #[test]
    fn test_corrupt_gzip_stream() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("broken.gz");
        let mut enc = GzEncoder::new(Vec::new(), flate2::Compression::default());
        enc.write_all(&b"word\n".repeat(10_000)).unwrap();
        let mut bytes = enc.finish().unwrap();
        bytes.truncate(bytes.len() / 2);
        std::fs::write(&path, bytes).unwrap();

        let result: Result<Vec<String>> = match LineReader::open(&path, SourceFormat::Gzip, 0) {
            Ok(reader) => reader.collect(),
            Err(e) => Err(e),
        };
        assert!(matches!(result, Err(ListmanError::Format { .. })));
    }

    #[test]
    fn test_unterminated_last_line() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("list.txt");
        std::fs::write(&path, b"alpha\nbeta").unwrap();

        let mut reader = LineReader::open(&path, SourceFormat::Plain, 0).unwrap();
        assert!(reader.ends_with_newline());
        assert_eq!(reader.next_line().unwrap().as_deref(), Some("alpha"));
        assert!(reader.ends_with_newline());
        assert_eq!(reader.next_line().unwrap().as_deref(), Some("beta"));
        assert!(!reader.ends_with_newline());
        assert_eq!(reader.next_line().unwrap(), None);
        assert!(!reader.ends_with_newline());
    }

    #[test]
    fn test_plain_text_starting_with_bzh_is_plain() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("words.txt");
        std::fs::write(&path, b"BZh9word\nother\n").unwrap();

        assert!(SourceFormat::Plain.verify(&path).is_ok());
    }
}
