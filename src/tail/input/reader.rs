// SPDX-License-Identifier: Apache-2.0

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use tracing::debug;

use super::file_id::FileId;
use crate::tail::line::Line;

/// Size of each read when scanning forward for new content
const READ_CHUNK_SIZE: u64 = 64 * 1024;

/// Size of each read when scanning backwards for backlog lines
const SEEK_CHUNK_SIZE: u64 = 8 * 1024;

/// Result of a single poll
#[derive(Debug, Default)]
pub struct PollOutcome {
    /// Complete lines read during this poll, in file order
    pub lines: Vec<Line>,
    /// The watched path no longer exists. Lines still readable from the
    /// previously opened handle are included in `lines`.
    pub path_missing: bool,
}

/// LineReader incrementally reads a single file and splits it into lines.
///
/// The reader keeps its file handle open between polls. Each poll reads the
/// bytes appended since the last one; a trailing partial line is held back
/// until its terminator arrives.
#[derive(Debug)]
pub struct LineReader {
    /// Path to the file
    path: PathBuf,
    /// The open file handle
    file: File,
    /// Identity of the open handle
    file_id: FileId,
    /// Current offset in bytes
    offset: u64,
    /// Bytes of the current incomplete line
    partial: Vec<u8>,
    /// Positioned inside a line whose start was never read; its remainder is
    /// dropped up to the next terminator
    skip_to_newline: bool,
    /// Maximum size of a single line, longer lines are truncated
    max_line_size: usize,
}

impl LineReader {
    /// Open `path` positioned at its current end, so only content written from
    /// now on is returned.
    pub fn open(path: impl AsRef<Path>, max_line_size: usize) -> io::Result<Self> {
        let (reader, _) = Self::open_with_backlog(path, 0, max_line_size)?;
        Ok(reader)
    }

    /// Open `path` and return up to `lines` complete lines that precede the
    /// current end of the file, oldest first.
    ///
    /// The reader is positioned right after the last line terminator, so an
    /// unterminated trailing line is returned by the next [`poll`](Self::poll)
    /// once it completes.
    pub fn open_with_backlog(
        path: impl AsRef<Path>,
        lines: usize,
        max_line_size: usize,
    ) -> io::Result<(Self, Vec<Line>)> {
        let path = path.as_ref().to_path_buf();
        let mut file = open_regular(&path)?;
        let metadata = file.metadata()?;

        let len = metadata.len();
        let backlog = if lines == 0 {
            Backlog {
                lines: Vec::new(),
                offset: len,
                mid_line: false,
            }
        } else {
            read_backlog(&mut file, len, lines, max_line_size)?
        };

        let reader = Self {
            path,
            file_id: FileId::from_metadata(&metadata),
            file,
            offset: backlog.offset,
            partial: Vec::new(),
            skip_to_newline: backlog.mid_line,
            max_line_size,
        };
        Ok((reader, backlog.lines))
    }

    /// Get the file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Get the current offset
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Identity of the currently open file
    pub fn file_id(&self) -> FileId {
        self.file_id
    }

    /// Read everything appended since the last poll.
    ///
    /// - A file that shrank below the current offset was truncated in place and
    ///   is re-read from the start.
    /// - A path that now refers to a different file was replaced: the old handle
    ///   is drained first, then the new file is read from the start.
    pub fn poll(&mut self) -> io::Result<PollOutcome> {
        let mut outcome = PollOutcome::default();

        let path_id = match FileId::from_path(&self.path) {
            Ok(id) => Some(id),
            Err(e) if e.kind() == io::ErrorKind::NotFound => None,
            Err(e) => return Err(e),
        };

        self.read_available(&mut outcome.lines)?;

        match path_id {
            None => outcome.path_missing = true,
            Some(id) if id != self.file_id => {
                debug!(
                    path = ?self.path,
                    old_file_id = %self.file_id,
                    new_file_id = %id,
                    "File replaced, reopening"
                );
                self.flush_partial(&mut outcome.lines);
                match self.reopen() {
                    Ok(()) => self.read_available(&mut outcome.lines)?,
                    Err(e) if e.kind() == io::ErrorKind::NotFound => outcome.path_missing = true,
                    Err(e) => return Err(e),
                }
            }
            Some(_) => {}
        }

        Ok(outcome)
    }

    fn reopen(&mut self) -> io::Result<()> {
        let file = open_regular(&self.path)?;
        self.file_id = FileId::from_file(&file)?;
        self.file = file;
        self.offset = 0;
        self.partial.clear();
        self.skip_to_newline = false;
        Ok(())
    }

    fn read_available(&mut self, lines: &mut Vec<Line>) -> io::Result<()> {
        let len = self.file.metadata()?.len();

        if len < self.offset {
            debug!(
                path = ?self.path,
                offset = self.offset,
                len,
                "File truncated, resetting offset to 0"
            );
            self.offset = 0;
            self.partial.clear();
            self.skip_to_newline = false;
        }

        if len == self.offset {
            return Ok(());
        }

        self.file.seek(SeekFrom::Start(self.offset))?;

        // Only read up to the length observed above; later appends are picked
        // up by the next poll.
        let mut remaining = len - self.offset;
        let mut buf = vec![0u8; remaining.min(READ_CHUNK_SIZE) as usize];

        while remaining > 0 {
            let want = remaining.min(buf.len() as u64) as usize;
            let n = match self.file.read(&mut buf[..want]) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            };
            self.offset += n as u64;
            remaining -= n as u64;
            self.split_lines(&buf[..n], lines);
        }

        Ok(())
    }

    fn split_lines(&mut self, mut data: &[u8], lines: &mut Vec<Line>) {
        if self.skip_to_newline {
            match data.iter().position(|&b| b == b'\n') {
                Some(pos) => {
                    self.skip_to_newline = false;
                    data = &data[pos + 1..];
                }
                None => return,
            }
        }
        while let Some(pos) = data.iter().position(|&b| b == b'\n') {
            self.append_partial(&data[..pos]);
            lines.push(Line::from_bytes(&self.partial));
            self.partial.clear();
            data = &data[pos + 1..];
        }
        self.append_partial(data);
    }

    fn append_partial(&mut self, bytes: &[u8]) {
        let room = self.max_line_size.saturating_sub(self.partial.len());
        self.partial.extend_from_slice(&bytes[..bytes.len().min(room)]);
    }

    /// Emit the held-back partial line, used when its file will never grow again
    fn flush_partial(&mut self, lines: &mut Vec<Line>) {
        if !self.partial.is_empty() {
            lines.push(Line::from_bytes(&self.partial));
            self.partial.clear();
        }
    }
}

/// Open `path` for reading, refusing anything but a regular file.
///
/// The type is checked before opening since opening a FIFO blocks until a
/// writer shows up.
fn open_regular(path: &Path) -> io::Result<File> {
    let metadata = std::fs::metadata(path)?;
    if !metadata.is_file() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{:?} is not a regular file", path),
        ));
    }
    File::open(path)
}

struct Backlog {
    lines: Vec<Line>,
    /// Offset just past the last line terminator
    offset: u64,
    /// `offset` lies inside a line longer than the scanned window
    mid_line: bool,
}

/// Scan backwards from `len` for the last `count` complete lines.
///
/// At most `(count + 1) * (max_line_size + 2)` bytes are scanned: anything
/// further back belongs to lines that would have been truncated anyway. A line
/// whose start lies outside that window is left out of the backlog.
fn read_backlog(
    file: &mut File,
    len: u64,
    count: usize,
    max_line_size: usize,
) -> io::Result<Backlog> {
    let window = (count as u64)
        .saturating_add(1)
        .saturating_mul(max_line_size as u64 + 2);

    // Newest chunk first
    let mut chunks: Vec<Vec<u8>> = Vec::new();
    let mut pos = len;
    let mut newlines = 0usize;

    // One terminator more than needed marks the start of the oldest line
    while pos > 0 && newlines <= count && len - pos < window {
        let start = pos.saturating_sub(SEEK_CHUNK_SIZE);
        let mut chunk = vec![0u8; (pos - start) as usize];
        file.seek(SeekFrom::Start(start))?;
        file.read_exact(&mut chunk)?;

        newlines += chunk.iter().filter(|&&b| b == b'\n').count();
        chunks.push(chunk);
        pos = start;
    }

    chunks.reverse();
    let buf = chunks.concat();

    let Some(last_newline) = buf.iter().rposition(|&b| b == b'\n') else {
        // Either nothing at all, or one unterminated line
        return Ok(if pos == 0 {
            Backlog {
                lines: Vec::new(),
                offset: 0,
                mid_line: false,
            }
        } else {
            Backlog {
                lines: Vec::new(),
                offset: len,
                mid_line: true,
            }
        });
    };
    let offset = pos + last_newline as u64 + 1;

    let mut segments: Vec<&[u8]> = buf[..last_newline].split(|&b| b == b'\n').collect();
    if pos > 0 && newlines <= count {
        // The window starts inside a line
        segments.remove(0);
    }
    let skip = segments.len().saturating_sub(count);
    let lines = segments[skip..]
        .iter()
        .map(|segment| Line::from_bytes(&segment[..segment.len().min(max_line_size)]))
        .collect();

    Ok(Backlog {
        lines,
        offset,
        mid_line: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::OpenOptions;
    use std::io::Write;
    use tempfile::{NamedTempFile, TempDir};

    const MAX: usize = 1024 * 1024;

    fn append(path: &Path, content: &str) {
        let mut f = OpenOptions::new().append(true).open(path).unwrap();
        f.write_all(content.as_bytes()).unwrap();
        f.flush().unwrap();
    }

    fn texts(lines: &[Line]) -> Vec<&str> {
        lines.iter().map(|l| l.as_str()).collect()
    }

    #[test]
    fn test_open_starts_at_end() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "existing content").unwrap();
        file.flush().unwrap();

        let mut reader = LineReader::open(file.path(), MAX).unwrap();
        assert_eq!(reader.offset(), 17);

        let outcome = reader.poll().unwrap();
        assert!(outcome.lines.is_empty());
        assert!(!outcome.path_missing);
    }

    #[test]
    fn test_incremental_read() {
        let file = NamedTempFile::new().unwrap();
        let mut reader = LineReader::open(file.path(), MAX).unwrap();

        append(file.path(), "line 1\nline 2\n");
        assert_eq!(texts(&reader.poll().unwrap().lines), vec!["line 1", "line 2"]);

        append(file.path(), "line 3\n");
        assert_eq!(texts(&reader.poll().unwrap().lines), vec!["line 3"]);

        assert!(reader.poll().unwrap().lines.is_empty());
    }

    #[test]
    fn test_partial_line_is_held_back() {
        let file = NamedTempFile::new().unwrap();
        let mut reader = LineReader::open(file.path(), MAX).unwrap();

        append(file.path(), "hello ");
        assert!(reader.poll().unwrap().lines.is_empty());

        append(file.path(), "world\nnext");
        assert_eq!(texts(&reader.poll().unwrap().lines), vec!["hello world"]);

        append(file.path(), "\n");
        assert_eq!(texts(&reader.poll().unwrap().lines), vec!["next"]);
    }

    #[test]
    fn test_crlf_and_empty_lines() {
        let file = NamedTempFile::new().unwrap();
        let mut reader = LineReader::open(file.path(), MAX).unwrap();

        append(file.path(), "a\r\n\nb\n");
        assert_eq!(texts(&reader.poll().unwrap().lines), vec!["a", "", "b"]);
    }

    #[test]
    fn test_long_lines_are_truncated() {
        let file = NamedTempFile::new().unwrap();
        let mut reader = LineReader::open(file.path(), 4).unwrap();

        append(file.path(), "abcdefgh\nxy\n");
        assert_eq!(texts(&reader.poll().unwrap().lines), vec!["abcd", "xy"]);
    }

    #[test]
    fn test_truncation_restarts_from_beginning() {
        let file = NamedTempFile::new().unwrap();
        let mut reader = LineReader::open(file.path(), MAX).unwrap();

        append(file.path(), "one\ntwo\nthree\nfour\nfive\n");
        assert_eq!(reader.poll().unwrap().lines.len(), 5);

        file.as_file().set_len(0).unwrap();
        append(file.path(), "a\nb\nc\n");

        let outcome = reader.poll().unwrap();
        assert_eq!(texts(&outcome.lines), vec!["a", "b", "c"]);
        assert_eq!(reader.offset(), 6);
    }

    #[test]
    fn test_truncation_drops_partial_line() {
        let file = NamedTempFile::new().unwrap();
        let mut reader = LineReader::open(file.path(), MAX).unwrap();

        append(file.path(), "complete\nincompl");
        assert_eq!(texts(&reader.poll().unwrap().lines), vec!["complete"]);

        file.as_file().set_len(0).unwrap();
        append(file.path(), "fresh\n");
        assert_eq!(texts(&reader.poll().unwrap().lines), vec!["fresh"]);
    }

    #[cfg(unix)]
    #[test]
    fn test_recreated_file_is_reopened() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.log");
        std::fs::write(&path, "old 1\n").unwrap();

        let mut reader = LineReader::open(&path, MAX).unwrap();
        let old_id = reader.file_id();

        append(&path, "old 2\nold tail");
        std::fs::rename(&path, dir.path().join("app.log.1")).unwrap();
        std::fs::write(&path, "new 1\nnew 2\n").unwrap();

        let outcome = reader.poll().unwrap();
        assert_eq!(
            texts(&outcome.lines),
            vec!["old 2", "old tail", "new 1", "new 2"]
        );
        assert!(!outcome.path_missing);
        assert_ne!(reader.file_id(), old_id);
    }

    #[test]
    fn test_deleted_file_reports_missing() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.log");
        std::fs::write(&path, "").unwrap();

        let mut reader = LineReader::open(&path, MAX).unwrap();
        append(&path, "last words\n");
        std::fs::remove_file(&path).unwrap();

        let outcome = reader.poll().unwrap();
        assert!(outcome.path_missing);
        #[cfg(unix)]
        assert_eq!(texts(&outcome.lines), vec!["last words"]);
    }

    #[test]
    fn test_open_missing_file_fails() {
        let dir = TempDir::new().unwrap();
        let err = LineReader::open(dir.path().join("nope.log"), MAX).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn test_open_directory_fails() {
        let dir = TempDir::new().unwrap();
        assert!(LineReader::open(dir.path(), MAX).is_err());
    }

    #[test]
    fn test_backlog_last_lines() {
        let mut file = NamedTempFile::new().unwrap();
        for i in 1..=20 {
            writeln!(file, "line {}", i).unwrap();
        }
        file.flush().unwrap();

        let (mut reader, backlog) = LineReader::open_with_backlog(file.path(), 3, MAX).unwrap();
        assert_eq!(texts(&backlog), vec!["line 18", "line 19", "line 20"]);

        append(file.path(), "line 21\n");
        assert_eq!(texts(&reader.poll().unwrap().lines), vec!["line 21"]);
    }

    #[test]
    fn test_backlog_shorter_file() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "a\nb\n").unwrap();
        file.flush().unwrap();

        let (_, backlog) = LineReader::open_with_backlog(file.path(), 10, MAX).unwrap();
        assert_eq!(texts(&backlog), vec!["a", "b"]);
    }

    #[test]
    fn test_backlog_leaves_partial_line_for_poll() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "a\nb\npart").unwrap();
        file.flush().unwrap();

        let (mut reader, backlog) = LineReader::open_with_backlog(file.path(), 10, MAX).unwrap();
        assert_eq!(texts(&backlog), vec!["a", "b"]);
        assert_eq!(reader.offset(), 4);

        append(file.path(), "ial\n");
        assert_eq!(texts(&reader.poll().unwrap().lines), vec!["partial"]);
    }

    #[test]
    fn test_backlog_spanning_chunks() {
        let mut file = NamedTempFile::new().unwrap();
        let long = "x".repeat(SEEK_CHUNK_SIZE as usize);
        writeln!(file, "first").unwrap();
        writeln!(file, "{}", long).unwrap();
        writeln!(file, "last").unwrap();
        file.flush().unwrap();

        let (_, backlog) = LineReader::open_with_backlog(file.path(), 2, MAX).unwrap();
        assert_eq!(backlog.len(), 2);
        assert_eq!(backlog[0].as_str(), long);
        assert_eq!(backlog[1].as_str(), "last");

        let (_, backlog) = LineReader::open_with_backlog(file.path(), 5, MAX).unwrap();
        assert_eq!(backlog.len(), 3);
        assert_eq!(backlog[0].as_str(), "first");
    }

    #[test]
    fn test_backlog_empty_file() {
        let file = NamedTempFile::new().unwrap();
        let (reader, backlog) = LineReader::open_with_backlog(file.path(), 10, MAX).unwrap();
        assert!(backlog.is_empty());
        assert_eq!(reader.offset(), 0);
    }

    #[test]
    fn test_backlog_from_newline_free_file_is_bounded() {
        let file = NamedTempFile::new().unwrap();
        // Sparse, reads back as zeros
        file.as_file().set_len(32 * 1024 * 1024).unwrap();

        let start = std::time::Instant::now();
        let (mut reader, backlog) = LineReader::open_with_backlog(file.path(), 10, 1024).unwrap();
        assert!(start.elapsed() < std::time::Duration::from_secs(2));
        assert!(backlog.is_empty());
        assert_eq!(reader.offset(), 32 * 1024 * 1024);

        // The rest of the oversized line is dropped, later lines come through
        append(file.path(), "tail\nnext\n");
        assert_eq!(texts(&reader.poll().unwrap().lines), vec!["next"]);
    }

    #[test]
    fn test_backlog_skips_line_starting_before_window() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{}\na\nb\n", "x".repeat(100_000)).unwrap();
        file.flush().unwrap();

        let (mut reader, backlog) = LineReader::open_with_backlog(file.path(), 5, 16).unwrap();
        assert_eq!(texts(&backlog), vec!["a", "b"]);

        append(file.path(), "c\n");
        assert_eq!(texts(&reader.poll().unwrap().lines), vec!["c"]);
    }

    #[cfg(unix)]
    #[test]
    fn test_open_fifo_fails_without_blocking() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("pipe");
        let status = std::process::Command::new("mkfifo")
            .arg(&path)
            .status()
            .unwrap();
        assert!(status.success());

        let (tx, rx) = std::sync::mpsc::channel();
        let opener = path.clone();
        std::thread::spawn(move || {
            let _ = tx.send(LineReader::open_with_backlog(&opener, 10, MAX).map(|_| ()));
        });

        let result = rx
            .recv_timeout(std::time::Duration::from_secs(2))
            .expect("opening a FIFO must not block");
        assert_eq!(result.unwrap_err().kind(), io::ErrorKind::InvalidInput);
    }
}
