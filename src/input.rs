//! Cancellable line acquisition.
//!
//! Reads are never allowed to block for longer than one poll interval, so an
//! interrupt or terminate request aborts a pending read promptly.

use std::fs::File;
use std::io::{self, Read};
use std::os::fd::AsFd;
use std::path::Path;

use nix::errno::Errno;
use nix::poll::{PollFd, PollFlags, PollTimeout, poll};

use crate::config::ShellConfig;
use crate::error::ShellError;
use crate::signals::SignalFlags;

const COMMENT: u8 = b'#';

/// Where command lines come from.
///
/// Reads go straight to the file descriptor, one byte at a time, so no data is
/// ever hidden in a userspace buffer while the descriptor polls as empty.
#[derive(Debug)]
pub struct InputSource {
    file: File,
    interactive: bool,
}

impl InputSource {
    /// The controlling terminal stream (standard input).
    pub fn terminal() -> Result<Self, ShellError> {
        let fd = io::stdin()
            .as_fd()
            .try_clone_to_owned()
            .map_err(ShellError::Read)?;
        Ok(Self {
            file: File::from(fd),
            interactive: true,
        })
    }

    /// A command script.
    pub fn open(path: &Path) -> Result<Self, ShellError> {
        let file = File::open(path).map_err(|source| ShellError::OpenScript {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self::from_file(file, false))
    }

    pub fn from_file(file: File, interactive: bool) -> Self {
        Self { file, interactive }
    }

    pub fn is_interactive(&self) -> bool {
        self.interactive
    }

    fn wait_readable(&self, timeout: PollTimeout) -> Result<bool, ShellError> {
        let mut fds = [PollFd::new(self.file.as_fd(), PollFlags::POLLIN)];
        match poll(&mut fds, timeout) {
            Ok(0) => Ok(false),
            Ok(_) => Ok(true),
            Err(Errno::EINTR) => Ok(false),
            Err(e) => Err(ShellError::Poll(e)),
        }
    }

    fn read_byte(&mut self) -> Result<Option<u8>, ShellError> {
        let mut byte = [0u8; 1];
        loop {
            match self.file.read(&mut byte) {
                Ok(0) => return Ok(None),
                Ok(_) => return Ok(Some(byte[0])),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(ShellError::Read(e)),
            }
        }
    }
}

/// One line as read from the input, before tokenizing.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RawLine {
    pub text: String,
    /// More than the configured number of characters preceded the newline.
    pub truncated: bool,
    /// The read was aborted by an interrupt or terminate request.
    pub interrupted: bool,
    /// A `#` ended the line; its content was dropped.
    pub is_comment: bool,
    /// End of stream with nothing read.
    pub is_eof: bool,
}

impl RawLine {
    fn interrupted() -> Self {
        Self {
            interrupted: true,
            ..Self::default()
        }
    }

    /// Nothing worth tokenizing.
    pub fn is_blank(&self) -> bool {
        self.is_comment || self.text.trim_matches(' ').is_empty()
    }
}

/// Read one line from `source`.
///
/// Polls with `config.poll_interval` between checks of `flags`; once any byte is
/// available it is consumed. A line ends at a newline, a `#`, end of stream, or
/// after `config.max_line_len` characters, in which case the rest of the line
/// is drained and `truncated` set.
pub fn read_line(
    source: &mut InputSource,
    flags: &SignalFlags,
    config: &ShellConfig,
) -> Result<RawLine, ShellError> {
    let timeout = poll_timeout(config);
    let mut buf: Vec<u8> = Vec::new();
    let mut line = RawLine::default();

    loop {
        let Some(byte) = next_byte(source, flags, timeout)? else {
            return Ok(RawLine::interrupted());
        };
        match byte {
            None => {
                line.is_eof = buf.is_empty();
                break;
            }
            Some(b'\n') => break,
            Some(COMMENT) => {
                line.is_comment = true;
                buf.clear();
                drain(source, flags, timeout)?;
                break;
            }
            Some(_) if buf.len() == config.max_line_len => {
                line.truncated = true;
                drain(source, flags, timeout)?;
                break;
            }
            Some(b) => buf.push(b),
        }
    }

    line.text = String::from_utf8_lossy(&buf).into_owned();
    Ok(line)
}

/// `Ok(None)` means the wait was cancelled; `Ok(Some(None))` is end of stream.
fn next_byte(
    source: &mut InputSource,
    flags: &SignalFlags,
    timeout: PollTimeout,
) -> Result<Option<Option<u8>>, ShellError> {
    loop {
        if flags.cancelled() {
            return Ok(None);
        }
        if source.wait_readable(timeout)? {
            return source.read_byte().map(Some);
        }
    }
}

/// Discard input up to and including the next newline.
fn drain(
    source: &mut InputSource,
    flags: &SignalFlags,
    timeout: PollTimeout,
) -> Result<(), ShellError> {
    loop {
        match next_byte(source, flags, timeout)? {
            Some(Some(b'\n')) => return Ok(()),
            Some(Some(_)) => continue,
            // an interrupt while draining leaves the rest for the next read
            Some(None) | None => return Ok(()),
        }
    }
}

fn poll_timeout(config: &ShellConfig) -> PollTimeout {
    let millis = config.poll_interval.as_millis().min(u16::MAX as u128) as u16;
    PollTimeout::from(millis)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn source_with(bytes: &[u8]) -> InputSource {
        let (reader, writer) = nix::unistd::pipe().unwrap();
        let mut writer = File::from(writer);
        writer.write_all(bytes).unwrap();
        drop(writer);
        InputSource::from_file(File::from(reader), false)
    }

    fn read(source: &mut InputSource) -> RawLine {
        read_line(source, &SignalFlags::new(), &ShellConfig::default()).unwrap()
    }

    #[test]
    fn test_reads_lines_in_order() {
        let mut source = source_with(b"ls -l\nwc\n");
        assert_eq!(read(&mut source).text, "ls -l");
        assert_eq!(read(&mut source).text, "wc");
        assert!(read(&mut source).is_eof);
    }

    #[test]
    fn test_last_line_without_newline_is_not_eof() {
        let mut source = source_with(b"true");
        let line = read(&mut source);
        assert_eq!(line.text, "true");
        assert!(!line.is_eof);
        assert!(read(&mut source).is_eof);
    }

    #[test]
    fn test_empty_line_is_not_eof() {
        let mut source = source_with(b"\n");
        let line = read(&mut source);
        assert!(!line.is_eof);
        assert!(line.is_blank());
    }

    #[test]
    fn test_comment_discards_whole_line() {
        let mut source = source_with(b"echo hi # note\nnext\n");
        let line = read(&mut source);
        assert!(line.is_comment);
        assert!(line.text.is_empty());
        assert_eq!(read(&mut source).text, "next");
    }

    #[test]
    fn test_long_line_is_truncated_and_drained() {
        let mut input = vec![b'x'; 130];
        input.extend_from_slice(b"\nafter\n");
        let mut source = source_with(&input);

        let line = read(&mut source);
        assert!(line.truncated);
        assert_eq!(line.text.len(), 128);
        assert_eq!(read(&mut source).text, "after");
    }

    #[test]
    fn test_long_line_without_newline_is_truncated() {
        let mut source = source_with(&[b'y'; 130]);
        let line = read(&mut source);
        assert!(line.truncated);
        assert_eq!(line.text.len(), 128);
        assert!(read(&mut source).is_eof);
    }

    #[test]
    fn test_interrupt_aborts_pending_read() {
        // keep the write end open so the read would otherwise wait forever
        let (reader, _writer) = nix::unistd::pipe().unwrap();
        let mut source = InputSource::from_file(File::from(reader), true);
        let flags = SignalFlags::new();

        let trigger = flags.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(std::time::Duration::from_millis(50));
            trigger.raise_interrupt();
        });

        let line = read_line(&mut source, &flags, &ShellConfig::default()).unwrap();
        handle.join().unwrap();
        assert!(line.interrupted);
        assert!(!line.is_eof);
        assert!(line.text.is_empty());
    }
}
