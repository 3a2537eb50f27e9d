//! Interactive serial channel
//!
//! Buffers received bytes until a full line is available, tracks `N` line
//! numbers for `M110` style hosts and collects replies for the port.
//!
//! Bytes beyond the receive buffer are dropped and remembered as an
//! overrun; once no complete line remains, the buffer is discarded and the
//! next command is reported as a receive overrun.

use crate::parser::GcodeParser;
use crate::reply;
use printkit_core::{GcodeCommand, GcodeError};
use printkit_settings::SerialSettings;
use std::io;
use thiserror::Error;

/// Byte-stream port behind the channel
pub trait SerialPort: Send {
    /// Write data to the port
    fn write(&mut self, data: &[u8]) -> io::Result<usize>;

    /// Read available data without blocking; `Ok(0)` when idle
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Get the port name
    fn name(&self) -> String;
}

/// A numbered line arrived out of sequence
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("Line Number is not Last Line Number+1, Last Line:{last}")]
pub struct LineNumberError {
    /// Last accepted line number
    pub last: u32,
}

/// The serial command source
pub struct SerialChannel {
    port: Box<dyn SerialPort>,
    parser: GcodeParser,
    recv: Vec<u8>,
    recv_capacity: usize,
    overrun: bool,
    next_error: Option<GcodeError>,
    send: Vec<u8>,
    send_capacity: usize,
    line_number: u32,
}

impl SerialChannel {
    pub fn new(port: Box<dyn SerialPort>, settings: &SerialSettings) -> Self {
        tracing::debug!("Serial channel on {}", port.name());
        Self {
            port,
            parser: GcodeParser::new(settings.max_parts),
            recv: Vec::with_capacity(settings.recv_buffer_size),
            recv_capacity: settings.recv_buffer_size,
            overrun: false,
            next_error: None,
            send: Vec::with_capacity(settings.send_buffer_size),
            send_capacity: settings.send_buffer_size,
            line_number: 1,
        }
    }

    pub fn port_name(&self) -> String {
        self.port.name()
    }

    /// Pull pending bytes from the port. Returns whether anything arrived.
    pub fn poll_port(&mut self) -> io::Result<bool> {
        let mut chunk = [0u8; 64];
        let mut received = false;
        loop {
            let n = self.port.read(&mut chunk)?;
            if n == 0 {
                return Ok(received);
            }
            received = true;
            let room = self.recv_capacity - self.recv.len();
            if n > room {
                self.overrun = true;
                tracing::warn!("Serial receive buffer overrun, dropped {} bytes", n - room);
            }
            self.recv.extend_from_slice(&chunk[..n.min(room)]);
        }
    }

    /// Tokenize the next buffered line, if a complete one is available
    pub fn next_command(&mut self) -> Option<GcodeCommand> {
        match self.parser.parse_line(&self.recv) {
            Some(command) => match self.next_error.take() {
                Some(error) => Some(GcodeCommand::with_error(error, command.length())),
                None => Some(command),
            },
            None => {
                if self.overrun {
                    self.recv.clear();
                    self.overrun = false;
                    self.next_error = Some(GcodeError::RecvOverrun);
                }
                None
            }
        }
    }

    /// Line number bookkeeping for a newly started command
    pub fn start_command(&mut self, command: &GcodeCommand) -> Result<(), LineNumberError> {
        let is_m110 = command.is('M', 110);
        if is_m110 {
            let default = command.line_number().unwrap_or(u32::MAX);
            self.line_number = command.get_param_u32('L', default);
        }
        if let Some(number) = command.line_number() {
            if number != self.line_number {
                return Err(LineNumberError {
                    last: self.line_number.wrapping_sub(1),
                });
            }
        }
        if command.line_number().is_some() || is_m110 {
            self.line_number = self.line_number.wrapping_add(1);
        }
        Ok(())
    }

    /// Acknowledge a command and drop its bytes from the receive buffer
    pub fn finish_command(&mut self, length: usize, no_ok: bool) {
        if !no_ok {
            self.reply(reply::OK);
        }
        let length = length.min(self.recv.len());
        self.recv.drain(..length);
    }

    /// Queue reply text; whatever does not fit the send buffer is lost
    pub fn reply(&mut self, text: &str) {
        let room = self.send_capacity - self.send.len();
        let bytes = text.as_bytes();
        if bytes.len() > room {
            tracing::trace!("Serial send buffer full, truncating reply");
        }
        self.send.extend_from_slice(&bytes[..bytes.len().min(room)]);
    }

    /// Write queued replies to the port
    pub fn flush(&mut self) -> io::Result<()> {
        while !self.send.is_empty() {
            let n = self.port.write(&self.send)?;
            if n == 0 {
                break;
            }
            self.send.drain(..n);
        }
        Ok(())
    }

    /// Next expected line number
    pub fn line_number(&self) -> u32 {
        self.line_number
    }

    /// Bytes received but not yet consumed
    pub fn buffered(&self) -> usize {
        self.recv.len()
    }
}

impl std::fmt::Debug for SerialChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialChannel")
            .field("port", &self.port.name())
            .field("buffered", &self.recv.len())
            .field("overrun", &self.overrun)
            .field("line_number", &self.line_number)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct Loopback {
        input: Arc<Mutex<VecDeque<u8>>>,
        output: Arc<Mutex<Vec<u8>>>,
    }

    impl SerialPort for Loopback {
        fn write(&mut self, data: &[u8]) -> io::Result<usize> {
            self.output.lock().unwrap().extend_from_slice(data);
            Ok(data.len())
        }
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let mut input = self.input.lock().unwrap();
            let n = buf.len().min(input.len());
            for (slot, byte) in buf.iter_mut().zip(input.drain(..n)) {
                *slot = byte;
            }
            Ok(n)
        }
        fn name(&self) -> String {
            "loopback".to_string()
        }
    }

    fn channel(recv: usize) -> (SerialChannel, Loopback) {
        let port = Loopback::default();
        let settings = SerialSettings {
            recv_buffer_size: recv,
            ..SerialSettings::default()
        };
        (SerialChannel::new(Box::new(port.clone()), &settings), port)
    }

    fn feed(port: &Loopback, text: &str) {
        port.input.lock().unwrap().extend(text.bytes());
    }

    #[test]
    fn test_line_numbers() {
        let (mut ch, port) = channel(256);
        feed(&port, "N1 G21\nN3 G21\n");
        ch.poll_port().unwrap();

        let first = ch.next_command().unwrap();
        assert_eq!(ch.start_command(&first), Ok(()));
        ch.finish_command(first.length(), false);

        let second = ch.next_command().unwrap();
        assert_eq!(ch.start_command(&second), Err(LineNumberError { last: 1 }));
        assert_eq!(
            LineNumberError { last: 1 }.to_string(),
            "Line Number is not Last Line Number+1, Last Line:1"
        );
        assert_eq!(ch.line_number(), 2);
    }

    #[test]
    fn test_m110_resets_numbering() {
        let (mut ch, _) = channel(256);
        let m110 = ch.parser.parse_line(b"N100 M110\n").unwrap();
        assert_eq!(ch.start_command(&m110), Ok(()));
        assert_eq!(ch.line_number(), 101);

        let m110 = ch.parser.parse_line(b"M110 L5\n").unwrap();
        assert_eq!(ch.start_command(&m110), Ok(()));
        assert_eq!(ch.line_number(), 6);
    }

    #[test]
    fn test_ok_and_flush() {
        let (mut ch, port) = channel(256);
        feed(&port, "G21\n");
        ch.poll_port().unwrap();
        let cmd = ch.next_command().unwrap();
        ch.finish_command(cmd.length(), false);
        ch.flush().unwrap();
        assert_eq!(port.output.lock().unwrap().as_slice(), b"ok\n");
        assert_eq!(ch.buffered(), 0);
    }

    #[test]
    fn test_overrun_reported_on_next_command() {
        let (mut ch, port) = channel(8);
        feed(&port, "G1 X1234567890\n");
        ch.poll_port().unwrap();
        assert!(ch.next_command().is_none());
        assert_eq!(ch.buffered(), 0);

        feed(&port, "G21\n");
        ch.poll_port().unwrap();
        let cmd = ch.next_command().unwrap();
        assert_eq!(cmd.error(), Some(GcodeError::RecvOverrun));
        ch.finish_command(cmd.length(), true);
        feed(&port, "G21\n");
        ch.poll_port().unwrap();
        assert_eq!(ch.next_command().unwrap().error(), None);
    }
}
