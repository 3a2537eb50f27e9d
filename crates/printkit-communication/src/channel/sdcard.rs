//! SD card command stream
//!
//! Commands are read from consecutive 512-byte blocks of a block device
//! into a ring buffer of `read_buffer_blocks` blocks. The buffer carries a
//! mirror of its first `max_command_size - 1` bytes past the end, so a
//! command that wraps around can always be tokenized from one contiguous
//! slice.
//!
//! The channel is a state machine driven by the printer:
//!
//! ```text
//! None --mount--> Initing --init ok--> Inited --start--> Running
//!                    \--init error--> None         Running --pause--> Pausing|Inited
//!                                                  Pausing --read done--> Inited
//! ```

use crate::parser::GcodeParser;
use crate::reply;
use printkit_core::{GcodeCommand, GcodeError, StorageError};
use printkit_settings::StorageSettings;

/// Size of one device block
pub const BLOCK_SIZE: usize = 512;

/// Completion reported by a block device
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockEvent {
    /// Activation finished, with the capacity in blocks
    InitDone(Result<u32, StorageError>),
    /// A queued read finished
    ReadDone(Result<Box<[u8; BLOCK_SIZE]>, StorageError>),
}

/// External block-oriented storage reader
pub trait BlockDevice: Send {
    /// Power up and initialize; completion arrives as [`BlockEvent::InitDone`]
    fn activate(&mut self);

    /// Power down, dropping any read in flight
    fn deactivate(&mut self);

    /// Start reading one block; completion arrives as [`BlockEvent::ReadDone`]
    fn queue_read(&mut self, block: u32);

    fn poll_event(&mut self) -> Option<BlockEvent>;
}

/// Mount and streaming state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SdState {
    None,
    Initing,
    Inited,
    Running,
    Pausing,
}

/// Something the printer has to act on after a device event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SdNotice {
    /// Mount finished; the mounting command gets this reply and finishes
    Mounted(Result<u32, StorageError>),
    /// The read blocking a pause completed; the pausing command finishes
    Paused,
    /// A line for the interactive channel
    Message(&'static str),
}

/// Result of looking for the next stored command
#[derive(Debug, Clone, PartialEq)]
pub enum SdNext {
    /// More data must be read first
    Wait,
    /// A command to run
    Command(GcodeCommand),
    /// The stream ended; the message goes to the interactive channel
    End(&'static str),
}

/// Outcome of polling the device
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollResult {
    /// The device had nothing to report
    Idle,
    /// An event was consumed without anything for the printer to do
    Handled,
    /// An event the printer has to act on
    Notice(SdNotice),
}

/// Result of a pause request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PauseResult {
    /// Nothing was running
    NotRunning,
    /// Stopped immediately
    Paused,
    /// Stops once the read in flight completes
    Pausing,
}

/// The SD card command source
pub struct SdCardChannel {
    device: Box<dyn BlockDevice>,
    parser: GcodeParser,
    state: SdState,
    buffer: Vec<u8>,
    base_size: usize,
    max_command_size: usize,
    start: usize,
    length: usize,
    cmd_offset: usize,
    sd_block: u32,
    capacity: u32,
    eof: bool,
    reading: bool,
    next_event: bool,
}

impl SdCardChannel {
    pub fn new(device: Box<dyn BlockDevice>, settings: &StorageSettings, max_parts: usize) -> Self {
        let base_size = settings.read_buffer_blocks * BLOCK_SIZE;
        Self {
            device,
            parser: GcodeParser::new(max_parts).with_eof_marker(),
            state: SdState::None,
            buffer: vec![0; base_size + settings.max_command_size - 1],
            base_size,
            max_command_size: settings.max_command_size,
            start: 0,
            length: 0,
            cmd_offset: 0,
            sd_block: 0,
            capacity: 0,
            eof: false,
            reading: false,
            next_event: false,
        }
    }

    pub fn state(&self) -> SdState {
        self.state
    }

    pub fn is_eof(&self) -> bool {
        self.eof
    }

    /// Blocks consumed from the device so far
    pub fn block(&self) -> u32 {
        self.sd_block
    }

    /// Buffered bytes not yet consumed
    pub fn buffered(&self) -> usize {
        self.length - self.cmd_offset
    }

    fn index(&self, count: usize) -> usize {
        let x = self.start + count;
        if x >= self.base_size {
            x - self.base_size
        } else {
            x
        }
    }

    fn can_read(&self) -> bool {
        self.length < self.base_size && self.sd_block < self.capacity
    }

    fn start_read(&mut self) {
        debug_assert!(self.can_read());
        self.reading = true;
        self.device.queue_read(self.sd_block);
    }

    fn schedule_next_event(&mut self) {
        self.next_event = true;
    }

    /// Consume the pending request to look for the next command
    pub fn take_next_event(&mut self) -> bool {
        std::mem::replace(&mut self.next_event, false)
    }

    /// M21: begin mounting. Returns false when already mounted.
    pub fn mount(&mut self) -> bool {
        if self.state != SdState::None {
            return false;
        }
        tracing::debug!("Activating SD card");
        self.device.activate();
        self.state = SdState::Initing;
        true
    }

    /// M22: unmount. Returns whether anything was mounted.
    pub fn unmount(&mut self) -> bool {
        assert!(
            self.state != SdState::Initing && self.state != SdState::Pausing,
            "unmount while {:?}",
            self.state
        );
        if self.state == SdState::None {
            return false;
        }
        self.state = SdState::None;
        self.next_event = false;
        self.reading = false;
        self.device.deactivate();
        tracing::info!("SD card unmounted");
        true
    }

    /// M24: start or resume streaming. Returns false when not mounted or
    /// already running.
    pub fn start(&mut self) -> bool {
        if self.state != SdState::Inited {
            return false;
        }
        self.state = SdState::Running;
        self.eof = false;
        if self.can_read() {
            self.start_read();
        }
        true
    }

    /// Resume could not revive a parked command; look for a new one
    pub fn kick(&mut self) {
        self.schedule_next_event();
    }

    /// M25: pause streaming
    pub fn pause(&mut self) -> PauseResult {
        if self.state != SdState::Running {
            return PauseResult::NotRunning;
        }
        self.next_event = false;
        if self.reading {
            self.state = SdState::Pausing;
            PauseResult::Pausing
        } else {
            self.state = SdState::Inited;
            PauseResult::Paused
        }
    }

    /// Poll the device and advance the state machine. `has_command` tells
    /// whether the channel is busy with a command.
    pub fn poll_device(&mut self, has_command: bool) -> PollResult {
        let Some(event) = self.device.poll_event() else {
            return PollResult::Idle;
        };
        let notice = match event {
            BlockEvent::InitDone(result) => self.init_done(result),
            BlockEvent::ReadDone(result) => self.read_done(result, has_command),
        };
        notice.map_or(PollResult::Handled, PollResult::Notice)
    }

    fn init_done(&mut self, result: Result<u32, StorageError>) -> Option<SdNotice> {
        if self.state != SdState::Initing {
            tracing::debug!("Ignoring SD init completion in state {:?}", self.state);
            return None;
        }
        match &result {
            Ok(capacity) => {
                self.state = SdState::Inited;
                self.start = 0;
                self.length = 0;
                self.cmd_offset = 0;
                self.sd_block = 0;
                self.capacity = *capacity;
                tracing::info!("SD card mounted, {} blocks", capacity);
            }
            Err(e) => {
                self.state = SdState::None;
                tracing::warn!("SD card init failed: {}", e);
            }
        }
        Some(SdNotice::Mounted(result))
    }

    fn read_done(
        &mut self,
        result: Result<Box<[u8; BLOCK_SIZE]>, StorageError>,
        has_command: bool,
    ) -> Option<SdNotice> {
        if !self.reading || !matches!(self.state, SdState::Running | SdState::Pausing) {
            tracing::debug!("Ignoring stale SD read in state {:?}", self.state);
            return None;
        }
        self.reading = false;
        if self.state == SdState::Pausing {
            self.state = SdState::Inited;
            return Some(SdNotice::Paused);
        }
        let block = match result {
            Ok(block) => block,
            Err(e) => {
                tracing::warn!("SD read of block {} failed, retrying: {}", self.sd_block, e);
                self.start_read();
                return Some(SdNotice::Message(reply::SD_READ_ERROR));
            }
        };

        let at = self.index(self.length);
        self.buffer[at..at + BLOCK_SIZE].copy_from_slice(&block[..]);
        if at == 0 {
            let mirror = self.max_command_size - 1;
            self.buffer.copy_within(0..mirror, self.base_size);
        }
        self.sd_block += 1;
        self.length += BLOCK_SIZE;
        if self.can_read() {
            self.start_read();
        }
        if !has_command && !self.eof {
            self.schedule_next_event();
        }
        None
    }

    /// Look for the next stored command
    pub fn next_command(&mut self) -> SdNext {
        assert_eq!(self.state, SdState::Running, "SD next command while not running");
        assert!(!self.eof, "SD next command after end of stream");

        let avail = (self.length - self.cmd_offset).min(self.max_command_size);
        let from = self.index(self.cmd_offset);
        if let Some(command) = self.parser.parse_line(&self.buffer[from..from + avail]) {
            if command.error() == Some(GcodeError::Eof) {
                return self.end(reply::SD_EOF);
            }
            return SdNext::Command(command);
        }
        if avail == self.max_command_size {
            return self.end(reply::SD_LINE_ERROR);
        }
        if self.sd_block == self.capacity {
            return self.end(reply::SD_END);
        }
        SdNext::Wait
    }

    fn end(&mut self, message: &'static str) -> SdNext {
        self.eof = true;
        tracing::info!("SD stream ended: {}", message.trim_end());
        SdNext::End(message)
    }

    /// Consume a finished command's bytes and look for the next one
    pub fn finish_command(&mut self, length: usize) {
        assert_eq!(self.state, SdState::Running, "SD command finished while not running");
        assert!(length <= self.length - self.cmd_offset);

        self.schedule_next_event();
        self.cmd_offset += length;
        if self.cmd_offset >= BLOCK_SIZE {
            self.start += BLOCK_SIZE;
            if self.start == self.base_size {
                self.start = 0;
            }
            self.length -= BLOCK_SIZE;
            self.cmd_offset -= BLOCK_SIZE;
            if self.length == self.base_size - BLOCK_SIZE && self.sd_block < self.capacity {
                self.start_read();
            }
        }
    }
}

impl std::fmt::Debug for SdCardChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SdCardChannel")
            .field("state", &self.state)
            .field("start", &self.start)
            .field("length", &self.length)
            .field("cmd_offset", &self.cmd_offset)
            .field("sd_block", &self.sd_block)
            .field("eof", &self.eof)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    /// Device serving a byte image, completing one request per poll
    struct Image {
        data: Vec<u8>,
        events: VecDeque<BlockEvent>,
        fail_next_read: bool,
    }

    impl Image {
        fn new(text: &str) -> Self {
            let mut data = text.as_bytes().to_vec();
            let blocks = data.len().div_ceil(BLOCK_SIZE).max(1);
            data.resize(blocks * BLOCK_SIZE, b'\n');
            Self {
                data,
                events: VecDeque::new(),
                fail_next_read: false,
            }
        }
    }

    impl BlockDevice for Image {
        fn activate(&mut self) {
            let blocks = (self.data.len() / BLOCK_SIZE) as u32;
            self.events.push_back(BlockEvent::InitDone(Ok(blocks)));
        }
        fn deactivate(&mut self) {
            self.events.clear();
        }
        fn queue_read(&mut self, block: u32) {
            if std::mem::take(&mut self.fail_next_read) {
                self.events
                    .push_back(BlockEvent::ReadDone(Err(StorageError::Read { block })));
                return;
            }
            let at = block as usize * BLOCK_SIZE;
            let mut buf = Box::new([0u8; BLOCK_SIZE]);
            buf.copy_from_slice(&self.data[at..at + BLOCK_SIZE]);
            self.events.push_back(BlockEvent::ReadDone(Ok(buf)));
        }
        fn poll_event(&mut self) -> Option<BlockEvent> {
            self.events.pop_front()
        }
    }

    fn settings() -> StorageSettings {
        StorageSettings {
            read_buffer_blocks: 2,
            max_command_size: 128,
        }
    }

    fn mounted(image: Image) -> SdCardChannel {
        let mut sd = SdCardChannel::new(Box::new(image), &settings(), 16);
        assert!(sd.mount());
        assert!(matches!(
            sd.poll_device(false),
            PollResult::Notice(SdNotice::Mounted(Ok(_)))
        ));
        assert!(sd.start());
        sd
    }

    /// Run the stream to its end, returning the commands and the end message
    fn drain(sd: &mut SdCardChannel) -> (Vec<String>, &'static str) {
        let mut commands = Vec::new();
        loop {
            loop {
                match sd.poll_device(false) {
                    PollResult::Idle => break,
                    PollResult::Handled => {}
                    PollResult::Notice(notice) => assert!(matches!(notice, SdNotice::Message(_))),
                }
            }
            if !sd.take_next_event() {
                continue;
            }
            match sd.next_command() {
                SdNext::Wait => {}
                SdNext::Command(cmd) => {
                    commands.push(cmd.to_string());
                    sd.finish_command(cmd.length());
                }
                SdNext::End(message) => return (commands, message),
            }
        }
    }

    #[test]
    fn test_stream_until_eof_marker() {
        let mut sd = mounted(Image::new("G21\nG90\nEOF\nG1 X5\n"));
        let (commands, end) = drain(&mut sd);
        assert_eq!(commands.len(), 2);
        assert_eq!(end, reply::SD_EOF);
        assert!(sd.is_eof());
    }

    #[test]
    fn test_commands_across_wrap() {
        // Lines of 100 bytes do not divide the 1024-byte ring evenly
        let line = format!("G1 X{}\n", "1".repeat(94));
        assert_eq!(line.len(), 100);
        let mut text = line.repeat(30);
        text.push_str("EOF\n");
        let mut sd = mounted(Image::new(&text));
        let (commands, end) = drain(&mut sd);
        assert_eq!(commands.len(), 30);
        assert_eq!(end, reply::SD_EOF);
        assert!(sd.block() >= 6);
    }

    #[test]
    fn test_end_without_marker() {
        let mut sd = mounted(Image::new("G21\n"));
        let (commands, end) = drain(&mut sd);
        // Padding newlines are empty commands
        assert_eq!(commands[0], "G21");
        assert_eq!(end, reply::SD_END);
    }

    #[test]
    fn test_overlong_line() {
        let mut text = "G1 X".to_string();
        text.push_str(&"9".repeat(300));
        text.push('\n');
        let mut sd = mounted(Image::new(&text));
        let (commands, end) = drain(&mut sd);
        assert!(commands.is_empty());
        assert_eq!(end, reply::SD_LINE_ERROR);
    }

    #[test]
    fn test_read_error_is_retried() {
        let mut image = Image::new("G21\nEOF\n");
        image.fail_next_read = true;
        let mut sd = mounted(image);
        assert_eq!(
            sd.poll_device(false),
            PollResult::Notice(SdNotice::Message(reply::SD_READ_ERROR))
        );
        assert_eq!(sd.poll_device(false), PollResult::Handled);
        assert!(sd.take_next_event());
        assert!(matches!(sd.next_command(), SdNext::Command(_)));
    }

    #[test]
    fn test_pause_waits_for_read() {
        let mut sd = mounted(Image::new(&"G21\n".repeat(300)));
        assert_eq!(sd.pause(), PauseResult::Pausing);
        assert_eq!(sd.state(), SdState::Pausing);
        assert_eq!(sd.poll_device(false), PollResult::Notice(SdNotice::Paused));
        assert_eq!(sd.state(), SdState::Inited);
        assert_eq!(sd.pause(), PauseResult::NotRunning);
        assert!(sd.unmount());
        assert!(!sd.unmount());
    }
}
