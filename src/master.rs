//! Bus master (query/poll) part of the protocol.
//!
//! The protocol engine doesn't do any I/O. [`Master::query`] gives the bytes
//! to put on the bus, and the returned [`ReceiveResponse`] is fed with the
//! bytes read back until it reports [`ReceiverResult::Done`]. Timing, and
//! the switching of the half-duplex line, is left to the caller. The
//! [`io`] module has a blocking driver doing all of it.
//!
//! # Example
//!
//! ```
//! use weatherbus_proto::master::{Master, ReceiverResult};
//! use weatherbus_proto::Channel;
//!
//! let send = Master::new().query(Channel::TEMPERATURE);
//! assert_eq!(send.as_slice(), b"?T\r\n");
//!
//! let mut recv = send.data_sent();
//! for byte in b"xxT:21.5\n" {
//!     match recv.receive_data(&[*byte]) {
//!         ReceiverResult::NeedData(r) => recv = r,
//!         ReceiverResult::Done(_master, response) => {
//!             assert_eq!(response, Ok(21.5));
//!             break;
//!         }
//!     }
//! }
//! ```

use arrayvec::ArrayVec;
use log::{debug, trace, warn};
use snafu::Snafu;

use crate::buffer::Buffer;
use crate::nom_parser::parse_frame;
use crate::types::Channel;

#[cfg(feature = "std")]
pub mod io;

const QUERY: u8 = b'?';
const SEPARATOR: u8 = b':';
const LF: u8 = b'\n';
/// Appended to every query, as Arduino's `println()` does.
pub const LINE_TERMINATOR: &[u8] = b"\r\n";

/// A completed frame that couldn't be turned into a measurement.
#[derive(Debug, Snafu, PartialEq, Eq, Clone, Copy)]
#[snafu(visibility(pub(crate)))]
#[non_exhaustive]
pub enum ResponseError {
    /// The frame has no `:` separating the value.
    #[snafu(display("Response frame without value separator"))]
    MalformedFrame,
    /// The text after the separator isn't a number.
    /// Only reported with [`NumberParsing::Strict`].
    #[snafu(display("Response value is not a number"))]
    InvalidNumber,
}

/// How the text after the colon is converted to a number.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum NumberParsing {
    /// C `atof` rules: the longest numeric prefix is used, and a value
    /// without any digits reads as 0.0. Deployed sensor nodes depend on this.
    Lenient,
    /// The value must be a number, optionally followed by whitespace.
    Strict,
}

impl Default for NumberParsing {
    fn default() -> Self {
        NumberParsing::Lenient
    }
}

/// The idle protocol state. Create a query with [`query`](Self::query).
#[derive(Debug, Clone, Default)]
pub struct Master {
    parsing: NumberParsing,
}

impl Master {
    pub fn new() -> Master {
        Master::default()
    }

    /// Use a non-default conversion for the response values.
    pub fn with_parsing(parsing: NumberParsing) -> Master {
        Master { parsing }
    }

    pub fn parsing(&self) -> NumberParsing {
        self.parsing
    }

    /// Build the query frame asking for the measurement on `channel`.
    pub fn query(self, channel: Channel) -> SendData {
        let mut data = QueryBytes::new();
        data.push(QUERY);
        data.push(*channel);
        data.extend(LINE_TERMINATOR.iter().copied());
        debug!("Query for channel {}", channel);
        SendData {
            master: self,
            channel,
            data,
        }
    }
}

// ?<code>\r\n
type QueryBytes = ArrayVec<u8, 4>;

/// A query frame waiting to be transmitted.
///
/// Call [`as_slice()`](Self::as_slice()) to get the data to be transmitted,
/// and then call [`data_sent()`](Self::data_sent()) once it's on the wire.
#[derive(Debug)]
pub struct SendData {
    master: Master,
    channel: Channel,
    data: QueryBytes,
}

impl SendData {
    /// Returns the data to be sent on the bus.
    pub fn as_slice(&self) -> &[u8] {
        self.data.as_slice()
    }

    /// The query without its line terminator.
    pub fn frame(&self) -> &[u8] {
        &self.data[..2]
    }

    pub fn channel(&self) -> Channel {
        self.channel
    }

    /// Signals that the query was sent. The response parser starts
    /// looking for the channel code.
    pub fn data_sent(self) -> ReceiveResponse {
        ReceiveResponse {
            master: self.master,
            channel: self.channel,
            state: ParseState::AwaitingStart,
            buffer: Buffer::new(),
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum ParseState {
    AwaitingStart,
    ReadingPayload,
    Done,
}

#[derive(Debug)]
pub enum ReceiverResult {
    NeedData(ReceiveResponse),
    Done(Master, Result<f32, ResponseError>),
}

/// Response parser, collecting one frame for the queried channel.
#[derive(Debug)]
pub struct ReceiveResponse {
    master: Master,
    channel: Channel,
    state: ParseState,
    buffer: Buffer,
}

impl ReceiveResponse {
    /// Feed received bytes to the parser.
    ///
    /// Bytes before the queried channel code are dropped. The frame is
    /// complete at a line feed, or when a byte arrives with the buffer
    /// already holding [`PAYLOAD_CAPACITY`](crate::PAYLOAD_CAPACITY) bytes.
    /// Anything in `data` after the end of the frame is ignored.
    pub fn receive_data(mut self, data: &[u8]) -> ReceiverResult {
        for &byte in data {
            match self.state {
                ParseState::AwaitingStart => {
                    if self.channel == byte {
                        self.buffer.push(byte);
                        self.state = ParseState::ReadingPayload;
                    } else {
                        trace!("Dropping byte {:#04x} outside of frame", byte);
                    }
                }
                ParseState::ReadingPayload => {
                    if byte == LF || self.buffer.is_full() {
                        self.state = ParseState::Done;
                    } else {
                        self.buffer.push(byte);
                    }
                }
                ParseState::Done => unreachable!(),
            }
            if self.state == ParseState::Done {
                return self.complete();
            }
        }
        ReceiverResult::NeedData(self)
    }

    fn complete(self) -> ReceiverResult {
        let frame = self.buffer.as_ref();
        debug!(
            "Frame complete on channel {}: {:?}",
            self.channel,
            core::str::from_utf8(frame).unwrap_or("<non-ascii>")
        );
        let result = parse_frame(frame, self.master.parsing);
        match result {
            Err(ResponseError::MalformedFrame) => warn!(
                "No '{}' in response for channel {}",
                SEPARATOR as char, self.channel
            ),
            Err(ResponseError::InvalidNumber) => {
                warn!("Non-numeric value on channel {}", self.channel)
            }
            Ok(_) => (),
        }
        ReceiverResult::Done(self.master, result)
    }

    /// The response didn't arrive in time. A partially received frame is dropped.
    pub fn timed_out(self) -> Master {
        if self.state == ParseState::ReadingPayload {
            debug!(
                "Discarding {} byte partial frame on channel {}",
                self.buffer.len(),
                self.channel
            );
        }
        self.master
    }

    pub fn channel(&self) -> Channel {
        self.channel
    }

    /// True once the channel code has been seen.
    pub fn in_frame(&self) -> bool {
        self.state == ParseState::ReadingPayload
    }
}
