//! Blocking driver running the protocol over a half-duplex bus.
//!
//! [`Master`] owns a [`Bus`] handle and a [`Clock`]. Each query is one
//! transmit session, a grace period, and a receive window bounded by
//! [`Config::response_timeout`]. There are no retries.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, warn};
use snafu::{ResultExt, Snafu};

use crate::master::{self as proto, NumberParsing, ReceiveResponse, ReceiverResult, ResponseError};
use crate::types::{self, Channel, IntoChannel};

/// Default bus speed, symbols per second.
pub const DEFAULT_BAUD_RATE: u32 = 9600;
/// Default time to wait for a complete response.
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_millis(1000);
/// Default pause between the end of a transmission and listening for the reply.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_millis(2);

/// Error type for the blocking driver.
#[derive(Debug, Snafu)]
#[non_exhaustive]
pub enum Error {
    /// No complete frame for the queried channel within the timeout.
    #[snafu(display("No response on channel {} within {:?}", channel, timeout))]
    Timeout { channel: Channel, timeout: Duration },
    /// A frame was received, but it has no value separator.
    #[snafu(display("Malformed response on channel {}", channel))]
    MalformedFrame { channel: Channel },
    /// The value of the response isn't a number (strict parsing only).
    #[snafu(display("Non-numeric response on channel {}", channel))]
    InvalidNumber { channel: Channel },
    /// The query was cancelled through its [`CancelToken`].
    #[snafu(display("Query on channel {} cancelled", channel))]
    Cancelled { channel: Channel },
    /// The bus transport failed.
    #[snafu(display("Bus I/O error: {}", source))]
    Io { source: std::io::Error },
    /// The code given to a custom query isn't a valid channel.
    #[snafu(display("{}", source))]
    #[snafu(context(false))]
    InvalidChannel { source: types::Error },
}

impl Error {
    fn from_response(err: ResponseError, channel: Channel) -> Self {
        match err {
            ResponseError::MalformedFrame => Error::MalformedFrame { channel },
            ResponseError::InvalidNumber => Error::InvalidNumber { channel },
        }
    }
}

/// The capabilities needed from a half-duplex RS485 transport.
pub trait Bus {
    /// Set up the transport at the given speed.
    fn begin(&mut self, baud_rate: u32) -> std::io::Result<()>;
    /// Take the line for transmitting, e.g. raise the driver enable pin.
    fn begin_transmission(&mut self) -> std::io::Result<()>;
    fn write(&mut self, data: &[u8]) -> std::io::Result<()>;
    /// Release the line.
    fn end_transmission(&mut self) -> std::io::Result<()>;
    /// Block until all written data has left the transmitter.
    fn flush(&mut self) -> std::io::Result<()>;
    /// Enable the receiver.
    fn receive(&mut self) -> std::io::Result<()>;
    /// Disable the receiver.
    fn no_receive(&mut self) -> std::io::Result<()>;
    /// True if a received byte can be read without blocking.
    fn available(&mut self) -> std::io::Result<bool>;
    /// Read one byte without blocking.
    fn read(&mut self) -> std::io::Result<Option<u8>>;
}

impl<B: Bus + ?Sized> Bus for &mut B {
    fn begin(&mut self, baud_rate: u32) -> std::io::Result<()> {
        (**self).begin(baud_rate)
    }
    fn begin_transmission(&mut self) -> std::io::Result<()> {
        (**self).begin_transmission()
    }
    fn write(&mut self, data: &[u8]) -> std::io::Result<()> {
        (**self).write(data)
    }
    fn end_transmission(&mut self) -> std::io::Result<()> {
        (**self).end_transmission()
    }
    fn flush(&mut self) -> std::io::Result<()> {
        (**self).flush()
    }
    fn receive(&mut self) -> std::io::Result<()> {
        (**self).receive()
    }
    fn no_receive(&mut self) -> std::io::Result<()> {
        (**self).no_receive()
    }
    fn available(&mut self) -> std::io::Result<bool> {
        (**self).available()
    }
    fn read(&mut self) -> std::io::Result<Option<u8>> {
        (**self).read()
    }
}

/// Time source for the grace period and the response timeout.
pub trait Clock {
    /// Monotonic time since an arbitrary starting point.
    fn now(&mut self) -> Duration;
    fn delay(&mut self, duration: Duration);
}

/// [`Clock`] using `Instant` and `thread::sleep`.
#[derive(Debug, Clone, Copy)]
pub struct StdClock {
    epoch: Instant,
}

impl StdClock {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }
}

impl Default for StdClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for StdClock {
    fn now(&mut self) -> Duration {
        self.epoch.elapsed()
    }

    fn delay(&mut self, duration: Duration) {
        std::thread::sleep(duration)
    }
}

/// Driver settings. The defaults match the deployed sensor nodes.
#[derive(Debug, Clone)]
pub struct Config {
    /// Used by [`Master::begin_default`].
    pub baud_rate: u32,
    /// Receive window for one response, from enabling the receiver.
    pub response_timeout: Duration,
    /// Pause after the transmission, letting the node take the line.
    pub grace_period: Duration,
    /// Sleep between polls while no byte is available. Zero busy-polls.
    pub poll_interval: Duration,
    pub number_parsing: NumberParsing,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            baud_rate: DEFAULT_BAUD_RATE,
            response_timeout: DEFAULT_RESPONSE_TIMEOUT,
            grace_period: DEFAULT_GRACE_PERIOD,
            poll_interval: Duration::from_millis(0),
            number_parsing: NumberParsing::default(),
        }
    }
}

/// Shared flag aborting a query in progress. Checked once per poll.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Clear a previous cancellation, so the next query can run.
    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Blocking protocol master for a single sensor node.
///
/// The master takes `&mut self` for every query, so only one query can be
/// in flight on its bus. Share it between threads behind a `Mutex`.
pub struct Master<B, C = StdClock> {
    bus: B,
    clock: C,
    config: Config,
    cancel: Option<CancelToken>,
}

impl<B: Bus> Master<B, StdClock> {
    pub fn new(bus: B) -> Self {
        Self::with_clock(bus, StdClock::new(), Config::default())
    }

    pub fn with_config(bus: B, config: Config) -> Self {
        Self::with_clock(bus, StdClock::new(), config)
    }
}

impl<B: Bus, C: Clock> Master<B, C> {
    pub fn with_clock(bus: B, clock: C, config: Config) -> Self {
        Self {
            bus,
            clock,
            config,
            cancel: None,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut Config {
        &mut self.config
    }

    /// Queries will fail with [`Error::Cancelled`] while `token` is cancelled.
    pub fn set_cancel_token(&mut self, token: CancelToken) {
        self.cancel = Some(token);
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    pub fn into_inner(self) -> B {
        self.bus
    }

    /// Initialize the bus at `baud_rate`.
    /// # Errors
    /// Returns [`Error::Io`] if the transport rejects the setting.
    pub fn begin(&mut self, baud_rate: u32) -> Result<(), Error> {
        debug!("Starting bus at {} baud", baud_rate);
        self.bus.begin(baud_rate).context(IoSnafu)?;
        self.config.baud_rate = baud_rate;
        Ok(())
    }

    /// Initialize the bus at the configured baud rate.
    pub fn begin_default(&mut self) -> Result<(), Error> {
        self.begin(self.config.baud_rate)
    }

    /// Air temperature, °C.
    pub fn query_temperature(&mut self) -> Result<f32, Error> {
        self.query(Channel::TEMPERATURE)
    }

    /// Relative humidity, %.
    pub fn query_humidity(&mut self) -> Result<f32, Error> {
        self.query(Channel::HUMIDITY)
    }

    /// Pressure, hPa.
    pub fn query_pressure(&mut self) -> Result<f32, Error> {
        self.query(Channel::PRESSURE)
    }

    /// Air quality index.
    pub fn query_air_quality(&mut self) -> Result<f32, Error> {
        self.query(Channel::AIR_QUALITY)
    }

    /// UV index.
    pub fn query_uv(&mut self) -> Result<f32, Error> {
        self.query(Channel::UV)
    }

    /// Rainfall since the previous rainfall query, mm.
    pub fn query_rainfall(&mut self) -> Result<f32, Error> {
        self.query(Channel::RAINFALL)
    }

    /// Wind speed, m/s.
    pub fn query_wind_speed(&mut self) -> Result<f32, Error> {
        self.query(Channel::WIND_SPEED)
    }

    /// Wind direction, degrees.
    pub fn query_wind_direction(&mut self) -> Result<f32, Error> {
        self.query(Channel::WIND_DIRECTION)
    }

    /// Canopy temperature, °C.
    pub fn query_canopy_temperature(&mut self) -> Result<f32, Error> {
        self.query(Channel::CANOPY_TEMPERATURE)
    }

    /// Query a channel by its code, e.g. `'Z'`.
    pub fn query_custom(&mut self, code: impl IntoChannel) -> Result<f32, Error> {
        self.query(code.into_channel()?)
    }

    /// Boolean form of [`query`](Self::query): `value` is only written on success.
    pub fn query_into(&mut self, channel: impl IntoChannel, value: &mut f32) -> bool {
        match channel.into_channel().map_err(Error::from).and_then(|c| self.query(c)) {
            Ok(v) => {
                *value = v;
                true
            }
            Err(err) => {
                debug!("Query failed: {}", err);
                false
            }
        }
    }

    /// Send one query and wait for the response.
    /// # Errors
    /// [`Error::Timeout`] if no complete frame arrives in time,
    /// [`Error::MalformedFrame`] / [`Error::InvalidNumber`] for frames that
    /// can't be decoded, [`Error::Cancelled`] and [`Error::Io`].
    pub fn query(&mut self, channel: Channel) -> Result<f32, Error> {
        let send = proto::Master::with_parsing(self.config.number_parsing).query(channel);
        self.transmit(send.as_slice())?;
        self.clock.delay(self.config.grace_period);
        self.receive_response(send.data_sent())
    }

    fn transmit(&mut self, data: &[u8]) -> Result<(), Error> {
        self.bus.begin_transmission().context(IoSnafu)?;
        let written = self.bus.write(data);
        // release the line even if the write failed
        let released = self.bus.end_transmission();
        written.context(IoSnafu)?;
        released.context(IoSnafu)?;
        self.bus.flush().context(IoSnafu)
    }

    fn receive_response(&mut self, recv: ReceiveResponse) -> Result<f32, Error> {
        let channel = recv.channel();
        let start = self.clock.now();
        self.bus.receive().context(IoSnafu)?;
        let result = self.scan(recv, start);
        let disabled = self.bus.no_receive().context(IoSnafu);
        match result {
            Ok(value) => disabled.map(|_| value),
            Err(err) => {
                if let Err(io_err) = disabled {
                    warn!("Could not disable receiver after error on {}: {}", channel, io_err);
                }
                Err(err)
            }
        }
    }

    fn scan(&mut self, mut recv: ReceiveResponse, start: Duration) -> Result<f32, Error> {
        let channel = recv.channel();
        let timeout = self.config.response_timeout;
        loop {
            if self.cancel.as_ref().map_or(false, CancelToken::is_cancelled) {
                recv.timed_out();
                return CancelledSnafu { channel }.fail();
            }
            let elapsed = self.clock.now().saturating_sub(start);
            if elapsed >= timeout {
                recv.timed_out();
                debug!("Timeout on channel {}", channel);
                return TimeoutSnafu { channel, timeout }.fail();
            }

            let byte = if self.bus.available().context(IoSnafu)? {
                self.bus.read().context(IoSnafu)?
            } else {
                None
            };
            let byte = match byte {
                Some(byte) => byte,
                None => {
                    self.idle(timeout - elapsed);
                    continue;
                }
            };

            recv = match recv.receive_data(&[byte]) {
                ReceiverResult::NeedData(recv) => recv,
                ReceiverResult::Done(_, response) => {
                    return response.map_err(|err| Error::from_response(err, channel));
                }
            };
        }
    }

    /// Wait for the next poll, never sleeping past the end of the receive window.
    fn idle(&mut self, remaining: Duration) {
        if self.config.poll_interval > Duration::from_millis(0) {
            self.clock.delay(self.config.poll_interval.min(remaining));
        } else {
            std::hint::spin_loop();
        }
    }
}
