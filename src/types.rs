//! This module defines the range-checked [`Channel`] type, identifying the
//! measurement requested from the sensor node, and the catalogue of
//! built-in channels.

use snafu::{ensure, OptionExt, Snafu};

use core::convert::TryInto;
use core::fmt;
use core::ops::Deref;

/// Error type for this module
#[derive(Debug, Snafu, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    /// The value isn't a valid channel code.
    #[snafu(display("Invalid channel code"))]
    InvalidChannel,
}

const fn invalid_channel() -> InvalidChannelSnafu {
    InvalidChannelSnafu
}

const fn is_valid_code(code: u8) -> bool {
    (code.is_ascii_graphic() || code == b' ') && code != b':'
}

/// Channel is a single printable ASCII character selecting the measurement
/// a query asks for. The colon is reserved as the value separator and can't
/// be used as a channel code.
///
/// ## Example
/// ```
/// use weatherbus_proto::Channel;
/// let wind = Channel::new('W').unwrap();
/// assert_eq!(wind, Channel::WIND_SPEED);
/// assert!(Channel::new(':').is_err());
/// ```
#[derive(PartialEq, Eq, PartialOrd, Ord, Copy, Clone, Hash)]
#[repr(transparent)]
pub struct Channel(u8);

/// Create a new [`Channel`], panics if the code isn't valid.
pub const fn ch(code: u8) -> Channel {
    if is_valid_code(code) {
        return Channel(code);
    }
    panic!("Invalid channel code.")
}

impl Channel {
    /// Air temperature, °C.
    pub const TEMPERATURE: Self = Self(b'T');
    /// Relative humidity, %.
    pub const HUMIDITY: Self = Self(b'H');
    /// Barometric pressure, hPa.
    pub const PRESSURE: Self = Self(b'P');
    /// Air quality index.
    pub const AIR_QUALITY: Self = Self(b'A');
    /// UV index.
    pub const UV: Self = Self(b'U');
    /// Rainfall in mm, accumulated since the channel was last queried.
    pub const RAINFALL: Self = Self(b'R');
    /// Wind speed, m/s.
    pub const WIND_SPEED: Self = Self(b'W');
    /// Wind direction, degrees.
    pub const WIND_DIRECTION: Self = Self(b'D');
    /// Canopy temperature, °C.
    pub const CANOPY_TEMPERATURE: Self = Self(b'C');

    /// Create a new channel, checking that the code is a printable ASCII
    /// character other than `:`.
    /// # Errors
    /// Returns [`Error::InvalidChannel`] if `code` isn't a valid channel code.
    pub fn new(code: impl TryInto<u8>) -> Result<Self, Error> {
        let code = code.try_into().ok().with_context(invalid_channel)?;
        ensure!(is_valid_code(code), invalid_channel());
        Ok(Self(code))
    }

    /// The on-wire byte of this channel.
    pub const fn as_byte(self) -> u8 {
        self.0
    }

    /// The channel code as a `char`.
    pub const fn as_char(self) -> char {
        self.0 as char
    }

    /// The built-in quantity measured on this channel, `None` for custom channels.
    pub fn quantity(self) -> Option<Quantity> {
        Quantity::ALL.iter().copied().find(|q| q.channel() == self)
    }
}

impl Deref for Channel {
    type Target = u8;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl PartialEq<u8> for Channel {
    fn eq(&self, other: &u8) -> bool {
        self.0 == *other
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Channel({:?})", self.as_char())
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_char())
    }
}

/// Trait to convert `T: TryInto<u8>` into a [`Channel`].
pub trait IntoChannel {
    /// Convert self to a Channel.
    /// # Errors
    /// Returns [`Error::InvalidChannel`] if self isn't a valid channel code.
    fn into_channel(self) -> Result<Channel, Error>;
}

impl IntoChannel for Channel {
    fn into_channel(self) -> Result<Channel, Error> {
        Ok(self)
    }
}

impl<T> IntoChannel for T
where
    T: TryInto<u8>,
{
    fn into_channel(self) -> Result<Channel, Error> {
        Channel::new(self)
    }
}

/// The measurements a standard sensor node provides. Units are a
/// convention between master and node, they never travel on the bus.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Quantity {
    /// Air temperature, °C.
    Temperature,
    /// Relative humidity, %.
    Humidity,
    /// Barometric pressure, hPa.
    Pressure,
    /// Air quality index.
    AirQuality,
    /// UV index.
    Uv,
    /// Rainfall since the last rainfall query, mm.
    Rainfall,
    /// Wind speed, m/s.
    WindSpeed,
    /// Wind direction, degrees.
    WindDirection,
    /// Canopy temperature, °C.
    CanopyTemperature,
}

impl Quantity {
    /// Every built-in quantity, in channel table order.
    pub const ALL: [Quantity; 9] = [
        Quantity::Temperature,
        Quantity::Humidity,
        Quantity::Pressure,
        Quantity::AirQuality,
        Quantity::Uv,
        Quantity::Rainfall,
        Quantity::WindSpeed,
        Quantity::WindDirection,
        Quantity::CanopyTemperature,
    ];

    /// The channel this quantity is queried on.
    pub const fn channel(self) -> Channel {
        match self {
            Quantity::Temperature => Channel::TEMPERATURE,
            Quantity::Humidity => Channel::HUMIDITY,
            Quantity::Pressure => Channel::PRESSURE,
            Quantity::AirQuality => Channel::AIR_QUALITY,
            Quantity::Uv => Channel::UV,
            Quantity::Rainfall => Channel::RAINFALL,
            Quantity::WindSpeed => Channel::WIND_SPEED,
            Quantity::WindDirection => Channel::WIND_DIRECTION,
            Quantity::CanopyTemperature => Channel::CANOPY_TEMPERATURE,
        }
    }

    /// Unit of the reported value.
    pub const fn unit(self) -> &'static str {
        match self {
            Quantity::Temperature | Quantity::CanopyTemperature => "°C",
            Quantity::Humidity => "%",
            Quantity::Pressure => "hPa",
            Quantity::AirQuality => "AQI",
            Quantity::Uv => "UV index",
            Quantity::Rainfall => "mm",
            Quantity::WindSpeed => "m/s",
            Quantity::WindDirection => "°",
        }
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Quantity::Temperature => "temperature",
            Quantity::Humidity => "humidity",
            Quantity::Pressure => "pressure",
            Quantity::AirQuality => "air quality",
            Quantity::Uv => "UV",
            Quantity::Rainfall => "rainfall",
            Quantity::WindSpeed => "wind speed",
            Quantity::WindDirection => "wind direction",
            Quantity::CanopyTemperature => "canopy temperature",
        };
        f.write_str(name)
    }
}
