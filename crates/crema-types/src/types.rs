//! Core types for scale data.

use core::fmt;
use core::str::FromStr;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::ParseError;

/// Link status of a scale as seen by the host.
///
/// Ordered by lifecycle progress, so `connectivity >= Connectivity::Connected`
/// reads as "the link is up".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "SCREAMING_SNAKE_CASE"))]
#[repr(u8)]
pub enum Connectivity {
    /// No link.
    #[default]
    NotConnected = 0,
    /// Link is being established.
    Connecting = 1,
    /// Link is being torn down.
    Disconnecting = 2,
    /// Link is up, notifications not yet flowing.
    Connected = 3,
    /// Link is up and weight notifications are enabled.
    Ready = 4,
}

impl Connectivity {
    /// Whether the link is up (`Connected` or `Ready`).
    #[must_use]
    pub fn is_connected(self) -> bool {
        matches!(self, Connectivity::Connected | Connectivity::Ready)
    }
}

impl TryFrom<u8> for Connectivity {
    type Error = ParseError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Connectivity::NotConnected),
            1 => Ok(Connectivity::Connecting),
            2 => Ok(Connectivity::Disconnecting),
            3 => Ok(Connectivity::Connected),
            4 => Ok(Connectivity::Ready),
            other => Err(ParseError::UnknownConnectivity(other)),
        }
    }
}

impl fmt::Display for Connectivity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Connectivity::NotConnected => "NOT_CONNECTED",
            Connectivity::Connecting => "CONNECTING",
            Connectivity::Disconnecting => "DISCONNECTING",
            Connectivity::Connected => "CONNECTED",
            Connectivity::Ready => "READY",
        };
        f.write_str(label)
    }
}

/// Model of a supported scale.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new scale models
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[non_exhaustive]
pub enum ScaleType {
    /// Atomax Skale II.
    AtomaxSkaleII,
    /// Decent Scale.
    DecentScale,
}

impl ScaleType {
    /// Every supported scale type.
    pub const ALL: [ScaleType; 2] = [ScaleType::AtomaxSkaleII, ScaleType::DecentScale];

    /// Advertised-name prefix that identifies this scale type.
    #[must_use]
    pub fn name_prefix(self) -> &'static str {
        match self {
            ScaleType::AtomaxSkaleII => "Skale",
            ScaleType::DecentScale => "Decent Scale",
        }
    }

    /// Advertised-name prefixes of every recognized scale.
    #[must_use]
    pub fn recognized_prefixes() -> Vec<&'static str> {
        Self::ALL.iter().map(|t| t.name_prefix()).collect()
    }

    /// Detect the scale type from an advertised BLE name.
    ///
    /// # Examples
    ///
    /// ```
    /// use crema_types::ScaleType;
    ///
    /// assert_eq!(ScaleType::from_name("Skale 01A2"), Some(ScaleType::AtomaxSkaleII));
    /// assert_eq!(ScaleType::from_name("Decent Scale"), Some(ScaleType::DecentScale));
    /// assert_eq!(ScaleType::from_name("Toaster 12345"), None);
    /// ```
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|t| name.starts_with(t.name_prefix()))
    }
}

impl fmt::Display for ScaleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScaleType::AtomaxSkaleII => write!(f, "AtomaxSkaleII"),
            ScaleType::DecentScale => write!(f, "DecentScale"),
        }
    }
}

impl FromStr for ScaleType {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace([' ', '_', '-'], "").as_str() {
            "atomaxskaleii" | "skaleii" | "skale" => Ok(ScaleType::AtomaxSkaleII),
            "decentscale" | "decent" => Ok(ScaleType::DecentScale),
            _ => Err(ParseError::UnknownScaleType(s.to_string())),
        }
    }
}

/// A single weight notification from a scale.
///
/// Times are seconds on the host clock; `scale_time` is the best estimate of
/// when the scale took the measurement, `arrival_time` when the host received it.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct WeightSample {
    /// Measurement time in seconds.
    pub scale_time: f64,
    /// Host receive time in seconds.
    pub arrival_time: f64,
    /// Weight in grams.
    pub weight: f64,
}

impl WeightSample {
    /// Create a sample whose measurement and arrival times coincide.
    #[must_use]
    pub fn new(time: f64, weight: f64) -> Self {
        Self {
            scale_time: time,
            arrival_time: time,
            weight,
        }
    }
}

/// Marker that the scale's zero reference moved.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TareEvent {
    /// Time the scale reported the tare, in seconds.
    pub scale_time: f64,
    /// Host receive time in seconds.
    pub arrival_time: f64,
}

/// One smoothed `(value, time)` pair produced by an estimator.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Estimate {
    /// Estimated value (grams or grams per second).
    pub value: f64,
    /// Time the estimate refers to, in seconds.
    pub time: f64,
}

impl Estimate {
    /// Create an estimate.
    #[must_use]
    pub fn new(value: f64, time: f64) -> Self {
        Self { value, time }
    }
}

/// Derived weight-and-flow event published after every weight sample.
///
/// This is the data contract with the brewing control loop and API layer.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct WeightAndFlowUpdate {
    /// Arrival time of the triggering sample.
    pub arrival_time: f64,
    /// Scale time of the triggering sample.
    pub scale_time: f64,
    /// Most recent weight, grams.
    pub current_weight: f64,
    pub current_weight_time: f64,
    /// Windowed mass flow, grams per second.
    pub average_flow: f64,
    pub average_flow_time: f64,
    /// Windowed median weight, grams.
    pub median_weight: f64,
    pub median_weight_time: f64,
    /// Median of sub-window flows, grams per second.
    pub median_flow: f64,
    pub median_flow_time: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connectivity_default_is_not_connected() {
        assert_eq!(Connectivity::default(), Connectivity::NotConnected);
        assert!(!Connectivity::NotConnected.is_connected());
        assert!(!Connectivity::Connecting.is_connected());
        assert!(Connectivity::Connected.is_connected());
        assert!(Connectivity::Ready.is_connected());
    }

    #[test]
    fn test_connectivity_u8_conversion() {
        for c in [
            Connectivity::NotConnected,
            Connectivity::Connecting,
            Connectivity::Disconnecting,
            Connectivity::Connected,
            Connectivity::Ready,
        ] {
            assert_eq!(Connectivity::try_from(c as u8), Ok(c));
        }
        assert_eq!(
            Connectivity::try_from(9),
            Err(ParseError::UnknownConnectivity(9))
        );
    }

    #[test]
    fn test_connectivity_display() {
        assert_eq!(Connectivity::NotConnected.to_string(), "NOT_CONNECTED");
        assert_eq!(Connectivity::Ready.to_string(), "READY");
    }

    #[test]
    fn test_scale_type_from_name() {
        assert_eq!(ScaleType::from_name("Skale"), Some(ScaleType::AtomaxSkaleII));
        assert_eq!(
            ScaleType::from_name("Decent Scale 1234"),
            Some(ScaleType::DecentScale)
        );
        // Prefix match only
        assert_eq!(ScaleType::from_name("My Skale"), None);
        assert_eq!(ScaleType::from_name(""), None);
    }

    #[test]
    fn test_recognized_prefixes() {
        let prefixes = ScaleType::recognized_prefixes();
        assert_eq!(prefixes, vec!["Skale", "Decent Scale"]);
    }

    #[test]
    fn test_scale_type_from_str() {
        assert_eq!("Decent Scale".parse(), Ok(ScaleType::DecentScale));
        assert_eq!("atomax_skale_ii".parse(), Ok(ScaleType::AtomaxSkaleII));
        assert!("acaia".parse::<ScaleType>().is_err());
    }

    #[test]
    fn test_scale_type_display_round_trips() {
        for t in ScaleType::ALL {
            assert_eq!(t.to_string().parse::<ScaleType>(), Ok(t));
        }
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_weight_and_flow_update_serializes_every_field() {
        let update = WeightAndFlowUpdate {
            arrival_time: 1.5,
            scale_time: 1.25,
            current_weight: 20.0,
            current_weight_time: 1.25,
            ..Default::default()
        };
        let json = serde_json::to_value(update).unwrap();
        for key in [
            "arrival_time",
            "scale_time",
            "current_weight",
            "current_weight_time",
            "average_flow",
            "average_flow_time",
            "median_weight",
            "median_weight_time",
            "median_flow",
            "median_flow_time",
        ] {
            assert!(json.get(key).is_some(), "missing {key}");
        }
        assert_eq!(json["current_weight"], 20.0);
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_connectivity_serializes_screaming_case() {
        let json = serde_json::to_string(&Connectivity::NotConnected).unwrap();
        assert_eq!(json, "\"NOT_CONNECTED\"");
    }
}
