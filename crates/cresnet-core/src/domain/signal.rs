//! Signal classes and the typed values they carry.
//!
//! Every point of I/O on a control processor is a *signal* addressed by a
//! [`SignalClass`] and a non-negative numeric id.  The class fixes the value
//! type for the lifetime of the signal:
//!
//! | Class     | Value type | Wire element | Wire text          |
//! |-----------|------------|--------------|--------------------|
//! | Digital   | `bool`     | `<bool>`     | `true` / `false`   |
//! | Analog    | `i32`      | `<i32>`      | decimal integer    |
//! | Serial    | `String`   | `<string>`   | raw UTF-8 text     |

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Errors raised while interpreting a signal class or value.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SignalError {
    /// The class name is not one of `digital`, `analog`, `serial`.
    #[error("invalid signal class: {0:?}")]
    InvalidClass(String),

    /// The text cannot be represented as a value of the given class.
    #[error("invalid {class} value: {raw:?}")]
    InvalidValue { class: SignalClass, raw: String },
}

/// The three signal classes published by a control processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SignalClass {
    Digital,
    Analog,
    Serial,
}

impl SignalClass {
    /// All classes, in the order used for snapshots.
    pub const ALL: [SignalClass; 3] = [SignalClass::Digital, SignalClass::Analog, SignalClass::Serial];

    /// Lowercase class name used in logs and by callers.
    pub fn as_str(self) -> &'static str {
        match self {
            SignalClass::Digital => "digital",
            SignalClass::Analog => "analog",
            SignalClass::Serial => "serial",
        }
    }

    /// Name of the XML element that carries this class on the wire.
    pub fn wire_element(self) -> &'static str {
        match self {
            SignalClass::Digital => "bool",
            SignalClass::Analog => "i32",
            SignalClass::Serial => "string",
        }
    }

    /// Maps a wire element name back to its class.
    pub fn from_wire_element(name: &str) -> Option<Self> {
        match name {
            "bool" => Some(SignalClass::Digital),
            "i32" => Some(SignalClass::Analog),
            "string" => Some(SignalClass::Serial),
            _ => None,
        }
    }
}

impl fmt::Display for SignalClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SignalClass {
    type Err = SignalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "digital" => Ok(SignalClass::Digital),
            "analog" => Ok(SignalClass::Analog),
            "serial" => Ok(SignalClass::Serial),
            _ => Err(SignalError::InvalidClass(s.to_string())),
        }
    }
}

/// A typed signal value.  The variant always matches the signal's class.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SignalValue {
    Digital(bool),
    Analog(i32),
    Serial(String),
}

impl SignalValue {
    /// Returns the class this value belongs to.
    pub fn class(&self) -> SignalClass {
        match self {
            SignalValue::Digital(_) => SignalClass::Digital,
            SignalValue::Analog(_) => SignalClass::Analog,
            SignalValue::Serial(_) => SignalClass::Serial,
        }
    }

    /// Parses wire or caller text as a value of `class`.
    ///
    /// Digital accepts `true`, `false`, `1` and `0` (case-insensitive);
    /// analog accepts a decimal `i32`; serial accepts any text verbatim.
    ///
    /// # Errors
    ///
    /// Returns [`SignalError::InvalidValue`] when the text does not fit the class.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use cresnet_core::{SignalClass, SignalValue};
    ///
    /// let v = SignalValue::parse(SignalClass::Analog, "-12").unwrap();
    /// assert_eq!(v, SignalValue::Analog(-12));
    /// ```
    pub fn parse(class: SignalClass, raw: &str) -> Result<Self, SignalError> {
        let invalid = || SignalError::InvalidValue {
            class,
            raw: raw.to_string(),
        };
        match class {
            SignalClass::Digital => match raw.trim().to_ascii_lowercase().as_str() {
                "true" | "1" => Ok(SignalValue::Digital(true)),
                "false" | "0" => Ok(SignalValue::Digital(false)),
                _ => Err(invalid()),
            },
            SignalClass::Analog => raw
                .trim()
                .parse::<i32>()
                .map(SignalValue::Analog)
                .map_err(|_| invalid()),
            SignalClass::Serial => Ok(SignalValue::Serial(raw.to_string())),
        }
    }

    /// Text placed in the `value` attribute of an outbound write (unescaped).
    pub fn wire_text(&self) -> String {
        match self {
            SignalValue::Digital(b) => b.to_string(),
            SignalValue::Analog(n) => n.to_string(),
            SignalValue::Serial(s) => s.clone(),
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            SignalValue::Digital(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i32(&self) -> Option<i32> {
        match self {
            SignalValue::Analog(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            SignalValue::Serial(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for SignalValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignalValue::Digital(b) => write!(f, "{b}"),
            SignalValue::Analog(n) => write!(f, "{n}"),
            SignalValue::Serial(s) => f.write_str(s),
        }
    }
}

impl From<bool> for SignalValue {
    fn from(value: bool) -> Self {
        SignalValue::Digital(value)
    }
}

impl From<i32> for SignalValue {
    fn from(value: i32) -> Self {
        SignalValue::Analog(value)
    }
}

impl From<String> for SignalValue {
    fn from(value: String) -> Self {
        SignalValue::Serial(value)
    }
}

impl From<&str> for SignalValue {
    fn from(value: &str) -> Self {
        SignalValue::Serial(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_class_from_str_is_case_insensitive() {
        assert_eq!("Digital".parse::<SignalClass>(), Ok(SignalClass::Digital));
        assert_eq!(" analog ".parse::<SignalClass>(), Ok(SignalClass::Analog));
        assert_eq!("SERIAL".parse::<SignalClass>(), Ok(SignalClass::Serial));
    }

    #[test]
    fn test_class_from_str_rejects_unknown_name() {
        // Arrange / Act
        let result = "button".parse::<SignalClass>();

        // Assert
        assert_eq!(result, Err(SignalError::InvalidClass("button".to_string())));
    }

    #[test]
    fn test_wire_element_maps_back_to_class() {
        for class in SignalClass::ALL {
            assert_eq!(SignalClass::from_wire_element(class.wire_element()), Some(class));
        }
        assert_eq!(SignalClass::from_wire_element("u16"), None);
    }

    #[test]
    fn test_parse_digital_accepts_boolean_and_numeric_forms() {
        assert_eq!(SignalValue::parse(SignalClass::Digital, "true"), Ok(SignalValue::Digital(true)));
        assert_eq!(SignalValue::parse(SignalClass::Digital, "FALSE"), Ok(SignalValue::Digital(false)));
        assert_eq!(SignalValue::parse(SignalClass::Digital, "1"), Ok(SignalValue::Digital(true)));
        assert_eq!(SignalValue::parse(SignalClass::Digital, "0"), Ok(SignalValue::Digital(false)));
    }

    #[test]
    fn test_parse_digital_rejects_other_text() {
        let result = SignalValue::parse(SignalClass::Digital, "on");
        assert!(matches!(result, Err(SignalError::InvalidValue { class: SignalClass::Digital, .. })));
    }

    #[test]
    fn test_parse_analog_rejects_out_of_range() {
        // 2^31 does not fit in an i32
        let result = SignalValue::parse(SignalClass::Analog, "2147483648");
        assert!(result.is_err());
    }

    #[test]
    fn test_parse_serial_keeps_text_verbatim() {
        let v = SignalValue::parse(SignalClass::Serial, "  Living Room <1> ").unwrap();
        assert_eq!(v.as_str(), Some("  Living Room <1> "));
    }

    #[test]
    fn test_wire_text_uses_lowercase_booleans() {
        assert_eq!(SignalValue::Digital(true).wire_text(), "true");
        assert_eq!(SignalValue::Digital(false).wire_text(), "false");
        assert_eq!(SignalValue::Analog(-40).wire_text(), "-40");
    }

    #[test]
    fn test_value_class_matches_variant() {
        assert_eq!(SignalValue::from(true).class(), SignalClass::Digital);
        assert_eq!(SignalValue::from(7).class(), SignalClass::Analog);
        assert_eq!(SignalValue::from("x").class(), SignalClass::Serial);
    }
}
