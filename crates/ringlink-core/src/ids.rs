//! Opaque 128-bit identifiers rendered as 32 lowercase hex characters.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Deserializer, Serialize, Serializer};

macro_rules! hex_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(u128);

        impl $name {
            /// Wrap a raw value.
            pub const fn from_u128(value: u128) -> Self {
                Self(value)
            }

            /// Raw value.
            pub const fn as_u128(self) -> u128 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{:032x}", self.0)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({:032x})", stringify!($name), self.0)
            }
        }

        impl FromStr for $name {
            type Err = std::num::ParseIntError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                u128::from_str_radix(s, 16).map(Self)
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.collect_str(self)
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let text = String::deserialize(deserializer)?;
                text.parse().map_err(serde::de::Error::custom)
            }
        }
    };
}

hex_id!(
    /// Registry handle for a `NoiseManager`.
    ManagerId
);

hex_id!(
    /// Identifier of one Noise session within its manager.
    SessionId
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_is_fixed_width_hex() {
        assert_eq!(ManagerId::from_u128(0x1f).to_string(), format!("{}1f", "0".repeat(30)));
        assert_eq!(SessionId::from_u128(u128::MAX).to_string(), "f".repeat(32));
    }

    #[test]
    fn parse_roundtrip() {
        let id = SessionId::from_u128(0xDEAD_BEEF_0123);
        assert_eq!(id.to_string().parse::<SessionId>().unwrap(), id);
        assert!("not hex".parse::<ManagerId>().is_err());
    }
}
