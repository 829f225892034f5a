//! Macros for defining typed key types.

/// Macro to define a typed, string-backed key.
///
/// This generates a newtype wrapper around `Arc<str>` with:
/// - A `KIND` constant used in error messages
/// - `new()` for unchecked construction from external input
/// - `parse()` for validated construction
/// - `Display`, `FromStr`, `From<&str>` and `From<String>` implementations
/// - `Serialize` and `Deserialize` implementations (validated on the way in)
/// - `Ord`, `Hash`, and other standard traits
///
/// The bracketed list names characters that are rejected by `parse()` in
/// addition to whitespace and control characters.
///
/// # Example
///
/// ```ignore
/// define_key!(DeviceId, "device id", []);
/// define_key!(TenantId, "tenant id", ['/']);
///
/// let device = DeviceId::parse("openflow:1")?;
/// ```
#[macro_export]
macro_rules! define_key {
    ($name:ident, $kind:literal, [$($forbidden:literal),*]) => {
        /// A typed key for this identifier kind.
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(std::sync::Arc<str>);

        impl $name {
            /// Human-readable name of this identifier kind.
            pub const KIND: &'static str = $kind;

            /// Wraps a raw value without validation.
            ///
            /// Empty values are allowed here; callers that must treat them
            /// specially check [`Self::is_empty`].
            #[must_use]
            pub fn new(value: impl Into<std::sync::Arc<str>>) -> Self {
                Self(value.into())
            }

            /// Parses and validates a key.
            pub fn parse(s: &str) -> Result<Self, $crate::IdError> {
                if s.is_empty() {
                    return Err($crate::IdError::Empty { kind: Self::KIND });
                }

                if let Some(ch) = s
                    .chars()
                    .find(|c| c.is_whitespace() || c.is_control() $(|| *c == $forbidden)*)
                {
                    return Err($crate::IdError::InvalidCharacter {
                        kind: Self::KIND,
                        ch,
                    });
                }

                Ok(Self(std::sync::Arc::from(s)))
            }

            /// Returns the key as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Returns true if the key carries no value.
            #[must_use]
            pub fn is_empty(&self) -> bool {
                self.0.is_empty()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = $crate::IdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::parse(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self::new(s)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self::new(s)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl std::borrow::Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }

        impl serde::Serialize for $name {
            fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
            where
                S: serde::Serializer,
            {
                serializer.serialize_str(&self.0)
            }
        }

        impl<'de> serde::Deserialize<'de> for $name {
            fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
            where
                D: serde::Deserializer<'de>,
            {
                let s = <String as serde::Deserialize>::deserialize(deserializer)?;
                Self::parse(&s).map_err(serde::de::Error::custom)
            }
        }
    };
}
