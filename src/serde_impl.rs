use core::fmt;
use core::marker::PhantomData;
use core::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer, de};

use crate::native::{LsaName, SourceTag};

impl Serialize for LsaName {
    #[inline]
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl Serialize for SourceTag {
    #[inline]
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(self)
    }
}

// Names are validated while deserializing, so a bad config never reaches the LSA.
fn deserialize_checked_str<'de, D, T>(deserializer: D, expecting: &'static str) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: FromStr,
    <T as FromStr>::Err: fmt::Display,
{
    struct Visitor<T> {
        expecting: &'static str,
        _marker: PhantomData<T>,
    }

    impl<T> de::Visitor<'_> for Visitor<T>
    where
        T: FromStr,
        <T as FromStr>::Err: fmt::Display,
    {
        type Value = T;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str(self.expecting)
        }

        fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            T::from_str(v).map_err(E::custom)
        }
    }

    deserializer.deserialize_str(Visitor {
        expecting,
        _marker: PhantomData,
    })
}

impl<'de> Deserialize<'de> for LsaName {
    #[inline]
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserialize_checked_str(deserializer, "an ASCII name without NUL")
    }
}

impl<'de> Deserialize<'de> for SourceTag {
    #[inline]
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserialize_checked_str(deserializer, "1 to 8 printable ASCII characters")
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, reason = "Unwrap is not an issue in test")]
mod tests {
    use serde_test::{Token, assert_de_tokens_error, assert_tokens};

    use super::*;

    #[test]
    fn names_are_plain_strings() {
        assert_tokens(&LsaName::new("Negotiate").unwrap(), &[Token::Str("Negotiate")]);
        assert_tokens(&SourceTag::new("ADFS").unwrap(), &[Token::Str("ADFS")]);
    }

    #[test]
    fn invalid_names_are_rejected() {
        assert_de_tokens_error::<SourceTag>(
            &[Token::Str("TooLongTag")],
            "Token source name must be 1 to 8 bytes, got 10",
        );
        assert_de_tokens_error::<LsaName>(
            &[Token::Str("Nego\0tiate")],
            "NUL in LSA name at index 4",
        );
    }
}
