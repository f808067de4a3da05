//! CometBFT encodes 64-bit integers as JSON strings. These helpers accept either form.

use serde::{Deserialize, Deserializer, de::Error};

#[derive(Deserialize)]
#[serde(untagged)]
enum StrOrNum<T> {
    Str(String),
    Num(T),
}

pub(crate) fn u64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
    match StrOrNum::<u64>::deserialize(deserializer)? {
        StrOrNum::Str(s) => s.parse().map_err(D::Error::custom),
        StrOrNum::Num(n) => Ok(n),
    }
}

pub(crate) fn i64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
    match StrOrNum::<i64>::deserialize(deserializer)? {
        StrOrNum::Str(s) => s.parse().map_err(D::Error::custom),
        StrOrNum::Num(n) => Ok(n),
    }
}
