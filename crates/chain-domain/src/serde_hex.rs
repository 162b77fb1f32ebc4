// serde_hex.rs
// Serializa bytes como texto hexadecimal para que el grafo persistido sea legible.
use serde::{Deserialize, Deserializer, Serializer};

pub fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
  where S: Serializer
{
  serializer.serialize_str(&hex::encode(bytes))
}

pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
  where D: Deserializer<'de>
{
  let s = String::deserialize(deserializer)?;
  hex::decode(&s).map_err(serde::de::Error::custom)
}
