/// Base64 helpers shared by the wire layers and by serde fields that
/// transport binary data as text.
pub mod base64 {
    use ::base64::engine::general_purpose::STANDARD;
    use ::base64::Engine;
    use serde::{de, Deserialize, Deserializer, Serializer};

    #[inline]
    pub fn encode(data: &[u8]) -> String {
        STANDARD.encode(data)
    }

    #[inline]
    pub fn decode(text: &str) -> Result<Vec<u8>, ::base64::DecodeError> {
        STANDARD.decode(text)
    }

    /// Serde helper serializing bytes as base64 text.
    pub fn serialize<S, T>(data: T, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
        T: AsRef<[u8]>,
    {
        serializer.serialize_str(&encode(data.as_ref()))
    }

    /// Serde helper deserializing base64 text into a byte vector.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let text = <&str>::deserialize(deserializer)?;
        decode(text).map_err(de::Error::custom)
    }
}
