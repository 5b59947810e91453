use serde::{Deserialize, Serialize, Serializer};
use std::fmt;

/// Personal data (NIC numbers, email addresses) that must never reach the logs.
///
/// `Debug` and `Display` print a fixed mask so `tracing::info!("{:?}", commuter)`
/// is safe. Serialization passes the real value through because API responses
/// and outgoing emails need it.
#[derive(Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct Masked<T>(pub T);

impl<T> Masked<T> {
    pub fn new(value: T) -> Self {
        Self(value)
    }

    pub fn expose(&self) -> &T {
        &self.0
    }

    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T> fmt::Debug for Masked<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("********")
    }
}

impl<T> fmt::Display for Masked<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("********")
    }
}

impl<T: Serialize> Serialize for Masked<T> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.0.serialize(serializer)
    }
}

impl From<String> for Masked<String> {
    fn from(value: String) -> Self {
        Self(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_hides_value() {
        let nic = Masked::new("200012345678".to_string());
        assert_eq!(format!("{:?}", nic), "********");
        assert_eq!(format!("{}", nic), "********");
    }

    #[test]
    fn test_serialize_passes_value_through() {
        let email = Masked::new("rider@example.com".to_string());
        assert_eq!(serde_json::to_string(&email).unwrap(), "\"rider@example.com\"");
        let back: Masked<String> = serde_json::from_str("\"a@b.c\"").unwrap();
        assert_eq!(back.expose(), "a@b.c");
    }
}
