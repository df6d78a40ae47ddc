//! Macros shared by the hierarchical ID types.

/// Implements `FromStr`, `Serialize` and `Deserialize` for an ID type in
/// terms of its `parse` function and `Display` implementation.
///
/// # Example
///
/// ```ignore
/// impl_string_id!(LeaseId);
///
/// let parsed: LeaseId = "akash1owner/42/1/3/akash1provider".parse()?;
/// ```
#[macro_export]
macro_rules! impl_string_id {
    ($name:ident) => {
        impl std::str::FromStr for $name {
            type Err = $crate::IdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::parse(s)
            }
        }

        impl serde::Serialize for $name {
            fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
            where
                S: serde::Serializer,
            {
                serializer.collect_str(self)
            }
        }

        impl<'de> serde::Deserialize<'de> for $name {
            fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
            where
                D: serde::Deserializer<'de>,
            {
                let s = String::deserialize(deserializer)?;
                Self::parse(&s).map_err(serde::de::Error::custom)
            }
        }
    };
}
