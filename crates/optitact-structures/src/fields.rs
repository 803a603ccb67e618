//! The per-frame typed key/value blackboard shared by all pipeline stages.

use ahash::AHashMap;
use ndarray::Array2;

use crate::data::ImageFrame;
use crate::OptitactDataError;

/// Macro to define the FieldValue enum with conversions for each variant
macro_rules! define_field_value_enum {
    ( $( $enum_type:ident : $data_type:ty => $friendly_name:expr),+ $(,)? ) => {
        /// A single typed value stored in a [`FieldStore`]. Stages pass all
        /// inter-stage data through these variants.
        #[derive(Debug, Clone, PartialEq)]
        pub enum FieldValue
        {
            $( $enum_type($data_type), )*
        }

        impl std::fmt::Display for FieldValue {
            fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
                match self {
                    $( FieldValue::$enum_type(_) => write!(f, concat!("FieldValue(", $friendly_name, ")")), )*
                }
            }
        }

        $(
        impl From<$data_type> for FieldValue {
            fn from(value: $data_type) -> Self { FieldValue::$enum_type(value) }
        }

        impl TryFrom<FieldValue> for $data_type {
            type Error = OptitactDataError;

            fn try_from(value: FieldValue) -> Result<Self, Self::Error> {
                match value {
                    FieldValue::$enum_type(data) => Ok(data),
                    other => Err(OptitactDataError::BadParameters(format!("Expected a {} but found {}!", $friendly_name, other))),
                }
            }
        }

        impl<'a> TryFrom<&'a FieldValue> for &'a $data_type {
            type Error = OptitactDataError;

            fn try_from(value: &'a FieldValue) -> Result<Self, Self::Error> {
                match value {
                    FieldValue::$enum_type(data) => Ok(data),
                    other => Err(OptitactDataError::BadParameters(format!("Expected a {} but found {}!", $friendly_name, other))),
                }
            }
        }
        )*
    }
}

define_field_value_enum!(
    Matrix: Array2<f64> => "Matrix",
    Scalar: f64 => "Scalar",
    Text: String => "Text",
    Image: ImageFrame => "Image",
);

/// Per-frame key/value store. Keys are stable for the pipeline's lifetime;
/// each stage reads its declared inputs and writes its declared outputs here.
/// Once a frame completes the store is never mutated again.
#[derive(Debug, Clone, Default)]
pub struct FieldStore {
    fields: AHashMap<String, FieldValue>,
}

impl FieldStore {
    pub fn new() -> Self {
        FieldStore { fields: AHashMap::new() }
    }

    pub fn insert(&mut self, key: &str, value: impl Into<FieldValue>) {
        self.fields.insert(key.to_string(), value.into());
    }

    pub fn contains(&self, key: &str) -> bool {
        self.fields.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    pub fn get(&self, key: &str) -> Result<&FieldValue, OptitactDataError> {
        self.fields.get(key).ok_or_else(|| {
            OptitactDataError::FieldContract(format!("Field '{}' was never published!", key))
        })
    }

    pub fn get_matrix(&self, key: &str) -> Result<&Array2<f64>, OptitactDataError> {
        self.get(key)?.try_into()
    }

    pub fn get_scalar(&self, key: &str) -> Result<f64, OptitactDataError> {
        let value: &f64 = self.get(key)?.try_into()?;
        Ok(*value)
    }

    pub fn get_image(&self, key: &str) -> Result<&ImageFrame, OptitactDataError> {
        self.get(key)?.try_into()
    }

    /// Copies the named fields from another store, used when a discarded frame
    /// republishes the previous frame's values unchanged.
    pub fn copy_fields_from(&mut self, source: &FieldStore, keys: &[&str]) -> Result<(), OptitactDataError> {
        for key in keys {
            let value = source.get(key)?;
            self.fields.insert((*key).to_string(), value.clone());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    #[test]
    fn typed_getters_enforce_variant() {
        let mut store = FieldStore::new();
        store.insert("progress", 0.5);
        store.insert("positions", Array2::<f64>::zeros((4, 2)));

        assert_eq!(store.get_scalar("progress").unwrap(), 0.5);
        assert_eq!(store.get_matrix("positions").unwrap().nrows(), 4);
        assert!(store.get_matrix("progress").is_err());
        assert!(store.get_scalar("missing").is_err());
    }

    #[test]
    fn copy_fields_from_replicates_values() {
        let mut source = FieldStore::new();
        source.insert("a", 1.0);
        source.insert("b", Array2::<f64>::ones((2, 3)));

        let mut dest = FieldStore::new();
        dest.copy_fields_from(&source, &["a", "b"]).unwrap();
        assert_eq!(dest.get_scalar("a").unwrap(), 1.0);
        assert_eq!(dest.get_matrix("b").unwrap(), source.get_matrix("b").unwrap());

        assert!(dest.copy_fields_from(&source, &["missing"]).is_err());
    }
}
