//! Custom converters for native types the codec does not know

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tablemap_core::{AttributeValue, BoxError};

type EncodeFn = Arc<dyn Fn(&dyn Any) -> Result<AttributeValue, BoxError> + Send + Sync>;
type DecodeFn = Arc<dyn Fn(&AttributeValue) -> Result<Box<dyn Any + Send>, BoxError> + Send + Sync>;

#[derive(Clone)]
pub(crate) struct Converter {
    pub(crate) type_name: &'static str,
    pub(crate) encode: EncodeFn,
    pub(crate) decode: DecodeFn,
}

/// Frozen set of custom converters, keyed by native type.
///
/// Built once with [`ConverterRegistry::builder`] and shared by every codec
/// and schema it is bound to. Cloning is cheap.
#[derive(Clone, Default)]
pub struct ConverterRegistry {
    converters: Arc<HashMap<TypeId, Converter>>,
}

impl ConverterRegistry {
    pub fn builder() -> ConverterRegistryBuilder {
        ConverterRegistryBuilder::default()
    }

    pub fn contains<T: 'static>(&self) -> bool {
        self.converters.contains_key(&TypeId::of::<T>())
    }

    pub fn len(&self) -> usize {
        self.converters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.converters.is_empty()
    }

    pub(crate) fn get<T: 'static>(&self) -> Option<&Converter> {
        self.converters.get(&TypeId::of::<T>())
    }
}

impl fmt::Debug for ConverterRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.converters.values().map(|c| c.type_name))
            .finish()
    }
}

#[derive(Default)]
pub struct ConverterRegistryBuilder {
    converters: HashMap<TypeId, Converter>,
}

impl ConverterRegistryBuilder {
    /// Register the wire conversion for `T`, replacing any earlier one
    pub fn register<T, E, D>(mut self, encode: E, decode: D) -> Self
    where
        T: Send + Sync + 'static,
        E: Fn(&T) -> Result<AttributeValue, BoxError> + Send + Sync + 'static,
        D: Fn(&AttributeValue) -> Result<T, BoxError> + Send + Sync + 'static,
    {
        let type_name = std::any::type_name::<T>();
        let converter = Converter {
            type_name,
            encode: Arc::new(move |value: &dyn Any| match value.downcast_ref::<T>() {
                Some(value) => encode(value),
                None => Err(format!("converter for {type_name} received another type").into()),
            }),
            decode: Arc::new(move |value: &AttributeValue| {
                decode(value).map(|v| Box::new(v) as Box<dyn Any + Send>)
            }),
        };
        self.converters.insert(TypeId::of::<T>(), converter);
        self
    }

    pub fn build(self) -> ConverterRegistry {
        ConverterRegistry {
            converters: Arc::new(self.converters),
        }
    }
}
