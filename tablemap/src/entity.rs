//! Explicit per-type mappings
//!
//! An [`Entity`] describes itself once through an [`EntityMapping`]: its
//! readable/writable properties, an optional zero-argument constructor and
//! any number of parameterized constructors. The hydrator picks a strategy
//! from this description; nothing is discovered at runtime.
//!
//! ```ignore
//! impl Entity for User {
//!     fn mapping() -> EntityMapping<Self> {
//!         EntityMapping::builder()
//!             .default_constructor(User::default)
//!             .property(Property::new("id", |u: &User| &u.id, |u, v| u.id = v).hash_key())
//!             .property(Property::new("name", |u: &User| &u.name, |u, v| u.name = v))
//!             .property(Property::nested("address", |u: &User| u.address.as_ref(), |u, v| u.address = Some(v)))
//!             .build()
//!     }
//! }
//! ```

use dashmap::DashMap;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tablemap_core::{AttributeValue, BoxError};

use crate::codec::{Codec, CodecError, WireCodec};
use crate::error::{MapperError, Result};
use crate::hydrate::{self, Strategy};

/// Nesting bound for hydrating and encoding object graphs
pub const MAX_DEPTH: usize = 32;

/// A type the mapper can store and hydrate
pub trait Entity: Sized + Send + Sync + 'static {
    fn mapping() -> EntityMapping<Self>;
}

/// State threaded through one conversion of an object graph
pub(crate) struct MapContext<'a> {
    pub(crate) codec: &'a Codec,
    pub(crate) mappings: &'a MappingCache,
    pub(crate) depth: usize,
}

impl<'a> MapContext<'a> {
    pub(crate) fn root(codec: &'a Codec, mappings: &'a MappingCache) -> Self {
        Self {
            codec,
            mappings,
            depth: 0,
        }
    }

    pub(crate) fn child(&self) -> Self {
        Self {
            codec: self.codec,
            mappings: self.mappings,
            depth: self.depth + 1,
        }
    }
}

/// Lazily built mappings of nested types, one per `TypeId`
#[derive(Default)]
pub(crate) struct MappingCache {
    mappings: DashMap<TypeId, Arc<dyn Any + Send + Sync>>,
}

impl MappingCache {
    pub(crate) fn get<N: Entity>(&self) -> Arc<EntityMapping<N>> {
        let id = TypeId::of::<N>();
        if let Some(existing) = self.mappings.get(&id) {
            if let Ok(mapping) = Arc::clone(existing.value()).downcast::<EntityMapping<N>>() {
                return mapping;
            }
        }

        let mapping = Arc::new(N::mapping());
        let erased: Arc<dyn Any + Send + Sync> = mapping.clone();
        self.mappings.insert(id, erased);
        mapping
    }
}

/// Key role declared on a property
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum KeyAnnotation {
    Hash,
    Range,
}

type Getter<T> =
    Arc<dyn Fn(&T, &MapContext<'_>) -> Result<Option<AttributeValue>> + Send + Sync>;
type Setter<T> = Arc<dyn Fn(&mut T, &AttributeValue, &MapContext<'_>) -> Result<()> + Send + Sync>;

/// One named attribute of an entity
pub struct Property<T> {
    name: String,
    key: Option<KeyAnnotation>,
    is_text: bool,
    getter: Option<Getter<T>>,
    setter: Option<Setter<T>>,
}

impl<T: 'static> Property<T> {
    /// A readable and writable property backed by a field
    pub fn new<F, G, S>(name: impl Into<String>, get: G, set: S) -> Self
    where
        F: WireCodec,
        G: Fn(&T) -> &F + Send + Sync + 'static,
        S: Fn(&mut T, F) + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            key: None,
            is_text: F::is_text(),
            getter: Some(Arc::new(move |target: &T, ctx: &MapContext<'_>| {
                let value = ctx.codec.to_wire(get(target))?;
                Ok((!value.is_null()).then_some(value))
            })),
            setter: Some(Arc::new(
                move |target: &mut T, value: &AttributeValue, ctx: &MapContext<'_>| {
                    set(target, ctx.codec.from_wire::<F>(value)?);
                    Ok(())
                },
            )),
        }
    }

    /// A computed property; written to the store, never hydrated
    pub fn read_only<F, G>(name: impl Into<String>, get: G) -> Self
    where
        F: WireCodec,
        G: Fn(&T) -> F + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            key: None,
            is_text: F::is_text(),
            getter: Some(Arc::new(move |target: &T, ctx: &MapContext<'_>| {
                let value = ctx.codec.to_wire(&get(target))?;
                Ok((!value.is_null()).then_some(value))
            })),
            setter: None,
        }
    }

    /// A nested object stored as a map and hydrated through its own mapping
    pub fn nested<N, G, S>(name: impl Into<String>, get: G, set: S) -> Self
    where
        N: Entity,
        G: Fn(&T) -> Option<&N> + Send + Sync + 'static,
        S: Fn(&mut T, N) + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            key: None,
            is_text: false,
            getter: Some(Arc::new(move |target: &T, ctx: &MapContext<'_>| {
                get(target)
                    .map(|nested| encode_entity(nested, &ctx.child()))
                    .transpose()
            })),
            setter: Some(Arc::new(
                move |target: &mut T, value: &AttributeValue, ctx: &MapContext<'_>| {
                    set(target, hydrate_nested::<N>(value, ctx)?);
                    Ok(())
                },
            )),
        }
    }

    /// Mark this property as the partition (hash) key
    pub fn hash_key(mut self) -> Self {
        self.key = Some(KeyAnnotation::Hash);
        self
    }

    /// Mark this property as the sort (range) key
    pub fn range_key(mut self) -> Self {
        self.key = Some(KeyAnnotation::Range);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_writable(&self) -> bool {
        self.setter.is_some()
    }

    pub(crate) fn key_annotation(&self) -> Option<KeyAnnotation> {
        self.key
    }

    pub(crate) fn is_text(&self) -> bool {
        self.is_text
    }

    pub(crate) fn read(&self, target: &T, ctx: &MapContext<'_>) -> Result<Option<AttributeValue>> {
        match &self.getter {
            Some(getter) => getter(target, ctx),
            None => Ok(None),
        }
    }

    pub(crate) fn write(
        &self,
        target: &mut T,
        value: &AttributeValue,
        ctx: &MapContext<'_>,
    ) -> Result<()> {
        match &self.setter {
            Some(setter) => setter(target, value, ctx),
            None => Ok(()),
        }
    }
}

impl<T> fmt::Debug for Property<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Property")
            .field("name", &self.name)
            .field("key", &self.key)
            .field("writable", &self.setter.is_some())
            .finish()
    }
}

type ParamDecoder =
    Arc<dyn Fn(Option<&AttributeValue>, &MapContext<'_>) -> Result<Box<dyn Any + Send>> + Send + Sync>;
type BuildFn<T> = Arc<dyn Fn(&mut ConstructorArgs) -> std::result::Result<T, BoxError> + Send + Sync>;

pub(crate) struct Parameter {
    pub(crate) name: String,
    pub(crate) decode: ParamDecoder,
}

/// A parameterized constructor.
///
/// Parameters are declared in order with [`Constructor::param`]; the build
/// function pulls them back out of [`ConstructorArgs`] by name.
pub struct Constructor<T> {
    params: Vec<Parameter>,
    build: BuildFn<T>,
}

impl<T: 'static> Constructor<T> {
    pub fn new<B>(build: B) -> Self
    where
        B: Fn(&mut ConstructorArgs) -> std::result::Result<T, BoxError> + Send + Sync + 'static,
    {
        Self {
            params: Vec::new(),
            build: Arc::new(build),
        }
    }

    /// A parameter decoded with the codec; absent or null attributes give
    /// `F::default()`
    pub fn param<F: WireCodec + Default>(mut self, name: impl Into<String>) -> Self {
        self.params.push(Parameter {
            name: name.into(),
            decode: Arc::new(|value: Option<&AttributeValue>, ctx: &MapContext<'_>| {
                let decoded = match value.filter(|v| !v.is_null()) {
                    Some(value) => ctx.codec.from_wire::<F>(value)?,
                    None => F::default(),
                };
                Ok(Box::new(decoded) as Box<dyn Any + Send>)
            }),
        });
        self
    }

    /// A nested-object parameter, taken as `Option<N>`
    pub fn nested_param<N: Entity>(mut self, name: impl Into<String>) -> Self {
        self.params.push(Parameter {
            name: name.into(),
            decode: Arc::new(|value: Option<&AttributeValue>, ctx: &MapContext<'_>| {
                let decoded: Option<N> = match value.filter(|v| !v.is_null()) {
                    Some(value) => Some(hydrate_nested::<N>(value, ctx)?),
                    None => None,
                };
                Ok(Box::new(decoded) as Box<dyn Any + Send>)
            }),
        });
        self
    }

    pub fn arity(&self) -> usize {
        self.params.len()
    }

    pub(crate) fn params(&self) -> &[Parameter] {
        &self.params
    }

    pub(crate) fn call(&self, args: &mut ConstructorArgs) -> std::result::Result<T, BoxError> {
        (self.build)(args)
    }
}

/// Decoded constructor arguments, by parameter name
pub struct ConstructorArgs {
    values: Vec<(String, Option<Box<dyn Any + Send>>)>,
}

impl ConstructorArgs {
    pub(crate) fn new(values: Vec<(String, Box<dyn Any + Send>)>) -> Self {
        Self {
            values: values.into_iter().map(|(n, v)| (n, Some(v))).collect(),
        }
    }

    /// Move a decoded argument out; each argument can be taken once
    pub fn take<F: 'static>(&mut self, name: &str) -> std::result::Result<F, BoxError> {
        let (_, slot) = self
            .values
            .iter_mut()
            .find(|(param, _)| param == name)
            .ok_or_else(|| format!("no constructor parameter named '{name}'"))?;
        let value = slot
            .take()
            .ok_or_else(|| format!("constructor parameter '{name}' was already taken"))?;
        value.downcast::<F>().map(|boxed| *boxed).map_err(|_| {
            format!(
                "constructor parameter '{name}' is not a {}",
                std::any::type_name::<F>()
            )
            .into()
        })
    }
}

type DefaultConstructor<T> = Arc<dyn Fn() -> T + Send + Sync>;

/// Everything the mapper knows about one entity type
pub struct EntityMapping<T> {
    type_name: &'static str,
    default_constructor: Option<DefaultConstructor<T>>,
    properties: Vec<Property<T>>,
    constructors: Vec<Constructor<T>>,
    strategy: Strategy,
}

impl<T: Entity> EntityMapping<T> {
    pub fn builder() -> EntityMappingBuilder<T> {
        EntityMappingBuilder {
            default_constructor: None,
            properties: Vec::new(),
            constructors: Vec::new(),
        }
    }
}

impl<T> EntityMapping<T> {
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn properties(&self) -> &[Property<T>] {
        &self.properties
    }

    /// Case-insensitive property lookup
    pub fn property(&self, name: &str) -> Option<&Property<T>> {
        self.properties
            .iter()
            .find(|p| p.name.eq_ignore_ascii_case(name))
    }

    pub(crate) fn constructors(&self) -> &[Constructor<T>] {
        &self.constructors
    }

    pub(crate) fn construct_default(&self) -> Option<T> {
        self.default_constructor.as_ref().map(|ctor| ctor())
    }

    pub(crate) fn strategy(&self) -> &Strategy {
        &self.strategy
    }
}

impl<T> fmt::Debug for EntityMapping<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityMapping")
            .field("type_name", &self.type_name)
            .field("properties", &self.properties)
            .field("constructors", &self.constructors.len())
            .field("strategy", &self.strategy)
            .finish()
    }
}

pub struct EntityMappingBuilder<T> {
    default_constructor: Option<DefaultConstructor<T>>,
    properties: Vec<Property<T>>,
    constructors: Vec<Constructor<T>>,
}

impl<T: Entity> EntityMappingBuilder<T> {
    pub fn default_constructor(mut self, ctor: impl Fn() -> T + Send + Sync + 'static) -> Self {
        self.default_constructor = Some(Arc::new(ctor));
        self
    }

    pub fn property(mut self, property: Property<T>) -> Self {
        self.properties.push(property);
        self
    }

    pub fn constructor(mut self, constructor: Constructor<T>) -> Self {
        self.constructors.push(constructor);
        self
    }

    pub fn build(mut self) -> EntityMapping<T> {
        // Best fit first: most parameters, ties in declaration order
        self.constructors
            .sort_by(|a, b| b.params.len().cmp(&a.params.len()));

        let strategy = if self.default_constructor.is_some() {
            Strategy::Properties
        } else if !self.constructors.is_empty() {
            Strategy::Constructors
        } else {
            Strategy::Unconstructible
        };

        EntityMapping {
            type_name: short_type_name::<T>(),
            default_constructor: self.default_constructor,
            properties: self.properties,
            constructors: self.constructors,
            strategy,
        }
    }
}

/// `my_crate::model::Order<X>` -> `Order`
fn short_type_name<T>() -> &'static str {
    let full = std::any::type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}

/// Encode a nested entity as a map of its readable properties
pub(crate) fn encode_entity<N: Entity>(value: &N, ctx: &MapContext<'_>) -> Result<AttributeValue> {
    let mapping = ctx.mappings.get::<N>();
    if ctx.depth >= MAX_DEPTH {
        return Err(MapperError::MaxDepthExceeded {
            type_name: mapping.type_name(),
            depth: ctx.depth,
        });
    }

    let mut map = HashMap::new();
    for property in mapping.properties() {
        if let Some(attribute) = property.read(value, ctx)? {
            map.insert(property.name.clone(), attribute);
        }
    }
    Ok(AttributeValue::M(map))
}

/// Hydrate a nested entity from a map attribute, one level deeper than `ctx`
pub(crate) fn hydrate_nested<N: Entity>(value: &AttributeValue, ctx: &MapContext<'_>) -> Result<N> {
    let mapping = ctx.mappings.get::<N>();
    let map = value.as_map().ok_or_else(|| CodecError::TypeMismatch {
        type_name: mapping.type_name(),
        expected: "M",
        found: value.type_tag(),
    })?;
    hydrate::hydrate_entity(&mapping, map, &ctx.child(), None)
}
