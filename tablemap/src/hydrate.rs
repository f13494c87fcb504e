//! Entity hydration: building a `T` from an attribute map

use tablemap_core::{AttributeValue, Item};
use tracing::debug;

use crate::codec::CodecError;
use crate::entity::{ConstructorArgs, EntityMapping, MapContext, Property, MAX_DEPTH};
use crate::error::{MapperError, Result};

/// How a mapping materializes new values, fixed when the mapping is built
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Strategy {
    /// Zero-argument constructor, then property setters
    Properties,
    /// Best-fit parameterized constructor
    Constructors,
    /// Neither; hydration always fails
    Unconstructible,
}

/// Root-level knowledge of where key values live
pub(crate) trait KeyLookup {
    /// Physical key attribute that stores `property`, if it is a key property
    fn key_attribute_for(&self, property: &str) -> Option<&str>;

    /// Physical secondary-index attribute fed by `property`
    fn gsi_attribute_for(&self, property: &str) -> Option<&str>;
}

/// Attribute lookup by exact name, then case-insensitively
pub(crate) fn find_attribute<'a>(item: &'a Item, name: &str) -> Option<&'a AttributeValue> {
    item.get(name).or_else(|| {
        item.iter()
            .find(|(attribute, _)| attribute.eq_ignore_ascii_case(name))
            .map(|(_, value)| value)
    })
}

/// Key attributes always hold text. When a numeric key property rejects that
/// text, the same digits are offered again as a number.
fn key_as_number(value: &AttributeValue, err: &MapperError) -> Option<AttributeValue> {
    match (value, err) {
        (
            AttributeValue::S(text),
            MapperError::Codec(CodecError::TypeMismatch { expected: "N", .. }),
        ) => Some(AttributeValue::N(text.clone())),
        _ => None,
    }
}

/// Write a value read from a key attribute onto its property
pub(crate) fn write_key<T: 'static>(
    property: &Property<T>,
    target: &mut T,
    value: &AttributeValue,
    ctx: &MapContext<'_>,
) -> Result<()> {
    match property.write(target, value, ctx) {
        Err(err) => match key_as_number(value, &err) {
            Some(number) => property.write(target, &number, ctx),
            None => Err(err),
        },
        ok => ok,
    }
}

pub(crate) fn hydrate_entity<T>(
    mapping: &EntityMapping<T>,
    item: &Item,
    ctx: &MapContext<'_>,
    keys: Option<&dyn KeyLookup>,
) -> Result<T>
where
    T: 'static,
{
    if ctx.depth >= MAX_DEPTH {
        return Err(MapperError::MaxDepthExceeded {
            type_name: mapping.type_name(),
            depth: ctx.depth,
        });
    }

    match mapping.strategy() {
        Strategy::Properties => with_properties(mapping, item, ctx, keys),
        Strategy::Constructors => with_constructors(mapping, item, ctx, keys),
        Strategy::Unconstructible => Err(MapperError::hydration(
            mapping.type_name(),
            "no default constructor and no parameterized constructor registered",
        )),
    }
}

fn with_properties<T: 'static>(
    mapping: &EntityMapping<T>,
    item: &Item,
    ctx: &MapContext<'_>,
    keys: Option<&dyn KeyLookup>,
) -> Result<T> {
    let Some(mut target) = mapping.construct_default() else {
        return Err(MapperError::hydration(
            mapping.type_name(),
            "no default constructor registered",
        ));
    };

    for property in mapping.properties().iter().filter(|p| p.is_writable()) {
        let from_key = keys
            .and_then(|k| k.key_attribute_for(property.name()))
            .and_then(|attribute| item.get(attribute));
        let written = match from_key {
            Some(value) if !value.is_null() => write_key(property, &mut target, value, ctx),
            _ => match find_attribute(item, property.name()) {
                Some(value) if !value.is_null() => property.write(&mut target, value, ctx),
                _ => continue,
            },
        };
        written.map_err(|err| wrap(mapping.type_name(), err))?;
    }

    Ok(target)
}

fn with_constructors<T: 'static>(
    mapping: &EntityMapping<T>,
    item: &Item,
    ctx: &MapContext<'_>,
    keys: Option<&dyn KeyLookup>,
) -> Result<T> {
    let mut last_error: Option<MapperError> = None;

    for constructor in mapping.constructors() {
        let mut decoded = Vec::with_capacity(constructor.arity());
        let mut failed = None;

        for param in constructor.params() {
            let by_name = find_attribute(item, &param.name);
            let by_key = || {
                keys.and_then(|k| k.key_attribute_for(&param.name))
                    .or_else(|| keys.and_then(|k| k.gsi_attribute_for(&param.name)))
                    .and_then(|attribute| item.get(attribute))
            };
            let (source, from_key) = match by_name {
                Some(value) => (Some(value), false),
                None => (by_key(), true),
            };

            let result = match ((param.decode)(source, ctx), source) {
                (Err(err), Some(value)) if from_key => match key_as_number(value, &err) {
                    Some(number) => (param.decode)(Some(&number), ctx),
                    None => Err(err),
                },
                (result, _) => result,
            };

            match result {
                Ok(value) => decoded.push((param.name.clone(), value)),
                Err(err @ MapperError::MaxDepthExceeded { .. }) => return Err(err),
                Err(err) => {
                    failed = Some(err);
                    break;
                }
            }
        }

        let outcome = match failed {
            Some(err) => Err(err),
            None => constructor
                .call(&mut ConstructorArgs::new(decoded))
                .map_err(|source| MapperError::hydration(mapping.type_name(), source)),
        };

        match outcome {
            Ok(value) => return Ok(value),
            Err(err) => {
                debug!(
                    type_name = mapping.type_name(),
                    arity = constructor.arity(),
                    error = %err,
                    "Constructor did not fit, trying next"
                );
                last_error = Some(err);
            }
        }
    }

    Err(match last_error {
        Some(err) => MapperError::hydration(mapping.type_name(), err),
        None => MapperError::hydration(mapping.type_name(), "no constructor registered"),
    })
}

/// Nesting errors pass through untouched; anything else is tagged with the
/// type being hydrated
fn wrap(type_name: &'static str, err: MapperError) -> MapperError {
    match err {
        MapperError::MaxDepthExceeded { .. } => err,
        other => MapperError::hydration(type_name, other),
    }
}
