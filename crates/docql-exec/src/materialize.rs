//! Stored documents back to model-shaped values.
//!
//! Stored property names are replaced by model property names; owned
//! structures are mapped recursively. The concrete type of an entity
//! document is chosen by its discriminator value.

use docql_core::model::{EntityType, Model};
use docql_core::plan::ResultShape;
use docql_core::schema::{OwnedKind, OwnedNavigation, Property};
use serde_json::{Map, Value};

pub struct Materializer<'a> {
    model: &'a Model,
}

impl<'a> Materializer<'a> {
    pub fn new(model: &'a Model) -> Self {
        Self { model }
    }

    pub fn materialize(&self, shape: &ResultShape, raw: Value) -> Value {
        if raw.is_null() {
            return raw;
        }
        match shape {
            ResultShape::Value => raw,
            ResultShape::Entity { entity } => match self.concrete_type(entity, &raw) {
                Some(ty) => map_structure(&ty.properties, &ty.owned, &raw),
                None => raw,
            },
            ResultShape::Owned { root, path } => match self.model.owned_type(root, path) {
                Some(owned) => map_structure(&owned.properties, &owned.owned, &raw),
                None => raw,
            },
            ResultShape::Object(members) => {
                let Value::Object(mut fields) = raw else {
                    return raw;
                };
                let mut out = Map::new();
                for (name, member_shape) in members {
                    let v = fields.remove(name).unwrap_or(Value::Null);
                    out.insert(name.clone(), self.materialize(member_shape, v));
                }
                Value::Object(out)
            }
            ResultShape::Array(element) => match raw {
                Value::Array(items) => Value::Array(
                    items
                        .into_iter()
                        .map(|v| self.materialize(element, v))
                        .collect(),
                ),
                other => other,
            },
        }
    }

    /// The type among `entity` and its derived types that `doc` is an
    /// instance of. `None` when its discriminator names a type outside
    /// that slice of the hierarchy.
    pub fn concrete_type(&self, entity: &str, doc: &Value) -> Option<&'a EntityType> {
        let base = self.model.entity(entity)?;
        if !self.model.is_discriminated(entity) {
            return Some(base);
        }
        let value = doc.get(self.model.discriminator_property())?.as_str()?;
        self.model
            .concrete_types(entity)
            .into_iter()
            .find(|t| t.discriminator_value.as_deref() == Some(value))
    }
}

fn map_structure(properties: &[Property], owned: &[OwnedNavigation], raw: &Value) -> Value {
    let mut out = Map::new();
    for p in properties {
        out.insert(p.name.clone(), raw.get(&p.json_name).cloned().unwrap_or(Value::Null));
    }
    for nav in owned {
        let v = match (nav.kind, raw.get(&nav.json_name)) {
            (_, None) | (_, Some(Value::Null)) => Value::Null,
            (OwnedKind::Reference, Some(v)) => map_structure(&nav.target.properties, &nav.target.owned, v),
            (OwnedKind::Collection, Some(Value::Array(items))) => Value::Array(
                items
                    .iter()
                    .map(|v| map_structure(&nav.target.properties, &nav.target.owned, v))
                    .collect(),
            ),
            (OwnedKind::Collection, Some(other)) => other.clone(),
        };
        out.insert(nav.name.clone(), v);
    }
    Value::Object(out)
}
