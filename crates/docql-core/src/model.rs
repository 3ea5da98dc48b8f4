//! Entity type descriptors, as supplied by the mapping layer.
//!
//! `Model::new` validates the descriptors and flattens inheritance so every
//! derived type carries its base's key, partition key, properties and owned
//! shapes. Everything downstream reads the flattened form.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::schema::{OwnedKind, OwnedNavigation, OwnedType, Property, ReferenceNavigation};

pub const DEFAULT_DISCRIMINATOR_PROPERTY: &str = "Discriminator";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityType {
    pub name: String,
    pub container: String,
    /// Name used to address the root set in query text (`customers`).
    pub set_name: Option<String>,
    pub base: Option<String>,
    pub discriminator_value: Option<String>,
    pub is_abstract: bool,
    pub key: Vec<String>,
    pub partition_key: Option<String>,
    pub properties: Vec<Property>,
    pub owned: Vec<OwnedNavigation>,
    pub references: Vec<ReferenceNavigation>,
}

impl EntityType {
    pub fn new(name: impl Into<String>, container: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            container: container.into(),
            set_name: None,
            base: None,
            discriminator_value: None,
            is_abstract: false,
            key: Vec::new(),
            partition_key: None,
            properties: Vec::new(),
            owned: Vec::new(),
            references: Vec::new(),
        }
    }

    pub fn property(&self, name: &str) -> Option<&Property> {
        self.properties.iter().find(|p| p.name == name)
    }

    pub fn owned_navigation(&self, name: &str) -> Option<&OwnedNavigation> {
        self.owned.iter().find(|o| o.name == name)
    }

    pub fn reference(&self, name: &str) -> Option<&ReferenceNavigation> {
        self.references.iter().find(|r| r.name == name)
    }

    pub fn key_properties(&self) -> Vec<&Property> {
        self.key.iter().filter_map(|k| self.property(k)).collect()
    }
}

impl OwnedType {
    pub fn property(&self, name: &str) -> Option<&Property> {
        self.properties.iter().find(|p| p.name == name)
    }

    pub fn owned_navigation(&self, name: &str) -> Option<&OwnedNavigation> {
        self.owned.iter().find(|o| o.name == name)
    }
}

/// Either kind of structural type a member access can land on.
#[derive(Debug, Clone, Copy)]
pub enum StructuralType<'a> {
    Entity(&'a EntityType),
    Owned(&'a OwnedType),
}

impl<'a> StructuralType<'a> {
    pub fn name(&self) -> &'a str {
        match self {
            StructuralType::Entity(e) => &e.name,
            StructuralType::Owned(o) => &o.name,
        }
    }

    pub fn properties(&self) -> &'a [Property] {
        match self {
            StructuralType::Entity(e) => &e.properties,
            StructuralType::Owned(o) => &o.properties,
        }
    }

    pub fn property(&self, name: &str) -> Option<&'a Property> {
        self.properties().iter().find(|p| p.name == name)
    }

    pub fn owned(&self) -> &'a [OwnedNavigation] {
        match self {
            StructuralType::Entity(e) => &e.owned,
            StructuralType::Owned(o) => &o.owned,
        }
    }

    pub fn owned_navigation(&self, name: &str) -> Option<&'a OwnedNavigation> {
        self.owned().iter().find(|o| o.name == name)
    }

    pub fn reference(&self, name: &str) -> Option<&'a ReferenceNavigation> {
        match self {
            StructuralType::Entity(e) => e.references.iter().find(|r| r.name == name),
            StructuralType::Owned(_) => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Model {
    discriminator_property: String,
    entities: Vec<EntityType>,
    by_name: HashMap<String, usize>,
}

impl Model {
    pub fn new(discriminator_property: impl Into<String>, entities: Vec<EntityType>) -> Result<Self> {
        let mut by_name = HashMap::new();
        for (i, e) in entities.iter().enumerate() {
            if by_name.insert(e.name.clone(), i).is_some() {
                return Err(Error::Model(format!("entity type '{}' declared twice", e.name)));
            }
        }

        let mut sets = HashSet::new();
        for e in &entities {
            if let Some(set) = &e.set_name {
                if !sets.insert(set.clone()) {
                    return Err(Error::Model(format!("set name '{set}' is used by two entity types")));
                }
            }
            if let Some(base) = &e.base {
                if !by_name.contains_key(base) {
                    return Err(Error::Model(format!(
                        "entity type '{}' derives from unknown type '{base}'",
                        e.name
                    )));
                }
            }
        }

        let mut flattened = Vec::with_capacity(entities.len());
        for e in &entities {
            flattened.push(flatten(e, &entities, &by_name, 0)?);
        }

        for e in &flattened {
            if e.key.is_empty() {
                return Err(Error::Model(format!("entity type '{}' has no key", e.name)));
            }
            for k in &e.key {
                if e.property(k).is_none() {
                    return Err(Error::Model(format!(
                        "key property '{k}' is not declared on '{}'",
                        e.name
                    )));
                }
            }
            if let Some(pk) = &e.partition_key {
                if e.property(pk).is_none() {
                    return Err(Error::Model(format!(
                        "partition key property '{pk}' is not declared on '{}'",
                        e.name
                    )));
                }
            }
            for r in &e.references {
                if !by_name.contains_key(&r.target) {
                    return Err(Error::Model(format!(
                        "navigation '{}.{}' targets unknown type '{}'",
                        e.name, r.name, r.target
                    )));
                }
            }
        }

        Ok(Self {
            discriminator_property: discriminator_property.into(),
            entities: flattened,
            by_name,
        })
    }

    pub fn discriminator_property(&self) -> &str {
        &self.discriminator_property
    }

    pub fn entities(&self) -> &[EntityType] {
        &self.entities
    }

    pub fn entity(&self, name: &str) -> Option<&EntityType> {
        self.by_name.get(name).map(|&i| &self.entities[i])
    }

    pub fn entity_by_set(&self, set: &str) -> Option<&EntityType> {
        self.entities
            .iter()
            .find(|e| e.set_name.as_deref() == Some(set))
    }

    /// Top of the inheritance hierarchy `name` belongs to.
    pub fn root_of(&self, name: &str) -> Option<&EntityType> {
        let mut current = self.entity(name)?;
        while let Some(base) = current.base.as_deref() {
            current = self.entity(base)?;
        }
        Some(current)
    }

    /// True when `derived` is `base` or inherits from it.
    pub fn is_derived_from(&self, derived: &str, base: &str) -> bool {
        let mut current = self.entity(derived);
        while let Some(e) = current {
            if e.name == base {
                return true;
            }
            current = e.base.as_deref().and_then(|b| self.entity(b));
        }
        false
    }

    /// `name` and its descendants, in declaration order.
    pub fn derived_types(&self, name: &str) -> Vec<&EntityType> {
        self.entities
            .iter()
            .filter(|e| self.is_derived_from(&e.name, name))
            .collect()
    }

    /// Non-abstract members of `derived_types(name)`.
    pub fn concrete_types(&self, name: &str) -> Vec<&EntityType> {
        self.derived_types(name)
            .into_iter()
            .filter(|e| !e.is_abstract)
            .collect()
    }

    /// Whether rows of `name` need a discriminator filter at all.
    pub fn is_discriminated(&self, name: &str) -> bool {
        self.concrete_types(name)
            .iter()
            .any(|e| e.discriminator_value.is_some())
    }

    /// Concrete type within the `within` slice whose discriminator is `value`.
    pub fn concrete_for_discriminator(&self, within: &str, value: &str) -> Option<&EntityType> {
        self.concrete_types(within)
            .into_iter()
            .find(|e| e.discriminator_value.as_deref() == Some(value))
    }

    /// Owned type reached from `root` by following owned navigations `path`.
    pub fn owned_type(&self, root: &str, path: &[String]) -> Option<&OwnedType> {
        let entity = self.entity(root)?;
        let (first, rest) = path.split_first()?;
        let mut current = &entity.owned_navigation(first)?.target;
        for step in rest {
            current = &current.owned_navigation(step)?.target;
        }
        Some(current)
    }

    /// Structural type at `path` below `root` (the entity itself for an empty path).
    pub fn structural_type(&self, root: &str, path: &[String]) -> Option<StructuralType<'_>> {
        if path.is_empty() {
            self.entity(root).map(StructuralType::Entity)
        } else {
            self.owned_type(root, path).map(StructuralType::Owned)
        }
    }
}

fn flatten(
    e: &EntityType,
    all: &[EntityType],
    by_name: &HashMap<String, usize>,
    depth: usize,
) -> Result<EntityType> {
    if depth > all.len() {
        return Err(Error::Model(format!(
            "inheritance cycle involving '{}'",
            e.name
        )));
    }
    let Some(base_name) = &e.base else {
        return Ok(e.clone());
    };
    let base = by_name
        .get(base_name)
        .map(|&i| &all[i])
        .ok_or_else(|| Error::Model(format!("unknown base type '{base_name}'")))?;
    let base = flatten(base, all, by_name, depth + 1)?;

    let mut out = e.clone();
    if out.container.is_empty() {
        out.container = base.container.clone();
    } else if out.container != base.container {
        return Err(Error::Model(format!(
            "'{}' is stored in '{}' but its base '{}' is stored in '{}'",
            e.name, out.container, base.name, base.container
        )));
    }
    if out.key.is_empty() {
        out.key = base.key.clone();
    }
    if out.partition_key.is_none() {
        out.partition_key = base.partition_key.clone();
    }

    let mut properties = base.properties.clone();
    properties.extend(
        e.properties
            .iter()
            .filter(|p| base.property(&p.name).is_none())
            .cloned(),
    );
    out.properties = properties;

    let mut owned = base.owned.clone();
    owned.extend(
        e.owned
            .iter()
            .filter(|o| base.owned_navigation(&o.name).is_none())
            .cloned(),
    );
    out.owned = owned;

    let mut references = base.references.clone();
    references.extend(e.references.iter().cloned());
    out.references = references;
    Ok(out)
}

/// Convenience for building owned collections in code.
pub fn owned_collection(name: &str, target: OwnedType) -> OwnedNavigation {
    OwnedNavigation {
        name: name.to_string(),
        json_name: name.to_string(),
        kind: OwnedKind::Collection,
        target,
    }
}

/// Convenience for building owned references in code.
pub fn owned_reference(name: &str, target: OwnedType) -> OwnedNavigation {
    OwnedNavigation {
        name: name.to_string(),
        json_name: name.to_string(),
        kind: OwnedKind::Reference,
        target,
    }
}
