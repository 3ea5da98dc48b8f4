//! YAML entity models and translation case files.
//!
//! Model:
//! ```yaml
//! discriminator: Discriminator
//! entities:
//!   - name: Customer
//!     container: Northwind
//!     set: customers
//!     discriminator: Customer
//!     key: [CustomerID]
//!     properties:
//!       - { name: CustomerID, json: id, type: string }
//!       - { name: City, type: string, nullable: true }
//!     owned:
//!       - { name: Orders, kind: collection, type: Order,
//!           properties: [ { name: Total, type: float } ] }
//! ```
//!
//! Cases:
//! ```yaml
//! config: { point_reads_enabled: true }
//! cases:
//!   - name: city_filter
//!     query: customers.Where(c => c.City == $city)
//!     captures: { city: London }
//!     sql: |
//!       SELECT VALUE c
//!       FROM root c
//!       WHERE ((c["Discriminator"] = "Customer") AND (c["City"] = @__city_0))
//!     parameters: { __city_0: London }
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use docql_core::config::ConfigOverrides;
use docql_core::model::{EntityType, Model, DEFAULT_DISCRIMINATOR_PROPERTY};
use docql_core::schema::{DataType, OwnedKind, OwnedNavigation, OwnedType, Property, ReferenceNavigation};
use docql_core::types::Scalar;

use super::DslError;
use crate::plan::CompiledPlan;
use crate::report::Diagnostic;
use crate::Planner;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModelDef {
    #[serde(default)]
    pub discriminator: Option<String>,
    pub entities: Vec<EntityDef>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EntityDef {
    pub name: String,
    pub container: String,
    #[serde(default)]
    pub set: Option<String>,
    #[serde(default)]
    pub discriminator: Option<String>,
    #[serde(default)]
    pub base: Option<String>,
    #[serde(default, rename = "abstract")]
    pub is_abstract: bool,
    #[serde(default)]
    pub key: Vec<String>,
    #[serde(default)]
    pub partition_key: Option<String>,
    #[serde(default)]
    pub properties: Vec<PropertyDef>,
    #[serde(default)]
    pub owned: Vec<OwnedDef>,
    #[serde(default)]
    pub references: Vec<ReferenceDef>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PropertyDef {
    pub name: String,
    #[serde(default)]
    pub json: Option<String>,
    #[serde(rename = "type")]
    pub data_type: String,
    #[serde(default)]
    pub nullable: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OwnedKindDef {
    Reference,
    Collection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OwnedDef {
    pub name: String,
    #[serde(default)]
    pub json: Option<String>,
    pub kind: OwnedKindDef,
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(default)]
    pub properties: Vec<PropertyDef>,
    #[serde(default)]
    pub owned: Vec<OwnedDef>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReferenceDef {
    pub name: String,
    pub target: String,
}

pub fn parse_model(src: &str) -> Result<Model, DslError> {
    let def: ModelDef = serde_yaml::from_str(src)?;
    def.into_model()
}

pub fn load_model(path: impl AsRef<Path>) -> Result<Model, DslError> {
    parse_model(&std::fs::read_to_string(path)?)
}

impl ModelDef {
    pub fn into_model(self) -> Result<Model, DslError> {
        let entities = self
            .entities
            .into_iter()
            .map(EntityDef::into_entity)
            .collect::<Result<Vec<_>, _>>()?;
        let discriminator = self
            .discriminator
            .unwrap_or_else(|| DEFAULT_DISCRIMINATOR_PROPERTY.to_string());
        Ok(Model::new(discriminator, entities)?)
    }
}

impl EntityDef {
    fn into_entity(self) -> Result<EntityType, DslError> {
        let mut e = EntityType::new(self.name, self.container);
        e.set_name = self.set;
        e.discriminator_value = self.discriminator;
        e.base = self.base;
        e.is_abstract = self.is_abstract;
        e.key = self.key;
        e.partition_key = self.partition_key;
        e.properties = properties(self.properties)?;
        e.owned = self
            .owned
            .into_iter()
            .map(OwnedDef::into_navigation)
            .collect::<Result<_, _>>()?;
        e.references = self
            .references
            .into_iter()
            .map(|r| ReferenceNavigation {
                name: r.name,
                target: r.target,
            })
            .collect();
        Ok(e)
    }
}

impl OwnedDef {
    fn into_navigation(self) -> Result<OwnedNavigation, DslError> {
        Ok(OwnedNavigation {
            json_name: self.json.unwrap_or_else(|| self.name.clone()),
            name: self.name,
            kind: match self.kind {
                OwnedKindDef::Reference => OwnedKind::Reference,
                OwnedKindDef::Collection => OwnedKind::Collection,
            },
            target: OwnedType {
                name: self.type_name,
                properties: properties(self.properties)?,
                owned: self
                    .owned
                    .into_iter()
                    .map(OwnedDef::into_navigation)
                    .collect::<Result<_, _>>()?,
            },
        })
    }
}

fn properties(defs: Vec<PropertyDef>) -> Result<Vec<Property>, DslError> {
    defs.into_iter()
        .map(|p| {
            let data_type = DataType::parse(&p.data_type).ok_or_else(|| DslError::UnknownType(p.data_type.clone()))?;
            let mut prop = Property::new(p.name, data_type);
            if let Some(json) = p.json {
                prop = prop.json(json);
            }
            if p.nullable {
                prop = prop.nullable();
            }
            Ok(prop)
        })
        .collect()
}

/// A file of query translation cases sharing one configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CaseFile {
    #[serde(default)]
    pub config: ConfigOverrides,
    #[serde(default)]
    pub cases: Vec<QueryCase>,
}

/// One query with its expected outcome. Unset expectations are not checked.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QueryCase {
    pub name: String,
    pub query: String,
    #[serde(default)]
    pub captures: BTreeMap<String, serde_json::Value>,
    /// Expected dialect text.
    #[serde(default)]
    pub sql: Option<String>,
    /// Expected parameter bindings.
    #[serde(default)]
    pub parameters: Option<BTreeMap<String, serde_json::Value>>,
    /// Expected point-read command, e.g. `ReadItem(None, ALFKI)`.
    #[serde(default)]
    pub read_item: Option<String>,
    /// Expected failure code.
    #[serde(default)]
    pub error: Option<String>,
    /// Expected offending expression of the failure.
    #[serde(default)]
    pub expression: Option<String>,
}

impl QueryCase {
    pub fn capture_values(&self) -> BTreeMap<String, Scalar> {
        self.captures
            .iter()
            .map(|(k, v)| (k.clone(), Scalar::from_json(v)))
            .collect()
    }
}

pub fn parse_cases(src: &str) -> Result<CaseFile, DslError> {
    Ok(serde_yaml::from_str(src)?)
}

pub fn load_cases(path: impl AsRef<Path>) -> Result<CaseFile, DslError> {
    parse_cases(&std::fs::read_to_string(path)?)
}

/// What a case produced, and where it differed from its expectations.
#[derive(Debug, Clone, Serialize)]
pub struct CaseOutcome {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<Diagnostic>,
    pub mismatches: Vec<String>,
}

impl CaseOutcome {
    pub fn passed(&self) -> bool {
        self.mismatches.is_empty()
    }
}

/// Plan `case` and compare the result with its expectations.
pub fn check_case(planner: &Planner, case: &QueryCase) -> CaseOutcome {
    let mut out = CaseOutcome {
        name: case.name.clone(),
        command: None,
        failure: None,
        mismatches: Vec::new(),
    };
    let tree = match planner.parse(&case.query, &case.capture_values()) {
        Ok(t) => t,
        Err(e) => {
            out.mismatches.push(format!("query text does not parse: {e}"));
            return out;
        }
    };

    match planner.plan(&tree) {
        Ok((normalized, plan)) => {
            let params = normalized.parameter_map();
            out.command = Some(plan.render_command(&params));
            if let Some(code) = &case.error {
                out.mismatches.push(format!("expected {code}, but the query compiled"));
            }
            match (&plan, &case.sql, &case.read_item) {
                (CompiledPlan::Query(q), Some(sql), _) if q.text != sql.trim_end() => {
                    out.mismatches.push(format!("sql differs:\n--- expected\n{}\n--- actual\n{}", sql.trim_end(), q.text));
                }
                (CompiledPlan::PointRead(_), Some(_), _) => {
                    out.mismatches.push("expected a query, got a point read".to_string());
                }
                (CompiledPlan::PointRead(_), _, Some(expected)) => {
                    let actual = plan.render_command(&params);
                    if actual != *expected {
                        out.mismatches.push(format!("expected {expected}, got {actual}"));
                    }
                }
                (CompiledPlan::Query(_), _, Some(_)) => {
                    out.mismatches.push("expected a point read, got a query".to_string());
                }
                _ => {}
            }
            if let Some(expected) = &case.parameters {
                let actual: BTreeMap<String, serde_json::Value> = normalized
                    .parameters
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect();
                if actual != *expected {
                    out.mismatches.push(format!("parameters differ: expected {expected:?}, got {actual:?}"));
                }
            }
        }
        Err(e) => {
            let d = Diagnostic::from(&e);
            match &case.error {
                Some(code) if *code == d.code => {}
                Some(code) => out.mismatches.push(format!("expected {code}, got {}: {}", d.code, d.message)),
                None => out.mismatches.push(format!("unexpected failure {}: {}", d.code, d.message)),
            }
            if let Some(expected) = &case.expression {
                if d.expression.as_deref() != Some(expected.as_str()) {
                    out.mismatches.push(format!(
                        "expected offending expression '{expected}', got {:?}",
                        d.expression
                    ));
                }
            }
            out.failure = Some(d);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const MODEL: &str = r#"
entities:
  - name: Person
    container: People
    set: people
    discriminator: Person
    key: [Id]
    properties:
      - { name: Id, json: id, type: string }
      - { name: Name, type: string, nullable: true }
    owned:
      - name: Address
        kind: reference
        type: Address
        properties:
          - { name: City, type: string }
  - name: Employee
    container: People
    base: Person
    discriminator: Employee
    properties:
      - { name: Salary, type: float }
"#;

    #[test]
    fn model_flattens_and_validates() {
        let model = parse_model(MODEL).unwrap();
        assert_eq!(model.discriminator_property(), DEFAULT_DISCRIMINATOR_PROPERTY);
        let employee = model.entity("Employee").unwrap();
        assert_eq!(employee.key, vec!["Id"]);
        assert_eq!(employee.property("Id").unwrap().json_name, "id");
        assert!(employee.owned_navigation("Address").is_some());
        assert_eq!(model.entity_by_set("people").unwrap().name, "Person");

        let bad = MODEL.replace("type: float", "type: money");
        assert!(matches!(parse_model(&bad), Err(DslError::UnknownType(t)) if t == "money"));
        let keyless = MODEL.replace("key: [Id]", "key: [Nope]");
        assert!(matches!(parse_model(&keyless), Err(DslError::Model(_))));
    }

    #[test]
    fn cases_checked_against_the_planner() {
        let planner = Planner::new(parse_model(MODEL).unwrap(), Default::default());
        let cases = parse_cases(
            r#"
cases:
  - name: by_name
    query: people.Where(p => p.Name == $name)
    captures: { name: Ada }
    sql: |
      SELECT VALUE c
      FROM root c
      WHERE (c["Discriminator"] IN ("Person", "Employee") AND (c["Name"] = @__name_0))
    parameters: { __name_0: Ada }
  - name: point
    query: people.Where(p => p.Id == "ada")
    read_item: ReadItem(None, ada)
  - name: nested
    query: people.Take(5).Where(p => p.Name == "x")
    error: NestedPagingUnsupported
    expression: 'Person.Take(@__p_0).Where(p => p.Name == "x")'
  - name: wrong
    query: people.Count()
    sql: SELECT 1
"#,
        )
        .unwrap();
        let outcomes: Vec<_> = cases.cases.iter().map(|c| check_case(&planner, c)).collect();
        assert!(outcomes[1].passed(), "{:?}", outcomes[1]);
        assert!(outcomes[2].passed(), "{:?}", outcomes[2]);
        assert!(!outcomes[3].passed());
        assert!(outcomes[3].command.as_deref().unwrap().contains("COUNT(1)"));
    }
}
