//! Expression translation: tree expressions to dialect expressions.

use std::collections::HashMap;

use docql_core::config::EngineConfig;
use docql_core::error::QueryError;
use docql_core::expr::{BinaryOp, Expr, Lambda, UnaryOp};
use docql_core::model::{Model, StructuralType};
use docql_core::schema::{DataType, OwnedKind};
use docql_core::sql::{SqlBinaryOp, SqlExpr, SqlUnaryOp};
use docql_core::types::Scalar;

use super::functions;
use super::shape::{numeric_type, Binding, Shape};
use crate::report;

type Result<T> = std::result::Result<T, QueryError>;

pub(crate) struct Translator<'a> {
    pub(super) model: &'a Model,
    pub(super) config: &'a EngineConfig,
    param_types: &'a HashMap<String, DataType>,
    scope: Vec<(String, Binding)>,
    aliases: Vec<String>,
}

impl<'a> Translator<'a> {
    pub fn new(model: &'a Model, config: &'a EngineConfig, param_types: &'a HashMap<String, DataType>) -> Self {
        Self {
            model,
            config,
            param_types,
            scope: Vec::new(),
            aliases: vec![config.root_alias.clone()],
        }
    }

    /// Reserve an alias derived from `hint` (`o`, `o0`, `o1`, ...).
    pub fn fresh_alias(&mut self, hint: &str) -> String {
        let base = hint
            .chars()
            .find(char::is_ascii_alphabetic)
            .map(|c| c.to_ascii_lowercase().to_string())
            .unwrap_or_else(|| "i".to_string());
        let mut candidate = base.clone();
        let mut n = 0;
        while self.aliases.contains(&candidate) {
            candidate = format!("{base}{n}");
            n += 1;
        }
        self.aliases.push(candidate.clone());
        candidate
    }

    pub fn alias_mark(&self) -> usize {
        self.aliases.len()
    }

    /// Free aliases reserved after `mark`; sibling subqueries reuse them.
    pub fn release_aliases(&mut self, mark: usize) {
        self.aliases.truncate(mark);
    }

    /// Translate a lambda body with its parameters bound to `args`.
    pub fn lambda(&mut self, l: &Lambda, args: &[Binding]) -> Result<Binding> {
        let mark = self.scope.len();
        for (p, b) in l.params.iter().zip(args) {
            self.scope.push((p.clone(), b.clone()));
        }
        let out = self.translate(&l.body);
        self.scope.truncate(mark);
        out
    }

    pub fn predicate(&mut self, l: &Lambda, arg: &Binding) -> Result<SqlExpr> {
        Ok(self.lambda(l, std::slice::from_ref(arg))?.sql)
    }

    pub fn translate(&mut self, e: &Expr) -> Result<Binding> {
        match e {
            Expr::Constant(s) | Expr::Captured { value: s, .. } => Ok(literal(s.clone())),
            Expr::Parameter { name } => {
                let ty = self.param_types.get(name).cloned().unwrap_or(DataType::Json);
                Ok(Binding::scalar(SqlExpr::param(name.clone()), ty))
            }
            Expr::Var(v) => self
                .scope
                .iter()
                .rev()
                .find(|(name, _)| name == v)
                .map(|(_, b)| b.clone())
                .ok_or_else(|| report::unsupported(e, format!("'{v}' is not bound here"))),
            Expr::Member { target, member } => {
                let t = self.translate(target)?;
                self.member(t, member, e)
            }
            Expr::Index { target, index } => {
                let t = self.translate(target)?;
                let i = self.translate(index)?;
                let shape = t.shape.element().unwrap_or(Shape::scalar(DataType::Json));
                Ok(Binding::new(t.sql.index(i.sql), shape))
            }
            Expr::Unary { op, operand } => {
                let o = self.translate(operand)?;
                Ok(match op {
                    UnaryOp::Not => Binding::boolean(SqlExpr::unary(SqlUnaryOp::Not, o.sql)),
                    UnaryOp::Negate => Binding::new(SqlExpr::unary(SqlUnaryOp::Negate, o.sql), o.shape),
                    UnaryOp::BitwiseNot => {
                        Binding::scalar(SqlExpr::unary(SqlUnaryOp::BitwiseNot, o.sql), DataType::Int64)
                    }
                })
            }
            Expr::Binary { op, left, right } => self.binary(*op, left, right, e),
            Expr::Conditional {
                test,
                if_true,
                if_false,
            } => {
                let test = self.translate(test)?;
                let t = self.translate(if_true)?;
                let f = self.translate(if_false)?;
                let shape = if matches!(t.sql, SqlExpr::Literal(Scalar::Null)) {
                    f.shape.clone()
                } else {
                    t.shape.clone()
                };
                Ok(Binding::new(
                    SqlExpr::Conditional {
                        test: Box::new(test.sql),
                        if_true: Box::new(t.sql),
                        if_false: Box::new(f.sql),
                    },
                    shape,
                ))
            }
            Expr::Coalesce { left, right } => {
                let l = self.translate(left)?;
                let r = self.translate(right)?;
                let test = SqlExpr::binary(SqlBinaryOp::NotEqual, l.sql.clone(), SqlExpr::Literal(Scalar::Null));
                Ok(Binding::new(
                    SqlExpr::Conditional {
                        test: Box::new(test),
                        if_true: Box::new(l.sql),
                        if_false: Box::new(r.sql),
                    },
                    l.shape,
                ))
            }
            Expr::Call {
                receiver,
                method,
                args,
            } => {
                let r = match receiver {
                    Some(r) => Some(self.translate(r)?),
                    None => None,
                };
                let args = args
                    .iter()
                    .map(|a| self.translate(a))
                    .collect::<Result<Vec<_>>>()?;
                functions::translate_call(r, method, args, e)
            }
            Expr::New { members } => {
                let mut bound = Vec::with_capacity(members.len());
                for (name, m) in members {
                    bound.push((name.clone(), self.translate(m)?));
                }
                let sql = SqlExpr::Object(bound.iter().map(|(n, b)| (n.clone(), b.sql.clone())).collect());
                Ok(Binding::new(sql, Shape::Object(bound)))
            }
            Expr::Array(items) => {
                let items = items
                    .iter()
                    .map(|i| self.translate(i))
                    .collect::<Result<Vec<_>>>()?;
                let element = items
                    .first()
                    .map(|b| b.shape.clone())
                    .unwrap_or(Shape::scalar(DataType::Json));
                Ok(Binding::new(
                    SqlExpr::Array(items.into_iter().map(|b| b.sql).collect()),
                    Shape::collection_of(element),
                ))
            }
            Expr::Subquery { query, terminal } => self.subquery(query, Some(terminal), e),
            Expr::Collection(query) => self.subquery(query, None, e),
        }
    }

    fn member(&mut self, target: Binding, member: &str, e: &Expr) -> Result<Binding> {
        let found = match &target.shape {
            Shape::Entity { entity } => {
                let st = self
                    .model
                    .entity(entity)
                    .map(StructuralType::Entity)
                    .ok_or_else(|| report::unsupported(e, format!("'{entity}' is not a mapped entity type")))?;
                return self.structural_member(target.sql, st, entity, &[], member, e);
            }
            Shape::Owned { root, path } => {
                let st = self
                    .model
                    .structural_type(root, path)
                    .ok_or_else(|| report::unsupported(e, "unmapped owned structure"))?;
                return self.structural_member(target.sql, st, root, path, member, e);
            }
            Shape::Object(members) => members
                .iter()
                .find(|(name, _)| name == member)
                .map(|(_, b)| b.clone()),
            Shape::Group { key, .. } if member == "Key" => Some((**key).clone()),
            Shape::Group { .. } => None,
            Shape::Collection { .. } => functions::collection_member(&target, member),
            Shape::Scalar { ty: DataType::Json } => {
                Some(Binding::scalar(target.sql.clone().prop(member), DataType::Json))
            }
            Shape::Scalar { .. } => functions::scalar_member(&target, member),
        };
        found.ok_or_else(|| report::unsupported(e, format!("member '{member}' has no translation")))
    }

    fn structural_member(
        &self,
        sql: SqlExpr,
        st: StructuralType<'_>,
        owner: &str,
        path: &[String],
        member: &str,
        e: &Expr,
    ) -> Result<Binding> {
        if let Some(p) = st.property(member) {
            return Ok(Binding::scalar(sql.prop(p.json_name.clone()), p.data_type.clone()));
        }
        if let Some(nav) = st.owned_navigation(member) {
            let mut nested = path.to_vec();
            nested.push(nav.name.clone());
            let owned = Shape::Owned {
                root: owner.to_string(),
                path: nested,
            };
            let shape = match nav.kind {
                OwnedKind::Reference => owned,
                OwnedKind::Collection => Shape::collection_of(owned),
            };
            return Ok(Binding::new(sql.prop(nav.json_name.clone()), shape));
        }
        if let Some(r) = st.reference(member) {
            let existing = self.model.root_of(owner).map_or(owner, |t| t.name.as_str());
            let referenced = self.model.root_of(&r.target).map_or(r.target.as_str(), |t| t.name.as_str());
            return Err(report::multiple_roots(existing, referenced));
        }
        Err(report::unsupported(
            e,
            format!("'{member}' is not a mapped member of '{}'", st.name()),
        ))
    }

    fn binary(&mut self, op: BinaryOp, left: &Expr, right: &Expr, e: &Expr) -> Result<Binding> {
        if op == BinaryOp::OrElse {
            if let Some(folded) = self.fold_in_list(e)? {
                return Ok(folded);
            }
        }
        let l = self.translate(left)?;
        let r = self.translate(right)?;
        let structural = |s: &Shape| s.is_structural() || matches!(s, Shape::Collection { .. });
        if matches!(op, BinaryOp::Equal | BinaryOp::NotEqual) && (structural(&l.shape) || structural(&r.shape)) {
            return self.structural_equality(op, l, r, e);
        }
        let boolean = l.shape.is_boolean() || r.shape.is_boolean();
        let (sql_op, ty) = match op {
            BinaryOp::Add if l.shape.is_string() || r.shape.is_string() => (SqlBinaryOp::Concat, DataType::Utf8),
            BinaryOp::Add => (SqlBinaryOp::Add, numeric_type(&l.shape, &r.shape)),
            BinaryOp::Subtract => (SqlBinaryOp::Subtract, numeric_type(&l.shape, &r.shape)),
            BinaryOp::Multiply => (SqlBinaryOp::Multiply, numeric_type(&l.shape, &r.shape)),
            BinaryOp::Divide => (SqlBinaryOp::Divide, numeric_type(&l.shape, &r.shape)),
            BinaryOp::Modulo => (SqlBinaryOp::Modulo, numeric_type(&l.shape, &r.shape)),
            BinaryOp::Equal => (SqlBinaryOp::Equal, DataType::Boolean),
            BinaryOp::NotEqual => (SqlBinaryOp::NotEqual, DataType::Boolean),
            BinaryOp::LessThan => (SqlBinaryOp::LessThan, DataType::Boolean),
            BinaryOp::LessThanOrEqual => (SqlBinaryOp::LessThanOrEqual, DataType::Boolean),
            BinaryOp::GreaterThan => (SqlBinaryOp::GreaterThan, DataType::Boolean),
            BinaryOp::GreaterThanOrEqual => (SqlBinaryOp::GreaterThanOrEqual, DataType::Boolean),
            BinaryOp::AndAlso => (SqlBinaryOp::And, DataType::Boolean),
            BinaryOp::OrElse => (SqlBinaryOp::Or, DataType::Boolean),
            BinaryOp::And if boolean => (SqlBinaryOp::And, DataType::Boolean),
            BinaryOp::And => (SqlBinaryOp::BitwiseAnd, DataType::Int64),
            BinaryOp::Or if boolean => (SqlBinaryOp::Or, DataType::Boolean),
            BinaryOp::Or => (SqlBinaryOp::BitwiseOr, DataType::Int64),
            BinaryOp::ExclusiveOr if boolean => {
                return Err(report::unsupported(e, "boolean XOR has no translation"));
            }
            BinaryOp::ExclusiveOr => (SqlBinaryOp::BitwiseXor, DataType::Int64),
            BinaryOp::LeftShift => (SqlBinaryOp::LeftShift, DataType::Int64),
            BinaryOp::RightShift => (SqlBinaryOp::RightShift, DataType::Int64),
        };
        Ok(Binding::scalar(SqlExpr::binary(sql_op, l.sql, r.sql), ty))
    }

    /// Entities compare by key within one hierarchy; anything structural
    /// compares to null only.
    fn structural_equality(&self, op: BinaryOp, l: Binding, r: Binding, e: &Expr) -> Result<Binding> {
        let sql_op = if op == BinaryOp::Equal {
            SqlBinaryOp::Equal
        } else {
            SqlBinaryOp::NotEqual
        };
        let is_null = |b: &Binding| matches!(b.sql, SqlExpr::Literal(Scalar::Null));
        if is_null(&l) || is_null(&r) {
            return Ok(Binding::boolean(SqlExpr::binary(sql_op, l.sql, r.sql)));
        }
        let (Shape::Entity { entity: a }, Shape::Entity { entity: b }) = (&l.shape, &r.shape) else {
            return Err(report::unsupported(
                e,
                "owned structures can only be compared to null",
            ));
        };
        let (Some(root_a), Some(root_b)) = (self.model.root_of(a), self.model.root_of(b)) else {
            return Err(report::unsupported(e, "comparison of unmapped entity types"));
        };
        if root_a.name != root_b.name {
            return Err(report::unsupported(
                e,
                format!("'{a}' and '{b}' are unrelated entity types and cannot be compared"),
            ));
        }
        let combine = if op == BinaryOp::Equal {
            SqlBinaryOp::And
        } else {
            SqlBinaryOp::Or
        };
        root_a
            .key_properties()
            .into_iter()
            .map(|p| {
                SqlExpr::binary(
                    sql_op,
                    l.sql.clone().prop(p.json_name.clone()),
                    r.sql.clone().prop(p.json_name.clone()),
                )
            })
            .reduce(|acc, next| SqlExpr::binary(combine, acc, next))
            .map(Binding::boolean)
            .ok_or_else(|| report::unsupported(e, format!("'{}' has no key", root_a.name)))
    }

    /// `x == a || x == b || ...` over one path becomes `x IN (a, b, ...)`.
    fn fold_in_list(&mut self, e: &Expr) -> Result<Option<Binding>> {
        let mut operands = Vec::new();
        flatten_or(e, &mut operands);
        if operands.len() < 2 || operands.len() > self.config.max_in_list_fold {
            return Ok(None);
        }
        let mut item: Option<SqlExpr> = None;
        let mut values = Vec::with_capacity(operands.len());
        for operand in operands {
            let Expr::Binary {
                op: BinaryOp::Equal,
                left,
                right,
            } = operand
            else {
                return Ok(None);
            };
            let (path, value) = if is_bound_value(right) {
                (left, right)
            } else if is_bound_value(left) {
                (right, left)
            } else {
                return Ok(None);
            };
            let p = self.translate(path)?;
            if !p.sql.is_path() || p.shape.is_structural() {
                return Ok(None);
            }
            match &item {
                None => item = Some(p.sql),
                Some(existing) if *existing == p.sql => {}
                Some(_) => return Ok(None),
            }
            values.push(self.translate(value)?.sql);
        }
        Ok(item.map(|item| {
            Binding::boolean(SqlExpr::In {
                item: Box::new(item),
                values,
            })
        }))
    }
}

pub(crate) fn literal(s: Scalar) -> Binding {
    let ty = s.data_type();
    Binding::scalar(SqlExpr::Literal(s), ty)
}

fn flatten_or<'e>(e: &'e Expr, out: &mut Vec<&'e Expr>) {
    match e {
        Expr::Binary {
            op: BinaryOp::OrElse,
            left,
            right,
        } => {
            flatten_or(left, out);
            flatten_or(right, out);
        }
        other => out.push(other),
    }
}

fn is_bound_value(e: &Expr) -> bool {
    match e {
        Expr::Constant(s) => !s.is_null(),
        Expr::Parameter { .. } => true,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docql_core::model::{owned_collection, EntityType, DEFAULT_DISCRIMINATOR_PROPERTY};
    use docql_core::schema::{OwnedType, Property};

    fn model() -> Model {
        let mut customer = EntityType::new("Customer", "Store");
        customer.discriminator_value = Some("Customer".into());
        customer.key = vec!["Id".into()];
        customer.properties = vec![
            Property::new("Id", DataType::Utf8).json("id"),
            Property::new("City", DataType::Utf8),
            Property::new("Age", DataType::Int64),
            Property::new("Active", DataType::Boolean),
        ];
        customer.owned = vec![owned_collection(
            "Orders",
            OwnedType {
                name: "Order".into(),
                properties: vec![Property::new("Total", DataType::Float64)],
                owned: vec![],
            },
        )];
        customer.references = vec![docql_core::schema::ReferenceNavigation {
            name: "Region".into(),
            target: "Region".into(),
        }];
        let mut region = EntityType::new("Region", "Store");
        region.key = vec!["Id".into()];
        region.properties = vec![Property::new("Id", DataType::Utf8).json("id")];
        Model::new(DEFAULT_DISCRIMINATOR_PROPERTY, vec![customer, region]).unwrap()
    }

    fn with_c(e: &Expr) -> Result<String> {
        let model = model();
        let config = EngineConfig::default();
        let types = HashMap::from([("__city_0".to_string(), DataType::Utf8)]);
        let mut t = Translator::new(&model, &config, &types);
        let c = Binding::new(SqlExpr::alias("c"), Shape::Entity { entity: "Customer".into() });
        t.lambda(&Lambda::new("c", e.clone()), &[c]).map(|b| b.sql.to_string())
    }

    fn c(member: &str) -> Expr {
        Expr::var("c").member(member)
    }

    #[test]
    fn members_use_stored_names() {
        assert_eq!(with_c(&c("Id")).unwrap(), r#"c["id"]"#);
        assert_eq!(
            with_c(&c("City").eq(Expr::Parameter { name: "__city_0".into() })).unwrap(),
            r#"(c["City"] = @__city_0)"#
        );
    }

    #[test]
    fn string_plus_is_concatenation() {
        let e = Expr::binary(BinaryOp::Add, c("City"), Expr::constant("!"));
        assert_eq!(with_c(&e).unwrap(), r#"(c["City"] || "!")"#);
        let e = Expr::binary(BinaryOp::Add, c("Age"), Expr::constant(1i64));
        assert_eq!(with_c(&e).unwrap(), r#"(c["Age"] + 1)"#);
    }

    #[test]
    fn or_equalities_fold_into_in() {
        let e = Expr::binary(
            BinaryOp::OrElse,
            Expr::binary(
                BinaryOp::OrElse,
                c("City").eq(Expr::constant("London")),
                c("City").eq(Expr::constant("Berlin")),
            ),
            c("City").eq(Expr::constant("London")),
        );
        assert_eq!(
            with_c(&e).unwrap(),
            r#"c["City"] IN ("London", "Berlin", "London")"#
        );
        let mixed = Expr::binary(
            BinaryOp::OrElse,
            c("City").eq(Expr::constant("London")),
            c("Age").eq(Expr::constant(3i64)),
        );
        assert_eq!(
            with_c(&mixed).unwrap(),
            r#"((c["City"] = "London") OR (c["Age"] = 3))"#
        );
    }

    #[test]
    fn boolean_xor_fails_but_integer_xor_translates() {
        let e = Expr::binary(BinaryOp::ExclusiveOr, c("Active"), Expr::constant(true));
        assert_eq!(with_c(&e).unwrap_err().code(), "CompilationUnsupported");
        let e = Expr::binary(BinaryOp::ExclusiveOr, c("Age"), Expr::constant(1i64));
        assert_eq!(with_c(&e).unwrap(), r#"(c["Age"] ^ 1)"#);
    }

    #[test]
    fn reference_navigation_spans_two_roots() {
        let err = with_c(&c("Region").member("Id")).unwrap_err();
        assert_eq!(
            err,
            QueryError::MultipleRootTypes {
                existing: "Customer".into(),
                referenced: "Region".into()
            }
        );
    }

    #[test]
    fn entity_equality_compares_keys() {
        let e = Expr::var("c").eq(Expr::var("c"));
        assert_eq!(with_c(&e).unwrap(), r#"(c["id"] = c["id"])"#);
        let e = Expr::var("c").eq(Expr::constant(Scalar::Null));
        assert_eq!(with_c(&e).unwrap(), "(c = null)");
        let err = with_c(&c("Orders").eq(c("Orders"))).unwrap_err();
        assert_eq!(err.code(), "CompilationUnsupported");
    }

    #[test]
    fn unknown_member_names_the_expression() {
        let err = with_c(&c("Nope")).unwrap_err();
        assert_eq!(err.expression(), Some("c.Nope"));
    }

    #[test]
    fn aliases_are_unique() {
        let model = model();
        let config = EngineConfig::default();
        let types = HashMap::new();
        let mut t = Translator::new(&model, &config, &types);
        assert_eq!(t.fresh_alias("customer"), "c0");
        assert_eq!(t.fresh_alias("o"), "o");
        let mark = t.alias_mark();
        assert_eq!(t.fresh_alias("order"), "o0");
        t.release_aliases(mark);
        assert_eq!(t.fresh_alias("order"), "o0");
    }
}
