//! What a translated expression denotes, beyond its dialect text.

use docql_core::plan::ResultShape;
use docql_core::schema::DataType;
use docql_core::sql::SqlExpr;

#[derive(Debug, Clone, PartialEq)]
pub enum Shape {
    /// A root document.
    Entity { entity: String },
    /// An owned structure below `root` (an entity type name).
    Owned { root: String, path: Vec<String> },
    /// An owned collection.
    Collection { element: Box<Shape> },
    Scalar { ty: DataType },
    /// Projected anonymous object; members keep their own bindings so later
    /// operators can reach through the projection.
    Object(Vec<(String, Binding)>),
    /// Result of GroupBy: usable only through its key and aggregates.
    Group { key: Box<Binding>, element: Box<Binding> },
}

impl Shape {
    pub fn scalar(ty: DataType) -> Self {
        Shape::Scalar { ty }
    }

    pub fn is_structural(&self) -> bool {
        matches!(self, Shape::Entity { .. } | Shape::Owned { .. })
    }

    pub fn data_type(&self) -> Option<&DataType> {
        match self {
            Shape::Scalar { ty } => Some(ty),
            _ => None,
        }
    }

    pub fn is_boolean(&self) -> bool {
        self.data_type() == Some(&DataType::Boolean)
    }

    pub fn is_string(&self) -> bool {
        self.data_type().is_some_and(DataType::is_string)
    }

    /// Element shape when this denotes something iterable.
    pub fn element(&self) -> Option<Shape> {
        match self {
            Shape::Collection { element } => Some((**element).clone()),
            Shape::Scalar {
                ty: DataType::Array(e),
            } => Some(Shape::scalar((**e).clone())),
            Shape::Scalar { ty: DataType::Json } => Some(Shape::scalar(DataType::Json)),
            _ => None,
        }
    }

    /// Shape of a collection of `element`.
    pub fn collection_of(element: Shape) -> Shape {
        match element {
            Shape::Scalar { ty } => Shape::scalar(DataType::Array(Box::new(ty))),
            other => Shape::Collection {
                element: Box::new(other),
            },
        }
    }

    pub fn result_shape(&self) -> ResultShape {
        match self {
            Shape::Entity { entity } => ResultShape::Entity {
                entity: entity.clone(),
            },
            Shape::Owned { root, path } => ResultShape::Owned {
                root: root.clone(),
                path: path.clone(),
            },
            Shape::Collection { element } => ResultShape::Array(Box::new(element.result_shape())),
            Shape::Scalar { .. } | Shape::Group { .. } => ResultShape::Value,
            Shape::Object(members) => ResultShape::Object(
                members
                    .iter()
                    .map(|(name, b)| (name.clone(), b.shape.result_shape()))
                    .collect(),
            ),
        }
    }
}

/// A translated expression.
#[derive(Debug, Clone, PartialEq)]
pub struct Binding {
    pub sql: SqlExpr,
    pub shape: Shape,
}

impl Binding {
    pub fn new(sql: SqlExpr, shape: Shape) -> Self {
        Self { sql, shape }
    }

    pub fn scalar(sql: SqlExpr, ty: DataType) -> Self {
        Self::new(sql, Shape::scalar(ty))
    }

    pub fn boolean(sql: SqlExpr) -> Self {
        Self::scalar(sql, DataType::Boolean)
    }
}

/// Numeric result type of arithmetic over two operands.
pub fn numeric_type(l: &Shape, r: &Shape) -> DataType {
    match (l.data_type(), r.data_type()) {
        (Some(DataType::Float64), _) | (_, Some(DataType::Float64)) => DataType::Float64,
        (Some(DataType::Int64), Some(DataType::Int64)) => DataType::Int64,
        (Some(DataType::Int64), _) | (_, Some(DataType::Int64)) => DataType::Int64,
        _ => DataType::Json,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nested_result_shapes() {
        let orders = Shape::collection_of(Shape::Owned {
            root: "Customer".into(),
            path: vec!["Orders".into()],
        });
        let obj = Shape::Object(vec![
            ("Id".into(), Binding::scalar(SqlExpr::alias("c"), DataType::Utf8)),
            ("Orders".into(), Binding::new(SqlExpr::alias("c"), orders)),
        ]);
        assert_eq!(
            obj.result_shape(),
            ResultShape::Object(vec![
                ("Id".into(), ResultShape::Value),
                (
                    "Orders".into(),
                    ResultShape::Array(Box::new(ResultShape::Owned {
                        root: "Customer".into(),
                        path: vec!["Orders".into()]
                    }))
                ),
            ])
        );
    }

    #[test]
    fn scalar_collections_stay_typed() {
        let tags = Shape::collection_of(Shape::scalar(DataType::Utf8));
        assert_eq!(tags, Shape::scalar(DataType::Array(Box::new(DataType::Utf8))));
        assert_eq!(tags.element(), Some(Shape::scalar(DataType::Utf8)));
        assert_eq!(numeric_type(&Shape::scalar(DataType::Int64), &tags), DataType::Int64);
    }
}
