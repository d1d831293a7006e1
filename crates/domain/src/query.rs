//! Query descriptions handed to a [`crate::QueryClient`].
//!
//! These are plain values: building a query performs no I/O. The transport
//! renders [`EntityQuery::relative_path`] and [`EntityQuery::query_options`]
//! into a request URL.

use uuid::Uuid;

use crate::entity::{Entity, PathError};

/// Key addressing a single entity within an entity set.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EntityKey {
    /// A GUID key, rendered unquoted: `Set(6f1e0b2a-...)`.
    Guid(Uuid),
    /// A pre-formatted key literal, rendered verbatim: `Set('ABC')`.
    Literal(String),
}

impl EntityKey {
    /// Derives the key from an entity's reserved `Id` property.
    pub fn from_entity(entity: &Entity) -> Result<Self, PathError> {
        entity.id().map(EntityKey::Guid)
    }

    /// Renders `set(key)`.
    pub fn path(&self, set: &str) -> String {
        format!("{set}({self})")
    }
}

impl std::fmt::Display for EntityKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntityKey::Guid(id) => write!(f, "{id}"),
            EntityKey::Literal(literal) => f.write_str(literal),
        }
    }
}

impl From<Uuid> for EntityKey {
    fn from(id: Uuid) -> Self {
        EntityKey::Guid(id)
    }
}

/// A read query against one entity set.
///
/// Expression strings (`filter`, `select`, ...) are passed through untouched;
/// the query language itself is the service's concern.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EntityQuery {
    set: String,
    key: Option<EntityKey>,
    filter: Option<String>,
    select: Vec<String>,
    expand: Vec<String>,
    order_by: Vec<String>,
    top: Option<u32>,
    skip: Option<u32>,
}

impl EntityQuery {
    /// Starts a query against the entity set `set`.
    pub fn for_set(set: impl Into<String>) -> Self {
        Self {
            set: set.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn key(mut self, key: impl Into<EntityKey>) -> Self {
        self.key = Some(key.into());
        self
    }

    #[must_use]
    pub fn filter(mut self, expression: impl Into<String>) -> Self {
        self.filter = Some(expression.into());
        self
    }

    #[must_use]
    pub fn select<I, S>(mut self, properties: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.select.extend(properties.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn expand<I, S>(mut self, properties: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.expand.extend(properties.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn order_by(mut self, expression: impl Into<String>) -> Self {
        self.order_by.push(expression.into());
        self
    }

    #[must_use]
    pub fn top(mut self, count: u32) -> Self {
        self.top = Some(count);
        self
    }

    #[must_use]
    pub fn skip(mut self, count: u32) -> Self {
        self.skip = Some(count);
        self
    }

    pub fn entity_set(&self) -> &str {
        &self.set
    }

    pub fn entity_key(&self) -> Option<&EntityKey> {
        self.key.as_ref()
    }

    pub fn limit(&self) -> Option<u32> {
        self.top
    }

    /// `Set` or `Set(key)`, relative to the service root.
    pub fn relative_path(&self) -> String {
        match &self.key {
            Some(key) => key.path(&self.set),
            None => self.set.clone(),
        }
    }

    /// System query options in a stable order, unencoded.
    pub fn query_options(&self) -> Vec<(&'static str, String)> {
        let mut options = Vec::new();
        if let Some(filter) = &self.filter {
            options.push(("$filter", filter.clone()));
        }
        if !self.select.is_empty() {
            options.push(("$select", self.select.join(",")));
        }
        if !self.expand.is_empty() {
            options.push(("$expand", self.expand.join(",")));
        }
        if !self.order_by.is_empty() {
            options.push(("$orderby", self.order_by.join(",")));
        }
        if let Some(top) = self.top {
            options.push(("$top", top.to_string()));
        }
        if let Some(skip) = self.skip {
            options.push(("$skip", skip.to_string()));
        }
        options
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_path_and_options() {
        let query = EntityQuery::for_set("General_Products_Products")
            .filter("Active eq true")
            .top(10)
            .expand(["ProductGroup"])
            .select(["PartNumber", "ProductGroup/Code"]);

        assert_eq!(query.relative_path(), "General_Products_Products");
        assert_eq!(
            query.query_options(),
            vec![
                ("$filter", "Active eq true".to_owned()),
                ("$select", "PartNumber,ProductGroup/Code".to_owned()),
                ("$expand", "ProductGroup".to_owned()),
                ("$top", "10".to_owned()),
            ]
        );
    }

    #[test]
    fn guid_keys_render_unquoted() {
        let id = Uuid::parse_str("6f1e0b2a-5f25-4d3c-9b8e-0c9d2a3b4c5d").unwrap();
        let query = EntityQuery::for_set("Crm_Sales_SalesOrders").key(id);
        assert_eq!(
            query.relative_path(),
            "Crm_Sales_SalesOrders(6f1e0b2a-5f25-4d3c-9b8e-0c9d2a3b4c5d)"
        );
    }

    #[test]
    fn key_from_entity_requires_id() {
        assert!(EntityKey::from_entity(&Entity::new()).is_err());
        let id = Uuid::new_v4();
        let entity = Entity::new().with("Id", id.to_string());
        assert_eq!(EntityKey::from_entity(&entity).unwrap(), EntityKey::Guid(id));
    }
}
