//! Typed names for the entities declared in a metadata document.
//!
//! Every name is a transparent string newtype so that a `TableName` can never
//! be passed where a `ColumnName` is expected, while still serializing as a
//! plain JSON string (and therefore as a JSON object key).

use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;

macro_rules! name_type {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Creates a name from any string-like value.
            pub fn new(name: impl Into<String>) -> Self {
                Self(name.into())
            }

            /// Returns the name as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{:?}", self.0)
            }
        }

        impl From<&str> for $name {
            fn from(name: &str) -> Self {
                Self(name.to_string())
            }
        }

        impl From<String> for $name {
            fn from(name: String) -> Self {
                Self(name)
            }
        }

        impl Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }
    };
}

name_type!(
    /// Name of a backing data source (e.g. `default`).
    SourceName
);
name_type!(
    /// Name of a table inside a data source.
    TableName
);
name_type!(
    /// Name of a column of a table.
    ColumnName
);
name_type!(
    /// Name of an object or array relationship declared on a table.
    RelationshipName
);
name_type!(
    /// Name of a computed field declared on a table.
    ComputedFieldName
);
name_type!(
    /// Name of a role used in permissions.
    RoleName
);
name_type!(
    /// Name of a stored function inside a data source.
    FunctionName
);
name_type!(
    /// Name of an event trigger or a scheduled (cron) trigger.
    TriggerName
);
name_type!(
    /// Name of a remote service (remote schema).
    RemoteSchemaName
);
name_type!(
    /// Name of an action.
    ActionName
);
name_type!(
    /// Name of a custom or builtin GraphQL type.
    TypeName
);
name_type!(
    /// Name of a query collection.
    CollectionName
);
name_type!(
    /// Name of a foreign-key constraint.
    ConstraintName
);

impl RoleName {
    /// The implicit role that bypasses all permissions.
    pub const ADMIN: &'static str = "admin";

    /// Returns the admin role.
    pub fn admin() -> Self {
        Self::new(Self::ADMIN)
    }

    /// Returns `true` if this is the admin role.
    pub fn is_admin(&self) -> bool {
        self.0 == Self::ADMIN
    }
}
