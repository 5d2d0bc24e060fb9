//! Descriptor builders shared by the unit tests of this crate.

use strata_schema::{
    ColumnDescriptor, FunctionArgument, FunctionDescriptor, TableDescriptor, Volatility,
};

pub(crate) fn table(name: &str, columns: &[(&str, &str)]) -> TableDescriptor {
    TableDescriptor {
        name: name.into(),
        columns: columns
            .iter()
            .zip(1..)
            .map(|(&(column, ty), position)| ColumnDescriptor {
                name: column.into(),
                ty: ty.to_string(),
                nullable: false,
                position,
            })
            .collect(),
        primary_key: Vec::new(),
        foreign_keys: Vec::new(),
    }
}

pub(crate) fn function(name: &str, args: &[&str]) -> FunctionDescriptor {
    FunctionDescriptor {
        name: name.into(),
        arguments: args
            .iter()
            .map(|ty| FunctionArgument {
                name: None,
                ty: ty.to_string(),
            })
            .collect(),
        returns_table: None,
        returns_set: false,
        volatility: Volatility::Stable,
    }
}
