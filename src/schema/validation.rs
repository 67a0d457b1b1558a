use lazy_static::lazy_static;
use regex::Regex;
use std::collections::HashSet;

use crate::config::EntityConfig;
use crate::error::{AppError, AppResult};
use crate::schema::definitions::{CardinalityKind, RelationDescriptor};

lazy_static! {
    /// Names end up quoted inside generated SQL, so only plain identifiers pass
    static ref IDENTIFIER: Regex = Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap();
}

pub fn is_valid_identifier(name: &str) -> bool {
    IDENTIFIER.is_match(name)
}

fn require_identifier(context: &str, name: &str) -> AppResult<()> {
    if is_valid_identifier(name) {
        Ok(())
    } else {
        Err(AppError::Configuration(format!(
            "{}: '{}' is not a valid identifier",
            context, name
        )))
    }
}

/// Validate schema metadata before it is turned into a snapshot
pub fn validate_entities(entities: &[EntityConfig]) -> AppResult<()> {
    let mut names = HashSet::new();
    for entity in entities {
        if !names.insert(entity.name.as_str()) {
            return Err(AppError::Configuration(format!(
                "Entity '{}' declared more than once",
                entity.name
            )));
        }
    }

    for entity in entities {
        let descriptor = entity.descriptor();
        require_identifier("entity name", &entity.name)?;
        require_identifier(&format!("table of '{}'", entity.name), &descriptor.table)?;
        require_identifier(
            &format!("primary key of '{}'", entity.name),
            &entity.primary_key,
        )?;

        for field in &entity.fields {
            require_identifier(&format!("field of '{}'", entity.name), field)?;
        }

        if !entity
            .fields
            .iter()
            .any(|f| f.eq_ignore_ascii_case(&entity.primary_key))
        {
            return Err(AppError::Configuration(format!(
                "Primary key '{}' of '{}' is not a declared field",
                entity.primary_key, entity.name
            )));
        }

        let mut relation_names = HashSet::new();
        for relation in &entity.relations {
            if !relation_names.insert(relation.name.as_str()) {
                return Err(AppError::Configuration(format!(
                    "Relation '{}' declared more than once on '{}'",
                    relation.name, entity.name
                )));
            }
            if !names.contains(relation.related.as_str()) {
                return Err(AppError::Configuration(format!(
                    "Relation '{}.{}' points at undeclared entity '{}'",
                    entity.name, relation.name, relation.related
                )));
            }
            validate_relation(&entity.name, relation)?;
        }
    }

    Ok(())
}

fn validate_relation(entity: &str, relation: &RelationDescriptor) -> AppResult<()> {
    let context = format!("relation '{}.{}'", entity, relation.name);
    require_identifier(&context, &relation.name)?;
    require_identifier(&context, &relation.foreign_key)?;
    require_identifier(&context, &relation.owner_key)?;

    match (&relation.intermediate_table, relation.kind.requires_intermediate_table()) {
        (Some(table), true) => require_identifier(&context, table)?,
        (None, true) => {
            return Err(AppError::Configuration(format!(
                "{} of kind {} requires intermediate_table",
                context, relation.kind
            )))
        }
        (Some(_), false) => {
            return Err(AppError::Configuration(format!(
                "{} of kind {} does not use intermediate_table",
                context, relation.kind
            )))
        }
        (None, false) => {}
    }

    if let Some(key) = &relation.intermediate_key {
        if relation.kind != CardinalityKind::ThroughMany {
            return Err(AppError::Configuration(format!(
                "{} of kind {} does not use intermediate_key",
                context, relation.kind
            )));
        }
        require_identifier(&context, key)?;
    }

    match (&relation.morph_type, relation.kind.is_polymorphic()) {
        (Some(column), true) => require_identifier(&context, column)?,
        (None, true) => {
            return Err(AppError::Configuration(format!(
                "{} of kind {} requires morph_type",
                context, relation.kind
            )))
        }
        (Some(_), false) => {
            return Err(AppError::Configuration(format!(
                "{} of kind {} does not use morph_type",
                context, relation.kind
            )))
        }
        (None, false) => {}
    }

    Ok(())
}
