//! Named type definitions reachable from the registry.

use crate::error::BuildError;
use crate::types::{EnumDef, RecordDef, TypeDescriptor};
use std::collections::BTreeMap;

/// A named record or enum.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Definition {
    Record(RecordDef),
    Enum(EnumDef),
}

impl Definition {
    pub fn name(&self) -> &str {
        match self {
            Definition::Record(def) => &def.name,
            Definition::Enum(def) => &def.name,
        }
    }

    /// Names of the definitions this one mentions, in field order.
    pub fn dependencies(&self) -> Vec<&str> {
        let mut out = Vec::new();
        if let Definition::Record(def) = self {
            for field in &def.fields {
                collect_names(&field.ty, &mut out);
            }
        }
        out
    }
}

fn collect_names<'a>(ty: &'a TypeDescriptor, out: &mut Vec<&'a str>) {
    if let Some(name) = ty.type_name() {
        if !out.contains(&name) {
            out.push(name);
        }
        // A record's own fields belong to its definition, not to the parent.
        return;
    }
    for child in ty.children() {
        collect_names(child, out);
    }
}

/// All named definitions, keyed and iterated by name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Definitions {
    defs: BTreeMap<String, Definition>,
    owners: BTreeMap<String, String>,
}

impl Definitions {
    pub fn get(&self, name: &str) -> Option<&Definition> {
        self.defs.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.defs.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.defs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.defs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Definition> {
        self.defs.values()
    }

    /// Record every record and enum reachable from `ty`.
    ///
    /// `owner` names where the type was found, for error messages.
    pub fn collect(&mut self, owner: &str, ty: &TypeDescriptor) -> Result<(), BuildError> {
        match ty {
            TypeDescriptor::Record(def) => {
                if self.insert(owner, Definition::Record(def.clone()))? {
                    for field in &def.fields {
                        let owner = format!("record '{}' field '{}'", def.name, field.name);
                        self.collect(&owner, &field.ty)?;
                    }
                }
                Ok(())
            }
            TypeDescriptor::Enum(def) => {
                self.insert(owner, Definition::Enum(def.clone()))?;
                Ok(())
            }
            other => {
                for child in other.children() {
                    self.collect(owner, child)?;
                }
                Ok(())
            }
        }
    }

    /// Returns `true` when the definition is new.
    fn insert(&mut self, owner: &str, def: Definition) -> Result<bool, BuildError> {
        match self.defs.get(def.name()) {
            Some(existing) if *existing == def => Ok(false),
            Some(_) => Err(BuildError::ConflictingDefinition {
                name: def.name().to_string(),
                first: self.owners.get(def.name()).cloned().unwrap_or_default(),
                second: owner.to_string(),
            }),
            None => {
                self.owners.insert(def.name().to_string(), owner.to_string());
                self.defs.insert(def.name().to_string(), def);
                Ok(true)
            }
        }
    }

    /// Every by-name reference inside `ty` must resolve.
    pub fn check_references(&self, owner: &str, ty: &TypeDescriptor) -> Result<(), BuildError> {
        if let TypeDescriptor::Reference(name) = ty
            && !self.contains(name)
        {
            return Err(BuildError::UnresolvedReference {
                owner: owner.to_string(),
                name: name.clone(),
            });
        }
        for child in ty.children() {
            self.check_references(owner, child)?;
        }
        Ok(())
    }

    /// Check references held by the definitions themselves.
    pub fn check_all_references(&self) -> Result<(), BuildError> {
        for def in self.defs.values() {
            if let Definition::Record(record) = def {
                for field in &record.fields {
                    let owner = format!("record '{}' field '{}'", record.name, field.name);
                    self.check_references(&owner, &field.ty)?;
                }
            }
        }
        Ok(())
    }
}

/// Reject `Stream` anywhere inside `ty`.
pub fn reject_streams(owner: &str, path: &str, ty: &TypeDescriptor) -> Result<(), BuildError> {
    if let TypeDescriptor::Stream(_) = ty {
        return Err(BuildError::Unrepresentable {
            owner: owner.to_string(),
            path: path.to_string(),
        });
    }
    if let TypeDescriptor::Record(def) = ty {
        for field in &def.fields {
            reject_streams(owner, &format!("{path}.{}", field.name), &field.ty)?;
        }
        return Ok(());
    }
    for child in ty.children() {
        reject_streams(owner, path, child)?;
    }
    Ok(())
}
