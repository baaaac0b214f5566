//! TypeScript rendering of descriptors, definitions and callables.

use super::GenerateError;
use crate::naming::{to_client_key, to_pascal_case};
use crate::registry::{Command, CommandKind, Param};
use crate::schema::{Definition, Definitions};
use crate::socket::SocketHandler;
use crate::types::{EnumDef, Primitive, RecordDef, TypeDescriptor};
use std::fmt::Write;

const INDENT: &str = "    ";

pub(super) struct Renderer<'a> {
    defs: &'a Definitions,
}

impl<'a> Renderer<'a> {
    pub(super) fn new(defs: &'a Definitions) -> Self {
        Self { defs }
    }

    /// Map a descriptor to a TypeScript type expression. Streams are only
    /// valid where the caller handles them itself.
    pub(super) fn ty(
        &self,
        owner: &str,
        path: &str,
        ty: &TypeDescriptor,
    ) -> Result<String, GenerateError> {
        Ok(match ty {
            TypeDescriptor::Primitive(p) => primitive(*p).to_string(),
            TypeDescriptor::Optional(inner) => {
                let inner = self.ty(owner, path, inner)?;
                if inner == "null" || inner.ends_with(" | null") || inner == "unknown" {
                    inner
                } else {
                    format!("{inner} | null")
                }
            }
            TypeDescriptor::Sequence(element) => {
                let element = self.ty(owner, &format!("{path}[]"), element)?;
                if element.contains(" | ") {
                    format!("({element})[]")
                } else {
                    format!("{element}[]")
                }
            }
            TypeDescriptor::Mapping(key, value) => {
                let key = match **key {
                    TypeDescriptor::Primitive(Primitive::Integer | Primitive::Float) => "number",
                    _ => "string",
                };
                let value = self.ty(owner, &format!("{path}{{}}"), value)?;
                format!("Record<{key}, {value}>")
            }
            TypeDescriptor::Tuple(items) => {
                let items = items
                    .iter()
                    .enumerate()
                    .map(|(i, item)| self.ty(owner, &format!("{path}[{i}]"), item))
                    .collect::<Result<Vec<_>, _>>()?;
                format!("[{}]", items.join(", "))
            }
            TypeDescriptor::Record(RecordDef { name, .. })
            | TypeDescriptor::Enum(EnumDef { name, .. }) => name.clone(),
            TypeDescriptor::Reference(name) => {
                if !self.defs.contains(name) {
                    return Err(GenerateError::UnresolvedReference {
                        owner: owner.to_string(),
                        name: name.clone(),
                    });
                }
                name.clone()
            }
            TypeDescriptor::Union(members) => {
                let mut rendered: Vec<String> = Vec::with_capacity(members.len());
                for member in members {
                    let member = self.ty(owner, path, member)?;
                    if !rendered.contains(&member) {
                        rendered.push(member);
                    }
                }
                if rendered.is_empty() {
                    "never".to_string()
                } else {
                    rendered.join(" | ")
                }
            }
            TypeDescriptor::Stream(_) => {
                return Err(GenerateError::Unrepresentable {
                    owner: owner.to_string(),
                    path: path.to_string(),
                });
            }
        })
    }

    pub(super) fn definition(&self, def: &Definition) -> Result<String, GenerateError> {
        match def {
            Definition::Record(record) => self.record(record),
            Definition::Enum(def) => Ok(enumeration(def)),
        }
    }

    fn record(&self, def: &RecordDef) -> Result<String, GenerateError> {
        let mut out = String::new();
        doc_block(&mut out, def.doc.as_deref());
        let _ = writeln!(out, "export interface {} {{", def.name);
        let owner = format!("record '{}'", def.name);
        for field in &def.fields {
            if let Some(description) = &field.description {
                let _ = writeln!(out, "{INDENT}/** {} */", comment_text(description.trim()));
            }
            let ty = self.ty(&owner, &field.name, &field.ty)?;
            let mark = if field.may_be_absent() { "?" } else { "" };
            let _ = writeln!(
                out,
                "{INDENT}{}{mark}: {ty};",
                property_key(&to_client_key(&field.name))
            );
        }
        out.push('}');
        Ok(out)
    }

    pub(super) fn command(&self, command: &Command) -> Result<String, GenerateError> {
        let owner = format!("command '{}'", command.name());
        let mut out = String::new();
        doc_block(&mut out, command.doc());

        let fn_name = to_client_key(command.name());
        let params = self.params(&owner, command.params())?;
        let call_args = if params.is_empty() { "{}" } else { "args" };

        match command.kind() {
            CommandKind::Unary => {
                let returns = match self.ty(&owner, "return", command.returns_type())?.as_str() {
                    "null" => "void".to_string(),
                    other => other.to_string(),
                };
                let _ = writeln!(
                    out,
                    "export async function {fn_name}({params}): Promise<{returns}> {{"
                );
                let _ = writeln!(out, "{INDENT}return request(\"{}\", {call_args});", command.name());
            }
            CommandKind::Stream => {
                let payload = command.payload_type().ok_or_else(|| {
                    GenerateError::Unrepresentable {
                        owner: owner.clone(),
                        path: "payload".to_string(),
                    }
                })?;
                let payload = self.ty(&owner, "payload", payload)?;
                let _ = writeln!(
                    out,
                    "export function {fn_name}({params}): BridgeChannel<{payload}> {{"
                );
                let _ = writeln!(
                    out,
                    "{INDENT}return createChannel(\"{}\", {call_args});",
                    command.name()
                );
            }
        }
        out.push('}');
        Ok(out)
    }

    /// `args: { userId: number; limit?: number }`, or nothing.
    fn params(&self, owner: &str, params: &[Param]) -> Result<String, GenerateError> {
        if params.is_empty() {
            return Ok(String::new());
        }
        let mut fields = Vec::with_capacity(params.len());
        for param in params {
            let ty = self.ty(owner, &param.name, &param.ty)?;
            let mark = if param.is_required() { "" } else { "?" };
            fields.push(format!(
                "{}{mark}: {ty}",
                property_key(&to_client_key(&param.name))
            ));
        }
        let default = if params.iter().any(Param::is_required) {
            ""
        } else {
            " = {}"
        };
        Ok(format!("args: {{ {} }}{default}", fields.join("; ")))
    }

    pub(super) fn socket(&self, socket: &SocketHandler) -> Result<String, GenerateError> {
        let base = to_pascal_case(socket.name());
        let server = format!("{base}ServerEvents");
        let client = format!("{base}ClientEvents");
        let owner = format!("socket '{}'", socket.name());

        let mut out = String::new();
        self.events(&mut out, &owner, &server, socket.server_events())?;
        out.push_str("\n\n");
        self.events(&mut out, &owner, &client, socket.client_events())?;
        out.push_str("\n\n");
        doc_block(&mut out, socket.doc());
        let _ = writeln!(
            out,
            "export function {}(): BridgeSocket<{server}, {client}> {{",
            to_client_key(socket.name())
        );
        let _ = writeln!(out, "{INDENT}return createSocket(\"{}\");", socket.name());
        out.push('}');
        Ok(out)
    }

    fn events<'e>(
        &self,
        out: &mut String,
        owner: &str,
        name: &str,
        events: impl Iterator<Item = (&'e str, &'e TypeDescriptor)>,
    ) -> Result<(), GenerateError> {
        let _ = writeln!(out, "export interface {name} {{");
        for (event, ty) in events {
            let ty = self.ty(owner, event, ty)?;
            let _ = writeln!(out, "{INDENT}{}: {ty};", property_key(event));
        }
        out.push('}');
        Ok(())
    }
}

fn primitive(p: Primitive) -> &'static str {
    match p {
        Primitive::String | Primitive::Bytes => "string",
        Primitive::Integer | Primitive::Float => "number",
        Primitive::Boolean => "boolean",
        Primitive::Null => "null",
        Primitive::Unknown => "unknown",
    }
}

fn enumeration(def: &EnumDef) -> String {
    let mut out = String::new();
    doc_block(&mut out, def.doc.as_deref());
    let variants = if def.variants.is_empty() {
        "never".to_string()
    } else {
        def.variants
            .iter()
            .map(|v| string_literal(v))
            .collect::<Vec<_>>()
            .join(" | ")
    };
    let _ = write!(out, "export type {} = {variants};", def.name);
    out
}

fn doc_block(out: &mut String, doc: Option<&str>) {
    let Some(doc) = doc.map(str::trim).filter(|d| !d.is_empty()) else {
        return;
    };
    out.push_str("/**\n");
    for line in doc.lines() {
        let line = line.trim();
        if line.is_empty() {
            out.push_str(" *\n");
        } else {
            let _ = writeln!(out, " * {}", comment_text(line));
        }
    }
    out.push_str(" */\n");
}

/// Keep user text from terminating the surrounding block comment.
fn comment_text(text: &str) -> String {
    text.replace("*/", "*\\/")
}

fn string_literal(s: &str) -> String {
    serde_json::Value::String(s.to_string()).to_string()
}

fn property_key(key: &str) -> String {
    let mut chars = key.chars();
    let ident = match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == '$' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
        }
        _ => false,
    };
    if ident {
        key.to_string()
    } else {
        string_literal(key)
    }
}
