//! Node and property commands
//!
//! Every command opens the repository home, logs into one workspace and,
//! for mutations, saves before returning.

use std::path::PathBuf;

use anyhow::{Context as _, Result};
use serde::Serialize;

use super::output::Output;
use crate::item::{PropertyId, PropertyRecord, PropertyType, Value};
use crate::session::{Repository, Session};
use crate::storage::RepositoryHome;

/// Where a command runs
pub struct Target {
    pub home: Option<PathBuf>,
    pub workspace: Option<String>,
}

impl Target {
    fn repository(&self, output: &Output) -> Result<Repository> {
        let home = match &self.home {
            Some(root) => RepositoryHome::open(root)?,
            None => RepositoryHome::open_current()?,
        };
        output.verbose_ctx("home", &format!("Using repository at {}", home.root().display()));
        Repository::open_home(&home)
    }

    fn session(&self, output: &Output) -> Result<Session> {
        let repo = self.repository(output)?;
        let session = repo
            .login(self.workspace.as_deref())
            .context("Failed to open session")?;
        output.verbose_ctx("session", &format!("Logged into workspace '{}'", session.workspace()));
        Ok(session)
    }
}

#[derive(Serialize)]
struct PropertyView {
    name: String,
    #[serde(rename = "type")]
    kind: PropertyType,
    multiple: bool,
    values: Vec<String>,
}

#[derive(Serialize)]
struct NodeView {
    path: String,
    primary_type: String,
    children: Vec<String>,
    properties: Vec<PropertyView>,
}

fn display_value(session: &Session, value: &Value) -> String {
    match value {
        Value::Name(name) => session.factory().format_name(name),
        Value::Path(path) => session.format(path),
        other => other.to_string(),
    }
}

fn property_view(session: &mut Session, id: PropertyId) -> Result<PropertyView> {
    let path = session.path_of(id)?;
    let record = session.value(id)?;
    let session = &*session;
    let name = path
        .name()
        .map(|n| session.factory().format_name(n))
        .unwrap_or_default();
    Ok(PropertyView {
        name,
        kind: record.kind,
        multiple: record.multiple,
        values: record.values.iter().map(|v| display_value(session, v)).collect(),
    })
}

fn print_property(output: &Output, view: &PropertyView) {
    let values = if view.multiple {
        format!("[{}]", view.values.join(", "))
    } else {
        view.values.join(", ")
    };
    output.row(&[&format!("  {}", view.name), view.kind.as_str(), &values]);
}

pub fn workspaces(target: &Target, output: &Output) -> Result<()> {
    let repo = target.repository(output)?;
    let names = repo.workspaces()?;

    if output.is_json() {
        output.data(&serde_json::json!({
            "default": repo.default_workspace(),
            "workspaces": names,
        }));
        return Ok(());
    }
    for name in &names {
        let marker = if name == repo.default_workspace() { "*" } else { " " };
        output.line(&format!("{} {}", marker, name));
    }
    Ok(())
}

pub fn list(target: &Target, output: &Output, path: &str) -> Result<()> {
    let mut session = target.session(output)?;
    let node = session.node(path)?;
    let node_path = session.path_of(node)?;

    let children = session
        .child_paths(node)?
        .iter()
        .map(|p| session.format(p))
        .collect::<Vec<_>>();
    let mut properties = Vec::new();
    for id in session.properties(node)? {
        properties.push(property_view(&mut session, id)?);
    }
    let view = NodeView {
        path: session.format(&node_path),
        primary_type: session.factory().format_name(&session.primary_type(node)?),
        children,
        properties,
    };

    if output.is_json() {
        output.data(&view);
        return Ok(());
    }
    output.line(&format!("{} [{}]", view.path, view.primary_type));
    for child in &view.children {
        output.line(&format!("  {}/", child));
    }
    for property in &view.properties {
        print_property(output, property);
    }
    Ok(())
}

pub fn get(target: &Target, output: &Output, path: &str) -> Result<()> {
    let mut session = target.session(output)?;
    let id = session.property(path)?;
    let view = property_view(&mut session, id)?;

    if output.is_json() {
        output.data(&view);
    } else {
        for value in &view.values {
            output.line(value);
        }
    }
    Ok(())
}

pub fn add(target: &Target, output: &Output, path: &str, primary_type: Option<&str>) -> Result<()> {
    let mut session = target.session(output)?;
    let node = session.add_node(path, primary_type)?;
    let added = session.format(&session.path_of(node)?);
    session.save()?;

    output.success(&format!("Added {}", added));
    Ok(())
}

pub fn set(
    target: &Target,
    output: &Output,
    path: &str,
    values: &[String],
    kind: &str,
    multi: bool,
) -> Result<()> {
    let mut session = target.session(output)?;
    let kind = match kind.parse::<PropertyType>()? {
        PropertyType::Undefined => PropertyType::String,
        other => other,
    };
    let mut parsed = values
        .iter()
        .map(|v| Value::parse(kind, v, session.factory()))
        .collect::<crate::error::Result<Vec<_>>>()?;

    let record = if !multi && parsed.len() == 1 {
        PropertyRecord::single(parsed.remove(0))
    } else {
        PropertyRecord::multiple(kind, parsed)?
    };
    let id = session.set_property(path, record)?;
    let set = session.format(&session.path_of(id)?);
    session.save()?;

    output.success(&format!("Set {}", set));
    Ok(())
}

pub fn remove(target: &Target, output: &Output, path: &str) -> Result<()> {
    let mut session = target.session(output)?;
    session.remove(path)?;
    session.save()?;

    output.success(&format!("Removed {}", path));
    Ok(())
}

pub fn move_node(target: &Target, output: &Output, from: &str, to: &str) -> Result<()> {
    let mut session = target.session(output)?;
    let landed = session.move_node(from, to)?;

    output.success(&format!("Moved {} to {}", from, session.format(&landed)));
    Ok(())
}
