//! Path string syntax
//!
//! ```text
//! path      := "/" | ["/"] segment ("/" segment)*
//! segment   := "." | ".." | name ["[" index "]"]
//! name      := local | prefix ":" local | "{" uri "}" local
//! ```
//!
//! Slashes inside a `{uri}` escape do not split segments.

use super::component::Component;
use super::name::NamespaceMapper;
use crate::error::{Result, StoreError};

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Step {
    Current,
    Parent,
    Child(Component),
}

/// Splits a path string into steps. Returns whether it was absolute.
pub(crate) fn tokenize(input: &str, mapper: &dyn NamespaceMapper) -> Result<(bool, Vec<Step>)> {
    if input.is_empty() {
        return Err(StoreError::invalid_path(input, "empty path"));
    }
    if input == "/" {
        return Ok((true, Vec::new()));
    }

    let absolute = input.starts_with('/');
    let body = if absolute { &input[1..] } else { input };

    split_segments(input, body)?
        .into_iter()
        .map(|segment| parse_segment(input, segment, mapper))
        .collect::<Result<Vec<_>>>()
        .map(|steps| (absolute, steps))
}

fn split_segments<'a>(input: &str, body: &'a str) -> Result<Vec<&'a str>> {
    let mut segments = Vec::new();
    let mut start = 0;
    let mut in_escape = false;

    for (i, c) in body.char_indices() {
        match c {
            '{' if !in_escape => in_escape = true,
            '}' if in_escape => in_escape = false,
            '/' if !in_escape => {
                segments.push(&body[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    if in_escape {
        return Err(StoreError::invalid_path(input, "unterminated namespace escape"));
    }
    segments.push(&body[start..]);

    if segments.iter().any(|s| s.is_empty()) {
        return Err(StoreError::invalid_path(input, "empty path segment"));
    }
    Ok(segments)
}

fn parse_segment(input: &str, segment: &str, mapper: &dyn NamespaceMapper) -> Result<Step> {
    match segment {
        "." => return Ok(Step::Current),
        ".." => return Ok(Step::Parent),
        _ => {}
    }

    // The index bracket can only follow the namespace escape, never sit inside it
    let name_start = segment.rfind('}').map(|i| i + 1).unwrap_or(0);
    let (name_part, index) = match segment[name_start..].find('[') {
        Some(rel) => {
            let open = name_start + rel;
            let digits = segment[open + 1..]
                .strip_suffix(']')
                .ok_or_else(|| StoreError::invalid_path(input, "unterminated index"))?;
            let index: u32 = digits.parse().map_err(|_| {
                StoreError::invalid_path(input, format!("invalid index '{}'", digits))
            })?;
            (&segment[..open], index)
        }
        None => (segment, 1),
    };

    if name_part == "." || name_part == ".." {
        return Err(StoreError::invalid_path(input, "'.' and '..' take no index"));
    }

    let name = mapper.to_qualified(name_part).map_err(|e| match e {
        StoreError::InvalidPath { reason, .. } => StoreError::invalid_path(input, reason),
        other => other,
    })?;
    Component::new(name, index)
        .map(Step::Child)
        .map_err(|_| StoreError::invalid_path(input, "same-name-sibling indices start at 1"))
}

/// Applies steps on top of `base`. `..` may never pop below `floor`
/// components.
pub(crate) fn apply(
    input: &str,
    base: &[Component],
    floor: usize,
    steps: Vec<Step>,
) -> Result<Vec<Component>> {
    let mut components = base.to_vec();
    for step in steps {
        match step {
            Step::Current => {}
            Step::Parent => {
                if components.len() <= floor {
                    let reason = if floor == 0 {
                        "'..' ascends past the root"
                    } else {
                        "'..' ascends past the start of the relative path"
                    };
                    return Err(StoreError::invalid_path(input, reason));
                }
                components.pop();
            }
            Step::Child(c) => components.push(c),
        }
    }
    Ok(components)
}

/// Renders components with prefixed names
pub(crate) fn format(components: &[Component], absolute: bool, mapper: &dyn NamespaceMapper) -> String {
    let rendered: Vec<String> = components
        .iter()
        .map(|c| {
            let name = mapper.to_prefixed(c.name());
            if c.index() > 1 {
                format!("{}[{}]", name, c.index())
            } else {
                name
            }
        })
        .collect();

    match (absolute, rendered.is_empty()) {
        (true, _) => format!("/{}", rendered.join("/")),
        (false, true) => ".".to_string(),
        (false, false) => rendered.join("/"),
    }
}
