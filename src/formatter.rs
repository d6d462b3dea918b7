//! Response entity formatting.
//!
//! Applied to every successful backend response, in order: `target` extraction, `allow`/`deny`
//! field filtering, top-level `mapping` renames, then `group` wrapping.

use serde_json::{Map, Value};

use crate::{proxy::Response, spec::FormatterConfig};

type Object = Map<String, Value>;

#[derive(Debug, Clone, PartialEq, Eq)]
enum FieldFilter {
    None,
    Allow(Vec<Vec<String>>),
    Deny(Vec<Vec<String>>),
}

#[derive(Debug, Clone)]
/// Per-route response formatter, built once from the route's [`FormatterConfig`].
pub struct EntityFormatter {
    target: Option<Vec<String>>,
    filter: FieldFilter,
    mapping: Vec<(String, String)>,
    group: Option<String>,
}

fn split_path(path: &str) -> Vec<String> {
    path.split('.').map(str::to_string).collect()
}

fn split_paths(paths: &[String]) -> Vec<Vec<String>> {
    paths
        .iter()
        .filter(|p| !p.is_empty())
        .map(|p| split_path(p))
        .collect()
}

impl EntityFormatter {
    pub fn new(cfg: &FormatterConfig) -> Self {
        let filter = if !cfg.allow.is_empty() {
            FieldFilter::Allow(split_paths(&cfg.allow))
        } else if !cfg.deny.is_empty() {
            FieldFilter::Deny(split_paths(&cfg.deny))
        } else {
            FieldFilter::None
        };

        Self {
            target: cfg
                .target
                .as_deref()
                .filter(|t| !t.is_empty())
                .map(split_path),
            filter,
            mapping: cfg
                .mapping
                .iter()
                .map(|(from, to)| (from.clone(), to.clone()))
                .collect(),
            group: cfg.group.clone().filter(|g| !g.is_empty()),
        }
    }

    pub fn format(&self, mut response: Response) -> Response {
        let mut data = std::mem::take(&mut response.data);

        if let Some(target) = &self.target {
            data = extract_target(data, target);
        }

        match &self.filter {
            FieldFilter::None => {}
            FieldFilter::Allow(paths) => data = allow_fields(&data, paths),
            FieldFilter::Deny(paths) => {
                for path in paths {
                    remove_path(&mut data, path);
                }
            }
        }

        for (from, to) in &self.mapping {
            if let Some(value) = data.remove(from) {
                data.insert(to.clone(), value);
            }
        }

        if let Some(group) = &self.group {
            data = Object::from_iter([(group.clone(), Value::Object(data))]);
        }

        response.data = data;
        response
    }
}

fn extract_target(mut data: Object, path: &[String]) -> Object {
    let Some((first, rest)) = path.split_first() else {
        return data;
    };
    match data.remove(first) {
        Some(Value::Object(inner)) => extract_target(inner, rest),
        _ => Object::new(),
    }
}

fn allow_fields(data: &Object, paths: &[Vec<String>]) -> Object {
    let mut out = Object::new();
    for path in paths {
        if let Some(value) = lookup(data, path) {
            insert_path(&mut out, path, value.clone());
        }
    }
    out
}

fn lookup<'a>(data: &'a Object, path: &[String]) -> Option<&'a Value> {
    let (last, parents) = path.split_last()?;
    let mut current = data;
    for key in parents {
        current = current.get(key)?.as_object()?;
    }
    current.get(last)
}

fn insert_path(out: &mut Object, path: &[String], value: Value) {
    let Some((last, parents)) = path.split_last() else {
        return;
    };
    let mut current = out;
    for key in parents {
        let entry = current
            .entry(key.clone())
            .or_insert_with(|| Value::Object(Object::new()));
        let Value::Object(next) = entry else {
            return;
        };
        current = next;
    }
    current.insert(last.clone(), value);
}

fn remove_path(data: &mut Object, path: &[String]) {
    let Some((last, parents)) = path.split_last() else {
        return;
    };
    let mut current = data;
    for key in parents {
        match current.get_mut(key) {
            Some(Value::Object(next)) => current = next,
            _ => return,
        }
    }
    current.remove(last);
}
