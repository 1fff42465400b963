//! Downstream propagation: splice the new serialized version map into the
//! environment-keyed deployment document.
//!
//! The document is owned by another team and reviewed line by line, so the
//! merge is a textual splice rather than a parse-and-reserialize: only the
//! targeted parameter lines change, comments and quoting everywhere else
//! stay byte-identical. The spliced result is re-parsed afterwards to
//! confirm the edit landed where it was supposed to.

use tracing::info;

use crate::config::{EnvironmentTarget, PropagationConfig};
use crate::error::{PipelineError, Result};

/// Result of a merge. `NoopNoChanges` is an expected outcome, not an
/// error: it means every environment was excluded and the document must
/// not be touched at all.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOutcome {
    Updated(String),
    NoopNoChanges,
}

/// Applies the version map to each non-excluded environment target.
pub struct ConfigPropagator<'a> {
    config: &'a PropagationConfig,
}

impl<'a> ConfigPropagator<'a> {
    pub fn new(config: &'a PropagationConfig) -> Self {
        Self { config }
    }

    /// Merge `new_value` into the parameter of every qualifying
    /// environment, in document order. Returns `NoopNoChanges` without
    /// touching the document when no environment qualifies.
    pub fn merge(&self, document: &str, new_value: &str) -> Result<MergeOutcome> {
        if new_value.contains('\n') {
            return Err(PipelineError::MalformedDocument(
                "propagated parameter value must be a single line".to_string(),
            ));
        }

        let targets: Vec<&EnvironmentTarget> = self
            .config
            .environments
            .iter()
            .filter(|env| !self.config.excluded_environments.contains(&env.name))
            .collect();

        if targets.is_empty() {
            info!("every environment is excluded, nothing to propagate");
            return Ok(MergeOutcome::NoopNoChanges);
        }

        let mut lines: Vec<String> = document.lines().map(str::to_string).collect();
        for env in &targets {
            self.splice(&mut lines, env, new_value)?;
            info!(environment = %env.name, "version map spliced into deployment target");
        }

        let mut text = lines.join("\n");
        if document.ends_with('\n') {
            text.push('\n');
        }

        self.check(&text, new_value, &targets)?;
        Ok(MergeOutcome::Updated(text))
    }

    /// Rewrite (or append) the parameter line inside the target item whose
    /// namespace is exactly `{$ref: <env.namespace_ref>}`.
    fn splice(&self, lines: &mut Vec<String>, env: &EnvironmentTarget, value: &str) -> Result<()> {
        let (item_start, field_indent) = find_namespace_anchor(lines, env)?;
        let parameter = &self.config.parameter;

        // Locate the `parameters:` sibling within the same target item.
        let mut params_idx = None;
        let mut idx = item_start + 1;
        while idx < lines.len() {
            let line = &lines[idx];
            if line.trim().is_empty() {
                idx += 1;
                continue;
            }
            let ind = indent_of(line);
            if ind < field_indent {
                break;
            }
            if ind == field_indent && line.trim() == "parameters:" {
                params_idx = Some(idx);
                break;
            }
            idx += 1;
        }
        let params_idx = params_idx.ok_or_else(|| {
            PipelineError::MalformedDocument(format!(
                "deployment target for {} has no parameters block",
                env.name
            ))
        })?;

        // Measure the parameter block: entries sit at its base indent,
        // anything deeper is a value continuation.
        let mut block_end = params_idx + 1;
        let mut entry_indent = None;
        let mut last_entry = params_idx;
        while block_end < lines.len() {
            let line = &lines[block_end];
            if line.trim().is_empty() {
                block_end += 1;
                continue;
            }
            let ind = indent_of(line);
            if ind <= field_indent {
                break;
            }
            if entry_indent.is_none() {
                entry_indent = Some(ind);
            }
            last_entry = block_end;
            block_end += 1;
        }

        let key_prefix = format!("{parameter}:");
        let existing = (params_idx + 1..block_end).find(|&i| {
            let line = &lines[i];
            !line.trim().is_empty()
                && Some(indent_of(line)) == entry_indent
                && line.trim().starts_with(&key_prefix)
        });

        let rendered = |pad: usize| {
            format!(
                "{}{}: '{}'",
                " ".repeat(pad),
                parameter,
                value.replace('\'', "''")
            )
        };

        match existing {
            Some(i) => {
                let pad = indent_of(&lines[i]);
                lines[i] = rendered(pad);
                // Drop continuation lines of the old value.
                while i + 1 < lines.len() {
                    let next = &lines[i + 1];
                    if next.trim().is_empty() || indent_of(next) <= pad {
                        break;
                    }
                    lines.remove(i + 1);
                }
            }
            None => {
                let pad = entry_indent.unwrap_or(field_indent + 2);
                lines.insert(last_entry + 1, rendered(pad));
            }
        }
        Ok(())
    }

    /// Re-parse the spliced document and confirm every qualifying target
    /// carries the new value.
    fn check(&self, text: &str, new_value: &str, targets: &[&EnvironmentTarget]) -> Result<()> {
        let doc: serde_yaml::Value = serde_yaml::from_str(text)?;
        let templates = doc
            .get("resourceTemplates")
            .and_then(|v| v.as_sequence())
            .cloned()
            .unwrap_or_default();

        for env in targets {
            let merged = templates.iter().any(|template| {
                template
                    .get("targets")
                    .and_then(|v| v.as_sequence())
                    .is_some_and(|items| {
                        items.iter().any(|target| {
                            target
                                .get("namespace")
                                .and_then(|ns| ns.get("$ref"))
                                .and_then(|r| r.as_str())
                                == Some(env.namespace_ref.as_str())
                                && target
                                    .get("parameters")
                                    .and_then(|p| p.get(self.config.parameter.as_str()))
                                    .and_then(|v| v.as_str())
                                    == Some(new_value)
                        })
                    })
            });
            if !merged {
                return Err(PipelineError::MalformedDocument(format!(
                    "merged document failed verification for environment {}",
                    env.name
                )));
            }
        }
        Ok(())
    }
}

fn indent_of(line: &str) -> usize {
    line.len() - line.trim_start().len()
}

/// Find the single target item whose namespace mapping is exactly
/// `{$ref: <env.namespace_ref>}`. Returns the index of the `namespace:`
/// key line and the indent of the item's fields. Zero or several matches
/// are both malformed.
fn find_namespace_anchor(lines: &[String], env: &EnvironmentTarget) -> Result<(usize, usize)> {
    let accepted = [
        format!("$ref: {}", env.namespace_ref),
        format!("$ref: '{}'", env.namespace_ref),
        format!("$ref: \"{}\"", env.namespace_ref),
    ];

    let mut anchors = Vec::new();
    for (i, line) in lines.iter().enumerate() {
        let trimmed = line.trim();
        if !accepted.iter().any(|form| trimmed == form) {
            continue;
        }
        let ref_indent = indent_of(line);

        // The $ref must be the first key of a bare `namespace:` mapping.
        let parent = (0..i).rev().find(|&j| !lines[j].trim().is_empty());
        let Some(parent_idx) = parent else { continue };
        let parent_line = &lines[parent_idx];
        if indent_of(parent_line) >= ref_indent {
            continue;
        }
        let parent_trimmed = parent_line.trim();
        if parent_trimmed != "namespace:" && parent_trimmed != "- namespace:" {
            continue;
        }
        let Some(field_indent) = parent_line.find("namespace:") else {
            continue;
        };

        // And its only key: the next content line must leave the mapping.
        let sole_key = lines[i + 1..]
            .iter()
            .find(|after| !after.trim().is_empty())
            .map_or(true, |after| indent_of(after) <= field_indent);
        if !sole_key {
            continue;
        }

        anchors.push((parent_idx, field_indent));
    }

    match anchors.len() {
        0 => Err(PipelineError::MalformedDocument(format!(
            "no deployment target with namespace {}",
            env.namespace_ref
        ))),
        1 => Ok(anchors[0]),
        _ => Err(PipelineError::MalformedDocument(format!(
            "multiple deployment targets with namespace {}",
            env.namespace_ref
        ))),
    }
}
