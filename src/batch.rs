//! One-to-many and many-to-many comparison reports.
//!
//! A report serializes as one JSON array: a metadata entry, then the matches
//! ranked by similarity, then any pairs that failed.

use serde::ser::{SerializeSeq, Serializer};
use serde::Serialize;

use crate::compare::{compare_two_faces, Comparison};
use crate::context::ServiceContext;
use crate::error::{Error, Result};
use crate::normalize;

#[derive(Debug, Clone, Serialize)]
pub struct BatchMetadata {
    pub mode: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    pub requested: u64,
    pub valid: u64,
    pub invalid_names: Vec<String>,
    pub comparisons: u64,
    pub matches: u64,
    pub errors: u64,
    #[serde(serialize_with = "normalize::scalar")]
    pub tolerance: f32,
}

#[derive(Debug, Clone, Serialize)]
pub struct PairError {
    pub person1: String,
    pub person2: String,
    pub error: String,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum BatchEntry<'a> {
    Metadata(&'a BatchMetadata),
    Result(&'a Comparison),
    Error(&'a PairError),
}

#[derive(Debug, Clone)]
pub struct BatchReport {
    pub metadata: BatchMetadata,
    pub results: Vec<Comparison>,
    pub errors: Vec<PairError>,
}

impl Serialize for BatchReport {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(1 + self.results.len() + self.errors.len()))?;
        seq.serialize_element(&BatchEntry::Metadata(&self.metadata))?;
        for result in &self.results {
            seq.serialize_element(&BatchEntry::Result(result))?;
        }
        for error in &self.errors {
            seq.serialize_element(&BatchEntry::Error(error))?;
        }
        seq.end()
    }
}

/// Split a comma separated name list, dropping blanks.
pub fn parse_names(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect()
}

fn partition_known(ctx: &ServiceContext, names: Vec<String>) -> (Vec<String>, Vec<String>) {
    names
        .into_iter()
        .partition(|name| ctx.registry.contains_name(name))
}

struct Run {
    results: Vec<Comparison>,
    errors: Vec<PairError>,
    comparisons: u64,
}

fn run_pairs<'a>(
    ctx: &ServiceContext,
    pairs: impl Iterator<Item = (&'a str, &'a str)>,
    tolerance: f32,
) -> Run {
    let mut run = Run {
        results: Vec::new(),
        errors: Vec::new(),
        comparisons: 0,
    };
    for (a, b) in pairs {
        run.comparisons += 1;
        match compare_two_faces(ctx, a, b) {
            Ok(comparison) if comparison.similarity >= tolerance => run.results.push(comparison),
            Ok(_) => {}
            Err(e) => {
                log::warn!("comparing '{a}' with '{b}' failed: {e}");
                run.errors.push(PairError {
                    person1: a.to_string(),
                    person2: b.to_string(),
                    error: e.to_string(),
                });
            }
        }
    }
    run.results.sort_by(|x, y| y.similarity.total_cmp(&x.similarity));
    run
}

/// Compare `target` against each name in the comma separated `comparisons`.
pub fn batch_one_to_many(
    ctx: &ServiceContext,
    target: &str,
    comparisons: &str,
    tolerance: f32,
) -> Result<BatchReport> {
    let target = target.trim();
    if target.is_empty() {
        return Err(Error::validation("a target person is required"));
    }
    let names = parse_names(comparisons);
    if names.is_empty() {
        return Err(Error::validation(
            "comparison people must be a comma separated list of names",
        ));
    }
    if !ctx.registry.contains_name(target) {
        return Err(Error::Validation {
            message: format!("unknown target person '{target}'"),
            invalid: vec![target.to_string()],
        });
    }

    let requested = names.len() as u64;
    let (valid, invalid) = partition_known(ctx, names);
    if valid.is_empty() {
        return Err(Error::Validation {
            message: "none of the comparison people are known".to_string(),
            invalid,
        });
    }

    let run = run_pairs(ctx, valid.iter().map(|name| (target, name.as_str())), tolerance);
    log::info!(
        "one-to-many for '{target}': {} of {} pairs matched",
        run.results.len(),
        run.comparisons
    );

    Ok(BatchReport {
        metadata: BatchMetadata {
            mode: "one_to_many",
            target: Some(target.to_string()),
            requested,
            valid: valid.len() as u64,
            invalid_names: invalid,
            comparisons: run.comparisons,
            matches: run.results.len() as u64,
            errors: run.errors.len() as u64,
            tolerance,
        },
        results: run.results,
        errors: run.errors,
    })
}

/// Compare every name in `group1` with every name in `group2`, skipping a
/// name paired with itself.
pub fn batch_many_to_many(
    ctx: &ServiceContext,
    group1: &str,
    group2: &str,
    tolerance: f32,
) -> Result<BatchReport> {
    let names1 = parse_names(group1);
    let names2 = parse_names(group2);
    if names1.is_empty() || names2.is_empty() {
        return Err(Error::validation(
            "both groups must be comma separated lists of names",
        ));
    }

    let requested = (names1.len() + names2.len()) as u64;
    let (valid1, invalid1) = partition_known(ctx, names1);
    let (valid2, invalid2) = partition_known(ctx, names2);
    let mut invalid = invalid1;
    for name in invalid2 {
        if !invalid.contains(&name) {
            invalid.push(name);
        }
    }
    if valid1.is_empty() || valid2.is_empty() {
        return Err(Error::Validation {
            message: "each group needs at least one known person".to_string(),
            invalid,
        });
    }

    let pairs = valid1.iter().flat_map(|a| {
        valid2
            .iter()
            .filter(move |b| *b != a)
            .map(move |b| (a.as_str(), b.as_str()))
    });
    let run = run_pairs(ctx, pairs, tolerance);
    log::info!(
        "many-to-many: {} of {} pairs matched",
        run.results.len(),
        run.comparisons
    );

    Ok(BatchReport {
        metadata: BatchMetadata {
            mode: "many_to_many",
            target: None,
            requested,
            valid: (valid1.len() + valid2.len()) as u64,
            invalid_names: invalid,
            comparisons: run.comparisons,
            matches: run.results.len() as u64,
            errors: run.errors.len() as u64,
            tolerance,
        },
        results: run.results,
        errors: run.errors,
    })
}
