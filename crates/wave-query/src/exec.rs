//! Per-block statement evaluation: where-clause filtering, selection, and
//! consolidation.

use std::collections::HashMap;

use wave_index::IndexedBlock;
use wave_ssql::{Expr, KeyValue, List, Predicate, Scalar, Statement, Tuple};

use crate::consolidate::consolidate;
use crate::contain::{contain, in_text};
use crate::nested::intersect;
use crate::predicate::{exist, in_float, in_int, no_match, unary_float, unary_int, Matches};
use crate::resultset::ResultSet;
use crate::select::{select, ColData, SelectColumn};

/// Evaluates `stmt` against one block and produces its result set.
pub fn exec(block: &IndexedBlock, stmt: &Statement) -> ResultSet {
    let mut node: HashMap<String, Vec<u8>> = HashMap::new();
    let entities = eval(block, &mut node, stmt);
    if entities.is_empty() {
        return ResultSet::empty();
    }

    let columns: Vec<SelectColumn> = stmt
        .find
        .iter()
        .map(|attr| SelectColumn {
            key: node.get(&attr.name).cloned(),
            name: attr.name.clone(),
            group: attr.group,
            func: attr.func.clone(),
            typ: wave_core::NULL,
            data: ColData::None,
        })
        .collect();

    let columns = select(block, columns, &entities);
    consolidate(block.id, &entities, &columns)
}

fn eval(block: &IndexedBlock, node: &mut HashMap<String, Vec<u8>>, stmt: &Statement) -> Vec<u16> {
    let mut entities: Vec<u16> = (0..block.count() as u32).map(|e| e as u16).collect();
    eval_and(block, node, &stmt.where_, &mut entities);
    entities
}

/// Resolves a tuple's path through the dictionary, caching named bindings
/// for the select stage.
fn get_key(
    block: &IndexedBlock,
    node: &mut HashMap<String, Vec<u8>>,
    tuple: &Tuple,
) -> Option<Vec<u8>> {
    let segments: Vec<&[u8]> = tuple.path.split('/').map(|s| s.as_bytes()).collect();
    match &tuple.name {
        None => block.meta.get_code(&segments),
        Some(name) => {
            if let Some(key) = node.get(name) {
                return Some(key.clone());
            }
            match block.meta.get_code(&segments) {
                Some(key) => {
                    node.insert(name.clone(), key.clone());
                    Some(key)
                }
                None => {
                    tracing::info!(path = %tuple.path, block = block.id, "path does not exist in block");
                    None
                }
            }
        }
    }
}

/// Top-level clauses AND-intersect; a clause with no predicate is selection
/// only and contributes no filter.
fn eval_and(
    block: &IndexedBlock,
    node: &mut HashMap<String, Vec<u8>>,
    exprs: &[Expr],
    entities: &mut Vec<u16>,
) {
    for expr in exprs {
        let selected = match expr {
            Expr::Tuple(tuple) => {
                let key = get_key(block, node, tuple);
                match (&tuple.predicate, key) {
                    (None, _) => continue,
                    (Some(_), None) => no_match().0,
                    (Some(_), Some(key)) => eval_tuple(block, node, &key, tuple).0,
                }
            }
            Expr::Or(members) => eval_or(block, node, members),
        };

        let mut cnt = 0usize;
        let (mut x, mut y) = (0usize, 0usize);
        while x < entities.len() && y < selected.len() {
            match entities[x].cmp(&selected[y]) {
                std::cmp::Ordering::Equal => {
                    entities[cnt] = entities[x];
                    cnt += 1;
                    x += 1;
                    y += 1;
                }
                std::cmp::Ordering::Less => x += 1,
                std::cmp::Ordering::Greater => y += 1,
            }
        }
        entities.truncate(cnt);
        if entities.is_empty() {
            return;
        }
    }
}

/// OR groups union their members.
fn eval_or(block: &IndexedBlock, node: &mut HashMap<String, Vec<u8>>, members: &[Expr]) -> Vec<u16> {
    let mut hits = vec![false; block.count()];
    for expr in members {
        let selected = match expr {
            Expr::Tuple(tuple) => {
                let key = get_key(block, node, tuple);
                match (&tuple.predicate, key) {
                    (None, _) => continue,
                    (Some(_), None) => continue,
                    (Some(_), Some(key)) => eval_tuple(block, node, &key, tuple).0,
                }
            }
            Expr::Or(inner) => eval_or(block, node, inner),
        };
        for e in selected {
            hits[e as usize] = true;
        }
    }

    hits.iter()
        .enumerate()
        .filter(|(_, &hit)| hit)
        .map(|(e, _)| e as u16)
        .collect()
}

fn eval_tuple(
    block: &IndexedBlock,
    node: &mut HashMap<String, Vec<u8>>,
    key: &[u8],
    tuple: &Tuple,
) -> Matches {
    let Some(predicate) = &tuple.predicate else {
        return no_match();
    };
    match predicate {
        Predicate::Nested(inner) => eval_nested(block, node, tuple, inner),
        other => eval_value_predicate(block, key, other),
    }
}

fn eval_value_predicate(block: &IndexedBlock, key: &[u8], predicate: &Predicate) -> Matches {
    match predicate {
        Predicate::Eq(v) => compare(block, key, v, |o| o == std::cmp::Ordering::Equal),
        Predicate::Neq(v) => compare(block, key, v, |o| o != std::cmp::Ordering::Equal),
        Predicate::Gt(v) => compare(block, key, v, |o| o == std::cmp::Ordering::Greater),
        Predicate::Ge(v) => compare(block, key, v, |o| o != std::cmp::Ordering::Less),
        Predicate::Lt(v) => compare(block, key, v, |o| o == std::cmp::Ordering::Less),
        Predicate::Le(v) => compare(block, key, v, |o| o != std::cmp::Ordering::Greater),
        Predicate::Between(x, y) => between(block, key, x, y),
        Predicate::Timeframe(x, y) => {
            let (x, y) = (*x, *y);
            unary_int(block, key, move |v| x <= v && v <= y)
        }
        Predicate::Contain(Scalar::Text(pattern)) => contain(block, key, pattern.as_bytes()),
        Predicate::Contain(_) => {
            tracing::warn!("contain with a non-text literal matches nothing");
            no_match()
        }
        Predicate::Key(value) => {
            let text = match value {
                KeyValue::Text(t) => t.clone(),
                KeyValue::Int(v) => format!("{v:x}"),
            };
            contain(block, key, format!("^{text}$").as_bytes())
        }
        Predicate::In(List::Int(values)) => in_int(block, key, values),
        Predicate::In(List::Float(values)) => in_float(block, key, values),
        Predicate::In(List::Text(values)) => in_text(block, key, values),
        Predicate::Exist => exist(block, key),
        Predicate::Nested(_) => no_match(),
    }
}

/// Routes a scalar comparison to the int or float column of the path; a text
/// operand is a type mismatch and matches nothing.
fn compare(
    block: &IndexedBlock,
    key: &[u8],
    operand: &Scalar,
    keep: impl Fn(std::cmp::Ordering) -> bool,
) -> Matches {
    match operand {
        Scalar::Int(x) => {
            let x = *x;
            unary_int(block, key, move |v| keep(v.cmp(&x)))
        }
        Scalar::Float(x) => {
            let x = *x;
            unary_float(block, key, move |v| match v.partial_cmp(&x) {
                Some(ordering) => keep(ordering),
                None => false,
            })
        }
        Scalar::Text(_) => {
            tracing::warn!("comparison predicate with a text literal matches nothing");
            no_match()
        }
    }
}

fn between(block: &IndexedBlock, key: &[u8], x: &Scalar, y: &Scalar) -> Matches {
    match (x, y) {
        (Scalar::Int(x), Scalar::Int(y)) => {
            let (x, y) = (*x, *y);
            unary_int(block, key, move |v| x <= v && v <= y)
        }
        (x, y) => {
            let to_f = |s: &Scalar| match s {
                Scalar::Int(v) => Some(*v as f64),
                Scalar::Float(v) => Some(*v),
                Scalar::Text(_) => None,
            };
            match (to_f(x), to_f(y)) {
                (Some(x), Some(y)) => unary_float(block, key, move |v| x <= v && v <= y),
                _ => {
                    tracing::warn!("between with a text literal matches nothing");
                    no_match()
                }
            }
        }
    }
}

/// Nested correlation: each inner clause re-resolves against the
/// concatenated path, then intersects on (entity, attribute).
fn eval_nested(
    block: &IndexedBlock,
    node: &mut HashMap<String, Vec<u8>>,
    parent: &Tuple,
    inner: &[Expr],
) -> Matches {
    let mut clauses: Vec<Matches> = Vec::with_capacity(inner.len());
    for expr in inner {
        let Expr::Tuple(tuple) = expr else {
            clauses.push(no_match());
            continue;
        };
        if tuple.predicate.is_none() {
            return no_match();
        }
        let joined = Tuple {
            name: tuple.name.clone(),
            path: format!("{}/{}", parent.path, tuple.path),
            predicate: tuple.predicate.clone(),
        };
        let matches = match (get_key(block, node, &joined), &joined.predicate) {
            (Some(_), Some(Predicate::Nested(_) | Predicate::Timeframe(..) | Predicate::Key(_))) => {
                no_match()
            }
            (Some(key), Some(predicate)) => eval_value_predicate(block, &key, predicate),
            _ => no_match(),
        };
        clauses.push(matches);
    }

    intersect(&clauses)
}
