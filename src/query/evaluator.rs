//! Expression evaluation
//!
//! Walks parse trees in two passes:
//!
//! 1. every tree is walked without evaluating, collecting all path
//!    expressions it references (template substitutions applied), and
//!    the whole set is fetched in one batched pass
//! 2. every tree is walked again, substituting already-fetched series
//!    for path nodes and dispatching call nodes to the function
//!    registry
//!
//! [`evaluate_targets`] is the preferred entry point: it batches the
//! fetch phase once across all targets of a render request.

use crate::functions::{CallArgs, Value};
use crate::query::ast::ParseNode;
use crate::query::context::RequestContext;
use crate::query::error::{QueryError, QueryResult};
use crate::query::fetch::{fetch_data, DataStore};
use crate::query::parser::parse_target;
use crate::series::TimeSeries;
use futures_util::future::BoxFuture;
use std::collections::{HashMap, HashSet};

/// One template substitution value.
#[derive(Debug, Clone, PartialEq)]
pub enum BindValue {
    Number(f64),
    Str(String),
}

impl BindValue {
    fn as_text(&self) -> String {
        match self {
            BindValue::Number(n) => format!("{}", n),
            BindValue::Str(s) => s.clone(),
        }
    }
}

/// Active template substitutions: positional bindings under `"1"`,
/// `"2"`, ... and named bindings under their name.
pub type TemplateBindings = HashMap<String, BindValue>;

/// Evaluate several targets against one shared fetch pass.
pub async fn evaluate_targets(
    ctx: &RequestContext,
    targets: &[&str],
) -> QueryResult<Vec<TimeSeries>> {
    let mut trees = Vec::with_capacity(targets.len());
    let mut paths: Vec<String> = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();

    for target in targets {
        let tree = parse_target(target)?;
        let mut tree_paths = Vec::new();
        collect_paths(ctx, &tree, None, &mut tree_paths)?;
        for path in tree_paths {
            if seen.insert(path.clone()) {
                paths.push(path);
            }
        }
        trees.push(tree);
    }

    let data_store = fetch_data(ctx, &paths).await?;

    let mut results = Vec::new();
    for tree in &trees {
        let value = eval_node(ctx, tree, &data_store, None).await?;
        results.extend(into_series_list(value)?);
    }
    Ok(results)
}

/// Evaluate a single target, fetching its paths first.
pub async fn evaluate_target(ctx: &RequestContext, target: &str) -> QueryResult<Vec<TimeSeries>> {
    evaluate_targets(ctx, &[target]).await
}

/// Evaluate a single target against an already-populated accumulator.
///
/// Used by fetch-reentrant functions that refetch the same expressions
/// over a different window.
pub async fn evaluate_target_with_store(
    ctx: &RequestContext,
    target: &str,
    data_store: &DataStore,
) -> QueryResult<Vec<TimeSeries>> {
    let tree = parse_target(target)?;
    let value = eval_node(ctx, &tree, data_store, None).await?;
    into_series_list(value)
}

/// All path expressions referenced by a target, with any template
/// substitutions applied; order of first reference, deduplicated by
/// the caller when batching several targets.
pub fn paths_from_target(ctx: &RequestContext, target: &str) -> QueryResult<Vec<String>> {
    let tree = parse_target(target)?;
    let mut paths = Vec::new();
    collect_paths(ctx, &tree, None, &mut paths)?;
    Ok(paths)
}

fn into_series_list(value: Value) -> QueryResult<Vec<TimeSeries>> {
    match value {
        Value::Series(list) => Ok(list),
        other => Err(QueryError::Execution(format!(
            "target evaluated to a {}, not time series",
            other.type_name()
        ))),
    }
}

fn collect_paths(
    ctx: &RequestContext,
    node: &ParseNode,
    bindings: Option<&TemplateBindings>,
    out: &mut Vec<String>,
) -> QueryResult<()> {
    match node {
        ParseNode::Expression(inner) => collect_paths(ctx, inner, bindings, out),
        ParseNode::Path(expr) => {
            if let Substituted::Path(path) = substitute_path(expr, bindings) {
                out.push(path);
            }
            Ok(())
        }
        ParseNode::Call { args, kwargs, .. } => {
            for arg in args {
                collect_paths(ctx, arg, bindings, out)?;
            }
            for (_, value) in kwargs {
                collect_paths(ctx, value, bindings, out)?;
            }
            Ok(())
        }
        ParseNode::Template {
            inner,
            args,
            kwargs,
        } => {
            let merged = template_bindings(ctx, args, kwargs)?;
            collect_paths(ctx, inner, Some(&merged), out)
        }
        ParseNode::Number(_) | ParseNode::Str(_) | ParseNode::Bool(_) => Ok(()),
    }
}

fn eval_node<'a>(
    ctx: &'a RequestContext,
    node: &'a ParseNode,
    data_store: &'a DataStore,
    bindings: Option<&'a TemplateBindings>,
) -> BoxFuture<'a, QueryResult<Value>> {
    Box::pin(async move {
        match node {
            ParseNode::Expression(inner) => eval_node(ctx, inner, data_store, bindings).await,

            ParseNode::Path(expr) => match substitute_path(expr, bindings) {
                Substituted::Value(value) => Ok(Value::Number(value)),
                Substituted::Path(path) => Ok(Value::Series(data_store.get_series_list(&path))),
            },

            ParseNode::Call { name, args, kwargs } => {
                // A template(...) call reaching this branch means the
                // grammar could not recognize it structurally.
                if name == "template" {
                    return Err(QueryError::InvalidTemplate(
                        "template() requires literal substitution arguments".to_string(),
                    ));
                }
                let function = ctx
                    .functions()
                    .get(name)
                    .ok_or_else(|| QueryError::UnknownFunction(name.clone()))?;

                let mut evaluated_args = Vec::with_capacity(args.len());
                for arg in args {
                    evaluated_args.push(eval_node(ctx, arg, data_store, bindings).await?);
                }
                let mut evaluated_kwargs = Vec::with_capacity(kwargs.len());
                for (kw_name, kw_value) in kwargs {
                    let value = eval_node(ctx, kw_value, data_store, bindings).await?;
                    evaluated_kwargs.push((kw_name.clone(), value));
                }

                function
                    .call(ctx, CallArgs::new(name.as_str(), evaluated_args, evaluated_kwargs))
                    .await
            }

            ParseNode::Template {
                inner,
                args,
                kwargs,
            } => {
                let merged = template_bindings(ctx, args, kwargs)?;
                eval_node(ctx, inner, data_store, Some(&merged)).await
            }

            ParseNode::Number(n) => Ok(Value::Number(*n)),
            ParseNode::Str(s) => Ok(Value::Str(s.clone())),
            ParseNode::Bool(b) => Ok(Value::Bool(*b)),
        }
    })
}

/// Build the binding map of one template node: positional arguments
/// bind as `"1"`, `"2"`, ..., named arguments by name, and
/// caller-supplied context overrides win over both.
fn template_bindings(
    ctx: &RequestContext,
    args: &[ParseNode],
    kwargs: &[(String, ParseNode)],
) -> QueryResult<TemplateBindings> {
    let mut bindings = TemplateBindings::new();
    for (i, node) in args.iter().enumerate() {
        bindings.insert((i + 1).to_string(), literal_bind(node)?);
    }
    for (name, node) in kwargs {
        bindings.insert(name.clone(), literal_bind(node)?);
    }
    for (name, value) in &ctx.template {
        bindings.insert(name.clone(), BindValue::Str(value.clone()));
    }
    Ok(bindings)
}

fn literal_bind(node: &ParseNode) -> QueryResult<BindValue> {
    match node {
        ParseNode::Number(n) => Ok(BindValue::Number(*n)),
        ParseNode::Str(s) => Ok(BindValue::Str(s.clone())),
        other => Err(QueryError::InvalidTemplate(format!(
            "substitution arguments must be literals, got {:?}",
            other
        ))),
    }
}

enum Substituted {
    /// The whole expression was one binding holding a numeric value.
    Value(f64),
    Path(String),
}

/// Replace `$name` tokens in a path expression. A substitution that is
/// the entire expression and parses as a number evaluates to that
/// number directly instead of a series lookup.
fn substitute_path(expr: &str, bindings: Option<&TemplateBindings>) -> Substituted {
    let bindings = match bindings {
        Some(b) if !b.is_empty() => b,
        _ => return Substituted::Path(expr.to_string()),
    };

    // Longest names first so `$10` is never clobbered by `$1`.
    let mut names: Vec<&String> = bindings.keys().collect();
    names.sort_by(|a, b| b.len().cmp(&a.len()).then(a.cmp(b)));

    for name in &names {
        if expr == format!("${}", name) {
            let text = bindings[*name].as_text();
            return match text.parse::<f64>() {
                Ok(value) => Substituted::Value(value),
                Err(_) => Substituted::Path(text),
            };
        }
    }

    let mut path = expr.to_string();
    for name in names {
        path = path.replace(&format!("${}", name), &bindings[name].as_text());
    }
    Substituted::Path(path)
}
