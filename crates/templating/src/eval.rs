//! Template execution.

use crate::error::TemplateError;
use crate::parse::{Arg, Command, Node, Pipeline, parse};
use crate::value::Value;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use futures::future::BoxFuture;
use std::collections::HashMap;
use tracing::warn;

/// Nested `template`/`render` calls allowed before execution fails.
const MAX_DEPTH: usize = 16;

/// Functions backed by something outside the template, such as the datastore.
#[async_trait::async_trait]
pub trait FunctionHost: Send + Sync {
    /// Call `name`. Unknown names yield `None`.
    async fn call(&self, name: &str, args: Vec<Value>) -> Option<Result<Value, TemplateError>>;
}

/// Named, parsed templates.
#[derive(Debug, Clone, Default)]
pub struct TemplateSet {
    templates: HashMap<String, Vec<Node>>,
}

impl TemplateSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse and add `text` under `name`, replacing any previous one.
    pub fn add(&mut self, name: &str, text: &str) -> Result<(), TemplateError> {
        let nodes = parse(name, text)?;
        self.templates.insert(name.to_string(), nodes);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&[Node]> {
        self.templates.get(name).map(Vec::as_slice)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.templates.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.templates.keys().map(String::as_str)
    }
}

type Vars = Vec<(String, Value)>;

/// Executes templates from one or more sets, searched in order.
pub struct Renderer<'a> {
    sets: Vec<&'a TemplateSet>,
    host: &'a dyn FunctionHost,
    root: Value,
}

impl std::fmt::Debug for Renderer<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Renderer").field("root", &self.root).finish_non_exhaustive()
    }
}

impl<'a> Renderer<'a> {
    pub fn new(sets: Vec<&'a TemplateSet>, host: &'a dyn FunctionHost, root: Value) -> Self {
        Self { sets, host, root }
    }

    /// Render `name` with the root data.
    pub async fn render(&self, name: &str) -> Result<String, TemplateError> {
        self.render_with(name, &self.root, 0).await
    }

    fn lookup(&self, name: &str) -> Option<&'a [Node]> {
        self.sets.iter().find_map(|set| set.get(name))
    }

    fn render_with<'b>(&'b self, name: &'b str, dot: &'b Value, depth: usize) -> BoxFuture<'b, Result<String, TemplateError>> {
        Box::pin(async move {
            if depth >= MAX_DEPTH {
                return Err(TemplateError::Execute(format!(
                    "exceeded maximum template depth ({}) at {:?}",
                    MAX_DEPTH, name
                )));
            }
            let nodes = self
                .lookup(name)
                .ok_or_else(|| TemplateError::NotFound(name.to_string()))?;
            let mut out = String::new();
            let mut vars = Vars::new();
            self.exec(nodes, dot, &mut vars, &mut out, depth + 1).await?;
            Ok(out)
        })
    }

    /// Render a sub-template for a function; failures become empty output.
    async fn render_quiet(&self, name: &str, depth: usize) -> String {
        match self.render_with(name, &self.root, depth).await {
            Ok(text) => text,
            Err(e) => {
                warn!("Sub-template {} failed: {}", name, e);
                String::new()
            }
        }
    }

    fn exec<'b>(
        &'b self,
        nodes: &'b [Node],
        dot: &'b Value,
        vars: &'b mut Vars,
        out: &'b mut String,
        depth: usize,
    ) -> BoxFuture<'b, Result<(), TemplateError>> {
        Box::pin(async move {
            let scope = vars.len();
            for node in nodes {
                match node {
                    Node::Text(text) => out.push_str(text),
                    Node::Action(pipeline) => {
                        let value = self.eval_pipeline(pipeline, dot, vars, depth).await?;
                        match &pipeline.declare {
                            Some(name) => vars.push((name.clone(), value)),
                            None => out.push_str(&value.to_string()),
                        }
                    }
                    Node::If { branches, otherwise } => {
                        let mut chosen = otherwise.as_slice();
                        for (cond, body) in branches {
                            if self.eval_pipeline(cond, dot, vars, depth).await?.is_truthy() {
                                chosen = body;
                                break;
                            }
                        }
                        self.exec(chosen, dot, vars, out, depth).await?;
                    }
                    Node::Range {
                        key,
                        element,
                        pipeline,
                        body,
                        otherwise,
                    } => {
                        let items = range_items(self.eval_pipeline(pipeline, dot, vars, depth).await?)?;
                        if items.is_empty() {
                            self.exec(otherwise, dot, vars, out, depth).await?;
                        }
                        for (k, item) in items {
                            let mark = vars.len();
                            if let Some(name) = key {
                                vars.push((name.clone(), k));
                            }
                            if let Some(name) = element {
                                vars.push((name.clone(), item.clone()));
                            }
                            self.exec(body, &item, vars, out, depth).await?;
                            vars.truncate(mark);
                        }
                    }
                    Node::Template { name, pipeline } => {
                        let data = match pipeline {
                            Some(p) => self.eval_pipeline(p, dot, vars, depth).await?,
                            None => Value::Nil,
                        };
                        let text = self.render_with(name, &data, depth).await?;
                        out.push_str(&text);
                    }
                }
            }
            vars.truncate(scope);
            Ok(())
        })
    }

    fn eval_pipeline<'b>(
        &'b self,
        pipeline: &'b Pipeline,
        dot: &'b Value,
        vars: &'b Vars,
        depth: usize,
    ) -> BoxFuture<'b, Result<Value, TemplateError>> {
        Box::pin(async move {
            let mut piped: Option<Value> = None;
            for command in &pipeline.commands {
                piped = Some(self.eval_command(command, dot, vars, piped, depth).await?);
            }
            Ok(piped.unwrap_or_default())
        })
    }

    async fn eval_command(
        &self,
        command: &Command,
        dot: &Value,
        vars: &Vars,
        piped: Option<Value>,
        depth: usize,
    ) -> Result<Value, TemplateError> {
        let (first, rest) = command
            .args
            .split_first()
            .ok_or_else(|| TemplateError::Execute("empty command".to_string()))?;

        if let Arg::Function(name) = first {
            let mut args = Vec::with_capacity(rest.len() + 1);
            for arg in rest {
                args.push(self.eval_arg(arg, dot, vars, depth).await?);
            }
            args.extend(piped);
            return self.call(name, args, depth).await;
        }

        if !rest.is_empty() || piped.is_some() {
            return Err(TemplateError::Execute("can't give argument to non-function".to_string()));
        }
        self.eval_arg(first, dot, vars, depth).await
    }

    async fn eval_arg(&self, arg: &Arg, dot: &Value, vars: &Vars, depth: usize) -> Result<Value, TemplateError> {
        match arg {
            Arg::Field(path) => walk(dot.clone(), path),
            Arg::Variable(name, path) => {
                let base = if name.is_empty() {
                    self.root.clone()
                } else {
                    vars.iter()
                        .rev()
                        .find(|(n, _)| n == name)
                        .map(|(_, v)| v.clone())
                        .ok_or_else(|| TemplateError::Execute(format!("undefined variable: ${}", name)))?
                };
                walk(base, path)
            }
            Arg::Str(s) => Ok(Value::Str(s.clone())),
            Arg::Int(n) => Ok(Value::Int(*n)),
            Arg::Bool(b) => Ok(Value::Bool(*b)),
            Arg::Nil => Ok(Value::Nil),
            Arg::Function(name) => self.call(name, Vec::new(), depth).await,
            Arg::Sub(pipeline) => self.eval_pipeline(pipeline, dot, vars, depth).await,
        }
    }

    async fn call(&self, name: &str, args: Vec<Value>, depth: usize) -> Result<Value, TemplateError> {
        let text = |i: usize| args.get(i).map(ToString::to_string).unwrap_or_default();
        match name {
            "render" => {
                arity(name, &args, 1)?;
                Ok(Value::Str(self.render_quiet(&text(0), depth).await))
            }
            "b64template" => {
                arity(name, &args, 1)?;
                let rendered = self.render_quiet(&text(0), depth).await;
                Ok(Value::Str(STANDARD.encode(rendered)))
            }
            "b64" => {
                arity(name, &args, 1)?;
                Ok(Value::Str(STANDARD.encode(text(0))))
            }
            "pathSplit" => {
                arity(name, &args, 1)?;
                let path = text(0);
                let base = path.trim_end_matches('/').rsplit('/').next().unwrap_or_default();
                Ok(Value::Str(base.to_string()))
            }
            "join" => Ok(Value::Str(args.iter().map(ToString::to_string).collect())),
            "eq" => {
                if args.len() < 2 {
                    return Err(TemplateError::Execute("eq: missing argument for comparison".to_string()));
                }
                Ok(Value::Bool(args[1..].iter().any(|other| loosely_equal(&args[0], other))))
            }
            "ne" => {
                arity(name, &args, 2)?;
                Ok(Value::Bool(!loosely_equal(&args[0], &args[1])))
            }
            "not" => {
                arity(name, &args, 1)?;
                Ok(Value::Bool(!args[0].is_truthy()))
            }
            "and" => Ok(args
                .iter()
                .find(|v| !v.is_truthy())
                .or(args.last())
                .cloned()
                .unwrap_or_default()),
            "or" => Ok(args
                .iter()
                .find(|v| v.is_truthy())
                .or(args.last())
                .cloned()
                .unwrap_or_default()),
            "len" => {
                arity(name, &args, 1)?;
                let n = match &args[0] {
                    Value::Str(s) => s.len(),
                    Value::List(items) => items.len(),
                    Value::Map(map) => map.len(),
                    Value::Nil => 0,
                    other => {
                        return Err(TemplateError::Execute(format!("len of {}", other.kind())));
                    }
                };
                Ok(Value::Int(i64::try_from(n).unwrap_or(i64::MAX)))
            }
            _ => match self.host.call(name, args).await {
                Some(result) => result,
                None => Err(TemplateError::Execute(format!("function {:?} not defined", name))),
            },
        }
    }
}

fn arity(name: &str, args: &[Value], expected: usize) -> Result<(), TemplateError> {
    if args.len() == expected {
        Ok(())
    } else {
        Err(TemplateError::Execute(format!(
            "wrong number of args for {}: want {} got {}",
            name,
            expected,
            args.len()
        )))
    }
}

fn walk(mut value: Value, path: &[String]) -> Result<Value, TemplateError> {
    for field in path {
        value = value.field(field).map_err(TemplateError::Execute)?;
    }
    Ok(value)
}

/// Strings and numbers compare by their printed form.
fn loosely_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Int(_) | Value::Str(_), Value::Int(_) | Value::Str(_)) => a.to_string() == b.to_string(),
        _ => a == b,
    }
}

fn range_items(value: Value) -> Result<Vec<(Value, Value)>, TemplateError> {
    match value {
        Value::Nil => Ok(Vec::new()),
        Value::List(items) => Ok(items
            .into_iter()
            .enumerate()
            .map(|(i, v)| (Value::Int(i64::try_from(i).unwrap_or(i64::MAX)), v))
            .collect()),
        Value::Map(map) => Ok(map.into_iter().map(|(k, v)| (Value::Str(k), v)).collect()),
        other => Err(TemplateError::Execute(format!("range can't iterate over {}", other.kind()))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    struct Lookup;

    #[async_trait::async_trait]
    impl FunctionHost for Lookup {
        async fn call(&self, name: &str, args: Vec<Value>) -> Option<Result<Value, TemplateError>> {
            match name {
                "cluster_variable" => Some(Ok(match args.first().map(ToString::to_string).as_deref() {
                    Some("coreos-version") => Value::from("1068.2.0"),
                    _ => Value::from(""),
                })),
                "array_variable" => Some(Ok(Value::from(vec!["k1".to_string(), "k2".to_string()]))),
                _ => None,
            }
        }
    }

    fn root() -> Value {
        let mut map = BTreeMap::new();
        map.insert("Mac".to_string(), Value::from("aa:bb:cc:dd:ee:ff"));
        map.insert("Hostname".to_string(), Value::from("node1"));
        Value::Map(map)
    }

    async fn render(templates: &[(&str, &str)], name: &str) -> Result<String, TemplateError> {
        let mut set = TemplateSet::new();
        for (n, text) in templates {
            set.add(n, text).unwrap();
        }
        let host = Lookup;
        Renderer::new(vec![&set], &host, root()).render(name).await
    }

    #[tokio::test]
    async fn test_fields_and_functions() {
        let out = render(
            &[("main", r#"{{ .Hostname }} {{ cluster_variable "coreos-version" }} {{ join .Mac "!" }}"#)],
            "main",
        )
        .await
        .unwrap();
        assert_eq!(out, "node1 1068.2.0 aa:bb:cc:dd:ee:ff!");
    }

    #[tokio::test]
    async fn test_pipe_appends_argument() {
        let out = render(&[("main", r#"{{ "hi" | b64 }} {{ "/a/b/c.txt" | pathSplit }}"#)], "main")
            .await
            .unwrap();
        assert_eq!(out, "aGk= c.txt");
    }

    #[tokio::test]
    async fn test_range_and_variables() {
        let out = render(
            &[(
                "main",
                r#"{{ $keys := array_variable "ssh" }}{{ range $i, $k := $keys }}{{ $i }}={{ $k }};{{ end }}{{ range .Missing }}x{{ else }}none{{ end }}"#,
            )],
            "main",
        )
        .await
        .unwrap();
        assert_eq!(out, "0=k1;1=k2;none");
    }

    #[tokio::test]
    async fn test_if_chain() {
        let text = r#"{{ if eq .Hostname "x" }}x{{ else if not .Missing }}missing{{ else }}other{{ end }}"#;
        assert_eq!(render(&[("main", text)], "main").await.unwrap(), "missing");
    }

    #[tokio::test]
    async fn test_render_and_b64template() {
        let out = render(
            &[
                ("main", r#"[{{ render "part" }}] {{ b64template "part" }} [{{ render "absent" }}]"#),
                ("part", "host={{ .Hostname }}"),
            ],
            "main",
        )
        .await
        .unwrap();
        assert_eq!(out, format!("[host=node1] {} []", STANDARD.encode("host=node1")));
    }

    #[tokio::test]
    async fn test_failing_sub_template_is_empty() {
        let out = render(&[("main", r#"a{{ render "bad" }}b"#), ("bad", "{{ nope }}")], "main")
            .await
            .unwrap();
        assert_eq!(out, "ab");
    }

    #[tokio::test]
    async fn test_template_action_passes_data() {
        let out = render(
            &[("main", r#"{{ template "inner" .Hostname }}"#), ("inner", "<{{ . }}>")],
            "main",
        )
        .await
        .unwrap();
        assert_eq!(out, "<node1>");
    }

    #[tokio::test]
    async fn test_unknown_function_fails() {
        let err = render(&[("main", "{{ launch_missiles }}")], "main").await.unwrap_err();
        assert!(matches!(err, TemplateError::Execute(_)));
    }

    #[tokio::test]
    async fn test_recursion_is_bounded() {
        let err = render(&[("main", r#"{{ template "main" }}"#)], "main").await.unwrap_err();
        assert!(matches!(err, TemplateError::Execute(_)));
    }
}
