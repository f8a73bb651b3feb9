//! Template parser.
//!
//! Text with `{{ ... }}` actions. Supported actions: pipelines of function
//! calls and operands, `$x := pipeline` declarations, `if`/`else if`/`else`,
//! `range` with optional `$i, $e :=` variables, `template "name" pipeline`,
//! and `/* comments */`. A `{{-` or `-}}` marker trims the whitespace next to
//! the action.

use crate::error::TemplateError;

/// One parsed template body.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Text(String),
    /// Print the pipeline, or bind it when it declares a variable
    Action(Pipeline),
    If {
        branches: Vec<(Pipeline, Vec<Node>)>,
        otherwise: Vec<Node>,
    },
    Range {
        key: Option<String>,
        element: Option<String>,
        pipeline: Pipeline,
        body: Vec<Node>,
        otherwise: Vec<Node>,
    },
    Template {
        name: String,
        pipeline: Option<Pipeline>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Pipeline {
    pub declare: Option<String>,
    pub commands: Vec<Command>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    pub args: Vec<Arg>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Arg {
    /// `.a.b`; empty for `.`
    Field(Vec<String>),
    /// `$x.a`; `$` alone is the root data
    Variable(String, Vec<String>),
    Str(String),
    Int(i64),
    Bool(bool),
    Nil,
    Function(String),
    Sub(Pipeline),
}

#[derive(Debug)]
enum Item {
    Text(String),
    Action { body: String, line: usize },
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Field(Vec<String>),
    Variable(String, Vec<String>),
    Str(String),
    Int(i64),
    LParen,
    RParen,
    Pipe,
    Declare,
    Comma,
}

/// Parse `text` into nodes. `name` is only used in error messages.
pub fn parse(name: &str, text: &str) -> Result<Vec<Node>, TemplateError> {
    let items = scan(name, text)?;
    let mut parser = Parser { name, items, pos: 0 };
    let (nodes, stop) = parser.nodes()?;
    match stop {
        Stop::Eof => Ok(nodes),
        Stop::End(line) => Err(parser.error(line, "unexpected {{end}}")),
        Stop::Else(line) | Stop::ElseIf(line, _) => Err(parser.error(line, "unexpected {{else}}")),
    }
}

fn scan(name: &str, text: &str) -> Result<Vec<Item>, TemplateError> {
    let mut items = Vec::new();
    let mut rest = text;
    let mut line = 1;
    let mut trim_next = false;

    while let Some(open) = rest.find("{{") {
        let mut before = &rest[..open];
        if trim_next {
            before = before.trim_start();
        }
        let after_open = &rest[open + 2..];
        let trim_left = after_open.starts_with("- ") || after_open.starts_with("-\n") || after_open.starts_with("-\t");
        if trim_left {
            before = before.trim_end();
        }
        if !before.is_empty() {
            items.push(Item::Text(before.to_string()));
        }
        line += rest[..open].matches('\n').count();

        let body_start = if trim_left { 1 } else { 0 };
        let close = find_close(after_open).ok_or_else(|| TemplateError::Parse {
            name: name.to_string(),
            line,
            message: "unclosed action".to_string(),
        })?;
        let mut body = &after_open[body_start..close];
        trim_next = false;
        if body.ends_with('-') && body[..body.len() - 1].ends_with(char::is_whitespace) {
            body = &body[..body.len() - 1];
            trim_next = true;
        }

        let trimmed = body.trim();
        if !(trimmed.starts_with("/*") && trimmed.ends_with("*/")) {
            items.push(Item::Action {
                body: trimmed.to_string(),
                line,
            });
        }
        line += after_open[..close].matches('\n').count();
        rest = &after_open[close + 2..];
    }

    let tail = if trim_next { rest.trim_start() } else { rest };
    if !tail.is_empty() {
        items.push(Item::Text(tail.to_string()));
    }
    Ok(items)
}

/// Offset of the `}}` closing an action, skipping quoted strings.
fn find_close(s: &str) -> Option<usize> {
    let bytes = s.as_bytes();
    let mut i = 0;
    let mut quote: Option<u8> = None;
    while i < bytes.len() {
        let b = bytes[i];
        match quote {
            Some(q) => {
                if b == b'\\' && q == b'"' {
                    i += 1;
                } else if b == q {
                    quote = None;
                }
            }
            None => {
                if b == b'"' || b == b'`' {
                    quote = Some(b);
                } else if b == b'}' && bytes.get(i + 1) == Some(&b'}') {
                    return Some(i);
                }
            }
        }
        i += 1;
    }
    None
}

fn tokenize(body: &str) -> Result<Vec<Token>, String> {
    let chars: Vec<char> = body.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    let word = |i: &mut usize| {
        let start = *i;
        while *i < chars.len() && (chars[*i].is_alphanumeric() || chars[*i] == '_') {
            *i += 1;
        }
        chars[start..*i].iter().collect::<String>()
    };
    let fields = |i: &mut usize| {
        let mut out = Vec::new();
        while *i < chars.len() && chars[*i] == '.' {
            *i += 1;
            let start = *i;
            while *i < chars.len() && (chars[*i].is_alphanumeric() || chars[*i] == '_') {
                *i += 1;
            }
            let name: String = chars[start..*i].iter().collect();
            if !name.is_empty() {
                out.push(name);
            }
        }
        out
    };

    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '|' => {
                tokens.push(Token::Pipe);
                i += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            ':' if chars.get(i + 1) == Some(&'=') => {
                tokens.push(Token::Declare);
                i += 2;
            }
            '.' => tokens.push(Token::Field(fields(&mut i))),
            '$' => {
                i += 1;
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                let name: String = chars[start..i].iter().collect();
                tokens.push(Token::Variable(name, fields(&mut i)));
            }
            '"' => {
                i += 1;
                let mut s = String::new();
                loop {
                    let Some(&c) = chars.get(i) else {
                        return Err("unterminated quoted string".to_string());
                    };
                    i += 1;
                    match c {
                        '"' => break,
                        '\\' => {
                            let Some(&e) = chars.get(i) else {
                                return Err("unterminated quoted string".to_string());
                            };
                            i += 1;
                            s.push(match e {
                                'n' => '\n',
                                't' => '\t',
                                'r' => '\r',
                                other => other,
                            });
                        }
                        other => s.push(other),
                    }
                }
                tokens.push(Token::Str(s));
            }
            '`' => {
                i += 1;
                let start = i;
                while i < chars.len() && chars[i] != '`' {
                    i += 1;
                }
                if i == chars.len() {
                    return Err("unterminated raw string".to_string());
                }
                tokens.push(Token::Str(chars[start..i].iter().collect()));
                i += 1;
            }
            c if c.is_ascii_digit() || (c == '-' && chars.get(i + 1).is_some_and(char::is_ascii_digit)) => {
                let start = i;
                i += 1;
                while i < chars.len() && chars[i].is_ascii_digit() {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let n = text.parse().map_err(|_| format!("bad number {}", text))?;
                tokens.push(Token::Int(n));
            }
            c if c.is_alphabetic() || c == '_' => tokens.push(Token::Ident(word(&mut i))),
            other => return Err(format!("unexpected {:?} in action", other)),
        }
    }
    Ok(tokens)
}

enum Stop {
    Eof,
    End(usize),
    Else(usize),
    ElseIf(usize, Pipeline),
}

struct Parser<'a> {
    name: &'a str,
    items: Vec<Item>,
    pos: usize,
}

impl Parser<'_> {
    fn error(&self, line: usize, message: impl Into<String>) -> TemplateError {
        TemplateError::Parse {
            name: self.name.to_string(),
            line,
            message: message.into(),
        }
    }

    fn nodes(&mut self) -> Result<(Vec<Node>, Stop), TemplateError> {
        let mut nodes = Vec::new();
        while self.pos < self.items.len() {
            let (body, line) = match &self.items[self.pos] {
                Item::Text(text) => {
                    nodes.push(Node::Text(text.clone()));
                    self.pos += 1;
                    continue;
                }
                Item::Action { body, line } => (body.clone(), *line),
            };
            self.pos += 1;

            let tokens = tokenize(&body).map_err(|e| self.error(line, e))?;
            let keyword = match tokens.first() {
                Some(Token::Ident(word)) => word.as_str(),
                None => return Err(self.error(line, "missing value for command")),
                _ => "",
            };
            match keyword {
                "end" => return Ok((nodes, Stop::End(line))),
                "else" => {
                    if matches!(tokens.get(1), Some(Token::Ident(w)) if w == "if") {
                        let cond = self.pipeline(&tokens[2..], line, false)?;
                        return Ok((nodes, Stop::ElseIf(line, cond)));
                    }
                    return Ok((nodes, Stop::Else(line)));
                }
                "if" => {
                    let cond = self.pipeline(&tokens[1..], line, false)?;
                    nodes.push(self.if_node(cond, line)?);
                }
                "range" => nodes.push(self.range_node(&tokens[1..], line)?),
                "template" => {
                    let Some(Token::Str(name)) = tokens.get(1) else {
                        return Err(self.error(line, "template name must be a string"));
                    };
                    let pipeline = if tokens.len() > 2 {
                        Some(self.pipeline(&tokens[2..], line, false)?)
                    } else {
                        None
                    };
                    nodes.push(Node::Template {
                        name: name.clone(),
                        pipeline,
                    });
                }
                _ => nodes.push(Node::Action(self.pipeline(&tokens, line, true)?)),
            }
        }
        Ok((nodes, Stop::Eof))
    }

    fn if_node(&mut self, first: Pipeline, line: usize) -> Result<Node, TemplateError> {
        let mut branches = Vec::new();
        let mut cond = first;
        loop {
            let (body, stop) = self.nodes()?;
            match stop {
                Stop::End(_) => {
                    branches.push((cond, body));
                    return Ok(Node::If {
                        branches,
                        otherwise: Vec::new(),
                    });
                }
                Stop::ElseIf(_, next) => {
                    branches.push((cond, body));
                    cond = next;
                }
                Stop::Else(_) => {
                    branches.push((cond, body));
                    let otherwise = self.closing_body(line)?;
                    return Ok(Node::If { branches, otherwise });
                }
                Stop::Eof => return Err(self.error(line, "unexpected EOF in if")),
            }
        }
    }

    fn range_node(&mut self, tokens: &[Token], line: usize) -> Result<Node, TemplateError> {
        let (key, element, rest) = match tokens {
            [Token::Variable(k, kf), Token::Comma, Token::Variable(e, ef), Token::Declare, rest @ ..]
                if kf.is_empty() && ef.is_empty() =>
            {
                (Some(k.clone()), Some(e.clone()), rest)
            }
            [Token::Variable(e, ef), Token::Declare, rest @ ..] if ef.is_empty() => (None, Some(e.clone()), rest),
            rest => (None, None, rest),
        };
        let pipeline = self.pipeline(rest, line, false)?;
        let (body, stop) = self.nodes()?;
        let otherwise = match stop {
            Stop::End(_) => Vec::new(),
            Stop::Else(_) => self.closing_body(line)?,
            Stop::ElseIf(l, _) => return Err(self.error(l, "else if inside range")),
            Stop::Eof => return Err(self.error(line, "unexpected EOF in range")),
        };
        Ok(Node::Range {
            key,
            element,
            pipeline,
            body,
            otherwise,
        })
    }

    /// Body of an `else` branch, which must close with `end`.
    fn closing_body(&mut self, line: usize) -> Result<Vec<Node>, TemplateError> {
        let (body, stop) = self.nodes()?;
        match stop {
            Stop::End(_) => Ok(body),
            Stop::Else(l) | Stop::ElseIf(l, _) => Err(self.error(l, "duplicate else")),
            Stop::Eof => Err(self.error(line, "unexpected EOF")),
        }
    }

    fn pipeline(&self, tokens: &[Token], line: usize, allow_declare: bool) -> Result<Pipeline, TemplateError> {
        let (declare, tokens) = match tokens {
            [Token::Variable(name, fields), Token::Declare, rest @ ..] if fields.is_empty() => {
                if !allow_declare {
                    return Err(self.error(line, "unexpected declaration"));
                }
                (Some(name.clone()), rest)
            }
            _ => (None, tokens),
        };
        let mut pos = 0;
        let pipeline = self.commands(tokens, &mut pos, line)?;
        if pos != tokens.len() {
            return Err(self.error(line, "unexpected right paren"));
        }
        Ok(Pipeline {
            declare,
            commands: pipeline,
        })
    }

    fn commands(&self, tokens: &[Token], pos: &mut usize, line: usize) -> Result<Vec<Command>, TemplateError> {
        let mut commands = Vec::new();
        let mut args = Vec::new();
        while *pos < tokens.len() {
            let token = &tokens[*pos];
            *pos += 1;
            let arg = match token {
                Token::Pipe => {
                    if args.is_empty() {
                        return Err(self.error(line, "missing command before |"));
                    }
                    commands.push(Command {
                        args: std::mem::take(&mut args),
                    });
                    continue;
                }
                Token::RParen => {
                    *pos -= 1;
                    break;
                }
                Token::LParen => {
                    let inner = self.commands(tokens, pos, line)?;
                    if tokens.get(*pos) != Some(&Token::RParen) {
                        return Err(self.error(line, "unclosed left paren"));
                    }
                    *pos += 1;
                    Arg::Sub(Pipeline {
                        declare: None,
                        commands: inner,
                    })
                }
                Token::Ident(word) => match word.as_str() {
                    "true" => Arg::Bool(true),
                    "false" => Arg::Bool(false),
                    "nil" => Arg::Nil,
                    _ => Arg::Function(word.clone()),
                },
                Token::Field(path) => Arg::Field(path.clone()),
                Token::Variable(name, path) => Arg::Variable(name.clone(), path.clone()),
                Token::Str(s) => Arg::Str(s.clone()),
                Token::Int(n) => Arg::Int(*n),
                Token::Declare | Token::Comma => return Err(self.error(line, "unexpected token in pipeline")),
            };
            args.push(arg);
        }
        if args.is_empty() {
            return Err(self.error(line, "missing value for command"));
        }
        commands.push(Command { args });
        Ok(commands)
    }
}
