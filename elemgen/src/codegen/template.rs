//! A small `${...}` template renderer for C code skeletons.
//!
//! Two kinds of placeholders are recognized:
//!
//! - `${name}` is replaced with a literal binding.
//! - `${name(arg, ...)}` calls a function binding with the comma-separated arguments. Commas
//!   nested inside parentheses, brackets or braces do not split arguments, so
//!   `${f(a, g(b, c))}` passes two arguments.

use std::collections::HashMap;
use std::error::Error;
use std::fmt::Display;

type Callback<'a> = Box<dyn Fn(&[&str]) -> Result<String, Box<dyn Error + Send + Sync>> + 'a>;

enum TemplateArg<'a> {
    Literal(String),
    Function(Callback<'a>),
}

/// The bindings used to render a template.
#[derive(Default)]
pub struct StringTemplateArgs<'a> {
    args: HashMap<String, TemplateArg<'a>>,
}

#[derive(thiserror::Error, Debug)]
pub enum TemplateError {
    #[error("No binding for placeholder `{name}` at byte {offset}")]
    UnresolvedPlaceholder { name: String, offset: usize },
    #[error("Unterminated placeholder at byte {offset}")]
    Unterminated { offset: usize },
    #[error("Malformed placeholder at byte {offset}: {reason}")]
    Malformed { offset: usize, reason: &'static str },
    #[error("Placeholder `{name}` is a literal but was called with arguments")]
    NotCallable { name: String },
    #[error("Placeholder `{name}` is a function and must be called with parentheses")]
    CallbackRequiresArgs { name: String },
    #[error("Expanding `{name}` failed: {source}")]
    Callback {
        name: String,
        #[source]
        source: Box<dyn Error + Send + Sync>,
    },
}

/// A parsed placeholder: the name and, for calls, the raw argument strings.
#[derive(Debug, PartialEq)]
struct Placeholder<'t> {
    name: &'t str,
    args: Option<Vec<&'t str>>,
}

impl<'a> StringTemplateArgs<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `name` to the [Display] rendering of `value`.
    pub fn add<V: Display>(mut self, name: &str, value: V) -> Self {
        self.args
            .insert(name.to_string(), TemplateArg::Literal(value.to_string()));
        self
    }

    /// Binds `name` to a function called with a placeholder's arguments.
    pub fn add_fn<F, E>(mut self, name: &str, f: F) -> Self
    where
        F: Fn(&[&str]) -> Result<String, E> + 'a,
        E: Into<Box<dyn Error + Send + Sync>>,
    {
        let callback: Callback<'a> = Box::new(move |args| f(args).map_err(Into::into));
        self.args
            .insert(name.to_string(), TemplateArg::Function(callback));
        self
    }

    /// Expands every placeholder in `template` in a single pass.
    ///
    /// Expanded text is not itself scanned for placeholders. Lines after the first in a
    /// multi-line expansion are indented like the line the placeholder appears on.
    pub fn render(&self, template: &str) -> Result<String, TemplateError> {
        let mut out = String::with_capacity(template.len());
        let mut cursor = 0;
        while let Some(found) = template[cursor..].find("${") {
            let start = cursor + found;
            out.push_str(&template[cursor..start]);
            let (placeholder, end) = Scanner::new(template, start + 2).placeholder()?;
            push_aligned(&mut out, &self.expand(&placeholder, start)?);
            cursor = end;
        }
        out.push_str(&template[cursor..]);
        Ok(out)
    }

    fn expand(&self, placeholder: &Placeholder, offset: usize) -> Result<String, TemplateError> {
        let name = placeholder.name;
        match (self.args.get(name), &placeholder.args) {
            (None, _) => Err(TemplateError::UnresolvedPlaceholder {
                name: name.to_string(),
                offset,
            }),
            (Some(TemplateArg::Literal(value)), None) => Ok(value.clone()),
            (Some(TemplateArg::Literal(_)), Some(_)) => Err(TemplateError::NotCallable {
                name: name.to_string(),
            }),
            (Some(TemplateArg::Function(_)), None) => Err(TemplateError::CallbackRequiresArgs {
                name: name.to_string(),
            }),
            (Some(TemplateArg::Function(f)), Some(args)) => {
                f(args).map_err(|source| TemplateError::Callback {
                    name: name.to_string(),
                    source,
                })
            }
        }
    }
}

fn push_aligned(out: &mut String, text: &str) {
    let line_start = out.rfind('\n').map_or(0, |i| i + 1);
    let indent_len = out[line_start..]
        .find(|c: char| !c.is_whitespace())
        .unwrap_or(out.len() - line_start);
    let indent = out[line_start..line_start + indent_len].to_string();
    let mut lines = text.split('\n');
    if let Some(first) = lines.next() {
        out.push_str(first);
    }
    for line in lines {
        out.push('\n');
        if !line.is_empty() {
            out.push_str(&indent);
        }
        out.push_str(line);
    }
}

/// A recursive-descent scanner over the inside of one placeholder.
struct Scanner<'t> {
    src: &'t str,
    pos: usize,
}

impl<'t> Scanner<'t> {
    fn new(src: &'t str, pos: usize) -> Self {
        Scanner { src, pos }
    }

    fn peek(&self) -> Option<char> {
        self.src[self.pos..].chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn skip_whitespace(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.bump();
        }
    }

    /// Parses `name}` or `name(args)}` and returns the placeholder and the offset just past `}`.
    fn placeholder(mut self) -> Result<(Placeholder<'t>, usize), TemplateError> {
        let open = self.pos - 2;
        self.skip_whitespace();
        let name = self.identifier(open)?;
        self.skip_whitespace();
        let args = match self.peek() {
            Some('(') => {
                self.bump();
                Some(self.arguments(open)?)
            }
            Some(_) => None,
            None => return Err(TemplateError::Unterminated { offset: open }),
        };
        self.skip_whitespace();
        match self.bump() {
            Some('}') => Ok((Placeholder { name, args }, self.pos)),
            Some(_) => Err(TemplateError::Malformed {
                offset: open,
                reason: "expected `}`",
            }),
            None => Err(TemplateError::Unterminated { offset: open }),
        }
    }

    fn identifier(&mut self, open: usize) -> Result<&'t str, TemplateError> {
        let start = self.pos;
        match self.peek() {
            Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
            Some(_) => {
                return Err(TemplateError::Malformed {
                    offset: open,
                    reason: "expected an identifier",
                })
            }
            None => return Err(TemplateError::Unterminated { offset: open }),
        }
        while self
            .peek()
            .is_some_and(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            self.bump();
        }
        Ok(&self.src[start..self.pos])
    }

    /// Parses a comma-separated argument list after `(`, consuming the closing `)`.
    fn arguments(&mut self, open: usize) -> Result<Vec<&'t str>, TemplateError> {
        let mut args = Vec::new();
        let mut arg_start = self.pos;
        let mut closers = Vec::new();
        loop {
            let Some(c) = self.bump() else {
                return Err(TemplateError::Unterminated { offset: open });
            };
            match c {
                '(' => closers.push(')'),
                '[' => closers.push(']'),
                '{' => closers.push('}'),
                ')' | ']' | '}' if closers.last() == Some(&c) => {
                    closers.pop();
                }
                ')' if closers.is_empty() => {
                    let last = self.src[arg_start..self.pos - 1].trim();
                    if !last.is_empty() || !args.is_empty() {
                        args.push(last);
                    }
                    return Ok(args);
                }
                ')' | ']' | '}' => {
                    return Err(TemplateError::Malformed {
                        offset: open,
                        reason: "unbalanced brackets in arguments",
                    })
                }
                ',' if closers.is_empty() => {
                    args.push(self.src[arg_start..self.pos - 1].trim());
                    arg_start = self.pos;
                }
                _ => {}
            }
        }
    }
}
