//! Parser for shell-style pipeline expressions.
//!
//! A pipeline chains tasks with `!` and assigns properties inline:
//!
//! ```text
//! read path=input.tif ! blur size=5 ! write filename=out.tif
//! ```
//!
//! A bracketed tap list feeds several source chains into the distinct input
//! ports of the following task:
//!
//! ```text
//! [generate, generate ! scale] ! interleave ! null
//! ```
//!
//! Single quotes preserve spaces and punctuation inside a value, and a
//! comma-separated value list becomes an array property.

use log::warn;
use serde_json::Value;

use crate::error::{Error, Result};
use crate::graph::NodeIndex;
use crate::registry::TaskRegistry;
use crate::task::Task;
use crate::task_graph::TaskGraph;

#[derive(Clone, Debug, PartialEq)]
enum Token {
    Str(String),
    Assignment,
    Exclamation,
    ParenOpen,
    ParenClose,
    Comma,
}

fn tokenize(expression: &str) -> Vec<Token> {
    fn push_current(tokens: &mut Vec<Token>, current: &mut Option<String>) {
        if let Some(text) = current.take() {
            tokens.push(Token::Str(text));
        }
    }

    let mut tokens = Vec::new();
    let mut current: Option<String> = None;
    let mut inside_quote = false;

    for c in expression.chars() {
        if c == '\'' {
            inside_quote = !inside_quote;
            continue;
        }

        if inside_quote {
            current.get_or_insert_with(String::new).push(c);
            continue;
        }

        let special = match c {
            '=' => Some(Token::Assignment),
            '!' => Some(Token::Exclamation),
            '[' => Some(Token::ParenOpen),
            ']' => Some(Token::ParenClose),
            ',' => Some(Token::Comma),
            _ => None,
        };

        match special {
            Some(token) => {
                push_current(&mut tokens, &mut current);
                tokens.push(token);
            }
            None if c.is_whitespace() => push_current(&mut tokens, &mut current),
            None => current.get_or_insert_with(String::new).push(c),
        }
    }

    push_current(&mut tokens, &mut current);
    tokens
}

struct Parser<'r> {
    tokens: Vec<Token>,
    pos: usize,
    registry: &'r TaskRegistry,
    graph: TaskGraph,
}

impl<'r> Parser<'r> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    fn consume_maybe(&mut self, token: &Token) -> bool {
        if self.peek() == Some(token) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    /// Parses `NAME (PROP '=' value)*` and adds the task to the graph.
    fn try_consume_task(&mut self) -> Result<NodeIndex> {
        let name = match self.next() {
            Some(Token::Str(name)) => name,
            other => return Err(Error::Parse(format!(
                "expected a task name but got {:?}", other))),
        };

        let mut task = self.registry.get_task(&name)?;

        loop {
            let mark = self.pos;

            if !self.try_consume_assignment(task.as_mut())? {
                self.pos = mark;
                break;
            }
        }

        Ok(self.graph.add_node(task))
    }

    /// Parses one `PROP=value` or `PROP=v1,v2,...` assignment. Returns
    /// `Ok(false)` without consuming anything definitive when the upcoming
    /// tokens are not an assignment.
    fn try_consume_assignment(&mut self, task: &mut dyn Task) -> Result<bool> {
        let key = match self.next() {
            Some(Token::Str(key)) => key,
            _ => return Ok(false),
        };

        if self.next() != Some(Token::Assignment) {
            return Ok(false);
        }

        let first = match self.next() {
            Some(Token::Str(value)) => value,
            other => return Err(Error::Parse(format!(
                "expected a value for `{}' but got {:?}", key, other))),
        };

        let mut values = vec![first];

        /* Commas continue the value only for list-typed properties;
         * otherwise they separate tap-list entries. */
        while task.is_array_property(&key) {
            let mark = self.pos;

            if !self.consume_maybe(&Token::Comma) {
                break;
            }

            match self.next() {
                Some(Token::Str(value)) => values.push(value),
                _ => {
                    self.pos = mark;
                    break;
                }
            }
        }

        let value = if values.len() == 1 {
            Value::String(values.remove(0))
        } else {
            Value::Array(values.into_iter().map(Value::String).collect())
        };

        if let Err(err) = task.set_property(&key, &value) {
            warn!("{}", err);
        }

        Ok(true)
    }

    fn peek_is_str(&self) -> bool {
        matches!(self.peek(), Some(Token::Str(_)))
    }

    /// Parses `'[' connection (',' connection)* ']'`, returning the final
    /// task of each inner chain. Assumes the opening bracket is next.
    fn read_params(&mut self) -> Result<Vec<NodeIndex>> {
        self.pos += 1;

        let mut result = Vec::new();

        loop {
            if self.at_end() {
                return Err(Error::Parse(
                    "expected `,', `]', a task or a task property".into()));
            }

            if self.consume_maybe(&Token::ParenClose) {
                break;
            }

            if self.consume_maybe(&Token::Comma) {
                continue;
            }

            let mut last = None;

            while let Some(node) = self.read_connection()? {
                last = Some(node);
            }

            match last {
                Some(node) => result.push(node),
                None => return Err(Error::Parse("empty entry in tap list".into())),
            }
        }

        Ok(result)
    }

    /// Parses `maybe_params task ('!' task)*`, returning the last task of
    /// the chain or `None` when no connection starts here.
    fn read_connection(&mut self) -> Result<Option<NodeIndex>> {
        let params = if self.peek() == Some(&Token::ParenOpen) {
            self.read_params()?
        } else if self.peek_is_str() {
            Vec::new()
        } else {
            return Ok(None);
        };

        if !params.is_empty() {
            /* Tolerate both `[a, b] task` and `[a, b] ! task`. */
            self.consume_maybe(&Token::Exclamation);
        }

        if !self.peek_is_str() {
            if params.is_empty() {
                return Ok(None);
            }

            return Err(Error::Parse("expected a task after the tap list".into()));
        }

        let first = self.try_consume_task()?;

        for (port, &from) in params.iter().enumerate() {
            self.graph.connect_nodes_full(from, first, port as u32);
        }

        let mut previous = first;

        while self.consume_maybe(&Token::Exclamation) {
            if !self.peek_is_str() {
                return Ok(Some(previous));
            }

            let next = self.try_consume_task()?;
            self.graph.connect_nodes(previous, next);
            previous = next;
        }

        Ok(Some(previous))
    }
}

/// Parses a pipeline expression into a [`TaskGraph`], resolving task names
/// through `registry`.
pub fn parse_pipeline(expression: &str, registry: &TaskRegistry) -> Result<TaskGraph> {
    let mut parser = Parser {
        tokens: tokenize(expression),
        pos: 0,
        registry,
        graph: TaskGraph::new(),
    };

    while parser.read_connection()?.is_some() {}

    if !parser.at_end() {
        return Err(Error::Parse(format!(
            "unexpected {:?}", parser.tokens[parser.pos])));
    }

    Ok(parser.graph)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenizes_quotes_and_separators() {
        let tokens = tokenize("read path='my file.tif' ! write");

        assert_eq!(tokens, vec![
            Token::Str("read".into()),
            Token::Str("path".into()),
            Token::Assignment,
            Token::Str("my file.tif".into()),
            Token::Exclamation,
            Token::Str("write".into()),
        ]);
    }

    #[test]
    fn tokenizes_value_lists() {
        let tokens = tokenize("gen sizes=2,4,8");

        assert_eq!(tokens, vec![
            Token::Str("gen".into()),
            Token::Str("sizes".into()),
            Token::Assignment,
            Token::Str("2".into()),
            Token::Comma,
            Token::Str("4".into()),
            Token::Comma,
            Token::Str("8".into()),
        ]);
    }
}
