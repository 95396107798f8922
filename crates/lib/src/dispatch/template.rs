//! Command template parsing and substitution.
//!
//! Generator commands are plain shell text with `{token}` placeholders:
//!
//! - `{input}` / `{in}` - the input files
//! - `{output}` / `{out}` - the output file
//! - `{outputdir}` - the directory containing the output
//! - `{exe}` / `{executor}` - location of the generator's executor
//! - `{includes}` - include directories, formatted by the generator
//! - `{env.VAR}` / `{environment.VAR}` - a variable from the target's environment
//!
//! `{{` and `}}` produce literal braces.
//!
//! ```
//! use simba_lib::dispatch::template::{parse, Segment, Token};
//!
//! let segments = parse("{exe} -c {in} -o {out}").unwrap();
//! assert_eq!(segments[0], Segment::Token(Token::Executor));
//! assert_eq!(segments[1], Segment::Literal(" -c ".to_string()));
//! ```

use thiserror::Error;

/// A parsed template token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
  Input,
  Output,
  OutputDir,
  Executor,
  Includes,
  /// `{env.VAR}`
  Variable(String),
}

/// A segment of a parsed template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
  Literal(String),
  Token(Token),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
  #[error("unclosed token at position {0}")]
  Unclosed(usize),

  #[error("unmatched '}}' at position {0} (use '}}}}' for a literal brace)")]
  UnmatchedBrace(usize),

  #[error("malformed token: {0}")]
  Malformed(String),

  #[error("unknown token: {{{0}}}")]
  UnknownToken(String),

  #[error("cannot shell-quote {0:?}")]
  Unquotable(String),

  #[error("rendered command is not valid shell: {0}")]
  InvalidCommand(String),
}

/// Supplies values for tokens during substitution.
pub trait Resolver {
  type Error;

  fn resolve_input(&self) -> Result<String, Self::Error>;

  fn resolve_output(&self) -> Result<String, Self::Error>;

  fn resolve_output_dir(&self) -> Result<String, Self::Error>;

  fn resolve_executor(&self) -> Result<String, Self::Error>;

  fn resolve_includes(&self) -> Result<String, Self::Error>;

  fn resolve_variable(&self, key: &str) -> Result<String, Self::Error>;
}

/// Parse a command template into segments.
///
/// # Errors
///
/// Returns an error for unclosed or empty tokens, stray closing braces, and
/// unknown token names.
pub fn parse(input: &str) -> Result<Vec<Segment>, TemplateError> {
  let mut segments = Vec::new();
  let mut literal = String::new();
  let mut chars = input.char_indices().peekable();

  while let Some((pos, ch)) = chars.next() {
    match ch {
      '{' if matches!(chars.peek(), Some((_, '{'))) => {
        chars.next();
        literal.push('{');
      }
      '}' if matches!(chars.peek(), Some((_, '}'))) => {
        chars.next();
        literal.push('}');
      }
      '}' => return Err(TemplateError::UnmatchedBrace(pos)),
      '{' => {
        if !literal.is_empty() {
          segments.push(Segment::Literal(std::mem::take(&mut literal)));
        }

        let mut content = String::new();
        let mut found_close = false;
        for (_, c) in chars.by_ref() {
          if c == '}' {
            found_close = true;
            break;
          }
          content.push(c);
        }

        if !found_close {
          return Err(TemplateError::Unclosed(pos));
        }
        segments.push(Segment::Token(parse_token(&content)?));
      }
      _ => literal.push(ch),
    }
  }

  if !literal.is_empty() {
    segments.push(Segment::Literal(literal));
  }

  Ok(segments)
}

fn parse_token(content: &str) -> Result<Token, TemplateError> {
  let token = content.trim();
  if token.is_empty() || token.contains('{') {
    return Err(TemplateError::Malformed(format!("{{{content}}}")));
  }

  if let Some((scope, key)) = token.split_once('.') {
    if scope != "env" && scope != "environment" {
      return Err(TemplateError::UnknownToken(token.to_string()));
    }
    if key.is_empty() {
      return Err(TemplateError::Malformed(format!("missing variable name in '{token}'")));
    }
    return Ok(Token::Variable(key.to_string()));
  }

  match token {
    "in" | "input" => Ok(Token::Input),
    "out" | "output" => Ok(Token::Output),
    "outputdir" => Ok(Token::OutputDir),
    "exe" | "executor" => Ok(Token::Executor),
    "includes" => Ok(Token::Includes),
    _ => Err(TemplateError::UnknownToken(token.to_string())),
  }
}

/// Parse and substitute in one step.
pub fn substitute<R>(input: &str, resolver: &R) -> Result<String, R::Error>
where
  R: Resolver,
  R::Error: From<TemplateError>,
{
  let segments = parse(input)?;
  substitute_segments(&segments, resolver)
}

pub fn substitute_segments<R: Resolver>(segments: &[Segment], resolver: &R) -> Result<String, R::Error> {
  let mut result = String::new();

  for segment in segments {
    match segment {
      Segment::Literal(s) => result.push_str(s),
      Segment::Token(token) => {
        let value = match token {
          Token::Input => resolver.resolve_input()?,
          Token::Output => resolver.resolve_output()?,
          Token::OutputDir => resolver.resolve_output_dir()?,
          Token::Executor => resolver.resolve_executor()?,
          Token::Includes => resolver.resolve_includes()?,
          Token::Variable(key) => resolver.resolve_variable(key)?,
        };
        result.push_str(&value);
      }
    }
  }

  Ok(result)
}

/// Shell-quote one word, leaving plain words untouched.
pub fn quote(word: &str) -> Result<String, TemplateError> {
  shlex::try_quote(word)
    .map(|quoted| quoted.into_owned())
    .map_err(|_| TemplateError::Unquotable(word.to_string()))
}
