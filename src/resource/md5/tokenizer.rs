use std::str::FromStr;

use crate::error::Error;

/// Whitespace-separated tokens with line tracking. Quoted strings are single tokens,
/// parentheses and braces always stand alone, and `//` starts a comment.
pub struct Tokenizer<'a> {
    tokens: Vec<(usize, &'a str)>,
    position: usize,
}

impl<'a> Tokenizer<'a> {
    pub fn new(source: &'a str) -> Self {
        let mut tokens = Vec::new();

        for (line_index, line) in source.lines().enumerate() {
            split_line(line, line_index + 1, &mut tokens);
        }

        Self {
            tokens,
            position: 0,
        }
    }

    pub fn line(&self) -> usize {
        match self.tokens.get(self.position) {
            Some((line, _)) => *line,
            None => self.tokens.last().map(|(line, _)| *line).unwrap_or(0),
        }
    }

    pub fn peek(&self) -> Option<&'a str> {
        self.tokens.get(self.position).map(|(_, token)| *token)
    }

    pub fn next_token(&mut self) -> Result<&'a str, Error> {
        match self.tokens.get(self.position) {
            Some((_, token)) => {
                self.position += 1;
                Ok(token)
            }
            None => Err(self.error(String::from("unexpected end of file"))),
        }
    }

    pub fn expect(&mut self, expected: &str) -> Result<(), Error> {
        let line = self.line();
        let token = self.next_token()?;
        if token != expected {
            return Err(Error::Parse {
                line,
                message: format!("expected '{expected}', found '{token}'"),
            });
        }

        Ok(())
    }

    pub fn parse<T: FromStr>(&mut self, what: &str) -> Result<T, Error> {
        let line = self.line();
        let token = self.next_token()?;
        token.parse::<T>().map_err(|_| Error::Parse {
            line,
            message: format!("expected {what}, found '{token}'"),
        })
    }

    pub fn quoted(&mut self) -> Result<String, Error> {
        let token = self.next_token()?;
        Ok(token.trim_matches('"').to_string())
    }

    /// Parses `( a b c )`.
    pub fn vector3(&mut self) -> Result<[f32; 3], Error> {
        self.expect("(")?;
        let vector = [
            self.parse("a number")?,
            self.parse("a number")?,
            self.parse("a number")?,
        ];
        self.expect(")")?;

        Ok(vector)
    }

    /// Skips a `{ ... }` block, including nested blocks.
    pub fn skip_block(&mut self) -> Result<(), Error> {
        self.expect("{")?;
        let mut depth = 1;
        while depth > 0 {
            match self.next_token()? {
                "{" => depth += 1,
                "}" => depth -= 1,
                _ => {}
            }
        }

        Ok(())
    }

    pub fn error(&self, message: String) -> Error {
        Error::Parse {
            line: self.line(),
            message,
        }
    }
}

fn split_line<'a>(line: &'a str, line_number: usize, tokens: &mut Vec<(usize, &'a str)>) {
    let mut start: Option<usize> = None;
    let mut in_quotes = false;

    for (index, character) in line.char_indices() {
        if in_quotes {
            if character == '"' {
                if let Some(token_start) = start.take() {
                    tokens.push((line_number, &line[token_start..index + 1]));
                }
                in_quotes = false;
            }
            continue;
        }

        match character {
            '/' if line[index..].starts_with("//") => {
                if let Some(token_start) = start.take() {
                    tokens.push((line_number, &line[token_start..index]));
                }
                return;
            }
            '"' => {
                if let Some(token_start) = start.take() {
                    tokens.push((line_number, &line[token_start..index]));
                }
                start = Some(index);
                in_quotes = true;
            }
            '(' | ')' | '{' | '}' => {
                if let Some(token_start) = start.take() {
                    tokens.push((line_number, &line[token_start..index]));
                }
                tokens.push((line_number, &line[index..index + 1]));
            }
            character if character.is_whitespace() => {
                if let Some(token_start) = start.take() {
                    tokens.push((line_number, &line[token_start..index]));
                }
            }
            _ => {
                if start.is_none() {
                    start = Some(index);
                }
            }
        }
    }

    if let Some(token_start) = start {
        tokens.push((line_number, &line[token_start..]));
    }
}
