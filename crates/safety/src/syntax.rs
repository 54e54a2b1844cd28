//! Structural syntax check for Python payloads.

use crate::lexer::{tokenize, LogicalLine, Token, TokenKind};
use crate::SyntaxIssue;

const BLOCK_KEYWORDS: &[&str] = &[
    "def", "class", "if", "elif", "else", "for", "while", "with", "try", "except", "finally",
];

/// Check that `source` is structurally valid.
///
/// Beyond bracket, string and indentation structure, a function whose body is
/// only a value-less `return`, in a payload that also has a standalone
/// `return` line, is rejected: generated code in that shape is almost always
/// truncated.
pub fn check_syntax(source: &str) -> Result<(), SyntaxIssue> {
    let lines = tokenize(source)?;
    check_blocks(&lines)?;
    check_truncated_functions(source, &lines)
}

/// The block keyword a line opens, if any. `async def/for/with` count.
pub(crate) fn header_keyword(line: &LogicalLine) -> Option<&str> {
    let first = line.first_name()?;
    if first == "async" {
        return line
            .tokens
            .get(1)
            .filter(|t| t.kind == TokenKind::Name)
            .map(|t| t.text.as_str())
            .filter(|kw| matches!(*kw, "def" | "for" | "with"));
    }
    BLOCK_KEYWORDS.contains(&first).then_some(first)
}

/// Index of the colon that ends a block header, skipping colons nested in
/// brackets or owned by a `lambda`.
fn header_colon(tokens: &[Token]) -> Option<usize> {
    let mut depth = 0usize;
    let mut lambdas = 0usize;
    for (i, token) in tokens.iter().enumerate() {
        match token.kind {
            TokenKind::Op if matches!(token.text.as_str(), "(" | "[" | "{") => depth += 1,
            TokenKind::Op if matches!(token.text.as_str(), ")" | "]" | "}") => {
                depth = depth.saturating_sub(1)
            }
            TokenKind::Name if depth == 0 && token.text == "lambda" => lambdas += 1,
            TokenKind::Op if depth == 0 && token.text == ":" => {
                if lambdas == 0 {
                    return Some(i);
                }
                lambdas -= 1;
            }
            _ => {}
        }
    }
    None
}

fn check_blocks(lines: &[LogicalLine]) -> Result<(), SyntaxIssue> {
    let mut levels = vec![0usize];
    let mut open_header: Option<u32> = None;

    for line in lines {
        let current = levels.last().copied().unwrap_or(0);

        if let Some(header_line) = open_header.take() {
            if line.indent <= current {
                return Err(SyntaxIssue::new(
                    format!("expected an indented block after line {}", header_line),
                    line.line,
                    1,
                ));
            }
            levels.push(line.indent);
        } else if line.indent > current {
            return Err(SyntaxIssue::new("unexpected indent", line.line, 1));
        } else if line.indent < current {
            while levels.last().is_some_and(|&level| level > line.indent) {
                levels.pop();
            }
            if levels.last().copied() != Some(line.indent) {
                return Err(SyntaxIssue::new(
                    "unindent does not match any outer indentation level",
                    line.line,
                    1,
                ));
            }
        }

        if let Some(keyword) = header_keyword(line) {
            match header_colon(&line.tokens) {
                None => {
                    let col = line.tokens.last().map(|t| t.col).unwrap_or(1);
                    return Err(SyntaxIssue::new(
                        format!("expected ':' after '{}' statement", keyword),
                        line.line,
                        col,
                    ));
                }
                Some(pos) if pos + 1 == line.tokens.len() => open_header = Some(line.line),
                Some(_) => {}
            }
        }
    }

    if let Some(header_line) = open_header {
        return Err(SyntaxIssue::new(
            format!("expected an indented block after line {}", header_line),
            header_line + 1,
            1,
        ));
    }

    Ok(())
}

fn is_bare_return(tokens: &[Token]) -> bool {
    tokens.len() == 1 && tokens[0].is_name("return")
}

fn check_truncated_functions(source: &str, lines: &[LogicalLine]) -> Result<(), SyntaxIssue> {
    let has_standalone_return = source.lines().any(|l| l.trim() == "return");
    if !has_standalone_return {
        return Ok(());
    }

    for (i, line) in lines.iter().enumerate() {
        if header_keyword(line) != Some("def") {
            continue;
        }
        let Some(colon) = header_colon(&line.tokens) else {
            continue;
        };

        let only_bare_return = if colon + 1 < line.tokens.len() {
            is_bare_return(&line.tokens[colon + 1..])
        } else {
            let body: Vec<&LogicalLine> = lines[i + 1..]
                .iter()
                .take_while(|l| l.indent > line.indent)
                .collect();
            body.len() == 1 && is_bare_return(&body[0].tokens)
        };

        if only_bare_return {
            let name = line
                .tokens
                .iter()
                .skip_while(|t| !t.is_name("def"))
                .nth(1)
                .map(|t| t.text.clone())
                .unwrap_or_default();
            return Err(SyntaxIssue::new(
                format!(
                    "function '{}' only contains a bare return; code looks truncated",
                    name
                ),
                line.line,
                1,
            ));
        }
    }

    Ok(())
}
