//! Translation of Go-template style actions into minijinja syntax.
//!
//! Plans are authored with `{{ .params.topic }}`, `{{ if eq .vars.mode "x" }}`,
//! `{{ range .progress.A.items }}{{ . }}{{ end }}`. Actions that do not look like
//! Go templates (and every `{% … %}` / `{# … #}` block) are copied untouched, so
//! native minijinja can be mixed in.

use crate::error::FragsError;

/// Functions understood in command position.
const GO_FUNCS: &[&str] = &[
    "eq", "ne", "lt", "le", "gt", "ge", "and", "or", "not", "len", "index", "upper", "lower",
    "json", "yaml", "default", "print",
];

/// Filter that turns a mapping into its values so `range` iterates like Go.
pub const RANGE_FILTER: &str = "range_values";

#[derive(Debug)]
enum Block {
    If,
    Range,
}

/// Translate a template source.
pub fn translate(source: &str) -> Result<String, FragsError> {
    let mut out = String::with_capacity(source.len());
    let mut blocks: Vec<Block> = Vec::new();
    let mut dots: Vec<String> = Vec::new();
    let mut rest = source;

    while let Some(start) = next_open(rest) {
        out.push_str(&rest[..start]);
        let after = &rest[start..];

        if after.starts_with("{%") || after.starts_with("{#") {
            let close = if after.starts_with("{%") { "%}" } else { "#}" };
            let end = after[2..]
                .find(close)
                .map(|i| i + 2 + close.len())
                .ok_or_else(|| syntax(format!("unclosed '{}'", &after[..2])))?;
            out.push_str(&after[..end]);
            rest = &after[end..];
            continue;
        }

        let end = find_action_end(&after[2..])
            .map(|i| i + 2)
            .ok_or_else(|| syntax("unclosed '{{'"))?;
        let inner = &after[2..end];
        rest = &after[end + 2..];
        out.push_str(&translate_action(inner, &mut blocks, &mut dots)?);
    }
    out.push_str(rest);

    if let Some(open) = blocks.last() {
        return Err(syntax(format!("unclosed {:?} block, missing {{{{ end }}}}", open)));
    }
    Ok(out)
}

/// If `source` is a single `{{ … }}` output action, its minijinja expression.
pub fn single_expression(source: &str) -> Result<Option<String>, FragsError> {
    let trimmed = source.trim();
    if !trimmed.starts_with("{{") || !trimmed.ends_with("}}") {
        return Ok(None);
    }
    let Some(end) = find_action_end(&trimmed[2..]) else {
        return Ok(None);
    };
    if end + 4 != trimmed.len() {
        return Ok(None);
    }
    let inner = trim_markers(&trimmed[2..end + 2]).1.trim();
    if inner.is_empty() || is_keyword_action(inner) || inner.starts_with("/*") {
        return Ok(None);
    }
    if !looks_like_go(inner) {
        return Ok(Some(inner.to_string()));
    }
    let tokens = tokenize(inner)?;
    Ok(Some(translate_pipeline(&tokens, None)?))
}

fn next_open(s: &str) -> Option<usize> {
    ["{{", "{%", "{#"].iter().filter_map(|p| s.find(p)).min()
}

/// Index of the `}}` closing an action, skipping string literals.
fn find_action_end(s: &str) -> Option<usize> {
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

/// Split `{{- x -}}` trim markers off the action body.
fn trim_markers(inner: &str) -> ((bool, bool), &str) {
    let mut body = inner;
    let left = body.starts_with("- ") || body.starts_with("-\t") || body.starts_with("-\n");
    if left {
        body = &body[1..];
    }
    let right = body.ends_with(" -") || body.ends_with("\t-") || body.ends_with("\n-");
    if right {
        body = &body[..body.len() - 1];
    }
    ((left, right), body)
}

fn is_keyword_action(body: &str) -> bool {
    let word = body.split_whitespace().next().unwrap_or("");
    matches!(word, "if" | "else" | "range" | "end")
}

fn looks_like_go(body: &str) -> bool {
    if body.starts_with('.') || body.starts_with('$') || body.starts_with('(') {
        return true;
    }
    let word = body.split_whitespace().next().unwrap_or("");
    GO_FUNCS.contains(&word) && body.len() > word.len()
}

fn translate_action(
    inner: &str,
    blocks: &mut Vec<Block>,
    dots: &mut Vec<String>,
) -> Result<String, FragsError> {
    let ((left, right), body) = trim_markers(inner);
    let body = body.trim();
    let (open_tag, close_tag) = (
        if left { "{%-" } else { "{%" },
        if right { "-%}" } else { "%}" },
    );

    if body.starts_with("/*") {
        // `/*/` opens and "closes" on the same star.
        if body.len() < 4 || !body.ends_with("*/") {
            return Err(syntax(format!("unclosed comment in '{{{{{}}}}}'", inner)));
        }
        return Ok(format!("{{#{}#}}", &body[2..body.len() - 2]));
    }

    if !is_keyword_action(body) {
        if !looks_like_go(body) {
            return Ok(format!("{{{{{}}}}}", inner));
        }
        let tokens = tokenize(body)?;
        let expr = translate_pipeline(&tokens, dots.last().map(String::as_str))?;
        let (lo, ro) = (if left { "{{-" } else { "{{" }, if right { "-}}" } else { "}}" });
        return Ok(format!("{} {} {}", lo, expr, ro));
    }

    let (word, args) = match body.split_once(char::is_whitespace) {
        Some((w, a)) => (w, a.trim()),
        None => (body, ""),
    };
    let dot = dots.last().cloned();

    match word {
        "if" => {
            blocks.push(Block::If);
            let expr = translate_pipeline(&tokenize(args)?, dot.as_deref())?;
            Ok(format!("{} if {} {}", open_tag, expr, close_tag))
        }
        "else" => {
            if blocks.is_empty() {
                return Err(syntax("'else' without 'if' or 'range'"));
            }
            if let Some(cond) = args.strip_prefix("if ") {
                if !matches!(blocks.last(), Some(Block::If)) {
                    return Err(syntax("'else if' inside 'range'"));
                }
                let expr = translate_pipeline(&tokenize(cond.trim())?, dot.as_deref())?;
                Ok(format!("{} elif {} {}", open_tag, expr, close_tag))
            } else {
                Ok(format!("{} else {}", open_tag, close_tag))
            }
        }
        "range" => {
            let (var, source) = split_range_declaration(args);
            let loop_var = match var {
                Some(v) => v.to_string(),
                None => format!("_it{}", dots.len()),
            };
            let expr = translate_pipeline(&tokenize(source)?, dot.as_deref())?;
            blocks.push(Block::Range);
            dots.push(loop_var.clone());
            Ok(format!(
                "{} for {} in ({})|{} {}",
                open_tag, loop_var, expr, RANGE_FILTER, close_tag
            ))
        }
        "end" => match blocks.pop() {
            Some(Block::If) => Ok(format!("{} endif {}", open_tag, close_tag)),
            Some(Block::Range) => {
                dots.pop();
                Ok(format!("{} endfor {}", open_tag, close_tag))
            }
            None => Err(syntax("'end' without an open block")),
        },
        _ => Err(syntax(format!("unknown action '{}'", word))),
    }
}

/// `range $item := .list` declares a named loop variable; the dot still follows it.
fn split_range_declaration(args: &str) -> (Option<&str>, &str) {
    if let Some((decl, source)) = args.split_once(":=") {
        let names: Vec<&str> = decl.split(',').map(str::trim).collect();
        if let Some(last) = names.last().and_then(|n| n.strip_prefix('$')) {
            if !last.is_empty() && is_ident(last) {
                return (Some(last), source.trim());
            }
        }
    }
    (None, args)
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Field(String),
    Var(String),
    Str(String),
    Num(String),
    Ident(String),
    LParen,
    RParen,
    Pipe,
}

fn tokenize(src: &str) -> Result<Vec<Token>, FragsError> {
    let chars: Vec<char> = src.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    let path_char = |c: char| c.is_alphanumeric() || c == '_' || c == '-' || c == '.';

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
            '.' | '$' => {
                let start = i;
                i += 1;
                while i < chars.len() && path_char(chars[i]) {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                if c == '.' {
                    tokens.push(Token::Field(text));
                } else {
                    tokens.push(Token::Var(text));
                }
            }
            '"' => {
                let start = i;
                i += 1;
                while i < chars.len() && chars[i] != '"' {
                    if chars[i] == '\\' {
                        i += 1;
                    }
                    i += 1;
                }
                if i >= chars.len() {
                    return Err(syntax("unterminated string literal"));
                }
                i += 1;
                tokens.push(Token::Str(chars[start..i].iter().collect()));
            }
            '`' => {
                let start = i + 1;
                i += 1;
                while i < chars.len() && chars[i] != '`' {
                    i += 1;
                }
                if i >= chars.len() {
                    return Err(syntax("unterminated raw string literal"));
                }
                let raw: String = chars[start..i].iter().collect();
                i += 1;
                let quoted = serde_json::to_string(&raw).map_err(|e| syntax(e.to_string()))?;
                tokens.push(Token::Str(quoted));
            }
            c if c.is_ascii_digit() || (c == '-' && chars.get(i + 1).is_some_and(|n| n.is_ascii_digit())) => {
                let start = i;
                i += 1;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                tokens.push(Token::Num(chars[start..i].iter().collect()));
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && path_char(chars[i]) {
                    i += 1;
                }
                tokens.push(Token::Ident(chars[start..i].iter().collect()));
            }
            other => return Err(syntax(format!("unexpected character '{}'", other))),
        }
    }
    Ok(tokens)
}

fn translate_pipeline(tokens: &[Token], dot: Option<&str>) -> Result<String, FragsError> {
    if tokens.is_empty() {
        return Err(syntax("empty pipeline"));
    }
    let mut result: Option<String> = None;
    for command in split_top_level(tokens)? {
        result = Some(translate_command(command, dot, result)?);
    }
    result.ok_or_else(|| syntax("empty pipeline"))
}

fn split_top_level(tokens: &[Token]) -> Result<Vec<&[Token]>, FragsError> {
    let mut commands = Vec::new();
    let mut depth = 0i32;
    let mut start = 0;
    for (i, token) in tokens.iter().enumerate() {
        match token {
            Token::LParen => depth += 1,
            Token::RParen => {
                depth -= 1;
                if depth < 0 {
                    return Err(syntax("unbalanced ')'"));
                }
            }
            Token::Pipe if depth == 0 => {
                commands.push(&tokens[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    if depth != 0 {
        return Err(syntax("unbalanced '('"));
    }
    commands.push(&tokens[start..]);
    if commands.iter().any(|c| c.is_empty()) {
        return Err(syntax("empty command in pipeline"));
    }
    Ok(commands)
}

fn translate_command(
    tokens: &[Token],
    dot: Option<&str>,
    piped: Option<String>,
) -> Result<String, FragsError> {
    let operands = split_operands(tokens, dot)?;

    if let Some(Token::Ident(name)) = tokens.first() {
        let is_call = GO_FUNCS.contains(&name.as_str()) || piped.is_some() || operands.len() > 1;
        if is_call && !matches!(name.as_str(), "true" | "false" | "nil") {
            let mut args: Vec<String> = operands.into_iter().skip(1).collect();
            args.extend(piped);
            return apply_function(name, args);
        }
    }

    if piped.is_some() {
        return Err(syntax("only functions can receive a piped value"));
    }
    match operands.as_slice() {
        [single] => Ok(single.clone()),
        _ => Err(syntax("unexpected operands; did you mean to call a function?")),
    }
}

fn split_operands(tokens: &[Token], dot: Option<&str>) -> Result<Vec<String>, FragsError> {
    let mut operands = Vec::new();
    let mut i = 0;
    while i < tokens.len() {
        match &tokens[i] {
            Token::LParen => {
                let mut depth = 0;
                let mut j = i;
                loop {
                    match tokens.get(j) {
                        Some(Token::LParen) => depth += 1,
                        Some(Token::RParen) => {
                            depth -= 1;
                            if depth == 0 {
                                break;
                            }
                        }
                        Some(_) => {}
                        None => return Err(syntax("unbalanced '('")),
                    }
                    j += 1;
                }
                // Function results come back parenthesized; terms are atomic.
                operands.push(translate_pipeline(&tokens[i + 1..j], dot)?);
                i = j + 1;
            }
            token => {
                operands.push(translate_term(token, dot)?);
                i += 1;
            }
        }
    }
    Ok(operands)
}

fn translate_term(token: &Token, dot: Option<&str>) -> Result<String, FragsError> {
    match token {
        Token::Field(path) => {
            let segments: Vec<&str> = path.split('.').filter(|s| !s.is_empty()).collect();
            match dot {
                Some(current) => Ok(access(current, &segments)),
                None => match segments.split_first() {
                    Some((head, tail)) if is_ident(head) => Ok(access(head, tail)),
                    Some((head, _)) => Err(syntax(format!("invalid field name '{}'", head))),
                    None => Err(syntax("'.' has no value outside 'range'")),
                },
            }
        }
        Token::Var(path) => {
            let body = &path[1..];
            if let Some(root_path) = body.strip_prefix('.') {
                return translate_term(&Token::Field(format!(".{}", root_path)), None);
            }
            if body.is_empty() {
                return Err(syntax("bare '$' is not supported"));
            }
            let segments: Vec<&str> = body.split('.').filter(|s| !s.is_empty()).collect();
            match segments.split_first() {
                Some((head, tail)) if is_ident(head) => Ok(access(head, tail)),
                _ => Err(syntax(format!("invalid variable '{}'", path))),
            }
        }
        Token::Str(s) => Ok(s.clone()),
        Token::Num(n) => Ok(n.clone()),
        Token::Ident(name) => Ok(match name.as_str() {
            "nil" => "none".to_string(),
            other => other.to_string(),
        }),
        other => Err(syntax(format!("unexpected token {:?}", other))),
    }
}

fn access(base: &str, segments: &[&str]) -> String {
    let mut out = base.to_string();
    for segment in segments {
        if is_ident(segment) {
            out.push('.');
            out.push_str(segment);
        } else {
            out.push_str(&format!("[{}]", serde_json::Value::from(*segment)));
        }
    }
    out
}

fn is_ident(s: &str) -> bool {
    let mut chars = s.chars();
    matches!(chars.next(), Some(c) if c.is_alphabetic() || c == '_')
        && chars.all(|c| c.is_alphanumeric() || c == '_')
}

fn apply_function(name: &str, args: Vec<String>) -> Result<String, FragsError> {
    let arity = |n: usize| {
        if args.len() == n {
            Ok(())
        } else {
            Err(syntax(format!("'{}' expects {} argument(s), got {}", name, n, args.len())))
        }
    };

    let compare = |op: &str| -> Result<String, FragsError> {
        arity(2)?;
        Ok(format!("({} {} {})", args[0], op, args[1]))
    };

    match name {
        "eq" => {
            if args.len() < 2 {
                return Err(syntax("'eq' expects at least 2 arguments"));
            }
            let alternatives: Vec<String> = args[1..]
                .iter()
                .map(|other| format!("{} == {}", args[0], other))
                .collect();
            Ok(format!("({})", alternatives.join(" or ")))
        }
        "ne" => compare("!="),
        "lt" => compare("<"),
        "le" => compare("<="),
        "gt" => compare(">"),
        "ge" => compare(">="),
        "and" | "or" => {
            if args.is_empty() {
                return Err(syntax(format!("'{}' expects arguments", name)));
            }
            Ok(format!("({})", args.join(&format!(" {} ", name))))
        }
        "not" => {
            arity(1)?;
            Ok(format!("(not {})", args[0]))
        }
        "len" => {
            arity(1)?;
            Ok(format!("({}|length)", args[0]))
        }
        "index" => {
            if args.len() < 2 {
                return Err(syntax("'index' expects a collection and at least one key"));
            }
            let mut out = args[0].clone();
            for key in &args[1..] {
                out.push_str(&format!("[{}]", key));
            }
            Ok(out)
        }
        "json" => {
            arity(1)?;
            Ok(format!("({}|tojson)", args[0]))
        }
        "print" => Ok(format!("({})", args.join(" ~ "))),
        "default" => {
            arity(2)?;
            Ok(format!("({}|default({}))", args[1], args[0]))
        }
        // Any other name is a minijinja filter; the piped/last value is its input.
        filter => match args.split_last() {
            Some((input, [])) => Ok(format!("({}|{})", input, filter)),
            Some((input, extra)) => Ok(format!("({}|{}({}))", input, filter, extra.join(", "))),
            None => Err(syntax(format!("'{}' expects an argument", filter))),
        },
    }
}

fn syntax(message: impl Into<String>) -> FragsError {
    FragsError::PlanParse(format!("template syntax: {}", message.into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_access() {
        assert_eq!(
            translate("Topic: {{ .progress.A.topic }}").unwrap(),
            "Topic: {{ progress.A.topic }}"
        );
        assert_eq!(
            translate("{{ .progress.my-session.x }}").unwrap(),
            r#"{{ progress["my-session"].x }}"#
        );
    }

    #[test]
    fn test_if_else_if_chain() {
        let out = translate(r#"{{ if eq .params.mode "a" }}A{{ else if gt (len .vars.items) 2 }}B{{ else }}C{{ end }}"#)
            .unwrap();
        assert_eq!(
            out,
            r#"{% if (params.mode == "a") %}A{% elif ((vars.items|length) > 2) %}B{% else %}C{% endif %}"#
        );
    }

    #[test]
    fn test_range_rebinds_dot() {
        let out = translate("{{ range .params.items }}- {{ .name }} of {{ $.params.owner }}\n{{ end }}").unwrap();
        assert_eq!(
            out,
            "{% for _it0 in (params.items)|range_values %}- {{ _it0.name }} of {{ params.owner }}\n{% endfor %}"
        );
    }

    #[test]
    fn test_pipelines_become_filters() {
        assert_eq!(
            translate(r#"{{ .params.name | upper }}"#).unwrap(),
            "{{ (params.name|upper) }}"
        );
        assert_eq!(
            translate(r#"{{ .params.missing | default "none" }}"#).unwrap(),
            r#"{{ (params.missing|default("none")) }}"#
        );
        assert_eq!(translate("{{ json .vars }}").unwrap(), "{{ (vars|tojson) }}");
    }

    #[test]
    fn test_native_syntax_passes_through() {
        let src = "{% for x in params.items %}{{ x | upper }}{% endfor %}{# note #}";
        assert_eq!(translate(src).unwrap(), src);
    }

    #[test]
    fn test_trim_markers_and_comments() {
        assert_eq!(
            translate("a {{- if .params.x -}} b {{- end }}{{/* hidden */}}").unwrap(),
            "a {%- if params.x -%} b {%- endif %}{# hidden #}"
        );
    }

    #[test]
    fn test_degenerate_comments() {
        assert_eq!(translate("{{/**/}}").unwrap(), "{##}");
        assert!(translate("a {{/*/}} b").is_err());
        assert!(translate("{{/* open }}").is_err());
    }

    #[test]
    fn test_unbalanced_blocks_fail() {
        assert!(translate("{{ if .params.x }}open").is_err());
        assert!(translate("{{ end }}").is_err());
        assert!(translate("{{ .params.x").is_err());
    }

    #[test]
    fn test_single_expression() {
        assert_eq!(
            single_expression("{{ .params.count }}").unwrap().as_deref(),
            Some("params.count")
        );
        assert_eq!(single_expression("n={{ .params.count }}").unwrap(), None);
        assert_eq!(single_expression("{{ .a }}{{ .b }}").unwrap(), None);
    }
}
