//! SPARQL triple-pattern extraction (C2).
//!
//! This is *not* a general SPARQL parser. Per spec it understands only the
//! subset needed to drive cache invalidation: `PREFIX` declarations,
//! `FROM`/`FROM NAMED` graph URIs, and the triple patterns inside a
//! `WHERE` block (or an `INSERT DATA`/`DELETE DATA` block, for update
//! queries). Anything else in the query body — `FILTER`, `BIND`, property
//! paths, subqueries — is either skipped or flattened conservatively; the
//! cache only needs to know which patterns *could* match a write, and
//! over-approximating that set is sound (it just costs an extra
//! invalidation), while under-approximating it is not.

use std::collections::HashMap;

use crate::error::PatternError;

/// The kind of term occupying one position of a triple pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TermType {
    Uri,
    Var,
    Literal,
    Bnode,
}

/// One term (subject, predicate, or object) of an extracted triple pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatternTerm {
    pub text: String,
    pub term_type: TermType,
}

impl PatternTerm {
    fn uri(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            term_type: TermType::Uri,
        }
    }

    fn var(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            term_type: TermType::Var,
        }
    }

    fn literal(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            term_type: TermType::Literal,
        }
    }

    fn bnode(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            term_type: TermType::Bnode,
        }
    }

    /// The short-hash key contribution for this term: the hash of its URI
    /// text if it is a URI, or the literal wildcard `*` for anything else.
    pub fn key_fragment(&self) -> String {
        match self.term_type {
            TermType::Uri => crate::hash::term_fragment(&self.text),
            _ => "*".to_string(),
        }
    }
}

/// One triple pattern found in the query, tagged with the graph it applies
/// to.
///
/// `graph: None` means the pattern was not wrapped in an explicit `GRAPH`
/// block — it applies to every graph in the query's `FROM` set (or to the
/// single synthetic `""` graph if there is no `FROM`). `graph: Some(uri)`
/// means the pattern was scoped by `GRAPH <uri> { ... }` (or degraded to
/// `Some(String::new())` for `GRAPH ?var { ... }`, since the bound graph
/// isn't known until evaluation).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedTriple {
    pub graph: Option<String>,
    pub s: PatternTerm,
    pub p: PatternTerm,
    pub o: PatternTerm,
}

/// Whether a query reads (and is memoization-eligible) or writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryKind {
    Read,
    Update,
}

/// Result of extracting a query's cache-relevant structure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedQuery {
    /// `FROM`/`FROM NAMED` graph URIs. Empty unless the query had at least
    /// one `FROM` clause — callers substitute the single synthetic `""`
    /// graph when this is empty.
    pub graphs: Vec<String>,
    pub patterns: Vec<ExtractedTriple>,
    pub kind: QueryKind,
}

const RDF_TYPE: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#type";

/// Extract the `FROM` graphs and `WHERE` triple patterns from `query`.
pub fn extract(query: &str) -> Result<ExtractedQuery, PatternError> {
    let trimmed = query.trim();
    if trimmed.is_empty() {
        return Err(PatternError::MalformedQuery {
            reason: "query is empty".into(),
        });
    }
    check_balanced(trimmed)?;

    let prefixes = parse_prefixes(trimmed);
    let kind = classify_kind(trimmed);
    let graphs = parse_from_graphs(trimmed);

    let body = find_body(trimmed);
    let mut patterns = Vec::new();
    if let Some(body) = body {
        parse_group(body, None, &prefixes, &mut patterns)?;
    }

    Ok(ExtractedQuery {
        graphs,
        patterns,
        kind,
    })
}

/// `true` if the query is a read form the cache is allowed to memoize.
pub fn is_read(kind: QueryKind) -> bool {
    matches!(kind, QueryKind::Read)
}

// ---------------------------------------------------------------------------
// Top-level classification
// ---------------------------------------------------------------------------

fn classify_kind(query: &str) -> QueryKind {
    let lower = strip_prefix_decls(query).trim_start().to_ascii_lowercase();
    const UPDATE_VERBS: &[&str] = &[
        "insert", "delete", "clear", "drop", "create", "load", "move", "copy", "add",
    ];
    for verb in UPDATE_VERBS {
        if lower.starts_with(verb) {
            return QueryKind::Update;
        }
    }
    QueryKind::Read
}

fn strip_prefix_decls<'a>(query: &'a str) -> &'a str {
    let mut rest = query.trim_start();
    loop {
        let lower_peek = rest.trim_start();
        let lowered = lower_peek.to_ascii_lowercase();
        if lowered.starts_with("prefix") || lowered.starts_with("base") {
            match rest.find('>') {
                Some(idx) => rest = &rest[idx + 1..],
                None => break,
            }
        } else {
            break;
        }
    }
    rest
}

// ---------------------------------------------------------------------------
// PREFIX resolution
// ---------------------------------------------------------------------------

fn parse_prefixes(query: &str) -> HashMap<String, String> {
    let mut prefixes = HashMap::new();
    let bytes = query.as_bytes();
    let lower = query.to_ascii_lowercase();
    let mut search_from = 0usize;
    while let Some(rel) = lower[search_from..].find("prefix") {
        let start = search_from + rel;
        // Require a word boundary before "prefix".
        if start > 0 && (bytes[start - 1] as char).is_alphanumeric() {
            search_from = start + 6;
            continue;
        }
        let after = &query[start + 6..];
        if let Some((name, uri, consumed)) = parse_one_prefix(after) {
            prefixes.insert(name, uri);
            search_from = start + 6 + consumed;
        } else {
            search_from = start + 6;
        }
    }
    prefixes
}

fn parse_one_prefix(text: &str) -> Option<(String, String, usize)> {
    let text_trimmed_start = text.trim_start();
    let skipped = text.len() - text_trimmed_start.len();
    let colon_idx = text_trimmed_start.find(':')?;
    let name = text_trimmed_start[..colon_idx].trim().to_string();
    let after_colon = &text_trimmed_start[colon_idx + 1..];
    let after_colon_trimmed = after_colon.trim_start();
    if !after_colon_trimmed.starts_with('<') {
        return None;
    }
    let close = after_colon_trimmed.find('>')?;
    let uri = after_colon_trimmed[1..close].to_string();
    let consumed = skipped
        + colon_idx
        + 1
        + (after_colon.len() - after_colon_trimmed.len())
        + close
        + 1;
    Some((name, uri, consumed))
}

fn resolve_prefixed_name(token: &str, prefixes: &HashMap<String, String>) -> String {
    match token.find(':') {
        Some(idx) => {
            let prefix = &token[..idx];
            let local = &token[idx + 1..];
            match prefixes.get(prefix) {
                Some(ns) => format!("{ns}{local}"),
                None => token.to_string(),
            }
        }
        None => token.to_string(),
    }
}

// ---------------------------------------------------------------------------
// FROM graphs
// ---------------------------------------------------------------------------

fn parse_from_graphs(query: &str) -> Vec<String> {
    let mut graphs = Vec::new();
    let lower = query.to_ascii_lowercase();
    let bytes = query.as_bytes();
    let mut search_from = 0usize;
    while let Some(rel) = lower[search_from..].find("from") {
        let start = search_from + rel;
        if start > 0 && (bytes[start - 1] as char).is_alphanumeric() {
            search_from = start + 4;
            continue;
        }
        let after = &query[start + 4..];
        let after_trim = after.trim_start();
        let without_named = if after_trim.to_ascii_lowercase().starts_with("named") {
            after_trim[5..].trim_start()
        } else {
            after_trim
        };
        if without_named.starts_with('<') {
            if let Some(close) = without_named.find('>') {
                let uri = without_named[1..close].to_string();
                if !graphs.contains(&uri) {
                    graphs.push(uri);
                }
                search_from = start + 4 + (after.len() - without_named.len()) + close + 1;
                continue;
            }
        }
        search_from = start + 4;
    }
    graphs
}

// ---------------------------------------------------------------------------
// Locating the pattern body
// ---------------------------------------------------------------------------

/// Find the `{ ... }` block holding triple patterns: the one after `WHERE`
/// for read queries, or the one after `DATA`/a bare update verb for update
/// queries. Returns the inner text (braces stripped).
fn find_body(query: &str) -> Option<&str> {
    let lower = query.to_ascii_lowercase();
    let anchor = if let Some(idx) = find_word(&lower, "where") {
        idx + 5
    } else if let Some(idx) = find_word(&lower, "data") {
        idx + 4
    } else {
        0
    };
    let rest = &query[anchor..];
    let open = rest.find('{')?;
    let (inner, _) = extract_balanced(&rest[open..])?;
    Some(inner)
}

fn find_word(haystack: &str, word: &str) -> Option<usize> {
    let bytes = haystack.as_bytes();
    let mut from = 0;
    while let Some(rel) = haystack[from..].find(word) {
        let start = from + rel;
        let end = start + word.len();
        let before_ok = start == 0 || !(bytes[start - 1] as char).is_alphanumeric();
        let after_ok = end == bytes.len() || !(bytes[end] as char).is_alphanumeric();
        if before_ok && after_ok {
            return Some(start);
        }
        from = start + word.len();
    }
    None
}

/// `text` must start with `{`. Returns the inner text (braces stripped) and
/// the byte length of the whole `{ ... }` span, respecting nested braces
/// and quoted/IRI literals.
fn extract_balanced(text: &str) -> Option<(&str, usize)> {
    let bytes = text.as_bytes();
    debug_assert_eq!(bytes[0], b'{');
    let mut depth = 0i32;
    let mut i = 0usize;
    let mut in_str: Option<u8> = None;
    while i < bytes.len() {
        let c = bytes[i];
        if let Some(q) = in_str {
            if c == q {
                in_str = None;
            }
            i += 1;
            continue;
        }
        match c {
            b'"' | b'\'' => {
                in_str = Some(c);
                i += 1;
            }
            b'<' => {
                // Skip an IRI span so braces inside it (never valid, but be safe) don't confuse depth.
                if let Some(close) = text[i..].find('>') {
                    i += close + 1;
                } else {
                    i += 1;
                }
            }
            b'{' => {
                depth += 1;
                i += 1;
            }
            b'}' => {
                depth -= 1;
                i += 1;
                if depth == 0 {
                    return Some((&text[1..i - 1], i));
                }
            }
            _ => i += 1,
        }
    }
    None
}

fn check_balanced(query: &str) -> Result<(), PatternError> {
    let bytes = query.as_bytes();
    let mut depth = 0i32;
    let mut i = 0usize;
    let mut in_str: Option<u8> = None;
    while i < bytes.len() {
        let c = bytes[i];
        if let Some(q) = in_str {
            if c == q {
                in_str = None;
            }
            i += 1;
            continue;
        }
        match c {
            b'"' | b'\'' => {
                in_str = Some(c);
                i += 1;
            }
            b'<' => {
                if let Some(close) = query[i..].find('>') {
                    i += close + 1;
                } else {
                    return Err(PatternError::UnterminatedLiteral);
                }
            }
            b'{' => {
                depth += 1;
                i += 1;
            }
            b'}' => {
                depth -= 1;
                i += 1;
                if depth < 0 {
                    return Err(PatternError::UnbalancedBraces);
                }
            }
            _ => i += 1,
        }
    }
    if in_str.is_some() {
        return Err(PatternError::UnterminatedLiteral);
    }
    if depth != 0 {
        return Err(PatternError::UnbalancedBraces);
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Group / statement / term parsing
// ---------------------------------------------------------------------------

enum Segment<'a> {
    Triples(&'a str),
    Block { header: &'a str, inner: &'a str },
}

fn split_segments(body: &str) -> Vec<Segment<'_>> {
    let bytes = body.as_bytes();
    let mut segments = Vec::new();
    let mut i = 0usize;
    let mut text_start = 0usize;
    let mut in_str: Option<u8> = None;
    while i < bytes.len() {
        let c = bytes[i];
        if let Some(q) = in_str {
            if c == q {
                in_str = None;
            }
            i += 1;
            continue;
        }
        match c {
            b'"' | b'\'' => {
                in_str = Some(c);
                i += 1;
            }
            b'<' => {
                if let Some(close) = body[i..].find('>') {
                    i += close + 1;
                } else {
                    i += 1;
                }
            }
            b'{' => {
                let preceding = &body[text_start..i];
                let (leading_triples, header) = split_leading_keyword(preceding);
                let leading_triples = leading_triples.trim();
                if !leading_triples.is_empty() {
                    segments.push(Segment::Triples(leading_triples));
                }
                if let Some((inner, span)) = extract_balanced(&body[i..]) {
                    segments.push(Segment::Block {
                        header: header.trim(),
                        inner,
                    });
                    i += span;
                    text_start = i;
                } else {
                    i += 1;
                }
            }
            _ => i += 1,
        }
    }
    if text_start < body.len() {
        let tail = body[text_start..].trim();
        if !tail.is_empty() {
            segments.push(Segment::Triples(tail));
        }
    }
    segments
}

/// Split the text immediately preceding a `{` into (leading triples text,
/// scoping keyword). Recognizes a trailing `GRAPH <uri>`/`GRAPH ?var` or a
/// bare `OPTIONAL`/`UNION`/`MINUS` keyword; anything else is treated as a
/// plain nested group with no keyword (scope inherited from the caller).
fn split_leading_keyword(text: &str) -> (&str, &str) {
    let trimmed = text.trim_end();
    let lower = trimmed.to_ascii_lowercase();
    if let Some(g_idx) = rfind_word(&lower, "graph") {
        let after = trimmed[g_idx + 5..].trim_start();
        let looks_like_term = after.starts_with('<') || after.starts_with('?') || after.starts_with('$');
        if looks_like_term && !after.is_empty() {
            return (&trimmed[..g_idx], &trimmed[g_idx..]);
        }
    }
    if let Some(ws_idx) = trimmed.rfind(|ch: char| ch.is_whitespace()) {
        let last_word = &trimmed[ws_idx + 1..];
        let last_lower = last_word.to_ascii_lowercase();
        if matches!(last_lower.as_str(), "optional" | "union" | "minus") {
            return (&trimmed[..ws_idx], last_word);
        }
    } else {
        let last_lower = trimmed.to_ascii_lowercase();
        if matches!(last_lower.as_str(), "optional" | "union" | "minus") {
            return ("", trimmed);
        }
    }
    (trimmed, "")
}

/// Like [`find_word`] but returns the last (rightmost) word-boundary match.
fn rfind_word(haystack: &str, word: &str) -> Option<usize> {
    let bytes = haystack.as_bytes();
    let mut best = None;
    let mut from = 0;
    while let Some(rel) = haystack[from..].find(word) {
        let start = from + rel;
        let end = start + word.len();
        let before_ok = start == 0 || !(bytes[start - 1] as char).is_alphanumeric();
        let after_ok = end == bytes.len() || !(bytes[end] as char).is_alphanumeric();
        if before_ok && after_ok {
            best = Some(start);
        }
        from = start + word.len();
    }
    best
}

fn parse_group(
    body: &str,
    current_graph: Option<String>,
    prefixes: &HashMap<String, String>,
    out: &mut Vec<ExtractedTriple>,
) -> Result<(), PatternError> {
    for segment in split_segments(body) {
        match segment {
            Segment::Triples(text) => {
                for stmt in split_statements(text) {
                    parse_statement(stmt, current_graph.clone(), prefixes, out);
                }
            }
            Segment::Block { header, inner } => {
                let header_lower = header.to_ascii_lowercase();
                let next_graph = if header_lower.starts_with("graph") {
                    let rest = header[5..].trim();
                    if rest.starts_with('<') && rest.ends_with('>') {
                        Some(resolve_prefixed_name(&rest[1..rest.len() - 1], prefixes))
                    } else {
                        // GRAPH ?var — variable graphs degrade to empty-string.
                        Some(String::new())
                    }
                } else {
                    current_graph.clone()
                };
                parse_group(inner, next_graph, prefixes, out)?;
            }
        }
    }
    Ok(())
}

/// Split a triples block on top-level `.` terminators, respecting quotes
/// and IRIs.
fn split_statements(text: &str) -> Vec<&str> {
    let bytes = text.as_bytes();
    let mut stmts = Vec::new();
    let mut start = 0usize;
    let mut i = 0usize;
    let mut in_str: Option<u8> = None;
    while i < bytes.len() {
        let c = bytes[i];
        if let Some(q) = in_str {
            if c == q {
                in_str = None;
            }
            i += 1;
            continue;
        }
        match c {
            b'"' | b'\'' => {
                in_str = Some(c);
                i += 1;
            }
            b'<' => {
                if let Some(close) = text[i..].find('>') {
                    i += close + 1;
                } else {
                    i += 1;
                }
            }
            b'.' => {
                let next_ok = i + 1 >= bytes.len() || (bytes[i + 1] as char).is_whitespace();
                let prev_is_digit = i > 0 && (bytes[i - 1] as char).is_ascii_digit();
                if next_ok && !prev_is_digit {
                    let stmt = text[start..i].trim();
                    if !stmt.is_empty() {
                        stmts.push(stmt);
                    }
                    start = i + 1;
                }
                i += 1;
            }
            _ => i += 1,
        }
    }
    let tail = text[start..].trim();
    if !tail.is_empty() {
        stmts.push(tail);
    }
    stmts
}

/// Tokenize a statement into terms and `;`/`,` separators.
fn tokenize(text: &str) -> Vec<String> {
    let bytes = text.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0usize;
    while i < bytes.len() {
        let c = bytes[i] as char;
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        if c == ';' || c == ',' {
            tokens.push(c.to_string());
            i += 1;
            continue;
        }
        if c == '<' {
            if let Some(close) = text[i..].find('>') {
                tokens.push(text[i..i + close + 1].to_string());
                i += close + 1;
            } else {
                i += 1;
            }
            continue;
        }
        if c == '"' || c == '\'' {
            let quote = c;
            let triple = text[i..].starts_with(&format!("{quote}{quote}{quote}"));
            let delim_len = if triple { 3 } else { 1 };
            let search_start = i + delim_len;
            let close_rel = if search_start <= text.len() {
                text[search_start..].find(&quote.to_string().repeat(delim_len))
            } else {
                None
            };
            let end = match close_rel {
                Some(rel) => search_start + rel + delim_len,
                None => text.len(),
            };
            let mut j = end;
            // Absorb an optional ^^<iri>/^^prefixed or @lang suffix.
            if j < bytes.len() {
                if bytes[j] == b'^' && j + 1 < bytes.len() && bytes[j + 1] == b'^' {
                    j += 2;
                    if j < bytes.len() && bytes[j] == b'<' {
                        if let Some(close) = text[j..].find('>') {
                            j += close + 1;
                        }
                    } else {
                        while j < bytes.len() && !(bytes[j] as char).is_whitespace() && bytes[j] != b'.' {
                            j += 1;
                        }
                    }
                } else if bytes[j] == b'@' {
                    j += 1;
                    while j < bytes.len() && ((bytes[j] as char).is_alphanumeric() || bytes[j] == b'-') {
                        j += 1;
                    }
                }
            }
            tokens.push(text[i..j].to_string());
            i = j;
            continue;
        }
        let start = i;
        while i < bytes.len() {
            let ch = bytes[i] as char;
            if ch.is_whitespace() || ch == ';' || ch == ',' {
                break;
            }
            i += 1;
        }
        tokens.push(text[start..i].to_string());
    }
    tokens
}

fn classify_term(token: &str, prefixes: &HashMap<String, String>) -> PatternTerm {
    if token.starts_with('<') && token.ends_with('>') {
        return PatternTerm::uri(resolve_prefixed_name(&token[1..token.len() - 1], prefixes));
    }
    if token == "a" {
        return PatternTerm::uri(RDF_TYPE);
    }
    if token.starts_with('?') || token.starts_with('$') {
        return PatternTerm::var(token);
    }
    if token.starts_with("_:") {
        return PatternTerm::bnode(token);
    }
    if token.starts_with('"') || token.starts_with('\'') {
        return PatternTerm::literal(token);
    }
    if is_numeric_or_bool(token) {
        return PatternTerm::literal(token);
    }
    // Prefixed name (`ex:Foo`, `:Foo`) — resolved to an absolute IRI.
    PatternTerm::uri(resolve_prefixed_name(token, prefixes))
}

fn is_numeric_or_bool(token: &str) -> bool {
    if token == "true" || token == "false" {
        return true;
    }
    token
        .trim_start_matches(['+', '-'])
        .chars()
        .all(|c| c.is_ascii_digit() || c == '.')
        && token.chars().any(|c| c.is_ascii_digit())
}

fn parse_statement(
    stmt: &str,
    graph: Option<String>,
    prefixes: &HashMap<String, String>,
    out: &mut Vec<ExtractedTriple>,
) {
    let tokens = tokenize(stmt);
    if tokens.is_empty() {
        return;
    }

    // Split on top-level ';' into predicate-object groups; the first group
    // also carries the subject.
    let mut groups: Vec<Vec<String>> = vec![Vec::new()];
    for tok in tokens {
        if tok == ";" {
            groups.push(Vec::new());
        } else {
            groups.last_mut().unwrap().push(tok);
        }
    }

    let Some(first) = groups.first() else { return };
    if first.len() < 2 {
        return; // not triple-shaped (e.g. a bare FILTER/BIND statement)
    }
    let subject_tok = first[0].clone();
    let subject = classify_term(&subject_tok, prefixes);

    for (idx, group) in groups.iter().enumerate() {
        let rest: &[String] = if idx == 0 { &group[1..] } else { &group[..] };
        if rest.is_empty() {
            continue;
        }
        let predicate = classify_term(rest[0].as_str(), prefixes);
        let mut pending_object: Option<&str> = None;
        for tok in &rest[1..] {
            if tok.as_str() == "," {
                if let Some(obj_tok) = pending_object.take() {
                    out.push(ExtractedTriple {
                        graph: graph.clone(),
                        s: subject.clone(),
                        p: predicate.clone(),
                        o: classify_term(obj_tok, prefixes),
                    });
                }
            } else {
                pending_object = Some(tok.as_str());
            }
        }
        if let Some(obj_tok) = pending_object {
            out.push(ExtractedTriple {
                graph: graph.clone(),
                s: subject.clone(),
                p: predicate.clone(),
                o: classify_term(obj_tok, prefixes),
            });
        }
    }
}
