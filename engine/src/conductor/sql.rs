//! Static SQL checks
//!
//! Cheap lexical inspection of generated SQL shared by the generator (safety
//! gate) and the evaluator (heuristic scores). This is not a parser; string
//! literals and comments are blanked out first so their contents never
//! trigger a keyword match.

use regex::Regex;
use std::sync::OnceLock;

/// Statements that must never reach the executor
pub const DESTRUCTIVE_KEYWORDS: [&str; 9] = [
    "DROP", "DELETE", "TRUNCATE", "ALTER", "INSERT", "UPDATE", "GRANT", "REVOKE", "CREATE",
];

struct Patterns {
    destructive: Regex,
    cross_join: Regex,
    comma_join: Regex,
    where_clause: Regex,
    select_star: Regex,
    table_ref: Regex,
}

static PATTERNS: OnceLock<Patterns> = OnceLock::new();

fn patterns() -> &'static Patterns {
    PATTERNS.get_or_init(|| Patterns {
        destructive: Regex::new(&format!(r"(?i)\b({})\b", DESTRUCTIVE_KEYWORDS.join("|")))
            .expect("Invalid destructive pattern"),
        cross_join: Regex::new(r"(?i)\bCROSS\s+JOIN\b").expect("Invalid cross join pattern"),
        // FROM a [AS x], b
        comma_join: Regex::new(r#"(?i)\bFROM\s+[\w."]+(\s+(AS\s+)?\w+)?\s*,"#)
            .expect("Invalid comma join pattern"),
        where_clause: Regex::new(r"(?i)\bWHERE\b").expect("Invalid where pattern"),
        select_star: Regex::new(r"(?i)\bSELECT\s+(DISTINCT\s+)?\*").expect("Invalid star pattern"),
        table_ref: Regex::new(r"(?i)\b(?:FROM|JOIN)\s+([A-Za-z_][\w.]*)")
            .expect("Invalid table pattern"),
    })
}

/// Blank out string literals and comments
pub fn strip_literals(sql: &str) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut chars = sql.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\'' => {
                out.push_str("''");
                // '' inside a literal is an escaped quote
                while let Some(inner) = chars.next() {
                    if inner == '\'' {
                        if chars.peek() == Some(&'\'') {
                            chars.next();
                            continue;
                        }
                        break;
                    }
                }
            }
            '-' if chars.peek() == Some(&'-') => {
                for inner in chars.by_ref() {
                    if inner == '\n' {
                        out.push('\n');
                        break;
                    }
                }
            }
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                let mut prev = '\0';
                for inner in chars.by_ref() {
                    if prev == '*' && inner == '/' {
                        break;
                    }
                    prev = inner;
                }
                out.push(' ');
            }
            _ => out.push(c),
        }
    }

    out
}

/// First destructive keyword in `sql`, upper-cased
pub fn destructive_keyword(sql: &str) -> Option<String> {
    patterns()
        .destructive
        .find(&strip_literals(sql))
        .map(|m| m.as_str().to_uppercase())
}

/// Statement starts with SELECT or WITH
pub fn is_read_statement(sql: &str) -> bool {
    let stripped = strip_literals(sql);
    let head = stripped.trim_start().trim_start_matches('(').trim_start();
    let upper = head.get(..6).unwrap_or(head).to_uppercase();
    upper.starts_with("SELECT") || upper.starts_with("WITH")
}

pub fn balanced_parens(sql: &str) -> bool {
    let mut depth = 0i64;
    for c in strip_literals(sql).chars() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth < 0 {
                    return false;
                }
            }
            _ => {}
        }
    }
    depth == 0
}

/// `CROSS JOIN`, or a comma join with no `WHERE`
pub fn has_unbounded_cross_join(sql: &str) -> bool {
    let stripped = strip_literals(sql);
    let p = patterns();
    p.cross_join.is_match(&stripped)
        || (p.comma_join.is_match(&stripped) && !p.where_clause.is_match(&stripped))
}

pub fn selects_star(sql: &str) -> bool {
    patterns().select_star.is_match(&strip_literals(sql))
}

/// Table names after FROM/JOIN, in first-seen order
pub fn referenced_tables(sql: &str) -> Vec<String> {
    let stripped = strip_literals(sql);
    let mut tables: Vec<String> = Vec::new();
    for cap in patterns().table_ref.captures_iter(&stripped) {
        let name = cap[1].to_lowercase();
        if !tables.contains(&name) {
            tables.push(name);
        }
    }
    tables
}
