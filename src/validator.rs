//! Per-endpoint parameter validation.
//!
//! An endpoint carries an ordered rule list; each rule names a parameter,
//! whether it is required, the type it must parse as, and an optional
//! predicate over the typed value. The first failing rule short-circuits and
//! its message becomes the 400 body.

use crate::http::request::Request;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use std::{str::FromStr, sync::Arc};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    Str,
    Int,
    Date,
    Decimal,
}

/// A parameter value after typed extraction, as seen by predicates.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Str(String),
    Int(i64),
    Date(NaiveDate),
    Decimal(Decimal),
}

type Predicate = Arc<dyn Fn(&ParamValue) -> bool + Send + Sync>;

#[derive(Clone)]
pub struct Rule {
    name: String,
    required: bool,
    kind: ParamKind,
    predicate: Option<Predicate>,
    message: String,
}

impl Rule {
    pub fn required(name: &str, kind: ParamKind, message: &str) -> Self {
        Self {
            name: name.to_string(),
            required: true,
            kind,
            predicate: None,
            message: message.to_string(),
        }
    }

    pub fn optional(name: &str, kind: ParamKind, message: &str) -> Self {
        Self {
            required: false,
            ..Self::required(name, kind, message)
        }
    }

    /// Attaches a predicate over the typed value.
    pub fn check(mut self, predicate: impl Fn(&ParamValue) -> bool + Send + Sync + 'static) -> Self {
        self.predicate = Some(Arc::new(predicate));
        self
    }

    fn apply(&self, req: &Request) -> Result<(), &str> {
        let raw = match req.param(&self.name) {
            Some(raw) if !raw.is_empty() => raw,
            _ if self.required => return Err(&self.message),
            _ => return Ok(()),
        };

        let value = extract(self.kind, raw).ok_or(self.message.as_str())?;

        match &self.predicate {
            Some(predicate) if !predicate(&value) => Err(&self.message),
            _ => Ok(()),
        }
    }
}

impl std::fmt::Debug for Rule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Rule")
            .field("name", &self.name)
            .field("required", &self.required)
            .field("kind", &self.kind)
            .field("has_predicate", &self.predicate.is_some())
            .finish()
    }
}

fn extract(kind: ParamKind, raw: &str) -> Option<ParamValue> {
    match kind {
        ParamKind::Str => Some(ParamValue::Str(raw.to_string())),
        ParamKind::Int => raw.parse::<i64>().ok().map(ParamValue::Int),
        ParamKind::Date => NaiveDate::parse_from_str(raw, "%Y-%m-%d")
            .ok()
            .map(ParamValue::Date),
        ParamKind::Decimal => Decimal::from_str(raw).ok().map(ParamValue::Decimal),
    }
}

/// Ordered rule set; empty by default.
#[derive(Debug, Clone, Default)]
pub struct Validator {
    rules: Vec<Rule>,
}

impl Validator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rule(mut self, rule: Rule) -> Self {
        self.rules.push(rule);
        self
    }

    /// First failure wins; its message is the caller's 400 body.
    pub fn validate<'a>(&'a self, req: &Request) -> Result<(), &'a str> {
        for rule in &self.rules {
            rule.apply(req)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::request::parse_bytes;

    fn req(query: &str) -> Request {
        parse_bytes(format!("GET /x{query} HTTP/1.1\r\n\r\n").as_bytes()).unwrap()
    }

    #[test]
    fn typed_extraction() {
        #[rustfmt::skip]
        let cases = [
            (ParamKind::Str,     "?v=hello",      true),
            (ParamKind::Int,     "?v=42",         true),
            (ParamKind::Int,     "?v=-3",         true),
            (ParamKind::Int,     "?v=4.5",        false),
            (ParamKind::Int,     "?v=abc",        false),
            (ParamKind::Date,    "?v=2024-02-29", true),
            (ParamKind::Date,    "?v=2023-02-29", false),
            (ParamKind::Date,    "?v=29/02/2024", false),
            (ParamKind::Decimal, "?v=19.99",      true),
            (ParamKind::Decimal, "?v=19,99",      false),
        ];

        for (kind, query, ok) in cases {
            let v = Validator::new().rule(Rule::required("v", kind, "bad v"));
            assert_eq!(v.validate(&req(query)).is_ok(), ok, "{kind:?} {query}");
        }
    }

    #[test]
    fn required_vs_optional() {
        let required = Validator::new().rule(Rule::required("id", ParamKind::Str, "id required"));
        let optional = Validator::new().rule(Rule::optional("id", ParamKind::Int, "id must be int"));

        assert_eq!(required.validate(&req("")), Err("id required"));
        assert_eq!(required.validate(&req("?id=")), Err("id required"));
        assert!(required.validate(&req("?id=x")).is_ok());

        assert!(optional.validate(&req("")).is_ok());
        assert!(optional.validate(&req("?id=7")).is_ok());
        assert_eq!(optional.validate(&req("?id=x")), Err("id must be int"));
    }

    #[test]
    fn predicate_over_typed_value() {
        let v = Validator::new().rule(
            Rule::required(
                "id",
                ParamKind::Str,
                "Customer ID must be exactly 5 alphabetic characters.",
            )
            .check(|v| match v {
                ParamValue::Str(s) => s.len() == 5 && s.chars().all(|c| c.is_ascii_alphabetic()),
                _ => false,
            }),
        );

        assert!(v.validate(&req("?id=ANATR")).is_ok());
        assert_eq!(
            v.validate(&req("?id=AB")),
            Err("Customer ID must be exactly 5 alphabetic characters.")
        );
        assert_eq!(
            v.validate(&req("?id=AN4TR")),
            Err("Customer ID must be exactly 5 alphabetic characters.")
        );
    }

    #[test]
    fn first_failure_short_circuits() {
        let v = Validator::new()
            .rule(Rule::required("a", ParamKind::Int, "a is broken"))
            .rule(Rule::required("b", ParamKind::Int, "b is broken"));

        assert_eq!(v.validate(&req("?a=x&b=y")), Err("a is broken"));
        assert_eq!(v.validate(&req("?a=1&b=y")), Err("b is broken"));
        assert!(v.validate(&req("?a=1&b=2")).is_ok());
    }

    #[test]
    fn form_fields_validate_like_query() {
        let raw = b"POST /login HTTP/1.1\r\n\
            Content-Type: application/x-www-form-urlencoded\r\n\
            Content-Length: 17\r\n\r\n\
            username=mcordova";
        let req = parse_bytes(raw).unwrap();

        let v = Validator::new().rule(Rule::required("username", ParamKind::Str, "missing user"));
        assert!(v.validate(&req).is_ok());
    }
}
