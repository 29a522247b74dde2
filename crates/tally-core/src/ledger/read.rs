//! Reading ledger text into nodes
//!
//! Text is cut into dated directive blocks and raw spans: a block starts at a date in
//! column 0 and runs over the indented lines below it. Each node keeps its exact source
//! bytes. The grammar itself belongs to `beancount_parser`; every block is handed to it
//! and the resulting directive is converted into the crate's models. A block the parser
//! rejects is kept as an opaque directive instead of failing the load.

use beancount_parser::metadata::{Key, Value};
use beancount_parser::{BeancountFile, DirectiveContent, PostingPrice};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use tracing::warn;

use super::{Directive, DirectiveBody, Node, NodeKind};
use crate::models::{Amount, Meta, MetaValue, Posting, TransactionRecord};

type ParsedDirective = beancount_parser::Directive<Decimal>;
type ParsedPosting = beancount_parser::Posting<Decimal>;
type ParsedAmount = beancount_parser::Amount<Decimal>;

/// Split ledger text into nodes
pub(crate) fn split_nodes(text: &str) -> Vec<Node> {
    let mut nodes = Vec::new();
    let mut raw = String::new();
    let mut raw_line = 0;
    let mut block: Option<(NaiveDate, String, usize)> = None;

    for (idx, line) in text.split_inclusive('\n').enumerate() {
        let lineno = idx + 1;

        if let Some(date) = leading_date(line) {
            flush_block(&mut nodes, block.take());
            flush_raw(&mut nodes, &mut raw, raw_line);
            block = Some((date, line.to_string(), lineno));
            continue;
        }

        if let Some((_, ref mut text, _)) = block {
            if is_continuation(line) {
                text.push_str(line);
                continue;
            }
        }

        flush_block(&mut nodes, block.take());
        if raw.is_empty() {
            raw_line = lineno;
        }
        raw.push_str(line);
    }

    flush_block(&mut nodes, block.take());
    flush_raw(&mut nodes, &mut raw, raw_line);
    nodes
}

fn flush_raw(nodes: &mut Vec<Node>, raw: &mut String, line: usize) {
    if raw.is_empty() {
        return;
    }
    nodes.push(Node {
        text: std::mem::take(raw),
        kind: NodeKind::Raw,
        line,
        inserted: false,
        replaced: false,
    });
}

fn flush_block(nodes: &mut Vec<Node>, block: Option<(NaiveDate, String, usize)>) {
    let Some((date, text, line)) = block else {
        return;
    };
    let directive = match read_directive(&text) {
        Ok(directive) => directive,
        Err(reason) => {
            warn!("Line {}: keeping directive opaque ({})", line, reason);
            Directive {
                date,
                body: DirectiveBody::Other {
                    keyword: header_keyword(&text),
                },
            }
        }
    };
    nodes.push(Node {
        text,
        kind: NodeKind::Directive(directive),
        line,
        inserted: false,
        replaced: false,
    });
}

/// Date at column 0 followed by whitespace
pub(crate) fn leading_date(line: &str) -> Option<NaiveDate> {
    let head = line.get(..10)?;
    let rest = &line[10..];
    if !rest.is_empty() && !rest.starts_with(char::is_whitespace) {
        return None;
    }
    NaiveDate::parse_from_str(head, "%Y-%m-%d").ok()
}

fn is_continuation(line: &str) -> bool {
    line.starts_with([' ', '\t']) && !line.trim().is_empty()
}

fn header_keyword(block: &str) -> String {
    let header = block.lines().next().unwrap_or_default();
    header
        .get(10..)
        .and_then(|rest| rest.split_whitespace().next())
        .unwrap_or_default()
        .to_string()
}

/// Run the grammar over a fragment of ledger text
fn parse_fragment(text: &str) -> Result<BeancountFile<Decimal>, String> {
    let owned;
    let input = if text.ends_with('\n') {
        text
    } else {
        owned = format!("{}\n", text);
        &owned
    };
    beancount_parser::parse::<Decimal>(input).map_err(|e| e.to_string())
}

/// Read one dated block
pub(crate) fn read_directive(block: &str) -> Result<Directive, String> {
    let parsed = parse_fragment(block)?;
    let mut directives = parsed.directives.into_iter();
    let directive = directives
        .next()
        .ok_or_else(|| "no directive in block".to_string())?;
    if directives.next().is_some() {
        return Err("more than one directive in block".into());
    }
    convert_directive(directive, block)
}

fn convert_directive(directive: ParsedDirective, block: &str) -> Result<Directive, String> {
    let date = NaiveDate::from_ymd_opt(
        i32::from(directive.date.year),
        u32::from(directive.date.month),
        u32::from(directive.date.day),
    )
    .ok_or_else(|| "invalid date".to_string())?;

    let body = match directive.content {
        DirectiveContent::Transaction(tx) => {
            let mut record =
                TransactionRecord::new(date, tx.flag.unwrap_or('*'), tx.narration.unwrap_or_default());
            record.payee = tx.payee;
            record.tags = tx
                .tags
                .iter()
                .map(|t| t.to_string().trim_start_matches('#').to_string())
                .collect();
            record.links = tx
                .links
                .iter()
                .map(|l| l.to_string().trim_start_matches('^').to_string())
                .collect();
            record.meta = convert_meta(directive.metadata);
            record.postings = tx.postings.into_iter().map(convert_posting).collect();
            DirectiveBody::Transaction(record)
        }
        DirectiveContent::Open(open) => {
            let mut currencies: Vec<String> =
                open.currencies.iter().map(ToString::to_string).collect();
            currencies.sort();
            DirectiveBody::Open {
                account: open.account.to_string(),
                currencies,
            }
        }
        DirectiveContent::Close(close) => DirectiveBody::Close {
            account: close.account.to_string(),
        },
        _ => DirectiveBody::Other {
            keyword: header_keyword(block),
        },
    };

    Ok(Directive { date, body })
}

fn convert_posting(posting: ParsedPosting) -> Posting {
    let mut suffix = Vec::new();
    if let Some(cost) = &posting.cost {
        let mut parts = Vec::new();
        if let Some(amount) = &cost.amount {
            parts.push(amount_text(amount));
        }
        if let Some(date) = &cost.date {
            parts.push(format!("{:04}-{:02}-{:02}", date.year, date.month, date.day));
        }
        suffix.push(format!("{{{}}}", parts.join(", ")));
    }
    match &posting.price {
        Some(PostingPrice::Unit(amount)) => suffix.push(format!("@ {}", amount_text(amount))),
        Some(PostingPrice::Total(amount)) => suffix.push(format!("@@ {}", amount_text(amount))),
        _ => {}
    }

    let units = posting
        .amount
        .as_ref()
        .map(|a| Amount::new(a.value, a.currency.to_string()));
    let mut out = Posting::new(posting.account.to_string(), units);
    out.flag = posting.flag;
    if !suffix.is_empty() {
        out.suffix = Some(suffix.join(" "));
    }
    out.meta = convert_meta(posting.metadata);
    out
}

fn amount_text(amount: &ParsedAmount) -> String {
    format!("{} {}", amount.value, amount.currency)
}

fn convert_meta(metadata: impl IntoIterator<Item = (Key, Value<Decimal>)>) -> Meta {
    metadata
        .into_iter()
        .map(|(key, value)| (key.to_string(), convert_meta_value(value)))
        .collect()
}

fn convert_meta_value(value: Value<Decimal>) -> MetaValue {
    match value {
        Value::String(s) => MetaValue::Text(s),
        Value::Number(n) => MetaValue::Number(n),
        Value::Currency(c) => match c.to_string().as_str() {
            "TRUE" => MetaValue::Bool(true),
            "FALSE" => MetaValue::Bool(false),
            other => MetaValue::Raw(other.to_string()),
        },
        _ => MetaValue::Raw(String::new()),
    }
}

/// Path of an `include "file"` line
pub(crate) fn include_target(line: &str) -> Option<String> {
    if !line.trim_start().starts_with("include") {
        return None;
    }
    let parsed = parse_fragment(line.trim()).ok()?;
    parsed
        .includes
        .into_iter()
        .next()
        .map(|path| path.to_string_lossy().into_owned())
}
