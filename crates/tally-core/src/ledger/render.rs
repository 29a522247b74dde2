//! Ledger text rendering for newly filed transactions

use crate::models::{escape, Meta, Posting, TransactionRecord};

/// Render a transaction as a ledger directive, ending with a newline
pub fn format_transaction(tx: &TransactionRecord, indent: usize) -> String {
    let pad = " ".repeat(indent);
    let mut out = format!("{} {}", tx.date.format("%Y-%m-%d"), tx.flag);

    if let Some(payee) = &tx.payee {
        out.push_str(&format!(" \"{}\"", escape(payee)));
    }
    out.push_str(&format!(" \"{}\"", escape(&tx.narration)));
    for tag in &tx.tags {
        out.push_str(&format!(" #{}", tag));
    }
    for link in &tx.links {
        out.push_str(&format!(" ^{}", link));
    }
    out.push('\n');

    write_meta(&mut out, &tx.meta, &pad);

    let width = tx.postings.iter().map(|p| lead(p).len()).max().unwrap_or(0);
    let nested = " ".repeat(indent * 2);
    for posting in &tx.postings {
        let lead = lead(posting);
        let mut line = format!("{}{}", pad, lead);
        if let Some(units) = &posting.units {
            line.push_str(&" ".repeat(width - lead.len() + 2));
            line.push_str(&units.to_string());
        }
        if let Some(suffix) = &posting.suffix {
            line.push(' ');
            line.push_str(suffix);
        }
        out.push_str(&line);
        out.push('\n');
        write_meta(&mut out, &posting.meta, &nested);
    }

    out
}

fn lead(posting: &Posting) -> String {
    match posting.flag {
        Some(flag) => format!("{} {}", flag, posting.account),
        None => posting.account.clone(),
    }
}

fn write_meta(out: &mut String, meta: &Meta, pad: &str) {
    for (key, value) in meta {
        out.push_str(&format!("{}{}: {}\n", pad, key, value));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Amount, MetaValue};
    use chrono::NaiveDate;
    use rust_decimal::Decimal;
    use std::str::FromStr;

    #[test]
    fn test_format_transaction() {
        let mut tx = TransactionRecord::new(
            NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            '!',
            "STARBUCKS \"#123\"",
        )
        .with_payee("Starbucks")
        .with_meta("match-key", "abc")
        .with_posting(Posting::new(
            "Liabilities:Card",
            Some(Amount::new(Decimal::from_str("-4.50").unwrap(), "USD")),
        ))
        .with_posting(Posting::new("Expenses:Dining", None));
        tx.tags.insert("coffee".into());
        tx.meta
            .insert("imported".into(), MetaValue::Date(tx.date));

        let text = format_transaction(&tx, 2);
        assert_eq!(
            text,
            "2024-03-01 ! \"Starbucks\" \"STARBUCKS \\\"#123\\\"\" #coffee\n  \
             imported: 2024-03-01\n  \
             match-key: \"abc\"\n  \
             Liabilities:Card  -4.50 USD\n  \
             Expenses:Dining\n"
        );
    }

    #[test]
    fn test_format_aligns_flagged_postings() {
        let tx = TransactionRecord::new(NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(), '*', "Gym")
            .with_posting(Posting::new(
                "Assets:Bank",
                Some(Amount::new(Decimal::from_str("-30").unwrap(), "USD")),
            ))
            .with_posting(
                Posting::new(
                    "Expenses:FIXME",
                    Some(Amount::new(Decimal::from_str("30").unwrap(), "USD")),
                )
                .with_flag('!'),
            );

        let text = format_transaction(&tx, 2);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[1], "  Assets:Bank       -30 USD");
        assert_eq!(lines[2], "  ! Expenses:FIXME  30 USD");
    }

    #[test]
    fn test_format_flattens_line_breaks() {
        let tx = TransactionRecord::new(
            NaiveDate::from_ymd_opt(2024, 1, 3).unwrap(),
            '!',
            "WIRE\nREF 7781",
        )
        .with_meta("memo", "line one\r\nline two")
        .with_posting(Posting::new("Assets:Bank", None));

        let text = format_transaction(&tx, 2);
        assert_eq!(text.lines().count(), 3);
        assert!(text.starts_with("2024-01-03 ! \"WIRE REF 7781\"\n"));
        assert!(text.contains("memo: \"line one line two\""));
    }

    #[test]
    fn test_rendered_entry_reads_back() {
        let mut tx = TransactionRecord::new(
            NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            '!',
            "PAYMENT \"ONLINE\" THANK YOU",
        )
        .with_payee("Card Co")
        .with_meta("match-key", "K-1")
        .with_posting(Posting::new(
            "Liabilities:Card",
            Some(Amount::new(Decimal::from_str("250.00").unwrap(), "USD")),
        ))
        .with_posting(
            Posting::new(
                "Assets:Bank",
                Some(Amount::new(Decimal::from_str("-250.00").unwrap(), "USD")),
            )
            .with_flag('!'),
        );
        tx.tags.insert("transfer".into());
        tx.links.insert("stmt-03".into());

        let text = format_transaction(&tx, 4);
        let directive = crate::ledger::read_entry(&text).unwrap();
        assert_eq!(directive.date, tx.date);
        match directive.body {
            crate::ledger::DirectiveBody::Transaction(read) => assert_eq!(read, tx),
            other => panic!("expected transaction, got {:?}", other),
        }
    }
}
