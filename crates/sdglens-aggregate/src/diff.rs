//! Positive minus negative counts per company and year.

use std::collections::BTreeMap;
use std::io::Write;

use sdglens_core::{DocumentId, Result, Sentiment};

use crate::counts::{CountTable, LabelCounts, SDG_COLUMNS};

/// Net counts for SDG `1..=17` and the AI column. Column `0` is dropped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NetCounts {
    pub sdg: [i64; SDG_COLUMNS - 1],
    pub ai: i64,
}

impl NetCounts {
    /// Net value for SDG `label` (1..=17).
    pub fn sdg(&self, label: usize) -> i64 {
        self.sdg[label - 1]
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DiffTable {
    pub rows: BTreeMap<DocumentId, NetCounts>,
}

impl DiffTable {
    pub fn get(&self, document: &DocumentId) -> Option<&NetCounts> {
        self.rows.get(document)
    }

    /// Write `company,year,1..17,AI` rows.
    pub fn write_csv<W: Write>(&self, writer: W) -> Result<()> {
        let mut wtr = csv::Writer::from_writer(writer);
        let mut header = vec!["company".to_string(), "year".into()];
        header.extend((1..SDG_COLUMNS).map(|n| n.to_string()));
        header.push("AI".into());
        wtr.write_record(&header)?;

        for (document, net) in &self.rows {
            let mut row = vec![document.company.clone(), document.year.to_string()];
            row.extend(net.sdg.iter().map(|n| n.to_string()));
            row.push(net.ai.to_string());
            wtr.write_record(&row)?;
        }
        wtr.flush()?;
        Ok(())
    }
}

/// Subtract Negative from Positive per document. A missing side counts as
/// zero.
pub fn positive_minus_negative(counts: &CountTable) -> DiffTable {
    let empty = LabelCounts::default();
    let mut table = DiffTable::default();
    for (document, _) in counts.buckets.keys() {
        if table.rows.contains_key(document) {
            continue;
        }
        let pos = counts.get(document, Sentiment::Positive).unwrap_or(&empty);
        let neg = counts.get(document, Sentiment::Negative).unwrap_or(&empty);
        let mut net = NetCounts::default();
        for label in 1..SDG_COLUMNS {
            net.sdg[label - 1] = pos.sdg[label] as i64 - neg.sdg[label] as i64;
        }
        net.ai = pos.ai as i64 - neg.ai as i64;
        table.rows.insert(document.clone(), net);
    }
    table
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bucket(sdg: &[(usize, u64)], ai: u64) -> LabelCounts {
        let mut c = LabelCounts::default();
        for &(i, n) in sdg {
            c.sdg[i] = n;
        }
        c.ai = ai;
        c
    }

    #[test]
    fn test_positive_minus_negative() {
        let rwe = DocumentId::new("rwe", 2020);
        let eon = DocumentId::new("eon", 2021);
        let mut counts = CountTable::default();
        counts
            .buckets
            .insert((rwe.clone(), Sentiment::Positive), bucket(&[(0, 5), (7, 4), (13, 1)], 2));
        counts
            .buckets
            .insert((rwe.clone(), Sentiment::Negative), bucket(&[(0, 9), (7, 1), (13, 3)], 3));
        counts
            .buckets
            .insert((eon.clone(), Sentiment::Negative), bucket(&[(12, 2)], 1));

        let diff = positive_minus_negative(&counts);
        assert_eq!(diff.rows.len(), 2);

        let r = diff.get(&rwe).unwrap();
        assert_eq!(r.sdg(7), 3);
        assert_eq!(r.sdg(13), -2);
        assert_eq!(r.sdg(1), 0);
        assert_eq!(r.ai, -1);

        let e = diff.get(&eon).unwrap();
        assert_eq!(e.sdg(12), -2);
        assert_eq!(e.ai, -1);

        let mut out = Vec::new();
        diff.write_csv(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert!(lines[0].starts_with("company,year,1,2,"));
        assert!(lines[0].ends_with(",17,AI"));
        assert!(lines[1].starts_with("eon,2021,"));
        assert!(lines[2].starts_with("rwe,2020,"));
        assert_eq!(lines[2].split(',').count(), 2 + 17 + 1);
    }
}
