use crate::domain::EnrichedRecord;
use crate::ingest::macro_series::MacroObservation;
use std::collections::BTreeMap;

/// Left-joins the macro series onto `records` by exact date, then fills the gaps.
///
/// When no record date matches the series at all, each record takes the latest observation on or
/// before its date (the earliest one for records preceding the series), so no record is left
/// without a macro value while the series is non-empty. Returns how many records matched exactly.
pub fn merge_macro(records: &mut [EnrichedRecord], series: &[MacroObservation]) -> usize {
    let mut by_date = BTreeMap::new();
    for obs in series {
        by_date.entry(obs.date).or_insert(obs.rate);
    }

    let mut matched = 0;
    for rec in records.iter_mut() {
        rec.macro_rate = by_date.get(&rec.date).copied();
        if rec.macro_rate.is_some() {
            matched += 1;
        }
    }

    let mut rates: Vec<Option<f64>> = records.iter().map(|r| r.macro_rate).collect();
    fill_forward_backward(&mut rates);
    for (rec, rate) in records.iter_mut().zip(rates) {
        rec.macro_rate = rate;
    }

    if matched == 0 {
        for rec in records.iter_mut() {
            rec.macro_rate = by_date
                .range(..=rec.date)
                .next_back()
                .or_else(|| by_date.iter().next())
                .map(|(_, rate)| *rate);
        }
    }
    matched
}

/// Forward-fill, then backward-fill the leading gap. Leaves everything `None` only when no value
/// is present at all.
pub fn fill_forward_backward(values: &mut [Option<f64>]) {
    let mut last = None;
    for v in values.iter_mut() {
        match v {
            Some(x) => last = Some(*x),
            None => *v = last,
        }
    }

    let mut next = None;
    for v in values.iter_mut().rev() {
        match v {
            Some(x) => next = Some(*x),
            None => *v = next,
        }
    }
}
