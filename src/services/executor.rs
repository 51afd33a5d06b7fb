//! Deterministic, in-memory execution of generated analysis plans.
//!
//! The executor is pure with respect to its two inputs: identical
//! (workbook, plan) pairs always produce identical results. This is the
//! guarantee that lets the language model stay out of the arithmetic.

use std::cmp::Ordering;

use crate::error::AppError;
use crate::models::{
    AggregationSpec, AggregationType, AnalysisPlan, AnalysisResult, Answer, Filter,
    FilterOperator, Record, ResultMeta, Value, Workbook, DEFAULT_LIST_LIMIT,
};

/// Best-effort match of a model-supplied column name against the actual
/// headers. Case-insensitive exact match wins; otherwise the first column
/// (in sheet order) whose lowercase form contains the lowercase target.
pub fn resolve_column<'a>(available: &[&'a str], target: &str) -> Option<&'a str> {
    if target.is_empty() {
        return None;
    }
    let needle = target.to_lowercase();

    if let Some(exact) = available.iter().find(|c| c.to_lowercase() == needle) {
        return Some(exact);
    }
    available
        .iter()
        .find(|c| c.to_lowercase().contains(&needle))
        .copied()
}

/// A value classified for comparison: numeric under the documented
/// coercion policy, or its lowercased string form.
enum Operand {
    Number(f64),
    Text(String),
}

fn operand(value: &Value) -> Operand {
    match value.as_number() {
        Some(n) => Operand::Number(n),
        None => Operand::Text(value.display_string().to_lowercase()),
    }
}

/// Equality rule: numbers compare numerically, text compares as lowercased
/// strings, mixed sides are never equal.
fn loose_eq(lhs: &Value, rhs: &Value) -> bool {
    match (operand(lhs), operand(rhs)) {
        (Operand::Number(a), Operand::Number(b)) => a == b,
        (Operand::Text(a), Operand::Text(b)) => a == b,
        _ => false,
    }
}

/// Ordering rule: numeric pairs compare numerically, text pairs compare
/// lexicographically on the lowercased forms, mixed pairs never order.
fn loose_ordering(lhs: &Value, rhs: &Value) -> Option<Ordering> {
    match (operand(lhs), operand(rhs)) {
        (Operand::Number(a), Operand::Number(b)) => a.partial_cmp(&b),
        (Operand::Text(a), Operand::Text(b)) => Some(a.cmp(&b)),
        _ => None,
    }
}

fn filter_matches(row: &Record, column: &str, filter: &Filter) -> bool {
    static NULL: Value = Value::Null;
    let cell = row.get(column).unwrap_or(&NULL);

    match filter.operator {
        FilterOperator::Eq => loose_eq(cell, &filter.value),
        FilterOperator::Neq => !loose_eq(cell, &filter.value),
        FilterOperator::Gt => matches!(loose_ordering(cell, &filter.value), Some(Ordering::Greater)),
        FilterOperator::Lt => matches!(loose_ordering(cell, &filter.value), Some(Ordering::Less)),
        // Always a case-insensitive substring test on the string forms,
        // regardless of numeric parseability.
        FilterOperator::Contains => cell
            .display_string()
            .to_lowercase()
            .contains(&filter.value.display_string().to_lowercase()),
        FilterOperator::Unknown => true,
    }
}

fn cell_number(row: &Record, column: &str) -> f64 {
    row.get(column).map(Value::number_or_zero).unwrap_or(0.0)
}

fn require_column<'a>(
    available: &[&'a str],
    target: &str,
    operation: &'static str,
) -> Result<&'a str, AppError> {
    resolve_column(available, target).ok_or_else(|| AppError::ColumnNotFound {
        column: target.to_string(),
        operation,
    })
}

/// Execute a generated plan against the loaded workbook.
///
/// Filters narrow the row set conjunctively, in plan order; a filter whose
/// column does not resolve is a no-op so one bad filter cannot sink an
/// otherwise good plan. Aggregation column misses, by contrast, are hard
/// failures: the aggregation target is the point of the query.
pub fn execute(workbook: &Workbook, plan: &AnalysisPlan) -> Result<AnalysisResult, AppError> {
    let sheet =
        workbook
            .sheet_ignore_case(&plan.sheet_name)
            .ok_or_else(|| AppError::SheetNotFound {
                requested: plan.sheet_name.clone(),
                available: workbook.sheet_names(),
            })?;

    // Resolution always runs against the sheet's original header set, not
    // whatever survives filtering.
    let columns: Vec<&str> = sheet
        .rows
        .first()
        .map(|record| record.keys().map(String::as_str).collect())
        .unwrap_or_default();

    let mut rows: Vec<&Record> = sheet.rows.iter().collect();
    for filter in &plan.filters {
        let Some(column) = resolve_column(&columns, &filter.column) else {
            tracing::debug!(column = %filter.column, "filter column did not resolve, skipping");
            continue;
        };
        rows.retain(|row| filter_matches(row, column, filter));
    }

    // Captured before aggregation or limiting.
    let record_count = rows.len();

    let aggregation = plan.aggregation.clone().unwrap_or(AggregationSpec {
        kind: AggregationType::List,
        column: None,
    });
    let target = aggregation.column.as_deref().unwrap_or("");

    let answer = match aggregation.kind {
        AggregationType::Count => Answer::Count(rows.len()),
        AggregationType::Sum => {
            let column = require_column(&columns, target, "summation")?;
            Answer::Number(rows.iter().map(|row| cell_number(row, column)).sum())
        }
        AggregationType::Average => {
            let column = require_column(&columns, target, "average")?;
            if rows.is_empty() {
                Answer::Number(0.0)
            } else {
                let sum: f64 = rows.iter().map(|row| cell_number(row, column)).sum();
                Answer::Number(sum / rows.len() as f64)
            }
        }
        AggregationType::Min => {
            let column = require_column(&columns, target, "min")?;
            if rows.is_empty() {
                // Zero over an empty set is a documented quirk, not math.
                Answer::Number(0.0)
            } else {
                Answer::Number(
                    rows.iter()
                        .map(|row| cell_number(row, column))
                        .fold(f64::INFINITY, f64::min),
                )
            }
        }
        AggregationType::Max => {
            let column = require_column(&columns, target, "max")?;
            if rows.is_empty() {
                Answer::Number(0.0)
            } else {
                Answer::Number(
                    rows.iter()
                        .map(|row| cell_number(row, column))
                        .fold(f64::NEG_INFINITY, f64::max),
                )
            }
        }
        AggregationType::List => Answer::Rows(
            rows.into_iter()
                .take(plan.limit.unwrap_or(DEFAULT_LIST_LIMIT))
                .cloned()
                .collect(),
        ),
        // Unrecognized aggregation types degrade to a capped listing; the
        // plan's own limit is deliberately ignored here.
        AggregationType::Unknown => Answer::Rows(
            rows.into_iter().take(DEFAULT_LIST_LIMIT).cloned().collect(),
        ),
    };

    Ok(AnalysisResult {
        answer,
        meta: ResultMeta {
            record_count,
            generated_plan: plan.clone(),
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(pairs: &[(&str, Value)]) -> Record {
        pairs
            .iter()
            .map(|(name, value)| (name.to_string(), value.clone()))
            .collect()
    }

    fn sales_workbook() -> Workbook {
        Workbook::from_sheets(vec![(
            "Sales".to_string(),
            vec![
                record(&[("Region", "East".into()), ("Amount", 100.0.into())]),
                record(&[("Region", "West".into()), ("Amount", 50.0.into())]),
                record(&[("Region", "East".into()), ("Amount", 30.0.into())]),
            ],
        )])
    }

    fn plan(sheet: &str) -> AnalysisPlan {
        AnalysisPlan {
            sheet_name: sheet.to_string(),
            filters: Vec::new(),
            aggregation: None,
            limit: None,
            reasoning: String::new(),
        }
    }

    fn filter(column: &str, operator: FilterOperator, value: Value) -> Filter {
        Filter {
            column: column.to_string(),
            operator,
            value,
        }
    }

    fn aggregate(kind: AggregationType, column: Option<&str>) -> Option<AggregationSpec> {
        Some(AggregationSpec {
            kind,
            column: column.map(str::to_string),
        })
    }

    #[test]
    fn resolver_exact_match_beats_substring() {
        let columns = ["Total Amount", "Amount"];
        assert_eq!(resolve_column(&columns, "amount"), Some("Amount"));
    }

    #[test]
    fn resolver_falls_back_to_first_substring_in_order() {
        let columns = ["Region", "Amount"];
        assert_eq!(resolve_column(&columns, "reg"), Some("Region"));
        assert_eq!(resolve_column(&columns, "MOUNT"), Some("Amount"));
    }

    #[test]
    fn resolver_misses() {
        let columns = ["Region", "Amount"];
        assert_eq!(resolve_column(&columns, "Revenue"), None);
        assert_eq!(resolve_column(&columns, ""), None);
    }

    #[test]
    fn unknown_sheet_error_lists_available_sheets() {
        let err = execute(&sales_workbook(), &plan("Revenue")).unwrap_err();
        match err {
            AppError::SheetNotFound {
                requested,
                available,
            } => {
                assert_eq!(requested, "Revenue");
                assert_eq!(available, vec!["Sales".to_string()]);
            }
            other => panic!("expected SheetNotFound, got {other:?}"),
        }
    }

    #[test]
    fn sheet_name_resolves_case_insensitively() {
        let mut p = plan("sales");
        p.aggregation = aggregate(AggregationType::Count, None);
        let result = execute(&sales_workbook(), &p).unwrap();
        assert_eq!(result.answer, Answer::Count(3));
    }

    #[test]
    fn empty_filter_list_counts_every_row() {
        let mut p = plan("Sales");
        p.aggregation = aggregate(AggregationType::Count, None);
        let result = execute(&sales_workbook(), &p).unwrap();
        assert_eq!(result.meta.record_count, 3);
    }

    #[test]
    fn record_count_never_grows_as_filters_are_added() {
        let workbook = sales_workbook();
        let filters = vec![
            filter("Region", FilterOperator::Eq, "East".into()),
            filter("Amount", FilterOperator::Gt, 50.0.into()),
        ];

        let mut previous = usize::MAX;
        for n in 0..=filters.len() {
            let mut p = plan("Sales");
            p.filters = filters[..n].to_vec();
            p.aggregation = aggregate(AggregationType::Count, None);
            let count = execute(&workbook, &p).unwrap().meta.record_count;
            assert!(count <= previous, "filters must only narrow the row set");
            previous = count;
        }
        assert_eq!(previous, 1);
    }

    #[test]
    fn sum_of_east_amounts() {
        let mut p = plan("Sales");
        p.filters = vec![filter("Region", FilterOperator::Eq, "East".into())];
        p.aggregation = aggregate(AggregationType::Sum, Some("Amount"));

        let result = execute(&sales_workbook(), &p).unwrap();
        assert_eq!(result.answer, Answer::Number(130.0));
        assert_eq!(result.meta.record_count, 2);
    }

    #[test]
    fn count_without_filters() {
        let mut p = plan("Sales");
        p.aggregation = aggregate(AggregationType::Count, None);
        let result = execute(&sales_workbook(), &p).unwrap();
        assert_eq!(result.answer, Answer::Count(3));
        assert_eq!(result.meta.record_count, 3);
    }

    #[test]
    fn partial_filter_column_with_contains() {
        let mut p = plan("Sales");
        p.filters = vec![filter("Reg", FilterOperator::Contains, "eas".into())];
        p.aggregation = aggregate(AggregationType::Count, None);

        let result = execute(&sales_workbook(), &p).unwrap();
        assert_eq!(result.meta.record_count, 2);
    }

    #[test]
    fn unresolved_filter_column_is_a_noop() {
        let mut p = plan("Sales");
        p.filters = vec![filter("Nonexistent", FilterOperator::Eq, "x".into())];
        p.aggregation = aggregate(AggregationType::Count, None);

        let result = execute(&sales_workbook(), &p).unwrap();
        assert_eq!(result.answer, Answer::Count(3));
    }

    #[test]
    fn unresolved_aggregation_column_is_a_hard_failure() {
        let mut p = plan("Sales");
        p.aggregation = aggregate(AggregationType::Sum, Some("Nonexistent"));

        let err = execute(&sales_workbook(), &p).unwrap_err();
        assert!(matches!(err, AppError::ColumnNotFound { .. }));
    }

    #[test]
    fn sum_and_average_over_empty_filtered_set_are_zero() {
        let workbook = sales_workbook();
        for kind in [AggregationType::Sum, AggregationType::Average] {
            let mut p = plan("Sales");
            p.filters = vec![filter("Region", FilterOperator::Eq, "North".into())];
            p.aggregation = aggregate(kind, Some("Amount"));
            let result = execute(&workbook, &p).unwrap();
            assert_eq!(result.answer, Answer::Number(0.0));
            assert_eq!(result.meta.record_count, 0);
        }
    }

    #[test]
    fn min_max_over_empty_filtered_set_are_zero() {
        let workbook = sales_workbook();
        for kind in [AggregationType::Min, AggregationType::Max] {
            let mut p = plan("Sales");
            p.filters = vec![filter("Region", FilterOperator::Eq, "North".into())];
            p.aggregation = aggregate(kind, Some("Amount"));
            assert_eq!(execute(&workbook, &p).unwrap().answer, Answer::Number(0.0));
        }
    }

    #[test]
    fn average_min_max_of_amounts() {
        let workbook = sales_workbook();
        let cases = [
            (AggregationType::Average, 60.0),
            (AggregationType::Min, 30.0),
            (AggregationType::Max, 100.0),
        ];
        for (kind, expected) in cases {
            let mut p = plan("Sales");
            p.aggregation = aggregate(kind, Some("Amount"));
            assert_eq!(
                execute(&workbook, &p).unwrap().answer,
                Answer::Number(expected)
            );
        }
    }

    #[test]
    fn unparseable_numeric_cells_count_as_zero() {
        let workbook = Workbook::from_sheets(vec![(
            "Sales".to_string(),
            vec![
                record(&[("Amount", 100.0.into())]),
                record(&[("Amount", "n/a".into())]),
            ],
        )]);

        let mut p = plan("Sales");
        p.aggregation = aggregate(AggregationType::Sum, Some("Amount"));
        assert_eq!(execute(&workbook, &p).unwrap().answer, Answer::Number(100.0));

        // The zero fallback also drags min below every real value.
        p.aggregation = aggregate(AggregationType::Min, Some("Amount"));
        assert_eq!(execute(&workbook, &p).unwrap().answer, Answer::Number(0.0));

        p.aggregation = aggregate(AggregationType::Average, Some("Amount"));
        assert_eq!(execute(&workbook, &p).unwrap().answer, Answer::Number(50.0));
    }

    #[test]
    fn list_is_the_default_aggregation() {
        let result = execute(&sales_workbook(), &plan("Sales")).unwrap();
        match result.answer {
            Answer::Rows(rows) => assert_eq!(rows.len(), 3),
            other => panic!("expected rows, got {other:?}"),
        }
    }

    #[test]
    fn list_caps_at_ten_rows_and_preserves_order() {
        let rows: Vec<Record> = (0..12)
            .map(|i| record(&[("Amount", (i as f64).into())]))
            .collect();
        let workbook = Workbook::from_sheets(vec![("Sales".to_string(), rows)]);

        let result = execute(&workbook, &plan("Sales")).unwrap();
        assert_eq!(result.meta.record_count, 12);
        match result.answer {
            Answer::Rows(rows) => {
                assert_eq!(rows.len(), DEFAULT_LIST_LIMIT);
                assert_eq!(rows[0].get("Amount"), Some(&Value::Number(0.0)));
                assert_eq!(rows[9].get("Amount"), Some(&Value::Number(9.0)));
            }
            other => panic!("expected rows, got {other:?}"),
        }
    }

    #[test]
    fn list_respects_an_explicit_limit() {
        let mut p = plan("Sales");
        p.limit = Some(2);
        let result = execute(&sales_workbook(), &p).unwrap();
        match result.answer {
            Answer::Rows(rows) => assert_eq!(rows.len(), 2),
            other => panic!("expected rows, got {other:?}"),
        }
    }

    #[test]
    fn unrecognized_aggregation_lists_ten_rows_ignoring_limit() {
        let rows: Vec<Record> = (0..12)
            .map(|i| record(&[("Amount", (i as f64).into())]))
            .collect();
        let workbook = Workbook::from_sheets(vec![("Sales".to_string(), rows)]);

        let mut p = plan("Sales");
        p.aggregation = aggregate(AggregationType::Unknown, None);
        p.limit = Some(12);
        match execute(&workbook, &p).unwrap().answer {
            Answer::Rows(rows) => assert_eq!(rows.len(), DEFAULT_LIST_LIMIT),
            other => panic!("expected rows, got {other:?}"),
        }
    }

    #[test]
    fn unknown_operator_passes_every_row() {
        let mut p = plan("Sales");
        p.filters = vec![filter("Region", FilterOperator::Unknown, "East".into())];
        p.aggregation = aggregate(AggregationType::Count, None);
        assert_eq!(execute(&sales_workbook(), &p).unwrap().answer, Answer::Count(3));
    }

    #[test]
    fn numeric_text_literal_equals_numeric_cell() {
        let mut p = plan("Sales");
        p.filters = vec![filter("Amount", FilterOperator::Eq, "100".into())];
        p.aggregation = aggregate(AggregationType::Count, None);
        assert_eq!(execute(&sales_workbook(), &p).unwrap().answer, Answer::Count(1));
    }

    #[test]
    fn mixed_types_are_never_equal() {
        let mut p = plan("Sales");
        p.filters = vec![filter("Amount", FilterOperator::Eq, "abc".into())];
        p.aggregation = aggregate(AggregationType::Count, None);
        assert_eq!(execute(&sales_workbook(), &p).unwrap().answer, Answer::Count(0));

        p.filters = vec![filter("Amount", FilterOperator::Neq, "abc".into())];
        assert_eq!(execute(&sales_workbook(), &p).unwrap().answer, Answer::Count(3));
    }

    #[test]
    fn mixed_types_never_order() {
        for op in [FilterOperator::Gt, FilterOperator::Lt] {
            let mut p = plan("Sales");
            p.filters = vec![filter("Amount", op, "abc".into())];
            p.aggregation = aggregate(AggregationType::Count, None);
            assert_eq!(execute(&sales_workbook(), &p).unwrap().answer, Answer::Count(0));
        }
    }

    #[test]
    fn numeric_ordering_filters() {
        let mut p = plan("Sales");
        p.filters = vec![filter("Amount", FilterOperator::Gt, 40.0.into())];
        p.aggregation = aggregate(AggregationType::Count, None);
        assert_eq!(execute(&sales_workbook(), &p).unwrap().answer, Answer::Count(2));

        p.filters = vec![filter("Amount", FilterOperator::Lt, 40.0.into())];
        assert_eq!(execute(&sales_workbook(), &p).unwrap().answer, Answer::Count(1));
    }

    #[test]
    fn text_ordering_is_lexicographic_on_lowercased_forms() {
        let mut p = plan("Sales");
        p.filters = vec![filter("Region", FilterOperator::Gt, "east".into())];
        p.aggregation = aggregate(AggregationType::Count, None);
        // Only "West" sorts after "east" once both sides are lowercased.
        assert_eq!(execute(&sales_workbook(), &p).unwrap().answer, Answer::Count(1));
    }

    #[test]
    fn contains_works_on_numeric_cells_via_string_forms() {
        let mut p = plan("Sales");
        p.filters = vec![filter("Amount", FilterOperator::Contains, "0".into())];
        p.aggregation = aggregate(AggregationType::Count, None);
        assert_eq!(execute(&sales_workbook(), &p).unwrap().answer, Answer::Count(3));
    }

    #[test]
    fn result_meta_carries_the_generated_plan() {
        let mut p = plan("Sales");
        p.reasoning = "count everything".to_string();
        p.aggregation = aggregate(AggregationType::Count, None);
        let result = execute(&sales_workbook(), &p).unwrap();
        assert_eq!(result.meta.generated_plan, p);
    }
}
