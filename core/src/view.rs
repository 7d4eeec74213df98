//! List-view helpers shared by the CLI views: search, project filter and
//! pagination.

use serde::Serialize;

use crate::bindings::ColumnBindings;
use crate::bindings::FieldRole;
use crate::tabular::Record;

pub const DEFAULT_PAGE_SIZE: usize = 10;

/// Case-insensitive substring match against every cell. A blank term
/// matches everything.
pub fn matches(record: &Record, term: &str) -> bool {
    let needle = term.trim().to_lowercase();
    needle.is_empty()
        || record
            .cells()
            .iter()
            .any(|cell| cell.to_lowercase().contains(&needle))
}

pub fn search<'a>(records: &'a [Record], term: &str) -> Vec<&'a Record> {
    records.iter().filter(|record| matches(record, term)).collect()
}

/// Project cell equals `project`, ignoring case and padding. Without a
/// bound project column nothing matches.
pub fn in_project(record: &Record, bindings: &ColumnBindings, project: &str) -> bool {
    let wanted = project.trim();
    bindings
        .value(record, FieldRole::Project)
        .is_some_and(|value| value.trim().eq_ignore_ascii_case(wanted))
}

pub fn filter_project<'a>(
    records: impl IntoIterator<Item = &'a Record>,
    bindings: &ColumnBindings,
    project: &str,
) -> Vec<&'a Record> {
    records
        .into_iter()
        .filter(|record| in_project(record, bindings, project))
        .collect()
}

/// Distinct non-blank project names in first-seen order.
pub fn projects(records: &[Record], bindings: &ColumnBindings) -> Vec<String> {
    let mut seen: Vec<String> = Vec::new();
    for record in records {
        if let Some(value) = bindings.value(record, FieldRole::Project) {
            let value = value.trim();
            if !value.is_empty() && !seen.iter().any(|p| p == value) {
                seen.push(value.to_string());
            }
        }
    }
    seen
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// 1-based, clamped into `1..=total_pages`.
    pub page: usize,
    pub total_pages: usize,
    pub total_items: usize,
}

pub fn paginate<T>(items: Vec<T>, page: usize, page_size: usize) -> Page<T> {
    let page_size = page_size.max(1);
    let total_items = items.len();
    let total_pages = total_items.div_ceil(page_size).max(1);
    let page = page.clamp(1, total_pages);
    let items = items
        .into_iter()
        .skip((page - 1) * page_size)
        .take(page_size)
        .collect();
    Page {
        items,
        page,
        total_pages,
        total_items,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bindings::BindingRules;
    use crate::tabular::grid;
    use crate::tabular::parse_grid;
    use pretty_assertions::assert_eq;

    fn sample() -> (Vec<Record>, ColumnBindings) {
        let rows = grid(&[
            &["SITE", "PROJECT", "CAUSE"],
            &["ALPHA-1", "North", "Power"],
            &["BETA-2", "south ", "Fiber"],
            &["GAMMA-3", "North", "power surge"],
        ]);
        let (schema, records) = parse_grid("Sheet1", rows, 0).unwrap();
        let bindings = BindingRules::default().resolve(&schema).unwrap();
        (records, bindings)
    }

    fn sites(records: &[&Record]) -> Vec<String> {
        records.iter().map(|r| r.cell(0).to_string()).collect()
    }

    #[test]
    fn search_is_case_insensitive_across_cells() {
        let (records, _) = sample();
        assert_eq!(sites(&search(&records, "POWER")), vec!["ALPHA-1", "GAMMA-3"]);
        assert_eq!(search(&records, "  ").len(), 3);
    }

    #[test]
    fn project_filter_and_listing() {
        let (records, bindings) = sample();
        assert_eq!(
            sites(&filter_project(&records, &bindings, "SOUTH")),
            vec!["BETA-2"]
        );
        assert_eq!(projects(&records, &bindings), vec!["North", "south"]);
    }

    #[test]
    fn pagination_clamps_page() {
        let items: Vec<u32> = (1..=23).collect();
        let page = paginate(items.clone(), 3, 10);
        assert_eq!(page.items, vec![21, 22, 23]);
        assert_eq!(page.total_pages, 3);

        let past_end = paginate(items, 9, 10);
        assert_eq!(past_end.page, 3);

        let empty = paginate(Vec::<u32>::new(), 1, 10);
        assert_eq!(empty.total_pages, 1);
        assert!(empty.items.is_empty());
    }
}
