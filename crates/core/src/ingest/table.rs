use crate::domain::RawTable;
use crate::error::PipelineError;
use anyhow::Result;
use scraper::{ElementRef, Html, Selector};

const CONTAINER_SELECTOR: &str = r#"div[data-testid="history-table"]"#;

// Source labels carry tooltip text after the label itself ("Cerrar Precio de cierre ajustado..."),
// so matching is by prefix on the lowercased label. Order matters: "cierre aj" before "cierre".
const COLUMN_RENAMES: &[(&str, &str)] = &[
    ("fecha", "date"),
    ("date", "date"),
    ("abrir", "open"),
    ("apertura", "open"),
    ("open", "open"),
    ("máx", "high"),
    ("max", "high"),
    ("high", "high"),
    ("mín", "low"),
    ("min", "low"),
    ("low", "low"),
    ("cierre aj", "adjusted_close"),
    ("adj close", "adjusted_close"),
    ("adj. close", "adjusted_close"),
    ("cerrar", "close"),
    ("cierre", "close"),
    ("close", "close"),
    ("volumen", "volume"),
    ("volume", "volume"),
];

pub fn canonical_column(label: &str) -> String {
    let lower = label.trim().to_lowercase();
    COLUMN_RENAMES
        .iter()
        .find(|(prefix, _)| lower.starts_with(prefix))
        .map(|(_, canonical)| canonical.to_string())
        .unwrap_or_else(|| label.trim().to_string())
}

pub struct TableExtractor {
    container: Selector,
    table: Selector,
    header_cell: Selector,
    body_row: Selector,
    body_cell: Selector,
    span: tracing::Span,
}

impl TableExtractor {
    pub fn new() -> Result<Self> {
        Ok(Self {
            container: parse_selector(CONTAINER_SELECTOR)?,
            table: parse_selector("table")?,
            header_cell: parse_selector("thead th")?,
            body_row: parse_selector("tbody tr")?,
            body_cell: parse_selector("td")?,
            span: tracing::info_span!("table_extractor"),
        })
    }

    pub fn with_span(mut self, span: tracing::Span) -> Self {
        self.span = span;
        self
    }

    /// Extracts the history table, logging and returning an empty table when it is missing.
    pub fn extract(&self, markup: &str) -> RawTable {
        let _guard = self.span.enter();
        match self.try_extract(markup) {
            Ok(table) => {
                tracing::info!(
                    op = "extract",
                    rows = table.len(),
                    columns = ?table.columns(),
                    "history table extracted"
                );
                table
            }
            Err(err) => {
                tracing::error!(op = "extract", error = %err, "history table extraction failed");
                RawTable::empty()
            }
        }
    }

    pub fn try_extract(&self, markup: &str) -> Result<RawTable, PipelineError> {
        let document = Html::parse_document(markup);

        let container = document
            .select(&self.container)
            .next()
            .ok_or_else(|| PipelineError::Extraction {
                detail: format!("no element matches {CONTAINER_SELECTOR}"),
            })?;

        let mut tables = container.select(&self.table);
        let table = tables.next().ok_or_else(|| PipelineError::Extraction {
            detail: format!("{CONTAINER_SELECTOR} contains no table"),
        })?;
        if tables.next().is_some() {
            tracing::warn!(op = "extract", "history container holds several tables; using the first");
        }

        let columns: Vec<String> = table
            .select(&self.header_cell)
            .map(|th| canonical_column(&cell_text(th)))
            .collect();
        if columns.is_empty() {
            return Err(PipelineError::Extraction {
                detail: "history table has no header cells".to_string(),
            });
        }
        if let Some(dup) = duplicate_column(&columns) {
            return Err(PipelineError::Extraction {
                detail: format!("several headers map to column {dup}: {columns:?}"),
            });
        }

        let mut out = RawTable::new(columns);
        let mut dropped: usize = 0;
        for tr in table.select(&self.body_row) {
            let cells: Vec<String> = tr.select(&self.body_cell).map(cell_text).collect();
            if !out.push_row(cells) {
                dropped += 1;
            }
        }
        if dropped > 0 {
            tracing::debug!(op = "extract", dropped, "skipped rows whose width differs from the header");
        }

        Ok(out)
    }
}

fn duplicate_column(columns: &[String]) -> Option<&str> {
    let mut seen = std::collections::HashSet::new();
    columns
        .iter()
        .find(|c| !seen.insert(c.as_str()))
        .map(String::as_str)
}

fn parse_selector(css: &str) -> Result<Selector> {
    Selector::parse(css).map_err(|e| anyhow::anyhow!("invalid css selector {css:?}: {e:?}"))
}

// Each text node is trimmed and the pieces are concatenated without separators.
fn cell_text(el: ElementRef<'_>) -> String {
    el.text().map(str::trim).filter(|s| !s.is_empty()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(body_rows: &str) -> String {
        format!(
            r#"<html><body>
            <div data-testid="other"><table><tr><td>noise</td></tr></table></div>
            <div data-testid="history-table">
              <table>
                <thead><tr>
                  <th>Fecha</th><th>Abrir</th><th>Máx.</th><th>Mín.</th>
                  <th>Cerrar <span>Precio de cierre ajustado para splits.</span></th>
                  <th>Cierre ajustado <span>Precio de cierre ajustado para splits y dividendos.</span></th>
                  <th>Volumen</th>
                </tr></thead>
                <tbody>{body_rows}</tbody>
              </table>
            </div></body></html>"#
        )
    }

    const ROW_A: &str = "<tr><td>6 may 2025</td><td>83.000,10</td><td>84.000,00</td><td>82.500,00</td><td>83.500,55</td><td>83.500,55</td><td>40.123.456.789</td></tr>";
    const ROW_B: &str = "<tr><td>5 may 2025</td><td>82.000,10</td><td>83.000,00</td><td>81.500,00</td><td> 82.900,00 </td><td>82.900,00</td><td>39.000.000.000</td></tr>";

    #[test]
    fn extracts_rows_with_canonical_columns_in_document_order() {
        let extractor = TableExtractor::new().unwrap();
        let table = extractor.extract(&page(&format!("{ROW_A}{ROW_B}")));

        assert_eq!(
            table.columns(),
            &["date", "open", "high", "low", "close", "adjusted_close", "volume"]
        );
        assert_eq!(table.len(), 2);
        assert_eq!(table.cell(0, "date"), Some("6 may 2025"));
        assert_eq!(table.cell(1, "close"), Some("82.900,00"));
    }

    #[test]
    fn drops_rows_with_mismatched_width() {
        let extractor = TableExtractor::new().unwrap();
        let dividend = r#"<tr><td>4 may 2025</td><td colspan="6">0,12 Dividendo</td></tr>"#;
        let table = extractor.extract(&page(&format!("{ROW_A}{dividend}{ROW_B}")));
        assert_eq!(table.len(), 2);
        assert_eq!(table.cell(1, "date"), Some("5 may 2025"));
    }

    #[test]
    fn missing_container_yields_empty_table() {
        let extractor = TableExtractor::new().unwrap();
        let markup = "<html><body><table><thead><tr><th>Fecha</th></tr></thead></table></body></html>";

        assert!(extractor.extract(markup).is_empty());
        assert!(matches!(
            extractor.try_extract(markup),
            Err(PipelineError::Extraction { .. })
        ));
    }

    #[test]
    fn container_without_table_is_an_extraction_error() {
        let extractor = TableExtractor::new().unwrap();
        let markup = r#"<div data-testid="history-table"><p>loading…</p></div>"#;
        assert!(matches!(
            extractor.try_extract(markup),
            Err(PipelineError::Extraction { .. })
        ));
    }

    #[test]
    fn renames_known_labels_and_keeps_unknown_ones() {
        assert_eq!(canonical_column("Adj Close Adjusted close price"), "adjusted_close");
        assert_eq!(canonical_column("Close Close price adjusted for splits."), "close");
        assert_eq!(canonical_column(" Volumen "), "volume");
        assert_eq!(canonical_column("Dividendo"), "Dividendo");
    }

    #[test]
    fn abbreviated_adjusted_close_label_is_recognised() {
        assert_eq!(canonical_column("Cierre ajust."), "adjusted_close");
        assert_eq!(canonical_column("Cierre aj. Precio ajustado"), "adjusted_close");

        let markup = page(ROW_A).replace("Cierre ajustado <span>", "Cierre ajust. <span>");
        let table = TableExtractor::new().unwrap().try_extract(&markup).unwrap();
        assert_eq!(table.column_index("adjusted_close"), Some(5));
        assert_eq!(table.column_index("close"), Some(4));
    }

    #[test]
    fn headers_mapping_to_the_same_column_are_rejected() {
        let extractor = TableExtractor::new().unwrap();
        let markup = page(ROW_A).replace("Cierre ajustado <span>", "Close <span>");

        let err = extractor.try_extract(&markup).unwrap_err();
        assert!(matches!(err, PipelineError::Extraction { .. }));
        assert!(err.to_string().contains("close"));
        assert!(extractor.extract(&markup).is_empty());
    }
}
