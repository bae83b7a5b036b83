//! Extraction of the InvestSite indicator tables into a raw label map.
//!
//! The indicator page carries up to ten summary tables with stable element
//! ids. Every table is two columns: label cell, value cell. Labels get a
//! section prefix so the flat map stays unambiguous ("Receita Líquida"
//! appears in both the 12-month and the 3-month income statement).

use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};

use super::FetchError;
use crate::models::RawRecord;

/// Table the whole page is anchored on; a response without it is treated
/// as a fetch failure, not an empty record.
const ANCHOR_TABLE_ID: &str = "tabela_resumo_empresa";

/// `(table id, label prefix)` for every summary table on the page.
const SUMMARY_TABLES: &[(&str, &str)] = &[
    ("tabela_resumo_empresa", ""),
    ("tabela_resumo_empresa_precos_relativos", "Indicador - "),
    ("tabela_resumo_empresa_dre_12meses", "DRE 12M - "),
    ("tabela_resumo_empresa_dre_3meses", "DRE 3M - "),
    ("tabela_resumo_empresa_precos", "Preço/Volume - "),
    ("tabela_resumo_empresa_margens_retornos", "Retorno/Margem - "),
    ("tabela_resumo_empresa_bp", "Balanço - "),
    ("tabela_resumo_empresa_fc_12meses", "FC 12M - "),
    ("tabela_resumo_empresa_fc_3meses", "FC 3M - "),
    ("tabela_resumo_empresa_experimental", "CAPEX/FCL - "),
];

static TABLE_SELECTORS: Lazy<Vec<(Selector, &'static str)>> = Lazy::new(|| {
    SUMMARY_TABLES
        .iter()
        .map(|(id, prefix)| {
            let selector =
                Selector::parse(&format!("table#{id}")).expect("invalid summary table selector");
            (selector, *prefix)
        })
        .collect()
});

static ANCHOR_SELECTOR: Lazy<Selector> = Lazy::new(|| {
    Selector::parse(&format!("table#{ANCHOR_TABLE_ID}")).expect("invalid anchor selector")
});

static ROW_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("tr").expect("invalid row selector"));

static CELL_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("td").expect("invalid cell selector"));

static LINK_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("a").expect("invalid link selector"));

/// Leading numeric token of a linked cell, e.g. "8,50" out of
/// "8,50 (setor: 12,30)".
static NUMERIC_TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[-+]?[\d.,]+%?").expect("invalid numeric token regex"));

/// Monetary text, with or without a magnitude suffix. Kept whole so the
/// normalizer sees sign and scale.
static CURRENCY_TEXT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"R\$").expect("invalid currency regex"));

/// Extract all summary-table rows of an indicator page into a `RawRecord`.
pub fn extract_record(ticker: &str, body: &str) -> Result<RawRecord, FetchError> {
    let document = Html::parse_document(body);

    if document.select(&ANCHOR_SELECTOR).next().is_none() {
        return Err(FetchError::AnchorMissing);
    }

    let mut record = RawRecord::new(ticker);

    for (selector, prefix) in TABLE_SELECTORS.iter() {
        let Some(table) = document.select(selector).next() else {
            continue; // tables are optional except the anchor
        };

        for row in table.select(&ROW_SELECTOR) {
            let cells: Vec<ElementRef> = row.select(&CELL_SELECTOR).collect();
            if cells.len() != 2 {
                continue;
            }

            let label = cell_text(&cells[0]);
            if label.is_empty() {
                continue;
            }

            let value = value_cell_text(&cells[1]);
            record.push(format!("{prefix}{label}"), value);
        }
    }

    Ok(record)
}

fn cell_text(cell: &ElementRef) -> String {
    cell.text().collect::<String>().trim().to_string()
}

/// Value cells often wrap the figure in a link with extra context text
/// (sector comparisons, chart links). Monetary values keep their full
/// `R$ ...` text so sign and scale suffix survive; anything else keeps
/// its leading numeric token, or the whole text when there is none.
fn value_cell_text(cell: &ElementRef) -> String {
    let Some(link) = cell.select(&LINK_SELECTOR).next() else {
        return cell_text(cell);
    };

    let text = link.text().collect::<String>().trim().to_string();
    if CURRENCY_TEXT.is_match(&text) {
        return text;
    }

    match NUMERIC_TOKEN.find(&text) {
        Some(token) => token.as_str().to_string(),
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const SAMPLE_PAGE: &str = r#"
        <html><body>
        <table id="tabela_resumo_empresa">
            <tr><td>Empresa</td><td>Petrobras PN</td></tr>
            <tr><td>Último Preço de Fechamento</td><td>R$ 25,50</td></tr>
        </table>
        <table id="tabela_resumo_empresa_precos_relativos">
            <tbody id="tabela_resumo_empresa_precos_relativos_tbody">
                <tr><td>Preço/Lucro</td><td><a href="/grafico.php?cod=PETR4">8,50 (setor 12,10)</a></td></tr>
                <tr><td>Market Cap Empresa</td><td><a href="/grafico.php?cod=PETR4">R$ 150,30 B</a></td></tr>
            </tbody>
        </table>
        <table id="tabela_resumo_empresa_dre_12meses">
            <tbody>
                <tr><td>Lucro/Ação</td><td><a href="/grafico.php?cod=PETR4">- R$ 0,18</a></td></tr>
            </tbody>
        </table>
        </body></html>
    "#;

    #[test]
    fn test_extracts_prefixed_labels() {
        let record = extract_record("PETR4", SAMPLE_PAGE).unwrap();

        assert_eq!(record.get("Empresa"), Some("Petrobras PN"));
        assert_eq!(record.get("Último Preço de Fechamento"), Some("R$ 25,50"));
        assert_eq!(record.get("Indicador - Preço/Lucro"), Some("8,50"));
        assert_eq!(
            record.get("Indicador - Market Cap Empresa"),
            Some("R$ 150,30 B")
        );
        assert_eq!(record.get("DRE 12M - Lucro/Ação"), Some("- R$ 0,18"));
    }

    #[test]
    fn test_missing_anchor_is_an_error() {
        let err = extract_record("PETR4", "<html><body><p>manutenção</p></body></html>")
            .unwrap_err();
        assert_eq!(err, FetchError::AnchorMissing);
    }

    #[test]
    fn test_rows_without_two_cells_are_skipped() {
        let page = r#"
            <table id="tabela_resumo_empresa">
                <tr><th>cabeçalho</th></tr>
                <tr><td>Empresa</td><td>WEG SA</td><td>extra</td></tr>
                <tr><td>Setor</td><td>Bens Industriais</td></tr>
            </table>
        "#;
        let record = extract_record("WEGE3", page).unwrap();
        assert_eq!(record.len(), 1);
        assert_eq!(record.get("Setor"), Some("Bens Industriais"));
    }
}
