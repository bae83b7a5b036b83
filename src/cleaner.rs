//! Field normalization for raw InvestSite values.
//!
//! Everything here is pure and deterministic: a raw label/string map goes
//! in, a typed map comes out. The parse rules mirror the Brazilian number
//! formats used on the site (decimal comma, dot thousands separators,
//! `R$` currency prefix, `mil`/K/M/B magnitude suffixes) plus a couple of
//! site-specific formatting quirks.

use std::collections::HashMap;

use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::models::{FieldKind, FieldValue, NormalizedRecord, RawRecord, RecordStatus};

/// First unsigned number run, after separator normalization.
static NUMBER_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"[\d.]+").expect("invalid number regex"));

/// First signed number run, after separator normalization.
static SIGNED_NUMBER_RUN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[-+]?[\d.]+").expect("invalid signed number regex"));

/// First signed integer run.
static SIGNED_INT_RUN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[-+]?\d+").expect("invalid integer regex"));

/// Numeric value followed by a magnitude suffix, used by kind sniffing.
static SCALE_SUFFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\d\s*(mil|[kmb])\s*$").expect("invalid scale suffix regex"));

const DATE_FORMATS: &[&str] = &["%d/%m/%Y", "%Y-%m-%d", "%d-%m-%Y", "%d/%m/%y"];

/// Normalize one raw record into a typed one.
///
/// Invariant: the output carries exactly the labels of the input, in the
/// same order. A field that fails to parse is kept as `Unparsed` with its
/// original text and downgrades the record to `Partial`; it never aborts
/// the sibling fields.
pub fn normalize(raw: &RawRecord) -> NormalizedRecord {
    let mut status = if raw.is_empty() {
        RecordStatus::Failed
    } else {
        RecordStatus::Complete
    };

    let mut fields = Vec::with_capacity(raw.len());
    for (label, value) in raw.fields() {
        let parsed = normalize_field(label, value);
        if matches!(parsed, FieldValue::Unparsed(_)) && status == RecordStatus::Complete {
            status = RecordStatus::Partial;
        }
        fields.push((label.clone(), parsed));
    }

    NormalizedRecord::new(raw.ticker.clone(), fields, status)
}

/// Normalize a single value under the kind declared for its label, or a
/// sniffed kind for labels outside the catalog.
pub fn normalize_field(label: &str, value: &str) -> FieldValue {
    if is_blank(value) {
        return FieldValue::Missing;
    }

    let kind = kind_for_label(label).unwrap_or_else(|| sniff_kind(value));
    let parsed = match kind {
        FieldKind::Currency => clean_currency(value).map(FieldValue::Currency),
        FieldKind::ScaledCurrency => clean_scaled_currency(value).map(FieldValue::ScaledCurrency),
        FieldKind::Percentage => clean_percentage(value).map(FieldValue::Percentage),
        FieldKind::Ratio => clean_ratio(value).map(FieldValue::Ratio),
        FieldKind::Date => clean_date(value).map(FieldValue::Date),
        FieldKind::Count => clean_count(value).map(FieldValue::Count),
        FieldKind::Text => Some(FieldValue::Text(value.to_string())),
    };

    parsed.unwrap_or_else(|| FieldValue::Unparsed(value.to_string()))
}

/// Declared kind for a catalog label, if the label is known.
pub fn kind_for_label(label: &str) -> Option<FieldKind> {
    LABEL_KINDS.get(label).copied()
}

/// Guess the kind of a value for labels outside the catalog.
///
/// Precedence: currency symbol, then percent sign, then scale suffix,
/// then plain numeric, then date pattern, then text.
pub fn sniff_kind(value: &str) -> FieldKind {
    let trimmed = value.trim();
    if trimmed.contains("R$") {
        if SCALE_SUFFIX.is_match(trimmed) {
            return FieldKind::ScaledCurrency;
        }
        return FieldKind::Currency;
    }
    if trimmed.ends_with('%') {
        return FieldKind::Percentage;
    }
    if SCALE_SUFFIX.is_match(trimmed) {
        return FieldKind::ScaledCurrency;
    }
    // Numeric only when the whole value is a number. Ticker codes and
    // company names carry digits too and must stay text.
    if is_fully_numeric(trimmed) {
        return FieldKind::Ratio;
    }
    if clean_date(trimmed).is_some() {
        return FieldKind::Date;
    }
    FieldKind::Text
}

/// True when the entire trimmed value, after separator normalization, is
/// one signed number with nothing around it.
fn is_fully_numeric(s: &str) -> bool {
    let normalized = normalize_separators(s);
    SIGNED_NUMBER_RUN
        .find(&normalized)
        .map(|m| m.start() == 0 && m.end() == normalized.len())
        .unwrap_or(false)
}

/// `"R$ 25,50"` -> `25.50`; `"- R$ 0,18"` -> `-0.18`.
pub fn clean_currency(raw: &str) -> Option<f64> {
    if is_blank(raw) {
        return None;
    }
    let trimmed = raw.trim();
    let negative = has_negative_sign(trimmed);

    let stripped = trimmed.replace("R$", "").replace(['-', '+', ' '], "");
    let normalized = normalize_separators(&stripped);
    let number: f64 = NUMBER_RUN.find(&normalized)?.as_str().parse().ok()?;

    let value = round2(number);
    Some(if negative { -value } else { value })
}

/// `"R$ 150,30 M"` -> `150_300_000.00`; `"R$ 250,30 mil"` -> `250_300.00`;
/// no suffix behaves exactly like `clean_currency`.
pub fn clean_scaled_currency(raw: &str) -> Option<f64> {
    if is_blank(raw) {
        return None;
    }
    let trimmed = raw.trim();
    let negative = has_negative_sign(trimmed);

    let upper = trimmed
        .replace("R$", "")
        .replace(['-', '+', ' '], "")
        .to_uppercase();

    // "MIL" must be checked before the bare "M" it contains.
    let (multiplier, numeric) = if upper.contains('B') {
        (1e9, upper.replace('B', ""))
    } else if upper.contains("MIL") {
        (1e3, upper.replace("MIL", ""))
    } else if upper.contains('M') {
        (1e6, upper.replace('M', ""))
    } else if upper.contains('K') {
        (1e3, upper.replace('K', ""))
    } else {
        (1.0, upper)
    };

    let normalized = normalize_separators(&numeric);
    let number: f64 = NUMBER_RUN.find(&normalized)?.as_str().parse().ok()?;

    let value = round2(number * multiplier);
    Some(if negative { -value } else { value })
}

/// `"15,30%"` -> `15.30`, kept in percent units.
///
/// InvestSite renders some percentages with a thousands separator and
/// three spurious digits (`-18.000,00%` meaning `-18,00%`); those are
/// detected by the separator pattern and divided back by 1000.
pub fn clean_percentage(raw: &str) -> Option<f64> {
    if is_blank(raw) {
        return None;
    }
    let cleaned = raw.trim().replace('%', "");
    let cleaned = cleaned.trim();

    let has_comma = cleaned.contains(',');
    let has_dot = cleaned.contains('.');

    let value = if has_comma && has_dot {
        let plain = cleaned.replace('.', "").replace(',', ".");
        parse_signed(&plain)? / 1000.0
    } else if has_comma {
        parse_signed(&cleaned.replace(',', "."))?
    } else if has_dot {
        if decimal_tail(cleaned, '.') {
            parse_signed(cleaned)?
        } else {
            // Dot thousands separator without a decimal part, same
            // spurious-digits formatting as above.
            let number = parse_signed(&cleaned.replace('.', ""))?;
            if number.abs() >= 1000.0 {
                number / 1000.0
            } else {
                number
            }
        }
    } else {
        parse_signed(cleaned)?
    };

    Some(round2(value))
}

/// `"8,50"` -> `8.50`; `"1.234,56"` -> `1234.56`.
pub fn clean_ratio(raw: &str) -> Option<f64> {
    if is_blank(raw) {
        return None;
    }
    let normalized = normalize_separators(raw.trim());
    Some(round2(parse_signed(&normalized)?))
}

/// Canonicalize any accepted date format to `DD/MM/YYYY`.
pub fn clean_date(raw: &str) -> Option<String> {
    if is_blank(raw) {
        return None;
    }
    let trimmed = raw.trim();
    DATE_FORMATS.iter().find_map(|fmt| {
        NaiveDate::parse_from_str(trimmed, fmt)
            .ok()
            .map(|date| date.format("%d/%m/%Y").to_string())
    })
}

/// `"1.250.000.000"` -> `1_250_000_000`.
pub fn clean_count(raw: &str) -> Option<i64> {
    if is_blank(raw) {
        return None;
    }
    let cleaned: String = raw
        .trim()
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '-' || *c == '+')
        .collect();
    SIGNED_INT_RUN.find(&cleaned)?.as_str().parse().ok()
}

pub(crate) fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn is_blank(raw: &str) -> bool {
    matches!(raw.trim(), "" | "N/A" | "-")
}

/// The sign can precede or follow the `R$` prefix.
fn has_negative_sign(s: &str) -> bool {
    s.starts_with('-') || s.contains("R$ -") || s.contains("R$-")
}

fn parse_signed(s: &str) -> Option<f64> {
    SIGNED_NUMBER_RUN.find(s)?.as_str().parse().ok()
}

/// Resolve Brazilian vs international separators: a trailing group of at
/// most two digits after the last `,` or `.` is a decimal part, anything
/// else is a thousands separator.
fn normalize_separators(s: &str) -> String {
    let has_comma = s.contains(',');
    let has_dot = s.contains('.');

    if has_comma && has_dot {
        // 1.234.567,89
        s.replace('.', "").replace(',', ".")
    } else if has_comma {
        if decimal_tail(s, ',') {
            s.replace(',', ".")
        } else {
            s.replace(',', "")
        }
    } else if has_dot {
        if decimal_tail(s, '.') {
            s.to_string()
        } else {
            s.replace('.', "")
        }
    } else {
        s.to_string()
    }
}

fn decimal_tail(s: &str, separator: char) -> bool {
    s.rsplit(separator)
        .next()
        .map(|tail| tail.len() <= 2)
        .unwrap_or(false)
}

/// Label catalog: declared parse kind for every known field. Labels not
/// listed here fall back to kind sniffing, with plain text as the final
/// default.
static LABEL_KINDS: Lazy<HashMap<&'static str, FieldKind>> = Lazy::new(|| {
    use FieldKind::*;

    let entries: &[(&str, FieldKind)] = &[
        // Prices
        ("Último Preço de Fechamento", Currency),
        ("Volume Financeiro Transacionado", ScaledCurrency),
        // Valuation multiples
        ("Indicador - Preço/Lucro", Ratio),
        ("Indicador - Preço/VPA", Ratio),
        ("Indicador - Preço/Receita Líquida", Ratio),
        ("Indicador - Preço/FCO", Ratio),
        ("Indicador - Preço/FCF", Ratio),
        ("Indicador - Preço/Ativo Total", Ratio),
        ("Indicador - Preço/EBIT", Ratio),
        ("Indicador - Preço/Capital Giro", Ratio),
        ("Indicador - Preço/NCAV", Ratio),
        ("Indicador - EV/EBIT", Ratio),
        ("Indicador - EV/EBITDA", Ratio),
        ("Indicador - EV/Receita Líquida", Ratio),
        ("Indicador - EV/FCO", Ratio),
        ("Indicador - EV/FCF", Ratio),
        ("Indicador - EV/Ativo Total", Ratio),
        ("Indicador - Market Cap Empresa", ScaledCurrency),
        ("Indicador - Enterprise Value", ScaledCurrency),
        ("Indicador - Data Demonstração Financeira Atual", Date),
        ("Indicador - Data do Preço da Ação", Date),
        ("Indicador - Preço Atual da Ação", Currency),
        ("Indicador - Dividend Yield", Percentage),
        // Income statement, trailing 12 months
        ("DRE 12M - Receita Líquida", ScaledCurrency),
        ("DRE 12M - Resultado Bruto", ScaledCurrency),
        ("DRE 12M - EBIT", ScaledCurrency),
        ("DRE 12M - Depreciação e Amortização", ScaledCurrency),
        ("DRE 12M - EBITDA", ScaledCurrency),
        ("DRE 12M - Lucro Líquido", ScaledCurrency),
        ("DRE 12M - Lucro/Ação", ScaledCurrency),
        // Income statement, last quarter
        ("DRE 3M - Receita Líquida", ScaledCurrency),
        ("DRE 3M - Resultado Bruto", ScaledCurrency),
        ("DRE 3M - EBIT", ScaledCurrency),
        ("DRE 3M - Depreciação e Amortização", ScaledCurrency),
        ("DRE 3M - EBITDA", ScaledCurrency),
        ("DRE 3M - Lucro Líquido", ScaledCurrency),
        ("DRE 3M - Lucro/Ação", ScaledCurrency),
        // Returns and margins
        ("Retorno/Margem - Retorno s/ Capital Tangível Inicial", Percentage),
        ("Retorno/Margem - Retorno s/ Capital Investido Inicial", Percentage),
        (
            "Retorno/Margem - Retorno s/ Capital Tangível Inicial Pré-Impostos",
            Percentage,
        ),
        (
            "Retorno/Margem - Retorno s/ Capital Investido Inicial Pré-Impostos",
            Percentage,
        ),
        ("Retorno/Margem - Retorno s/ Patrimônio Líquido Inicial", Percentage),
        ("Retorno/Margem - Retorno s/ Ativo Inicial", Percentage),
        ("Retorno/Margem - Margem Bruta", Percentage),
        ("Retorno/Margem - Margem Líquida", Percentage),
        ("Retorno/Margem - Margem EBIT", Percentage),
        ("Retorno/Margem - Margem EBITDA", Percentage),
        ("Retorno/Margem - Giro do Ativo Inicial", Ratio),
        ("Retorno/Margem - Alavancagem Financeira", Ratio),
        ("Retorno/Margem - Passivo/Patrimônio Líquido", Ratio),
        ("Retorno/Margem - Dívida Líquida/EBITDA", Ratio),
        // Balance sheet
        ("Balanço - Caixa e Equivalentes de Caixa", ScaledCurrency),
        ("Balanço - Ativo Total", ScaledCurrency),
        ("Balanço - Dívida de Curto Prazo", ScaledCurrency),
        ("Balanço - Dívida de Longo Prazo", ScaledCurrency),
        ("Balanço - Dívida Bruta", ScaledCurrency),
        ("Balanço - Dívida Líquida", ScaledCurrency),
        ("Balanço - Patrimônio Líquido", ScaledCurrency),
        ("Balanço - Valor Patrimonial da Ação", ScaledCurrency),
        ("Balanço - Ações Ordinárias", Count),
        ("Balanço - Ações Preferenciais", Count),
        ("Balanço - Total", Count),
        ("Balanço - Ações Ordinárias em Tesouraria", Count),
        ("Balanço - Ações Preferenciais em Tesouraria", Count),
        ("Balanço - Total em Tesouraria", Count),
        ("Balanço - Ações Ordinárias (Exceto Tesouraria)", Count),
        ("Balanço - Ações Preferenciais (Exceto Tesouraria)", Count),
        ("Balanço - Total (Exceto Tesouraria)", Count),
        // Cash flow, trailing 12 months
        ("FC 12M - Fluxo de Caixa Operacional", ScaledCurrency),
        ("FC 12M - Fluxo de Caixa de Investimentos", ScaledCurrency),
        ("FC 12M - Fluxo de Caixa de Financiamentos", ScaledCurrency),
        ("FC 12M - Aumento (Redução) de Caixa e Equivalentes", ScaledCurrency),
        // Cash flow, last quarter
        ("FC 3M - Fluxo de Caixa Operacional", ScaledCurrency),
        ("FC 3M - Fluxo de Caixa de Investimentos", ScaledCurrency),
        ("FC 3M - Fluxo de Caixa de Financiamentos", ScaledCurrency),
        ("FC 3M - Aumento (Redução) de Caixa e Equivalentes", ScaledCurrency),
        // CAPEX and free cash flow
        ("CAPEX/FCL - CAPEX 3 meses", ScaledCurrency),
        ("CAPEX/FCL - Fluxo de Caixa Livre 3 meses", ScaledCurrency),
        ("CAPEX/FCL - CAPEX 12 meses", ScaledCurrency),
        ("CAPEX/FCL - Fluxo de Caixa Livre 12 meses", ScaledCurrency),
        // Derived metric, when re-ingested from an earlier export
        ("Earnings Yield (%)", Percentage),
        // 52-week price/volume stats
        ("Preço/Volume - Menor Preço 52 semanas", Currency),
        ("Preço/Volume - Maior Preço 52 semanas", Currency),
        ("Preço/Volume - Variação 2025", Percentage),
        ("Preço/Volume - Variação 1 ano", Percentage),
        ("Preço/Volume - Variação 2 anos(total)", Percentage),
        ("Preço/Volume - Variação 2 anos(anual)", Percentage),
        ("Preço/Volume - Variação 3 anos(total)", Percentage),
        ("Preço/Volume - Variação 3 anos(anual)", Percentage),
        ("Preço/Volume - Variação 4 anos(total)", Percentage),
        ("Preço/Volume - Variação 4 anos(anual)", Percentage),
        ("Preço/Volume - Variação 5 anos(total)", Percentage),
        ("Preço/Volume - Variação 5 anos(anual)", Percentage),
        ("Preço/Volume - Volume Diário Médio (3 meses)", ScaledCurrency),
    ];

    entries.iter().copied().collect()
});
