//! Integration tests for the page fetcher and the full pipeline,
//! running against a local mock of the indicator pages.

use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use pretty_assertions::assert_eq;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use investsite_stocks::api::{FetchError, InvestSiteClient, RecordSource};
use investsite_stocks::concurrent_fetcher::{run_pipeline, PipelineOptions};
use investsite_stocks::models::{Config, FetchMode, FieldValue, RecordStatus};

const INDICATORS_PATH: &str = "/principais_indicadores.php";

const SAMPLE_PAGE: &str = r#"
    <html><body>
    <table id="tabela_resumo_empresa">
        <tr><td>Empresa</td><td>Petrobras PN</td></tr>
        <tr><td>Setor</td><td>Petróleo e Gás</td></tr>
        <tr><td>Último Preço de Fechamento</td><td>R$ 25,50</td></tr>
        <tr><td>Volume Financeiro Transacionado</td><td>R$ 150,30 M</td></tr>
    </table>
    <table id="tabela_resumo_empresa_precos_relativos">
        <tbody>
            <tr><td>Preço/Lucro</td><td><a href="/grafico.php?cod=PETR4">8,50</a></td></tr>
            <tr><td>Dividend Yield</td><td><a href="/grafico.php?cod=PETR4">15,30%</a></td></tr>
            <tr><td>Market Cap Empresa</td><td><a href="/grafico.php?cod=PETR4">R$ 2,5 B</a></td></tr>
            <tr><td>Data do Preço da Ação</td><td>2024-08-20</td></tr>
        </tbody>
    </table>
    <table id="tabela_resumo_empresa_dre_12meses">
        <tbody>
            <tr><td>Lucro/Ação</td><td><a href="/grafico.php?cod=PETR4">R$ 2,50</a></td></tr>
        </tbody>
    </table>
    <table id="tabela_resumo_empresa_bp">
        <tbody>
            <tr><td>Ações Ordinárias</td><td>1.250.000.000</td></tr>
        </tbody>
    </table>
    </body></html>
"#;

fn test_config(server: &MockServer) -> Config {
    Config {
        base_url: server.uri(),
        request_timeout_secs: 1,
        retry_attempts: 1,
        ..Config::default()
    }
}

async fn mount_page(server: &MockServer, ticker: &str, body: &str) {
    Mock::given(method("GET"))
        .and(path(INDICATORS_PATH))
        .and(query_param("cod_negociacao", ticker))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_fetch_record_extracts_and_types_fields() {
    let server = MockServer::start().await;
    mount_page(&server, "PETR4", SAMPLE_PAGE).await;

    let client = InvestSiteClient::new(&test_config(&server)).unwrap();
    let raw = client.fetch_record("PETR4").await.unwrap();

    assert_eq!(raw.ticker, "PETR4");
    assert_eq!(raw.get("Último Preço de Fechamento"), Some("R$ 25,50"));
    assert_eq!(raw.get("Indicador - Market Cap Empresa"), Some("R$ 2,5 B"));
    assert_eq!(raw.get("DRE 12M - Lucro/Ação"), Some("R$ 2,50"));
    assert_eq!(raw.get("Balanço - Ações Ordinárias"), Some("1.250.000.000"));

    let record = investsite_stocks::cleaner::normalize(&raw);
    assert_eq!(record.status, RecordStatus::Complete);
    assert_eq!(
        record.get("Volume Financeiro Transacionado"),
        Some(&FieldValue::ScaledCurrency(150_300_000.00))
    );
    assert_eq!(
        record.get("Indicador - Market Cap Empresa"),
        Some(&FieldValue::ScaledCurrency(2_500_000_000.00))
    );
    assert_eq!(
        record.get("Indicador - Dividend Yield"),
        Some(&FieldValue::Percentage(15.30))
    );
    assert_eq!(
        record.get("Indicador - Data do Preço da Ação"),
        Some(&FieldValue::Date("20/08/2024".to_string()))
    );
    assert_eq!(
        record.get("Balanço - Ações Ordinárias"),
        Some(&FieldValue::Count(1_250_000_000))
    );
    assert_eq!(
        record.get("Setor"),
        Some(&FieldValue::Text("Petróleo e Gás".to_string()))
    );
}

#[tokio::test]
async fn test_timeout_is_retried_once_then_succeeds() {
    let server = MockServer::start().await;

    // First attempt runs into the 1s request timeout, the retry gets the
    // real page.
    Mock::given(method("GET"))
        .and(path(INDICATORS_PATH))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(SAMPLE_PAGE)
                .set_delay(Duration::from_secs(5)),
        )
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(INDICATORS_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_string(SAMPLE_PAGE))
        .mount(&server)
        .await;

    let client = InvestSiteClient::new(&test_config(&server)).unwrap();
    let raw = client.fetch_record("PETR4").await.unwrap();
    assert_eq!(raw.get("Empresa"), Some("Petrobras PN"));
    assert_eq!(server.received_requests().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_retry_budget_exhaustion_reports_timeout() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(INDICATORS_PATH))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(SAMPLE_PAGE)
                .set_delay(Duration::from_secs(5)),
        )
        .expect(2) // initial attempt plus one retry, nothing more
        .mount(&server)
        .await;

    let client = InvestSiteClient::new(&test_config(&server)).unwrap();
    let err = client.fetch_record("PETR4").await.unwrap_err();
    assert_matches!(err, FetchError::Timeout);
}

#[tokio::test]
async fn test_not_found_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(INDICATORS_PATH))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let client = InvestSiteClient::new(&test_config(&server)).unwrap();
    let err = client.fetch_record("XXXX9").await.unwrap_err();
    assert_eq!(err, FetchError::NotFound(404));
}

#[tokio::test]
async fn test_page_without_anchor_table_fails() {
    let server = MockServer::start().await;
    mount_page(
        &server,
        "PETR4",
        "<html><body><h1>Página em manutenção</h1></body></html>",
    )
    .await;

    let client = InvestSiteClient::new(&test_config(&server)).unwrap();
    let err = client.fetch_record("PETR4").await.unwrap_err();
    assert_eq!(err, FetchError::AnchorMissing);
}

#[tokio::test]
async fn test_pipeline_over_http_mixes_successes_and_failures() {
    let server = MockServer::start().await;
    for ticker in ["PETR4", "VALE3", "ITUB4", "BBDC4", "ABEV3"] {
        mount_page(&server, ticker, SAMPLE_PAGE).await;
    }
    // WEGE3 has no mounted page; wiremock answers 404
    let client = InvestSiteClient::new(&test_config(&server)).unwrap();

    let tickers: Vec<String> = ["PETR4", "VALE3", "WEGE3", "ITUB4", "BBDC4", "ABEV3"]
        .iter()
        .map(|s| s.to_string())
        .collect();

    let result = run_pipeline(
        Arc::new(client),
        tickers,
        FetchMode::Custom {
            workers: 3,
            batch_size: 5,
        },
        PipelineOptions::default(),
    )
    .await
    .unwrap();

    assert_eq!(result.total(), 6);
    assert_eq!(result.records.len(), 5);
    assert_eq!(result.failures.len(), 1);
    assert_eq!(result.failures[0].ticker, "WEGE3");
    assert_matches!(result.failures[0].error, FetchError::NotFound(404));

    // earnings yield derived for every successful record: 2,50 / 25,50
    for record in &result.records {
        assert_eq!(record.earnings_yield, Some(9.80));
    }
}
